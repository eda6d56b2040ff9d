//! Blocking rendezvous between the controller thread and one agent thread.
//!
//! Control is passed like a baton: whoever posts a message then sleeps until the other side
//! answers, so at most one of the two sides computes at any time.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

struct Slots<D, U> {
    down: Option<D>,
    up: Option<U>,
    agent_gone: bool,
}

pub(crate) struct Handoff<D, U> {
    slots: Mutex<Slots<D, U>>,
    cv: Condvar,
}

impl<D, U> Handoff<D, U> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                down: None,
                up: None,
                agent_gone: false,
            }),
            cv: Condvar::new(),
        }
    }

    // Nothing panics while the lock is held, a poisoned guard still holds consistent slots.
    fn lock(&self) -> MutexGuard<'_, Slots<D, U>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Controller side: hands `msg` to the agent and blocks until it answers.
    ///
    /// `None` means the agent thread is gone.
    pub(crate) fn resume(&self, msg: D) -> Option<U> {
        let mut slots = self.lock();
        slots.up = None;
        slots.down = Some(msg);
        self.cv.notify_all();
        self.wait_up(slots)
    }

    /// Controller side: blocks until the agent posts without sending anything.
    pub(crate) fn wait(&self) -> Option<U> {
        let slots = self.lock();
        self.wait_up(slots)
    }

    fn wait_up(&self, mut slots: MutexGuard<'_, Slots<D, U>>) -> Option<U> {
        loop {
            if let Some(up) = slots.up.take() {
                return Some(up);
            }
            if slots.agent_gone {
                return None;
            }
            slots = self.cv.wait(slots).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Agent side: posts `msg` and blocks until resumed.
    pub(crate) fn pause(&self, msg: U) -> D {
        let mut slots = self.lock();
        slots.up = Some(msg);
        self.cv.notify_all();
        loop {
            if let Some(down) = slots.down.take() {
                return down;
            }
            slots = self.cv.wait(slots).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Agent side: last message, the agent never waits again.
    pub(crate) fn finish(&self, msg: U) {
        let mut slots = self.lock();
        slots.up = Some(msg);
        slots.agent_gone = true;
        self.cv.notify_all();
    }

    fn depart(&self) {
        let mut slots = self.lock();
        slots.agent_gone = true;
        self.cv.notify_all();
    }
}

/// Held by the agent thread; wakes the controller if the thread ends without `finish`.
pub(crate) struct Departure<D, U>(pub(crate) Arc<Handoff<D, U>>);

impl<D, U> Drop for Departure<D, U> {
    fn drop(&mut self) {
        self.0.depart();
    }
}
