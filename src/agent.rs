//! One resumable, isolated execution of agent logic.
//!
//! An [`AgentContext`] owns a named OS thread running an [`AgentProgram`]. The controller and
//! the thread pass control back and forth through a blocking rendezvous, so the thread only computes
//! between a `step` call and its return.
//!
//! ```text
//! CREATED --init--> SUSPENDED --step--> RUNNING --yield/exhausted--> SUSPENDED --> ...
//!                                          |
//!                                          +--returned/fault/self-destruct/kill--> TERMINATED
//! ```

use std::any::Any;
use std::fmt::Display;
use std::mem::{self, ManuallyDrop};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::action::Action;
use crate::constraints::ApiCosts;
use crate::error::EngineError;
use crate::handle::{ContextKilled, Indicator, WorldHandle};
use crate::handoff::{Departure, Handoff};
use crate::program::AgentProgram;
use crate::world::{AgentId, RobotInfo, Team, World};

/// Lifecycle state of a context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentStatus {
    /// Thread started, not yet parked.
    Created,
    /// Parked, waiting for its next turn.
    Suspended,
    /// Holding the execution slot.
    Running,
    /// Gone for good.
    Terminated,
}

impl AgentStatus {
    fn from_u8(value: u8) -> AgentStatus {
        match value {
            0 => AgentStatus::Created,
            1 => AgentStatus::Suspended,
            2 => AgentStatus::Running,
            _ => AgentStatus::Terminated,
        }
    }
}

/// Status of a context, readable from any thread.
#[derive(Clone, Debug)]
pub struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(AgentStatus::Created as u8)))
    }

    /// Current status.
    pub fn get(&self) -> AgentStatus {
        AgentStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, status: AgentStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }
}

/// Why a context terminated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminationCause {
    /// The program returned `Ok`.
    Returned,
    /// The agent called [`WorldHandle::self_destruct`].
    SelfDestructed,
    /// The controller terminated the context.
    Killed,
    /// The program panicked or returned an error.
    Fault(String),
}

impl Display for TerminationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationCause::Returned => f.write_str("returned"),
            TerminationCause::SelfDestructed => f.write_str("self-destructed"),
            TerminationCause::Killed => f.write_str("killed"),
            TerminationCause::Fault(msg) => write!(f, "fault: {msg}"),
        }
    }
}

/// How a turn ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The agent ended its turn itself.
    Yielded,
    /// The meter cut the turn at a checkpoint.
    Exhausted,
    /// The context terminated during the turn.
    Terminated(TerminationCause),
}

/// Everything the controller learns from one turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReport {
    /// How the turn ended.
    pub outcome: TurnOutcome,
    /// Units spent, never above the budget.
    pub used: u32,
    /// Action queued during the turn. Always `None` when the context terminated.
    pub action: Option<Action>,
    /// Indicator strings set during the turn.
    pub indicators: Vec<Indicator>,
}

/// Budget and round of one turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnBudget {
    /// Units the turn may spend.
    pub limit: u32,
    /// Round the turn belongs to.
    pub round: u32,
}

/// Controller to agent.
pub(crate) struct Resume {
    pub(crate) limit: u32,
    pub(crate) round: u32,
    pub(crate) kill: bool,
}

impl Resume {
    fn kill() -> Self {
        Self {
            limit: 0,
            round: 0,
            kill: true,
        }
    }
}

pub(crate) enum TurnEnd {
    Ready,
    Yielded,
    Exhausted,
    Terminated(TerminationCause),
}

/// Agent to controller.
pub(crate) struct Posted {
    pub(crate) end: TurnEnd,
    pub(crate) used: u32,
    pub(crate) action: Option<Action>,
    pub(crate) indicators: Vec<Indicator>,
}

impl Posted {
    fn bare(end: TurnEnd, used: u32) -> Self {
        Self {
            end,
            used,
            action: None,
            indicators: vec![],
        }
    }
}

/// Per-context settings.
#[derive(Clone, Copy, Debug)]
pub struct ContextOptions {
    /// World API costs.
    pub costs: ApiCosts,
    /// Stack size of the agent thread, in bytes.
    pub stack_size: usize,
    /// Match seed, mixed with the robot id.
    pub seed: u64,
    /// Drop `say` output.
    pub silenced: bool,
}

/// A resumable execution of one robot's program.
pub struct AgentContext {
    id: AgentId,
    team: Team,
    baton: Arc<Handoff<Resume, Posted>>,
    thread: Option<JoinHandle<()>>,
    status: StatusCell,
    termination: Option<TerminationCause>,
    last_used: u32,
}

impl AgentContext {
    /// Starts the thread of `robot`'s context. The program does not run before the first `step`.
    ///
    /// # Errors
    /// [`EngineError::Spawn`] when the OS refuses the thread.
    pub fn spawn(
        robot: &RobotInfo,
        program: Box<dyn AgentProgram>,
        world: Arc<RwLock<World>>,
        options: ContextOptions,
    ) -> Result<AgentContext, EngineError> {
        let baton = Arc::new(Handoff::new());
        let mut handle = WorldHandle::new(
            robot,
            world,
            baton.clone(),
            options.costs,
            options.seed,
            options.silenced,
        );
        let thread = thread::Builder::new()
            .name(format!("agent-{}-{}", robot.team, robot.id))
            .stack_size(options.stack_size)
            .spawn({
                let baton = baton.clone();
                move || {
                    let _departure = Departure(baton.clone());
                    let first = baton.pause(Posted::bare(TurnEnd::Ready, 0));
                    let cause = run_sandboxed(program, &mut handle, first);
                    baton.finish(Posted::bare(TurnEnd::Terminated(cause), handle.used()));
                }
            })
            .map_err(|source| EngineError::Spawn {
                id: robot.id,
                source,
            })?;

        trace!(id = robot.id, team = %robot.team, "context created");
        Ok(AgentContext {
            id: robot.id,
            team: robot.team,
            baton,
            thread: Some(thread),
            status: StatusCell::new(),
            termination: None,
            last_used: 0,
        })
    }

    /// Waits for the thread to park. Does nothing unless the context was just created.
    pub fn init(&mut self) -> Result<(), EngineError> {
        if self.status.get() != AgentStatus::Created {
            return Ok(());
        }
        match self.baton.wait() {
            Some(Posted {
                end: TurnEnd::Ready,
                ..
            }) => {
                self.status.set(AgentStatus::Suspended);
                Ok(())
            }
            _ => {
                self.finish(TerminationCause::Killed);
                Err(EngineError::Rendezvous(self.id))
            }
        }
    }

    /// Runs one turn and blocks until the agent yields, is cut off, or terminates.
    ///
    /// # Errors
    /// Stepping a terminated or uninitialised context is a programming error.
    pub fn step(&mut self, budget: TurnBudget) -> Result<TurnReport, EngineError> {
        match self.status.get() {
            AgentStatus::Created => return Err(EngineError::NotInitialised(self.id)),
            AgentStatus::Terminated => return Err(EngineError::SteppedTerminated(self.id)),
            AgentStatus::Running | AgentStatus::Suspended => {}
        }

        self.status.set(AgentStatus::Running);
        let posted = self.baton.resume(Resume {
            limit: budget.limit,
            round: budget.round,
            kill: false,
        });
        let Some(posted) = posted else {
            self.finish(TerminationCause::Killed);
            return Err(EngineError::Rendezvous(self.id));
        };
        self.last_used = posted.used;

        let outcome = match posted.end {
            TurnEnd::Yielded => TurnOutcome::Yielded,
            TurnEnd::Exhausted => TurnOutcome::Exhausted,
            TurnEnd::Terminated(cause) => {
                self.finish(cause.clone());
                return Ok(TurnReport {
                    outcome: TurnOutcome::Terminated(cause),
                    used: posted.used,
                    action: None,
                    indicators: vec![],
                });
            }
            TurnEnd::Ready => {
                self.finish(TerminationCause::Killed);
                return Err(EngineError::Rendezvous(self.id));
            }
        };
        self.status.set(AgentStatus::Suspended);
        Ok(TurnReport {
            outcome,
            used: posted.used,
            action: posted.action,
            indicators: posted.indicators,
        })
    }

    /// Kills the context unless already terminated. Calling it again has no effect.
    pub fn terminate(&mut self) {
        if self.status.get() == AgentStatus::Terminated {
            return;
        }
        if self.status.get() == AgentStatus::Created && self.baton.wait().is_none() {
            self.finish(TerminationCause::Killed);
            return;
        }
        let cause = loop {
            match self.baton.resume(Resume::kill()) {
                Some(Posted {
                    end: TurnEnd::Terminated(cause),
                    ..
                }) => break cause,
                Some(_) => continue,
                None => break TerminationCause::Killed,
            }
        };
        self.finish(cause);
    }

    fn finish(&mut self, cause: TerminationCause) {
        debug!(id = self.id, %cause, "context terminated");
        self.status.set(AgentStatus::Terminated);
        self.termination = Some(cause);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(id = self.id, "agent thread ended abnormally");
            }
        }
    }

    /// Units spent during the most recent `step`.
    pub fn resource_used(&self) -> u32 {
        self.last_used
    }

    /// Current status.
    pub fn status(&self) -> AgentStatus {
        self.status.get()
    }

    /// Shared view on the status, for sampling from other threads.
    pub fn status_cell(&self) -> StatusCell {
        self.status.clone()
    }

    /// Why the context terminated, once it did.
    pub fn termination(&self) -> Option<&TerminationCause> {
        self.termination.as_ref()
    }

    /// Id of the context (and of its robot).
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Team of the robot.
    pub fn team(&self) -> Team {
        self.team
    }
}

impl Drop for AgentContext {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Runs the program until it ends, converting anything escaping it into a cause.
fn run_sandboxed(
    program: Box<dyn AgentProgram>,
    handle: &mut WorldHandle,
    first: Resume,
) -> TerminationCause {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut program = program;
        handle.begin_turn(first);
        program.run(handle)
    }));
    match result {
        Ok(Ok(())) => handle.pending_doom().unwrap_or(TerminationCause::Returned),
        Ok(Err(e)) => {
            // Display and Drop of the error are agent code too.
            let e = ManuallyDrop::new(e);
            let message = contain(|| format!("{:#}", &*e));
            let e = ManuallyDrop::into_inner(e);
            contain(move || drop(e));
            TerminationCause::Fault(message.unwrap_or_else(|| UNPRINTABLE.to_owned()))
        }
        Err(payload) => match payload.downcast::<ContextKilled>() {
            Ok(killed) => killed.0,
            Err(payload) => {
                let message = panic_message(&*payload);
                contain(move || drop(payload));
                TerminationCause::Fault(message)
            }
        },
    }
}

const UNPRINTABLE: &str = "unprintable fault";

/// Runs `f`, swallowing any panic it raises. The panic payload is leaked, never dropped.
fn contain<T>(f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            warn!("agent value panicked while being reported");
            mem::forget(payload);
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_owned()
    }
}
