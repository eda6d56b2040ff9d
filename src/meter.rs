use tracing::trace;

/// Result of a checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Charge {
    /// Budget left, keep running.
    Continue,
    /// The charge overran the budget: the turn ends at this checkpoint.
    Exhausted,
}

/// Per-turn work counter of one context.
///
/// Costs are abstract units reported at checkpoints, never wall-clock time, so the cost
/// attributed to a given sequence of agent operations is the same on every run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Meter {
    limit: u32,
    remaining: i64,
}

impl Meter {
    /// A meter with an empty budget; call [`reset`](Self::reset) before the first turn.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a turn with a fresh budget, forgetting previous usage.
    pub fn reset(&mut self, limit: u32) {
        self.limit = limit;
        self.remaining = i64::from(limit);
    }

    /// Attributes `n` units to the running turn.
    ///
    /// Returns [`Charge::Exhausted`] when the budget would go negative; the caller must then
    /// suspend instead of continuing.
    pub fn charge(&mut self, n: u32) -> Charge {
        self.remaining -= i64::from(n);
        if self.remaining < 0 {
            trace!(limit = self.limit, overrun = -self.remaining, "turn budget exhausted");
            self.remaining = 0;
            Charge::Exhausted
        } else {
            Charge::Continue
        }
    }

    /// Units used during this turn, never above the limit.
    pub fn used(&self) -> u32 {
        self.limit - self.remaining as u32
    }

    /// Units left this turn.
    pub fn remaining(&self) -> u32 {
        self.remaining as u32
    }

    /// Budget of the current turn.
    pub fn limit(&self) -> u32 {
        self.limit
    }
}
