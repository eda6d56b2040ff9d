//! Defines the resource constraints applied to agent execution.
//!
//! This module provides tools to configure the per-turn work allowance of every agent, the cost
//! of the world API, and the limits of a match.
//!
//! # Overview
//!
//! The main entry point is the [`ConstraintsBuilder`] struct, which uses a builder pattern
//! to configure limits. These include:
//!
//! - **Turn budget**: metered units an agent may spend per turn before being cut off
//! - **API costs**: units charged per world query, per queued action, and per rejected action
//! - **Match length**: maximum number of rounds
//! - **Yield refund**: the energon bonus given to agents ending their turn early
//! - **Agent threads**: stack size of each agent's control flow
//!
//! Once built, a [`Constraints`] object is passed to the
//! [`RoundController`](crate::round::RoundController) or the [`Arena`](crate::arena::Arena).
//!
//! # Example
//!
//! ```
//! use robot_arena::constraints::{ConstraintsBuilder, YieldRefund};
//!
//! let constraints = ConstraintsBuilder::new()
//!     .with_turn_budget(10_000)
//!     .with_max_rounds(500)
//!     .with_yield_refund(YieldRefund::Proportional { percent: 10 })
//!     .build()
//!     .unwrap();
//! ```
//!
//! You may also construct constraints from environment variables using
//! [`ConstraintsBuilder::from_env()`] for runtime configurability.

use std::env;

use anyhow::bail;
use tracing::warn;

/// Default number of units an agent may spend per turn.
pub const DEFAULT_TURN_BUDGET: u32 = 6_000;
/// Default units charged when an action is rejected.
pub const DEFAULT_VIOLATION_PENALTY: u32 = 500;

/// Energon bonus policy for agents ending their turn before exhausting their budget.
///
/// The budget itself is never carried over: every turn starts from the full turn budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum YieldRefund {
    /// No bonus.
    #[default]
    None,
    /// Bonus `= max_energon * percent / 100 * unused / limit`, rounded down.
    Proportional {
        /// Percentage of the maximum energon granted for a fully unused turn.
        percent: u32,
    },
}

impl YieldRefund {
    /// Bonus granted for `unused` units out of `limit`, for a robot with `max_energon`.
    pub fn bonus(self, max_energon: i32, unused: u32, limit: u32) -> i32 {
        match self {
            YieldRefund::None => 0,
            YieldRefund::Proportional { percent } => {
                if limit == 0 {
                    return 0;
                }
                let scaled = i64::from(max_energon.max(0))
                    * i64::from(percent)
                    * i64::from(unused.min(limit));
                (scaled / (100 * i64::from(limit))) as i32
            }
        }
    }
}

/// Units charged by the world API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApiCosts {
    /// Per world query.
    pub query: u32,
    /// Per action request, accepted or not.
    pub action: u32,
    /// Extra units charged when an action is rejected.
    pub violation_penalty: u32,
    /// Longest broadcast message accepted, in bytes.
    pub max_message_len: usize,
}

/// A builder for the constraints of a match.
///
/// By default, agents get [`DEFAULT_TURN_BUDGET`] units per turn, queries cost 2 units,
/// actions 10, rejections [`DEFAULT_VIOLATION_PENALTY`], matches last at most 3000 rounds and
/// early yields grant no bonus.
#[derive(Debug, Default)]
pub struct ConstraintsBuilder {
    turn_budget: Option<u32>,
    max_rounds: Option<u32>,
    query_cost: Option<u32>,
    action_cost: Option<u32>,
    violation_penalty: Option<u32>,
    yield_refund: Option<YieldRefund>,
    stack_size: Option<usize>,
    max_message_len: Option<usize>,
}

impl ConstraintsBuilder {
    /// Creates a new `ConstraintsBuilder` with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `ConstraintsBuilder` configured from environment variables.
    ///
    /// Read environment variables are:
    /// - `TURN_BUDGET` (u32): units per turn
    /// - `MAX_ROUNDS` (u32): maximum number of rounds
    /// - `VIOLATION_PENALTY` (u32): units charged per rejected action
    /// - `YIELD_REFUND_PERCENT` (u32): enables [`YieldRefund::Proportional`]
    /// - `AGENT_STACK_KB` (usize): stack size of agent threads, in KiB
    ///
    /// Unparsable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(var: &str) -> Option<T> {
            let value = env::var(var).ok()?;
            match value.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("ignoring unparsable {var}='{value}'");
                    None
                }
            }
        }

        ConstraintsBuilder {
            turn_budget: parse("TURN_BUDGET"),
            max_rounds: parse("MAX_ROUNDS"),
            violation_penalty: parse("VIOLATION_PENALTY"),
            yield_refund: parse("YIELD_REFUND_PERCENT")
                .map(|percent| YieldRefund::Proportional { percent }),
            stack_size: parse::<usize>("AGENT_STACK_KB").map(|kb| kb * 1024),
            ..Self::default()
        }
    }

    /// Sets the units an agent may spend per turn.
    #[must_use]
    pub fn with_turn_budget(self, units: u32) -> Self {
        Self {
            turn_budget: Some(units),
            ..self
        }
    }

    /// Sets the maximum number of rounds of a match.
    #[must_use]
    pub fn with_max_rounds(self, rounds: u32) -> Self {
        Self {
            max_rounds: Some(rounds),
            ..self
        }
    }

    /// Sets the units charged per world query.
    #[must_use]
    pub fn with_query_cost(self, units: u32) -> Self {
        Self {
            query_cost: Some(units),
            ..self
        }
    }

    /// Sets the units charged per action request.
    #[must_use]
    pub fn with_action_cost(self, units: u32) -> Self {
        Self {
            action_cost: Some(units),
            ..self
        }
    }

    /// Sets the units charged when an action is rejected.
    #[must_use]
    pub fn with_violation_penalty(self, units: u32) -> Self {
        Self {
            violation_penalty: Some(units),
            ..self
        }
    }

    /// Sets the early-yield bonus policy.
    #[must_use]
    pub fn with_yield_refund(self, policy: YieldRefund) -> Self {
        Self {
            yield_refund: Some(policy),
            ..self
        }
    }

    /// Sets the stack size of agent threads, in bytes.
    #[must_use]
    pub fn with_stack_size(self, bytes: usize) -> Self {
        Self {
            stack_size: Some(bytes),
            ..self
        }
    }

    /// Sets the longest broadcast message accepted, in bytes.
    #[must_use]
    pub fn with_max_message_len(self, bytes: usize) -> Self {
        Self {
            max_message_len: Some(bytes),
            ..self
        }
    }

    /// Consumes the builder and returns the constructed `Constraints`.
    ///
    /// # Errors
    ///
    /// Returned when constraints are impossible, e.g. a zero turn budget or a stack too small
    /// to run anything.
    pub fn build(self) -> anyhow::Result<Constraints> {
        const MIN_STACK: usize = 64 * 1024;

        let turn_budget = self.turn_budget.unwrap_or(DEFAULT_TURN_BUDGET);
        if turn_budget == 0 {
            bail!("turn budget must be positive");
        }
        let max_rounds = self.max_rounds.unwrap_or(3_000);
        if max_rounds == 0 {
            bail!("a match needs at least one round");
        }
        let stack_size = self.stack_size.unwrap_or(2 * 1024 * 1024);
        if stack_size < MIN_STACK {
            bail!(
                "agent stack size ({stack_size} bytes) is below {} KiB",
                MIN_STACK / 1024
            );
        }
        if let Some(YieldRefund::Proportional { percent }) = self.yield_refund {
            if percent > 100 {
                bail!("yield refund of {percent}% exceeds 100%");
            }
        }

        Ok(Constraints {
            turn_budget,
            max_rounds,
            costs: ApiCosts {
                query: self.query_cost.unwrap_or(2),
                action: self.action_cost.unwrap_or(10),
                violation_penalty: self
                    .violation_penalty
                    .unwrap_or(DEFAULT_VIOLATION_PENALTY),
                max_message_len: self.max_message_len.unwrap_or(256),
            },
            yield_refund: self.yield_refund.unwrap_or_default(),
            stack_size,
        })
    }
}

/// Obtained using `ConstraintsBuilder`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraints {
    pub(crate) turn_budget: u32,
    pub(crate) max_rounds: u32,
    pub(crate) costs: ApiCosts,
    pub(crate) yield_refund: YieldRefund,
    pub(crate) stack_size: usize,
}

impl Constraints {
    /// create a ConstraintsBuilder
    pub fn builder() -> ConstraintsBuilder {
        ConstraintsBuilder::new()
    }

    /// Units per turn.
    pub fn turn_budget(&self) -> u32 {
        self.turn_budget
    }

    /// Maximum number of rounds.
    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// World API costs.
    pub fn costs(&self) -> ApiCosts {
        self.costs
    }
}
