//! # Robot Arena
//!
//! A deterministic, resource-metered turn scheduler for untrusted game-playing agents.
//!
//! It provides:
//! - Isolated agent execution, one resumable context per robot ([`AgentContext`](crate::agent::AgentContext))
//! - Strict turn order with exactly one agent computing at a time ([`Scheduler`](crate::scheduler::Scheduler))
//! - Per-turn work budgets enforced at metering checkpoints ([`Meter`](crate::meter::Meter))
//! - A round lifecycle resolving queued actions in a fixed order ([`RoundController`](crate::round::RoundController))
//! - Ordered, byte-stable event traces ([`EventLog`](crate::event::EventLog))
//!
//! Each robot runs its [`AgentProgram`](crate::program::AgentProgram) on its own OS thread, but
//! the threads hand a baton to each other through the controller, so the simulation is logically
//! single-threaded. A panic, an error or an endless stream of work in one agent never disturbs
//! the others: faults terminate exactly one context, and overruns cut the turn at the next
//! checkpoint.
//!
//! # Documentation Overview
//!
//! - For details about the round lifecycle and the resolution order, see the [`round`] module.
//! - For the agent-side API (queries, actions, turn control), see
//!   [`WorldHandle`](crate::handle::WorldHandle).
//! - For configuring the host and the limits, see [`Configuration`](crate::configuration::Configuration)
//!   and [`constraints`].
//! - For the rule table, see [`rules`].
//!
//! Agents are expected to check in often: every [`WorldHandle`](crate::handle::WorldHandle) call
//! is a checkpoint, and long computations should report their own cost with
//! [`WorldHandle::charge`](crate::handle::WorldHandle::charge). Code running for a long time
//! without any checkpoint cannot be interrupted.
//!
//! # Usage Example
//!
//! ```no_run
//! use robot_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let constraints = ConstraintsBuilder::new()
//!         .with_turn_budget(6_000)
//!         .with_max_rounds(200)
//!         .build()?;
//!     let config = Configuration::new().with_verbose(true);
//!
//!     let map = GameMap::builder(10, 10)
//!         .with_seed(42)
//!         .with_initial_resources(40)
//!         .with_robot(Team::A, RobotType::Archon, 1, 1)
//!         .with_robot(Team::B, RobotType::Archon, 8, 8)
//!         .build()?;
//!
//!     // Every robot of team A walks east, then idles.
//!     let walkers = |_: &RobotInfo| -> Box<dyn AgentProgram> {
//!         Box::new(|world: &mut WorldHandle| -> anyhow::Result<()> {
//!             loop {
//!                 if world.can_move(Direction::East) {
//!                     world.move_to(Direction::East)?;
//!                 }
//!                 world.end_turn();
//!             }
//!         })
//!     };
//!     let idlers = |_: &RobotInfo| -> Box<dyn AgentProgram> {
//!         Box::new(|world: &mut WorldHandle| -> anyhow::Result<()> {
//!             loop {
//!                 world.end_turn();
//!             }
//!         })
//!     };
//!
//!     let mut log = MemoryLog::new();
//!     let arena = Arena::new(config, constraints)?;
//!     let summary = arena.play(&map, Box::new(walkers), Box::new(idlers), &mut log)?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

pub use anyhow;

pub mod action;
pub mod agent;
pub mod arena;
pub mod configuration;
pub mod constraints;
pub mod error;
pub mod event;
pub mod handle;
mod handoff;
mod logger;
pub mod meter;
pub mod program;
pub mod round;
pub mod rules;
pub mod scheduler;
pub mod world;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use robot_arena::prelude::*;
/// ```
///
/// Includes:
/// - [`Arena`](crate::arena::Arena) and [`RoundController`](crate::round::RoundController)
/// - [`Configuration`](crate::configuration::Configuration) and
///   [`ConstraintsBuilder`](crate::constraints::ConstraintsBuilder)
/// - the agent-facing API: [`AgentProgram`](crate::program::AgentProgram),
///   [`PlayerFactory`](crate::program::PlayerFactory), [`WorldHandle`](crate::handle::WorldHandle)
/// - world types and event logs
pub mod prelude {
    pub use crate::arena::{Arena, MatchSummary};
    pub use crate::configuration::Configuration;
    pub use crate::constraints::{ConstraintsBuilder, YieldRefund};
    pub use crate::error::{EngineError, RuleViolation};
    pub use crate::event::{Event, EventLog, MemoryLog, WriterLog};
    pub use crate::handle::WorldHandle;
    pub use crate::program::{AgentProgram, PlayerFactory};
    pub use crate::round::{MatchOutcome, RoundController, RoundState};
    pub use crate::rules::RobotType;
    pub use crate::world::{Direction, GameMap, Location, RobotInfo, Team};
}
