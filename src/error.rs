//! Error taxonomy of the engine.
//!
//! Two families of errors exist:
//!
//! - [`RuleViolation`]: an individually well-formed action that is invalid in the current
//!   state. Handed back to the offending agent as a typed rejection; nothing is mutated and the
//!   agent may keep acting for the rest of its turn.
//! - [`EngineError`]: a fault originating outside agent code (controller bug, broken rendezvous,
//!   corrupted world state). Surfaced to the host; it aborts the match.
//!
//! Quota exhaustion is never surfaced as an error, and faults raised by agent code are converted
//! to a [`TerminationCause`](crate::agent::TerminationCause) at the context boundary.

use thiserror::Error;

use crate::world::{AgentId, CooldownTrack};

/// Rejection returned by the action-queuing operations of [`WorldHandle`](crate::handle::WorldHandle).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    /// An action was already queued during this turn.
    #[error("an action has already been queued this round")]
    DoubleAction,

    /// The action engages a cooldown track that is still counting down.
    #[error("{track} cooldown is still active")]
    CooldownActive {
        /// The colliding track.
        track: CooldownTrack,
    },

    /// The target location lies outside the map.
    #[error("location is off the map")]
    OffMap,

    /// The target is further away than the robot can reach.
    #[error("target is out of range")]
    OutOfRange,

    /// The target location is already occupied.
    #[error("location is occupied")]
    Occupied,

    /// There is no robot at the target location.
    #[error("no robot at target location")]
    NoTarget,

    /// The robot type cannot perform this kind of action.
    #[error("a {0} cannot do that")]
    NotCapable(&'static str),

    /// The team cannot afford the action.
    #[error("not enough resources: needed {needed}, available {available}")]
    InsufficientResources {
        /// Cost of the action.
        needed: u32,
        /// Team resources at validation time.
        available: u32,
    },

    /// The robot does not hold enough energon.
    #[error("not enough energon")]
    InsufficientEnergon,

    /// A broadcast message exceeds the configured length.
    #[error("message too long ({len} > {max} bytes)")]
    MessageTooLong {
        /// Message length in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A quantity argument is zero or otherwise meaningless.
    #[error("invalid amount")]
    InvalidAmount,
}

/// Fatal engine fault. Never caused by agent code; stops the match.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A context with this id is already registered (or pending registration).
    #[error("context {0} is already registered")]
    AlreadyRegistered(AgentId),

    /// No context with this id is known to the scheduler.
    #[error("unknown context {0}")]
    UnknownContext(AgentId),

    /// `step` was called on a terminated context.
    #[error("step called on terminated context {0}")]
    SteppedTerminated(AgentId),

    /// A turn was requested while another context is running.
    #[error("context {requested} cannot run while context {running} is running")]
    Busy {
        /// The context currently holding the execution slot.
        running: AgentId,
        /// The context whose turn was requested.
        requested: AgentId,
    },

    /// The registry cannot change while a traversal is in progress.
    #[error("registry changed during a traversal")]
    TraversalInProgress,

    /// The context was stepped before `init`.
    #[error("context {0} was not initialised")]
    NotInitialised(AgentId),

    /// The agent thread could not be created.
    #[error("could not spawn thread for context {id}: {source}")]
    Spawn {
        /// Context id.
        id: AgentId,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The agent thread left the rendezvous unexpectedly.
    #[error("rendezvous with context {0} broken")]
    Rendezvous(AgentId),

    /// The world lock was poisoned by a panic on the controller side.
    #[error("world state poisoned")]
    WorldPoisoned,

    /// The event log refused the events of a round.
    #[error("event log failed on round {round}: {message}")]
    EventLog {
        /// Round being flushed.
        round: u32,
        /// Rendered error chain.
        message: String,
    },

    /// World bookkeeping found an inconsistency.
    #[error("corrupted world state: {0}")]
    Corrupted(String),
}
