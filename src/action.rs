//! Requests queued by agents and resolved centrally at a fixed point of the round.

use std::fmt::Display;

use crate::rules::RobotType;
use crate::world::{AgentId, CooldownTrack, Location};

/// Cooldown tracks statically engaged by an [`ActionKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CooldownTracks {
    /// Engages the attack track.
    pub attack: bool,
    /// Engages the movement track.
    pub movement: bool,
}

impl CooldownTracks {
    /// Engaged tracks, attack first.
    pub fn iter(self) -> impl Iterator<Item = CooldownTrack> {
        [
            (self.attack, CooldownTrack::Attack),
            (self.movement, CooldownTrack::Movement),
        ]
        .into_iter()
        .filter_map(|(on, track)| on.then_some(track))
    }
}

/// The fixed set of things a robot can do in a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionKind {
    /// Step to an adjacent cell.
    Move {
        /// Destination.
        to: Location,
    },
    /// Hit whatever stands on `target`.
    Attack {
        /// Targeted cell.
        target: Location,
    },
    /// Build a new robot on an adjacent cell.
    Spawn {
        /// Type of the child.
        robot_type: RobotType,
        /// Cell of the child.
        at: Location,
    },
    /// Give energon to an adjacent robot.
    Transfer {
        /// Cell of the receiver.
        to: Location,
        /// Energon given.
        amount: i32,
    },
    /// Publish a message readable by everyone next round.
    Broadcast {
        /// Payload.
        message: String,
    },
}

/// Discriminant of [`ActionKind`], used in events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionTag {
    #[allow(missing_docs)]
    Move,
    #[allow(missing_docs)]
    Attack,
    #[allow(missing_docs)]
    Spawn,
    #[allow(missing_docs)]
    Transfer,
    #[allow(missing_docs)]
    Broadcast,
}

impl Display for ActionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionTag::Move => "move",
            ActionTag::Attack => "attack",
            ActionTag::Spawn => "spawn",
            ActionTag::Transfer => "transfer",
            ActionTag::Broadcast => "broadcast",
        };
        f.write_str(s)
    }
}

impl ActionKind {
    /// Tracks engaged by this kind.
    pub fn tracks(&self) -> CooldownTracks {
        match self {
            ActionKind::Move { .. } => CooldownTracks {
                attack: false,
                movement: true,
            },
            ActionKind::Attack { .. } => CooldownTracks {
                attack: true,
                movement: false,
            },
            ActionKind::Spawn { .. } => CooldownTracks {
                attack: true,
                movement: true,
            },
            ActionKind::Transfer { .. } | ActionKind::Broadcast { .. } => CooldownTracks {
                attack: false,
                movement: false,
            },
        }
    }

    /// Discriminant.
    pub fn tag(&self) -> ActionTag {
        match self {
            ActionKind::Move { .. } => ActionTag::Move,
            ActionKind::Attack { .. } => ActionTag::Attack,
            ActionKind::Spawn { .. } => ActionTag::Spawn,
            ActionKind::Transfer { .. } => ActionTag::Transfer,
            ActionKind::Broadcast { .. } => ActionTag::Broadcast,
        }
    }
}

/// An accepted request, waiting for resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    /// What to do.
    pub kind: ActionKind,
    /// Rounds the initiator stays busy once the action resolves.
    pub duration: u32,
    /// Robot that queued the action.
    pub initiator: AgentId,
}

impl Action {
    /// Cooldown applied to `track` on success: the longer of the action duration and the
    /// type's own delay for that track.
    pub fn cooldown_for(&self, track: CooldownTrack, robot_type: RobotType) -> u32 {
        let stats = robot_type.stats();
        let delay = match track {
            CooldownTrack::Attack => stats.attack_delay,
            CooldownTrack::Movement => stats.move_delay,
        };
        self.duration.max(delay)
    }
}
