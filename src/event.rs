//! Immutable records of committed world mutations, and the sinks receiving them.
//!
//! Every [`Event`] has a stable one-line [`Display`] (tab-separated fields, tag first), so two
//! runs can be compared byte for byte through a [`WriterLog`].

use std::fmt::Display;
use std::io::Write;

use anyhow::Context;

use crate::action::ActionTag;
use crate::agent::TerminationCause;
use crate::rules::RobotType;
use crate::world::{AgentId, Location, Team};

/// Why a robot left the match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeathCause {
    /// Energon dropped to zero after an attack by `by`.
    Destroyed {
        /// Last attacker.
        by: AgentId,
    },
    /// Its context terminated.
    Terminated(TerminationCause),
}

impl Display for DeathCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeathCause::Destroyed { by } => write!(f, "destroyed by {by}"),
            DeathCause::Terminated(cause) => write!(f, "{cause}"),
        }
    }
}

/// One committed world mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A robot changed cell.
    Moved {
        /// Robot.
        id: AgentId,
        /// Previous cell.
        from: Location,
        /// New cell.
        to: Location,
    },
    /// A robot hit another one.
    Attacked {
        /// Attacker.
        attacker: AgentId,
        /// Victim.
        target: AgentId,
        /// Energon removed.
        damage: i32,
        /// Energon left to the victim.
        energon: i32,
    },
    /// A robot got slowed.
    Slowed {
        /// Victim.
        id: AgentId,
        /// Rounds of slow effect.
        rounds: u32,
    },
    /// A robot was removed from the world.
    Died {
        /// Robot.
        id: AgentId,
        /// Its team.
        team: Team,
        /// Why.
        cause: DeathCause,
    },
    /// A robot was placed by its parent.
    Spawned {
        /// Parent robot.
        parent: AgentId,
        /// New robot.
        id: AgentId,
        /// Team of both.
        team: Team,
        /// Type of the new robot.
        robot_type: RobotType,
        /// Cell of the new robot.
        at: Location,
    },
    /// Energon regenerated at the start of a round.
    EnergonChanged {
        /// Robot.
        id: AgentId,
        /// New value.
        energon: i32,
    },
    /// Team resources changed.
    ResourcesChanged {
        /// Team.
        team: Team,
        /// New value.
        resources: u32,
    },
    /// A message was published for the next round.
    Broadcast {
        /// Sender.
        sender: AgentId,
        /// Payload.
        text: String,
    },
    /// Energon changed hands.
    Transferred {
        /// Giver.
        from: AgentId,
        /// Receiver.
        to: AgentId,
        /// Energon moved.
        amount: i32,
    },
    /// An accepted action no longer held at resolution time.
    ActionFailed {
        /// Initiator.
        id: AgentId,
        /// Kind of the action.
        action: ActionTag,
        /// Broken precondition.
        reason: &'static str,
    },
    /// Energon granted for ending a turn early.
    YieldBonus {
        /// Robot.
        id: AgentId,
        /// Energon granted.
        bonus: i32,
    },
    /// Metered units spent by a turn.
    ResourceUsed {
        /// Robot.
        id: AgentId,
        /// Units.
        used: u32,
    },
    /// Debug string of a turn.
    Indicator {
        /// Robot.
        id: AgentId,
        /// Slot.
        index: usize,
        /// Content.
        text: String,
    },
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Moved { id, from, to } => write!(f, "moved\t{id}\t{from}\t{to}"),
            Event::Attacked {
                attacker,
                target,
                damage,
                energon,
            } => write!(f, "attacked\t{attacker}\t{target}\t{damage}\t{energon}"),
            Event::Slowed { id, rounds } => write!(f, "slowed\t{id}\t{rounds}"),
            Event::Died { id, team, cause } => write!(f, "died\t{id}\t{team}\t{cause}"),
            Event::Spawned {
                parent,
                id,
                team,
                robot_type,
                at,
            } => write!(f, "spawned\t{parent}\t{id}\t{team}\t{robot_type}\t{at}"),
            Event::EnergonChanged { id, energon } => write!(f, "energon\t{id}\t{energon}"),
            Event::ResourcesChanged { team, resources } => {
                write!(f, "resources\t{team}\t{resources}")
            }
            Event::Broadcast { sender, text } => write!(f, "broadcast\t{sender}\t{text:?}"),
            Event::Transferred { from, to, amount } => {
                write!(f, "transferred\t{from}\t{to}\t{amount}")
            }
            Event::ActionFailed { id, action, reason } => {
                write!(f, "failed\t{id}\t{action}\t{reason}")
            }
            Event::YieldBonus { id, bonus } => write!(f, "yield_bonus\t{id}\t{bonus}"),
            Event::ResourceUsed { id, used } => write!(f, "used\t{id}\t{used}"),
            Event::Indicator { id, index, text } => write!(f, "indicator\t{id}\t{index}\t{text:?}"),
        }
    }
}

/// Ordered sink of the events of each round.
pub trait EventLog {
    /// Receives the events of `round`, in commit order. Rounds arrive in increasing order.
    ///
    /// # Error
    /// Any error stops the match.
    fn record_round(&mut self, round: u32, events: &[Event]) -> anyhow::Result<()>;
}

/// Events of one round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundRecord {
    /// Round number.
    pub round: u32,
    /// Events, in commit order.
    pub events: Vec<Event>,
}

/// Keeps every round in memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryLog {
    rounds: Vec<RoundRecord>,
}

impl MemoryLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded rounds.
    pub fn rounds(&self) -> &[RoundRecord] {
        &self.rounds
    }

    /// All events, with their round, in order.
    pub fn events(&self) -> impl Iterator<Item = (u32, &Event)> {
        self.rounds
            .iter()
            .flat_map(|r| r.events.iter().map(move |e| (r.round, e)))
    }
}

impl EventLog for MemoryLog {
    fn record_round(&mut self, round: u32, events: &[Event]) -> anyhow::Result<()> {
        self.rounds.push(RoundRecord {
            round,
            events: events.to_vec(),
        });
        Ok(())
    }
}

/// Writes one `round<TAB>event` line per event.
#[derive(Debug)]
pub struct WriterLog<W: Write> {
    writer: W,
}

impl<W: Write> WriterLog<W> {
    /// Wraps `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Gives the writer back.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventLog for WriterLog<W> {
    fn record_round(&mut self, round: u32, events: &[Event]) -> anyhow::Result<()> {
        for event in events {
            writeln!(self.writer, "{round}\t{event}")
                .with_context(|| format!("writing events of round {round}"))?;
        }
        self.writer.flush().context("flushing event log")
    }
}

impl<L: EventLog + ?Sized> EventLog for &mut L {
    fn record_round(&mut self, round: u32, events: &[Event]) -> anyhow::Result<()> {
        (**self).record_round(round, events)
    }
}
