//! The world as seen by a running agent.
//!
//! Every method of [`WorldHandle`] except the free accessors is a metering checkpoint: it charges
//! the turn's [`Meter`] before doing anything, and suspends the agent in place once the budget is
//! overrun. Queries read the shared [`World`] and never mutate it. Actions are validated against
//! the current state and buffered; the controller resolves them after every agent has played.

use std::mem;
use std::panic;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use tracing::{debug, info, trace};

use crate::action::{Action, ActionKind};
use crate::agent::{Posted, Resume, TerminationCause, TurnEnd};
use crate::constraints::ApiCosts;
use crate::error::RuleViolation;
use crate::handoff::Handoff;
use crate::meter::{Charge, Meter};
use crate::rules::{robot_seed, RobotType, INDICATOR_SLOTS, SLOW_MOVE_PENALTY};
use crate::world::{AgentId, CooldownTrack, Direction, Location, Message, Robot, RobotInfo, Team, World};

/// Unwinding payload tearing down an agent thread on self-destruct or forced kill.
///
/// Raised with [`panic::resume_unwind`], so the panic hook stays silent.
pub(crate) struct ContextKilled(pub(crate) TerminationCause);

fn unwind(cause: TerminationCause) -> ! {
    panic::resume_unwind(Box::new(ContextKilled(cause)))
}

/// Debug string attached to a robot for the current turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Indicator {
    /// Slot, below [`INDICATOR_SLOTS`].
    pub index: usize,
    /// Content.
    pub text: String,
}

/// Agent-side access to the world, handed to [`AgentProgram::run`](crate::program::AgentProgram::run).
pub struct WorldHandle {
    id: AgentId,
    team: Team,
    robot_type: RobotType,
    seed: u64,
    world: Arc<RwLock<World>>,
    baton: Arc<Handoff<Resume, Posted>>,
    meter: Meter,
    round: u32,
    costs: ApiCosts,
    queued: Option<Action>,
    indicators: Vec<Indicator>,
    doom: Option<TerminationCause>,
    silenced: bool,
}

impl WorldHandle {
    pub(crate) fn new(
        robot: &RobotInfo,
        world: Arc<RwLock<World>>,
        baton: Arc<Handoff<Resume, Posted>>,
        costs: ApiCosts,
        match_seed: u64,
        silenced: bool,
    ) -> Self {
        Self {
            id: robot.id,
            team: robot.team,
            robot_type: robot.robot_type,
            seed: robot_seed(match_seed, robot.id),
            world,
            baton,
            meter: Meter::new(),
            round: 0,
            costs,
            queued: None,
            indicators: vec![],
            doom: None,
            silenced,
        }
    }

    /// Applies a resume message: either a kill, or the start of a new turn.
    pub(crate) fn begin_turn(&mut self, resume: Resume) {
        if resume.kill {
            self.doom = Some(TerminationCause::Killed);
            unwind(TerminationCause::Killed);
        }
        self.meter.reset(resume.limit);
        self.round = resume.round;
        self.queued = None;
        self.indicators.clear();
    }

    /// Cause to report if the program returns on its own.
    pub(crate) fn pending_doom(&self) -> Option<TerminationCause> {
        self.doom.clone()
    }

    pub(crate) fn used(&self) -> u32 {
        self.meter.used()
    }

    fn honour_termination(&self) {
        if let Some(cause) = &self.doom {
            unwind(cause.clone());
        }
    }

    fn checkpoint(&mut self, units: u32) {
        self.honour_termination();
        if self.meter.charge(units) == Charge::Exhausted {
            self.suspend(TurnEnd::Exhausted);
        }
    }

    fn suspend(&mut self, end: TurnEnd) {
        let posted = Posted {
            end,
            used: self.meter.used(),
            action: self.queued.take(),
            indicators: mem::take(&mut self.indicators),
        };
        let resume = self.baton.pause(posted);
        self.begin_turn(resume);
    }

    fn read(&self) -> RwLockReadGuard<'_, World> {
        // Writers only run between turns and never while a guard is handed out.
        self.world.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn query<T>(&mut self, f: impl FnOnce(&World, &Robot) -> T) -> T {
        self.checkpoint(self.costs.query);
        let world = self.read();
        let Some(me) = world.robot(self.id) else {
            unwind(TerminationCause::Killed)
        };
        f(&world, me)
    }

    fn request(
        &mut self,
        validate: impl FnOnce(&World, &Robot) -> Result<(ActionKind, u32), RuleViolation>,
    ) -> Result<(), RuleViolation> {
        self.checkpoint(self.costs.action);
        let verdict = {
            let world = self.read();
            let Some(me) = world.robot(self.id) else {
                unwind(TerminationCause::Killed)
            };
            if self.queued.is_some() {
                Err(RuleViolation::DoubleAction)
            } else {
                validate(&world, me).and_then(|(kind, duration)| {
                    match kind.tracks().iter().find(|&track| me.cooldown(track) > 0) {
                        Some(track) => Err(RuleViolation::CooldownActive { track }),
                        None => Ok(Action {
                            kind,
                            duration,
                            initiator: self.id,
                        }),
                    }
                })
            }
        };
        match verdict {
            Ok(action) => {
                trace!(id = self.id, action = %action.kind.tag(), "action queued");
                self.queued = Some(action);
                Ok(())
            }
            Err(violation) => {
                debug!(id = self.id, round = self.round, %violation, "rule violation");
                self.checkpoint(self.costs.violation_penalty);
                Err(violation)
            }
        }
    }

    // ----- free -----

    /// Id of this robot (and of its context).
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Team of this robot.
    pub fn team(&self) -> Team {
        self.team
    }

    /// Current round.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Seed of this robot, derived from the match seed and the robot id.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Units spent during this turn.
    pub fn resource_used(&self) -> u32 {
        self.meter.used()
    }

    /// Units left during this turn.
    pub fn resource_left(&self) -> u32 {
        self.meter.remaining()
    }

    /// Type of this robot.
    pub fn robot_type(&self) -> RobotType {
        self.robot_type
    }

    // ----- queries -----

    /// Current location.
    pub fn location(&mut self) -> Location {
        self.query(|_, me| me.location)
    }

    /// Current energon.
    pub fn energon(&mut self) -> i32 {
        self.query(|_, me| me.energon)
    }

    /// Resources of this robot's team.
    pub fn team_resources(&mut self) -> u32 {
        let team = self.team;
        self.query(|world, _| world.resources(team))
    }

    /// `(width, height)` of the map.
    pub fn map_size(&mut self) -> (i32, i32) {
        self.query(|world, _| world.size())
    }

    /// Living robots within sensor range, this one excluded, in id order.
    pub fn sense_nearby_robots(&mut self) -> Vec<RobotInfo> {
        self.query(|world, me| {
            let range = me.robot_type.stats().sensor_range_sq;
            let mut seen = world.robots_near(me.location, range);
            seen.retain(|r| r.id != me.id);
            seen
        })
    }

    /// Robot standing on `location`, if it is within sensor range.
    pub fn robot_at(&mut self, location: Location) -> Option<RobotInfo> {
        self.query(|world, me| {
            if me.location.distance_sq(location) > me.robot_type.stats().sensor_range_sq {
                return None;
            }
            world.robot_at(location).map(Robot::info)
        })
    }

    /// Whether a move in `direction` would currently be accepted.
    pub fn can_move(&mut self, direction: Direction) -> bool {
        self.query(|world, me| {
            let to = me.location.add(direction);
            me.movement_cooldown == 0 && world.on_map(to) && world.occupant(to).is_none()
        })
    }

    /// Messages broadcast by anyone during the previous round, in sending order.
    pub fn read_broadcasts(&mut self) -> Vec<Message> {
        self.query(|world, _| world.broadcasts().to_vec())
    }

    /// Whether the movement cooldown is still counting down.
    pub fn is_movement_active(&mut self) -> bool {
        self.query(|_, me| me.cooldown(CooldownTrack::Movement) > 0)
    }

    /// Whether the attack cooldown is still counting down.
    pub fn is_attack_active(&mut self) -> bool {
        self.query(|_, me| me.cooldown(CooldownTrack::Attack) > 0)
    }

    // ----- actions -----

    /// Queues a step to the adjacent cell in `direction`.
    ///
    /// Keeps the robot busy for its move delay, one round more while slowed.
    pub fn move_to(&mut self, direction: Direction) -> Result<(), RuleViolation> {
        self.request(|world, me| {
            let to = me.location.add(direction);
            if !world.on_map(to) {
                return Err(RuleViolation::OffMap);
            }
            if world.occupant(to).is_some() {
                return Err(RuleViolation::Occupied);
            }
            let mut duration = me.robot_type.stats().move_delay;
            if me.slowed_rounds > 0 {
                duration += SLOW_MOVE_PENALTY;
            }
            Ok((ActionKind::Move { to }, duration))
        })
    }

    /// Queues an attack on the robot standing on `target`.
    pub fn attack(&mut self, target: Location) -> Result<(), RuleViolation> {
        self.request(|world, me| {
            let stats = me.robot_type.stats();
            if !me.robot_type.can_attack() {
                return Err(RuleViolation::NotCapable(me.robot_type.name()));
            }
            if !world.on_map(target) {
                return Err(RuleViolation::OffMap);
            }
            if me.location.distance_sq(target) > stats.attack_range_sq {
                return Err(RuleViolation::OutOfRange);
            }
            if world.robot_at(target).is_none() {
                return Err(RuleViolation::NoTarget);
            }
            Ok((ActionKind::Attack { target }, 1))
        })
    }

    /// Queues the construction of a robot of `robot_type` on the adjacent cell in `direction`.
    ///
    /// Only archons spawn, and archons cannot be built.
    pub fn spawn(&mut self, robot_type: RobotType, direction: Direction) -> Result<(), RuleViolation> {
        self.request(|world, me| {
            if !me.robot_type.stats().can_spawn {
                return Err(RuleViolation::NotCapable(me.robot_type.name()));
            }
            let child = robot_type.stats();
            if child.spawn_cost == 0 {
                return Err(RuleViolation::NotCapable(robot_type.name()));
            }
            let at = me.location.add(direction);
            if !world.on_map(at) {
                return Err(RuleViolation::OffMap);
            }
            if world.occupant(at).is_some() {
                return Err(RuleViolation::Occupied);
            }
            let available = world.resources(me.team);
            if available < child.spawn_cost {
                return Err(RuleViolation::InsufficientResources {
                    needed: child.spawn_cost,
                    available,
                });
            }
            Ok((ActionKind::Spawn { robot_type, at }, child.spawn_delay))
        })
    }

    /// Queues a gift of `amount` energon to the adjacent robot on `to`.
    ///
    /// The giver must keep at least one energon.
    pub fn transfer_energon(&mut self, amount: i32, to: Location) -> Result<(), RuleViolation> {
        self.request(|world, me| {
            if amount <= 0 {
                return Err(RuleViolation::InvalidAmount);
            }
            if !world.on_map(to) {
                return Err(RuleViolation::OffMap);
            }
            if !me.location.is_adjacent(to) {
                return Err(RuleViolation::OutOfRange);
            }
            if world.robot_at(to).is_none() {
                return Err(RuleViolation::NoTarget);
            }
            if me.energon <= amount {
                return Err(RuleViolation::InsufficientEnergon);
            }
            Ok((ActionKind::Transfer { to, amount }, 0))
        })
    }

    /// Queues a message readable by every robot during the next round.
    pub fn broadcast(&mut self, message: impl Into<String>) -> Result<(), RuleViolation> {
        let message = message.into();
        let max = self.costs.max_message_len;
        self.request(move |_, _| {
            if message.len() > max {
                return Err(RuleViolation::MessageTooLong {
                    len: message.len(),
                    max,
                });
            }
            Ok((ActionKind::Broadcast { message }, 0))
        })
    }

    // ----- turn control -----

    /// Reports `units` of work done by the agent itself.
    ///
    /// Suspends the agent until its next turn when the budget is overrun.
    pub fn charge(&mut self, units: u32) {
        self.checkpoint(units);
    }

    /// Ends the turn. Returns at the start of this robot's next turn.
    pub fn end_turn(&mut self) {
        self.honour_termination();
        self.suspend(TurnEnd::Yielded);
    }

    /// Destroys this robot. Takes effect at the next checkpoint; anything queued this turn is
    /// discarded.
    pub fn self_destruct(&mut self) {
        if self.doom.is_none() {
            debug!(id = self.id, round = self.round, "self destruct requested");
            self.doom = Some(TerminationCause::SelfDestructed);
        }
    }

    // ----- debug -----

    /// Sets indicator `index` for this turn. Out-of-range slots are ignored but still charged.
    pub fn set_indicator_string(&mut self, index: usize, text: impl Into<String>) {
        self.checkpoint(self.costs.query);
        if index >= INDICATOR_SLOTS {
            debug!(id = self.id, index, "indicator slot out of range");
            return;
        }
        let text = text.into();
        match self.indicators.iter_mut().find(|i| i.index == index) {
            Some(slot) => slot.text = text,
            None => self.indicators.push(Indicator { index, text }),
        }
    }

    /// Writes a line prefixed with the robot identity, unless the team is silenced.
    ///
    /// Charged like a query, silenced or not.
    pub fn say(&mut self, text: impl AsRef<str>) {
        self.checkpoint(self.costs.query);
        if !self.silenced {
            info!(
                target: "robot",
                "[{}:{}#{}@{}] {}",
                self.team,
                self.robot_type,
                self.id,
                self.round,
                text.as_ref()
            );
        }
    }
}
