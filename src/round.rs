//! Drives one discrete round end-to-end.
//!
//! A round goes through five steps:
//!
//! 1. Beginning-of-round bookkeeping: cooldowns and slow effects tick down, robots regenerate
//!    energon, archons produce team resources.
//! 2. Every live, idle context takes a turn, in registry order. Busy robots (still carrying out a
//!    multi-round action) are skipped.
//! 3. Queued actions are resolved by kind, then by registry order: moves, spawns, attacks,
//!    transfers, broadcasts.
//! 4. End-of-round bookkeeping: yield bonuses, action expiry, broadcast rotation, deferred deaths,
//!    deferred spawns, registry commit.
//! 5. The round's events are flushed to the [`EventLog`].
//!
//! Contexts spawned during round `n` take their first turn in round `n + 1`.

use std::fmt::Display;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::bail;
use tracing::{debug, info, instrument, trace, warn};

use crate::action::{Action, ActionKind, ActionTag};
use crate::agent::{panic_message, AgentContext, ContextOptions, TerminationCause, TurnBudget, TurnOutcome};
use crate::configuration::Configuration;
use crate::constraints::Constraints;
use crate::error::EngineError;
use crate::event::{DeathCause, Event, EventLog};
use crate::handle::WorldHandle;
use crate::program::{AgentProgram, PlayerFactory};
use crate::rules::{RobotType, ARCHON_PRODUCTION, SLOW_ROUNDS};
use crate::scheduler::Scheduler;
use crate::world::{AgentId, CooldownTrack, GameMap, Location, Message, Robot, RobotInfo, Team, World};

/// Why a team won.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WinReason {
    /// The other team has no robot left.
    Elimination,
    /// Round limit reached; more robots alive.
    RobotCount,
    /// Round limit reached, same robot count; more energon in total.
    Energon,
    /// Round limit reached, same robots and energon; more resources.
    Resources,
}

/// Final result of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// One team won.
    Winner {
        /// Winning team.
        team: Team,
        /// Deciding criterion.
        reason: WinReason,
    },
    /// Nothing separated the teams.
    Draw,
}

impl Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchOutcome::Winner { team, reason } => write!(f, "team {team} wins ({reason:?})"),
            MatchOutcome::Draw => f.write_str("draw"),
        }
    }
}

/// State after a call to [`RoundController::run_round`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundState {
    /// More rounds to play.
    Running,
    /// The match is over; further calls do nothing.
    Finished(MatchOutcome),
}

/// A context that stopped during its turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Termination {
    /// Round of the last turn.
    pub round: u32,
    /// Context (and robot) id.
    pub id: AgentId,
    /// Team of the robot.
    pub team: Team,
    /// Why.
    pub cause: TerminationCause,
}

struct PendingSpawn {
    parent: AgentId,
    team: Team,
    robot_type: RobotType,
    at: Location,
}

/// Round-scoped scratch state.
#[derive(Default)]
struct RoundWork {
    actions: Vec<Action>,
    yielded: Vec<(AgentId, u32)>,
    dying: Vec<(AgentId, DeathCause)>,
    spawns: Vec<PendingSpawn>,
    broadcasts: Vec<Message>,
}

/// Owns the world, the scheduler and the event sink of one match.
pub struct RoundController<L: EventLog> {
    world: Arc<RwLock<World>>,
    scheduler: Scheduler,
    factories: [Box<dyn PlayerFactory>; 2],
    constraints: Constraints,
    config: Configuration,
    match_seed: u64,
    contested: bool,
    log: L,
    round: u32,
    outcome: Option<MatchOutcome>,
    terminations: Vec<Termination>,
}

impl<L: EventLog> RoundController<L> {
    /// Builds the world from `map` and starts one context per initial robot, in map order.
    ///
    /// The seed of `config`, when set, replaces the seed of the map.
    pub fn new(
        map: &GameMap,
        team_a: Box<dyn PlayerFactory>,
        team_b: Box<dyn PlayerFactory>,
        config: Configuration,
        constraints: Constraints,
        log: L,
    ) -> Result<Self, EngineError> {
        let mut map = map.clone();
        if let Some(seed) = config.seed {
            map.seed = seed;
        }
        let world = World::new(&map);
        let robots: Vec<RobotInfo> = world.robots().map(Robot::info).collect();
        let contested = Team::ALL.iter().all(|&team| world.robot_count(team) > 0);

        let mut controller = RoundController {
            world: Arc::new(RwLock::new(world)),
            scheduler: Scheduler::new(),
            factories: [team_a, team_b],
            constraints,
            config,
            match_seed: map.seed,
            contested,
            log,
            round: 0,
            outcome: None,
            terminations: vec![],
        };
        for robot in &robots {
            let context = controller.create_context(robot)?;
            controller.scheduler.register_immediate(context)?;
        }
        info!(robots = robots.len(), seed = map.seed, "match ready");
        Ok(controller)
    }

    fn create_context(&self, robot: &RobotInfo) -> Result<AgentContext, EngineError> {
        let factory = &self.factories[robot.team.index()];
        let program: Box<dyn AgentProgram> =
            match panic::catch_unwind(AssertUnwindSafe(|| factory.create_player(robot))) {
                Ok(program) => program,
                Err(payload) => {
                    let message = panic_message(&*payload);
                    warn!(id = robot.id, %message, "player factory panicked");
                    Box::new(move |_: &mut WorldHandle| -> anyhow::Result<()> {
                        bail!("player factory panicked: {message}")
                    })
                }
            };
        let mut context = AgentContext::spawn(
            robot,
            program,
            self.world.clone(),
            ContextOptions {
                costs: self.constraints.costs,
                stack_size: self.constraints.stack_size,
                seed: self.match_seed,
                silenced: self.config.is_silenced(robot.team),
            },
        )?;
        context.init()?;
        Ok(context)
    }

    fn read(&self) -> RwLockReadGuard<'_, World> {
        self.world.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, World>, EngineError> {
        self.world.write().map_err(|_| EngineError::WorldPoisoned)
    }

    /// Plays one round. Once the match is over, returns its outcome without playing.
    #[instrument(skip_all, fields(round = self.round + 1))]
    pub fn run_round(&mut self) -> Result<RoundState, EngineError> {
        if let Some(outcome) = self.outcome {
            return Ok(RoundState::Finished(outcome));
        }
        self.round += 1;
        let round = self.round;
        let mut events = vec![];
        let mut work = RoundWork::default();

        self.begin_round(round, &mut events)?;
        let order = self.scheduler.begin_traversal(round)?;
        let turns = self.take_turns(round, &order, &mut work, &mut events);
        self.scheduler.end_traversal();
        turns?;
        self.resolve(&mut work, &mut events)?;
        self.end_round(work, &mut events)?;

        self.log
            .record_round(round, &events)
            .map_err(|e| EngineError::EventLog {
                round,
                message: format!("{e:#}"),
            })?;
        trace!(events = events.len(), "round flushed");

        self.outcome = self.check_end(round);
        Ok(match self.outcome {
            Some(outcome) => {
                info!(%outcome, round, "match over");
                RoundState::Finished(outcome)
            }
            None => RoundState::Running,
        })
    }

    fn begin_round(&self, round: u32, events: &mut Vec<Event>) -> Result<(), EngineError> {
        let mut world = self.write()?;
        world.set_round(round);
        for robot in world.robots_mut().filter(|r| r.alive) {
            robot.attack_cooldown = robot.attack_cooldown.saturating_sub(1);
            robot.movement_cooldown = robot.movement_cooldown.saturating_sub(1);
            robot.slowed_rounds = robot.slowed_rounds.saturating_sub(1);
            let stats = robot.robot_type.stats();
            if stats.regen > 0 && robot.energon < stats.max_energon {
                robot.energon = (robot.energon + stats.regen).min(stats.max_energon);
                events.push(Event::EnergonChanged {
                    id: robot.id,
                    energon: robot.energon,
                });
            }
        }
        for team in Team::ALL {
            let archons = world
                .robots()
                .filter(|r| r.alive && r.team == team && r.robot_type == RobotType::Archon)
                .count() as u32;
            if archons > 0 {
                let resources = world.resources(team) + archons * ARCHON_PRODUCTION;
                world.set_resources(team, resources);
                events.push(Event::ResourcesChanged { team, resources });
            }
        }
        Ok(())
    }

    fn take_turns(
        &mut self,
        round: u32,
        order: &[AgentId],
        work: &mut RoundWork,
        events: &mut Vec<Event>,
    ) -> Result<(), EngineError> {
        let budget = TurnBudget {
            limit: self.constraints.turn_budget,
            round,
        };
        for &id in order {
            let (team, busy) = {
                let world = self.read();
                let robot = world
                    .robot(id)
                    .ok_or_else(|| EngineError::Corrupted(format!("context {id} has no robot")))?;
                (robot.team, robot.busy_rounds > 0)
            };
            if busy {
                trace!(id, "busy, turn skipped");
                continue;
            }

            let report = self.scheduler.run_turn(id, budget)?;
            events.push(Event::ResourceUsed {
                id,
                used: report.used,
            });
            for indicator in report.indicators {
                events.push(Event::Indicator {
                    id,
                    index: indicator.index,
                    text: indicator.text,
                });
            }
            match report.outcome {
                TurnOutcome::Yielded => work.yielded.push((id, report.used)),
                TurnOutcome::Exhausted => trace!(id, "turn cut by the meter"),
                TurnOutcome::Terminated(cause) => {
                    debug!(id, %cause, "context terminated during its turn");
                    self.terminations.push(Termination {
                        round,
                        id,
                        team,
                        cause: cause.clone(),
                    });
                    work.dying.push((id, DeathCause::Terminated(cause)));
                }
            }
            work.actions.extend(report.action);
        }
        Ok(())
    }

    fn resolve(&self, work: &mut RoundWork, events: &mut Vec<Event>) -> Result<(), EngineError> {
        const PHASES: [ActionTag; 5] = [
            ActionTag::Move,
            ActionTag::Spawn,
            ActionTag::Attack,
            ActionTag::Transfer,
            ActionTag::Broadcast,
        ];

        let mut world = self.write()?;
        let actions = mem::take(&mut work.actions);
        for phase in PHASES {
            for action in actions.iter().filter(|a| a.kind.tag() == phase) {
                match resolve_action(&mut world, action, work, events) {
                    Ok(()) => engage(&mut world, action),
                    Err(reason) => {
                        debug!(id = action.initiator, %phase, reason, "action failed");
                        events.push(Event::ActionFailed {
                            id: action.initiator,
                            action: phase,
                            reason,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn end_round(&mut self, mut work: RoundWork, events: &mut Vec<Event>) -> Result<(), EngineError> {
        let mut removed = vec![];
        {
            let mut world = self.write()?;
            let limit = self.constraints.turn_budget;
            for &(id, used) in &work.yielded {
                let Some(robot) = world.robot_mut(id).filter(|r| r.alive) else {
                    continue;
                };
                let max = robot.robot_type.stats().max_energon;
                let bonus = self
                    .constraints
                    .yield_refund
                    .bonus(max, limit.saturating_sub(used), limit)
                    .min(max - robot.energon);
                if bonus > 0 {
                    robot.energon += bonus;
                    events.push(Event::YieldBonus { id, bonus });
                }
            }

            for robot in world.robots_mut() {
                robot.busy_rounds = robot.busy_rounds.saturating_sub(1);
            }

            world.replace_broadcasts(mem::take(&mut work.broadcasts));

            for (id, cause) in work.dying {
                if let Some(robot) = world.remove_robot(id) {
                    events.push(Event::Died {
                        id,
                        team: robot.team,
                        cause,
                    });
                    removed.push(id);
                }
            }
        }

        for id in removed {
            self.scheduler.terminate(id)?;
            self.scheduler.unregister(id)?;
        }

        for spawn in work.spawns {
            let robot = {
                let mut world = self.write()?;
                let id = world.insert_robot(spawn.team, spawn.robot_type, spawn.at);
                world
                    .robot(id)
                    .map(Robot::info)
                    .ok_or_else(|| EngineError::Corrupted(format!("spawned robot {id} vanished")))?
            };
            events.push(Event::Spawned {
                parent: spawn.parent,
                id: robot.id,
                team: robot.team,
                robot_type: robot.robot_type,
                at: robot.location,
            });
            let context = self.create_context(&robot)?;
            self.scheduler.register(context)?;
        }

        self.scheduler.commit()
    }

    fn check_end(&self, round: u32) -> Option<MatchOutcome> {
        let world = self.read();
        let alive = Team::ALL.map(|team| world.robot_count(team));
        if self.contested {
            match alive {
                [0, 0] => return Some(tie_break(&world)),
                [0, _] => {
                    return Some(MatchOutcome::Winner {
                        team: Team::B,
                        reason: WinReason::Elimination,
                    })
                }
                [_, 0] => {
                    return Some(MatchOutcome::Winner {
                        team: Team::A,
                        reason: WinReason::Elimination,
                    })
                }
                _ => {}
            }
        }
        (round >= self.constraints.max_rounds).then(|| tie_break(&world))
    }

    /// Number of the last round played.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Outcome, once the match is over.
    pub fn outcome(&self) -> Option<MatchOutcome> {
        self.outcome
    }

    /// Read access to the world, between rounds.
    pub fn world(&self) -> RwLockReadGuard<'_, World> {
        self.read()
    }

    /// The scheduler, for inspection.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Contexts that terminated during their turn, in order.
    pub fn terminations(&self) -> &[Termination] {
        &self.terminations
    }

    /// The event sink.
    pub fn event_log(&self) -> &L {
        &self.log
    }

    /// Terminates every context. Also done on drop.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }
}

impl<L: EventLog> Drop for RoundController<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn tie_break(world: &World) -> MatchOutcome {
    let [a, b] = Team::ALL;
    let criteria = [
        (
            (world.robot_count(a) as i64).cmp(&(world.robot_count(b) as i64)),
            WinReason::RobotCount,
        ),
        (
            world.total_energon(a).cmp(&world.total_energon(b)),
            WinReason::Energon,
        ),
        (
            world.resources(a).cmp(&world.resources(b)),
            WinReason::Resources,
        ),
    ];
    for (ordering, reason) in criteria {
        match ordering {
            std::cmp::Ordering::Greater => return MatchOutcome::Winner { team: a, reason },
            std::cmp::Ordering::Less => return MatchOutcome::Winner { team: b, reason },
            std::cmp::Ordering::Equal => {}
        }
    }
    MatchOutcome::Draw
}

fn living(world: &World, id: AgentId) -> Result<&Robot, &'static str> {
    world
        .robot(id)
        .filter(|r| r.alive)
        .ok_or("initiator destroyed")
}

/// Applies one accepted action, or names the precondition that no longer holds.
fn resolve_action(
    world: &mut World,
    action: &Action,
    work: &mut RoundWork,
    events: &mut Vec<Event>,
) -> Result<(), &'static str> {
    let id = action.initiator;
    let me = living(world, id)?;
    let (team, robot_type, here, energon) = (me.team, me.robot_type, me.location, me.energon);

    match &action.kind {
        ActionKind::Move { to } => {
            let to = *to;
            if !world.on_map(to) {
                return Err("off map");
            }
            if world.occupant(to).is_some() {
                return Err("cell occupied");
            }
            if let Some(robot) = world.robot_mut(id) {
                robot.location = to;
            }
            events.push(Event::Moved { id, from: here, to });
        }
        ActionKind::Spawn { robot_type, at } => {
            let at = *at;
            if world.occupant(at).is_some() || work.spawns.iter().any(|s| s.at == at) {
                return Err("cell occupied");
            }
            let cost = robot_type.stats().spawn_cost;
            let available = world.resources(team);
            if available < cost {
                return Err("insufficient resources");
            }
            world.set_resources(team, available - cost);
            events.push(Event::ResourcesChanged {
                team,
                resources: available - cost,
            });
            work.spawns.push(PendingSpawn {
                parent: id,
                team,
                robot_type: *robot_type,
                at,
            });
        }
        ActionKind::Attack { target } => {
            let stats = robot_type.stats();
            if here.distance_sq(*target) > stats.attack_range_sq {
                return Err("out of range");
            }
            let victim_id = world.robot_at(*target).map(|r| r.id).ok_or("no target")?;
            let Some(victim) = world.robot_mut(victim_id) else {
                return Err("no target");
            };
            victim.energon -= stats.attack_power;
            events.push(Event::Attacked {
                attacker: id,
                target: victim_id,
                damage: stats.attack_power,
                energon: victim.energon,
            });
            if robot_type == RobotType::Soldier {
                victim.slowed_rounds = SLOW_ROUNDS;
                events.push(Event::Slowed {
                    id: victim_id,
                    rounds: SLOW_ROUNDS,
                });
            }
            if victim.energon <= 0 {
                victim.alive = false;
                work.dying.push((victim_id, DeathCause::Destroyed { by: id }));
            }
        }
        ActionKind::Transfer { to, amount } => {
            if energon <= *amount {
                return Err("insufficient energon");
            }
            let receiver = world.robot_at(*to).ok_or("no target")?;
            let receiver_id = receiver.id;
            let room = receiver.robot_type.stats().max_energon - receiver.energon;
            let moved = (*amount).min(room.max(0));
            if let Some(receiver) = world.robot_mut(receiver_id) {
                receiver.energon += moved;
            }
            if let Some(giver) = world.robot_mut(id) {
                giver.energon -= moved;
            }
            events.push(Event::Transferred {
                from: id,
                to: receiver_id,
                amount: moved,
            });
        }
        ActionKind::Broadcast { message } => {
            work.broadcasts.push(Message {
                sender: id,
                team,
                text: message.clone(),
            });
            events.push(Event::Broadcast {
                sender: id,
                text: message.clone(),
            });
        }
    }
    Ok(())
}

/// Sets the cooldowns of the tracks engaged by a resolved action, and the busy time.
fn engage(world: &mut World, action: &Action) {
    let Some(robot) = world.robot_mut(action.initiator) else {
        return;
    };
    for track in action.kind.tracks().iter() {
        let cooldown = action.cooldown_for(track, robot.robot_type);
        match track {
            CooldownTrack::Attack => robot.attack_cooldown = cooldown,
            CooldownTrack::Movement => robot.movement_cooldown = cooldown,
        }
    }
    robot.busy_rounds = action.duration;
}
