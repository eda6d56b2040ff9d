use std::sync::{Arc, Mutex, OnceLock};

use robot_arena::agent::TerminationCause;
use robot_arena::event::DeathCause;
use robot_arena::round::{Termination, WinReason};
use robot_arena::scheduler::StatusBoard;
use robot_arena::prelude::*;
use time::format_description;
use tracing::{Level, Metadata};
use tracing_subscriber::{
    fmt,
    layer::{Context, Filter, SubscriberExt},
    FmtSubscriber, Layer, Registry,
};

use crate::players::{events, idle, skirmish_map, turn_order, turns_of, wanderer};

mod players;

struct CustomLevelFilter;
impl<S> Filter<S> for CustomLevelFilter {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        meta.level() == &Level::DEBUG
    }
}

fn init_as_file_logger() {
    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]").unwrap(),
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .with_timer(timer)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[allow(dead_code)]
fn init_debug_logger() {
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(false);

    let reg = Registry::default().with(
        fmt::layer()
            .event_format(format)
            .with_filter(CustomLevelFilter),
    );

    let _ = tracing::subscriber::set_global_default(reg);
}

fn quiet() -> Configuration {
    Configuration::new().with_verbose(false)
}

fn controller(
    map: &GameMap,
    team_a: Box<dyn PlayerFactory>,
    team_b: Box<dyn PlayerFactory>,
    constraints: ConstraintsBuilder,
) -> RoundController<MemoryLog> {
    RoundController::new(
        map,
        team_a,
        team_b,
        quiet(),
        constraints.build().unwrap(),
        MemoryLog::new(),
    )
    .unwrap()
}

#[test]
fn launch_skirmish() {
    let verbose_mode = false;

    if !verbose_mode {
        init_as_file_logger();
    }

    let constraints = ConstraintsBuilder::new()
        .with_max_rounds(80)
        .with_yield_refund(YieldRefund::Proportional { percent: 5 })
        .build()
        .unwrap();
    let config = Configuration::new()
        .with_verbose(verbose_mode)
        .with_silenced(Team::B, true);

    let arena = Arena::new(config, constraints).unwrap();
    let mut log = MemoryLog::new();
    let summary = arena
        .play(&skirmish_map(3), Box::new(wanderer), Box::new(wanderer), &mut log)
        .unwrap();

    assert!(summary.rounds >= 1 && summary.rounds <= 80);
    assert_eq!(log.rounds().len() as u32, summary.rounds);
    assert!(summary.terminations.is_empty(), "{:?}", summary.terminations);
    let rounds: Vec<u32> = log.rounds().iter().map(|r| r.round).collect();
    assert_eq!(rounds, (1..=summary.rounds).collect::<Vec<_>>());
}

#[test]
fn identical_runs_produce_identical_traces() {
    let run = || {
        let constraints = ConstraintsBuilder::new().with_max_rounds(60).build().unwrap();
        let arena = Arena::new(quiet(), constraints).unwrap();
        let mut log = WriterLog::new(Vec::new());
        let summary = arena
            .play(&skirmish_map(11), Box::new(wanderer), Box::new(wanderer), &mut log)
            .unwrap();
        (summary, log.into_inner())
    };
    let (first_summary, first) = run();
    let (second_summary, second) = run();
    assert!(!first.is_empty());
    assert_eq!(first_summary, second_summary);
    assert!(first == second, "event traces differ");
}

#[test]
fn seed_override_changes_the_trace() {
    let run = |config: Configuration| {
        let constraints = ConstraintsBuilder::new().with_max_rounds(30).build().unwrap();
        let arena = Arena::new(config, constraints).unwrap();
        let mut log = WriterLog::new(Vec::new());
        arena
            .play(&skirmish_map(11), Box::new(wanderer), Box::new(wanderer), &mut log)
            .unwrap();
        log.into_inner()
    };
    let reference = run(quiet());
    assert_eq!(reference, run(quiet().with_seed(11)));
    assert_ne!(reference, run(quiet().with_seed(12)));
}

#[test]
fn turns_never_overlap() {
    let board: Arc<OnceLock<Arc<StatusBoard>>> = Arc::new(OnceLock::new());
    let samples = Arc::new(Mutex::new(vec![]));
    let factory = {
        let board = board.clone();
        let samples = samples.clone();
        move |robot: &RobotInfo| -> Box<dyn AgentProgram> {
            let board = board.clone();
            let samples = samples.clone();
            let direction = Direction::ALL[robot.id as usize % 8];
            Box::new(move |w: &mut WorldHandle| -> anyhow::Result<()> {
                loop {
                    let running = board.get().map(|b| b.running_count());
                    samples.lock().unwrap().push(running);
                    let _ = w.sense_nearby_robots();
                    let _ = w.move_to(direction);
                    w.end_turn();
                }
            })
        }
    };
    let factory_b = factory.clone();
    let mut rc = controller(
        &skirmish_map(5),
        Box::new(factory),
        Box::new(factory_b),
        ConstraintsBuilder::new().with_max_rounds(40),
    );
    let _ = board.set(rc.scheduler().status_board());

    let observer = rc.scheduler().status_board();
    while rc.run_round().unwrap() == RoundState::Running {
        assert_eq!(observer.running_count(), 0);
    }
    let samples = samples.lock().unwrap();
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|s| *s == Some(1)), "{samples:?}");
}

#[test]
fn turns_stay_within_budget() {
    let limit = 500;
    let mut rc = controller(
        &skirmish_map(8),
        Box::new(wanderer),
        Box::new(wanderer),
        ConstraintsBuilder::new()
            .with_turn_budget(limit)
            .with_max_rounds(40),
    );
    while rc.run_round().unwrap() == RoundState::Running {}
    let used: Vec<u32> = rc
        .event_log()
        .events()
        .filter_map(|(_, e)| match e {
            Event::ResourceUsed { used, .. } => Some(*used),
            _ => None,
        })
        .collect();
    assert!(!used.is_empty());
    assert!(used.iter().all(|&u| u <= limit));
    assert!(used.contains(&limit), "some turn should have been cut");
}

#[test]
fn budget_resets_every_turn() {
    let map = GameMap::builder(3, 3)
        .with_robot(Team::A, RobotType::Scout, 0, 0)
        .with_robot(Team::B, RobotType::Scout, 2, 2)
        .build()
        .unwrap();
    let greedy = Box::new(|_: &RobotInfo| -> Box<dyn AgentProgram> {
        Box::new(|w: &mut WorldHandle| -> anyhow::Result<()> {
            loop {
                anyhow::ensure!(w.resource_used() == 0, "turn started with used units");
                anyhow::ensure!(w.resource_left() == 100);
                w.charge(150);
            }
        })
    });
    let mut rc = controller(
        &map,
        greedy,
        idle(),
        ConstraintsBuilder::new().with_turn_budget(100),
    );
    for _ in 0..5 {
        assert_eq!(rc.run_round().unwrap(), RoundState::Running);
    }
    assert!(rc.terminations().is_empty(), "{:?}", rc.terminations());
    assert!(events(rc.event_log())
        .iter()
        .filter(|(_, e)| matches!(e, Event::ResourceUsed { id: 1, .. }))
        .all(|(_, e)| *e == Event::ResourceUsed { id: 1, used: 100 }));
}

/// A robot whose move lasts three rounds is skipped for the two following rounds.
#[test]
fn scenario_a_long_move_keeps_robot_busy() {
    let map = GameMap::builder(3, 2)
        .with_robot(Team::A, RobotType::Archon, 0, 1)
        .with_robot(Team::B, RobotType::Soldier, 2, 1)
        .build()
        .unwrap();
    let archon = Box::new(|_: &RobotInfo| -> Box<dyn AgentProgram> {
        Box::new(|w: &mut WorldHandle| -> anyhow::Result<()> {
            w.end_turn();
            // slowed by the soldier during round 1: move delay 2 + 1
            w.move_to(Direction::North)?;
            w.end_turn();
            anyhow::ensure!(w.round() == 5, "resumed in round {}", w.round());
            anyhow::ensure!(!w.is_movement_active());
            loop {
                w.end_turn();
            }
        })
    });
    let soldier = Box::new(|_: &RobotInfo| -> Box<dyn AgentProgram> {
        Box::new(|w: &mut WorldHandle| -> anyhow::Result<()> {
            w.attack(Location::new(0, 1))?;
            loop {
                w.end_turn();
            }
        })
    });
    let mut rc = controller(&map, archon, soldier, ConstraintsBuilder::new());

    rc.run_round().unwrap();
    assert_eq!(rc.world().robot(1).unwrap().slowed_rounds, 3);

    rc.run_round().unwrap();
    {
        let world = rc.world();
        let archon = world.robot(1).unwrap();
        assert_eq!(archon.location, Location::new(0, 0));
        assert_eq!(archon.movement_cooldown, 3);
    }
    for expected in [2, 1, 0] {
        rc.run_round().unwrap();
        assert_eq!(rc.world().robot(1).unwrap().movement_cooldown, expected);
    }
    rc.run_round().unwrap();

    assert_eq!(turns_of(rc.event_log(), 1), vec![1, 2, 5, 6]);
    assert!(rc.terminations().is_empty(), "{:?}", rc.terminations());
    assert!(events(rc.event_log()).contains(&(
        2,
        Event::Moved {
            id: 1,
            from: Location::new(0, 1),
            to: Location::new(0, 0),
        }
    )));
}

/// An overrun ends the turn with `used == limit`, keeping only what was queued before it.
#[test]
fn scenario_b_exhaustion_keeps_earlier_action() {
    let map = GameMap::builder(5, 5)
        .with_robot(Team::A, RobotType::Scout, 0, 0)
        .with_robot(Team::A, RobotType::Scout, 0, 2)
        .with_robot(Team::B, RobotType::Scout, 4, 4)
        .build()
        .unwrap();
    let team_a = Box::new(|robot: &RobotInfo| -> Box<dyn AgentProgram> {
        if robot.location.y == 0 {
            Box::new(|w: &mut WorldHandle| -> anyhow::Result<()> {
                w.broadcast("before")?;
                loop {
                    w.charge(7);
                }
            })
        } else {
            Box::new(|w: &mut WorldHandle| -> anyhow::Result<()> {
                w.charge(95);
                w.charge(10);
                w.broadcast("after")?;
                loop {
                    w.end_turn();
                }
            })
        }
    });
    let mut rc = controller(
        &map,
        team_a,
        idle(),
        ConstraintsBuilder::new().with_turn_budget(100),
    );
    rc.run_round().unwrap();
    rc.run_round().unwrap();

    let log = events(rc.event_log());
    let used = |round: u32, id: u32| {
        log.iter().find_map(|(r, e)| match e {
            Event::ResourceUsed { id: who, used } if *r == round && *who == id => Some(*used),
            _ => None,
        })
    };
    let broadcasts: Vec<(u32, u32, String)> = log
        .iter()
        .filter_map(|(r, e)| match e {
            Event::Broadcast { sender, text } => Some((*r, *sender, text.clone())),
            _ => None,
        })
        .collect();

    assert_eq!(used(1, 1), Some(100));
    assert_eq!(used(1, 2), Some(100));
    assert_eq!(used(2, 1), Some(100));
    assert_eq!(used(2, 2), Some(10));
    assert_eq!(
        broadcasts,
        vec![(1, 1, "before".to_owned()), (2, 2, "after".to_owned())]
    );
}

/// A faulting context leaves the registry at the end of its round; the others keep their order.
#[test]
fn scenario_c_fault_removes_only_the_culprit() {
    let map = GameMap::builder(3, 3)
        .with_robot(Team::A, RobotType::Scout, 0, 0)
        .with_robot(Team::A, RobotType::Scout, 1, 0)
        .with_robot(Team::A, RobotType::Scout, 2, 0)
        .with_robot(Team::B, RobotType::Scout, 0, 2)
        .build()
        .unwrap();
    let team_a = Box::new(|robot: &RobotInfo| -> Box<dyn AgentProgram> {
        let faulty = robot.id == 2;
        Box::new(move |w: &mut WorldHandle| -> anyhow::Result<()> {
            loop {
                if faulty && w.round() == 5 {
                    panic!("round five");
                }
                w.end_turn();
            }
        })
    });
    let mut rc = controller(&map, team_a, idle(), ConstraintsBuilder::new());
    for _ in 0..4 {
        rc.run_round().unwrap();
    }
    assert_eq!(rc.scheduler().order(), vec![1, 2, 3, 4]);

    rc.run_round().unwrap();
    assert_eq!(rc.scheduler().order(), vec![1, 3, 4]);
    assert_eq!(
        rc.terminations(),
        &[Termination {
            round: 5,
            id: 2,
            team: Team::A,
            cause: TerminationCause::Fault("round five".to_owned()),
        }]
    );

    rc.run_round().unwrap();
    assert_eq!(turn_order(rc.event_log(), 5), vec![1, 2, 3, 4]);
    assert_eq!(turn_order(rc.event_log(), 6), vec![1, 3, 4]);
    assert!(events(rc.event_log()).contains(&(
        5,
        Event::Died {
            id: 2,
            team: Team::A,
            cause: DeathCause::Terminated(TerminationCause::Fault("round five".to_owned())),
        }
    )));
    assert!(rc.world().robot(2).is_none());
}

/// Attacks on the same target resolve in registry order.
#[test]
fn scenario_d_conflicting_attacks_follow_registry_order() {
    let map = GameMap::builder(3, 1)
        .with_robot(Team::A, RobotType::Soldier, 0, 0)
        .with_robot(Team::A, RobotType::Soldier, 2, 0)
        .with_robot(Team::B, RobotType::Scout, 1, 0)
        .build()
        .unwrap();
    let soldiers = Box::new(|_: &RobotInfo| -> Box<dyn AgentProgram> {
        Box::new(|w: &mut WorldHandle| -> anyhow::Result<()> {
            w.attack(Location::new(1, 0))?;
            loop {
                w.end_turn();
            }
        })
    });
    let mut rc = controller(&map, soldiers, idle(), ConstraintsBuilder::new());
    let state = rc.run_round().unwrap();
    assert_eq!(
        state,
        RoundState::Finished(MatchOutcome::Winner {
            team: Team::A,
            reason: WinReason::Elimination,
        })
    );

    let combat: Vec<Event> = events(rc.event_log())
        .into_iter()
        .map(|(_, e)| e)
        .filter(|e| matches!(e, Event::Attacked { .. } | Event::Died { .. }))
        .collect();
    assert_eq!(
        combat,
        vec![
            Event::Attacked {
                attacker: 1,
                target: 3,
                damage: 10,
                energon: 5,
            },
            Event::Attacked {
                attacker: 2,
                target: 3,
                damage: 10,
                energon: -5,
            },
            Event::Died {
                id: 3,
                team: Team::B,
                cause: DeathCause::Destroyed { by: 2 },
            },
        ]
    );
}

/// A robot spawned in round n plays from round n + 1.
#[test]
fn scenario_e_spawned_context_waits_a_round() {
    let map = GameMap::builder(5, 5)
        .with_initial_resources(20)
        .with_robot(Team::A, RobotType::Archon, 1, 1)
        .with_robot(Team::B, RobotType::Scout, 4, 4)
        .build()
        .unwrap();
    let seen = Arc::new(Mutex::new(vec![]));
    let team_a = {
        let seen = seen.clone();
        Box::new(move |robot: &RobotInfo| -> Box<dyn AgentProgram> {
            let seen = seen.clone();
            match robot.robot_type {
                RobotType::Archon => Box::new(|w: &mut WorldHandle| -> anyhow::Result<()> {
                    w.spawn(RobotType::Soldier, Direction::East)?;
                    loop {
                        w.end_turn();
                    }
                }),
                _ => Box::new(move |w: &mut WorldHandle| -> anyhow::Result<()> {
                    loop {
                        seen.lock().unwrap().push(w.round());
                        w.end_turn();
                    }
                }),
            }
        })
    };
    let mut rc = controller(&map, team_a, idle(), ConstraintsBuilder::new());

    rc.run_round().unwrap();
    assert_eq!(rc.scheduler().order(), vec![1, 2, 3]);
    assert_eq!(rc.world().resources(Team::A), 2);
    assert!(events(rc.event_log()).contains(&(
        1,
        Event::Spawned {
            parent: 1,
            id: 3,
            team: Team::A,
            robot_type: RobotType::Soldier,
            at: Location::new(2, 1),
        }
    )));
    assert!(seen.lock().unwrap().is_empty());

    rc.run_round().unwrap();
    rc.run_round().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    assert_eq!(turns_of(rc.event_log(), 3), vec![2, 3]);
}

#[test]
fn rule_violations_are_reported_and_charged() {
    let map = GameMap::builder(3, 3)
        .with_robot(Team::A, RobotType::Soldier, 0, 0)
        .with_robot(Team::B, RobotType::Archon, 1, 1)
        .build()
        .unwrap();
    let soldier = Box::new(|_: &RobotInfo| -> Box<dyn AgentProgram> {
        Box::new(|w: &mut WorldHandle| -> anyhow::Result<()> {
            let target = Location::new(1, 1);
            w.attack(target)?;
            anyhow::ensure!(w.resource_used() == 10);
            anyhow::ensure!(w.attack(target) == Err(RuleViolation::DoubleAction));
            anyhow::ensure!(w.resource_used() == 520);
            anyhow::ensure!(w.move_to(Direction::North) == Err(RuleViolation::DoubleAction));
            w.end_turn();

            anyhow::ensure!(
                w.attack(target)
                    == Err(RuleViolation::CooldownActive {
                        track: robot_arena::world::CooldownTrack::Attack
                    })
            );
            anyhow::ensure!(w.move_to(Direction::North) == Err(RuleViolation::OffMap));
            anyhow::ensure!(w.transfer_energon(0, target) == Err(RuleViolation::InvalidAmount));
            anyhow::ensure!(
                w.spawn(RobotType::Scout, Direction::East)
                    == Err(RuleViolation::NotCapable("SOLDIER"))
            );
            anyhow::ensure!(
                w.broadcast("x".repeat(1_000))
                    == Err(RuleViolation::MessageTooLong { len: 1_000, max: 256 })
            );
            // the turn is still ours: a valid action goes through
            w.move_to(Direction::East)?;
            loop {
                w.end_turn();
            }
        })
    });
    let mut rc = controller(&map, soldier, idle(), ConstraintsBuilder::new());
    rc.run_round().unwrap();
    rc.run_round().unwrap();
    assert!(rc.terminations().is_empty(), "{:?}", rc.terminations());
    assert_eq!(rc.world().robot(1).unwrap().location, Location::new(1, 0));
    assert_eq!(rc.world().robot(2).unwrap().energon, 141);
}

#[test]
fn self_destruct_discards_the_turn() {
    let map = GameMap::builder(3, 3)
        .with_robot(Team::A, RobotType::Scout, 0, 0)
        .with_robot(Team::A, RobotType::Scout, 2, 0)
        .with_robot(Team::B, RobotType::Scout, 2, 2)
        .build()
        .unwrap();
    let team_a = Box::new(|robot: &RobotInfo| -> Box<dyn AgentProgram> {
        if robot.id == 1 {
            Box::new(|w: &mut WorldHandle| -> anyhow::Result<()> {
                w.move_to(Direction::East)?;
                w.self_destruct();
                w.end_turn();
                anyhow::bail!("resumed after self destruct")
            })
        } else {
            players::idle().create_player(robot)
        }
    });
    let mut rc = controller(&map, team_a, idle(), ConstraintsBuilder::new());
    assert_eq!(rc.run_round().unwrap(), RoundState::Running);

    assert_eq!(rc.terminations()[0].cause, TerminationCause::SelfDestructed);
    assert!(!events(rc.event_log())
        .iter()
        .any(|(_, e)| matches!(e, Event::Moved { .. })));
    assert_eq!(rc.scheduler().order(), vec![2, 3]);
}
