use robot_arena::prelude::*;

/// Ends every turn right away.
pub fn idle() -> Box<dyn PlayerFactory> {
    Box::new(|_: &RobotInfo| -> Box<dyn AgentProgram> {
        Box::new(|w: &mut WorldHandle| -> anyhow::Result<()> {
            loop {
                w.end_turn();
            }
        })
    })
}

fn xorshift(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

/// Seeded player: archons spawn scouts when they can afford it, others chase enemies.
pub fn wanderer(robot: &RobotInfo) -> Box<dyn AgentProgram> {
    let kind = robot.robot_type;
    Box::new(move |w: &mut WorldHandle| -> anyhow::Result<()> {
        let mut rng = w.seed() | 1;
        let team = w.team();
        loop {
            let direction = Direction::ALL[(xorshift(&mut rng) % 8) as usize];
            let enemies: Vec<RobotInfo> = w
                .sense_nearby_robots()
                .into_iter()
                .filter(|r| r.team != team)
                .collect();
            if kind == RobotType::Archon {
                if w.team_resources() >= 10 {
                    let _ = w.spawn(RobotType::Scout, direction);
                } else {
                    let _ = w.move_to(direction);
                }
            } else if let Some(enemy) = enemies.first() {
                if w.attack(enemy.location).is_err() && w.move_to(direction).is_err() {
                    w.set_indicator_string(0, "stuck");
                }
            } else if let Err(violation) = w.move_to(direction) {
                w.set_indicator_string(1, violation.to_string());
            }
            if xorshift(&mut rng) % 16 == 0 {
                let _ = w.broadcast(format!("{} at round {}", w.id(), w.round()));
            }
            w.charge((xorshift(&mut rng) % 300) as u32);
            w.end_turn();
        }
    })
}

/// Symmetric map with two archons and two soldiers per team.
pub fn skirmish_map(seed: u64) -> GameMap {
    GameMap::builder(12, 12)
        .with_seed(seed)
        .with_initial_resources(30)
        .with_robot(Team::A, RobotType::Archon, 1, 1)
        .with_robot(Team::B, RobotType::Archon, 10, 10)
        .with_robot(Team::A, RobotType::Soldier, 3, 2)
        .with_robot(Team::B, RobotType::Soldier, 8, 9)
        .with_robot(Team::A, RobotType::Soldier, 2, 3)
        .with_robot(Team::B, RobotType::Soldier, 9, 8)
        .build()
        .expect("valid map")
}

/// Events of a memory log, with their round.
pub fn events(log: &MemoryLog) -> Vec<(u32, Event)> {
    log.events().map(|(round, e)| (round, e.clone())).collect()
}

/// Rounds in which robot `id` took a turn.
pub fn turns_of(log: &MemoryLog, id: u32) -> Vec<u32> {
    log.events()
        .filter_map(|(round, e)| match e {
            Event::ResourceUsed { id: who, .. } if *who == id => Some(round),
            _ => None,
        })
        .collect()
}

/// Ids that took a turn in `round`, in turn order.
pub fn turn_order(log: &MemoryLog, round: u32) -> Vec<u32> {
    log.events()
        .filter_map(|(r, e)| match e {
            Event::ResourceUsed { id, .. } if r == round => Some(*id),
            _ => None,
        })
        .collect()
}
