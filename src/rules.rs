//! Robot types and the numeric rule table.
//!
//! The rule set is intentionally small: it exists so that the round lifecycle has something
//! real to resolve. Balancing is not a concern of this crate.

use std::fmt::Display;

/// Resources earned by a team per living archon, each round.
pub const ARCHON_PRODUCTION: u32 = 2;

/// Rounds a soldier hit slows its target for.
pub const SLOW_ROUNDS: u32 = 3;

/// Extra movement delay while slowed.
pub const SLOW_MOVE_PENALTY: u32 = 1;

/// Number of indicator string slots per robot.
pub const INDICATOR_SLOTS: usize = 3;

/// Kinds of robots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RobotType {
    /// Slow, sturdy, produces resources and spawns other robots. Cannot attack.
    Archon,
    /// Fighting unit.
    Soldier,
    /// Fast, fragile explorer.
    Scout,
}

/// Static attributes of a [`RobotType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RobotStats {
    /// Maximum (and initial) energon.
    pub max_energon: i32,
    /// Energon regenerated per round.
    pub regen: i32,
    /// Damage dealt per attack, zero when the type cannot attack.
    pub attack_power: i32,
    /// Squared attack range.
    pub attack_range_sq: i32,
    /// Attack cooldown, in rounds.
    pub attack_delay: u32,
    /// Movement cooldown, in rounds.
    pub move_delay: u32,
    /// Squared sensor range.
    pub sensor_range_sq: i32,
    /// Team resources needed to spawn this type.
    pub spawn_cost: u32,
    /// Rounds the parent is busy while spawning this type.
    pub spawn_delay: u32,
    /// Whether robots of this type may spawn others.
    pub can_spawn: bool,
}

impl RobotType {
    /// All types, in declaration order.
    pub const ALL: [RobotType; 3] = [RobotType::Archon, RobotType::Soldier, RobotType::Scout];

    /// Rule table entry for this type.
    pub const fn stats(self) -> RobotStats {
        match self {
            RobotType::Archon => RobotStats {
                max_energon: 150,
                regen: 1,
                attack_power: 0,
                attack_range_sq: 0,
                attack_delay: 0,
                move_delay: 2,
                sensor_range_sq: 36,
                spawn_cost: 0,
                spawn_delay: 0,
                can_spawn: true,
            },
            RobotType::Soldier => RobotStats {
                max_energon: 40,
                regen: 0,
                attack_power: 10,
                attack_range_sq: 4,
                attack_delay: 2,
                move_delay: 1,
                sensor_range_sq: 16,
                spawn_cost: 20,
                spawn_delay: 2,
                can_spawn: false,
            },
            RobotType::Scout => RobotStats {
                max_energon: 15,
                regen: 0,
                attack_power: 3,
                attack_range_sq: 2,
                attack_delay: 1,
                move_delay: 1,
                sensor_range_sq: 49,
                spawn_cost: 10,
                spawn_delay: 1,
                can_spawn: false,
            },
        }
    }

    /// Whether this type deals damage.
    pub fn can_attack(self) -> bool {
        self.stats().attack_power > 0
    }

    /// Upper-case name, used in event lines and robot log prefixes.
    pub fn name(self) -> &'static str {
        match self {
            RobotType::Archon => "ARCHON",
            RobotType::Soldier => "SOLDIER",
            RobotType::Scout => "SCOUT",
        }
    }
}

impl Display for RobotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-robot seed derived from the match seed, so agents can build reproducible RNGs.
pub fn robot_seed(match_seed: u64, id: u32) -> u64 {
    // splitmix64 finaliser
    let mut z = match_seed ^ (u64::from(id).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
