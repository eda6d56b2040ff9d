//! Shared world state.
//!
//! The [`World`] is owned by the [`RoundController`](crate::round::RoundController) and mutated
//! only between turns. Agents read it during their own turn through
//! [`WorldHandle`](crate::handle::WorldHandle); every write they request is buffered as an
//! [`Action`](crate::action::Action).

use std::collections::BTreeMap;
use std::fmt::Display;

use anyhow::bail;

use crate::rules::RobotType;

/// Identifier shared by a robot and the context driving it.
pub type AgentId = u32;

/// Competing sides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Team {
    /// First team, registered first on symmetric maps.
    A,
    /// Second team.
    B,
}

impl Team {
    /// Both teams, in order.
    pub const ALL: [Team; 2] = [Team::A, Team::B];

    /// The other team.
    pub fn opponent(self) -> Team {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Team::A => 0,
            Team::B => 1,
        }
    }
}

impl Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Team::A => f.write_str("A"),
            Team::B => f.write_str("B"),
        }
    }
}

/// A cell on the map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl Location {
    /// Creates a location.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Adjacent location in `direction`.
    pub fn add(self, direction: Direction) -> Location {
        let (dx, dy) = direction.offset();
        Location::new(self.x + dx, self.y + dy)
    }

    /// Squared euclidean distance.
    pub fn distance_sq(self, other: Location) -> i32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Whether `other` is one of the eight neighbours of `self`.
    pub fn is_adjacent(self, other: Location) -> bool {
        self != other && (self.x - other.x).abs() <= 1 && (self.y - other.y).abs() <= 1
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// The eight compass directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    #[allow(missing_docs)]
    North,
    #[allow(missing_docs)]
    NorthEast,
    #[allow(missing_docs)]
    East,
    #[allow(missing_docs)]
    SouthEast,
    #[allow(missing_docs)]
    South,
    #[allow(missing_docs)]
    SouthWest,
    #[allow(missing_docs)]
    West,
    #[allow(missing_docs)]
    NorthWest,
}

impl Direction {
    /// All directions, clockwise from north.
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    /// `(dx, dy)`, with `y` growing southwards.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::NorthEast => (1, -1),
            Direction::East => (1, 0),
            Direction::SouthEast => (1, 1),
            Direction::South => (0, 1),
            Direction::SouthWest => (-1, 1),
            Direction::West => (-1, 0),
            Direction::NorthWest => (-1, -1),
        }
    }
}

/// Cooldown tracks an action kind may engage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CooldownTrack {
    /// Weapon cooldown.
    Attack,
    /// Locomotion cooldown.
    Movement,
}

impl Display for CooldownTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CooldownTrack::Attack => f.write_str("attack"),
            CooldownTrack::Movement => f.write_str("movement"),
        }
    }
}

/// Engine-side robot state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Robot {
    /// Robot (and context) id.
    pub id: AgentId,
    /// Owning team.
    pub team: Team,
    /// Type, fixing its stats.
    pub robot_type: RobotType,
    /// Current cell.
    pub location: Location,
    /// Health; the robot dies at zero or below.
    pub energon: i32,
    /// Rounds until the attack track is free.
    pub attack_cooldown: u32,
    /// Rounds until the movement track is free.
    pub movement_cooldown: u32,
    /// Rounds the current action still occupies the robot. Busy robots are not stepped.
    pub busy_rounds: u32,
    /// Rounds of the slow effect left.
    pub slowed_rounds: u32,
    /// Cleared when the robot is destroyed; removal waits for the round boundary.
    pub alive: bool,
}

impl Robot {
    /// Remaining rounds of `track`.
    pub fn cooldown(&self, track: CooldownTrack) -> u32 {
        match track {
            CooldownTrack::Attack => self.attack_cooldown,
            CooldownTrack::Movement => self.movement_cooldown,
        }
    }

    /// Public snapshot of this robot.
    pub fn info(&self) -> RobotInfo {
        RobotInfo {
            id: self.id,
            team: self.team,
            robot_type: self.robot_type,
            location: self.location,
            energon: self.energon,
        }
    }
}

/// What agents (and player factories) may learn about a robot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RobotInfo {
    /// Robot id.
    pub id: AgentId,
    /// Owning team.
    pub team: Team,
    /// Type.
    pub robot_type: RobotType,
    /// Cell.
    pub location: Location,
    /// Health.
    pub energon: i32,
}

/// A broadcast message, readable by everyone during the round after it was sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Sending robot.
    pub sender: AgentId,
    /// Team of the sender.
    pub team: Team,
    /// Payload.
    pub text: String,
}

/// The simulated world.
#[derive(Debug)]
pub struct World {
    round: u32,
    width: i32,
    height: i32,
    seed: u64,
    robots: BTreeMap<AgentId, Robot>,
    resources: [u32; 2],
    broadcasts: Vec<Message>,
    next_id: AgentId,
}

impl World {
    /// Builds the initial world. Initial robots get ids in map order, starting at 1.
    pub fn new(map: &GameMap) -> World {
        let mut world = World {
            round: 0,
            width: map.width,
            height: map.height,
            seed: map.seed,
            robots: BTreeMap::new(),
            resources: [map.initial_resources; 2],
            broadcasts: vec![],
            next_id: 1,
        };
        for &(team, robot_type, location) in &map.robots {
            world.insert_robot(team, robot_type, location);
        }
        world
    }

    /// Current round number (0 before the first round).
    pub fn round(&self) -> u32 {
        self.round
    }

    pub(crate) fn set_round(&mut self, round: u32) {
        self.round = round;
    }

    /// Map seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// `(width, height)`.
    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    /// Whether `location` lies on the map.
    pub fn on_map(&self, location: Location) -> bool {
        (0..self.width).contains(&location.x) && (0..self.height).contains(&location.y)
    }

    /// Robot by id, dead or alive.
    pub fn robot(&self, id: AgentId) -> Option<&Robot> {
        self.robots.get(&id)
    }

    pub(crate) fn robot_mut(&mut self, id: AgentId) -> Option<&mut Robot> {
        self.robots.get_mut(&id)
    }

    /// All robots, in id order.
    pub fn robots(&self) -> impl Iterator<Item = &Robot> {
        self.robots.values()
    }

    pub(crate) fn robots_mut(&mut self) -> impl Iterator<Item = &mut Robot> {
        self.robots.values_mut()
    }

    /// Any robot standing on `location`, including one destroyed this round.
    pub fn occupant(&self, location: Location) -> Option<&Robot> {
        self.robots.values().find(|r| r.location == location)
    }

    /// Living robot on `location`.
    pub fn robot_at(&self, location: Location) -> Option<&Robot> {
        self.occupant(location).filter(|r| r.alive)
    }

    /// Living robots within `range_sq` of `center`, in id order.
    pub fn robots_near(&self, center: Location, range_sq: i32) -> Vec<RobotInfo> {
        self.robots
            .values()
            .filter(|r| r.alive && r.location.distance_sq(center) <= range_sq)
            .map(Robot::info)
            .collect()
    }

    /// Adds a robot with full energon and returns its id.
    pub(crate) fn insert_robot(
        &mut self,
        team: Team,
        robot_type: RobotType,
        location: Location,
    ) -> AgentId {
        let id = self.next_id;
        self.next_id += 1;
        self.robots.insert(
            id,
            Robot {
                id,
                team,
                robot_type,
                location,
                energon: robot_type.stats().max_energon,
                attack_cooldown: 0,
                movement_cooldown: 0,
                busy_rounds: 0,
                slowed_rounds: 0,
                alive: true,
            },
        );
        id
    }

    pub(crate) fn remove_robot(&mut self, id: AgentId) -> Option<Robot> {
        self.robots.remove(&id)
    }

    /// Resources held by `team`.
    pub fn resources(&self, team: Team) -> u32 {
        self.resources[team.index()]
    }

    pub(crate) fn set_resources(&mut self, team: Team, amount: u32) {
        self.resources[team.index()] = amount;
    }

    /// Messages broadcast during the previous round.
    pub fn broadcasts(&self) -> &[Message] {
        &self.broadcasts
    }

    pub(crate) fn replace_broadcasts(&mut self, messages: Vec<Message>) {
        self.broadcasts = messages;
    }

    /// Number of living robots of `team`.
    pub fn robot_count(&self, team: Team) -> usize {
        self.robots
            .values()
            .filter(|r| r.alive && r.team == team)
            .count()
    }

    /// Sum of the energon of the living robots of `team`.
    pub fn total_energon(&self, team: Team) -> i64 {
        self.robots
            .values()
            .filter(|r| r.alive && r.team == team)
            .map(|r| i64::from(r.energon))
            .sum()
    }
}

/// Match setup: bounds, seed, starting resources and initial robots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameMap {
    pub(crate) width: i32,
    pub(crate) height: i32,
    pub(crate) seed: u64,
    pub(crate) initial_resources: u32,
    pub(crate) robots: Vec<(Team, RobotType, Location)>,
}

impl GameMap {
    /// Creates a [`GameMapBuilder`].
    pub fn builder(width: i32, height: i32) -> GameMapBuilder {
        GameMapBuilder {
            width,
            height,
            seed: 0,
            initial_resources: 0,
            robots: vec![],
        }
    }

    /// Map seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Builder for [`GameMap`].
#[derive(Debug)]
pub struct GameMapBuilder {
    width: i32,
    height: i32,
    seed: u64,
    initial_resources: u32,
    robots: Vec<(Team, RobotType, Location)>,
}

impl GameMapBuilder {
    /// Sets the seed handed (after mixing) to every agent.
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }

    /// Sets the resources each team starts with.
    #[must_use]
    pub fn with_initial_resources(self, amount: u32) -> Self {
        Self {
            initial_resources: amount,
            ..self
        }
    }

    /// Places a robot. Registry (turn) order follows placement order.
    #[must_use]
    pub fn with_robot(mut self, team: Team, robot_type: RobotType, x: i32, y: i32) -> Self {
        self.robots.push((team, robot_type, Location::new(x, y)));
        self
    }

    /// Validates bounds and placement.
    ///
    /// # Errors
    /// Returned when the map is empty, a robot is off the map, or two robots share a cell.
    pub fn build(self) -> anyhow::Result<GameMap> {
        if self.width <= 0 || self.height <= 0 {
            bail!("map must not be empty, got {}x{}", self.width, self.height);
        }
        for (i, (_, _, loc)) in self.robots.iter().enumerate() {
            if !(0..self.width).contains(&loc.x) || !(0..self.height).contains(&loc.y) {
                bail!("robot #{i} placed off the map at {loc}");
            }
            if self.robots[..i].iter().any(|(_, _, other)| other == loc) {
                bail!("two robots placed on {loc}");
            }
        }
        Ok(GameMap {
            width: self.width,
            height: self.height,
            seed: self.seed,
            initial_resources: self.initial_resources,
            robots: self.robots,
        })
    }
}
