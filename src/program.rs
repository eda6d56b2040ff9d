//! Module defining traits that need to be implemented to take part in a match

use crate::handle::WorldHandle;
use crate::world::RobotInfo;

/// The logic driving one robot.
///
/// `run` is entered once, on the robot's first turn, and may loop forever: every call on the
/// [`WorldHandle`] is a metering checkpoint, and [`WorldHandle::end_turn`] suspends the program
/// until its next turn. Returning (with `Ok` or `Err`) terminates the robot.
///
/// Closures `FnMut(&mut WorldHandle) -> anyhow::Result<()> + Send` implement this trait.
pub trait AgentProgram: Send {
    /// Entry point of the robot.
    ///
    /// # Error
    /// Any error terminates the robot, exactly like a panic would.
    fn run(&mut self, world: &mut WorldHandle) -> anyhow::Result<()>;
}

impl<F> AgentProgram for F
where
    F: FnMut(&mut WorldHandle) -> anyhow::Result<()> + Send,
{
    fn run(&mut self, world: &mut WorldHandle) -> anyhow::Result<()> {
        self(world)
    }
}

/// What a team gives to the arena to create the program of each of its robots, initial and
/// spawned alike.
pub trait PlayerFactory {
    /// Returns the program of a freshly placed robot.
    fn create_player(&self, robot: &RobotInfo) -> Box<dyn AgentProgram>;
}

impl<F> PlayerFactory for F
where
    F: Fn(&RobotInfo) -> Box<dyn AgentProgram>,
{
    fn create_player(&self, robot: &RobotInfo) -> Box<dyn AgentProgram> {
        self(robot)
    }
}
