//! Turn order over the registered contexts, one running at a time.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::agent::{AgentContext, AgentStatus, StatusCell, TurnBudget, TurnReport};
use crate::error::EngineError;
use crate::world::AgentId;

/// Status of every registered context, shareable with observers on other threads.
#[derive(Debug, Default)]
pub struct StatusBoard {
    cells: Mutex<BTreeMap<AgentId, StatusCell>>,
}

impl StatusBoard {
    fn insert(&self, id: AgentId, cell: StatusCell) {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, cell);
    }

    fn remove(&self, id: AgentId) {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Number of contexts currently reporting [`AgentStatus::Running`]. Never above one.
    pub fn running_count(&self) -> usize {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|cell| cell.get() == AgentStatus::Running)
            .count()
    }

    /// First context reporting [`AgentStatus::Running`], if any.
    pub fn running(&self) -> Option<AgentId> {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, cell)| cell.get() == AgentStatus::Running)
            .map(|(&id, _)| id)
    }

    /// Status of context `id`, if registered.
    pub fn status(&self, id: AgentId) -> Option<AgentStatus> {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(StatusCell::get)
    }
}

/// Owns the turn order and hands execution to one context at a time.
///
/// Registry changes are deferred: [`register`](Self::register) and
/// [`unregister`](Self::unregister) only take effect at the next [`commit`](Self::commit),
/// which is refused while a traversal is in progress.
pub struct Scheduler {
    registry: Vec<AgentContext>,
    pending: Vec<AgentContext>,
    removals: Vec<AgentId>,
    traversing: Option<u32>,
    board: Arc<StatusBoard>,
}

impl Scheduler {
    /// An empty scheduler.
    pub fn new() -> Self {
        Scheduler {
            registry: vec![],
            pending: vec![],
            removals: vec![],
            traversing: None,
            board: Arc::new(StatusBoard::default()),
        }
    }

    fn knows(&self, id: AgentId) -> bool {
        self.registry.iter().chain(&self.pending).any(|c| c.id() == id)
    }

    /// Appends `context` to the registry tail at the next commit.
    pub fn register(&mut self, context: AgentContext) -> Result<(), EngineError> {
        if self.knows(context.id()) {
            return Err(EngineError::AlreadyRegistered(context.id()));
        }
        trace!(id = context.id(), "registration deferred");
        self.board.insert(context.id(), context.status_cell());
        self.pending.push(context);
        Ok(())
    }

    /// Appends `context` to the registry tail right away.
    pub fn register_immediate(&mut self, context: AgentContext) -> Result<(), EngineError> {
        if self.traversing.is_some() {
            return Err(EngineError::TraversalInProgress);
        }
        if self.knows(context.id()) {
            return Err(EngineError::AlreadyRegistered(context.id()));
        }
        self.board.insert(context.id(), context.status_cell());
        self.registry.push(context);
        Ok(())
    }

    /// Marks context `id` for removal at the next commit.
    pub fn unregister(&mut self, id: AgentId) -> Result<(), EngineError> {
        if !self.knows(id) {
            return Err(EngineError::UnknownContext(id));
        }
        if !self.removals.contains(&id) {
            self.removals.push(id);
        }
        Ok(())
    }

    /// Applies deferred removals, then deferred registrations in registration order.
    pub fn commit(&mut self) -> Result<(), EngineError> {
        if self.traversing.is_some() {
            return Err(EngineError::TraversalInProgress);
        }
        for id in std::mem::take(&mut self.removals) {
            self.registry.retain(|c| c.id() != id);
            self.pending.retain(|c| c.id() != id);
            self.board.remove(id);
            debug!(id, "context unregistered");
        }
        self.registry.append(&mut self.pending);
        Ok(())
    }

    /// Starts a full traversal and returns the ids of the live contexts, in turn order.
    pub fn begin_traversal(&mut self, round: u32) -> Result<Vec<AgentId>, EngineError> {
        if self.traversing.is_some() {
            return Err(EngineError::TraversalInProgress);
        }
        self.traversing = Some(round);
        Ok(self
            .registry
            .iter()
            .filter(|c| c.status() != AgentStatus::Terminated)
            .map(AgentContext::id)
            .collect())
    }

    /// Ends the current traversal.
    pub fn end_traversal(&mut self) {
        self.traversing = None;
    }

    /// Gives the execution slot to context `id` for one turn and blocks until it comes back.
    ///
    /// Faults of the agent come back as a terminated [`TurnReport`], never as an error.
    pub fn run_turn(&mut self, id: AgentId, budget: TurnBudget) -> Result<TurnReport, EngineError> {
        if let Some(running) = self.board.running() {
            return Err(EngineError::Busy {
                running,
                requested: id,
            });
        }
        let context = self
            .registry
            .iter_mut()
            .find(|c| c.id() == id)
            .ok_or(EngineError::UnknownContext(id))?;
        context.step(budget)
    }

    /// Terminates context `id`, registered or pending. Removal still waits for a commit.
    pub fn terminate(&mut self, id: AgentId) -> Result<(), EngineError> {
        self.registry
            .iter_mut()
            .chain(self.pending.iter_mut())
            .find(|c| c.id() == id)
            .ok_or(EngineError::UnknownContext(id))?
            .terminate();
        Ok(())
    }

    /// Registry ids in turn order.
    pub fn order(&self) -> Vec<AgentId> {
        self.registry.iter().map(AgentContext::id).collect()
    }

    /// Registered context `id`.
    pub fn get(&self, id: AgentId) -> Option<&AgentContext> {
        self.registry.iter().find(|c| c.id() == id)
    }

    /// Shared status board.
    pub fn status_board(&self) -> Arc<StatusBoard> {
        self.board.clone()
    }

    /// Terminates and drops every context.
    pub fn shutdown(&mut self) {
        let count = self.registry.len() + self.pending.len();
        for context in self.registry.iter_mut().chain(self.pending.iter_mut()) {
            context.terminate();
            self.board.remove(context.id());
        }
        self.registry.clear();
        self.pending.clear();
        self.removals.clear();
        debug!(count, "scheduler shut down");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::RwLock;

    use super::*;
    use crate::agent::{ContextOptions, TerminationCause, TurnOutcome};
    use crate::constraints::Constraints;
    use crate::handle::WorldHandle;
    use crate::program::AgentProgram;
    use crate::rules::RobotType;
    use crate::world::{GameMap, Team, World};

    struct Fixture {
        world: Arc<RwLock<World>>,
        options: ContextOptions,
    }

    impl Fixture {
        fn new(robots: i32) -> Self {
            let mut builder = GameMap::builder(10, 1);
            for x in 0..robots {
                builder = builder.with_robot(Team::A, RobotType::Scout, x, 0);
            }
            let world = World::new(&builder.build().unwrap());
            let constraints = Constraints::builder().build().unwrap();
            Fixture {
                world: Arc::new(RwLock::new(world)),
                options: ContextOptions {
                    costs: constraints.costs(),
                    stack_size: 256 * 1024,
                    seed: 0,
                    silenced: true,
                },
            }
        }

        fn context(&self, id: AgentId, program: impl AgentProgram + 'static) -> AgentContext {
            let info = self.world.read().unwrap().robot(id).unwrap().info();
            let mut ctx =
                AgentContext::spawn(&info, Box::new(program), self.world.clone(), self.options)
                    .unwrap();
            ctx.init().unwrap();
            ctx
        }
    }

    fn idle(w: &mut WorldHandle) -> anyhow::Result<()> {
        loop {
            w.end_turn();
        }
    }

    const BUDGET: TurnBudget = TurnBudget {
        limit: 1_000,
        round: 1,
    };

    #[test]
    fn registrations_wait_for_commit() {
        let fixture = Fixture::new(3);
        let mut scheduler = Scheduler::new();
        scheduler.register_immediate(fixture.context(1, idle)).unwrap();
        scheduler.register(fixture.context(2, idle)).unwrap();
        assert_eq!(scheduler.order(), vec![1]);
        assert!(matches!(
            scheduler.run_turn(2, BUDGET),
            Err(EngineError::UnknownContext(2))
        ));
        scheduler.commit().unwrap();
        assert_eq!(scheduler.order(), vec![1, 2]);
    }

    #[test]
    fn double_registration_is_rejected() {
        let fixture = Fixture::new(1);
        let mut scheduler = Scheduler::new();
        scheduler.register(fixture.context(1, idle)).unwrap();
        assert!(matches!(
            scheduler.register(fixture.context(1, idle)),
            Err(EngineError::AlreadyRegistered(1))
        ));
    }

    #[test]
    fn registry_is_frozen_during_traversal() {
        let fixture = Fixture::new(3);
        let mut scheduler = Scheduler::new();
        scheduler.register_immediate(fixture.context(1, idle)).unwrap();
        scheduler.register_immediate(fixture.context(2, idle)).unwrap();
        let order = scheduler.begin_traversal(1).unwrap();
        assert_eq!(order, vec![1, 2]);
        scheduler.unregister(1).unwrap();
        assert!(matches!(
            scheduler.commit(),
            Err(EngineError::TraversalInProgress)
        ));
        assert!(matches!(
            scheduler.register_immediate(fixture.context(3, idle)),
            Err(EngineError::TraversalInProgress)
        ));
        for id in order {
            scheduler.run_turn(id, BUDGET).unwrap();
        }
        scheduler.end_traversal();
        scheduler.commit().unwrap();
        assert_eq!(scheduler.order(), vec![2]);
    }

    #[test]
    fn removal_keeps_relative_order() {
        let fixture = Fixture::new(4);
        let mut scheduler = Scheduler::new();
        for id in 1..=4 {
            scheduler.register_immediate(fixture.context(id, idle)).unwrap();
        }
        scheduler.unregister(2).unwrap();
        scheduler.commit().unwrap();
        assert_eq!(scheduler.order(), vec![1, 3, 4]);
        assert_eq!(scheduler.status_board().status(2), None);
    }

    #[test]
    fn faults_stay_inside_the_turn() {
        let fixture = Fixture::new(2);
        let mut scheduler = Scheduler::new();
        scheduler
            .register_immediate(fixture.context(1, |_: &mut WorldHandle| -> anyhow::Result<()> {
                panic!("agent bug")
            }))
            .unwrap();
        scheduler.register_immediate(fixture.context(2, idle)).unwrap();

        let report = scheduler.run_turn(1, BUDGET).unwrap();
        assert_eq!(
            report.outcome,
            TurnOutcome::Terminated(TerminationCause::Fault("agent bug".to_owned()))
        );
        assert_eq!(
            scheduler.run_turn(2, BUDGET).unwrap().outcome,
            TurnOutcome::Yielded
        );
        assert!(matches!(
            scheduler.run_turn(1, BUDGET),
            Err(EngineError::SteppedTerminated(1))
        ));
        assert_eq!(scheduler.begin_traversal(2).unwrap(), vec![2]);
    }

    #[test]
    fn only_one_context_runs() {
        let fixture = Fixture::new(3);
        let mut scheduler = Scheduler::new();
        let board = scheduler.status_board();
        let samples = Arc::new(Mutex::new(vec![]));
        for id in 1..=3 {
            let board = board.clone();
            let samples = samples.clone();
            let program = move |w: &mut WorldHandle| -> anyhow::Result<()> {
                loop {
                    samples.lock().unwrap().push(board.running_count());
                    w.end_turn();
                }
            };
            scheduler.register_immediate(fixture.context(id, program)).unwrap();
        }
        for _ in 0..5 {
            for id in scheduler.order() {
                scheduler.run_turn(id, BUDGET).unwrap();
                assert_eq!(board.running_count(), 0);
            }
        }
        let samples = samples.lock().unwrap();
        assert_eq!(samples.len(), 15);
        assert!(samples.iter().all(|&n| n == 1));
    }

    #[test]
    fn shutdown_terminates_everything() {
        let fixture = Fixture::new(2);
        let mut scheduler = Scheduler::new();
        scheduler.register_immediate(fixture.context(1, idle)).unwrap();
        scheduler.register(fixture.context(2, idle)).unwrap();
        let board = scheduler.status_board();
        scheduler.shutdown();
        assert!(scheduler.order().is_empty());
        assert_eq!(board.status(1), None);
        assert_eq!(board.running_count(), 0);
    }
}
