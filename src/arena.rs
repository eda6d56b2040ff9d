//! Host loop running a whole match.
//!
//! This module defines the [`Arena`] type, which plays matches between two teams.
//! Its responsibilities include:
//!
//! - Building a [`RoundController`] from a map, two player factories and an [`EventLog`]
//! - Enforcing limits through [`Constraints`]
//! - Calling [`RoundController::run_round`] until the match is decided
//! - Returning a [`MatchSummary`] with the outcome and every termination
//!
//! # Behavior & Configuration
//!
//! Behavior is controlled by a [`Configuration`] object:
//!
//! - When `config.verbose = true`, one progress line per round is printed on stdout, overwritten
//!   in place, followed by the outcome.
//! - When `config.log = true`, every trace of the engine is written to a timestamped log file.
//! - `config.silence_a` / `config.silence_b` drop the `say` output of a team.
//!
//! # Example
//!
//! See crate-level documentation for an example on how to use the `Arena`.

use std::fmt::Display;

use anyhow::Context;
use tracing::{info, instrument, trace};

use crate::configuration::Configuration;
use crate::constraints::Constraints;
use crate::event::EventLog;
use crate::logger::init_logger;
use crate::program::PlayerFactory;
use crate::round::{MatchOutcome, RoundController, RoundState, Termination};
use crate::world::{GameMap, Team};

/// Result of a match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchSummary {
    /// Winner, or draw.
    pub outcome: MatchOutcome,
    /// Rounds played.
    pub rounds: u32,
    /// Living robots per team at the end, team A first.
    pub survivors: [usize; 2],
    /// Contexts that terminated during their turn, in order.
    pub terminations: Vec<Termination>,
}

impl Display for MatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} after {} rounds ({}-{} robots left, {} terminated)",
            self.outcome,
            self.rounds,
            self.survivors[0],
            self.survivors[1],
            self.terminations.len()
        )
    }
}

/// Plays matches with fixed [`Configuration`] and [`Constraints`].
pub struct Arena {
    config: Configuration,
    constraints: Constraints,
}

impl Arena {
    /// Create an [`Arena`] with given [`Configuration`] and [`Constraints`].
    ///
    /// # Errors
    /// Returned when file logging is enabled and cannot be set up.
    #[instrument(skip_all)]
    pub fn new(config: Configuration, constraints: Constraints) -> anyhow::Result<Arena> {
        if config.log {
            init_logger()?;
        }

        trace!(?config, ?constraints);

        Ok(Arena {
            config,
            constraints,
        })
    }

    /// Plays a match on `map` between `team_a` and `team_b`, sending every round to `log`.
    ///
    /// Pass `&mut log` to keep ownership of the log.
    ///
    /// # Errors
    /// Returned on engine faults. Agent faults never end the match early; they show up in the
    /// summary's terminations.
    pub fn play<L: EventLog>(
        &self,
        map: &GameMap,
        team_a: Box<dyn PlayerFactory>,
        team_b: Box<dyn PlayerFactory>,
        log: L,
    ) -> anyhow::Result<MatchSummary> {
        let mut controller = RoundController::new(
            map,
            team_a,
            team_b,
            self.config,
            self.constraints.clone(),
            log,
        )
        .context("starting match")?;

        if self.config.verbose {
            disable_line_wrap();
        }
        let result = self.run(&mut controller);
        if self.config.verbose {
            enable_line_wrap();
        }
        let outcome = result?;

        let summary = {
            let world = controller.world();
            MatchSummary {
                outcome,
                rounds: controller.round(),
                survivors: Team::ALL.map(|team| world.robot_count(team)),
                terminations: controller.terminations().to_vec(),
            }
        };
        controller.shutdown();

        info!(%summary, "match finished");
        if self.config.verbose {
            print_summary(&summary);
        }
        Ok(summary)
    }

    fn run<L: EventLog>(&self, controller: &mut RoundController<L>) -> anyhow::Result<MatchOutcome> {
        loop {
            let state = controller
                .run_round()
                .with_context(|| format!("round {}", controller.round()))?;
            if self.config.verbose {
                print_progress(controller);
            }
            if let RoundState::Finished(outcome) = state {
                return Ok(outcome);
            }
        }
    }
}

fn print_progress<L: EventLog>(controller: &RoundController<L>) {
    let world = controller.world();
    // clear, green, default, start of line
    print!(
        "\x1b[2K\x1b[32mRound {}:\x1b[39m A {} robots, {} resources | B {} robots, {} resources\x1b[0G",
        controller.round(),
        world.robot_count(Team::A),
        world.resources(Team::A),
        world.robot_count(Team::B),
        world.resources(Team::B),
    );
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

fn print_summary(summary: &MatchSummary) {
    // clear line, green outcome, red terminations
    println!("\x1b[2K\x1b[32m{summary}\x1b[39m");
    for t in &summary.terminations {
        println!(
            "\x1b[31mround {}: robot {} (team {}) {}\x1b[39m",
            t.round, t.id, t.team, t.cause
        );
    }
}

fn disable_line_wrap() {
    print!("\x1b[?7l");
}

fn enable_line_wrap() {
    print!("\x1b[?7h");
}
