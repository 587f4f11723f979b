//! Per-run metrics logged after every instance cycle.

use std::fmt;
use std::time::Duration;

use dispatch_core::{RunInstanceKey, VrpDescription, VrpScore};
use dispatch_solver::WrappedSolveVrpResponse;

/// Log target carrying run metrics.
pub const METRICS_TARGET: &str = "dispatch_runner::metrics";

/// Output of one schedule or availability run.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    /// The problem as built, before probes or solving.
    pub original_description: VrpDescription,
    /// Every response received, in stream order.
    pub responses: Vec<WrappedSolveVrpResponse>,
}

/// Counters describing the final solution of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolutionMetrics {
    /// Shift teams in the original problem.
    pub shift_teams: usize,
    /// Visits in the original problem.
    pub visits: usize,
    /// Visits left unassigned by the last solution.
    pub unassigned_visits: usize,
    /// Pinned visits in the last solution.
    pub pinned_visits: usize,
    /// Whether the last solution is feasible.
    pub is_feasible: bool,
    /// Feasible solutions received.
    pub feasible_solutions: usize,
    /// Infeasible solutions received.
    pub infeasible_solutions: usize,
}

/// Metrics for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetrics {
    /// Wall time of the run.
    pub duration_ms: u128,
    /// Failure message, when the run failed.
    pub error: Option<String>,
    /// Solution counters, when any solution was received.
    pub solution: Option<SolutionMetrics>,
}

// Validity is ignored here; an invalid score can still count as placed work.
const fn is_feasible(score: &VrpScore) -> bool {
    score.hard_score == 0 && score.unassigned_visits_score == 0
}

impl RunMetrics {
    /// Summarise a finished run.
    #[must_use]
    pub fn from_run(
        result: Option<&RunResult>,
        error: Option<&dyn std::error::Error>,
        elapsed: Duration,
    ) -> Self {
        let solution = result.and_then(|run| {
            let last = run.responses.last()?;
            let description = &last.response.solution.description;
            let feasible_solutions = run
                .responses
                .iter()
                .filter(|wrapped| is_feasible(&wrapped.response.solution.score))
                .count();
            Some(SolutionMetrics {
                shift_teams: run.original_description.shift_teams.len(),
                visits: run.original_description.visits.len(),
                unassigned_visits: description.unassigned_visits.len(),
                pinned_visits: description.pinned_visit_count(),
                is_feasible: is_feasible(&last.response.solution.score),
                feasible_solutions,
                infeasible_solutions: run.responses.len() - feasible_solutions,
            })
        });
        Self {
            duration_ms: elapsed.as_millis(),
            error: error.map(ToString::to_string),
            solution,
        }
    }

    /// Emit the metrics as one log line.
    pub fn log(&self, run: &str, key: &RunInstanceKey) {
        log::info!(target: METRICS_TARGET, "run={run} instance={key} {self}");
    }
}

impl fmt::Display for RunMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "duration_ms={}", self.duration_ms)?;
        if let Some(error) = &self.error {
            write!(f, " error={error:?}")?;
        }
        if let Some(solution) = &self.solution {
            write!(
                f,
                " shift_teams={} visits={} unassigned_visits={} pinned_visits={} \
                 is_feasible={} feasible_solutions={} infeasible_solutions={}",
                solution.shift_teams,
                solution.visits,
                solution.unassigned_visits,
                solution.pinned_visits,
                solution.is_feasible,
                solution.feasible_solutions,
                solution.infeasible_solutions,
            )?;
        }
        Ok(())
    }
}
