//! Recursive feasibility evaluation.
//!
//! A [`FeasibilityTree`] encodes a feasibility question as tree shape. Leaves
//! hold one routing problem each; branches combine their children's outcomes:
//!
//! 1. An infeasible child that propagates makes the branch infeasible and
//!    propagating.
//! 2. Otherwise a partially feasible child, or a mix of feasible and
//!    infeasible children, makes the branch partially feasible with the
//!    branch's reason code. A partially feasible child's own code replaces
//!    it; the rightmost such child wins.
//! 3. Otherwise any feasible child makes the branch feasible.
//! 4. Otherwise the branch is infeasible and propagates when it is itself
//!    marked to.
//!
//! A branch without children is feasible.

use dispatch_core::{
    NewOptimizerRun, OptimizerRunType, OptimizerSettings, SolveVrpRequest, VrpScore,
};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, try_join_all};

use crate::SolveError;
use crate::pipeline::{FeasibilitySolver, SolveVrpParams};

/// Reason a question is only partially feasible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartialFeasibility {
    /// Only some arrival times fit.
    LimitedTime,
    /// Only some locations fit.
    LimitedLocation,
    /// Capacity is constrained.
    LimitedCapacity,
    /// Only some service durations fit.
    LimitedDuration,
    /// Any other reason.
    Other,
}

/// Result of a feasibility question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeasibilityStatus {
    /// No determination.
    #[default]
    Unspecified,
    /// The work fits.
    Feasible,
    /// The work does not fit.
    Infeasible,
    /// Some of the work fits.
    PartiallyFeasible(PartialFeasibility),
}

/// Scores and optional problem dump for one evaluated leaf.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VrpDebugData {
    /// Hard constraint score.
    pub hard_score: i64,
    /// Unassigned visit score.
    pub unassigned_visits_score: i64,
    /// Optimizer explanation of the score.
    pub debug_explanation: Option<String>,
    /// Serialised request, when debug marshalling is enabled.
    pub problem_json: Option<String>,
}

/// Diagnostics gathered during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diagnostics {
    /// One record per evaluated leaf, in tree order.
    pub debug_data: Vec<VrpDebugData>,
    /// Run of the evaluated leaf; branches leave this empty.
    pub optimizer_run_id: Option<i64>,
}

/// Outcome of evaluating a [`FeasibilityTree`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeasibilityOutcome {
    /// Combined status.
    pub status: FeasibilityStatus,
    /// Combined diagnostics.
    pub diagnostics: Diagnostics,
    pub(crate) propagate_infeasibility: bool,
    pub(crate) partial_status: FeasibilityStatus,
}

impl FeasibilityOutcome {
    const fn with_status(status: FeasibilityStatus) -> Self {
        Self {
            status,
            diagnostics: Diagnostics {
                debug_data: Vec::new(),
                optimizer_run_id: None,
            },
            propagate_infeasibility: false,
            partial_status: FeasibilityStatus::Unspecified,
        }
    }

    /// Whether this infeasible outcome forces its ancestors to be infeasible.
    #[must_use]
    pub const fn propagates_infeasibility(&self) -> bool {
        self.propagate_infeasibility
    }
}

/// Everything needed to submit one leaf problem.
#[derive(Debug, Clone)]
pub struct SolveVrpInput {
    /// The request.
    pub request: SolveVrpRequest,
    /// Run template the leaf is recorded under.
    pub optimizer_run: NewOptimizerRun,
    /// Region settings recorded with the run.
    pub optimizer_settings: Option<OptimizerSettings>,
}

/// A feasibility question as a tree of routing problems.
#[derive(Debug, Clone)]
pub enum FeasibilityTree {
    /// A single problem to solve.
    Leaf {
        /// The problem.
        input: Box<SolveVrpInput>,
        /// An infeasible result forces every ancestor to be infeasible.
        propagate_infeasibility: bool,
    },
    /// A combination of subtrees.
    Branch {
        /// Subtrees, evaluated concurrently and combined in order.
        children: Vec<FeasibilityTree>,
        /// Status reported when the children disagree.
        partially_feasible: FeasibilityStatus,
        /// An infeasible result forces every ancestor to be infeasible.
        propagate_infeasibility: bool,
    },
}

impl FeasibilityTree {
    /// A leaf solving `input`.
    #[must_use]
    pub fn leaf(input: SolveVrpInput) -> Self {
        Self::Leaf {
            input: Box::new(input),
            propagate_infeasibility: false,
        }
    }

    /// A branch combining `children`.
    #[must_use]
    pub const fn branch(partially_feasible: FeasibilityStatus, children: Vec<Self>) -> Self {
        Self::Branch {
            children,
            partially_feasible,
            propagate_infeasibility: false,
        }
    }

    /// Mark this node's infeasibility as propagating to the root.
    #[must_use]
    pub fn with_propagate_infeasibility(mut self) -> Self {
        match &mut self {
            Self::Leaf {
                propagate_infeasibility,
                ..
            }
            | Self::Branch {
                propagate_infeasibility,
                ..
            } => *propagate_infeasibility = true,
        }
        self
    }

    /// Every leaf request, depth first.
    #[must_use]
    pub fn solve_vrp_requests(&self) -> Vec<&SolveVrpRequest> {
        match self {
            Self::Leaf { input, .. } => vec![&input.request],
            Self::Branch { children, .. } => children
                .iter()
                .flat_map(Self::solve_vrp_requests)
                .collect(),
        }
    }

    /// Evaluate the tree against `solver`.
    ///
    /// Children of a branch run concurrently. The first child error drops
    /// the remaining children and is returned.
    ///
    /// # Errors
    ///
    /// Returns a [`SolveError`] when a leaf cannot be submitted, the
    /// optimizer sends no solution, or the debug dump cannot be encoded. An
    /// infeasible answer is not an error.
    pub fn evaluate<'a>(
        &'a self,
        solver: &'a dyn FeasibilitySolver,
        enable_debug_marshaling: bool,
    ) -> BoxFuture<'a, Result<FeasibilityOutcome, SolveError>> {
        match self {
            Self::Leaf {
                input,
                propagate_infeasibility,
            } => evaluate_leaf(
                input,
                *propagate_infeasibility,
                solver,
                enable_debug_marshaling,
            )
            .boxed(),
            Self::Branch {
                children,
                partially_feasible,
                propagate_infeasibility,
            } => async move {
                let outcomes = try_join_all(
                    children
                        .iter()
                        .map(|child| child.evaluate(solver, enable_debug_marshaling)),
                )
                .await?;
                Ok(combine(outcomes, *partially_feasible, *propagate_infeasibility))
            }
            .boxed(),
        }
    }
}

/// Valid, with no hard violations and nothing left unassigned.
#[must_use]
pub const fn is_feasible_score(score: &VrpScore) -> bool {
    score.is_valid && score.hard_score == 0 && score.unassigned_visits_score == 0
}

async fn evaluate_leaf(
    input: &SolveVrpInput,
    propagate_infeasibility: bool,
    solver: &dyn FeasibilitySolver,
    enable_debug_marshaling: bool,
) -> Result<FeasibilityOutcome, SolveError> {
    if input.request.problem.description.shift_teams.is_empty() {
        return Ok(FeasibilityOutcome::with_status(FeasibilityStatus::Infeasible));
    }

    let params = SolveVrpParams::new(
        OptimizerRunType::FeasibilityCheck,
        input.request.clone(),
        input.optimizer_run.clone(),
    )
    .with_optimizer_settings(input.optimizer_settings.clone())
    .with_write_to_database(true);
    let mut responses = solver.solve_vrp(params).await?;
    let wrapped = responses.recv().await.ok_or(SolveError::EmptyResponse)?;

    let score = &wrapped.response.solution.score;
    let problem_json = if enable_debug_marshaling {
        Some(serde_json::to_string(&input.request).map_err(SolveError::MarshalProblem)?)
    } else {
        None
    };
    let status = if is_feasible_score(score) {
        FeasibilityStatus::Feasible
    } else {
        FeasibilityStatus::Infeasible
    };

    Ok(FeasibilityOutcome {
        status,
        diagnostics: Diagnostics {
            debug_data: vec![VrpDebugData {
                hard_score: score.hard_score,
                unassigned_visits_score: score.unassigned_visits_score,
                debug_explanation: score.debug_explanation.clone(),
                problem_json,
            }],
            optimizer_run_id: wrapped.optimizer_run_id,
        },
        propagate_infeasibility,
        partial_status: FeasibilityStatus::Unspecified,
    })
}

fn combine(
    outcomes: Vec<FeasibilityOutcome>,
    partially_feasible: FeasibilityStatus,
    propagate_infeasibility: bool,
) -> FeasibilityOutcome {
    if outcomes.is_empty() {
        return FeasibilityOutcome::with_status(FeasibilityStatus::Feasible);
    }

    let mut has_feasible = false;
    let mut has_infeasible = false;
    let mut has_partial = false;
    let mut has_infeasible_override = false;
    let mut partial_status = partially_feasible;
    let mut debug_data = Vec::new();

    for outcome in outcomes {
        match outcome.status {
            FeasibilityStatus::Feasible => has_feasible = true,
            FeasibilityStatus::Infeasible => {
                // Diagnostics from later siblings are still collected.
                has_infeasible_override |= outcome.propagate_infeasibility;
                has_infeasible = true;
            }
            FeasibilityStatus::Unspecified | FeasibilityStatus::PartiallyFeasible(_) => {
                has_partial = true;
                if outcome.partial_status != FeasibilityStatus::Unspecified {
                    partial_status = outcome.partial_status;
                }
            }
        }
        debug_data.extend(outcome.diagnostics.debug_data);
    }

    let diagnostics = Diagnostics {
        debug_data,
        optimizer_run_id: None,
    };
    if has_infeasible_override {
        return FeasibilityOutcome {
            status: FeasibilityStatus::Infeasible,
            diagnostics,
            propagate_infeasibility: true,
            partial_status: FeasibilityStatus::Unspecified,
        };
    }
    if has_partial || (has_feasible && has_infeasible) {
        return FeasibilityOutcome {
            status: partial_status,
            diagnostics,
            propagate_infeasibility: false,
            partial_status,
        };
    }
    if has_feasible {
        return FeasibilityOutcome {
            status: FeasibilityStatus::Feasible,
            diagnostics,
            propagate_infeasibility: false,
            partial_status: FeasibilityStatus::Unspecified,
        };
    }
    FeasibilityOutcome {
        status: FeasibilityStatus::Infeasible,
        diagnostics,
        propagate_infeasibility,
        partial_status: FeasibilityStatus::Unspecified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FEASIBLE: FeasibilityStatus = FeasibilityStatus::Feasible;
    const INFEASIBLE: FeasibilityStatus = FeasibilityStatus::Infeasible;
    const LIMITED_TIME: FeasibilityStatus =
        FeasibilityStatus::PartiallyFeasible(PartialFeasibility::LimitedTime);
    const LIMITED_LOCATION: FeasibilityStatus =
        FeasibilityStatus::PartiallyFeasible(PartialFeasibility::LimitedLocation);

    fn outcome(status: FeasibilityStatus, propagate: bool) -> FeasibilityOutcome {
        FeasibilityOutcome {
            propagate_infeasibility: propagate,
            partial_status: match status {
                FeasibilityStatus::PartiallyFeasible(_) => status,
                _ => FeasibilityStatus::Unspecified,
            },
            ..FeasibilityOutcome::with_status(status)
        }
    }

    fn score(
        is_valid: bool,
        hard_score: i64,
        unassigned_visits_score: i64,
        soft_score: i64,
    ) -> VrpScore {
        VrpScore {
            is_valid,
            hard_score,
            unassigned_visits_score,
            soft_score,
            debug_explanation: None,
        }
    }

    #[rstest]
    #[case(score(true, 0, 0, 0), true)]
    #[case(score(true, 0, 0, -50_000), true)]
    #[case(score(true, 0, 0, 12), true)]
    #[case(score(false, 0, 0, 0), false)]
    #[case(score(true, -1, 0, 0), false)]
    #[case(score(true, 0, -3, 0), false)]
    fn feasible_score_ignores_soft_score(#[case] score: VrpScore, #[case] expected: bool) {
        assert_eq!(is_feasible_score(&score), expected);
    }

    #[rstest]
    fn empty_branch_is_feasible() {
        let combined = combine(Vec::new(), LIMITED_TIME, true);
        assert_eq!(combined.status, FeasibilityStatus::Feasible);
        assert!(!combined.propagates_infeasibility());
    }

    #[rstest]
    #[case(vec![FEASIBLE, FEASIBLE], FEASIBLE)]
    #[case(vec![INFEASIBLE, INFEASIBLE], INFEASIBLE)]
    #[case(vec![FEASIBLE, INFEASIBLE], LIMITED_TIME)]
    #[case(vec![FEASIBLE, LIMITED_LOCATION], LIMITED_LOCATION)]
    fn combines_non_propagating_children(
        #[case] statuses: Vec<FeasibilityStatus>,
        #[case] expected: FeasibilityStatus,
    ) {
        let outcomes = statuses.into_iter().map(|s| outcome(s, false)).collect();
        assert_eq!(combine(outcomes, LIMITED_TIME, false).status, expected);
    }

    #[rstest]
    fn rightmost_partial_child_wins() {
        let outcomes = vec![
            outcome(LIMITED_LOCATION, false),
            outcome(
                FeasibilityStatus::PartiallyFeasible(PartialFeasibility::LimitedCapacity),
                false,
            ),
        ];
        assert_eq!(
            combine(outcomes, LIMITED_TIME, false).status,
            FeasibilityStatus::PartiallyFeasible(PartialFeasibility::LimitedCapacity)
        );
    }

    #[rstest]
    fn propagating_child_overrides_partial_siblings() {
        let outcomes = vec![
            outcome(FeasibilityStatus::Feasible, false),
            outcome(LIMITED_LOCATION, false),
            outcome(FeasibilityStatus::Infeasible, true),
        ];
        let combined = combine(outcomes, LIMITED_TIME, false);
        assert_eq!(combined.status, FeasibilityStatus::Infeasible);
        assert!(combined.propagates_infeasibility());
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn all_infeasible_inherits_branch_flag(#[case] propagate: bool) {
        let outcomes = vec![outcome(FeasibilityStatus::Infeasible, false)];
        let combined = combine(outcomes, LIMITED_TIME, propagate);
        assert_eq!(combined.status, FeasibilityStatus::Infeasible);
        assert_eq!(combined.propagates_infeasibility(), propagate);
    }

    #[rstest]
    fn concatenates_debug_data_in_child_order() {
        let mut first = outcome(FeasibilityStatus::Feasible, false);
        first.diagnostics.debug_data.push(VrpDebugData {
            hard_score: 1,
            ..VrpDebugData::default()
        });
        let mut second = outcome(FeasibilityStatus::Feasible, false);
        second.diagnostics.debug_data.push(VrpDebugData {
            hard_score: 2,
            ..VrpDebugData::default()
        });
        let combined = combine(vec![first, second], LIMITED_TIME, false);
        let hard_scores: Vec<i64> = combined
            .diagnostics
            .debug_data
            .iter()
            .map(|data| data.hard_score)
            .collect();
        assert_eq!(hard_scores, [1, 2]);
    }
}
