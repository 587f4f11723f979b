//! Submits one routing request and streams its solutions back.
//!
//! [`VrpSolver::solve_vrp`] opens the optimizer stream, records an optimizer
//! run when persistence is requested, and spawns a pump task. The pump wraps
//! every solution with its run id, hands it to the [`ResultCollector`],
//! resolves per-team road polylines when a [`RouteProvider`] is configured,
//! and forwards the result to the caller's channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dispatch_core::{
    AddOptimizerRunParams, AvailabilityVisitIdMap, LatLng, NewOptimizerRun, OptimizerClient,
    OptimizerRunType, OptimizerSettings, Polyline, RouteProvider, RouteStop, RunErrorSource,
    RunStore, ShiftTeam, SolutionStream, SolveVrpRequest, SolveVrpResponse, UnassignedVisit,
    VrpDescription,
};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::SolveError;
use crate::collector::{CollectorContext, ResultCollector};

/// Capacity of the channel returned by [`VrpSolver::solve_vrp`].
pub const RESPONSE_CHANNEL_CAPACITY: usize = 5;

/// Monitoring tag naming the purpose of a solve.
pub const SOLVE_VRP_USE_TAG: &str = "use";
/// Monitoring tag carrying the service region id.
pub const SERVICE_REGION_TAG: &str = "service_region";
/// Monitoring tag carrying the service date.
pub const SERVICE_DATE_TAG: &str = "service_date";
/// Format of [`SERVICE_DATE_TAG`] values.
pub const SERVICE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Purpose of a solve, reported under [`SOLVE_VRP_USE_TAG`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolveVrpUse {
    /// A feasibility check.
    Feasibility,
    /// A region schedule run.
    Schedule,
    /// A region availability run.
    Availability,
}

impl SolveVrpUse {
    /// Tag value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Feasibility => "feasibility",
            Self::Schedule => "schedule",
            Self::Availability => "availability",
        }
    }
}

/// Arguments for [`VrpSolver::solve_vrp`].
#[derive(Debug, Clone)]
pub struct SolveVrpParams {
    /// Why the optimizer is invoked.
    pub run_type: OptimizerRunType,
    /// The request to submit.
    pub request: SolveVrpRequest,
    /// Run template produced by the problem builder.
    pub optimizer_run: NewOptimizerRun,
    /// Region settings in force.
    pub optimizer_settings: Option<OptimizerSettings>,
    /// Probe id mapping for availability runs.
    pub availability_visit_ids: AvailabilityVisitIdMap,
    /// Unassigned visits of the problem before solving.
    pub previous_unassigned_visits: Vec<UnassignedVisit>,
    /// Persist the run and each solution.
    pub write_to_database: bool,
}

impl SolveVrpParams {
    /// Parameters that do not persist anything.
    #[must_use]
    pub fn new(
        run_type: OptimizerRunType,
        request: SolveVrpRequest,
        optimizer_run: NewOptimizerRun,
    ) -> Self {
        Self {
            run_type,
            request,
            optimizer_run,
            optimizer_settings: None,
            availability_visit_ids: AvailabilityVisitIdMap::new(),
            previous_unassigned_visits: Vec::new(),
            write_to_database: false,
        }
    }

    /// Attach the region settings recorded with the run.
    #[must_use]
    pub fn with_optimizer_settings(mut self, settings: Option<OptimizerSettings>) -> Self {
        self.optimizer_settings = settings;
        self
    }

    /// Attach the probe id mapping and the previously unassigned visits.
    #[must_use]
    pub fn with_availability_visits(
        mut self,
        availability_visit_ids: AvailabilityVisitIdMap,
        previous_unassigned_visits: Vec<UnassignedVisit>,
    ) -> Self {
        self.availability_visit_ids = availability_visit_ids;
        self.previous_unassigned_visits = previous_unassigned_visits;
        self
    }

    /// Persist the run and its solutions.
    #[must_use]
    pub const fn with_write_to_database(mut self, write: bool) -> Self {
        self.write_to_database = write;
        self
    }
}

/// Road polyline of one shift team's route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftTeamRoutePolyline {
    /// Team the route belongs to.
    pub shift_team_id: i64,
    /// Depot to depot through the team's visits.
    pub polyline: Polyline,
}

/// A solution together with the context added by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct WrappedSolveVrpResponse {
    /// The optimizer's message.
    pub response: SolveVrpResponse,
    /// Polylines per shift team, when a route provider is configured.
    pub route_polylines: Vec<ShiftTeamRoutePolyline>,
    /// Run the solution was recorded under, when persisted.
    pub optimizer_run_id: Option<i64>,
}

/// Anything that can turn solve parameters into a solution channel.
///
/// Implemented by [`VrpSolver`]; feasibility trees and time-window probes
/// depend on this seam rather than the concrete pipeline.
#[async_trait]
pub trait FeasibilitySolver: Send + Sync {
    /// Submit a request and return the channel of its solutions.
    async fn solve_vrp(
        &self,
        params: SolveVrpParams,
    ) -> Result<mpsc::Receiver<WrappedSolveVrpResponse>, SolveError>;
}

/// The solve pipeline.
#[derive(Clone)]
pub struct VrpSolver {
    client: Arc<dyn OptimizerClient>,
    store: Option<Arc<dyn RunStore>>,
    route_provider: Option<Arc<dyn RouteProvider>>,
}

impl std::fmt::Debug for VrpSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VrpSolver")
            .field("has_store", &self.store.is_some())
            .field("has_route_provider", &self.route_provider.is_some())
            .finish_non_exhaustive()
    }
}

impl VrpSolver {
    /// Pipeline without persistence or polylines.
    #[must_use]
    pub fn new(client: Arc<dyn OptimizerClient>) -> Self {
        Self {
            client,
            store: None,
            route_provider: None,
        }
    }

    /// Persist runs and solutions through `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Resolve route polylines through `provider`.
    #[must_use]
    pub fn with_route_provider(mut self, provider: Arc<dyn RouteProvider>) -> Self {
        self.route_provider = Some(provider);
        self
    }

    /// Submit a request and return the channel of its solutions.
    ///
    /// The channel closes when the optimizer stream ends or fails. Stream
    /// failures and write failures are recorded against the run, not
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`SolveError::OptimizerRequest`] when the stream cannot be
    /// opened and [`SolveError::AddRun`] when the run cannot be recorded.
    pub async fn solve_vrp(
        &self,
        params: SolveVrpParams,
    ) -> Result<mpsc::Receiver<WrappedSolveVrpResponse>, SolveError> {
        let SolveVrpParams {
            run_type,
            request,
            optimizer_run,
            optimizer_settings,
            availability_visit_ids,
            previous_unassigned_visits,
            write_to_database,
        } = params;
        let constraint_config = request.config.constraint_config.clone();
        let tags = polyline_tags(&optimizer_run);

        let stream = self
            .client
            .solve_vrp(request)
            .await
            .map_err(SolveError::OptimizerRequest)?;

        let collector = match &self.store {
            Some(store) if write_to_database => {
                let run = store
                    .add_optimizer_run(AddOptimizerRunParams {
                        run: &optimizer_run,
                        run_type,
                        constraint_config: constraint_config.as_ref(),
                        optimizer_settings: optimizer_settings.as_ref(),
                    })
                    .await
                    .map_err(SolveError::AddRun)?;
                log::debug!("recorded {run_type} optimizer run {}", run.id);
                Some(ResultCollector::start(
                    Arc::clone(store),
                    CollectorContext {
                        service_region_id: run.service_region_id,
                        optimizer_run_id: run.id,
                        availability_visit_ids,
                        previous_unassigned_visits,
                    },
                ))
            }
            _ => None,
        };

        let (sender, receiver) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        tokio::spawn(pump(
            stream,
            collector,
            self.route_provider.clone(),
            tags,
            sender,
        ));
        Ok(receiver)
    }
}

#[async_trait]
impl FeasibilitySolver for VrpSolver {
    async fn solve_vrp(
        &self,
        params: SolveVrpParams,
    ) -> Result<mpsc::Receiver<WrappedSolveVrpResponse>, SolveError> {
        Self::solve_vrp(self, params).await
    }
}

fn polyline_tags(run: &NewOptimizerRun) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            SERVICE_REGION_TAG.to_owned(),
            run.service_region_id.to_string(),
        ),
        (
            SERVICE_DATE_TAG.to_owned(),
            run.service_date.format(SERVICE_DATE_FORMAT).to_string(),
        ),
    ])
}

async fn pump(
    mut stream: SolutionStream,
    collector: Option<ResultCollector>,
    route_provider: Option<Arc<dyn RouteProvider>>,
    tags: BTreeMap<String, String>,
    sender: mpsc::Sender<WrappedSolveVrpResponse>,
) {
    while let Some(item) = stream.next().await {
        let response = match item {
            Ok(response) => response,
            Err(err) => {
                if let Some(collector) = &collector {
                    collector
                        .record_error(RunErrorSource::Optimizer, &err.to_string())
                        .await;
                }
                log::error!("optimizer stream ended with an error: {err}");
                break;
            }
        };

        let optimizer_run_id = collector.as_ref().map(ResultCollector::optimizer_run_id);
        if let Some(collector) = &collector {
            collector.add_result(response.clone()).await;
        }

        let route_polylines = match &route_provider {
            Some(provider) => {
                route_polylines(provider.as_ref(), &response.solution.description, &tags).await
            }
            None => Vec::new(),
        };

        let wrapped = WrappedSolveVrpResponse {
            response,
            route_polylines,
            optimizer_run_id,
        };
        if sender.send(wrapped).await.is_err() {
            log::debug!("solution receiver dropped; stopping stream");
            break;
        }
    }

    if let Some(collector) = collector {
        collector.close().await;
    }
}

async fn route_polylines(
    provider: &dyn RouteProvider,
    description: &VrpDescription,
    tags: &BTreeMap<String, String>,
) -> Vec<ShiftTeamRoutePolyline> {
    let mut polylines = Vec::new();
    for team in &description.shift_teams {
        let Some(points) = route_points(description, team) else {
            continue;
        };
        match provider.route_polyline(&points, tags).await {
            Ok(polyline) => polylines.push(ShiftTeamRoutePolyline {
                shift_team_id: team.id,
                polyline,
            }),
            Err(err) => log::warn!("no polyline for shift team {}: {err}", team.id),
        }
    }
    polylines
}

/// Depot, each visit stop in order, then the depot again.
///
/// `None` when the team has no route. Rest breaks are not part of the path.
fn route_points(description: &VrpDescription, team: &ShiftTeam) -> Option<Vec<LatLng>> {
    let route = team.route.as_ref()?;
    let point_for_location =
        |location_id: i64| description.location(location_id).map(LatLng::from);
    let depot = point_for_location(team.depot_location_id);

    let stops = route.stops.iter().filter_map(|stop| match stop {
        RouteStop::Visit { visit_id, .. } => description
            .visits
            .iter()
            .find(|visit| visit.id == *visit_id)
            .and_then(|visit| point_for_location(visit.location_id)),
        RouteStop::RestBreak { .. } => None,
    });

    Some(depot.into_iter().chain(stops).chain(depot).collect())
}
