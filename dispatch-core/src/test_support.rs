//! In-memory collaborators used by unit and behaviour tests.
//!
//! None of these types talk to a real optimizer, database or routing service;
//! they replay scripted answers and record what they were asked.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use futures_util::stream::{self, StreamExt};

use crate::availability::{
    AvailabilityVisit, AvailabilityVisitAttributes, Attribute, SimpleAvailabilityVisit,
};
use crate::optimizer::{OptimizerClient, OptimizerError, SolutionStream};
use crate::route::{LatLng, Polyline, RouteError, RouteProvider};
use crate::run::{OptimizerConfig, OptimizerRun, RunErrorSource, ServiceRegion};
use crate::settings::{AllSettings, SettingsError, SettingsService};
use crate::store::{
    AddOptimizerRunParams, CheckFeasibilityData, CheckFeasibilityDiagnostics, NewInfo,
    NewInfoParams, RegionStore, RunStore, ServiceRegionVrpData, ServiceRegionVrpDataParams,
    StoreError, VrpProblemData, VrpProblemParams, WriteScheduleParams,
    add_unrequested_rest_breaks,
};
use crate::vrp::{
    SolveVrpRequest, SolveVrpResponse, TimeWindow, VrpDescription, VrpProblem, VrpScore,
    VrpSolution,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build a response whose score has the given components.
#[must_use]
pub fn scored_response(
    is_valid: bool,
    hard_score: i64,
    unassigned_visits_score: i64,
) -> SolveVrpResponse {
    SolveVrpResponse {
        solution: VrpSolution {
            score: VrpScore {
                is_valid,
                hard_score,
                unassigned_visits_score,
                soft_score: 0,
                debug_explanation: None,
            },
            description: VrpDescription::default(),
        },
        optimizer_version: "test-optimizer".to_owned(),
    }
}

/// A feasible response carrying `description`.
#[must_use]
pub fn feasible_response(description: VrpDescription) -> SolveVrpResponse {
    let mut response = scored_response(true, 0, 0);
    response.solution.description = description;
    response
}

type ScriptedItems = Vec<Result<SolveVrpResponse, OptimizerError>>;
type Responder = dyn Fn(&SolveVrpRequest) -> Result<ScriptedItems, OptimizerError> + Send + Sync;

/// [`OptimizerClient`] replaying scripted streams.
pub struct ScriptedOptimizer {
    responder: Box<Responder>,
    requests: Mutex<Vec<SolveVrpRequest>>,
}

impl fmt::Debug for ScriptedOptimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedOptimizer")
            .field("requests", &lock(&self.requests).len())
            .finish_non_exhaustive()
    }
}

impl ScriptedOptimizer {
    /// Answer every request with the same stream items.
    #[must_use]
    pub fn with_items(items: ScriptedItems) -> Self {
        Self::with_responder(move |_| Ok(items.clone()))
    }

    /// Answer every request with the given responses.
    #[must_use]
    pub fn with_responses(responses: Vec<SolveVrpResponse>) -> Self {
        Self::with_items(responses.into_iter().map(Ok).collect())
    }

    /// Refuse every request.
    #[must_use]
    pub fn failing(error: OptimizerError) -> Self {
        Self::with_responder(move |_| Err(error.clone()))
    }

    /// Compute the stream items from the request.
    #[must_use]
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&SolveVrpRequest) -> Result<ScriptedItems, OptimizerError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<SolveVrpRequest> {
        lock(&self.requests).clone()
    }

    /// Number of requests received so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl OptimizerClient for ScriptedOptimizer {
    async fn solve_vrp(&self, request: SolveVrpRequest) -> Result<SolutionStream, OptimizerError> {
        let items = (self.responder)(&request);
        lock(&self.requests).push(request);
        Ok(stream::iter(items?).boxed())
    }
}

/// A schedule written through [`RunStore::write_schedule_for_solution`].
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenSchedule {
    /// Schedule id assigned by the store.
    pub id: i64,
    /// Run the schedule belongs to.
    pub optimizer_run_id: i64,
    /// Optimizer version.
    pub optimizer_version: String,
    /// The solution.
    pub solution: VrpSolution,
    /// Probe ids mapped at write time.
    pub availability_visit_ids: BTreeMap<i64, i64>,
}

/// A run error recorded through [`RunStore::add_optimizer_run_error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRunError {
    /// Run the error belongs to.
    pub optimizer_run_id: i64,
    /// Component that failed.
    pub source: RunErrorSource,
    /// Error message.
    pub message: String,
}

#[derive(Debug, Default)]
struct RunLedger {
    runs: Vec<OptimizerRun>,
    errors: Vec<RecordedRunError>,
    schedules: Vec<WrittenSchedule>,
}

/// In-memory [`RunStore`].
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    ledger: Mutex<RunLedger>,
    fail_schedule_writes: bool,
    fail_run_creation: bool,
}

impl MemoryRunStore {
    /// Store that rejects every schedule write.
    #[must_use]
    pub fn failing_schedule_writes() -> Self {
        Self {
            fail_schedule_writes: true,
            ..Self::default()
        }
    }

    /// Store that cannot create runs.
    #[must_use]
    pub fn failing_run_creation() -> Self {
        Self {
            fail_run_creation: true,
            ..Self::default()
        }
    }

    /// Runs recorded so far.
    #[must_use]
    pub fn runs(&self) -> Vec<OptimizerRun> {
        lock(&self.ledger).runs.clone()
    }

    /// Run errors recorded so far.
    #[must_use]
    pub fn run_errors(&self) -> Vec<RecordedRunError> {
        lock(&self.ledger).errors.clone()
    }

    /// Schedules written so far, in write order.
    #[must_use]
    pub fn schedules(&self) -> Vec<WrittenSchedule> {
        lock(&self.ledger).schedules.clone()
    }
}

fn injected(operation: &'static str) -> StoreError {
    StoreError::Backend {
        operation,
        source: "injected failure".into(),
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn add_optimizer_run(
        &self,
        params: AddOptimizerRunParams<'_>,
    ) -> Result<OptimizerRun, StoreError> {
        if self.fail_run_creation {
            return Err(injected("add optimizer run"));
        }
        let mut ledger = lock(&self.ledger);
        let id = i64::try_from(ledger.runs.len()).unwrap_or(i64::MAX) + 1;
        let run = OptimizerRun::from_new(id, params.run_type, params.run);
        ledger.runs.push(run.clone());
        Ok(run)
    }

    async fn add_optimizer_run_error(
        &self,
        optimizer_run_id: i64,
        source: RunErrorSource,
        message: &str,
    ) -> Result<(), StoreError> {
        lock(&self.ledger).errors.push(RecordedRunError {
            optimizer_run_id,
            source,
            message: message.to_owned(),
        });
        Ok(())
    }

    async fn write_schedule_for_solution(
        &self,
        params: WriteScheduleParams<'_>,
    ) -> Result<i64, StoreError> {
        if self.fail_schedule_writes {
            return Err(injected("write schedule"));
        }
        let mut ledger = lock(&self.ledger);
        let id = i64::try_from(ledger.schedules.len()).unwrap_or(i64::MAX) + 1;
        ledger.schedules.push(WrittenSchedule {
            id,
            optimizer_run_id: params.optimizer_run_id,
            optimizer_version: params.optimizer_version.to_owned(),
            solution: params.solution.clone(),
            availability_visit_ids: params.availability_visit_ids.clone(),
        });
        Ok(id)
    }
}

/// Mutable contents of a [`MemoryRegionStore`].
#[derive(Debug, Clone, Default)]
pub struct RegionFixture {
    /// Regions by id.
    pub regions: BTreeMap<i64, ServiceRegion>,
    /// Optimizer config rows by id.
    pub configs: BTreeMap<i64, OptimizerConfig>,
    /// Answer to [`RegionStore::has_new_info_since_last_run`].
    pub has_new_info: bool,
    /// Last schedule run reported with the new-info answer.
    pub last_run: Option<OptimizerRun>,
    /// Answer to [`RegionStore::has_new_schedule_since_last_availability_run`].
    pub has_new_schedule: bool,
    /// Open hours reported for every date.
    pub open_hours: TimeWindow,
    /// Description returned by [`RegionStore::create_vrp_problem`].
    pub description: VrpDescription,
    /// Check visit data returned when a check visit is requested.
    pub check_feasibility_data: Option<CheckFeasibilityData>,
    /// Diagnostics attached to check problems.
    pub check_feasibility_diagnostics: Option<CheckFeasibilityDiagnostics>,
    /// Known attributes.
    pub attributes: Vec<Attribute>,
    /// Stored probe visits, oldest set first.
    pub availability_visits: Vec<AvailabilityVisit>,
    /// Attribute ids per stored probe visit.
    pub availability_visit_attribute_ids: BTreeMap<i64, Vec<i64>>,
    /// Planned arrivals returned for any schedule.
    pub arrival_timestamps: BTreeMap<i64, i64>,
    /// Probe sets stored through [`RegionStore::add_availability_visits`].
    pub added_visit_sets: usize,
    /// Problem requests received.
    pub problem_requests: Vec<VrpProblemParams>,
}

/// In-memory [`RegionStore`] backed by a [`RegionFixture`].
#[derive(Debug, Default)]
pub struct MemoryRegionStore {
    runs: MemoryRunStore,
    fixture: Mutex<RegionFixture>,
}

impl MemoryRegionStore {
    /// Wrap a fixture.
    #[must_use]
    pub fn new(fixture: RegionFixture) -> Self {
        Self {
            runs: MemoryRunStore::default(),
            fixture: Mutex::new(fixture),
        }
    }

    /// The run ledger.
    #[must_use]
    pub const fn run_store(&self) -> &MemoryRunStore {
        &self.runs
    }

    /// Read or modify the fixture.
    pub fn with_fixture<R>(&self, f: impl FnOnce(&mut RegionFixture) -> R) -> R {
        f(&mut lock(&self.fixture))
    }
}

#[async_trait]
impl RunStore for MemoryRegionStore {
    async fn add_optimizer_run(
        &self,
        params: AddOptimizerRunParams<'_>,
    ) -> Result<OptimizerRun, StoreError> {
        self.runs.add_optimizer_run(params).await
    }

    async fn add_optimizer_run_error(
        &self,
        optimizer_run_id: i64,
        source: RunErrorSource,
        message: &str,
    ) -> Result<(), StoreError> {
        self.runs
            .add_optimizer_run_error(optimizer_run_id, source, message)
            .await
    }

    async fn write_schedule_for_solution(
        &self,
        params: WriteScheduleParams<'_>,
    ) -> Result<i64, StoreError> {
        self.runs.write_schedule_for_solution(params).await
    }
}

#[async_trait]
impl RegionStore for MemoryRegionStore {
    async fn optimizer_configs_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<Vec<OptimizerConfig>, StoreError> {
        let fixture = lock(&self.fixture);
        Ok(ids
            .iter()
            .filter_map(|id| fixture.configs.get(id).cloned())
            .collect())
    }

    async fn service_region(&self, service_region_id: i64) -> Result<ServiceRegion, StoreError> {
        lock(&self.fixture)
            .regions
            .get(&service_region_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                what: "service region",
                id: service_region_id,
            })
    }

    async fn has_new_info_since_last_run(
        &self,
        params: NewInfoParams,
    ) -> Result<NewInfo, StoreError> {
        let fixture = lock(&self.fixture);
        let region = fixture
            .regions
            .get(&params.service_region_id)
            .ok_or(StoreError::NotFound {
                what: "service region",
                id: params.service_region_id,
            })?;
        let time_zone: Tz =
            region
                .iana_time_zone_name
                .parse()
                .map_err(|_| StoreError::InvalidData {
                    message: format!("unknown time zone {}", region.iana_time_zone_name),
                })?;
        Ok(NewInfo {
            has_new_info: fixture.has_new_info,
            last_run: fixture.last_run.clone(),
            time_zone,
        })
    }

    async fn has_new_schedule_since_last_availability_run(
        &self,
        _service_region_id: i64,
        _service_date: NaiveDate,
    ) -> Result<bool, StoreError> {
        Ok(lock(&self.fixture).has_new_schedule)
    }

    async fn service_region_vrp_data(
        &self,
        params: ServiceRegionVrpDataParams,
    ) -> Result<ServiceRegionVrpData, StoreError> {
        let fixture = lock(&self.fixture);
        let check_feasibility_data = params
            .check_feasibility_visit
            .as_ref()
            .and(fixture.check_feasibility_data.clone());
        Ok(ServiceRegionVrpData {
            service_region_id: params.service_region_id,
            service_date: params.service_date,
            open_hours: fixture.open_hours,
            snapshot_timestamp_sec: params.snapshot_timestamp_sec,
            check_feasibility_data,
            capacity_settings: params.capacity_settings,
            horizon_day: params.horizon_day,
        })
    }

    async fn create_vrp_problem(
        &self,
        params: VrpProblemParams,
    ) -> Result<VrpProblemData, StoreError> {
        let mut fixture = lock(&self.fixture);
        fixture.problem_requests.push(params.clone());
        if fixture.description.is_empty() {
            return Err(StoreError::EmptyDescription);
        }
        let mut description = fixture.description.clone();
        if let Some(config) = params.unrequested_rest_break {
            add_unrequested_rest_breaks(&mut description, config);
        }
        let data = &params.vrp_data;
        let check_feasibility_diagnostics = data
            .check_feasibility_data
            .as_ref()
            .and(fixture.check_feasibility_diagnostics);
        Ok(VrpProblemData {
            problem: VrpProblem { description },
            optimizer_run: crate::run::NewOptimizerRun {
                service_region_id: data.service_region_id,
                service_date: data.service_date,
                open_hours: data.open_hours,
                earliest_distance_timestamp_sec: params.earliest_distance_timestamp_sec,
                latest_distance_timestamp_sec: data.snapshot_timestamp_sec,
                snapshot_timestamp_sec: data.snapshot_timestamp_sec,
                optimizer_config_id: 0,
                service_version: "test".to_owned(),
            },
            check_feasibility_diagnostics,
        })
    }

    async fn latest_availability_visits(
        &self,
        service_region_id: i64,
    ) -> Result<Vec<AvailabilityVisit>, StoreError> {
        let fixture = lock(&self.fixture);
        let latest_set = fixture
            .availability_visits
            .iter()
            .filter(|visit| visit.service_region_id == service_region_id)
            .map(|visit| visit.visit_set_id)
            .max();
        Ok(fixture
            .availability_visits
            .iter()
            .filter(|visit| Some(visit.visit_set_id) == latest_set)
            .cloned()
            .collect())
    }

    async fn availability_visit_attributes(
        &self,
        visit_ids: &[i64],
    ) -> Result<AvailabilityVisitAttributes, StoreError> {
        let fixture = lock(&self.fixture);
        let mut result = AvailabilityVisitAttributes::new();
        for visit_id in visit_ids {
            let ids = fixture
                .availability_visit_attribute_ids
                .get(visit_id)
                .cloned()
                .unwrap_or_default();
            let attributes = fixture
                .attributes
                .iter()
                .filter(|attribute| ids.contains(&attribute.id))
                .cloned()
                .collect();
            result.insert(*visit_id, attributes);
        }
        Ok(result)
    }

    async fn attributes_for_names(&self, names: &[String]) -> Result<Vec<Attribute>, StoreError> {
        Ok(lock(&self.fixture)
            .attributes
            .iter()
            .filter(|attribute| names.contains(&attribute.name))
            .cloned()
            .collect())
    }

    async fn add_availability_visits(
        &self,
        service_region_id: i64,
        visits: &[SimpleAvailabilityVisit],
    ) -> Result<Vec<AvailabilityVisit>, StoreError> {
        let mut fixture = lock(&self.fixture);
        let set_id = fixture
            .availability_visits
            .iter()
            .map(|visit| visit.visit_set_id)
            .max()
            .unwrap_or(0)
            + 1;
        let mut next_id = fixture
            .availability_visits
            .iter()
            .map(|visit| visit.id)
            .max()
            .unwrap_or(0);
        let mut created = Vec::with_capacity(visits.len());
        for visit in visits {
            next_id += 1;
            let stored = AvailabilityVisit {
                id: next_id,
                visit_set_id: set_id,
                service_region_id,
                location_id: visit.location_id,
                service_duration_sec: visit.duration_sec,
            };
            fixture
                .availability_visit_attribute_ids
                .insert(next_id, visit.attribute_ids.clone());
            fixture.availability_visits.push(stored.clone());
            created.push(stored);
        }
        fixture.added_visit_sets += 1;
        Ok(created)
    }

    async fn visit_arrival_timestamps_for_schedule(
        &self,
        _schedule_id: i64,
    ) -> Result<BTreeMap<i64, i64>, StoreError> {
        Ok(lock(&self.fixture).arrival_timestamps.clone())
    }
}

/// [`SettingsService`] returning whatever was last set.
#[derive(Debug, Default)]
pub struct StaticSettingsService {
    settings: Mutex<Option<AllSettings>>,
}

impl StaticSettingsService {
    /// Serve `settings` until replaced.
    #[must_use]
    pub fn new(settings: AllSettings) -> Self {
        Self {
            settings: Mutex::new(Some(settings)),
        }
    }

    /// Replace the served settings.
    pub fn set(&self, settings: AllSettings) {
        *lock(&self.settings) = Some(settings);
    }

    /// Make subsequent polls fail.
    pub fn fail(&self) {
        *lock(&self.settings) = None;
    }
}

#[async_trait]
impl SettingsService for StaticSettingsService {
    async fn all_settings(&self) -> Result<AllSettings, SettingsError> {
        lock(&self.settings)
            .clone()
            .ok_or_else(|| SettingsError::Invalid {
                message: "settings unavailable".to_owned(),
            })
    }
}

/// [`RouteProvider`] echoing its input or failing.
#[derive(Debug, Default)]
pub struct StubRouteProvider {
    error: Option<RouteError>,
    requests: Mutex<Vec<Vec<LatLng>>>,
}

impl StubRouteProvider {
    /// Provider returning the requested points as the polyline.
    #[must_use]
    pub fn echoing() -> Self {
        Self::default()
    }

    /// Provider failing every lookup.
    #[must_use]
    pub fn with_error(error: RouteError) -> Self {
        Self {
            error: Some(error),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Point lists requested so far.
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<LatLng>> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl RouteProvider for StubRouteProvider {
    async fn route_polyline(
        &self,
        points: &[LatLng],
        _tags: &BTreeMap<String, String>,
    ) -> Result<Polyline, RouteError> {
        lock(&self.requests).push(points.to_vec());
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(points.to_vec()),
        }
    }
}
