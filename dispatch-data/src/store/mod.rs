//! SQLite-backed [`RunStore`] and [`RegionStore`].
//!
//! The module is split by concern:
//! - [`schema`] materialises the tables and records the schema version.
//! - `runs` keeps the run ledger: runs, run errors and written schedules.
//! - `region` reads region snapshots and builds problems from them.
//! - `availability` stores probe sets and their attributes.
//!
//! Every call runs on `tokio::task::spawn_blocking` against one connection
//! guarded by a mutex, so concurrent callers are serialised.

mod availability;
mod region;
mod runs;
pub mod schema;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use camino::Utf8Path;
use chrono::NaiveDate;
use dispatch_core::{
    AddOptimizerRunParams, Attribute, AvailabilityVisit, AvailabilityVisitAttributes, NewInfo,
    NewInfoParams, OptimizerConfig, OptimizerRun, RegionStore, RunErrorSource, RunStore,
    ServiceRegion, ServiceRegionVrpData, ServiceRegionVrpDataParams, SimpleAvailabilityVisit,
    StoreError, VrpProblemData, VrpProblemParams, WriteScheduleParams,
};
use rusqlite::Connection;

pub use region::{CHECK_FEASIBILITY_TEMPLATE_VISIT_ID, RegionSnapshot};
pub use runs::RunSummary;
pub use schema::{SCHEMA_VERSION, initialise_schema};

/// Service version recorded with runs when none is configured.
pub const DEFAULT_SERVICE_VERSION: &str = concat!("dispatch-data/", env!("CARGO_PKG_VERSION"));

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn backend(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |source| StoreError::Backend {
        operation,
        source: Box::new(source),
    }
}

pub(crate) fn serialization(what: &'static str) -> impl FnOnce(serde_json::Error) -> StoreError {
    move |source| StoreError::Serialization { what, source }
}

/// Logistics store persisted in a single SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteLogisticsStore {
    connection: Arc<Mutex<Connection>>,
    service_version: String,
}

impl SqliteLogisticsStore {
    /// Open (or create) the database at `path` and initialise its schema.
    ///
    /// Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Fails when the directory or database cannot be created, or when the
    /// schema cannot be initialised.
    pub fn open(path: &Utf8Path) -> Result<Self, StoreError> {
        dispatch_fs::ensure_parent_dir(path).map_err(|source| StoreError::Backend {
            operation: "create database directory",
            source: Box::new(source),
        })?;
        let connection = Connection::open(path.as_std_path()).map_err(backend("open database"))?;
        Self::from_connection(connection)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Fails when SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory().map_err(backend("open database"))?;
        Self::from_connection(connection)
    }

    fn from_connection(mut connection: Connection) -> Result<Self, StoreError> {
        initialise_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            service_version: DEFAULT_SERVICE_VERSION.to_owned(),
        })
    }

    /// Record `version` as the service version of new runs.
    #[must_use]
    pub fn with_service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    async fn call<T, F>(&self, operation: &'static str, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut guard = connection.lock().unwrap_or_else(PoisonError::into_inner);
            work(&mut guard)
        })
        .await
        .map_err(|source| StoreError::Backend {
            operation,
            source: Box::new(source),
        })?
    }

    /// Insert or replace a service region.
    ///
    /// # Errors
    ///
    /// Fails when the write fails.
    pub async fn upsert_service_region(&self, region: ServiceRegion) -> Result<(), StoreError> {
        self.call("upsert service region", move |connection| {
            region::upsert_service_region(connection, &region)
        })
        .await
    }

    /// Insert or replace an optimizer config row.
    ///
    /// # Errors
    ///
    /// Fails when the write fails.
    pub async fn upsert_optimizer_config(&self, config: OptimizerConfig) -> Result<(), StoreError> {
        self.call("upsert optimizer config", move |connection| {
            region::upsert_optimizer_config(connection, &config)
        })
        .await
    }

    /// Store a region snapshot and return its id.
    ///
    /// # Errors
    ///
    /// Fails when the region is unknown or the write fails.
    pub async fn add_region_snapshot(&self, snapshot: RegionSnapshot) -> Result<i64, StoreError> {
        self.call("add region snapshot", move |connection| {
            region::add_region_snapshot(connection, &snapshot)
        })
        .await
    }

    /// Make sure every attribute name exists and return the rows.
    ///
    /// # Errors
    ///
    /// Fails when a name is blank or the write fails.
    pub async fn ensure_attributes(&self, names: &[String]) -> Result<Vec<Attribute>, StoreError> {
        let names = names.to_vec();
        self.call("ensure attributes", move |connection| {
            availability::ensure_attributes(connection, &names)
        })
        .await
    }

    /// Most recent runs, newest first, optionally for a single region.
    ///
    /// # Errors
    ///
    /// Fails when the query fails or a stored row is malformed.
    pub async fn recent_runs(
        &self,
        service_region_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RunSummary>, StoreError> {
        self.call("list recent runs", move |connection| {
            runs::recent_runs(connection, service_region_id, limit)
        })
        .await
    }

    /// Run errors recorded against a run, oldest first.
    ///
    /// # Errors
    ///
    /// Fails when the query fails.
    pub async fn run_errors(
        &self,
        optimizer_run_id: i64,
    ) -> Result<Vec<(RunErrorSource, String)>, StoreError> {
        self.call("list run errors", move |connection| {
            runs::run_errors(connection, optimizer_run_id)
        })
        .await
    }
}

#[async_trait]
impl RunStore for SqliteLogisticsStore {
    async fn add_optimizer_run(
        &self,
        params: AddOptimizerRunParams<'_>,
    ) -> Result<OptimizerRun, StoreError> {
        let row = runs::NewRunRow::from_params(params)?;
        self.call("add optimizer run", move |connection| {
            runs::add_optimizer_run(connection, row)
        })
        .await
    }

    async fn add_optimizer_run_error(
        &self,
        optimizer_run_id: i64,
        source: RunErrorSource,
        message: &str,
    ) -> Result<(), StoreError> {
        let message = message.to_owned();
        self.call("add optimizer run error", move |connection| {
            runs::add_optimizer_run_error(connection, optimizer_run_id, source, &message)
        })
        .await
    }

    async fn write_schedule_for_solution(
        &self,
        params: WriteScheduleParams<'_>,
    ) -> Result<i64, StoreError> {
        let row = runs::ScheduleRow::from_params(params)?;
        self.call("write schedule", move |connection| {
            runs::write_schedule(connection, row)
        })
        .await
    }
}

#[async_trait]
impl RegionStore for SqliteLogisticsStore {
    async fn optimizer_configs_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<Vec<OptimizerConfig>, StoreError> {
        let ids = ids.to_vec();
        self.call("load optimizer configs", move |connection| {
            region::optimizer_configs_by_ids(connection, &ids)
        })
        .await
    }

    async fn service_region(&self, service_region_id: i64) -> Result<ServiceRegion, StoreError> {
        self.call("load service region", move |connection| {
            region::service_region(connection, service_region_id)
        })
        .await
    }

    async fn has_new_info_since_last_run(
        &self,
        params: NewInfoParams,
    ) -> Result<NewInfo, StoreError> {
        self.call("check for new info", move |connection| {
            region::has_new_info_since_last_run(connection, params)
        })
        .await
    }

    async fn has_new_schedule_since_last_availability_run(
        &self,
        service_region_id: i64,
        service_date: NaiveDate,
    ) -> Result<bool, StoreError> {
        self.call("check for new schedule", move |connection| {
            runs::has_new_schedule_since_last_availability_run(
                connection,
                service_region_id,
                service_date,
            )
        })
        .await
    }

    async fn service_region_vrp_data(
        &self,
        params: ServiceRegionVrpDataParams,
    ) -> Result<ServiceRegionVrpData, StoreError> {
        self.call("load region vrp data", move |connection| {
            region::service_region_vrp_data(connection, params)
        })
        .await
    }

    async fn create_vrp_problem(
        &self,
        params: VrpProblemParams,
    ) -> Result<VrpProblemData, StoreError> {
        let service_version = self.service_version.clone();
        self.call("create vrp problem", move |connection| {
            region::create_vrp_problem(connection, params, &service_version)
        })
        .await
    }

    async fn latest_availability_visits(
        &self,
        service_region_id: i64,
    ) -> Result<Vec<AvailabilityVisit>, StoreError> {
        self.call("load availability visits", move |connection| {
            availability::latest_availability_visits(connection, service_region_id)
        })
        .await
    }

    async fn availability_visit_attributes(
        &self,
        visit_ids: &[i64],
    ) -> Result<AvailabilityVisitAttributes, StoreError> {
        let visit_ids = visit_ids.to_vec();
        self.call("load availability visit attributes", move |connection| {
            availability::availability_visit_attributes(connection, &visit_ids)
        })
        .await
    }

    async fn attributes_for_names(&self, names: &[String]) -> Result<Vec<Attribute>, StoreError> {
        let names = names.to_vec();
        self.call("load attributes", move |connection| {
            availability::attributes_for_names(connection, &names)
        })
        .await
    }

    async fn add_availability_visits(
        &self,
        service_region_id: i64,
        visits: &[SimpleAvailabilityVisit],
    ) -> Result<Vec<AvailabilityVisit>, StoreError> {
        let visits = visits.to_vec();
        self.call("add availability visits", move |connection| {
            availability::add_availability_visits(connection, service_region_id, &visits)
        })
        .await
    }

    async fn visit_arrival_timestamps_for_schedule(
        &self,
        schedule_id: i64,
    ) -> Result<BTreeMap<i64, i64>, StoreError> {
        self.call("load visit arrivals", move |connection| {
            runs::visit_arrival_timestamps(connection, schedule_id)
        })
        .await
    }
}
