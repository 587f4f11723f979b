//! SQLite schema for the logistics store.

use rusqlite::{Connection, OptionalExtension, Transaction};

use super::backend;
use dispatch_core::StoreError;

/// Version recorded in `store_schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Create every table and index the store needs.
///
/// Safe to call on an existing database: statements use `IF NOT EXISTS` and
/// the recorded schema version must match [`SCHEMA_VERSION`].
///
/// # Errors
///
/// [`StoreError::Backend`] when a statement fails and
/// [`StoreError::InvalidData`] when the database was created by another
/// schema version.
pub fn initialise_schema(connection: &mut Connection) -> Result<(), StoreError> {
    connection
        .pragma_update(None, "foreign_keys", true)
        .map_err(backend("enable foreign keys"))?;
    let transaction = connection
        .transaction()
        .map_err(backend("begin schema transaction"))?;
    create_region_tables(&transaction)?;
    create_run_tables(&transaction)?;
    create_availability_tables(&transaction)?;
    create_indexes(&transaction)?;
    ensure_schema_version(&transaction)?;
    transaction
        .commit()
        .map_err(backend("commit schema transaction"))
}

fn step(transaction: &Transaction<'_>, name: &'static str, sql: &str) -> Result<(), StoreError> {
    transaction.execute(sql, []).map(|_| ()).map_err(backend(name))
}

fn create_region_tables(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    step(
        transaction,
        "create service_regions",
        "CREATE TABLE IF NOT EXISTS service_regions (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            iana_time_zone_name TEXT NOT NULL
        )",
    )?;
    step(
        transaction,
        "create optimizer_configs",
        "CREATE TABLE IF NOT EXISTS optimizer_configs (
            id INTEGER PRIMARY KEY,
            config_version TEXT NOT NULL DEFAULT '',
            termination_duration_ms INTEGER NOT NULL,
            per_visit_revenue_usd_cents INTEGER NOT NULL,
            app_hourly_cost_usd_cents INTEGER NOT NULL,
            dhmt_hourly_cost_usd_cents INTEGER NOT NULL,
            include_intermediate_infeasible_solutions INTEGER NOT NULL DEFAULT 0
        )",
    )?;
    step(
        transaction,
        "create region_snapshots",
        "CREATE TABLE IF NOT EXISTS region_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            service_region_id INTEGER NOT NULL REFERENCES service_regions(id),
            service_date TEXT NOT NULL,
            snapshot_timestamp_sec INTEGER NOT NULL,
            open_start_timestamp_sec INTEGER NOT NULL,
            open_end_timestamp_sec INTEGER NOT NULL,
            description TEXT NOT NULL,
            check_locations TEXT NOT NULL DEFAULT '[]',
            CHECK (open_end_timestamp_sec >= open_start_timestamp_sec)
        )",
    )
}

fn create_run_tables(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    step(
        transaction,
        "create optimizer_runs",
        "CREATE TABLE IF NOT EXISTS optimizer_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_type TEXT NOT NULL,
            service_region_id INTEGER NOT NULL,
            service_date TEXT NOT NULL,
            open_start_timestamp_sec INTEGER NOT NULL,
            open_end_timestamp_sec INTEGER NOT NULL,
            earliest_distance_timestamp_sec INTEGER NOT NULL,
            latest_distance_timestamp_sec INTEGER NOT NULL,
            snapshot_timestamp_sec INTEGER NOT NULL,
            optimizer_config_id INTEGER NOT NULL,
            service_version TEXT NOT NULL,
            constraint_config TEXT,
            optimizer_settings TEXT
        )",
    )?;
    step(
        transaction,
        "create optimizer_run_errors",
        "CREATE TABLE IF NOT EXISTS optimizer_run_errors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            optimizer_run_id INTEGER NOT NULL REFERENCES optimizer_runs(id) ON DELETE CASCADE,
            error_source_id INTEGER NOT NULL,
            message TEXT NOT NULL
        )",
    )?;
    step(
        transaction,
        "create schedules",
        "CREATE TABLE IF NOT EXISTS schedules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            optimizer_run_id INTEGER NOT NULL REFERENCES optimizer_runs(id) ON DELETE CASCADE,
            service_region_id INTEGER NOT NULL,
            optimizer_version TEXT NOT NULL,
            is_valid INTEGER NOT NULL,
            hard_score INTEGER NOT NULL,
            unassigned_visits_score INTEGER NOT NULL,
            soft_score INTEGER NOT NULL,
            newly_unassigned_visits INTEGER NOT NULL,
            solution TEXT NOT NULL
        )",
    )?;
    step(
        transaction,
        "create schedule_visits",
        "CREATE TABLE IF NOT EXISTS schedule_visits (
            schedule_id INTEGER NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
            visit_id INTEGER NOT NULL,
            shift_team_id INTEGER NOT NULL,
            arrival_timestamp_sec INTEGER NOT NULL,
            availability_visit_id INTEGER,
            PRIMARY KEY (schedule_id, visit_id)
        ) WITHOUT ROWID",
    )
}

fn create_availability_tables(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    step(
        transaction,
        "create attributes",
        "CREATE TABLE IF NOT EXISTS attributes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE CHECK (length(trim(name)) > 0)
        )",
    )?;
    step(
        transaction,
        "create availability_visit_sets",
        "CREATE TABLE IF NOT EXISTS availability_visit_sets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            service_region_id INTEGER NOT NULL
        )",
    )?;
    step(
        transaction,
        "create availability_visits",
        "CREATE TABLE IF NOT EXISTS availability_visits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            visit_set_id INTEGER NOT NULL
                REFERENCES availability_visit_sets(id) ON DELETE CASCADE,
            service_region_id INTEGER NOT NULL,
            location_id INTEGER NOT NULL,
            service_duration_sec INTEGER NOT NULL
        )",
    )?;
    step(
        transaction,
        "create availability_visit_attributes",
        "CREATE TABLE IF NOT EXISTS availability_visit_attributes (
            availability_visit_id INTEGER NOT NULL
                REFERENCES availability_visits(id) ON DELETE CASCADE,
            attribute_id INTEGER NOT NULL REFERENCES attributes(id),
            PRIMARY KEY (availability_visit_id, attribute_id)
        ) WITHOUT ROWID",
    )
}

fn create_indexes(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    step(
        transaction,
        "index region_snapshots",
        "CREATE INDEX IF NOT EXISTS idx_region_snapshots_lookup
            ON region_snapshots(service_region_id, service_date, snapshot_timestamp_sec)",
    )?;
    step(
        transaction,
        "index optimizer_runs",
        "CREATE INDEX IF NOT EXISTS idx_optimizer_runs_lookup
            ON optimizer_runs(service_region_id, service_date, run_type, id)",
    )?;
    step(
        transaction,
        "index schedules",
        "CREATE INDEX IF NOT EXISTS idx_schedules_run ON schedules(optimizer_run_id)",
    )?;
    step(
        transaction,
        "index availability_visits",
        "CREATE INDEX IF NOT EXISTS idx_availability_visits_set
            ON availability_visits(service_region_id, visit_set_id)",
    )
}

fn ensure_schema_version(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    step(
        transaction,
        "create store_schema_version",
        "CREATE TABLE IF NOT EXISTS store_schema_version (version INTEGER NOT NULL)",
    )?;
    let existing: Option<i64> = transaction
        .query_row("SELECT version FROM store_schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(backend("read schema version"))?;
    match existing {
        None => transaction
            .execute(
                "INSERT INTO store_schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )
            .map(|_| ())
            .map_err(backend("record schema version")),
        Some(version) if version == SCHEMA_VERSION => Ok(()),
        Some(version) => Err(StoreError::InvalidData {
            message: format!("schema version {version} found, expected {SCHEMA_VERSION}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn table_names(connection: &Connection) -> Vec<String> {
        let mut statement = connection
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .expect("prepare");
        statement
            .query_map([], |row| row.get(0))
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("collect")
    }

    #[rstest]
    fn creates_every_table_idempotently() {
        let mut connection = Connection::open_in_memory().expect("open");
        initialise_schema(&mut connection).expect("first initialise");
        initialise_schema(&mut connection).expect("second initialise");

        let tables = table_names(&connection);
        for expected in [
            "attributes",
            "availability_visit_attributes",
            "availability_visit_sets",
            "availability_visits",
            "optimizer_configs",
            "optimizer_run_errors",
            "optimizer_runs",
            "region_snapshots",
            "schedule_visits",
            "schedules",
            "service_regions",
            "store_schema_version",
        ] {
            assert!(tables.iter().any(|name| name == expected), "{expected}");
        }
    }

    #[rstest]
    fn rejects_other_schema_versions() {
        let mut connection = Connection::open_in_memory().expect("open");
        initialise_schema(&mut connection).expect("initialise");
        connection
            .execute("UPDATE store_schema_version SET version = 99", [])
            .expect("bump version");

        let err = initialise_schema(&mut connection).expect_err("version mismatch");
        assert!(matches!(err, StoreError::InvalidData { .. }));
    }
}
