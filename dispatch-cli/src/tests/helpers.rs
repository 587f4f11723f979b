//! Test helpers for building scratch databases, settings files and bundles.

use super::*;
use crate::import::ImportBundle;
use chrono::NaiveDate;
use dispatch_core::{
    Location, OptimizerConfig, ServiceRegion, ShiftTeam, TimeWindow, Visit, VrpDescription,
};
use dispatch_data::RegionSnapshot;
use std::fs;
use tempfile::TempDir;

pub(super) const REGION_ID: i64 = 5;
pub(super) const CONFIG_ID: i64 = 1;
pub(super) const OPEN_START: i64 = 1_717_236_000;
pub(super) const OPEN_END: i64 = OPEN_START + 8 * 3_600;

/// A temporary directory addressed with UTF-8 paths.
#[derive(Debug)]
pub(super) struct Workspace {
    _tmp: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf-8 workspace");
        Self { _tmp: tmp, root }
    }

    pub(super) fn path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    pub(super) fn database(&self) -> Utf8PathBuf {
        self.path("state/dispatch.sqlite")
    }
}

pub(super) fn write_utf8(path: &Utf8Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent directory");
    }
    fs::write(path, contents).expect("write file");
}

pub(super) fn service_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date")
}

pub(super) fn denver_region() -> ServiceRegion {
    ServiceRegion {
        id: REGION_ID,
        name: "Denver".to_owned(),
        iana_time_zone_name: "America/Denver".to_owned(),
    }
}

pub(super) fn optimizer_config() -> OptimizerConfig {
    OptimizerConfig {
        id: CONFIG_ID,
        config_version: "v1".to_owned(),
        termination_duration_ms: 5_000,
        ..OptimizerConfig::default()
    }
}

pub(super) fn snapshot(service_region_id: i64) -> RegionSnapshot {
    let location = |id| Location {
        id,
        latitude_e6: 39_739_236,
        longitude_e6: -104_990_251,
    };
    RegionSnapshot {
        service_region_id,
        service_date: service_date(),
        snapshot_timestamp_sec: OPEN_START - 1_800,
        open_hours: TimeWindow::new(OPEN_START, OPEN_END),
        description: VrpDescription {
            shift_teams: vec![ShiftTeam {
                id: 1,
                depot_location_id: 10,
                available_time_window: TimeWindow::new(OPEN_START, OPEN_END),
                attributes: Vec::new(),
                route: None,
            }],
            visits: vec![Visit {
                id: 2,
                location_id: 20,
                service_duration_sec: 1_800,
                ..Visit::default()
            }],
            locations: vec![location(10), location(20)],
            ..VrpDescription::default()
        },
        check_locations: Vec::new(),
    }
}

/// One region, its optimizer config and a snapshot.
pub(super) fn bundle() -> ImportBundle {
    ImportBundle {
        service_regions: vec![denver_region()],
        optimizer_configs: vec![optimizer_config()],
        attributes: vec!["skill:ems".to_owned()],
        snapshots: vec![snapshot(REGION_ID)],
    }
}

pub(super) fn write_bundle(path: &Utf8Path, bundle: &ImportBundle) {
    let payload = serde_json::to_vec_pretty(bundle).expect("serialize bundle");
    write_utf8(path, &payload);
}

/// Settings optimizing the Denver region for `horizon_days` days.
pub(super) fn write_settings(path: &Utf8Path, horizon_days: i64) {
    let payload = serde_json::json!({
        "optimizer": {
            "5": {
                "optimize_horizon_days": horizon_days,
                "optimizer_config_id": CONFIG_ID,
            }
        },
        "availability": {}
    });
    write_utf8(path, payload.to_string().as_bytes());
}
