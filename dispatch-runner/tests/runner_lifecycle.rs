//! Discovery loop lifecycle against in-memory collaborators.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use dispatch_core::test_support::{
    MemoryRegionStore, RegionFixture, ScriptedOptimizer, StaticSettingsService,
};
use dispatch_core::{
    AllSettings, OptimizerConfig, OptimizerSettings, RunInstanceKey, ServiceRegion,
};
use dispatch_runner::Runner;
use dispatch_solver::VrpSolver;
use rstest::rstest;

fn settings(horizon_days: i64) -> AllSettings {
    AllSettings {
        optimizer: BTreeMap::from([(
            1,
            OptimizerSettings {
                optimize_horizon_days: horizon_days,
                optimizer_config_id: 1,
                poll_interval_sec: 3_600,
                ..OptimizerSettings::default()
            },
        )]),
        availability: BTreeMap::new(),
    }
}

fn runner(settings_service: Arc<StaticSettingsService>) -> Arc<Runner> {
    let store = Arc::new(MemoryRegionStore::new(RegionFixture {
        regions: BTreeMap::from([(
            1,
            ServiceRegion {
                id: 1,
                name: "UTC".to_owned(),
                iana_time_zone_name: "Etc/UTC".to_owned(),
            },
        )]),
        configs: BTreeMap::from([(
            1,
            OptimizerConfig {
                id: 1,
                ..OptimizerConfig::default()
            },
        )]),
        ..RegionFixture::default()
    }));
    let solver = VrpSolver::new(Arc::new(ScriptedOptimizer::with_responses(Vec::new())));
    Arc::new(
        Runner::new(store, settings_service, Arc::new(solver))
            .with_settings_poll_interval(Duration::from_millis(10)),
    )
}

fn key(service_date: NaiveDate) -> RunInstanceKey {
    RunInstanceKey {
        service_region_id: 1,
        service_date,
        horizon_day: None,
    }
}

#[rstest]
#[tokio::test]
async fn discovery_tracks_settings_until_cancelled() {
    let settings_service = Arc::new(StaticSettingsService::new(settings(1)));
    let runner = runner(settings_service.clone());
    let handle = Arc::clone(&runner).start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let today = Utc::now().date_naive();
    assert!(runner.instances().schedule_config(&key(today)).is_some());

    settings_service.set(AllSettings::default());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(runner.instances().schedule_config(&key(today)).is_none());

    runner.shutdown().await;
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("discovery loop stops after cancellation")
        .expect("discovery loop does not panic");
}

#[rstest]
#[tokio::test]
async fn failed_polls_keep_previous_instances() {
    let settings_service = Arc::new(StaticSettingsService::new(settings(2)));
    let runner = runner(settings_service.clone());
    let started = runner
        .populate_instance_settings(Utc::now())
        .await
        .expect("first poll");
    assert_eq!(started, 2);

    settings_service.fail();
    assert!(runner.populate_instance_settings(Utc::now()).await.is_err());
    let today = Utc::now().date_naive();
    assert!(runner.instances().schedule_config(&key(today)).is_some());
    runner.shutdown().await;
}
