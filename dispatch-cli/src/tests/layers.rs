//! Configuration layering tests for the subcommand arguments.

use super::*;
use ortho_config::MergeComposer;
use rstest::rstest;
use serde_json::json;
use std::time::Duration;

#[rstest]
fn run_layers_honour_precedence() {
    let mut composer = MergeComposer::new();
    composer.push_file(
        json!({
            "database": "from-file.sqlite",
            "optimizer_url": "http://from-file:8181",
            "settings_poll_interval_sec": 30,
        }),
        None,
    );
    composer.push_environment(json!({
        "database": "from-env.sqlite",
        "settings": "from-env.json",
    }));
    composer.push_cli(json!({
        "settings": "from-cli.json",
        "availability_debug": true,
    }));

    let config = crate::run::config_from_layers_for_test(composer.layers())
        .expect("merged config should build");

    assert_eq!(config.database, Utf8PathBuf::from("from-env.sqlite"));
    assert_eq!(config.settings, Utf8PathBuf::from("from-cli.json"));
    assert_eq!(config.optimizer_url, "http://from-file:8181");
    assert_eq!(config.settings_poll_interval, Duration::from_secs(30));
    assert!(config.availability_debug);
}

#[rstest]
fn run_layers_map_configuration_errors() {
    let mut composer = MergeComposer::new();
    composer.push_cli(json!({ "settings_poll_interval_sec": "soon" }));

    let err = crate::run::config_from_layers_for_test(composer.layers())
        .expect_err("invalid config layer should map to CliError::Configuration");
    match err {
        CliError::Configuration(_) => {}
        other => panic!("expected CliError::Configuration, found {other:?}"),
    }
}

#[rstest]
fn plan_layers_parse_the_configured_instant() {
    let mut composer = MergeComposer::new();
    composer.push_file(
        json!({
            "database": "dispatch.sqlite",
            "settings": "settings.json",
            "at": "2024-06-01T18:00:00Z",
        }),
        None,
    );

    let config = crate::plan::config_from_layers_for_test(composer.layers())
        .expect("merged config should build");

    assert_eq!(config.at.timestamp(), 1_717_264_800);
    assert_eq!(config.optimizer_url, crate::plan::DEFAULT_OPTIMIZER_URL);
}

#[rstest]
fn runs_layers_fill_region_and_limit() {
    let mut composer = MergeComposer::new();
    composer.push_environment(json!({ "database": "dispatch.sqlite", "region": 5 }));
    composer.push_cli(json!({ "limit": 3 }));

    let config = crate::runs::config_from_layers_for_test(composer.layers())
        .expect("merged config should build");

    assert_eq!(config.region, Some(5));
    assert_eq!(config.limit, 3);
}

#[rstest]
fn import_layers_report_the_missing_bundle() {
    let mut composer = MergeComposer::new();
    composer.push_environment(json!({ "database": "dispatch.sqlite" }));

    let err = crate::import::config_from_layers_for_test(composer.layers())
        .expect_err("bundle path is required");
    match err {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, ARG_IMPORT_FILE);
            assert_eq!(env, ENV_IMPORT_FILE);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}
