//! Tests for config loading: file, environment overrides and validation

use std::io::Write;
use std::path::Path;

use playlist_harvester::config::Config;
use playlist_harvester::models::RowShape;
use playlist_harvester::scheduler::DayAdvance;
use serial_test::serial;
use tempfile::NamedTempFile;

const ENV_VARS: &[&str] = &[
    "HARVEST_API_KEYS",
    "HARVEST_TICK_BUDGET",
    "HARVEST_CYCLE_LENGTH",
    "HARVEST_DAY_ADVANCE",
    "HARVEST_ROW_SHAPE",
    "HARVEST_CYCLE_START",
    "DATABASE_URL",
];

fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

#[test]
#[serial]
fn test_example_config_parses_and_validates() {
    clear_env();
    let config = Config::load(Some(Path::new("config.example.toml"))).unwrap();
    config.validate().unwrap();

    assert_eq!(config.scheduler.cycle_length, 29);
    assert_eq!(config.scheduler.regions.first().map(String::as_str), Some("GLOBAL"));
    assert_eq!(config.quota.costs.search, 100);
    assert_eq!(config.pipeline.row_shape, RowShape::Full);
    assert!(!config.has_credentials());
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[quota]
tick_budget = 500

[scheduler]
cycle_length = 10
"#
    )
    .unwrap();

    std::env::set_var("HARVEST_API_KEYS", "key-one, key-two,,");
    std::env::set_var("HARVEST_CYCLE_LENGTH", "14");
    std::env::set_var("HARVEST_DAY_ADVANCE", "calendar");
    std::env::set_var("HARVEST_ROW_SHAPE", "minimal");
    std::env::set_var("HARVEST_CYCLE_START", "2024-03-01");

    let config = Config::load(Some(file.path())).unwrap();
    clear_env();

    assert_eq!(config.api.keys, vec!["key-one", "key-two"]);
    assert_eq!(config.quota.tick_budget, 500);
    assert_eq!(config.scheduler.cycle_length, 14);
    assert_eq!(config.scheduler.day_advance, DayAdvance::Calendar);
    assert_eq!(config.pipeline.row_shape, RowShape::Minimal);
    assert_eq!(
        config.seeds.cycle_start,
        chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
    );
}

#[test]
#[serial]
fn test_malformed_env_value_is_an_error() {
    clear_env();
    std::env::set_var("HARVEST_TICK_BUDGET", "lots");
    let result = Config::from_env();
    clear_env();

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("HARVEST_TICK_BUDGET"));
}

#[test]
#[serial]
fn test_keys_are_never_serialized() {
    clear_env();
    std::env::set_var("HARVEST_API_KEYS", "secret-key-123");
    let config = Config::from_env().unwrap();
    clear_env();

    let rendered = toml::to_string(&config).unwrap();
    assert!(!rendered.contains("secret-key-123"));
}

#[test]
fn test_invalid_file_reports_path() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[scheduler\ncycle_length = ").unwrap();

    let err = Config::from_file(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse TOML"));
}

#[test]
fn test_bad_base_url_rejected() {
    let mut config = Config::default();
    config.api.base_url = "ftp://example.com".into();
    assert!(config.validate().is_err());

    config.api.base_url = "not a url".into();
    assert!(config.validate().is_err());
}
