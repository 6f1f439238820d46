use std::fs;

use hogql_compiler::{
    Dialect,
    config::{Config, LOCAL_CONFIG_FILE},
    context::{InCohortVia, PropertyGroupsMode, PropertyValueType}
};
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.compiler.team_id, 1);
    assert_eq!(config.compiler.timezone, "UTC");
    assert!(!config.compiler.pretty);
    assert!(config.materialized_columns.is_empty());
    assert!(config.cohorts.is_empty());
}

#[test]
fn test_missing_files_give_defaults() {
    let home = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();
    let config = Config::load_from(Some(home.path()), dir.path()).unwrap();
    assert_eq!(config.compiler.team_id, 1);
    assert_eq!(config.compiler.dialect, Dialect::ClickHouse);
}

#[test]
fn test_home_config_is_read() {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join(".config").join("hogql");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("config.toml"),
        "[compiler]\nteam_id = 3\n\n[modifiers]\nproperty_groups_mode = \"optimized\"\n"
    )
    .unwrap();
    let dir = TempDir::new().unwrap();

    let config = Config::load_from(Some(home.path()), dir.path()).unwrap();
    assert_eq!(config.compiler.team_id, 3);
    assert_eq!(config.modifiers.property_groups_mode, PropertyGroupsMode::Optimized);
}

#[test]
fn test_local_config_replaces_home_config() {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join(".config").join("hogql");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("config.toml"), "[compiler]\nteam_id = 3\n").unwrap();

    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(LOCAL_CONFIG_FILE),
        "[compiler]\ndialect = \"hogql\"\n\n[modifiers]\nin_cohort_via = \"leftjoin\"\n\n\
         [event_properties]\nrevenue = \"numeric\"\n\n[[cohorts]]\nid = 5\nname = \"Beta\"\nis_static = true\n"
    )
    .unwrap();

    let config = Config::load_from(Some(home.path()), dir.path()).unwrap();
    assert_eq!(config.compiler.team_id, 1);
    assert_eq!(config.compiler.dialect, Dialect::HogQL);
    assert_eq!(config.modifiers.in_cohort_via, InCohortVia::LeftJoin);
    assert_eq!(config.event_properties.get("revenue"), Some(&PropertyValueType::Numeric));
    assert_eq!(config.cohorts[0].id, 5);

    let ctx = config.context();
    assert_eq!(ctx.modifiers.in_cohort_via, InCohortVia::LeftJoin);
    assert!(ctx.find_cohort_by_name("Beta").is_some());
}

#[test]
fn test_invalid_toml_is_reported() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(LOCAL_CONFIG_FILE), "[compiler\nteam_id = ").unwrap();
    assert!(Config::load_from(None, dir.path()).is_err());
}

#[test]
fn test_unknown_dialect_in_env() {
    let mut config = Config::default();
    let result = config.apply_env(|name| (name == "HOGQL_DIALECT").then(|| "mysql".to_string()));
    assert!(result.is_err());
}

#[test]
fn test_timezone_from_env() {
    let mut config = Config::default();
    config
        .apply_env(|name| (name == "HOGQL_TIMEZONE").then(|| "Asia/Tokyo".to_string()))
        .unwrap();
    assert_eq!(config.context().timezone, "Asia/Tokyo");
}
