//! Configuration loading and management.
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//!
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. `.hogql.toml` in current directory
//! 4. `~/.config/hogql/config.toml`
//! 5. Default values
//!
//! # Configuration File Format
//!
//! ```toml
//! [compiler]
//! team_id = 2
//! timezone = "UTC"
//! dialect = "clickhouse"       # clickhouse, postgres, hogql
//! pretty = false
//! limit_top_select = true
//!
//! [modifiers]
//! in_cohort_via = "subquery"   # subquery, leftjoin, leftjoin_conjoined
//! materialization_mode = "auto"
//! property_groups_mode = "optimized"
//! push_down_predicates = true
//! eav_properties = ["$feature_flag"]
//!
//! [settings]
//! readonly = 2
//! max_execution_time = 60
//!
//! [event_properties]
//! revenue = "numeric"
//!
//! [[materialized_columns]]
//! table = "events"
//! property = "$browser"
//! name = "mat_$browser"
//! index = "ngram_lower"
//!
//! [[property_groups]]
//! table = "events"
//! group_column = "properties_group_custom"
//!
//! [[cohorts]]
//! id = 5
//! name = "Power users"
//! is_static = true
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `HOGQL_TEAM_ID` | Tenant every query is restricted to |
//! | `HOGQL_DIALECT` | Output dialect |
//! | `HOGQL_TIMEZONE` | Timezone DateTime columns are converted to |

use std::{env, fs, path::Path, path::PathBuf, sync::Arc};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::{
    ast::ConstantValue,
    context::{
        CohortInfo, HogQLContext, HogQLQueryModifiers, MaterializedColumn, PropertyGroup,
        PropertyValueType, QuerySettings
    },
    database::Database,
    error::{AppResult, config_error},
    printer::Dialect
};

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".hogql.toml";

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub compiler:             CompilerConfig,
    #[serde(default)]
    pub modifiers:            HogQLQueryModifiers,
    #[serde(default)]
    pub settings:             IndexMap<String, SettingValue>,
    #[serde(default)]
    pub event_properties:     IndexMap<String, PropertyValueType>,
    #[serde(default)]
    pub person_properties:    IndexMap<String, PropertyValueType>,
    #[serde(default)]
    pub materialized_columns: Vec<MaterializedColumn>,
    #[serde(default)]
    pub property_groups:      Vec<PropertyGroup>,
    #[serde(default)]
    pub cohorts:              Vec<CohortInfo>
}

/// Compiler defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub team_id:          i64,
    pub timezone:         String,
    pub dialect:          Dialect,
    pub pretty:           bool,
    pub limit_top_select: bool
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            team_id:          1,
            timezone:         String::from("UTC"),
            dialect:          Dialect::ClickHouse,
            pretty:           false,
            limit_top_select: true
        }
    }
}

/// Value of a ClickHouse query setting
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String)
}

impl From<&SettingValue> for ConstantValue {
    fn from(value: &SettingValue) -> Self {
        match value {
            SettingValue::Bool(b) => ConstantValue::Bool(*b),
            SettingValue::Integer(i) => ConstantValue::Integer(*i),
            SettingValue::Float(f) => ConstantValue::Float(*f),
            SettingValue::String(s) => ConstantValue::String(s.clone())
        }
    }
}

fn read_file(path: &Path) -> AppResult<Config> {
    let content = fs::read_to_string(path)
        .map_err(|e| config_error(format!("Failed to read config file: {}", e)))?;
    Config::from_toml(&content)
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file in current directory (.hogql.toml)
    /// 3. Config file in home directory (~/.config/hogql/config.toml)
    /// 4. Default values
    pub fn load() -> AppResult<Self> {
        let home = env::var_os("HOME").map(PathBuf::from);
        let mut config = Self::load_from(home.as_deref(), Path::new("."))?;
        config.apply_env(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Load the home and local config files without consulting the
    /// environment. A local file replaces the home file entirely.
    pub fn load_from(home: Option<&Path>, dir: &Path) -> AppResult<Self> {
        let mut config = Self::default();

        if let Some(home) = home {
            let home_config = home.join(".config").join("hogql").join("config.toml");
            if home_config.exists() {
                config = read_file(&home_config)?;
            }
        }

        let local_config = dir.join(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            config = read_file(&local_config)?;
        }

        Ok(config)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| config_error(format!("Invalid config file: {}", e)))
    }

    /// Override fields from `HOGQL_*` variables looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>
    {
        if let Some(team_id) = lookup("HOGQL_TEAM_ID") {
            self.compiler.team_id = team_id
                .trim()
                .parse()
                .map_err(|_| config_error(format!("HOGQL_TEAM_ID must be an integer, got '{}'", team_id)))?;
        }

        if let Some(dialect) = lookup("HOGQL_DIALECT") {
            self.compiler.dialect = match dialect.to_ascii_lowercase().as_str() {
                "clickhouse" => Dialect::ClickHouse,
                "postgres" => Dialect::Postgres,
                "hogql" => Dialect::HogQL,
                other => return Err(config_error(format!("Unknown dialect '{}'", other)))
            };
        }

        if let Some(timezone) = lookup("HOGQL_TIMEZONE") {
            self.compiler.timezone = timezone;
        }

        Ok(())
    }

    /// ClickHouse settings, or `None` when no setting is configured.
    pub fn query_settings(&self) -> Option<QuerySettings> {
        if self.settings.is_empty() {
            return None;
        }
        Some(
            self.settings
                .iter()
                .map(|(name, value)| (name.clone(), ConstantValue::from(value)))
                .collect()
        )
    }

    /// Fresh compilation context with this configuration applied.
    pub fn context(&self) -> HogQLContext {
        let database = Database::create_for(Some(self.compiler.team_id), &self.modifiers);
        let mut ctx = HogQLContext::new(self.compiler.team_id)
            .with_database(Arc::new(database))
            .with_modifiers(self.modifiers.clone());
        ctx.timezone = self.compiler.timezone.clone();
        ctx.limit_top_select = self.compiler.limit_top_select;
        ctx.event_property_types = self.event_properties.clone();
        ctx.person_property_types = self.person_properties.clone();
        ctx.materialized_columns = self.materialized_columns.clone();
        ctx.property_groups = self.property_groups.clone();
        ctx.cohorts = self.cohorts.clone();
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{InCohortVia, MaterializedIndex};

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.compiler.team_id, 1);
        assert_eq!(config.compiler.dialect, Dialect::ClickHouse);
        assert!(config.compiler.limit_top_select);
        assert!(config.query_settings().is_none());
    }

    #[test]
    fn test_parse_sections() {
        let config = Config::from_toml(
            r#"
            [compiler]
            team_id = 7
            dialect = "postgres"

            [modifiers]
            in_cohort_via = "leftjoin_conjoined"

            [settings]
            readonly = 2
            optimize_aggregation_in_order = true

            [[materialized_columns]]
            table = "events"
            property = "$browser"
            name = "mat_$browser"
            index = "bloom_filter"
            "#
        )
        .unwrap();
        assert_eq!(config.compiler.team_id, 7);
        assert_eq!(config.compiler.dialect, Dialect::Postgres);
        assert_eq!(config.modifiers.in_cohort_via, InCohortVia::LeftJoinConjoined);
        assert_eq!(config.materialized_columns[0].column, "properties");
        assert_eq!(config.materialized_columns[0].index, MaterializedIndex::BloomFilter);
        let settings = config.query_settings().unwrap();
        assert_eq!(settings.get("readonly"), Some(&ConstantValue::Integer(2)));
        assert_eq!(
            settings.get("optimize_aggregation_in_order"),
            Some(&ConstantValue::Bool(true))
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(|name| match name {
                "HOGQL_TEAM_ID" => Some("42".to_string()),
                "HOGQL_DIALECT" => Some("HogQL".to_string()),
                _ => None
            })
            .unwrap();
        assert_eq!(config.compiler.team_id, 42);
        assert_eq!(config.compiler.dialect, Dialect::HogQL);
    }

    #[test]
    fn test_invalid_env_team_id() {
        let mut config = Config::default();
        let result = config.apply_env(|name| (name == "HOGQL_TEAM_ID").then(|| "two".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_context_carries_configuration() {
        let mut config = Config::default();
        config.compiler.timezone = "Europe/Berlin".to_string();
        config.compiler.team_id = 9;
        let ctx = config.context();
        assert_eq!(ctx.team_id, Some(9));
        assert_eq!(ctx.timezone, "Europe/Berlin");
        assert!(ctx.database.is_some());
    }
}
