//! Request-scoped compilation state.
//!
//! A [`HogQLContext`] is created once per compiled query and threaded through
//! every pass. Bound values and diagnostics only ever grow during its
//! lifetime. Nothing in here is shared between compilations except the
//! read-only [`Database`].

use std::{sync::Arc, time::Duration};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::{
    ast::{ConstantValue, Span},
    database::Database
};

/// ClickHouse query settings appended as `SETTINGS k=v`.
pub type QuerySettings = IndexMap<String, ConstantValue>;

/// How `IN COHORT` comparisons are compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InCohortVia {
    #[default]
    Subquery,
    #[serde(rename = "leftjoin")]
    LeftJoin,
    #[serde(rename = "leftjoin_conjoined")]
    LeftJoinConjoined
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializationMode {
    #[default]
    Auto,
    Disabled
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyGroupsMode {
    #[default]
    Disabled,
    Enabled,
    /// Like `Enabled`, plus key-presence rewrites for comparisons
    Optimized
}

/// Per-query switches for optional rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HogQLQueryModifiers {
    pub in_cohort_via:            InCohortVia,
    pub materialization_mode:     MaterializationMode,
    pub property_groups_mode:     PropertyGroupsMode,
    pub push_down_predicates:     bool,
    pub use_preaggregated_tables: bool,
    /// Read person data from the columns copied onto events instead of
    /// joining the person tables
    pub persons_on_events:        bool,
    /// Event properties stored in the `event_properties` table
    pub eav_properties:           Vec<String>
}

/// Secondary index available on a materialized column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializedIndex {
    #[default]
    None,
    BloomFilter,
    NgramLower
}

/// Property extracted into its own physical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedColumn {
    /// Storage table name, e.g. `events` or `person`
    pub table:    String,
    /// JSON column the property lives in
    #[serde(default = "default_properties_column")]
    pub column:   String,
    pub property: String,
    /// Physical column name
    pub name:     String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub index:    MaterializedIndex
}

/// Map column holding a bucket of properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyGroup {
    pub table:        String,
    #[serde(default = "default_properties_column")]
    pub column:       String,
    pub group_column: String,
    /// Keys with this prefix belong to the group; `None` makes it a catch-all
    #[serde(default)]
    pub key_prefix:   Option<String>
}

impl PropertyGroup {
    fn contains(&self, property: &str) -> bool {
        match &self.key_prefix {
            Some(prefix) => property.starts_with(prefix.as_str()),
            None => true
        }
    }
}

fn default_properties_column() -> String {
    "properties".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortInfo {
    pub id:        i64,
    pub name:      String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub version:   Option<i64>
}

/// Declared type of a property, used to cast reads from the JSON blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValueType {
    String,
    Numeric,
    Boolean,
    DateTime
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HogQLNotice {
    pub message: String,
    pub span:    Option<Span>,
    pub fix:     Option<String>
}

/// Wall-clock time spent in each pass, in seconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HogQLTimings {
    timings: IndexMap<String, f64>
}

impl HogQLTimings {
    pub fn record(&mut self, name: &str, elapsed: Duration) {
        *self.timings.entry(name.to_string()).or_insert(0.0) += elapsed.as_secs_f64();
    }

    pub fn to_map(&self) -> &IndexMap<String, f64> {
        &self.timings
    }
}

/// State of one compilation.
#[derive(Debug, Clone)]
pub struct HogQLContext {
    /// Tenant every printed table is restricted to
    pub team_id:              Option<i64>,
    pub database:             Option<Arc<Database>>,
    pub values:               IndexMap<String, ConstantValue>,
    sensitive_keys:           IndexSet<String>,
    pub notices:              Vec<HogQLNotice>,
    pub warnings:             Vec<HogQLNotice>,
    pub errors:               Vec<HogQLNotice>,
    pub modifiers:            HogQLQueryModifiers,
    /// Constants usable as bare identifiers, consulted after every other scope
    pub globals:              IndexMap<String, ConstantValue>,
    pub event_property_types: IndexMap<String, PropertyValueType>,
    pub person_property_types: IndexMap<String, PropertyValueType>,
    pub materialized_columns: Vec<MaterializedColumn>,
    pub property_groups:      Vec<PropertyGroup>,
    pub cohorts:              Vec<CohortInfo>,
    pub timezone:             String,
    /// Apply the default LIMIT to the outermost SELECT
    pub limit_top_select:     bool,
    pub timings:              HogQLTimings
}

impl Default for HogQLContext {
    fn default() -> Self {
        Self {
            team_id:               None,
            database:              None,
            values:                IndexMap::new(),
            sensitive_keys:        IndexSet::new(),
            notices:               Vec::new(),
            warnings:              Vec::new(),
            errors:                Vec::new(),
            modifiers:             HogQLQueryModifiers::default(),
            globals:               IndexMap::new(),
            event_property_types:  IndexMap::new(),
            person_property_types: IndexMap::new(),
            materialized_columns:  Vec::new(),
            property_groups:       Vec::new(),
            cohorts:               Vec::new(),
            timezone:              "UTC".to_string(),
            limit_top_select:      true,
            timings:               HogQLTimings::default()
        }
    }
}

impl HogQLContext {
    pub fn new(team_id: i64) -> Self {
        Self {
            team_id: Some(team_id),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_database(mut self, database: Arc<Database>) -> Self {
        self.database = Some(database);
        self
    }

    #[must_use]
    pub fn with_modifiers(mut self, modifiers: HogQLQueryModifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Bind a value and return its parameter name.
    pub fn add_value(&mut self, value: ConstantValue) -> String {
        let key = format!("hogql_val_{}", self.values.len());
        self.values.insert(key.clone(), value);
        key
    }

    /// Bind a value that must not appear in rendered parameter lists.
    pub fn add_sensitive_value(&mut self, value: ConstantValue) -> String {
        let key = self.add_value(value);
        self.sensitive_keys.insert(key.clone());
        key
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive_keys.contains(key)
    }

    /// Bound values with sensitive entries redacted.
    pub fn redacted_values(&self) -> IndexMap<String, ConstantValue> {
        self.values
            .iter()
            .map(|(key, value)| {
                if self.is_sensitive(key) {
                    (key.clone(), ConstantValue::String("[REDACTED]".to_string()))
                } else {
                    (key.clone(), value.clone())
                }
            })
            .collect()
    }

    pub fn add_notice(&mut self, message: impl Into<String>, span: Option<Span>) {
        self.notices.push(HogQLNotice {
            message: message.into(),
            span,
            fix: None
        });
    }

    pub fn add_warning(&mut self, message: impl Into<String>, span: Option<Span>) {
        self.warnings.push(HogQLNotice {
            message: message.into(),
            span,
            fix: None
        });
    }

    pub fn add_error(&mut self, message: impl Into<String>, span: Option<Span>) {
        self.errors.push(HogQLNotice {
            message: message.into(),
            span,
            fix: None
        });
    }

    pub fn find_cohort_by_id(&self, id: i64) -> Option<&CohortInfo> {
        self.cohorts.iter().find(|cohort| cohort.id == id)
    }

    pub fn find_cohort_by_name(&self, name: &str) -> Option<&CohortInfo> {
        self.cohorts.iter().find(|cohort| cohort.name == name)
    }

    /// Materialized column for `table.column.property`, unless disabled.
    pub fn materialized_column(
        &self,
        table: &str,
        column: &str,
        property: &str
    ) -> Option<&MaterializedColumn> {
        if self.modifiers.materialization_mode == MaterializationMode::Disabled {
            return None;
        }
        self.materialized_columns
            .iter()
            .find(|m| m.table == table && m.column == column && m.property == property)
    }

    /// Property group holding `table.column.property`. Prefix groups win over
    /// catch-all groups.
    pub fn property_group(&self, table: &str, column: &str, property: &str) -> Option<&PropertyGroup> {
        if self.modifiers.property_groups_mode == PropertyGroupsMode::Disabled {
            return None;
        }
        let mut candidates = self
            .property_groups
            .iter()
            .filter(|g| g.table == table && g.column == column && g.contains(property));
        let first = candidates.next()?;
        if first.key_prefix.is_some() {
            return Some(first);
        }
        candidates.find(|g| g.key_prefix.is_some()).or(Some(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_value_keys_are_sequential() {
        let mut ctx = HogQLContext::new(1);
        assert_eq!(ctx.add_value(ConstantValue::from("a")), "hogql_val_0");
        assert_eq!(ctx.add_sensitive_value(ConstantValue::from("secret")), "hogql_val_1");
        assert!(ctx.is_sensitive("hogql_val_1"));
        assert_eq!(
            ctx.redacted_values().get("hogql_val_1"),
            Some(&ConstantValue::String("[REDACTED]".to_string()))
        );
    }

    #[test]
    fn test_property_group_prefers_prefix_groups() {
        let mut ctx = HogQLContext::new(1);
        ctx.modifiers.property_groups_mode = PropertyGroupsMode::Enabled;
        ctx.property_groups = vec![
            PropertyGroup {
                table:        "events".into(),
                column:       "properties".into(),
                group_column: "properties_group_custom".into(),
                key_prefix:   None
            },
            PropertyGroup {
                table:        "events".into(),
                column:       "properties".into(),
                group_column: "properties_group_feature_flags".into(),
                key_prefix:   Some("$feature/".into())
            },
        ];
        let group = ctx.property_group("events", "properties", "$feature/beta");
        assert_eq!(
            group.map(|g| g.group_column.as_str()),
            Some("properties_group_feature_flags")
        );
        let group = ctx.property_group("events", "properties", "plan");
        assert_eq!(group.map(|g| g.group_column.as_str()), Some("properties_group_custom"));
    }

    #[test]
    fn test_materialization_disabled() {
        let mut ctx = HogQLContext::new(1);
        ctx.materialized_columns.push(MaterializedColumn {
            table:    "events".into(),
            column:   "properties".into(),
            property: "$browser".into(),
            name:     "mat_$browser".into(),
            nullable: false,
            index:    MaterializedIndex::None
        });
        assert!(ctx.materialized_column("events", "properties", "$browser").is_some());
        ctx.modifiers.materialization_mode = MaterializationMode::Disabled;
        assert!(ctx.materialized_column("events", "properties", "$browser").is_none());
    }
}
