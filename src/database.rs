//! Virtual schema catalog.
//!
//! A [`Database`] maps HogQL table names to [`Table`] definitions. It is built
//! once per compilation (or shared between compilations behind an `Arc`) and
//! never mutated afterwards, so it is safe for concurrent reads.

mod lazy;
mod schema;
mod table;

use std::sync::Arc;

use indexmap::IndexMap;
pub use lazy::{PersonDistinctIdsSource, PersonsSource, SessionsSource, argmax_select};
pub use table::{
    ColumnField, ColumnKind, DatabaseField, ExpressionField, LazyJoin, LazyRequest,
    LazyTableSource, Table, TableKind
};

use crate::error::{HogQLResult, query_error};

#[derive(Debug, Clone, Default)]
pub struct Database {
    tables:  IndexMap<String, Arc<Table>>,
    team_id: Option<i64>
}

impl Database {
    pub fn new(team_id: Option<i64>) -> Self {
        Self {
            tables: IndexMap::new(),
            team_id
        }
    }

    pub fn add_table(&mut self, table: Arc<Table>) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn get_table(&self, name: &str) -> HogQLResult<Arc<Table>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| query_error(format!("Unknown table `{}`.", name)))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn team_id(&self) -> Option<i64> {
        self.team_id
    }
}
