//! # HogQL Compiler
//!
//! Compiles HogQL, an analytics dialect of SQL, into ClickHouse SQL,
//! Postgres SQL, or normalized HogQL.
//!
//! # Architecture
//!
//! A query moves through a fixed pipeline of passes over one [`ast::Expr`]
//! tree, all sharing a single [`HogQLContext`]:
//!
//! 1. **Parse** ([`parser`]) - text to an untyped tree.
//! 2. **Pre-resolution rewrites** - preaggregated-table matching and cohort
//!    LEFT JOINs ([`transforms`]).
//! 3. **Resolve** ([`resolver`]) - binds every name against the schema
//!    catalog ([`database`]) and attaches a [`ast::Type`] to every node.
//! 4. **Post-resolution rewrites** - predicate pushdown, property type casts,
//!    EAV joins and lazy-table expansion ([`transforms`]).
//! 5. **Print** ([`printer`]) - typed tree to SQL text plus a map of bound
//!    parameter values.
//!
//! Compilations are independent: each owns its context and tree and shares
//! only the immutable, `Arc`-wrapped [`database::Database`].
//! [`compile_many`] runs a batch in parallel using [`rayon`].
//!
//! # Quick Start
//!
//! ```bash
//! # Print ClickHouse SQL for a query
//! hogql print -q "SELECT event, count() FROM events GROUP BY event"
//!
//! # Postgres dialect, JSON output with bound values
//! hogql print -q "SELECT 1" --dialect postgres -f json
//!
//! # Several queries from a file, compiled in parallel
//! hogql print --file queries.hogql
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from (in order of precedence):
//!
//! 1. Command-line arguments
//! 2. Environment variables (`HOGQL_TEAM_ID`, `HOGQL_DIALECT`,
//!    `HOGQL_TIMEZONE`)
//! 3. `.hogql.toml` in current directory
//! 4. `~/.config/hogql/config.toml`
//!
//! ## Example Configuration
//!
//! ```toml
//! [compiler]
//! team_id = 2
//! timezone = "Europe/Berlin"
//!
//! [modifiers]
//! in_cohort_via = "leftjoin"
//! property_groups_mode = "optimized"
//!
//! [settings]
//! max_execution_time = 60
//!
//! [[materialized_columns]]
//! table = "events"
//! column = "properties"
//! property = "$browser"
//! name = "mat_$browser"
//! ```
//!
//! # Modules
//!
//! - [`ast`] - Expression tree and type model
//! - [`parser`] - HogQL front-end
//! - [`database`] - Schema catalog and lazy tables
//! - [`resolver`] - Name binding and typing
//! - [`transforms`] - Tree rewrites between resolution and printing
//! - [`printer`] - SQL generation for each dialect
//! - [`config`] - Configuration loading and validation
//! - [`output`] - Rendering of compiled queries
//! - [`error`] - Error types and constructors

pub mod ast;
pub mod cli;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod functions;
pub mod output;
pub mod parser;
pub mod printer;
pub mod resolver;
pub mod transforms;
pub mod visitor;

use std::{sync::Arc, time::Instant};

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;

pub use crate::{
    context::{HogQLContext, HogQLQueryModifiers, QuerySettings},
    error::{HogQLError, HogQLResult},
    printer::Dialect
};
use crate::{
    ast::{ConstantValue, Expr, SelectQueryType},
    context::HogQLNotice,
    transforms::{
        cohorts::resolve_in_cohorts_leftjoin,
        eav::inject_eav_joins,
        lazy_tables::resolve_lazy_tables,
        preaggregation::apply_preaggregation,
        predicate_pushdown::push_down_predicates,
        property_types::{SwapPhase, swap_property_types}
    }
};

/// Run `pass`, recording its duration under `name`.
fn timed<T>(ctx: &mut HogQLContext, name: &str, pass: impl FnOnce(&mut HogQLContext) -> T) -> T {
    let start = Instant::now();
    let result = pass(ctx);
    ctx.timings.record(name, start.elapsed());
    result
}

/// Resolve `node` and run every rewrite the dialect needs before printing.
///
/// Returns `Ok(None)` when the context has no database attached; callers
/// treat that as an empty result rather than an error. `settings` are
/// checked against the statement kind before any pass runs.
pub fn prepare_ast_for_printing(
    mut node: Expr,
    ctx: &mut HogQLContext,
    dialect: Dialect,
    outer_scopes: &[Arc<SelectQueryType>],
    settings: Option<&QuerySettings>
) -> HogQLResult<Option<Expr>> {
    printer::check_settings_target(&node, settings)?;
    if ctx.database.is_none() {
        tracing::debug!("no database attached, skipping compilation");
        return Ok(None);
    }

    if dialect == Dialect::ClickHouse {
        timed(ctx, "preaggregation", |ctx| apply_preaggregation(&mut node, ctx));
    }
    timed(ctx, "cohorts", |ctx| resolve_in_cohorts_leftjoin(&mut node, ctx))?;
    let mut node = timed(ctx, "resolve_types", |ctx| {
        resolver::resolve_types(node, ctx, dialect, outer_scopes)
    })?;

    if dialect == Dialect::ClickHouse {
        timed(ctx, "predicate_pushdown", |ctx| push_down_predicates(&mut node, ctx, dialect))?;
        timed(ctx, "swap_properties", |ctx| {
            swap_property_types(&mut node, ctx, SwapPhase::BeforeLazyTables)
        });
        timed(ctx, "eav", |ctx| inject_eav_joins(&mut node, ctx, dialect))?;
    }
    if dialect != Dialect::HogQL {
        timed(ctx, "lazy_tables", |ctx| resolve_lazy_tables(&mut node, ctx, dialect))?;
    }
    if dialect == Dialect::ClickHouse {
        timed(ctx, "swap_properties", |ctx| {
            swap_property_types(&mut node, ctx, SwapPhase::AfterLazyTables)
        });
    }
    Ok(Some(node))
}

/// Print a tree returned by [`prepare_ast_for_printing`].
pub fn print_prepared_ast(
    node: &Expr,
    ctx: &mut HogQLContext,
    dialect: Dialect,
    settings: Option<&QuerySettings>,
    pretty: bool
) -> HogQLResult<String> {
    timed(ctx, "print", |ctx| printer::print_prepared(node, ctx, dialect, settings, pretty))
}

/// Prepare and print `node`. Prints an empty string when preparation
/// yields nothing.
pub fn print_ast(
    node: Expr,
    ctx: &mut HogQLContext,
    dialect: Dialect,
    settings: Option<&QuerySettings>,
    pretty: bool
) -> HogQLResult<String> {
    match prepare_ast_for_printing(node, ctx, dialect, &[], settings)? {
        Some(prepared) => print_prepared_ast(&prepared, ctx, dialect, settings, pretty),
        None => Ok(String::new())
    }
}

/// Printing options for [`compile_select_with`] and [`compile_many`].
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub dialect:  Dialect,
    pub settings: Option<QuerySettings>,
    pub pretty:   bool
}

/// SQL text with the values its parameters are bound to.
///
/// Serializes with sensitive values redacted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql:            String,
    #[serde(skip)]
    pub values:         IndexMap<String, ConstantValue>,
    #[serde(rename = "values")]
    pub display_values: IndexMap<String, ConstantValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices:        Vec<HogQLNotice>,
    /// Seconds spent in each pass
    #[serde(skip)]
    pub timings:        IndexMap<String, f64>
}

/// Parse and compile one SELECT.
pub fn compile_select(text: &str, ctx: &mut HogQLContext, dialect: Dialect) -> HogQLResult<CompiledQuery> {
    compile_select_with(
        text,
        ctx,
        &CompileOptions {
            dialect,
            ..Default::default()
        }
    )
}

pub fn compile_select_with(
    text: &str,
    ctx: &mut HogQLContext,
    options: &CompileOptions
) -> HogQLResult<CompiledQuery> {
    let node = timed(ctx, "parse", |_| parser::parse_select(text))?;
    let sql = print_ast(node, ctx, options.dialect, options.settings.as_ref(), options.pretty)?;
    Ok(CompiledQuery {
        sql,
        values: ctx.values.clone(),
        display_values: ctx.redacted_values(),
        notices: ctx.notices.clone(),
        timings: ctx.timings.to_map().clone()
    })
}

/// Compile independent queries in parallel, each in a fresh copy of `base`.
pub fn compile_many<S>(texts: &[S], base: &HogQLContext, options: &CompileOptions) -> Vec<HogQLResult<CompiledQuery>>
where
    S: AsRef<str> + Sync
{
    texts
        .par_iter()
        .map(|text| {
            let mut ctx = base.clone();
            compile_select_with(text.as_ref(), &mut ctx, options)
        })
        .collect()
}
