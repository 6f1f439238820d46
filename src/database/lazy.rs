//! Subquery generators for the lazy tables of the default catalog.
//!
//! Person tables are versioned: every change writes a new row, and the
//! current state of a key is the `argMax(field, version)` over its rows.

use indexmap::IndexMap;

use super::{LazyRequest, LazyTableSource};
use crate::{
    ast::{Chain, CompareOp, Expr, JoinExpr, SelectQuery},
    context::HogQLContext,
    error::HogQLResult,
    transforms::{session_where::SessionWhereTarget, where_clause}
};

/// Select the latest version of each `group_fields` key.
pub fn argmax_select(
    table_name: &str,
    select_fields: &IndexMap<String, Chain>,
    group_fields: &[&str],
    argmax_field: &str,
    deleted_field: Option<&str>
) -> SelectQuery {
    let argmax_version =
        |expr: Expr| Expr::call("argMax", vec![expr, Expr::field(&[table_name, argmax_field])]);

    let mut select = Vec::new();
    for (alias, chain) in select_fields {
        if group_fields.contains(&alias.as_str()) {
            continue;
        }
        let mut full = Chain::new();
        full.push(table_name.into());
        full.extend(chain.iter().cloned());
        select.push(Expr::alias(alias.clone(), argmax_version(Expr::field_chain(full))));
    }

    let mut group_by = Vec::new();
    for key in group_fields {
        let field = Expr::field(&[table_name, key]);
        group_by.push(field.clone());
        select.push(Expr::alias(*key, field));
    }

    let having = deleted_field.map(|deleted| {
        Expr::compare(
            CompareOp::Eq,
            argmax_version(Expr::field(&[table_name, deleted])),
            Expr::constant(0i64)
        )
    });

    SelectQuery {
        select,
        select_from: Some(Box::new(JoinExpr::table(Expr::field(&[table_name]), None))),
        group_by: Some(group_by),
        having,
        ..Default::default()
    }
}

#[derive(Debug)]
pub struct PersonDistinctIdsSource;

impl LazyTableSource for PersonDistinctIdsSource {
    fn lazy_select(&self, request: &LazyRequest<'_>, _ctx: &HogQLContext) -> HogQLResult<SelectQuery> {
        Ok(argmax_select(
            "raw_person_distinct_ids",
            request.fields_accessed,
            &["distinct_id"],
            "version",
            Some("is_deleted")
        ))
    }
}

#[derive(Debug)]
pub struct PersonsSource;

impl LazyTableSource for PersonsSource {
    fn lazy_select(&self, request: &LazyRequest<'_>, _ctx: &HogQLContext) -> HogQLResult<SelectQuery> {
        let mut select = argmax_select(
            "raw_persons",
            request.fields_accessed,
            &["id"],
            "version",
            Some("is_deleted")
        );

        // Filtering the raw rows before the argMax keeps every person that
        // matched in any version; the outer WHERE still applies.
        let target = where_clause::TableAliasTarget::new(
            request.alias,
            "where_optimization",
            request.is_outer_join
        );
        let extracted = request
            .outer
            .where_clause
            .as_ref()
            .and_then(|w| where_clause::extract_predicate(w, &target));
        if let Some(predicate) = extracted {
            tracing::debug!(alias = request.alias, "pushing person filters into lazy persons table");
            let mut inner = SelectQuery::from_table(
                vec![Expr::field(&["where_optimization", "id"])],
                "raw_persons",
                Some("where_optimization")
            );
            inner.where_clause = Some(predicate);
            select.where_clause = Some(Expr::compare(
                CompareOp::In,
                Expr::field(&["raw_persons", "id"]),
                Expr::select(inner)
            ));
        }
        Ok(select)
    }
}

#[derive(Debug)]
pub struct SessionsSource;

impl SessionsSource {
    fn aggregate(field: &str) -> Option<Expr> {
        let raw = |name: &str| Expr::field(&["raw_sessions", name]);
        let min_start = || Expr::call("min", vec![raw("min_timestamp")]);
        let max_end = || Expr::call("max", vec![raw("max_timestamp")]);
        Some(match field {
            "distinct_id" => Expr::call("any", vec![raw("distinct_id")]),
            "$start_timestamp" => min_start(),
            "$end_timestamp" => max_end(),
            "$session_duration" | "duration" => Expr::call(
                "dateDiff",
                vec![Expr::constant("second"), min_start(), max_end()]
            ),
            "$pageview_count" => Expr::call("sum", vec![raw("pageview_count")]),
            "$entry_current_url" => {
                Expr::call("argMin", vec![raw("entry_url"), raw("min_timestamp")])
            }
            _ => return None
        })
    }
}

impl LazyTableSource for SessionsSource {
    fn lazy_select(&self, request: &LazyRequest<'_>, _ctx: &HogQLContext) -> HogQLResult<SelectQuery> {
        let mut select = Vec::new();
        for (alias, chain) in request.fields_accessed {
            let Some(field) = chain.first().and_then(|c| c.as_name()) else {
                continue;
            };
            if field == "session_id" {
                continue;
            }
            if let Some(expr) = Self::aggregate(field) {
                select.push(Expr::alias(alias.clone(), expr));
            }
        }
        let session_id = Expr::field(&["raw_sessions", "session_id"]);
        select.push(Expr::alias("session_id", session_id.clone()));

        let mut query = SelectQuery::from_table(select, "raw_sessions", None);
        query.group_by = Some(vec![session_id]);

        let target = SessionWhereTarget::new("raw_sessions");
        if let Some(predicate) = request
            .outer
            .where_clause
            .as_ref()
            .and_then(|w| where_clause::extract_predicate(w, &target))
        {
            tracing::debug!(alias = request.alias, "pushing timestamp range into lazy sessions table");
            query.where_clause = Some(predicate);
        }
        Ok(query)
    }
}
