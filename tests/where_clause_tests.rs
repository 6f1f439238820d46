//! Predicate extraction against resolved queries.

use std::sync::Arc;

use hogql_compiler::{
    Dialect, HogQLContext, HogQLQueryModifiers,
    ast::{CompareOp, Expr, ExprKind},
    database::Database,
    parser::parse_select,
    resolver::resolve_types,
    transforms::{
        session_where::SessionWhereTarget,
        where_clause::{TableAliasTarget, extract_predicate}
    }
};

fn resolved_where(sql: &str) -> Expr {
    let database = Database::create_for(Some(1), &HogQLQueryModifiers::default());
    let mut ctx = HogQLContext::new(1).with_database(Arc::new(database));
    let expr = resolve_types(parse_select(sql).expect("parse"), &mut ctx, Dialect::ClickHouse, &[]).expect("resolve");
    expr.as_select()
        .and_then(|query| query.where_clause.clone())
        .expect("where clause")
}

fn min_timestamp() -> Expr {
    Expr::field(&["raw_sessions", "min_timestamp"])
}

#[test]
fn test_session_start_equality_becomes_buffered_range() {
    let where_clause = resolved_where("SELECT session_id FROM sessions WHERE $start_timestamp = '2024-06-01 10:00:00'");
    let extracted = extract_predicate(&where_clause, &SessionWhereTarget::new("raw_sessions"));
    assert_eq!(
        extracted,
        Some(Expr::new(ExprKind::Between {
            expr:    Box::new(min_timestamp()),
            low:     Box::new(Expr::constant("2024-05-29 10:00:00")),
            high:    Box::new(Expr::constant("2024-06-04 10:00:00")),
            negated: false
        }))
    );
}

#[test]
fn test_session_start_lower_bound() {
    let where_clause = resolved_where("SELECT session_id FROM sessions WHERE $start_timestamp >= '2024-06-01'");
    let extracted = extract_predicate(&where_clause, &SessionWhereTarget::new("raw_sessions"));
    assert_eq!(
        extracted,
        Some(Expr::compare(
            CompareOp::GtEq,
            min_timestamp(),
            Expr::constant("2024-05-29 00:00:00")
        ))
    );
}

#[test]
fn test_session_filter_on_other_column_is_dropped() {
    let where_clause = resolved_where("SELECT session_id FROM sessions WHERE distinct_id = 'abc'");
    assert_eq!(extract_predicate(&where_clause, &SessionWhereTarget::new("raw_sessions")), None);
}

#[test]
fn test_lazy_join_conjunct_is_extracted() {
    let where_clause = resolved_where("SELECT event FROM events WHERE session.duration > 0 AND event = 'x'");
    let target = TableAliasTarget::new("events__session", "events__session", true);
    assert_eq!(
        extract_predicate(&where_clause, &target),
        Some(Expr::compare(
            CompareOp::Gt,
            Expr::field(&["events__session", "duration"]),
            Expr::constant(0i64)
        ))
    );
}

#[test]
fn test_or_with_foreign_branch_extracts_nothing() {
    let where_clause = resolved_where("SELECT event FROM events WHERE session.duration > 0 OR event = 'x'");
    let target = TableAliasTarget::new("events__session", "events__session", true);
    assert_eq!(extract_predicate(&where_clause, &target), None);
}

#[test]
fn test_outer_join_target_skips_null_accepting_predicates() {
    let where_clause = resolved_where("SELECT event FROM events WHERE session.duration IS NULL");
    let outer = TableAliasTarget::new("events__session", "events__session", true);
    assert_eq!(extract_predicate(&where_clause, &outer), None);

    let inner = TableAliasTarget::new("events__session", "events__session", false);
    assert!(extract_predicate(&where_clause, &inner).is_some());
}
