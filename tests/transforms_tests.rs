//! Rewrites observed through the full ClickHouse pipeline.

use std::sync::Arc;

use hogql_compiler::{
    Dialect, HogQLContext, HogQLQueryModifiers, compile_select,
    ast::ConstantValue,
    context::{CohortInfo, InCohortVia, PropertyValueType},
    database::Database
};

fn context_with(modifiers: HogQLQueryModifiers) -> HogQLContext {
    let database = Database::create_for(Some(1), &modifiers);
    let mut ctx = HogQLContext::new(1)
        .with_database(Arc::new(database))
        .with_modifiers(modifiers);
    ctx.cohorts = vec![
        CohortInfo {
            id:        5,
            name:      "Beta".into(),
            is_static: true,
            version:   None
        },
        CohortInfo {
            id:        7,
            name:      "Power users".into(),
            is_static: false,
            version:   Some(3)
        },
    ];
    ctx
}

fn compile(ctx: &mut HogQLContext, sql: &str) -> String {
    compile_select(sql, ctx, Dialect::ClickHouse).expect("compile").sql
}

fn default_context() -> HogQLContext {
    context_with(HogQLQueryModifiers::default())
}

#[test]
fn test_person_properties_join_through_distinct_ids() {
    let sql = compile(&mut default_context(), "SELECT person.properties.email FROM events");
    assert!(sql.contains("person_distinct_id2"), "{}", sql);
    assert!(sql.contains("events__pdi__person"), "{}", sql);
    assert!(sql.contains("argMax("), "{}", sql);
}

#[test]
fn test_lazy_table_in_from_is_a_subquery() {
    let sql = compile(&mut default_context(), "SELECT count() FROM persons");
    assert!(sql.starts_with("SELECT count() FROM (SELECT"), "{}", sql);
    assert!(sql.contains("FROM person AS raw_persons"), "{}", sql);
}

#[test]
fn test_session_join_aggregates_raw_sessions() {
    let sql = compile(&mut default_context(), "SELECT session.duration FROM events");
    assert!(sql.contains("LEFT JOIN (SELECT"), "{}", sql);
    assert!(sql.contains("FROM sessions AS raw_sessions"), "{}", sql);
    assert!(sql.contains("AS events__session"), "{}", sql);
}

#[test]
fn test_event_timestamp_filter_prunes_sessions() {
    let sql = compile(
        &mut default_context(),
        "SELECT session.duration FROM events WHERE timestamp = '2024-06-01 10:00:00'"
    );
    assert!(sql.contains("raw_sessions.min_timestamp, 'UTC') BETWEEN"), "{}", sql);
}

#[test]
fn test_persons_on_events_reads_denormalized_columns() {
    let mut ctx = context_with(HogQLQueryModifiers {
        persons_on_events: true,
        ..Default::default()
    });
    let sql = compile(&mut ctx, "SELECT person.properties.email FROM events");
    assert!(sql.contains("events.person_properties"), "{}", sql);
    assert!(!sql.contains("person_distinct_id2"), "{}", sql);
}

#[test]
fn test_static_cohort_subquery() {
    let sql = compile(&mut default_context(), "SELECT event FROM events WHERE person_id IN COHORT 5");
    assert!(sql.contains("person_static_cohort"), "{}", sql);
    assert!(!sql.contains("cohortpeople"), "{}", sql);
}

#[test]
fn test_dynamic_cohort_subquery_by_name() {
    let sql = compile(&mut default_context(), "SELECT event FROM events WHERE person_id IN COHORT 'Power users'");
    assert!(sql.contains("cohortpeople"), "{}", sql);
}

#[test]
fn test_unknown_cohort_is_exposed() {
    let err = compile_select(
        "SELECT event FROM events WHERE person_id IN COHORT 99",
        &mut default_context(),
        Dialect::ClickHouse
    )
    .expect_err("unknown cohort");
    assert!(err.is_exposed());
    assert_eq!(err.message(), "Could not find a cohort with the id 99");
}

#[test]
fn test_cohort_left_join() {
    let mut ctx = context_with(HogQLQueryModifiers {
        in_cohort_via: InCohortVia::LeftJoin,
        ..Default::default()
    });
    let sql = compile(&mut ctx, "SELECT event FROM events WHERE person_id IN COHORT 5");
    assert!(sql.contains("in_cohort__5"), "{}", sql);
}

#[test]
fn test_typed_property_is_cast() {
    let mut ctx = default_context();
    ctx.event_property_types
        .insert("price".into(), PropertyValueType::Numeric);
    let sql = compile(&mut ctx, "SELECT properties.price FROM events");
    assert!(sql.contains("accurateCastOrNull("), "{}", sql);
    assert!(sql.contains("'Float64'"), "{}", sql);
}

#[test]
fn test_eav_property_joins_event_properties() {
    let mut ctx = context_with(HogQLQueryModifiers {
        eav_properties: vec!["plan".into()],
        ..Default::default()
    });
    let sql = compile(&mut ctx, "SELECT properties.plan FROM events");
    assert!(sql.contains("LEFT ANY JOIN event_properties AS events__eav_0"), "{}", sql);
    assert!(sql.contains("events__eav_0.value"), "{}", sql);
}

#[test]
fn test_preaggregated_table_is_used_when_enabled() {
    let query = "SELECT toStartOfDay(timestamp) AS day, count() AS c FROM events \
                 WHERE event = '$pageview' AND timestamp >= '2024-01-01' GROUP BY day";
    let mut ctx = context_with(HogQLQueryModifiers {
        use_preaggregated_tables: true,
        ..Default::default()
    });
    let sql = compile(&mut ctx, query);
    assert!(sql.contains("event_stats_daily"), "{}", sql);
    assert!(sql.contains("countMerge("), "{}", sql);

    let sql = compile(&mut default_context(), query);
    assert!(!sql.contains("event_stats_daily"), "{}", sql);
}

fn preaggregated_context() -> HogQLContext {
    context_with(HogQLQueryModifiers {
        use_preaggregated_tables: true,
        ..Default::default()
    })
}

fn daily_pageviews(bounds: &str) -> String {
    format!(
        "SELECT toStartOfDay(timestamp) AS day, count() AS c FROM events \
         WHERE event = '$pageview' AND {} GROUP BY day",
        bounds
    )
}

#[test]
fn test_preaggregated_exclusive_upper_bound_stays_exclusive() {
    let mut ctx = preaggregated_context();
    let compiled = compile_select(
        &daily_pageviews("timestamp >= '2024-01-01' AND timestamp < '2024-01-02'"),
        &mut ctx,
        Dialect::ClickHouse
    )
    .expect("compile");
    let sql = compiled.sql;
    assert!(sql.contains("event_stats_daily"), "{}", sql);
    assert!(
        sql.contains("greaterOrEquals(toTimeZone(preaggregated_event_stats.day_bucket, 'UTC'), %(hogql_val_1)s)"),
        "{}",
        sql
    );
    assert!(
        sql.contains("less(toTimeZone(preaggregated_event_stats.day_bucket, 'UTC'), %(hogql_val_2)s)"),
        "{}",
        sql
    );
    assert!(!sql.contains("lessOrEquals"), "{}", sql);
    assert!(!sql.contains("toStartOfDay(%("), "{}", sql);
    assert_eq!(
        compiled.values.get("hogql_val_2"),
        Some(&ConstantValue::String("2024-01-02".to_string()))
    );
}

#[test]
fn test_preaggregation_skips_bounds_inside_a_day() {
    for bounds in [
        "timestamp > '2024-01-01'",
        "timestamp <= '2024-01-02'",
        "timestamp < '2024-01-02 12:30:00'",
        "timestamp >= '2024-01-01 06:00:00'"
    ] {
        let sql = compile(&mut preaggregated_context(), &daily_pageviews(bounds));
        assert!(!sql.contains("event_stats_daily"), "{}: {}", bounds, sql);
        assert!(sql.contains("FROM events"), "{}: {}", bounds, sql);
    }
}

#[test]
fn test_preaggregation_skips_unsupported_conjunct() {
    let sql = compile(&mut preaggregated_context(), &daily_pageviews("properties.x = 1"));
    assert!(!sql.contains("event_stats_daily"), "{}", sql);
    assert!(sql.contains("FROM events"), "{}", sql);
}

#[test]
fn test_events_conjunct_pushed_below_session_join() {
    let mut ctx = context_with(HogQLQueryModifiers {
        push_down_predicates: true,
        ..Default::default()
    });
    let sql = compile(
        &mut ctx,
        "SELECT e.event, s.session_id FROM events AS e JOIN sessions AS s ON e.$session_id = s.session_id \
         WHERE e.event = 'x' AND s.duration > 10"
    );
    let (inner, outer) = sql.split_once(") AS e").expect("events subquery");
    assert!(inner.contains("FROM events WHERE"), "{}", sql);
    assert!(inner.contains("equals(events.event, %(hogql_val_0)s)"), "{}", sql);
    assert!(inner.contains("equals(events.team_id, 1)"), "{}", sql);
    assert!(!inner.contains("duration"), "{}", sql);
    assert!(outer.contains("duration"), "{}", sql);
    assert!(!outer.contains("%(hogql_val_0)s"), "{}", sql);
}
