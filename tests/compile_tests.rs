//! End-to-end compilation from HogQL text to SQL.

use std::sync::Arc;

use hogql_compiler::{
    CompileOptions, Dialect, HogQLContext, HogQLQueryModifiers, QuerySettings,
    ast::ConstantValue,
    compile_many, compile_select, compile_select_with,
    context::MaterializedColumn,
    database::Database,
    parser::parse_expr,
    prepare_ast_for_printing
};

fn context() -> HogQLContext {
    let database = Database::create_for(Some(1), &HogQLQueryModifiers::default());
    HogQLContext::new(1).with_database(Arc::new(database))
}

fn clickhouse(sql: &str) -> String {
    compile_select(sql, &mut context(), Dialect::ClickHouse)
        .expect("compile")
        .sql
}

#[test]
fn test_select_column_is_qualified_and_guarded() {
    assert_eq!(
        clickhouse("SELECT event FROM events"),
        "SELECT events.event AS event FROM events WHERE equals(events.team_id, 1) LIMIT 100"
    );
}

#[test]
fn test_where_is_combined_with_tenant_guard() {
    let compiled = compile_select("SELECT event FROM events WHERE event = 'a'", &mut context(), Dialect::ClickHouse)
        .expect("compile");
    assert_eq!(
        compiled.sql,
        "SELECT events.event AS event FROM events WHERE and(equals(events.team_id, 1), equals(events.event, %(hogql_val_0)s)) LIMIT 100"
    );
    assert_eq!(
        compiled.values.get("hogql_val_0"),
        Some(&ConstantValue::String("a".to_string()))
    );
}

#[test]
fn test_nullable_column_comparison_is_wrapped() {
    assert_eq!(
        clickhouse("SELECT session_id FROM raw_sessions WHERE entry_url = 'https://example.com'"),
        "SELECT raw_sessions.session_id AS session_id FROM sessions AS raw_sessions \
         WHERE and(equals(raw_sessions.team_id, 1), ifNull(equals(raw_sessions.entry_url, %(hogql_val_0)s), 0)) \
         LIMIT 100"
    );
}

#[test]
fn test_null_comparison_becomes_is_null() {
    let sql = clickhouse("SELECT session_id FROM raw_sessions WHERE entry_url IS NULL");
    assert!(sql.contains("isNull(raw_sessions.entry_url)"), "{}", sql);
    let sql = clickhouse("SELECT session_id FROM raw_sessions WHERE entry_url IS NOT NULL");
    assert!(sql.contains("isNotNull(raw_sessions.entry_url)"), "{}", sql);
}

#[test]
fn test_datetime_columns_use_context_timezone() {
    assert_eq!(
        clickhouse("SELECT timestamp FROM events"),
        "SELECT toTimeZone(events.timestamp, 'UTC') AS timestamp FROM events WHERE equals(events.team_id, 1) LIMIT 100"
    );

    let mut ctx = context();
    ctx.timezone = "Europe/Berlin".to_string();
    let compiled = compile_select("SELECT timestamp FROM events", &mut ctx, Dialect::ClickHouse).expect("compile");
    assert!(compiled.sql.contains("toTimeZone(events.timestamp, 'Europe/Berlin')"));
}

#[test]
fn test_json_property_read() {
    let compiled = compile_select("SELECT properties.$browser FROM events", &mut context(), Dialect::ClickHouse)
        .expect("compile");
    assert_eq!(
        compiled.sql,
        "SELECT replaceRegexpAll(nullIf(nullIf(JSONExtractRaw(events.properties, %(hogql_val_0)s), ''), 'null'), '^\"|\"$', '') AS $browser \
         FROM events WHERE equals(events.team_id, 1) LIMIT 100"
    );
    assert_eq!(
        compiled.values.get("hogql_val_0"),
        Some(&ConstantValue::String("$browser".to_string()))
    );
}

#[test]
fn test_materialized_property_comparison() {
    let mut ctx = context();
    ctx.materialized_columns = vec![MaterializedColumn {
        table:    "events".to_string(),
        column:   "properties".to_string(),
        property: "feature_flag".to_string(),
        name:     "mat_feature_flag".to_string(),
        nullable: false,
        index:    Default::default()
    }];

    let on = compile_select(
        "SELECT event FROM events WHERE properties.feature_flag = 'on'",
        &mut ctx.clone(),
        Dialect::ClickHouse
    )
    .expect("compile");
    assert!(on.sql.contains("equals(events.mat_feature_flag, %(hogql_val_0)s)"), "{}", on.sql);
    assert!(!on.sql.contains("JSONExtractRaw"));

    let sentinel = compile_select(
        "SELECT event FROM events WHERE properties.feature_flag = 'null'",
        &mut ctx,
        Dialect::ClickHouse
    )
    .expect("compile");
    assert!(
        sentinel
            .sql
            .contains("ifNull(equals(nullIf(nullIf(events.mat_feature_flag, ''), 'null'), %(hogql_val_0)s), 0)"),
        "{}",
        sentinel.sql
    );
}

#[test]
fn test_materialized_property_like() {
    let mut ctx = context();
    ctx.materialized_columns = vec![MaterializedColumn {
        table:    "events".to_string(),
        column:   "properties".to_string(),
        property: "feature_flag".to_string(),
        name:     "mat_feature_flag".to_string(),
        nullable: false,
        index:    Default::default()
    }];

    let narrow = compile_select(
        "SELECT event FROM events WHERE properties.feature_flag LIKE '%beta%'",
        &mut ctx.clone(),
        Dialect::ClickHouse
    )
    .expect("compile");
    assert!(narrow.sql.contains("like(events.mat_feature_flag, %(hogql_val_0)s)"), "{}", narrow.sql);

    for pattern in ["%", "%ul%", "NULL"] {
        let query = format!("SELECT event FROM events WHERE properties.feature_flag ILIKE '{}'", pattern);
        let wide = compile_select(&query, &mut ctx.clone(), Dialect::ClickHouse).expect("compile");
        assert!(
            wide.sql.contains("nullIf(nullIf(events.mat_feature_flag, ''), 'null')"),
            "{}: {}",
            pattern,
            wide.sql
        );
        assert!(!wide.sql.contains("ilike(events.mat_feature_flag,"), "{}: {}", pattern, wide.sql);
    }
}

#[test]
fn test_postgres_dialect() {
    let compiled = compile_select("SELECT event FROM events WHERE event = 'a'", &mut context(), Dialect::Postgres)
        .expect("compile");
    assert_eq!(compiled.sql, "SELECT events.event AS event FROM events WHERE (events.event = 'a')");
    assert!(compiled.values.is_empty());
}

#[test]
fn test_hogql_dialect_round_trips_names() {
    let compiled = compile_select("SELECT event FROM events WHERE event = 'a'", &mut context(), Dialect::HogQL)
        .expect("compile");
    assert_eq!(compiled.sql, "SELECT event FROM events WHERE equals(event, 'a')");
}

#[test]
fn test_limit_is_capped() {
    let sql = clickhouse("SELECT event FROM events LIMIT 100000");
    assert!(sql.ends_with("LIMIT 50000"), "{}", sql);
    let sql = clickhouse("SELECT event FROM events LIMIT 10");
    assert!(sql.ends_with("LIMIT 10"), "{}", sql);
}

#[test]
fn test_limit_policy_can_be_disabled() {
    let mut ctx = context();
    ctx.limit_top_select = false;
    let compiled = compile_select("SELECT event FROM events", &mut ctx, Dialect::ClickHouse).expect("compile");
    assert!(!compiled.sql.contains("LIMIT"));
}

#[test]
fn test_settings_are_appended() {
    let mut settings = QuerySettings::new();
    settings.insert("max_execution_time".to_string(), ConstantValue::Integer(60));
    let options = CompileOptions {
        dialect:  Dialect::ClickHouse,
        settings: Some(settings),
        pretty:   false
    };
    let compiled = compile_select_with("SELECT 1", &mut context(), &options).expect("compile");
    assert_eq!(compiled.sql, "SELECT 1 LIMIT 100 SETTINGS max_execution_time=60");
}

#[test]
fn test_invalid_setting_name_is_rejected() {
    let mut settings = QuerySettings::new();
    settings.insert("max_threads; DROP".to_string(), ConstantValue::Integer(1));
    let options = CompileOptions {
        settings: Some(settings),
        ..Default::default()
    };
    let err = compile_select_with("SELECT 1", &mut context(), &options).expect_err("bad setting");
    assert!(err.is_exposed());
    assert!(err.message().contains("is not supported"));
}

#[test]
fn test_settings_on_expression_fail_before_any_pass() {
    let mut settings = QuerySettings::new();
    settings.insert("max_execution_time".to_string(), ConstantValue::Integer(60));
    let mut ctx = context();
    let node = parse_expr("1 + 1", None).expect("parse");
    let err = prepare_ast_for_printing(node, &mut ctx, Dialect::ClickHouse, &[], Some(&settings))
        .expect_err("settings on an expression");
    assert!(!err.is_exposed());
    assert_eq!(err.message(), "Settings can only be applied to SELECT queries");
    assert!(!ctx.timings.to_map().contains_key("resolve_types"));

    let node = parse_expr("1 + 1", None).expect("parse");
    assert!(prepare_ast_for_printing(node, &mut ctx, Dialect::ClickHouse, &[], None).is_ok());
}

#[test]
fn test_union_has_no_top_limit() {
    assert_eq!(clickhouse("SELECT 1 UNION ALL SELECT 2"), "SELECT 1 UNION ALL SELECT 2");
}

#[test]
fn test_subquery_is_guarded_inside() {
    assert_eq!(
        clickhouse("SELECT count() FROM (SELECT event FROM events)"),
        "SELECT count() FROM (SELECT events.event AS event FROM events WHERE equals(events.team_id, 1)) LIMIT 100"
    );
}

#[test]
fn test_outer_join_guard_goes_into_on() {
    assert_eq!(
        clickhouse("SELECT e.event FROM events AS e LEFT JOIN raw_persons AS p ON e.distinct_id = p.id"),
        "SELECT e.event AS event FROM events AS e LEFT JOIN person AS p \
         ON and(equals(e.distinct_id, p.id), equals(p.team_id, 1)) \
         WHERE equals(e.team_id, 1) LIMIT 100"
    );
}

#[test]
fn test_unknown_function_is_an_exposed_error() {
    let err = compile_select("SELECT nope(1)", &mut context(), Dialect::ClickHouse).expect_err("unknown");
    assert!(err.is_exposed());
    assert_eq!(err.message(), "Unsupported function call 'nope(...)'");
}

#[test]
fn test_unknown_table() {
    let err = compile_select("SELECT 1 FROM nowhere", &mut context(), Dialect::ClickHouse).expect_err("unknown");
    assert!(err.is_exposed());
}

#[test]
fn test_missing_team_is_internal() {
    let database = Database::create_for(None, &HogQLQueryModifiers::default());
    let mut ctx = HogQLContext::default().with_database(Arc::new(database));
    let err = compile_select("SELECT event FROM events", &mut ctx, Dialect::ClickHouse).expect_err("no team");
    assert!(!err.is_exposed());
}

#[test]
fn test_without_database_prints_nothing() {
    let mut ctx = HogQLContext::new(1);
    let compiled = compile_select("SELECT 1", &mut ctx, Dialect::ClickHouse).expect("compile");
    assert!(compiled.sql.is_empty());
}

#[test]
fn test_string_with_percent_is_bound_not_inlined() {
    let compiled = compile_select("SELECT '100%'", &mut context(), Dialect::ClickHouse).expect("compile");
    assert_eq!(compiled.sql, "SELECT %(hogql_val_0)s LIMIT 100");
}

#[test]
fn test_timings_are_recorded() {
    let compiled = compile_select("SELECT event FROM events", &mut context(), Dialect::ClickHouse).expect("compile");
    assert!(compiled.timings.contains_key("parse"));
    assert!(compiled.timings.contains_key("print"));
}

#[test]
fn test_compile_many_keeps_order_and_isolates_values() {
    let queries = ["SELECT 'a'", "SELECT nope()", "SELECT 'b'"];
    let results = compile_many(&queries, &context(), &CompileOptions::default());
    assert_eq!(results.len(), 3);
    let first = results[0].as_ref().expect("first");
    let third = results[2].as_ref().expect("third");
    assert!(results[1].is_err());
    assert_eq!(first.values.get("hogql_val_0"), Some(&ConstantValue::String("a".to_string())));
    assert_eq!(third.values.get("hogql_val_0"), Some(&ConstantValue::String("b".to_string())));
}
