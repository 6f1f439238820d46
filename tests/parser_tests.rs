use hogql_compiler::{
    ast::{ArithmeticOp, ConstantValue, Expr, ExprKind, Order, SetOperator},
    parser::{parse_expr, parse_order_expr, parse_select, parse_select_with_placeholders}
};
use indexmap::IndexMap;

#[test]
fn test_only_select_is_accepted() {
    let err = parse_select("DELETE FROM events").expect_err("not a select");
    assert!(err.is_exposed());
    assert!(err.to_string().starts_with("Syntax error"));
    assert_eq!(err.span().map(|s| s.start), Some(0));
}

#[test]
fn test_trailing_garbage_is_rejected() {
    assert!(parse_select("SELECT 1 FROM events events events").is_err());
}

#[test]
fn test_full_clause_order() {
    let expr = parse_select(
        "SELECT DISTINCT event, count() AS c FROM events AS e PREWHERE 1 WHERE event = 'a' \
         GROUP BY event HAVING c > 1 ORDER BY c DESC LIMIT 10 OFFSET 5 SETTINGS readonly = 2"
    )
    .expect("parse");
    let query = expr.as_select().expect("select");
    assert!(query.distinct);
    assert_eq!(query.select.len(), 2);
    assert_eq!(
        query.select_from.as_ref().and_then(|f| f.alias.as_deref()),
        Some("e")
    );
    assert!(query.prewhere.is_some());
    assert!(query.where_clause.is_some());
    assert_eq!(query.group_by.as_ref().map(Vec::len), Some(1));
    assert!(query.having.is_some());
    assert_eq!(query.order_by.as_ref().map(|o| o[0].order), Some(Order::Desc));
    assert_eq!(query.limit, Some(Expr::constant(10i64)));
    assert_eq!(query.offset, Some(Expr::constant(5i64)));
    assert_eq!(
        query.settings.as_ref().and_then(|s| s.get("readonly")),
        Some(&ConstantValue::Integer(2))
    );
}

#[test]
fn test_limit_by() {
    let expr = parse_select("SELECT event FROM events LIMIT 1 BY event LIMIT 20").expect("parse");
    let query = expr.as_select().expect("select");
    let limit_by = query.limit_by.as_ref().expect("limit by");
    assert_eq!(limit_by.n, Expr::constant(1i64));
    assert_eq!(limit_by.exprs, vec![Expr::field(&["event"])]);
    assert_eq!(query.limit, Some(Expr::constant(20i64)));
}

#[test]
fn test_set_operators() {
    let expr = parse_select("SELECT 1 UNION ALL SELECT 2 EXCEPT SELECT 3").expect("parse");
    let ExprKind::SelectSetQuery(set) = &expr.kind else {
        panic!("expected a set query");
    };
    let ops: Vec<SetOperator> = set.subsequent.iter().map(|n| n.op).collect();
    assert_eq!(ops, vec![SetOperator::UnionAll, SetOperator::Except]);
}

#[test]
fn test_placeholders_are_substituted() {
    let mut values = IndexMap::new();
    values.insert("n".to_string(), Expr::constant(2i64));
    let expr = parse_expr("{n} + 1", Some(&values)).expect("parse");
    assert_eq!(
        expr,
        Expr::arithmetic(ArithmeticOp::Add, Expr::constant(2i64), Expr::constant(1i64))
    );
}

#[test]
fn test_missing_placeholder_lists_available_names() {
    let mut values = IndexMap::new();
    values.insert("event".to_string(), Expr::constant("$pageview"));
    let err = parse_select_with_placeholders("SELECT 1 FROM events WHERE event = {other}", &values)
        .expect_err("missing placeholder");
    assert!(err.message().contains("Placeholder {other} is not available"));
    assert!(err.message().ends_with("You can use the following: event"));
}

#[test]
fn test_order_expr() {
    let order = parse_order_expr("timestamp DESC").expect("parse");
    assert_eq!(order.expr, Expr::field(&["timestamp"]));
    assert_eq!(order.order, Order::Desc);
    assert_eq!(parse_order_expr("event").expect("parse").order, Order::Asc);
}

#[test]
fn test_property_access_chain() {
    let expr = parse_expr("properties.$browser", None).expect("parse");
    assert_eq!(expr, Expr::field(&["properties", "$browser"]));
}
