//! Timestamp pushdown into the sessions table.
//!
//! A session's aggregated start is `min(min_timestamp)` over its raw rows, so
//! a filter on the session start (or on the event timestamp, which lies inside
//! the session) can prune raw session rows by `min_timestamp`. Sessions can
//! span day boundaries, so the bound is widened by [`SESSION_BUFFER_DAYS`].

use chrono::{Duration, NaiveDate, NaiveDateTime};

use super::where_clause::{Extracted, PredicateTarget, is_constant_like};
use crate::{
    ast::{CompareOp, ConstantValue, Expr, ExprKind, Type},
    visitor::clone_expr
};

pub const SESSION_BUFFER_DAYS: i64 = 3;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Functions that round a timestamp down without changing its day by more
/// than the buffer.
const TIMESTAMP_WRAPPERS: &[&str] = &[
    "toStartOfDay",
    "toStartOfHour",
    "toStartOfMinute",
    "toStartOfFiveMinutes",
    "toDate",
    "toDateTime",
    "toTimeZone",
    "assumeNotNull"
];

/// Targets `raw_sessions`, spelled with the given qualifier.
#[derive(Debug, Clone)]
pub struct SessionWhereTarget {
    qualifier: String
}

impl SessionWhereTarget {
    pub fn new(qualifier: &str) -> Self {
        Self {
            qualifier: qualifier.to_string()
        }
    }

    fn min_timestamp(&self) -> Expr {
        Expr::field(&[self.qualifier.as_str(), "min_timestamp"])
    }

    fn range(&self, op: CompareOp, value: &Expr) -> Option<Expr> {
        let value = clone_expr(value.unaliased(), false);
        match op {
            CompareOp::Eq => {
                let (low, high) = match value.as_constant().and_then(parse_timestamp) {
                    Some(ts) => (
                        Expr::constant(format_shifted(ts, -SESSION_BUFFER_DAYS)),
                        Expr::constant(format_shifted(ts, SESSION_BUFFER_DAYS))
                    ),
                    None => (shifted(value.clone(), "minus"), shifted(value, "plus"))
                };
                Some(Expr::new(ExprKind::Between {
                    expr:    Box::new(self.min_timestamp()),
                    low:     Box::new(low),
                    high:    Box::new(high),
                    negated: false
                }))
            }
            CompareOp::Gt | CompareOp::GtEq => Some(Expr::compare(
                CompareOp::GtEq,
                self.min_timestamp(),
                buffered(value, -SESSION_BUFFER_DAYS)
            )),
            CompareOp::Lt | CompareOp::LtEq => Some(Expr::compare(
                CompareOp::LtEq,
                self.min_timestamp(),
                buffered(value, SESSION_BUFFER_DAYS)
            )),
            _ => None
        }
    }
}

fn shifted(value: Expr, function: &str) -> Expr {
    Expr::call(function, vec![
        value,
        Expr::call("toIntervalDay", vec![Expr::constant(SESSION_BUFFER_DAYS)]),
    ])
}

/// `value ± days`, folded when `value` is a timestamp literal.
fn buffered(value: Expr, days: i64) -> Expr {
    if let Some(ts) = value.as_constant().and_then(parse_timestamp) {
        return Expr::constant(format_shifted(ts, days));
    }
    shifted(value, if days < 0 { "minus" } else { "plus" })
}

fn format_shifted(ts: NaiveDateTime, days: i64) -> String {
    (ts + Duration::days(days)).format(DATETIME_FORMAT).to_string()
}

fn parse_timestamp(value: &ConstantValue) -> Option<NaiveDateTime> {
    match value {
        ConstantValue::String(s) => NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            }),
        ConstantValue::DateTime(dt) => Some(dt.naive_utc()),
        ConstantValue::Date(d) => d.and_hms_opt(0, 0, 0),
        _ => None
    }
}

/// Whether `expr` is a session start or event timestamp, possibly rounded.
pub fn is_session_timestamp(expr: &Expr) -> bool {
    let expr = expr.unaliased();
    match &expr.kind {
        ExprKind::Call(call) if TIMESTAMP_WRAPPERS.contains(&call.name.as_str()) => {
            call.args.first().is_some_and(is_session_timestamp)
        }
        ExprKind::Field {
            ..
        } => {
            let Some(Type::Field(field)) = expr.ty.as_ref().map(Type::unwrap_alias) else {
                return false;
            };
            let Some(table) = field.table_type.resolve_database_table() else {
                return false;
            };
            matches!(
                (table.name.as_str(), field.name.as_str()),
                ("sessions", "$start_timestamp")
                    | ("raw_sessions", "min_timestamp")
                    | ("events", "timestamp")
            )
        }
        _ => false
    }
}

impl PredicateTarget for SessionWhereTarget {
    fn rewrite_field(&self, _field: &Expr) -> Option<Expr> {
        None
    }

    fn rewrite_compare(&self, op: CompareOp, left: &Expr, right: &Expr) -> Option<Extracted> {
        if is_session_timestamp(left) && is_constant_like(right) {
            return self.range(op, right).map(Extracted::Expr);
        }
        if is_session_timestamp(right) && is_constant_like(left) {
            return op.flipped().and_then(|op| self.range(op, left)).map(Extracted::Expr);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_literal_is_folded() {
        let expr = buffered(Expr::constant("2024-06-01 10:00:00"), -3);
        assert_eq!(expr, Expr::constant("2024-05-29 10:00:00"));
        let expr = buffered(Expr::constant("2024-06-01"), 3);
        assert_eq!(expr, Expr::constant("2024-06-04 00:00:00"));
    }

    #[test]
    fn test_buffered_expression_uses_interval() {
        let expr = buffered(Expr::call("now", vec![]), -3);
        assert_eq!(
            expr,
            Expr::call("minus", vec![
                Expr::call("now", vec![]),
                Expr::call("toIntervalDay", vec![Expr::constant(3i64)]),
            ])
        );
    }
}
