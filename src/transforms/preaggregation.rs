//! Substitution of daily event statistics for raw events.
//!
//! Trend-style queries over `events` that only count events, persons or
//! sessions per day, event, browser, OS or path can be answered from
//! `preaggregated_event_stats`, which holds aggregate states per day bucket.
//! The rewrite is all or nothing: every clause of the query must map onto
//! the summary table, otherwise the query is left exactly as written.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::{
    ast::{Call, ChainItem, CompareOp, ConstantValue, Expr, ExprKind, JoinExpr, OrderExpr, SelectQuery},
    context::HogQLContext,
    functions::is_aggregation
};

const SOURCE_TABLE: &str = "events";
const TARGET_TABLE: &str = "preaggregated_event_stats";

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Event properties with a dimension column in the summary table.
const DIMENSIONS: &[(&str, &str)] = &[("$browser", "browser"), ("$os", "os"), ("$pathname", "pathname")];

/// Why a query can not use the summary table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch(pub &'static str);

type Matched<T> = Result<T, Mismatch>;

fn column(name: &str) -> Expr {
    Expr::field(&[TARGET_TABLE, name])
}

fn merge(state: &str, column_name: &str) -> Expr {
    Expr::call(format!("{}Merge", state), vec![column(column_name)])
}

struct Matcher<'a> {
    /// Names the events table goes by in this query
    qualifiers: Vec<&'a str>,
    /// SELECT aliases, which GROUP BY and ORDER BY may refer to
    aliases:    Vec<&'a str>
}

impl Matcher<'_> {
    /// Chain relative to the events table.
    fn relative<'c>(&self, chain: &'c [ChainItem]) -> &'c [ChainItem] {
        match chain.first().and_then(ChainItem::as_name) {
            Some(first) if chain.len() > 1 && self.qualifiers.contains(&first) => &chain[1..],
            _ => chain
        }
    }

    fn names<'c>(&self, chain: &'c [ChainItem]) -> Matched<Vec<&'c str>> {
        self.relative(chain)
            .iter()
            .map(|item| item.as_name().ok_or(Mismatch("index access")))
            .collect()
    }

    fn is_field(&self, expr: &Expr, expected: &[&str]) -> bool {
        match &expr.kind {
            ExprKind::Field {
                chain
            } => self.names(chain).is_ok_and(|names| names == expected),
            _ => false
        }
    }

    fn field(&self, chain: &[ChainItem]) -> Matched<Expr> {
        if let [ChainItem::Name(name)] = chain
            && self.aliases.contains(&name.as_str())
        {
            return Ok(Expr::field(&[name.as_str()]));
        }
        match self.names(chain)?.as_slice() {
            ["event"] => Ok(column("event")),
            ["properties", property] => DIMENSIONS
                .iter()
                .find(|(name, _)| name == property)
                .map(|(_, dimension)| column(dimension))
                .ok_or(Mismatch("property without a dimension column")),
            _ => Err(Mismatch("field without a summary column"))
        }
    }

    fn is_person(&self, expr: &Expr) -> bool {
        self.is_field(expr, &["person_id"]) || self.is_field(expr, &["person", "id"])
    }

    fn is_session(&self, expr: &Expr) -> bool {
        self.is_field(expr, &["$session_id"]) || self.is_field(expr, &["session", "id"])
    }

    fn aggregate(&self, call: &Call) -> Matched<Expr> {
        if call.params.is_some() {
            return Err(Mismatch("parametric aggregate"));
        }
        match (call.name.as_str(), call.distinct, call.args.as_slice()) {
            ("count", false, []) => Ok(merge("count", "count_state")),
            ("uniq", false, [arg]) | ("count", true, [arg]) if self.is_person(arg) => {
                Ok(merge("uniq", "persons_uniq_state"))
            }
            ("uniq", false, [arg]) | ("count", true, [arg]) if self.is_session(arg) => {
                Ok(merge("uniq", "sessions_uniq_state"))
            }
            _ => Err(Mismatch("unsupported aggregate"))
        }
    }

    fn expr(&self, expr: &Expr) -> Matched<Expr> {
        let mapped = match &expr.kind {
            ExprKind::Constant(_) => expr.clone(),
            ExprKind::Field {
                chain
            } => self.field(chain)?,
            ExprKind::Alias {
                alias,
                expr: inner,
                hidden
            } => Expr::new(ExprKind::Alias {
                alias:  alias.clone(),
                expr:   Box::new(self.expr(inner)?),
                hidden: *hidden
            }),
            ExprKind::Call(call) if call.name == "toStartOfDay" && call.args.len() == 1 => {
                if !self.is_field(&call.args[0], &["timestamp"]) {
                    return Err(Mismatch("day bucket of something other than the timestamp"));
                }
                column("day_bucket")
            }
            ExprKind::Call(call) if is_aggregation(&call.name) => self.aggregate(call)?,
            ExprKind::Call(call) => {
                let args = call.args.iter().map(|a| self.expr(a)).collect::<Matched<Vec<_>>>()?;
                Expr::new(ExprKind::Call(Call {
                    args,
                    ..call.clone()
                }))
            }
            ExprKind::Arithmetic {
                op,
                left,
                right
            } => Expr::arithmetic(*op, self.expr(left)?, self.expr(right)?),
            _ => return Err(Mismatch("expression shape"))
        };
        Ok(mapped.with_span(expr.span))
    }

    /// WHERE conjuncts: one event filter plus optional timestamp bounds.
    fn filters(&self, where_clause: &Expr) -> Matched<Vec<Expr>> {
        let conjuncts = match &where_clause.kind {
            ExprKind::And(parts) => parts.iter().collect::<Vec<_>>(),
            _ => vec![where_clause]
        };
        let mut event_filter = None;
        let mut filters = Vec::new();
        for conjunct in conjuncts {
            let ExprKind::Compare {
                op,
                left,
                right
            } = &conjunct.kind
            else {
                return Err(Mismatch("WHERE condition shape"));
            };
            if *op == CompareOp::Eq
                && self.is_field(left, &["event"])
                && matches!(right.as_constant(), Some(ConstantValue::String(_)))
            {
                if event_filter.is_some() {
                    return Err(Mismatch("more than one event filter"));
                }
                event_filter = Some(Expr::compare(CompareOp::Eq, column("event"), right.as_ref().clone()));
                continue;
            }
            if self.is_field(left, &["timestamp"]) {
                // Day buckets answer a bound exactly only on a day boundary,
                // included below and excluded above.
                if !matches!(op, CompareOp::GtEq | CompareOp::Lt) {
                    return Err(Mismatch("timestamp comparison operator"));
                }
                if !is_day_aligned(right) {
                    return Err(Mismatch("timestamp bound inside a day"));
                }
                filters.push(Expr::compare(*op, column("day_bucket"), right.as_ref().clone()));
                continue;
            }
            return Err(Mismatch("WHERE condition"));
        }
        let event_filter = event_filter.ok_or(Mismatch("missing event filter"))?;
        filters.insert(0, event_filter);
        Ok(filters)
    }
}

/// Whether `expr` is a date or datetime literal at midnight.
fn is_day_aligned(expr: &Expr) -> bool {
    let timestamp = match expr.as_constant() {
        Some(ConstantValue::String(s)) => DATETIME_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
            .or_else(|| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(|d| d.and_time(NaiveTime::MIN))),
        Some(ConstantValue::Date(d)) => Some(d.and_time(NaiveTime::MIN)),
        Some(ConstantValue::DateTime(dt)) => Some(dt.naive_utc()),
        _ => None
    };
    timestamp.is_some_and(|ts| ts.time() == NaiveTime::MIN)
}

fn source(query: &SelectQuery) -> Matched<&JoinExpr> {
    let from = query.select_from.as_deref().ok_or(Mismatch("no FROM clause"))?;
    if from.next_join.is_some() {
        return Err(Mismatch("joins"));
    }
    if !matches!(from.table.as_ref().and_then(Expr::chain), Some(chain) if chain.len() == 1 && chain[0].as_name() == Some(SOURCE_TABLE))
    {
        return Err(Mismatch("FROM is not the events table"));
    }
    if let Some(sample) = &from.sample
        && (sample.sample_value.value() != 1.0 || sample.offset_value.is_some())
    {
        return Err(Mismatch("sampling"));
    }
    Ok(from)
}

/// The query rewritten against the summary table, or why it can not be.
pub fn match_preaggregated(query: &SelectQuery) -> Matched<SelectQuery> {
    let from = source(query)?;
    if query.ctes.is_some()
        || query.distinct
        || query.array_join_op.is_some()
        || query.window_exprs.is_some()
        || query.prewhere.is_some()
        || query.having.is_some()
        || query.limit_by.is_some()
        || query.limit_with_ties
    {
        return Err(Mismatch("unsupported clause"));
    }
    let mut qualifiers = vec![SOURCE_TABLE];
    if let Some(alias) = &from.alias {
        qualifiers.push(alias.as_str());
    }
    let aliases = query
        .select
        .iter()
        .filter_map(|e| match &e.kind {
            ExprKind::Alias {
                alias, ..
            } => Some(alias.as_str()),
            _ => None
        })
        .collect();
    let matcher = Matcher {
        qualifiers,
        aliases
    };

    let select = query.select.iter().map(|e| matcher.expr(e)).collect::<Matched<Vec<_>>>()?;
    if !query.select.iter().any(|e| matches!(&e.unaliased().kind, ExprKind::Call(c) if is_aggregation(&c.name))) {
        return Err(Mismatch("no aggregate"));
    }
    let where_clause = match &query.where_clause {
        Some(where_clause) => Expr::and_all(matcher.filters(where_clause)?),
        None => return Err(Mismatch("missing event filter"))
    };
    let group_by = match &query.group_by {
        Some(group_by) => Some(group_by.iter().map(|e| matcher.expr(e)).collect::<Matched<Vec<_>>>()?),
        None => None
    };
    let order_by = match &query.order_by {
        Some(order_by) => Some(
            order_by
                .iter()
                .map(|o| {
                    Ok(OrderExpr {
                        expr:  matcher.expr(&o.expr)?,
                        order: o.order
                    })
                })
                .collect::<Matched<Vec<_>>>()?
        ),
        None => None
    };
    Ok(SelectQuery {
        select,
        select_from: Some(Box::new(JoinExpr::table(Expr::field(&[TARGET_TABLE]), None))),
        where_clause,
        group_by,
        order_by,
        limit: query.limit.clone(),
        offset: query.offset.clone(),
        settings: query.settings.clone(),
        ..Default::default()
    })
}

/// Swap the top-level SELECT of `node` for its summary-table form when the
/// whole query matches.
pub fn apply_preaggregation(node: &mut Expr, ctx: &HogQLContext) -> bool {
    if !ctx.modifiers.use_preaggregated_tables {
        return false;
    }
    let Some(query) = node.as_select() else {
        return false;
    };
    match match_preaggregated(query) {
        Ok(rewritten) => {
            tracing::debug!("using preaggregated event stats");
            let span = node.span;
            *node = Expr::select(rewritten).with_span(span);
            true
        }
        Err(Mismatch(reason)) => {
            tracing::warn!(reason, "preaggregated tables not applicable, querying raw events");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_select;

    fn matched(sql: &str) -> Matched<SelectQuery> {
        let expr = parse_select(sql).expect("parse");
        match_preaggregated(expr.as_select().expect("select"))
    }

    fn call_name(expr: &Expr) -> String {
        match &expr.unaliased().kind {
            ExprKind::Call(call) => call.name.clone(),
            other => panic!("expected a call, got {:?}", other)
        }
    }

    #[test]
    fn test_daily_pageviews_match() {
        let query = matched(
            "SELECT toStartOfDay(timestamp) AS day, count() AS c, uniq(person_id) FROM events \
             WHERE event = '$pageview' AND timestamp >= '2024-01-01' GROUP BY day ORDER BY day"
        )
        .expect("match");
        assert_eq!(call_name(&query.select[1]), "countMerge");
        assert_eq!(call_name(&query.select[2]), "uniqMerge");
        assert!(matches!(query.where_clause.as_ref().map(|w| &w.kind), Some(ExprKind::And(parts)) if parts.len() == 2));
    }

    #[test]
    fn test_dimension_property_maps_to_column() {
        let query = matched(
            "SELECT properties.$browser, count() FROM events WHERE event = '$pageview' GROUP BY properties.$browser"
        )
        .expect("match");
        let chain = query.select[0].chain().expect("field");
        assert_eq!(chain[1].as_name(), Some("browser"));
    }

    #[test]
    fn test_any_unsupported_clause_aborts() {
        assert_eq!(
            matched("SELECT count() FROM events WHERE event = '$pageview' AND properties.plan = 'pro'").err(),
            Some(Mismatch("WHERE condition"))
        );
        assert!(matched("SELECT sum(1) FROM events WHERE event = '$pageview'").is_err());
        assert!(matched("SELECT count() FROM events").is_err());
        assert!(matched("SELECT count() FROM events SAMPLE 0.1 WHERE event = 'a'").is_err());
        assert!(
            matched("SELECT count() FROM events WHERE event = 'a' AND event = 'b'").err()
                == Some(Mismatch("more than one event filter"))
        );
    }

    #[test]
    fn test_day_aligned_bounds_keep_their_operator() {
        let query = matched(
            "SELECT count() FROM events WHERE event = 'a' AND timestamp >= '2024-01-01' \
             AND timestamp < '2024-01-02 00:00:00'"
        )
        .expect("match");
        let Some(ExprKind::And(parts)) = query.where_clause.as_ref().map(|w| &w.kind) else {
            panic!("expected a conjunction");
        };
        let ops: Vec<CompareOp> = parts
            .iter()
            .filter_map(|p| match &p.kind {
                ExprKind::Compare {
                    op, ..
                } => Some(*op),
                _ => None
            })
            .collect();
        assert_eq!(ops, vec![CompareOp::Eq, CompareOp::GtEq, CompareOp::Lt]);
    }

    #[test]
    fn test_bounds_not_answerable_by_day_buckets() {
        for bound in [
            "timestamp > '2024-01-01'",
            "timestamp <= '2024-01-02'",
            "timestamp >= '2024-01-01 12:00:00'",
            "timestamp < '2024-01-02 00:00:01'",
            "timestamp >= today()"
        ] {
            let sql = format!("SELECT count() FROM events WHERE event = 'a' AND {}", bound);
            assert!(matched(&sql).is_err(), "{}", bound);
        }
    }

    #[test]
    fn test_disabled_modifier_leaves_query() {
        let mut expr = parse_select("SELECT count() FROM events WHERE event = 'a'").expect("parse");
        let ctx = HogQLContext::new(1);
        assert!(!apply_preaggregation(&mut expr, &ctx));
    }
}
