//! Two-phase aggregation.
//!
//! [`to_state_aggregations`] turns a query's aggregates into their `State`
//! forms so its rows carry partial aggregate states. [`wrap_with_merge`]
//! puts such a query under an outer SELECT that combines the states with the
//! matching `Merge` forms, grouped by the remaining columns.

use crate::{
    ast::{Call, ChainItem, Expr, ExprKind, JoinExpr, OrderExpr, SelectQuery},
    error::{HogQLResult, query_error},
    functions::{STATE_AGGREGATES, is_aggregation},
    visitor::{Visitor, walk_expr}
};

struct AggregateFinder(bool);

impl Visitor for AggregateFinder {
    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Call(call) = &expr.kind
            && is_aggregation(&call.name)
        {
            self.0 = true;
            return;
        }
        walk_expr(self, expr);
    }

    fn visit_select_query(&mut self, _query: &SelectQuery) {}
}

fn contains_aggregate(expr: &Expr) -> bool {
    let mut finder = AggregateFinder(false);
    finder.visit_expr(expr);
    finder.0
}

/// Base aggregate of `call` once `DISTINCT` is folded into the name.
fn state_base(call: &Call) -> HogQLResult<String> {
    let name = match (call.name.as_str(), call.distinct) {
        ("count", true) => "uniqExact",
        (_, true) => {
            return Err(query_error(format!("`{}(DISTINCT ...)` has no state form", call.name)));
        }
        (name, false) => name
    };
    if !STATE_AGGREGATES.contains(&name) {
        return Err(query_error(format!("Aggregation `{}` has no state form", call.name)));
    }
    Ok(name.to_string())
}

fn unaliased_mut(expr: &mut Expr) -> &mut Expr {
    match expr.kind {
        ExprKind::Alias {
            expr: ref mut inner,
            ..
        } => unaliased_mut(inner),
        _ => expr
    }
}

fn state_item(item: &mut Expr) -> HogQLResult<bool> {
    let target = unaliased_mut(item);
    if let ExprKind::Call(call) = &mut target.kind
        && is_aggregation(&call.name)
    {
        let base = state_base(call)?;
        call.name = format!("{}State", base);
        call.distinct = false;
        return Ok(true);
    }
    if contains_aggregate(target) {
        return Err(query_error("Only top-level aggregates can be converted to states"));
    }
    Ok(false)
}

/// Rewrite the aggregates in `query`'s SELECT list to their `State` forms.
///
/// Returns the indexes of the rewritten columns.
pub fn to_state_aggregations(query: &mut SelectQuery) -> HogQLResult<Vec<usize>> {
    if query.having.is_some() {
        return Err(query_error("HAVING can not be combined with aggregate states"));
    }
    let mut states = Vec::new();
    for (index, item) in query.select.iter_mut().enumerate() {
        if state_item(item)? {
            states.push(index);
        }
    }
    tracing::debug!(states = states.len(), "converted aggregates to states");
    Ok(states)
}

/// Output name of a SELECT item, if it has one.
fn column_name(item: &Expr) -> Option<String> {
    match &item.kind {
        ExprKind::Alias {
            alias, ..
        } => Some(alias.clone()),
        ExprKind::Field {
            chain
        } => match chain.last() {
            Some(ChainItem::Name(name)) => Some(name.clone()),
            _ => None
        },
        _ => None
    }
}

fn merge_name(state: &str) -> Option<String> {
    state.strip_suffix("State").map(|base| format!("{}Merge", base))
}

/// Outer ORDER BY entry for an inner one, by column name.
fn outer_order(order: OrderExpr, inner: &[Expr], names: &[String]) -> HogQLResult<OrderExpr> {
    if let ExprKind::Field {
        chain
    } = &order.expr.kind
        && let [ChainItem::Name(name)] = chain.as_slice()
        && names.contains(name)
    {
        return Ok(order);
    }
    let position = inner
        .iter()
        .position(|item| item.unaliased() == order.expr.unaliased())
        .ok_or_else(|| query_error("ORDER BY must reference a selected column when merging aggregate states"))?;
    Ok(OrderExpr {
        expr:  Expr::field(&[names[position].as_str()]),
        order: order.order
    })
}

/// Put a state-producing `query` under a SELECT that merges its states.
///
/// Columns are named after their aliases, or `col_N` when they have none.
/// ORDER BY, LIMIT and OFFSET move to the outer query.
pub fn wrap_with_merge(mut query: SelectQuery) -> HogQLResult<SelectQuery> {
    let mut names = Vec::with_capacity(query.select.len());
    for (index, item) in query.select.iter_mut().enumerate() {
        let name = match column_name(item) {
            Some(name) => name,
            None => {
                let name = format!("col_{}", index);
                let expr = std::mem::replace(item, Expr::null());
                *item = Expr::alias(name.clone(), expr);
                name
            }
        };
        names.push(name);
    }

    let mut select = Vec::with_capacity(names.len());
    let mut group_by = Vec::new();
    for (item, name) in query.select.iter().zip(&names) {
        let column = Expr::field(&[name.as_str()]);
        match &item.unaliased().kind {
            ExprKind::Call(call) if call.name.ends_with("State") => {
                let merge = merge_name(&call.name)
                    .ok_or_else(|| query_error(format!("Aggregation `{}` is not a state", call.name)))?;
                select.push(Expr::alias(name.clone(), Expr::call(merge, vec![column])));
            }
            _ => {
                group_by.push(column.clone());
                select.push(column);
            }
        }
    }

    let order_by = match query.order_by.take() {
        Some(order) => Some(
            order
                .into_iter()
                .map(|o| outer_order(o, &query.select, &names))
                .collect::<HogQLResult<Vec<_>>>()?
        ),
        None => None
    };
    let limit = query.limit.take();
    let offset = query.offset.take();
    Ok(SelectQuery {
        select,
        select_from: Some(Box::new(JoinExpr::table(Expr::select(query), None))),
        group_by: (!group_by.is_empty()).then_some(group_by),
        order_by,
        limit,
        offset,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_select;

    fn select(sql: &str) -> SelectQuery {
        match parse_select(sql).expect("parse").kind {
            ExprKind::SelectQuery(query) => *query,
            _ => panic!("expected a SELECT")
        }
    }

    fn call_name(expr: &Expr) -> &str {
        match &expr.unaliased().kind {
            ExprKind::Call(call) => &call.name,
            _ => panic!("expected a call")
        }
    }

    #[test]
    fn test_aggregates_become_states() {
        let mut query = select("SELECT event, count() AS c, uniq(person_id) AS u FROM events GROUP BY event");
        let states = to_state_aggregations(&mut query).expect("states");
        assert_eq!(states, vec![1, 2]);
        assert_eq!(call_name(&query.select[1]), "countState");
        assert_eq!(call_name(&query.select[2]), "uniqState");
    }

    #[test]
    fn test_count_distinct_uses_exact_uniq() {
        let mut query = select("SELECT count(DISTINCT person_id) FROM events");
        to_state_aggregations(&mut query).expect("states");
        assert_eq!(call_name(&query.select[0]), "uniqExactState");
    }

    #[test]
    fn test_nested_aggregate_is_rejected() {
        let mut query = select("SELECT count() * 2 FROM events");
        assert!(to_state_aggregations(&mut query).is_err());
    }

    #[test]
    fn test_merge_wrapper_groups_by_plain_columns() {
        let mut query = select("SELECT event, count() AS c FROM events GROUP BY event ORDER BY c DESC LIMIT 10");
        to_state_aggregations(&mut query).expect("states");
        let outer = wrap_with_merge(query).expect("merge");
        assert_eq!(call_name(&outer.select[1]), "countMerge");
        assert_eq!(outer.group_by.as_ref().map(Vec::len), Some(1));
        assert!(outer.limit.is_some());
        let inner = outer.select_from.as_ref().and_then(|f| f.table.as_ref()).and_then(Expr::as_select);
        assert!(inner.is_some_and(|q| q.limit.is_none() && q.order_by.is_none()));
    }

    #[test]
    fn test_unnamed_columns_get_positional_names() {
        let mut query = select("SELECT toDate(timestamp), sum(1) FROM events GROUP BY toDate(timestamp)");
        to_state_aggregations(&mut query).expect("states");
        let outer = wrap_with_merge(query).expect("merge");
        assert_eq!(column_name(&outer.select[0]).as_deref(), Some("col_0"));
        assert_eq!(column_name(&outer.select[1]).as_deref(), Some("col_1"));
    }
}
