//! Tree walking.
//!
//! [`Visitor`] walks a tree by reference, [`VisitorMut`] walks it mutably.
//! Override the `visit_*` methods you care about and call the matching
//! `walk_*` function to continue into children. Passes that rebuild the tree
//! (the resolver) use their own owning traversal instead.

use crate::ast::{Expr, ExprKind, JoinExpr, OrderExpr, SelectQuery, WindowExpr};

pub trait Visitor {
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_select_query(&mut self, query: &SelectQuery) {
        walk_select_query(self, query);
    }

    fn visit_join_expr(&mut self, join: &JoinExpr) {
        walk_join_expr(self, join);
    }

    fn visit_window_expr(&mut self, window: &WindowExpr) {
        walk_window_expr(self, window);
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Constant(_)
        | ExprKind::Field {
            ..
        }
        | ExprKind::Placeholder {
            ..
        }
        | ExprKind::Unanalyzable => {}
        ExprKind::Call(call) => {
            for param in call.params.iter().flatten() {
                visitor.visit_expr(param);
            }
            for arg in &call.args {
                visitor.visit_expr(arg);
            }
        }
        ExprKind::Arithmetic {
            left,
            right,
            ..
        }
        | ExprKind::Compare {
            left,
            right,
            ..
        } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        ExprKind::And(exprs) | ExprKind::Or(exprs) | ExprKind::Tuple(exprs) | ExprKind::Array(exprs) => {
            for e in exprs {
                visitor.visit_expr(e);
            }
        }
        ExprKind::Not(inner) => visitor.visit_expr(inner),
        ExprKind::Between {
            expr,
            low,
            high,
            ..
        } => {
            visitor.visit_expr(expr);
            visitor.visit_expr(low);
            visitor.visit_expr(high);
        }
        ExprKind::ArrayAccess {
            array,
            property,
            ..
        } => {
            visitor.visit_expr(array);
            visitor.visit_expr(property);
        }
        ExprKind::TupleAccess {
            tuple, ..
        } => visitor.visit_expr(tuple),
        ExprKind::Alias {
            expr, ..
        } => visitor.visit_expr(expr),
        ExprKind::Lambda {
            body, ..
        } => visitor.visit_expr(body),
        ExprKind::WindowFunction(window) => {
            for param in window.params.iter().flatten() {
                visitor.visit_expr(param);
            }
            for arg in &window.args {
                visitor.visit_expr(arg);
            }
            if let Some(over) = &window.over_expr {
                visitor.visit_window_expr(over);
            }
        }
        ExprKind::SelectQuery(query) => visitor.visit_select_query(query),
        ExprKind::SelectSetQuery(set) => {
            for query in set.queries() {
                visitor.visit_expr(query);
            }
        }
    }
}

fn visit_order<V: Visitor + ?Sized>(visitor: &mut V, order: &[OrderExpr]) {
    for item in order {
        visitor.visit_expr(&item.expr);
    }
}

pub fn walk_select_query<V: Visitor + ?Sized>(visitor: &mut V, query: &SelectQuery) {
    for cte in query.ctes.iter().flat_map(|c| c.values()) {
        visitor.visit_expr(&cte.expr);
    }
    if let Some(from) = &query.select_from {
        visitor.visit_join_expr(from);
    }
    for expr in &query.select {
        visitor.visit_expr(expr);
    }
    for expr in query.array_join_list.iter().flatten() {
        visitor.visit_expr(expr);
    }
    for window in query.window_exprs.iter().flat_map(|w| w.values()) {
        visitor.visit_window_expr(window);
    }
    for expr in [&query.prewhere, &query.where_clause].into_iter().flatten() {
        visitor.visit_expr(expr);
    }
    for expr in query.group_by.iter().flatten() {
        visitor.visit_expr(expr);
    }
    if let Some(having) = &query.having {
        visitor.visit_expr(having);
    }
    if let Some(order) = &query.order_by {
        visit_order(visitor, order);
    }
    for expr in [&query.limit, &query.offset].into_iter().flatten() {
        visitor.visit_expr(expr);
    }
    if let Some(limit_by) = &query.limit_by {
        visitor.visit_expr(&limit_by.n);
        for expr in &limit_by.exprs {
            visitor.visit_expr(expr);
        }
    }
}

pub fn walk_join_expr<V: Visitor + ?Sized>(visitor: &mut V, join: &JoinExpr) {
    if let Some(table) = &join.table {
        visitor.visit_expr(table);
    }
    if let Some(constraint) = &join.constraint {
        visitor.visit_expr(&constraint.expr);
    }
    if let Some(next) = &join.next_join {
        visitor.visit_join_expr(next);
    }
}

pub fn walk_window_expr<V: Visitor + ?Sized>(visitor: &mut V, window: &WindowExpr) {
    for expr in window.partition_by.iter().flatten() {
        visitor.visit_expr(expr);
    }
    if let Some(order) = &window.order_by {
        visit_order(visitor, order);
    }
}

pub trait VisitorMut {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        walk_expr_mut(self, expr);
    }

    fn visit_select_query_mut(&mut self, query: &mut SelectQuery) {
        walk_select_query_mut(self, query);
    }

    fn visit_join_expr_mut(&mut self, join: &mut JoinExpr) {
        walk_join_expr_mut(self, join);
    }

    fn visit_window_expr_mut(&mut self, window: &mut WindowExpr) {
        walk_window_expr_mut(self, window);
    }
}

pub fn walk_expr_mut<V: VisitorMut + ?Sized>(visitor: &mut V, expr: &mut Expr) {
    match &mut expr.kind {
        ExprKind::Constant(_)
        | ExprKind::Field {
            ..
        }
        | ExprKind::Placeholder {
            ..
        }
        | ExprKind::Unanalyzable => {}
        ExprKind::Call(call) => {
            for param in call.params.iter_mut().flatten() {
                visitor.visit_expr_mut(param);
            }
            for arg in &mut call.args {
                visitor.visit_expr_mut(arg);
            }
        }
        ExprKind::Arithmetic {
            left,
            right,
            ..
        }
        | ExprKind::Compare {
            left,
            right,
            ..
        } => {
            visitor.visit_expr_mut(left);
            visitor.visit_expr_mut(right);
        }
        ExprKind::And(exprs) | ExprKind::Or(exprs) | ExprKind::Tuple(exprs) | ExprKind::Array(exprs) => {
            for e in exprs {
                visitor.visit_expr_mut(e);
            }
        }
        ExprKind::Not(inner) => visitor.visit_expr_mut(inner),
        ExprKind::Between {
            expr,
            low,
            high,
            ..
        } => {
            visitor.visit_expr_mut(expr);
            visitor.visit_expr_mut(low);
            visitor.visit_expr_mut(high);
        }
        ExprKind::ArrayAccess {
            array,
            property,
            ..
        } => {
            visitor.visit_expr_mut(array);
            visitor.visit_expr_mut(property);
        }
        ExprKind::TupleAccess {
            tuple, ..
        } => visitor.visit_expr_mut(tuple),
        ExprKind::Alias {
            expr, ..
        } => visitor.visit_expr_mut(expr),
        ExprKind::Lambda {
            body, ..
        } => visitor.visit_expr_mut(body),
        ExprKind::WindowFunction(window) => {
            for param in window.params.iter_mut().flatten() {
                visitor.visit_expr_mut(param);
            }
            for arg in &mut window.args {
                visitor.visit_expr_mut(arg);
            }
            if let Some(over) = &mut window.over_expr {
                visitor.visit_window_expr_mut(over);
            }
        }
        ExprKind::SelectQuery(query) => visitor.visit_select_query_mut(query),
        ExprKind::SelectSetQuery(set) => {
            for query in set.queries_mut() {
                visitor.visit_expr_mut(query);
            }
        }
    }
}

fn visit_order_mut<V: VisitorMut + ?Sized>(visitor: &mut V, order: &mut [OrderExpr]) {
    for item in order {
        visitor.visit_expr_mut(&mut item.expr);
    }
}

pub fn walk_select_query_mut<V: VisitorMut + ?Sized>(visitor: &mut V, query: &mut SelectQuery) {
    for cte in query.ctes.iter_mut().flat_map(|c| c.values_mut()) {
        visitor.visit_expr_mut(&mut cte.expr);
    }
    if let Some(from) = &mut query.select_from {
        visitor.visit_join_expr_mut(from);
    }
    for expr in &mut query.select {
        visitor.visit_expr_mut(expr);
    }
    for expr in query.array_join_list.iter_mut().flatten() {
        visitor.visit_expr_mut(expr);
    }
    for window in query.window_exprs.iter_mut().flat_map(|w| w.values_mut()) {
        visitor.visit_window_expr_mut(window);
    }
    for expr in [&mut query.prewhere, &mut query.where_clause].into_iter().flatten() {
        visitor.visit_expr_mut(expr);
    }
    for expr in query.group_by.iter_mut().flatten() {
        visitor.visit_expr_mut(expr);
    }
    if let Some(having) = &mut query.having {
        visitor.visit_expr_mut(having);
    }
    if let Some(order) = &mut query.order_by {
        visit_order_mut(visitor, order);
    }
    for expr in [&mut query.limit, &mut query.offset].into_iter().flatten() {
        visitor.visit_expr_mut(expr);
    }
    if let Some(limit_by) = &mut query.limit_by {
        visitor.visit_expr_mut(&mut limit_by.n);
        for expr in &mut limit_by.exprs {
            visitor.visit_expr_mut(expr);
        }
    }
}

pub fn walk_join_expr_mut<V: VisitorMut + ?Sized>(visitor: &mut V, join: &mut JoinExpr) {
    if let Some(table) = &mut join.table {
        visitor.visit_expr_mut(table);
    }
    if let Some(constraint) = &mut join.constraint {
        visitor.visit_expr_mut(&mut constraint.expr);
    }
    if let Some(next) = &mut join.next_join {
        visitor.visit_join_expr_mut(next);
    }
}

pub fn walk_window_expr_mut<V: VisitorMut + ?Sized>(visitor: &mut V, window: &mut WindowExpr) {
    for expr in window.partition_by.iter_mut().flatten() {
        visitor.visit_expr_mut(expr);
    }
    if let Some(order) = &mut window.order_by {
        visit_order_mut(visitor, order);
    }
}

struct TypeClearer;

impl VisitorMut for TypeClearer {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        expr.ty = None;
        walk_expr_mut(self, expr);
    }

    fn visit_join_expr_mut(&mut self, join: &mut JoinExpr) {
        join.ty = None;
        walk_join_expr_mut(self, join);
    }
}

/// Drop every resolved type so the tree can be resolved again.
pub fn clear_types(expr: &mut Expr) {
    TypeClearer.visit_expr_mut(expr);
}

/// Deep copy, optionally without types.
pub fn clone_expr(expr: &Expr, keep_types: bool) -> Expr {
    let mut copy = expr.clone();
    if !keep_types {
        clear_types(&mut copy);
    }
    copy
}

struct SpanClearer;

impl VisitorMut for SpanClearer {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        expr.span = None;
        walk_expr_mut(self, expr);
    }
}

/// Drop source locations, e.g. before comparing trees in tests.
pub fn clear_spans(expr: &mut Expr) {
    SpanClearer.visit_expr_mut(expr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CompareOp, Expr};

    struct FieldCounter(usize);

    impl Visitor for FieldCounter {
        fn visit_expr(&mut self, expr: &Expr) {
            if matches!(expr.kind, ExprKind::Field { .. }) {
                self.0 += 1;
            }
            walk_expr(self, expr);
        }
    }

    #[test]
    fn test_visitor_reaches_nested_fields() {
        let expr = Expr::and(vec![
            Expr::compare(CompareOp::Eq, Expr::field(&["a"]), Expr::constant(1i64)),
            Expr::not(Expr::call("isNull", vec![Expr::field(&["b"])])),
        ]);
        let mut counter = FieldCounter(0);
        counter.visit_expr(&expr);
        assert_eq!(counter.0, 2);
    }

    #[test]
    fn test_clear_types() {
        let mut expr = Expr::field(&["a"]).with_type(crate::ast::Type::Unresolved {
            name: "a".into()
        });
        clear_types(&mut expr);
        assert!(expr.ty.is_none());
    }
}
