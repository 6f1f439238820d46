//! Pushing WHERE conditions on `events` below its joins.
//!
//! For a SELECT whose FROM is `events` followed by joins, the conjuncts of
//! WHERE that only read `events` columns are evaluated inside a subquery
//! that replaces the table:
//!
//! ```text
//! FROM (SELECT <columns the query reads> FROM events WHERE <conjuncts>) AS events
//! ```
//!
//! so the joins only see matching events. The subquery's table gets its own
//! tenant guard when printed. When a reference to `events` can not be
//! mapped to a physical column the query is left untouched.

use std::sync::Arc;

use indexmap::IndexSet;

use super::where_clause::{PredicateTarget, exact};
use crate::{
    ast::{
        Chain, Expr, ExprKind, FieldAliasType, FieldType, JoinExpr, PropertyType, SelectQuery, TableType, Type
    },
    context::HogQLContext,
    database::DatabaseField,
    error::{HogQLError, HogQLResult, internal_error},
    printer::Dialect,
    resolver::resolve_types,
    visitor::{Visitor, VisitorMut, walk_expr, walk_expr_mut, walk_select_query, walk_select_query_mut}
};

const EVENTS: &str = "events";

/// Why pushdown was skipped for a SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    NotApplicable,
    Abort(&'static str)
}

/// Whether `table_type` is the stored events table, possibly aliased.
fn is_events(table_type: &TableType) -> bool {
    match table_type {
        TableType::Table {
            table
        } => table.name == EVENTS,
        TableType::Alias {
            inner, ..
        } => is_events(inner),
        _ => false
    }
}

/// Whether `table_type` reaches events table `key` through a lazy join or a
/// virtual table.
fn is_indirect(table_type: &TableType, key: &str) -> bool {
    match table_type {
        TableType::LazyJoin {
            parent, ..
        }
        | TableType::Virtual {
            parent, ..
        } => parent.print_name() == key || is_indirect(parent, key),
        _ => false
    }
}

/// Physical column read by a reference to the events table `key`.
fn events_column(ty: &Type, key: &str) -> Result<Option<String>, Skip> {
    let field = match ty.unwrap_alias() {
        Type::Field(field) => field,
        Type::Property(property) => &property.field_type,
        Type::Asterisk(asterisk) if asterisk.table_type.print_name() == key => {
            return Err(Skip::Abort("asterisk"));
        }
        _ => return Ok(None)
    };
    if is_indirect(&field.table_type, key) {
        return Err(Skip::Abort("field reached through a lazy join or virtual table"));
    }
    if !is_events(&field.table_type) || field.table_type.print_name() != key {
        return Ok(None);
    }
    match field.resolve_database_field() {
        Some(DatabaseField::Column(_)) => Ok(Some(field.name.clone())),
        _ => Err(Skip::Abort("field without a physical column"))
    }
}

/// Every events column the query reads, including from nested SELECTs.
struct ColumnCollector<'a> {
    key:     &'a str,
    columns: IndexSet<String>,
    abort:   Option<&'static str>
}

impl Visitor for ColumnCollector<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if self.abort.is_some() {
            return;
        }
        if matches!(expr.kind, ExprKind::Field { .. })
            && let Some(ty) = &expr.ty
        {
            match events_column(ty, self.key) {
                Ok(Some(column)) => {
                    self.columns.insert(column);
                }
                Ok(None) | Err(Skip::NotApplicable) => {}
                Err(Skip::Abort(reason)) => self.abort = Some(reason)
            }
        }
        walk_expr(self, expr);
    }
}

/// Conditions that only read columns of the events table `key`.
struct EventsTarget<'a> {
    key: &'a str
}

impl PredicateTarget for EventsTarget<'_> {
    fn rewrite_field(&self, field: &Expr) -> Option<Expr> {
        let ty = field.ty.as_ref()?;
        let column = events_column(ty, self.key).ok()??;
        let mut chain = Chain::from_iter([EVENTS.into(), column.as_str().into()]);
        if let Type::Property(property) = ty.unwrap_alias() {
            chain.extend(property.chain.iter().cloned());
        }
        Some(Expr::field_chain(chain))
    }
}

/// Retargets events references at the subquery's columns.
struct Retyper<'a> {
    key:      &'a str,
    new_type: &'a TableType
}

impl Retyper<'_> {
    fn retype(&self, ty: &Type) -> Option<Type> {
        match ty {
            Type::FieldAlias(alias) => self.retype(&alias.ty).map(|inner| {
                Type::FieldAlias(FieldAliasType {
                    alias: alias.alias.clone(),
                    ty:    Box::new(inner)
                })
            }),
            Type::Field(field) if is_events(&field.table_type) && field.table_type.print_name() == self.key => {
                Some(Type::Field(FieldType::new(field.name.clone(), self.new_type.clone())))
            }
            Type::Property(property)
                if is_events(&property.field_type.table_type)
                    && property.field_type.table_type.print_name() == self.key =>
            {
                Some(Type::Property(PropertyType {
                    field_type: FieldType::new(property.field_type.name.clone(), self.new_type.clone()),
                    ..property.clone()
                }))
            }
            _ => None
        }
    }
}

impl VisitorMut for Retyper<'_> {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        if let Some(ty) = &expr.ty
            && let Some(new_ty) = self.retype(ty)
        {
            if let ExprKind::Field {
                chain
            } = &mut expr.kind
            {
                let mut rewritten = Chain::from_iter([self.key.into()]);
                match &new_ty {
                    Type::Field(field) => rewritten.push(field.name.as_str().into()),
                    Type::Property(property) => {
                        rewritten.push(property.field_type.name.as_str().into());
                        rewritten.extend(property.chain.iter().cloned());
                    }
                    _ => rewritten = chain.clone()
                }
                *chain = rewritten;
            }
            expr.ty = Some(new_ty);
        }
        walk_expr_mut(self, expr);
    }

    fn visit_select_query_mut(&mut self, _query: &mut SelectQuery) {}
}

fn has_field(expr: &Expr) -> bool {
    struct Finder(bool);

    impl Visitor for Finder {
        fn visit_expr(&mut self, expr: &Expr) {
            if matches!(expr.kind, ExprKind::Field { .. }) {
                self.0 = true;
            }
            walk_expr(self, expr);
        }
    }

    let mut finder = Finder(false);
    finder.visit_expr(expr);
    finder.0
}

fn conjuncts(where_clause: &Expr) -> Vec<&Expr> {
    match &where_clause.kind {
        ExprKind::And(parts) => parts.iter().collect(),
        _ => vec![where_clause]
    }
}

fn has_right_or_full_join(from: &JoinExpr) -> bool {
    from.iter().skip(1).any(|join| {
        join.join_type.as_deref().is_some_and(|j| {
            let upper = j.to_ascii_uppercase();
            upper.contains("RIGHT") || upper.contains("FULL")
        })
    })
}

fn push_down_scope(expr: &mut Expr, ctx: &mut HogQLContext, dialect: Dialect) -> HogQLResult<Result<usize, Skip>> {
    let Some(Type::SelectQuery(scope)) = expr.ty.clone() else {
        return Err(internal_error("SELECT query without a resolved scope"));
    };
    let ExprKind::SelectQuery(query) = &mut expr.kind else {
        return Ok(Err(Skip::NotApplicable));
    };
    let (Some(from), Some(where_clause)) = (query.select_from.as_deref(), query.where_clause.as_ref()) else {
        return Ok(Err(Skip::NotApplicable));
    };
    let Some(from_type) = from.ty.as_ref().filter(|t| is_events(t)) else {
        return Ok(Err(Skip::NotApplicable));
    };
    if from.next_join.is_none() {
        return Ok(Err(Skip::NotApplicable));
    }
    if has_right_or_full_join(from) {
        return Ok(Err(Skip::Abort("RIGHT or FULL join")));
    }
    if from.sample.is_some() || from.table_final {
        return Ok(Err(Skip::Abort("sampled or FINAL table")));
    }
    let key = from_type.print_name();

    let target = EventsTarget {
        key: &key
    };
    let mut pushed = Vec::new();
    let mut pushed_indexes = Vec::new();
    for (index, conjunct) in conjuncts(where_clause).into_iter().enumerate() {
        if has_field(conjunct)
            && let Some(inner) = exact(conjunct, &target)
        {
            pushed.push(inner);
            pushed_indexes.push(index);
        }
    }
    if pushed.is_empty() {
        return Ok(Err(Skip::NotApplicable));
    }

    let mut collector = ColumnCollector {
        key:     &key,
        columns: IndexSet::new(),
        abort:   None
    };
    walk_select_query(&mut collector, query);
    if let Some(reason) = collector.abort {
        return Ok(Err(Skip::Abort(reason)));
    }

    let columns = collector.columns.iter().map(|c| Expr::field(&[c.as_str()])).collect();
    let mut inner = SelectQuery::from_table(columns, EVENTS, None);
    inner.where_clause = Expr::and_all(pushed);
    let inner = resolve_types(Expr::select(inner), ctx, dialect, &[])?;
    let Some(Type::SelectQuery(inner_scope)) = inner.ty.clone() else {
        return Err(internal_error("Pushed-down events subquery was not resolved"));
    };
    let new_type = TableType::SelectQueryAlias {
        alias:  key.clone(),
        select: inner_scope
    };

    let kept: Vec<Expr> = match query.where_clause.take().map(|w| w.kind) {
        Some(ExprKind::And(parts)) => parts
            .into_iter()
            .enumerate()
            .filter(|(index, _)| !pushed_indexes.contains(index))
            .map(|(_, part)| part)
            .collect(),
        _ => Vec::new()
    };
    query.where_clause = Expr::and_all(kept);

    let mut retyper = Retyper {
        key:      &key,
        new_type: &new_type
    };
    walk_select_query_mut(&mut retyper, query);
    if let Some(from) = query.select_from.as_deref_mut() {
        from.table = Some(inner);
        from.alias = Some(key.clone());
        from.ty = Some(new_type.clone());
    }

    let mut updated = scope.as_ref().clone();
    updated.tables.insert(key.clone(), new_type.clone());
    for ty in updated.columns.values_mut() {
        if let Some(new_ty) = retyper.retype(ty) {
            *ty = new_ty;
        }
    }
    for alias in updated.aliases.values_mut() {
        if let Some(new_ty) = retyper.retype(&alias.ty) {
            alias.ty = Box::new(new_ty);
        }
    }
    expr.ty = Some(Type::SelectQuery(Arc::new(updated)));
    Ok(Ok(pushed_indexes.len()))
}

struct Pushdown<'a> {
    ctx:     &'a mut HogQLContext,
    dialect: Dialect,
    pushed:  usize,
    error:   Option<HogQLError>
}

impl VisitorMut for Pushdown<'_> {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        if self.error.is_some() {
            return;
        }
        walk_expr_mut(self, expr);
        if !matches!(expr.kind, ExprKind::SelectQuery(_)) {
            return;
        }
        match push_down_scope(expr, self.ctx, self.dialect) {
            Ok(Ok(count)) => self.pushed += count,
            Ok(Err(Skip::NotApplicable)) => {}
            Ok(Err(Skip::Abort(reason))) => {
                tracing::warn!(reason, "skipping events predicate pushdown");
            }
            Err(err) => self.error = Some(err)
        }
    }
}

/// Move WHERE conditions on `events` into a filtered subquery in every
/// SELECT of `node` that joins other tables to `events`.
pub fn push_down_predicates(node: &mut Expr, ctx: &mut HogQLContext, dialect: Dialect) -> HogQLResult<()> {
    if !ctx.modifiers.push_down_predicates {
        return Ok(());
    }
    let mut pushdown = Pushdown {
        ctx,
        dialect,
        pushed: 0,
        error: None
    };
    pushdown.visit_expr_mut(node);
    if let Some(err) = pushdown.error {
        return Err(err);
    }
    tracing::debug!(predicates_pushed = pushdown.pushed, "pushed down events predicates");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::HogQLQueryModifiers, database::Database, parser::parse_select};

    fn pushed(sql: &str) -> Expr {
        let modifiers = HogQLQueryModifiers {
            push_down_predicates: true,
            ..Default::default()
        };
        let database = Database::create_for(Some(1), &modifiers);
        let mut ctx = HogQLContext::new(1)
            .with_database(Arc::new(database))
            .with_modifiers(modifiers);
        let mut expr =
            resolve_types(parse_select(sql).expect("parse"), &mut ctx, Dialect::ClickHouse, &[]).expect("resolve");
        push_down_predicates(&mut expr, &mut ctx, Dialect::ClickHouse).expect("pushdown");
        expr
    }

    fn from_subquery(expr: &Expr) -> Option<&SelectQuery> {
        expr.as_select()?.select_from.as_ref()?.table.as_ref()?.as_select()
    }

    #[test]
    fn test_events_conjunct_moves_into_subquery() {
        let expr = pushed(
            "SELECT e.event, s.session_id FROM events AS e JOIN sessions AS s ON e.$session_id = s.session_id \
             WHERE e.event = '$pageview' AND s.duration > 10"
        );
        let inner = from_subquery(&expr).expect("events subquery");
        assert!(inner.where_clause.is_some());
        let columns: Vec<String> = inner
            .select
            .iter()
            .filter_map(|c| c.unaliased().chain().and_then(|ch| ch.last()).map(ToString::to_string))
            .collect();
        assert!(columns.contains(&"event".to_string()));
        assert!(columns.contains(&"$session_id".to_string()));
        let outer = expr.as_select().expect("select");
        assert!(matches!(outer.where_clause.as_ref().map(|w| &w.kind), Some(ExprKind::Compare { .. })));
    }

    #[test]
    fn test_without_joins_nothing_changes() {
        let expr = pushed("SELECT event FROM events WHERE event = '$pageview'");
        assert!(from_subquery(&expr).is_none());
    }

    #[test]
    fn test_lazy_join_reference_aborts() {
        let expr = pushed(
            "SELECT e.person.id FROM events AS e JOIN sessions AS s ON e.$session_id = s.session_id \
             WHERE e.event = '$pageview'"
        );
        assert!(from_subquery(&expr).is_none());
        assert!(expr.as_select().and_then(|q| q.where_clause.as_ref()).is_some());
    }
}
