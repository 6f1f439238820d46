//! Lazy table and lazy join expansion.
//!
//! Fields reached through a lazy table (a table in FROM whose rows come from
//! a generated subquery) or a lazy join (`events.person...`) are not physical
//! columns of the query. For every SELECT this pass collects those fields,
//! asks each lazy target for a subquery selecting exactly them, resolves the
//! subquery, splices it into the join chain and retargets the references at
//! the subquery's columns.
//!
//! Generated subqueries may themselves contain lazy references, so the pass
//! runs until none remain, at most [`MAX_LAZY_ITERATIONS`] times.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    ast::{
        Chain, ConstraintType, Expr, ExprKind, FieldAliasType, FieldType, JoinExpr, SelectQuery,
        SelectQueryType, TableType, Type
    },
    context::HogQLContext,
    database::LazyRequest,
    error::{HogQLError, HogQLResult, internal_error, query_error},
    printer::Dialect,
    resolver::resolve_types,
    visitor::{Visitor, VisitorMut, walk_expr, walk_expr_mut, walk_join_expr, walk_select_query, walk_select_query_mut}
};

pub const MAX_LAZY_ITERATIONS: usize = 10;

/// Joins chain segments into the column name used inside generated subqueries.
const SEPARATOR: &str = "___";

fn column_alias(chain: &Chain) -> String {
    chain.iter().map(ToString::to_string).collect::<Vec<_>>().join(SEPARATOR)
}

/// Lazy table that owns `chain` on `table`, with the chain made relative to it.
fn lazy_owner(table: &TableType, chain: Chain) -> Option<(TableType, Chain)> {
    match table {
        TableType::Lazy {
            ..
        }
        | TableType::LazyJoin {
            ..
        } => Some((table.clone(), chain)),
        TableType::Alias {
            inner, ..
        } if inner.is_lazy() => Some((table.clone(), chain)),
        TableType::Virtual {
            parent,
            field,
            ..
        } if parent.is_lazy() => {
            let mut full = Chain::from_iter([field.as_str().into()]);
            full.extend(chain);
            lazy_owner(parent, full)
        }
        _ => None
    }
}

/// Owner and relative chain of a field or property type.
fn lazy_reference(ty: &Type) -> Option<(TableType, Chain)> {
    match ty.unwrap_alias() {
        Type::Field(field) => {
            lazy_owner(&field.table_type, Chain::from_iter([field.name.as_str().into()]))
        }
        Type::Property(property) => {
            let mut chain = Chain::from_iter([property.field_type.name.as_str().into()]);
            chain.extend(property.chain.iter().cloned());
            lazy_owner(&property.field_type.table_type, chain)
        }
        _ => None
    }
}

fn type_is_lazy(ty: &Type) -> bool {
    match ty {
        Type::Table(table) => table.is_lazy(),
        Type::Asterisk(asterisk) => asterisk.table_type.is_lazy(),
        Type::FieldAlias(alias) => type_is_lazy(&alias.ty),
        other => lazy_reference(other).is_some()
    }
}

#[derive(Default)]
struct LazyFinder {
    found: bool
}

impl Visitor for LazyFinder {
    fn visit_expr(&mut self, expr: &Expr) {
        if self.found {
            return;
        }
        if expr.ty.as_ref().is_some_and(type_is_lazy) {
            self.found = true;
            return;
        }
        walk_expr(self, expr);
    }

    fn visit_join_expr(&mut self, join: &JoinExpr) {
        if join.ty.as_ref().is_some_and(TableType::is_lazy) {
            self.found = true;
            return;
        }
        walk_join_expr(self, join);
    }
}

fn has_lazy(expr: &Expr) -> bool {
    let mut finder = LazyFinder::default();
    finder.visit_expr(expr);
    finder.found
}

/// Expand every lazy table and lazy join reachable from `node`.
pub fn resolve_lazy_tables(node: &mut Expr, ctx: &mut HogQLContext, dialect: Dialect) -> HogQLResult<()> {
    for iteration in 0..MAX_LAZY_ITERATIONS {
        if !has_lazy(node) {
            tracing::debug!(iterations = iteration, "lazy tables resolved");
            return Ok(());
        }
        if !matches!(node.kind, ExprKind::SelectQuery(_) | ExprKind::SelectSetQuery(_)) {
            return Err(internal_error("Lazy field found outside of a SELECT query"));
        }
        let mut expander = Expander {
            ctx: &mut *ctx,
            dialect,
            error: None
        };
        expander.visit_expr_mut(node);
        if let Some(err) = expander.error {
            return Err(err);
        }
    }
    if has_lazy(node) {
        return Err(query_error(format!(
            "Lazy tables still unresolved after {} passes; the schema probably defines a cyclic lazy join",
            MAX_LAZY_ITERATIONS
        )));
    }
    Ok(())
}

struct Expander<'a> {
    ctx:     &'a mut HogQLContext,
    dialect: Dialect,
    error:   Option<HogQLError>
}

impl VisitorMut for Expander<'_> {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        if self.error.is_some() {
            return;
        }
        walk_expr_mut(self, expr);
        if matches!(expr.kind, ExprKind::SelectQuery(_))
            && let Err(err) = expand_scope(expr, self.ctx, self.dialect)
        {
            self.error = Some(err);
        }
    }
}

/// Fields referenced by one SELECT, without entering nested SELECTs.
#[derive(Default)]
struct ReferenceCollector {
    properties: Vec<(TableType, Chain)>,
    fields:     Vec<(TableType, Chain)>
}

impl Visitor for ReferenceCollector {
    fn visit_expr(&mut self, expr: &Expr) {
        if matches!(expr.kind, ExprKind::Field { .. })
            && let Some(ty) = &expr.ty
            && let Some(reference) = lazy_reference(ty)
        {
            if matches!(ty.unwrap_alias(), Type::Property(_)) {
                self.properties.push(reference);
            } else {
                self.fields.push(reference);
            }
        }
        walk_expr(self, expr);
    }

    fn visit_select_query(&mut self, _query: &SelectQuery) {}
}

/// Fields one lazy target has to provide.
struct Owner {
    table_type: TableType,
    fields:     IndexMap<String, Chain>
}

#[derive(Default)]
struct Owners {
    owners: IndexMap<String, Owner>
}

impl Owners {
    /// Register `table_type`, parents first, and return its key.
    fn register(&mut self, table_type: &TableType) -> String {
        if let TableType::LazyJoin {
            parent,
            join,
            ..
        } = table_type
            && let Some((parent_owner, chain)) = lazy_owner(parent, join.from_field.clone())
        {
            let parent_key = self.register(&parent_owner);
            if let Some(owner) = self.owners.get_mut(&parent_key) {
                owner.fields.insert(column_alias(&chain), chain);
            }
        }
        let key = table_type.print_name();
        self.owners.entry(key.clone()).or_insert_with(|| Owner {
            table_type: table_type.clone(),
            fields:     IndexMap::new()
        });
        key
    }

    fn add(&mut self, table_type: &TableType, chain: Chain) {
        let key = self.register(table_type);
        if let Some(owner) = self.owners.get_mut(&key) {
            owner.fields.insert(column_alias(&chain), chain);
        }
    }
}

/// Replacement computed for one lazy target.
enum Expansion {
    /// Lazy table already in the join chain, replaced in place
    Replace {
        table: Expr
    },
    /// Lazy join inserted after the join that introduces `parent`
    Insert {
        parent: String,
        join:   JoinExpr
    }
}

fn select_type_of(expr: &Expr) -> HogQLResult<Arc<SelectQueryType>> {
    match &expr.ty {
        Some(Type::SelectQuery(select)) => Ok(Arc::clone(select)),
        _ => Err(internal_error("Generated lazy subquery was not resolved"))
    }
}

fn expand_scope(expr: &mut Expr, ctx: &mut HogQLContext, dialect: Dialect) -> HogQLResult<()> {
    let Some(Type::SelectQuery(scope)) = expr.ty.clone() else {
        return Err(internal_error("SELECT query without a resolved scope"));
    };
    let ExprKind::SelectQuery(query) = &mut expr.kind else {
        return Ok(());
    };

    let mut owners = Owners::default();
    for join in query.select_from.iter().flat_map(|f| f.iter()) {
        if let Some(ty) = &join.ty
            && ty.is_lazy()
        {
            owners.register(ty);
        }
    }
    let mut collector = ReferenceCollector::default();
    walk_select_query(&mut collector, query);
    for (table_type, chain) in collector.properties.into_iter().chain(collector.fields) {
        owners.add(&table_type, chain);
    }
    if owners.owners.is_empty() {
        return Ok(());
    }

    let mut new_types: IndexMap<String, TableType> = IndexMap::new();
    let mut expansions = Vec::with_capacity(owners.owners.len());
    for (key, owner) in &owners.owners {
        let (expansion, new_type) = expand_owner(key, owner, query, &new_types, ctx, dialect)?;
        tracing::trace!(table = %key, fields = owner.fields.len(), "expanded lazy table");
        new_types.insert(key.clone(), new_type);
        expansions.push((key.clone(), expansion));
    }

    let mut retyper = Retyper {
        new_types: &new_types
    };
    let mut inserts = Vec::new();
    for (key, expansion) in expansions {
        match expansion {
            Expansion::Replace {
                table
            } => {
                if let Some(from) = query.select_from.as_deref_mut() {
                    from.iter_mut_apply(&mut |join: &mut JoinExpr| {
                        if join.ty.as_ref().is_some_and(|t| t.is_lazy() && t.print_name() == key) {
                            join.table = Some(table.clone());
                            join.alias = Some(key.clone());
                            join.ty = new_types.get(&key).cloned();
                        }
                    });
                }
            }
            Expansion::Insert {
                parent,
                join
            } => inserts.push((parent, join))
        }
    }
    walk_select_query_mut(&mut retyper, query);
    let added = inserts.len();
    if let Some(from) = query.select_from.take() {
        query.select_from = Some(Box::new(insert_joins(*from, inserts)));
    }

    let mut updated = scope.as_ref().clone();
    for (name, table) in updated.tables.iter_mut() {
        if table.is_lazy()
            && let Some(new_type) = new_types.get(name)
        {
            *table = new_type.clone();
        }
    }
    for (key, new_type) in &new_types {
        updated.tables.entry(key.clone()).or_insert_with(|| new_type.clone());
    }
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
    tracing::debug!(joins_added = added, tables = new_types.len(), "expanded lazy tables in SELECT");
    Ok(())
}

fn expand_owner(
    key: &str,
    owner: &Owner,
    query: &SelectQuery,
    new_types: &IndexMap<String, TableType>,
    ctx: &mut HogQLContext,
    dialect: Dialect
) -> HogQLResult<(Expansion, TableType)> {
    match &owner.table_type {
        TableType::LazyJoin {
            parent,
            join,
            ..
        } => {
            let (parent_key, parent_type, from_chain) = match lazy_owner(parent, join.from_field.clone()) {
                Some((parent_owner, chain)) => {
                    let parent_key = parent_owner.print_name();
                    let parent_type = new_types
                        .get(&parent_key)
                        .cloned()
                        .ok_or_else(|| internal_error("Lazy join expanded before its parent"))?;
                    let from_chain = Chain::from_iter([parent_key.as_str().into(), column_alias(&chain).into()]);
                    (parent_key, parent_type, from_chain)
                }
                None => {
                    let parent_key = parent.print_name();
                    let mut from_chain = Chain::from_iter([parent_key.as_str().into()]);
                    from_chain.extend(join.from_field.iter().cloned());
                    (parent_key, parent.as_ref().clone(), from_chain)
                }
            };
            let request = LazyRequest {
                fields_accessed: &owner.fields,
                outer:           query,
                alias:           key,
                is_outer_join:   join.is_outer()
            };
            let mut join_expr = join.join_function(from_chain, &request, ctx)?;
            let table = join_expr
                .table
                .take()
                .ok_or_else(|| internal_error("Lazy join produced no table"))?;
            let table = resolve_types(table, ctx, dialect, &[])?;
            let new_type = TableType::SelectQueryAlias {
                alias:  key.to_string(),
                select: select_type_of(&table)?
            };
            join_expr.table = Some(table);
            join_expr.ty = Some(new_type.clone());

            if let Some(constraint) = join_expr.constraint.as_mut()
                && constraint.constraint_type == ConstraintType::On
            {
                let mut scope = SelectQueryType::default();
                scope.tables.insert(parent_key.clone(), parent_type);
                scope.tables.insert(key.to_string(), new_type.clone());
                let condition = std::mem::replace(&mut constraint.expr, Expr::boolean(true));
                constraint.expr = resolve_types(condition, ctx, dialect, &[Arc::new(scope)])?;
            }
            Ok((
                Expansion::Insert {
                    parent: parent_key,
                    join:   join_expr
                },
                new_type
            ))
        }
        table_type => {
            let table = table_type
                .resolve_database_table()
                .ok_or_else(|| internal_error("Lazy table type without a table"))?;
            let is_outer_join = query
                .select_from
                .iter()
                .flat_map(|f| f.iter())
                .find(|j| j.ty.as_ref().is_some_and(|t| t.print_name() == key))
                .is_some_and(JoinExpr::is_outer);
            let request = LazyRequest {
                fields_accessed: &owner.fields,
                outer: query,
                alias: key,
                is_outer_join
            };
            let select = table.lazy_select(&request, ctx)?;
            let resolved = resolve_types(Expr::select(select), ctx, dialect, &[])?;
            let new_type = TableType::SelectQueryAlias {
                alias:  key.to_string(),
                select: select_type_of(&resolved)?
            };
            Ok((
                Expansion::Replace {
                    table: resolved
                },
                new_type
            ))
        }
    }
}

/// Place each generated join right after the join its key comes from,
/// keeping generated joins for the same parent in creation order.
fn insert_joins(from: JoinExpr, inserts: Vec<(String, JoinExpr)>) -> JoinExpr {
    let mut chain: Vec<(JoinExpr, Option<String>)> = Vec::new();
    let mut next = Some(Box::new(from));
    while let Some(mut join) = next {
        next = join.next_join.take();
        chain.push((*join, None));
    }

    for (parent, join) in inserts {
        let name_of = |j: &JoinExpr| j.ty.as_ref().map(TableType::print_name).or_else(|| j.alias.clone());
        let mut position = chain
            .iter()
            .position(|(j, _)| name_of(j).as_deref() == Some(parent.as_str()))
            .map_or(chain.len(), |i| i + 1);
        while position < chain.len() && chain[position].1.as_deref() == Some(parent.as_str()) {
            position += 1;
        }
        chain.insert(position, (join, Some(parent)));
    }

    let mut linked: Option<Box<JoinExpr>> = None;
    for (mut join, _) in chain.into_iter().rev() {
        join.next_join = linked;
        linked = Some(Box::new(join));
    }
    linked.map(|j| *j).unwrap_or_default()
}

/// Points lazy field types at the columns of the generated subqueries.
struct Retyper<'a> {
    new_types: &'a IndexMap<String, TableType>
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
            Type::Field(_) | Type::Property(_) => {
                let (owner, chain) = lazy_reference(ty)?;
                let new_type = self.new_types.get(&owner.print_name())?;
                Some(Type::Field(FieldType::new(column_alias(&chain), new_type.clone())))
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
            if let (
                ExprKind::Field {
                    chain
                },
                Type::Field(field)
            ) = (&mut expr.kind, &new_ty)
            {
                *chain = Chain::from_iter([field.table_type.print_name().into(), field.name.as_str().into()]);
            }
            expr.ty = Some(new_ty);
        }
        walk_expr_mut(self, expr);
    }

    fn visit_select_query_mut(&mut self, _query: &mut SelectQuery) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{context::HogQLQueryModifiers, database::Database, parser::parse_select};

    fn prepared(sql: &str) -> (Expr, HogQLContext) {
        let database = Database::create_for(Some(1), &HogQLQueryModifiers::default());
        let mut ctx = HogQLContext::new(1).with_database(Arc::new(database));
        let mut expr =
            resolve_types(parse_select(sql).expect("parse"), &mut ctx, Dialect::ClickHouse, &[]).expect("resolve");
        resolve_lazy_tables(&mut expr, &mut ctx, Dialect::ClickHouse).expect("lazy tables");
        (expr, ctx)
    }

    fn join_aliases(expr: &Expr) -> Vec<String> {
        let query = expr.as_select().expect("select");
        query
            .select_from
            .as_ref()
            .map(|f| f.iter().map(|j| j.alias.clone().unwrap_or_default()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_lazy_join_chain_is_expanded_in_order() {
        let (expr, _) = prepared("SELECT person.properties.email FROM events");
        assert_eq!(join_aliases(&expr), vec!["", "events__pdi", "events__pdi__person"]);
        assert!(!has_lazy(&expr));
    }

    #[test]
    fn test_lazy_table_in_from_without_fields() {
        let (expr, _) = prepared("SELECT count() FROM persons");
        let query = expr.as_select().expect("select");
        let from = query.select_from.as_ref().expect("from");
        assert!(from.table.as_ref().is_some_and(|t| t.as_select().is_some()));
        assert_eq!(from.alias.as_deref(), Some("persons"));
    }

    #[test]
    fn test_join_key_column_alias() {
        let mut chain = Chain::new();
        chain.push("properties".into());
        chain.push("$browser".into());
        assert_eq!(column_alias(&chain), "properties___$browser");
    }
}
