//! Event properties stored outside the `properties` JSON blob.
//!
//! Properties listed in [`HogQLQueryModifiers::eav_properties`] live in the
//! narrow `event_properties` table, one row per event and key. Every SELECT
//! over `events` that reads such a property gets one `LEFT ANY JOIN` per
//! distinct key, matched on the event's identity, and the reads are pointed
//! at the joined row's `value`.
//!
//! [`HogQLQueryModifiers::eav_properties`]: crate::context::HogQLQueryModifiers::eav_properties

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::{
    ast::{
        Chain, CompareOp, Expr, ExprKind, FieldAliasType, FieldType, JoinConstraint, JoinExpr, SelectQuery,
        SelectQueryType, TableType, Type
    },
    context::HogQLContext,
    database::Table,
    error::{HogQLError, HogQLResult, internal_error},
    printer::Dialect,
    resolver::resolve_types,
    visitor::{Visitor, VisitorMut, walk_expr, walk_expr_mut, walk_select_query, walk_select_query_mut}
};

const EAV_TABLE: &str = "event_properties";
const JOIN_TYPE: &str = "LEFT ANY JOIN";

/// Key and events-table alias of an EAV property read.
fn eav_property(ty: &Type, keys: &[String]) -> Option<(String, String)> {
    let Type::Property(property) = ty else {
        return None;
    };
    if property.chain.len() != 1 || property.field_type.name != "properties" {
        return None;
    }
    let table_type = property.field_type.table_type.as_ref();
    if matches!(table_type, TableType::Virtual { .. })
        || table_type.resolve_database_table().is_none_or(|t| t.name != "events")
    {
        return None;
    }
    let key = property.chain.first()?.as_name()?;
    keys.iter()
        .any(|k| k == key)
        .then(|| (key.to_string(), table_type.print_name()))
}

/// EAV reads of one SELECT, without entering nested SELECTs.
struct EavCollector<'a> {
    keys:  &'a [String],
    found: IndexSet<(String, String)>
}

impl Visitor for EavCollector<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if matches!(expr.kind, ExprKind::Field { .. })
            && let Some(ty) = &expr.ty
            && let Some(found) = eav_property(ty, self.keys)
        {
            self.found.insert(found);
        }
        walk_expr(self, expr);
    }

    fn visit_select_query(&mut self, _query: &SelectQuery) {}
}

fn field(table: &str, column: &str) -> Expr {
    Expr::field(&[table, column])
}

fn eq(left: Expr, right: Expr) -> Expr {
    Expr::compare(CompareOp::Eq, left, right)
}

/// `LEFT ANY JOIN event_properties AS alias ON <event identity> AND key = '...'`
fn eav_join(alias: &str, events: &str, key: &str) -> JoinExpr {
    let condition = Expr::and(vec![
        eq(field(alias, "team_id"), field(events, "team_id")),
        eq(field(alias, "timestamp"), Expr::call("toDate", vec![field(events, "timestamp")])),
        eq(field(alias, "event"), field(events, "event")),
        eq(
            field(alias, "distinct_id_hash"),
            Expr::call("cityHash64", vec![field(events, "distinct_id")])
        ),
        eq(field(alias, "uuid_hash"), Expr::call("cityHash64", vec![field(events, "uuid")])),
        eq(field(alias, "key"), Expr::constant(key)),
    ]);
    JoinExpr {
        join_type: Some(JOIN_TYPE.to_string()),
        table: Some(Expr::field(&[EAV_TABLE])),
        alias: Some(alias.to_string()),
        constraint: Some(JoinConstraint::on(condition)),
        ..Default::default()
    }
}

/// Points EAV reads at the joined `value` column.
struct EavRetyper<'a> {
    keys:    &'a [String],
    targets: &'a IndexMap<(String, String), TableType>
}

impl EavRetyper<'_> {
    fn retype(&self, ty: &Type) -> Option<Type> {
        match ty {
            Type::FieldAlias(alias) => self.retype(&alias.ty).map(|inner| {
                Type::FieldAlias(FieldAliasType {
                    alias: alias.alias.clone(),
                    ty:    Box::new(inner)
                })
            }),
            Type::Property(_) => {
                let target = self.targets.get(&eav_property(ty, self.keys)?)?;
                Some(Type::Field(FieldType::new("value", target.clone())))
            }
            _ => None
        }
    }
}

impl VisitorMut for EavRetyper<'_> {
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
                *chain = Chain::from_iter([field.table_type.print_name().into(), "value".into()]);
            }
            expr.ty = Some(new_ty);
        }
        walk_expr_mut(self, expr);
    }

    fn visit_select_query_mut(&mut self, _query: &mut SelectQuery) {}
}

fn inject_scope(
    expr: &mut Expr,
    ctx: &mut HogQLContext,
    dialect: Dialect,
    eav_table: &Arc<Table>
) -> HogQLResult<usize> {
    let keys = ctx.modifiers.eav_properties.clone();
    let Some(Type::SelectQuery(scope)) = expr.ty.clone() else {
        return Err(internal_error("SELECT query without a resolved scope"));
    };
    let ExprKind::SelectQuery(query) = &mut expr.kind else {
        return Ok(0);
    };
    let mut collector = EavCollector {
        keys:  &keys,
        found: IndexSet::new()
    };
    walk_select_query(&mut collector, query);
    if collector.found.is_empty() {
        return Ok(0);
    }
    let Some(from) = query.select_from.as_mut() else {
        return Err(internal_error("EAV property read without a FROM clause"));
    };

    let mut targets = IndexMap::new();
    let mut updated = scope.as_ref().clone();
    for (index, (key, events)) in collector.found.iter().enumerate() {
        let events_type = scope
            .tables
            .get(events)
            .cloned()
            .ok_or_else(|| internal_error(format!("Unknown events table `{}` in scope", events)))?;
        let alias = format!("{}__eav_{}", events, index);
        let alias_type = TableType::Alias {
            alias: alias.clone(),
            inner: Box::new(TableType::Table {
                table: Arc::clone(eav_table)
            })
        };
        let mut join = eav_join(&alias, events, key);
        join.table = join
            .table
            .map(|table| table.with_type(Type::Table(alias_type.clone())));
        join.ty = Some(alias_type.clone());
        if let Some(constraint) = join.constraint.as_mut() {
            let mut join_scope = SelectQueryType::default();
            join_scope.tables.insert(events.clone(), events_type);
            join_scope.tables.insert(alias.clone(), alias_type.clone());
            let condition = std::mem::replace(&mut constraint.expr, Expr::boolean(true));
            constraint.expr = resolve_types(condition, ctx, dialect, &[Arc::new(join_scope)])?;
        }
        tracing::trace!(key = %key, alias = %alias, "joining EAV property");
        from.append(join);
        updated.tables.insert(alias, alias_type.clone());
        targets.insert((key.clone(), events.clone()), alias_type);
    }

    let mut retyper = EavRetyper {
        keys:    &keys,
        targets: &targets
    };
    walk_select_query_mut(&mut retyper, query);
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
    Ok(targets.len())
}

struct EavInjector<'a> {
    ctx:       &'a mut HogQLContext,
    dialect:   Dialect,
    eav_table: Arc<Table>,
    joins:     usize,
    error:     Option<HogQLError>
}

impl VisitorMut for EavInjector<'_> {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        if self.error.is_some() {
            return;
        }
        walk_expr_mut(self, expr);
        if matches!(expr.kind, ExprKind::SelectQuery(_)) {
            match inject_scope(expr, self.ctx, self.dialect, &self.eav_table) {
                Ok(added) => self.joins += added,
                Err(err) => self.error = Some(err)
            }
        }
    }
}

/// Join `event_properties` for every EAV property read in `node`.
pub fn inject_eav_joins(node: &mut Expr, ctx: &mut HogQLContext, dialect: Dialect) -> HogQLResult<()> {
    if ctx.modifiers.eav_properties.is_empty() {
        return Ok(());
    }
    let database = ctx
        .database
        .clone()
        .ok_or_else(|| internal_error("Database needs to be attached to the context before EAV injection"))?;
    let mut injector = EavInjector {
        eav_table: database.get_table(EAV_TABLE)?,
        ctx,
        dialect,
        joins: 0,
        error: None
    };
    injector.visit_expr_mut(node);
    if let Some(err) = injector.error {
        return Err(err);
    }
    tracing::debug!(joins_added = injector.joins, "injected EAV joins");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::HogQLQueryModifiers, database::Database, parser::parse_select};

    fn injected(sql: &str) -> Expr {
        let modifiers = HogQLQueryModifiers {
            eav_properties: vec!["plan".into(), "tier".into()],
            ..Default::default()
        };
        let database = Database::create_for(Some(1), &modifiers);
        let mut ctx = HogQLContext::new(1)
            .with_database(Arc::new(database))
            .with_modifiers(modifiers);
        let mut expr =
            resolve_types(parse_select(sql).expect("parse"), &mut ctx, Dialect::ClickHouse, &[]).expect("resolve");
        inject_eav_joins(&mut expr, &mut ctx, Dialect::ClickHouse).expect("eav");
        expr
    }

    fn join_aliases(expr: &Expr) -> Vec<String> {
        let query = expr.as_select().expect("select");
        query
            .select_from
            .iter()
            .flat_map(|f| f.iter())
            .filter_map(|j| j.alias.clone())
            .collect()
    }

    #[test]
    fn test_one_join_per_distinct_key() {
        let expr = injected(
            "SELECT properties.plan, count() FROM events WHERE properties.plan = 'pro' AND properties.tier = 'a' \
             GROUP BY properties.plan"
        );
        assert_eq!(join_aliases(&expr), vec!["events__eav_0", "events__eav_1"]);
    }

    #[test]
    fn test_reads_point_at_joined_value() {
        let expr = injected("SELECT properties.plan FROM events");
        let query = expr.as_select().expect("select");
        let ExprKind::Field {
            chain
        } = &query.select[0].unaliased().kind
        else {
            panic!("expected a field");
        };
        assert_eq!(chain.iter().map(ToString::to_string).collect::<Vec<_>>(), vec!["events__eav_0", "value"]);
    }

    #[test]
    fn test_other_properties_are_untouched() {
        let expr = injected("SELECT properties.browser FROM events");
        assert_eq!(join_aliases(&expr), Vec::<String>::new());
    }
}
