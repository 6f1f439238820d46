use std::sync::Arc;

use super::{Resolver, scope::Frame, typed};
use crate::{
    ast::{
        ConstraintType, CteType, Expr, ExprKind, JoinConstraint, JoinExpr, SelectQuery,
        SelectQueryType, SelectSetNode, SelectSetQuery, SelectSetQueryType, Span, TableType,
        Type
    },
    database::TableKind,
    error::{HogQLResult, internal_error, query_error},
    visitor::clone_expr
};

fn is_asterisk(expr: &Expr) -> bool {
    expr.chain()
        .and_then(|chain| chain.last())
        .is_some_and(|item| item.as_name() == Some("*"))
}

/// Plain field references in the select list get a hidden alias named after
/// their last segment.
fn with_hidden_alias(expr: Expr) -> Expr {
    let name = match &expr.kind {
        ExprKind::Field {
            chain
        } => chain.last().and_then(|item| item.as_name()).map(str::to_string),
        _ => None
    };
    match name {
        Some(name) => {
            let span = expr.span;
            Expr::hidden_alias(name, expr).with_span(span)
        }
        None => expr
    }
}

impl Resolver<'_> {
    pub(super) fn visit_select_query(&mut self, query: SelectQuery, span: Option<Span>) -> HogQLResult<Expr> {
        let mut frame = Frame::default();
        if let Some(parent) = self.current_frame() {
            frame.ty.ctes = parent.ty.ctes.clone();
        }
        if let Some(shared) = self.set_ctes.last() {
            frame.ty.ctes.extend(shared.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(ctes) = &query.ctes {
            frame.ty.ctes.extend(ctes.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(windows) = &query.window_exprs {
            frame.windows = windows.keys().cloned().collect();
        }

        let (frame, result) = self.with_frame(frame, |r| r.resolve_select_body(query));
        let mut query = result?;
        query.ctes = None;
        Ok(typed(
            ExprKind::SelectQuery(Box::new(query)),
            Type::SelectQuery(Arc::new(frame.ty)),
            span
        ))
    }

    fn resolve_select_body(&mut self, mut query: SelectQuery) -> HogQLResult<SelectQuery> {
        if let Some(from) = query.select_from.take() {
            query.select_from = Some(Box::new(self.visit_join(*from)?));
        }

        if let Some(list) = query.array_join_list.take() {
            let list = self.visit_all(list)?;
            if list.iter().any(|e| !matches!(e.kind, ExprKind::Alias { .. })) {
                return Err(query_error("ARRAY JOIN arrays must have an alias"));
            }
            query.array_join_list = Some(list);
        }

        if let Some(windows) = query.window_exprs.take() {
            let mut visited = indexmap::IndexMap::new();
            for (name, window) in windows {
                visited.insert(name, self.visit_window_expr(window)?);
            }
            query.window_exprs = Some(visited);
        }

        let mut select = Vec::with_capacity(query.select.len());
        for expr in std::mem::take(&mut query.select) {
            if is_asterisk(&expr) {
                for column in self.expand_asterisk(&expr)? {
                    let column = self.visit(column)?;
                    self.register_column(&column);
                    select.push(column);
                }
                continue;
            }
            let expr = self.visit(with_hidden_alias(expr))?;
            self.register_column(&expr);
            select.push(expr);
        }
        query.select = select;

        query.where_clause = query.where_clause.take().map(|e| self.visit(e)).transpose()?;
        query.prewhere = query.prewhere.take().map(|e| self.visit(e)).transpose()?;
        query.having = query.having.take().map(|e| self.visit(e)).transpose()?;
        query.group_by = query.group_by.take().map(|g| self.visit_all(g)).transpose()?;
        if let Some(order_by) = query.order_by.take() {
            let mut visited = Vec::with_capacity(order_by.len());
            for mut item in order_by {
                item.expr = self.visit(item.expr)?;
                visited.push(item);
            }
            query.order_by = Some(visited);
        }
        query.limit = query.limit.take().map(|e| self.visit(e)).transpose()?;
        query.offset = query.offset.take().map(|e| self.visit(e)).transpose()?;
        if let Some(mut limit_by) = query.limit_by.take() {
            limit_by.n = self.visit(limit_by.n)?;
            limit_by.offset = limit_by.offset.map(|e| self.visit(e)).transpose()?;
            limit_by.exprs = self.visit_all(limit_by.exprs)?;
            query.limit_by = Some(limit_by);
        }
        Ok(query)
    }

    /// Record a select-list item as an output column. The first visible
    /// definition of a name wins over hidden ones.
    fn register_column(&mut self, expr: &Expr) {
        let (name, hidden) = match (&expr.kind, &expr.ty) {
            (
                ExprKind::Alias {
                    alias,
                    hidden,
                    ..
                },
                _
            ) => (alias.clone(), *hidden),
            (_, Some(Type::Field(field))) => (field.name.clone(), false),
            _ => return
        };
        let Some(ty) = expr.ty.clone() else {
            return;
        };
        if let Some(frame) = self.current_frame_mut() {
            if hidden && frame.visible_aliases.contains(&name) {
                return;
            }
            frame.ty.columns.insert(name, ty);
        }
    }

    /// Select-list items standing for `*` or `table.*`.
    fn expand_asterisk(&self, expr: &Expr) -> HogQLResult<Vec<Expr>> {
        let chain = expr.chain().ok_or_else(|| internal_error("Asterisk without a chain"))?;
        let (prefix, table_type) = if chain.len() == 1 {
            let table_type = self.single_table()?;
            let prefix = self
                .current_frame()
                .and_then(|f| f.ty.tables.iter().find(|(_, t)| **t == table_type))
                .map(|(name, _)| name.clone());
            (prefix, table_type)
        } else {
            let name = chain[..chain.len() - 1]
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(".");
            let table_type = self
                .current_frame()
                .and_then(|f| f.ty.tables.get(&name))
                .cloned()
                .ok_or_else(|| query_error(format!("Unknown table `{}`.", name)))?;
            (Some(name), table_type)
        };

        let columns: Vec<String> = match table_type.select_type() {
            Some(select) => select.columns.keys().cloned().collect(),
            None => table_type
                .resolve_database_table()
                .map(|table| table.get_asterisk().into_iter().map(str::to_string).collect())
                .unwrap_or_default()
        };
        Ok(columns
            .into_iter()
            .map(|name| {
                let field = match &prefix {
                    Some(prefix) => Expr::field(&[prefix.as_str(), name.as_str()]),
                    None => Expr::field(&[name.as_str()])
                };
                Expr::hidden_alias(name, field).with_span(expr.span)
            })
            .collect())
    }

    fn visit_join(&mut self, join: JoinExpr) -> HogQLResult<JoinExpr> {
        let JoinExpr {
            join_type,
            table,
            alias,
            table_final,
            constraint,
            next_join,
            sample,
            ..
        } = join;
        let table = table.ok_or_else(|| internal_error("Join without a table"))?;
        let span = table.span;
        let (table, table_type, alias) = self
            .visit_join_table(table, alias)
            .map_err(|e| e.with_span(span))?;

        let frame = self
            .current_frame_mut()
            .ok_or_else(|| internal_error("Join outside of a SELECT"))?;
        match &table_type {
            TableType::SelectQuery(_) => frame.ty.anonymous_tables.push(table_type.clone()),
            _ => {
                let key = alias.clone().unwrap_or_else(|| table_type.print_name());
                if frame.ty.tables.contains_key(&key) {
                    return Err(query_error(format!(
                        "Already have joined a table called `{}`. Can't redefine.",
                        key
                    ))
                    .with_span(span));
                }
                frame.ty.tables.insert(key, table_type.clone());
            }
        }

        let constraint = match constraint {
            Some(JoinConstraint {
                expr,
                constraint_type: ConstraintType::On
            }) => Some(JoinConstraint::on(self.visit(expr)?)),
            other => other
        };
        let next_join = match next_join {
            Some(next) => Some(Box::new(self.visit_join(*next)?)),
            None => None
        };

        Ok(JoinExpr {
            join_type,
            table: Some(table),
            alias,
            table_final,
            constraint,
            next_join,
            sample,
            ty: Some(table_type)
        })
    }

    fn visit_join_table(
        &mut self,
        table: Expr,
        alias: Option<String>
    ) -> HogQLResult<(Expr, TableType, Option<String>)> {
        match &table.kind {
            ExprKind::Field {
                chain
            } => {
                let name = chain.iter().map(ToString::to_string).collect::<Vec<_>>().join(".");
                if let Some(cte) = self.lookup_cte(&name)
                    && cte.cte_type == CteType::Subquery
                {
                    let subquery = clone_expr(&cte.expr, false).with_span(table.span);
                    return self.visit_join_table(subquery, alias.or(Some(name)));
                }
                let db_table = self.database.get_table(&name)?;
                let base = match db_table.kind {
                    TableKind::Lazy(_) => TableType::Lazy {
                        table: db_table
                    },
                    TableKind::Stored => TableType::Table {
                        table: db_table
                    },
                    TableKind::Function {
                        ..
                    } => {
                        return Err(query_error(format!("Table function `{}` requires arguments", name)));
                    }
                    TableKind::Virtual => {
                        return Err(query_error(format!("Can not select from `{}` directly", name)));
                    }
                };
                let table_type = match &alias {
                    Some(alias) => TableType::Alias {
                        alias: alias.clone(),
                        inner: Box::new(base)
                    },
                    None => base
                };
                let table = typed(table.kind, Type::Table(table_type.clone()), table.span);
                Ok((table, table_type, alias))
            }
            ExprKind::Call(call) if self.database.has_table(&call.name) => {
                let db_table = self.database.get_table(&call.name)?;
                let TableKind::Function {
                    min_args,
                    max_args
                } = db_table.kind
                else {
                    return Err(query_error(format!("Table `{}` can not be called", call.name)));
                };
                if call.args.len() < min_args || call.args.len() > max_args {
                    return Err(query_error(format!(
                        "Table function `{}` expects between {} and {} arguments, got {}",
                        call.name,
                        min_args,
                        max_args,
                        call.args.len()
                    )));
                }
                let span = table.span;
                let ExprKind::Call(mut call) = table.kind else {
                    return Err(internal_error("Expected a table function call"));
                };
                call.args = self.visit_all(std::mem::take(&mut call.args))?;
                let base = TableType::Table {
                    table: db_table
                };
                let table_type = match &alias {
                    Some(alias) => TableType::Alias {
                        alias: alias.clone(),
                        inner: Box::new(base)
                    },
                    None => base
                };
                let table = typed(ExprKind::Call(call), Type::Table(table_type.clone()), span);
                Ok((table, table_type, alias))
            }
            ExprKind::SelectQuery(_) | ExprKind::SelectSetQuery(_) => {
                let visited = self.visit(table)?;
                let select = match &visited.ty {
                    Some(Type::SelectQuery(select)) => Arc::clone(select),
                    Some(Type::SelectSetQuery(set)) => set.first().cloned().unwrap_or_default(),
                    _ => return Err(internal_error("Subquery without a select type"))
                };
                let table_type = match &alias {
                    Some(alias) => TableType::SelectQueryAlias {
                        alias: alias.clone(),
                        select
                    },
                    None => TableType::SelectQuery(select)
                };
                Ok((visited, table_type, alias))
            }
            ExprKind::Placeholder {
                ..
            } => Err(query_error("Placeholders are not supported in FROM")),
            _ => Err(query_error("Unsupported table expression in FROM"))
        }
    }

    pub(super) fn visit_select_set_query(&mut self, set: SelectSetQuery, span: Option<Span>) -> HogQLResult<Expr> {
        let mut shared = self.set_ctes.last().cloned().unwrap_or_default();
        for query in set.queries() {
            if let Some(ctes) = query.as_select().and_then(|q| q.ctes.as_ref()) {
                shared.extend(ctes.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        self.set_ctes.push(shared);
        let result = self.resolve_set_branches(set);
        self.set_ctes.pop();
        let (set, types) = result?;
        Ok(typed(
            ExprKind::SelectSetQuery(Box::new(set)),
            Type::SelectSetQuery(Arc::new(SelectSetQueryType {
                types
            })),
            span
        ))
    }

    fn resolve_set_branches(
        &mut self,
        set: SelectSetQuery
    ) -> HogQLResult<(SelectSetQuery, Vec<Arc<SelectQueryType>>)> {
        let mut types = Vec::new();
        let mut collect = |expr: &Expr| match &expr.ty {
            Some(Type::SelectQuery(select)) => types.push(Arc::clone(select)),
            Some(Type::SelectSetQuery(inner)) => types.extend(inner.types.iter().cloned()),
            _ => {}
        };
        let initial = self.visit(set.initial)?;
        collect(&initial);
        let mut subsequent = Vec::with_capacity(set.subsequent.len());
        for node in set.subsequent {
            let query = self.visit(node.query)?;
            collect(&query);
            subsequent.push(SelectSetNode {
                op: node.op,
                query
            });
        }
        Ok((
            SelectSetQuery {
                initial,
                subsequent
            },
            types
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        ast::{ExprKind, Type},
        context::{HogQLContext, HogQLQueryModifiers},
        database::Database,
        parser::parse_select,
        printer::Dialect,
        resolver::resolve_types
    };

    fn resolve(sql: &str) -> crate::error::HogQLResult<crate::ast::Expr> {
        let database = Database::create_for(Some(1), &HogQLQueryModifiers::default());
        let mut ctx = HogQLContext::new(1).with_database(Arc::new(database));
        resolve_types(parse_select(sql).expect("parse"), &mut ctx, Dialect::ClickHouse, &[])
    }

    #[test]
    fn test_select_fields_get_hidden_aliases() {
        let expr = resolve("SELECT event FROM events").expect("resolve");
        let query = expr.as_select().expect("select");
        assert!(matches!(
            &query.select[0].kind,
            ExprKind::Alias { alias, hidden: true, .. } if alias == "event"
        ));
        let Some(Type::SelectQuery(scope)) = &expr.ty else {
            panic!("expected select type");
        };
        assert!(scope.columns.contains_key("event"));
    }

    #[test]
    fn test_duplicate_table_alias_is_rejected() {
        let err = resolve("SELECT 1 FROM events e JOIN events e ON e.uuid = e.uuid").expect_err("dup");
        assert!(err.message().contains("Already have joined a table called `e`"));
    }

    #[test]
    fn test_asterisk_expands_to_columns() {
        let expr = resolve("SELECT * FROM events").expect("resolve");
        let query = expr.as_select().expect("select");
        assert!(query.select.len() > 3);
        assert!(query.select.iter().all(|e| matches!(e.kind, ExprKind::Alias { hidden: true, .. })));
    }
}
