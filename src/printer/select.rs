//! SELECT statements.
//!
//! Every stored table printed for ClickHouse is restricted to the context's
//! team: the FROM table and inner-joined tables through WHERE, outer-joined
//! tables through their ON clause so unmatched rows survive.

use super::{
    Dialect, Printer,
    escape::{escape_string, format_float}
};
use crate::{
    ast::{
        ConstantValue, ConstraintType, CteType, Expr, ExprKind, JoinExpr, Order, OrderExpr, RatioExpr,
        SelectQuery, SelectSetQuery, TableType, Type
    },
    context::QuerySettings,
    database::TableKind,
    error::{HogQLResult, internal_error, query_error}
};

/// LIMIT given to the outermost SELECT when it has none.
pub const DEFAULT_RETURNED_ROWS: i64 = 100;
/// Upper bound for the outermost SELECT's LIMIT.
pub const MAX_SELECT_RETURNED_ROWS: i64 = 50_000;

fn ratio(value: &RatioExpr) -> String {
    let number = |n: f64| {
        if n.fract() == 0.0 && n.abs() < 1e15 {
            format!("{}", n as i64)
        } else {
            format_float(n)
        }
    };
    match value.denominator {
        Some(denominator) => format!("{}/{}", number(value.numerator), number(denominator)),
        None => number(value.numerator)
    }
}

fn is_valid_setting_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Stored table with a tenant column behind a join.
fn guarded_table(table_type: &TableType) -> Option<(String, &str)> {
    let table = match table_type {
        TableType::Table {
            table
        } => table,
        TableType::Alias {
            inner, ..
        } => match inner.as_ref() {
            TableType::Table {
                table
            } => table,
            _ => return None
        },
        _ => return None
    };
    if !matches!(table.kind, TableKind::Stored) {
        return None;
    }
    let column = table.tenant_column.as_deref()?;
    Some((table_type.print_name(), column))
}

impl Printer<'_> {
    /// A SELECT or set query, without surrounding parentheses.
    pub(super) fn select_any(&mut self, expr: &Expr) -> HogQLResult<String> {
        match &expr.kind {
            ExprKind::SelectQuery(query) => self.select_query(query),
            ExprKind::SelectSetQuery(set) => self.select_set_query(set),
            _ => Err(internal_error("Expected a SELECT query"))
        }
    }

    fn select_set_query(&mut self, set: &SelectSetQuery) -> HogQLResult<String> {
        self.depth += 1;
        let result = self.select_set_branches(set);
        self.depth -= 1;
        result
    }

    fn select_set_branches(&mut self, set: &SelectSetQuery) -> HogQLResult<String> {
        let branch = |printer: &mut Self, expr: &Expr| -> HogQLResult<String> {
            let sql = printer.select_any(expr)?;
            Ok(match expr.kind {
                ExprKind::SelectSetQuery(_) => format!("({})", sql),
                _ => sql
            })
        };
        let mut sql = branch(self, &set.initial)?;
        for node in &set.subsequent {
            sql.push_str(&self.separator());
            sql.push_str(node.op.keyword());
            sql.push_str(&self.separator());
            sql.push_str(&branch(self, &node.query)?);
        }
        Ok(sql)
    }

    fn select_query(&mut self, query: &SelectQuery) -> HogQLResult<String> {
        let is_top = self.depth == 0;
        self.depth += 1;
        let result = self.select_clauses(query, is_top);
        self.depth -= 1;
        result
    }

    fn select_clauses(&mut self, query: &SelectQuery, is_top: bool) -> HogQLResult<String> {
        let mut clauses = Vec::new();

        if let Some(ctes) = &query.ctes
            && !ctes.is_empty()
        {
            let mut parts = Vec::with_capacity(ctes.len());
            for (name, cte) in ctes {
                let name = self.identifier(name)?;
                parts.push(match cte.cte_type {
                    CteType::Subquery => format!("{} AS {}", name, self.visit(&cte.expr)?),
                    CteType::Column => format!("{} AS {}", self.visit(&cte.expr)?, name)
                });
            }
            clauses.push(format!("WITH {}", parts.join(", ")));
        }

        let items = query
            .select
            .iter()
            .map(|item| self.select_item(item))
            .collect::<HogQLResult<Vec<_>>>()?;
        let distinct = if query.distinct { "DISTINCT " } else { "" };
        clauses.push(format!("SELECT {}{}", distinct, items.join(", ")));

        let mut guards = Vec::new();
        if let Some(from) = &query.select_from {
            let mut joins = Vec::new();
            for (index, join) in from.iter().enumerate() {
                joins.push(self.join(join, index == 0, &mut guards)?);
            }
            clauses.push(format!("FROM {}", joins.join(" ")));
        }

        if let Some(list) = &query.array_join_list {
            let op = query.array_join_op.as_deref().unwrap_or("ARRAY JOIN");
            let items = list
                .iter()
                .map(|item| self.select_item(item))
                .collect::<HogQLResult<Vec<_>>>()?;
            clauses.push(format!("{} {}", op, items.join(", ")));
        }

        if let Some(prewhere) = &query.prewhere {
            clauses.push(format!("PREWHERE {}", self.visit(prewhere)?));
        }

        let mut conditions = guards;
        if let Some(where_clause) = &query.where_clause {
            conditions.push(self.visit(where_clause)?);
        }
        match conditions.len() {
            0 => {}
            1 => clauses.push(format!("WHERE {}", conditions.remove(0))),
            _ if self.dialect == Dialect::Postgres => {
                clauses.push(format!("WHERE {}", conditions.join(" AND ")));
            }
            _ => clauses.push(format!("WHERE and({})", conditions.join(", ")))
        }

        if let Some(group_by) = &query.group_by {
            clauses.push(format!("GROUP BY {}", self.visit_joined(group_by)?));
        }
        if let Some(having) = &query.having {
            clauses.push(format!("HAVING {}", self.visit(having)?));
        }
        if let Some(windows) = &query.window_exprs
            && !windows.is_empty()
        {
            let mut parts = Vec::with_capacity(windows.len());
            for (name, window) in windows {
                parts.push(format!("{} AS ({})", self.identifier(name)?, self.window_expr(window)?));
            }
            clauses.push(format!("WINDOW {}", parts.join(", ")));
        }
        if let Some(order_by) = &query.order_by {
            clauses.push(format!("ORDER BY {}", self.order_list(order_by)?));
        }
        if let Some(limit_by) = &query.limit_by {
            let mut clause = format!("LIMIT {}", self.visit(&limit_by.n)?);
            if let Some(offset) = &limit_by.offset {
                clause.push_str(&format!(" OFFSET {}", self.visit(offset)?));
            }
            clause.push_str(&format!(" BY {}", self.visit_joined(&limit_by.exprs)?));
            clauses.push(clause);
        }

        if let Some(limit) = self.limit(query, is_top)? {
            let mut clause = format!("LIMIT {}", limit);
            if query.limit_with_ties {
                clause.push_str(" WITH TIES");
            }
            clauses.push(clause);
        }
        if let Some(offset) = &query.offset {
            clauses.push(format!("OFFSET {}", self.visit(offset)?));
        }
        let mut settings = query.settings.clone().unwrap_or_default();
        if is_top && let Some(top) = self.top_settings.take() {
            settings.extend(top);
        }
        if self.dialect == Dialect::ClickHouse && !settings.is_empty() {
            clauses.push(self.settings_clause(&settings)?);
        }

        Ok(clauses.join(&self.separator()))
    }

    /// LIMIT of `query`, with the outermost SELECT's default and cap applied.
    fn limit(&mut self, query: &SelectQuery, is_top: bool) -> HogQLResult<Option<String>> {
        let policy = is_top && self.dialect == Dialect::ClickHouse && self.ctx.limit_top_select;
        match &query.limit {
            None if policy => Ok(Some(DEFAULT_RETURNED_ROWS.to_string())),
            None => Ok(None),
            Some(limit) if policy => match limit.as_constant() {
                Some(ConstantValue::Integer(n)) => Ok(Some((*n).min(MAX_SELECT_RETURNED_ROWS).to_string())),
                _ => Ok(Some(format!("least({}, {})", MAX_SELECT_RETURNED_ROWS, self.visit(limit)?)))
            },
            Some(limit) => Ok(Some(self.visit(limit)?))
        }
    }

    /// Select-list item. Aliases print as `expr AS alias`; hidden aliases
    /// only when the expression does not already print as the alias.
    fn select_item(&mut self, item: &Expr) -> HogQLResult<String> {
        let ExprKind::Alias {
            alias,
            expr,
            hidden
        } = &item.kind
        else {
            return self.visit(item);
        };
        let inner = self.visit(expr).map_err(|e| e.with_span(item.span))?;
        if *hidden && self.dialect == Dialect::HogQL {
            return Ok(inner);
        }
        let alias = self.identifier(alias)?;
        if *hidden && inner == alias {
            return Ok(inner);
        }
        Ok(format!("{} AS {}", inner, alias))
    }

    pub(super) fn order_list(&mut self, items: &[OrderExpr]) -> HogQLResult<String> {
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            let direction = match item.order {
                Order::Asc => "ASC",
                Order::Desc => "DESC"
            };
            parts.push(format!("{} {}", self.visit(&item.expr)?, direction));
        }
        Ok(parts.join(", "))
    }

    fn join(&mut self, join: &JoinExpr, first: bool, guards: &mut Vec<String>) -> HogQLResult<String> {
        if self.dialect != Dialect::HogQL && join.ty.is_none() {
            return Err(internal_error("Printing a join requires resolved types"));
        }
        let mut sql = String::new();
        if !first {
            sql.push_str(join.join_type.as_deref().unwrap_or("JOIN"));
            sql.push(' ');
        }
        sql.push_str(&self.join_table(join)?);
        if join.table_final {
            sql.push_str(" FINAL");
        }
        if let Some(sample) = &join.sample {
            sql.push_str(&format!(" SAMPLE {}", ratio(&sample.sample_value)));
            if let Some(offset) = &sample.offset_value {
                sql.push_str(&format!(" OFFSET {}", ratio(offset)));
            }
        }

        let guard = match join.ty.as_ref() {
            Some(table_type) if self.dialect == Dialect::ClickHouse => self.tenant_guard(table_type)?,
            _ => None
        };
        let mut guard_in_on = false;
        if let Some(constraint) = &join.constraint {
            self.in_join_constraint = true;
            let condition = self.visit(&constraint.expr);
            self.in_join_constraint = false;
            let condition = condition?;
            match constraint.constraint_type {
                ConstraintType::On => match &guard {
                    Some(guard) if !first && join.is_outer() => {
                        sql.push_str(&format!(" ON and({}, {})", condition, guard));
                        guard_in_on = true;
                    }
                    _ => sql.push_str(&format!(" ON {}", condition))
                },
                ConstraintType::Using => sql.push_str(&format!(" USING {}", condition))
            }
        }
        if let Some(guard) = guard
            && !guard_in_on
        {
            guards.push(guard);
        }
        Ok(sql)
    }

    fn join_table(&mut self, join: &JoinExpr) -> HogQLResult<String> {
        let table = join
            .table
            .as_ref()
            .ok_or_else(|| internal_error("Join without a table"))?;
        let alias = match &join.alias {
            Some(alias) => Some(self.identifier(alias)?),
            None => None
        };
        let with_alias = |sql: String, alias: Option<String>| match alias {
            Some(alias) if alias != sql => format!("{} AS {}", sql, alias),
            _ => sql
        };
        match &table.kind {
            ExprKind::SelectQuery(_) | ExprKind::SelectSetQuery(_) => {
                let sql = format!("({})", self.select_any(table)?);
                Ok(with_alias(sql, alias))
            }
            ExprKind::Call(call) => {
                let args = self.visit_joined(&call.args)?;
                let name = match join.ty.as_ref().and_then(TableType::resolve_database_table) {
                    Some(db_table) if self.dialect == Dialect::ClickHouse => db_table.clickhouse_name.clone(),
                    _ => call.name.clone()
                };
                // Columns are qualified with the function name when there is no alias
                let alias = match alias {
                    None if self.dialect != Dialect::HogQL => Some(self.identifier(&call.name)?),
                    alias => alias
                };
                Ok(with_alias(format!("{}({})", self.identifier(&name)?, args), alias))
            }
            ExprKind::Field {
                chain
            } => {
                if self.dialect == Dialect::HogQL {
                    return Ok(with_alias(self.chain_text(chain)?, alias));
                }
                let table_type = match (&table.ty, &join.ty) {
                    (Some(Type::Table(table_type)), _) | (_, Some(table_type)) => table_type,
                    _ => return Err(internal_error("Printing a join requires resolved types"))
                };
                if table_type.is_lazy() {
                    return Err(internal_error(format!(
                        "Lazy table {} must be expanded before printing",
                        table_type.print_name()
                    )));
                }
                let db_table = table_type
                    .resolve_database_table()
                    .ok_or_else(|| internal_error("Table reference without a table"))?;
                let name = match self.dialect {
                    Dialect::ClickHouse => &db_table.clickhouse_name,
                    _ => &db_table.name
                };
                let sql = self.identifier(name)?;
                let alias = match alias {
                    Some(alias) => Some(alias),
                    None if name != &db_table.name => Some(self.identifier(&db_table.name)?),
                    None => None
                };
                Ok(with_alias(sql, alias))
            }
            _ => Err(query_error("Unsupported table expression in FROM"))
        }
    }

    /// `equals(alias.team_id, <team>)` for a stored table.
    fn tenant_guard(&self, table_type: &TableType) -> HogQLResult<Option<String>> {
        let Some((name, column)) = guarded_table(table_type) else {
            return Ok(None);
        };
        let team_id = self
            .ctx
            .team_id
            .ok_or_else(|| internal_error("Full SELECT queries are disabled if team_id is not set"))?;
        Ok(Some(format!(
            "equals({}.{}, {})",
            self.identifier(&name)?,
            self.identifier(column)?,
            team_id
        )))
    }

    /// `SETTINGS k=v, ...`
    pub(super) fn settings_clause(&self, settings: &QuerySettings) -> HogQLResult<String> {
        let mut parts = Vec::with_capacity(settings.len());
        for (name, value) in settings {
            if !is_valid_setting_name(name) {
                return Err(query_error(format!("Setting {} is not supported", name)));
            }
            let value = match value {
                ConstantValue::Bool(b) => i64::from(*b).to_string(),
                ConstantValue::Integer(i) => i.to_string(),
                ConstantValue::Float(f) => format_float(*f),
                ConstantValue::String(s) => escape_string(s, Dialect::ClickHouse)?,
                other => return Err(query_error(format!("Unsupported value for setting {}: {:?}", name, other)))
            };
            parts.push(format!("{}={}", name, value));
        }
        Ok(format!("SETTINGS {}", parts.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_formatting() {
        assert_eq!(
            ratio(&RatioExpr {
                numerator:   1.0,
                denominator: Some(10.0)
            }),
            "1/10"
        );
        assert_eq!(
            ratio(&RatioExpr {
                numerator:   0.5,
                denominator: None
            }),
            "0.5"
        );
    }

    #[test]
    fn test_setting_names() {
        assert!(is_valid_setting_name("max_execution_time"));
        assert!(!is_valid_setting_name("readonly; DROP"));
        assert!(!is_valid_setting_name(""));
    }
}
