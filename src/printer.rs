//! SQL generation for the three output dialects.
//!
//! One walker serves all dialects. Operators print in function-call form
//! (`plus(a, b)`, `and(a, b)`) for ClickHouse and HogQL so no precedence
//! rules are needed; Postgres gets parenthesized infix operators. Dialect
//! specifics live in the submodules:
//!
//! - [`escape`]: identifier and literal quoting
//! - `select`: SELECT layout, tenant guards, LIMIT policy and settings
//! - `compare`: comparison operators and their NULL handling
//! - `properties`: JSON property reads and their physical layouts

pub mod escape;
mod compare;
mod properties;
mod select;

use serde::{Deserialize, Serialize};

use self::escape::{escape_identifier, escape_string, format_date, format_datetime, format_float};
use crate::{
    ast::{
        Call, ChainItem, ConstantValue, Expr, ExprKind, FieldType, FrameBound, FrameMethod, Type, WindowExpr,
        WindowFrameExpr, WindowFunction
    },
    context::{HogQLContext, QuerySettings},
    database::{ColumnKind, DatabaseField},
    error::{HogQLResult, internal_error, query_error},
    functions::{find_aggregation, find_function}
};

pub use self::select::{DEFAULT_RETURNED_ROWS, MAX_SELECT_RETURNED_ROWS};

/// Target SQL dialect.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Analytical store; tenant guards and bound parameters
    #[default]
    #[value(name = "clickhouse")]
    ClickHouse,
    #[value(name = "postgres")]
    Postgres,
    /// HogQL itself, for display
    #[value(name = "hogql")]
    HogQL
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ClickHouse => "clickhouse",
            Self::Postgres => "postgres",
            Self::HogQL => "hogql"
        })
    }
}

/// Functions that read other rows of the window frame.
const OFFSET_WINDOW_FUNCTIONS: &[&str] = &["lag", "lead", "lagInFrame", "leadInFrame"];

/// Walks a prepared tree and renders it as SQL.
pub struct Printer<'a> {
    ctx:                &'a mut HogQLContext,
    dialect:            Dialect,
    pretty:             bool,
    /// Number of SELECTs being printed
    depth:              usize,
    in_join_constraint: bool,
    /// Settings for the outermost SELECT, merged over its own
    top_settings:       Option<QuerySettings>
}

impl<'a> Printer<'a> {
    pub fn new(ctx: &'a mut HogQLContext, dialect: Dialect, pretty: bool) -> Self {
        Self {
            ctx,
            dialect,
            pretty,
            depth: 0,
            in_join_constraint: false,
            top_settings: None
        }
    }

    /// Render `node`. `settings` only apply to SELECT statements.
    pub fn print(&mut self, node: &Expr, settings: Option<&QuerySettings>) -> HogQLResult<String> {
        check_settings_target(node, settings)?;
        if !is_select(node) {
            return self.visit(node);
        }
        self.top_settings = settings.filter(|s| !s.is_empty()).cloned();
        let mut sql = self.select_any(node).map_err(|e| e.with_span(node.span))?;
        // Set queries have no single top SELECT to carry them
        if let Some(settings) = self.top_settings.take()
            && self.dialect == Dialect::ClickHouse
        {
            sql.push_str(&self.separator());
            sql.push_str(&self.settings_clause(&settings)?);
        }
        Ok(sql)
    }

    fn visit(&mut self, expr: &Expr) -> HogQLResult<String> {
        self.visit_kind(expr).map_err(|e| e.with_span(expr.span))
    }

    fn visit_all(&mut self, exprs: &[Expr]) -> HogQLResult<Vec<String>> {
        exprs.iter().map(|e| self.visit(e)).collect()
    }

    fn visit_joined(&mut self, exprs: &[Expr]) -> HogQLResult<String> {
        Ok(self.visit_all(exprs)?.join(", "))
    }

    fn identifier(&self, name: &str) -> HogQLResult<String> {
        escape_identifier(name, self.dialect)
    }

    fn is_function_style(&self) -> bool {
        self.dialect != Dialect::Postgres
    }

    fn visit_kind(&mut self, expr: &Expr) -> HogQLResult<String> {
        match &expr.kind {
            ExprKind::Constant(value) => self.constant(value),
            ExprKind::Field {
                chain
            } => self.field(expr, chain),
            ExprKind::Placeholder {
                chain
            } => match self.dialect {
                Dialect::HogQL => Ok(format!("{{{}}}", self.chain_text(chain)?)),
                _ => Err(internal_error("Placeholders must be replaced before printing"))
            },
            ExprKind::Call(call) => self.call(call),
            ExprKind::Arithmetic {
                op,
                left,
                right
            } => {
                let left = self.visit(left)?;
                let right = self.visit(right)?;
                if self.is_function_style() {
                    Ok(format!("{}({}, {})", op.function_name(), left, right))
                } else {
                    Ok(format!("({} {} {})", left, op.symbol(), right))
                }
            }
            ExprKind::Compare {
                op,
                left,
                right
            } => self.compare(*op, left, right),
            ExprKind::And(exprs) => self.logical("and", "AND", "true", exprs),
            ExprKind::Or(exprs) => self.logical("or", "OR", "false", exprs),
            ExprKind::Not(inner) => {
                let inner = self.visit(inner)?;
                if self.is_function_style() {
                    Ok(format!("not({})", inner))
                } else {
                    Ok(format!("NOT ({})", inner))
                }
            }
            ExprKind::Between {
                expr,
                low,
                high,
                negated
            } => Ok(format!(
                "({} {}BETWEEN {} AND {})",
                self.visit(expr)?,
                if *negated { "NOT " } else { "" },
                self.visit(low)?,
                self.visit(high)?
            )),
            ExprKind::Tuple(exprs) => {
                let items = self.visit_joined(exprs)?;
                if self.is_function_style() {
                    Ok(format!("tuple({})", items))
                } else {
                    Ok(format!("({})", items))
                }
            }
            ExprKind::Array(exprs) => {
                let items = self.visit_joined(exprs)?;
                if self.is_function_style() {
                    Ok(format!("[{}]", items))
                } else {
                    Ok(format!("ARRAY[{}]", items))
                }
            }
            ExprKind::ArrayAccess {
                array,
                property,
                nullish
            } => {
                let array = self.visit(array)?;
                let property = self.visit(property)?;
                match self.dialect {
                    Dialect::ClickHouse => Ok(format!("arrayElement({}, {})", array, property)),
                    Dialect::HogQL if *nullish => Ok(format!("{}?.[{}]", array, property)),
                    _ => Ok(format!("{}[{}]", array, property))
                }
            }
            ExprKind::TupleAccess {
                tuple,
                index,
                nullish
            } => {
                let tuple = self.visit(tuple)?;
                match self.dialect {
                    Dialect::HogQL if *nullish => Ok(format!("{}?.{}", tuple, index)),
                    Dialect::HogQL => Ok(format!("{}.{}", tuple, index)),
                    _ => Ok(format!("tupleElement({}, {})", tuple, index))
                }
            }
            ExprKind::Alias {
                alias,
                expr: inner,
                hidden
            } => {
                let inner = self.visit(inner)?;
                if *hidden || self.dialect == Dialect::Postgres {
                    return Ok(inner);
                }
                Ok(format!("({} AS {})", inner, self.identifier(alias)?))
            }
            ExprKind::Lambda {
                args,
                body
            } => {
                let args = args
                    .iter()
                    .map(|a| self.identifier(a))
                    .collect::<HogQLResult<Vec<_>>>()?;
                let body = self.visit(body)?;
                match args.as_slice() {
                    [single] => Ok(format!("{} -> {}", single, body)),
                    _ => Ok(format!("({}) -> {}", args.join(", "), body))
                }
            }
            ExprKind::WindowFunction(window) => self.window_function(window),
            ExprKind::SelectQuery(_) | ExprKind::SelectSetQuery(_) => Ok(format!("({})", self.select_any(expr)?)),
            ExprKind::Unanalyzable => Err(internal_error("Unanalyzable marker can not be printed"))
        }
    }

    fn logical(&mut self, function: &str, keyword: &str, empty: &str, exprs: &[Expr]) -> HogQLResult<String> {
        let mut parts = self.visit_all(exprs)?;
        match parts.len() {
            0 => Ok(empty.to_string()),
            1 => Ok(parts.remove(0)),
            _ if self.is_function_style() => Ok(format!("{}({})", function, parts.join(", "))),
            _ => Ok(format!("({})", parts.join(&format!(" {} ", keyword))))
        }
    }

    fn chain_text(&self, chain: &[ChainItem]) -> HogQLResult<String> {
        let parts = chain
            .iter()
            .map(|item| match item {
                ChainItem::Name(name) => self.identifier(name),
                ChainItem::Index(index) => Ok(index.to_string())
            })
            .collect::<HogQLResult<Vec<_>>>()?;
        Ok(parts.join("."))
    }

    fn constant(&mut self, value: &ConstantValue) -> HogQLResult<String> {
        match (self.dialect, value) {
            (_, ConstantValue::Null) => Ok("NULL".to_string()),
            (Dialect::Postgres, ConstantValue::Bool(b)) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
            (_, ConstantValue::Bool(b)) => Ok(b.to_string()),
            (_, ConstantValue::Integer(i)) => Ok(i.to_string()),
            (_, ConstantValue::Float(f)) => Ok(format_float(*f)),
            (Dialect::ClickHouse, ConstantValue::String(s)) => Ok(self.param(ConstantValue::String(s.clone()))),
            (_, ConstantValue::String(s)) => escape_string(s, self.dialect),
            (Dialect::ClickHouse, ConstantValue::Uuid(u)) => {
                Ok(format!("toUUIDOrNull({})", self.param(ConstantValue::String(u.to_string()))))
            }
            (Dialect::ClickHouse, ConstantValue::Date(d)) => {
                Ok(format!("toDate({})", self.param(ConstantValue::String(format_date(d)))))
            }
            (Dialect::ClickHouse, ConstantValue::DateTime(dt)) => Ok(format!(
                "toDateTime64({}, 6, 'UTC')",
                self.param(ConstantValue::String(format_datetime(dt)))
            )),
            (Dialect::HogQL, ConstantValue::Uuid(u)) => Ok(format!("toUUID({})", escape_string(&u.to_string(), self.dialect)?)),
            (Dialect::HogQL, ConstantValue::Date(d)) => Ok(format!("toDate({})", escape_string(&format_date(d), self.dialect)?)),
            (Dialect::HogQL, ConstantValue::DateTime(dt)) => {
                Ok(format!("toDateTime({})", escape_string(&format_datetime(dt), self.dialect)?))
            }
            (Dialect::Postgres, ConstantValue::Uuid(u)) => Ok(format!("'{}'::uuid", u)),
            (Dialect::Postgres, ConstantValue::Date(d)) => Ok(format!("'{}'::date", format_date(d))),
            (Dialect::Postgres, ConstantValue::DateTime(dt)) => Ok(format!("'{}'::timestamptz", format_datetime(dt))),
            (_, ConstantValue::Array(items)) => {
                let items = items
                    .iter()
                    .map(|v| self.constant(v))
                    .collect::<HogQLResult<Vec<_>>>()?
                    .join(", ");
                match self.dialect {
                    Dialect::Postgres => Ok(format!("ARRAY[{}]", items)),
                    _ => Ok(format!("[{}]", items))
                }
            }
            (_, ConstantValue::Tuple(items)) => {
                let items = items
                    .iter()
                    .map(|v| self.constant(v))
                    .collect::<HogQLResult<Vec<_>>>()?
                    .join(", ");
                match self.dialect {
                    Dialect::Postgres => Ok(format!("({})", items)),
                    _ => Ok(format!("tuple({})", items))
                }
            }
        }
    }

    /// Bind `value` and return its placeholder.
    fn param(&mut self, value: ConstantValue) -> String {
        format!("%({})s", self.ctx.add_value(value))
    }

    fn field(&mut self, expr: &Expr, chain: &[ChainItem]) -> HogQLResult<String> {
        if self.dialect == Dialect::HogQL {
            return self.chain_text(chain);
        }
        let ty = expr
            .ty
            .as_ref()
            .ok_or_else(|| internal_error(format!("Field {} has no type", self.chain_text(chain).unwrap_or_default())))?;
        self.typed_field(ty)
    }

    fn typed_field(&mut self, ty: &Type) -> HogQLResult<String> {
        match ty {
            Type::Field(field) => self.database_field(field),
            Type::Property(property) => self.property(property),
            Type::FieldAlias(alias) => match alias.ty.unwrap_alias() {
                inner @ Type::Field(_) => self.typed_field(inner),
                _ => self.identifier(&alias.alias)
            },
            Type::LambdaArgument {
                name
            } => self.identifier(name),
            Type::Asterisk(_) => Ok("*".to_string()),
            Type::Table(_) => Err(query_error("A table can not be used as a value")),
            Type::Unresolved {
                name
            } => Err(internal_error(format!("Unresolved field {} reached the printer", name))),
            other => Err(internal_error(format!("Unexpected field type {:?}", other)))
        }
    }

    /// `table.column` for a column of a table or subquery.
    fn database_field(&mut self, field: &FieldType) -> HogQLResult<String> {
        let table_type = field.table_type.as_ref();
        if table_type.is_lazy() {
            return Err(internal_error(format!(
                "Field {} still references a lazy table; lazy tables must be expanded before printing",
                field.name
            )));
        }
        let prefix = table_type.print_name();
        if table_type.select_type().is_some() {
            let column = self.identifier(&field.name)?;
            if prefix.is_empty() {
                return Ok(column);
            }
            return Ok(format!("{}.{}", self.identifier(&prefix)?, column));
        }
        let Some(DatabaseField::Column(column)) = field.resolve_database_field() else {
            return Err(internal_error(format!("Field {} is not a printable column", field.name)));
        };
        let sql = format!("{}.{}", self.identifier(&prefix)?, self.identifier(&column.name)?);
        if self.dialect == Dialect::ClickHouse && column.kind == ColumnKind::DateTime {
            let timezone = escape_string(&self.ctx.timezone, self.dialect)?;
            return Ok(format!("toTimeZone({}, {})", sql, timezone));
        }
        Ok(sql)
    }

    fn call(&mut self, call: &Call) -> HogQLResult<String> {
        let name = self.function_name(&call.name, call.args.len(), call.params.as_ref().map_or(0, Vec::len))?;
        let mut args = self.visit_all(&call.args)?;
        if self.dialect == Dialect::ClickHouse
            && let Some(meta) = find_function(&call.name)
        {
            for suffix in meta.suffix_args {
                args.push(escape_string(suffix, self.dialect)?);
            }
        }
        let distinct = if call.distinct { "DISTINCT " } else { "" };
        let params = match &call.params {
            Some(params) => format!("({})", self.visit_joined(params)?),
            None => String::new()
        };
        Ok(format!("{}{}({}{})", name, params, distinct, args.join(", ")))
    }

    /// Printed name of a function, after checking its arity.
    fn function_name(&self, name: &str, args: usize, params: usize) -> HogQLResult<String> {
        if self.dialect == Dialect::Postgres {
            return Ok(name.to_string());
        }
        let meta = find_function(name)
            .cloned()
            .or_else(|| find_aggregation(name))
            .ok_or_else(|| query_error(format!("Unsupported function call '{}(...)'", name)))?;
        let too_many = meta.max_args.is_some_and(|max| args > max);
        if args < meta.min_args || too_many {
            let expected = match meta.max_args {
                Some(max) if max == meta.min_args => max.to_string(),
                Some(max) => format!("{}-{}", meta.min_args, max),
                None => format!("at least {}", meta.min_args)
            };
            return Err(query_error(format!(
                "Function '{}' expects {} argument(s), found {}",
                name, expected, args
            )));
        }
        if params < meta.min_params || params > meta.max_params {
            if meta.max_params == 0 {
                return Err(query_error(format!("Function '{}' does not accept parameters", name)));
            }
            return Err(query_error(format!(
                "Function '{}' expects {}-{} parameter(s), found {}",
                name, meta.min_params, meta.max_params, params
            )));
        }
        if self.dialect == Dialect::HogQL || meta.clickhouse_name.is_empty() {
            return Ok(name.to_string());
        }
        Ok(meta.clickhouse_name.to_string())
    }

    fn window_function(&mut self, window: &WindowFunction) -> HogQLResult<String> {
        let name = self.function_name(&window.name, window.args.len(), window.params.as_ref().map_or(0, Vec::len))?;
        let mut args = self.visit_all(&window.args)?;
        let offset_function = self.dialect == Dialect::ClickHouse && OFFSET_WINDOW_FUNCTIONS.contains(&window.name.as_str());
        if offset_function && let Some(first) = args.first_mut() {
            *first = format!("toNullable({})", first);
        }
        let params = match &window.params {
            Some(params) => format!("({})", self.visit_joined(params)?),
            None => String::new()
        };
        let over = match (&window.over_identifier, &window.over_expr) {
            (Some(identifier), _) => self.identifier(identifier)?,
            (None, Some(over)) if offset_function && over.frame_method.is_none() => {
                let mut over = over.clone();
                whole_partition_frame(&mut over);
                format!("({})", self.window_expr(&over)?)
            }
            (None, Some(over)) => format!("({})", self.window_expr(over)?),
            (None, None) if offset_function => {
                let mut over = WindowExpr::default();
                whole_partition_frame(&mut over);
                format!("({})", self.window_expr(&over)?)
            }
            (None, None) => "()".to_string()
        };
        Ok(format!("{}{}({}) OVER {}", name, params, args.join(", "), over))
    }

    fn window_expr(&mut self, window: &WindowExpr) -> HogQLResult<String> {
        let mut parts = Vec::new();
        if let Some(partition_by) = &window.partition_by {
            parts.push(format!("PARTITION BY {}", self.visit_joined(partition_by)?));
        }
        if let Some(order_by) = &window.order_by {
            parts.push(format!("ORDER BY {}", self.order_list(order_by)?));
        }
        if let Some(method) = window.frame_method {
            let method = match method {
                FrameMethod::Rows => "ROWS",
                FrameMethod::Range => "RANGE"
            };
            match (&window.frame_start, &window.frame_end) {
                (Some(start), Some(end)) => {
                    parts.push(format!("{} BETWEEN {} AND {}", method, frame_bound(start), frame_bound(end)));
                }
                (Some(start), None) => parts.push(format!("{} {}", method, frame_bound(start))),
                _ => {}
            }
        }
        Ok(parts.join(" "))
    }

    /// Separator placed between clauses.
    fn separator(&self) -> String {
        if self.pretty {
            format!("\n{}", "    ".repeat(self.depth.saturating_sub(1)))
        } else {
            " ".to_string()
        }
    }
}

fn whole_partition_frame(window: &mut WindowExpr) {
    window.frame_method = Some(FrameMethod::Rows);
    window.frame_start = Some(WindowFrameExpr::unbounded(FrameBound::Preceding));
    window.frame_end = Some(WindowFrameExpr::unbounded(FrameBound::Following));
}

fn frame_bound(bound: &WindowFrameExpr) -> String {
    match (bound.frame_type, bound.frame_value) {
        (FrameBound::CurrentRow, _) => "CURRENT ROW".to_string(),
        (FrameBound::Preceding, None) => "UNBOUNDED PRECEDING".to_string(),
        (FrameBound::Following, None) => "UNBOUNDED FOLLOWING".to_string(),
        (FrameBound::Preceding, Some(n)) => format!("{} PRECEDING", n),
        (FrameBound::Following, Some(n)) => format!("{} FOLLOWING", n)
    }
}

fn is_select(node: &Expr) -> bool {
    matches!(node.kind, ExprKind::SelectQuery(_) | ExprKind::SelectSetQuery(_))
}

/// Fails when non-empty `settings` are given for anything but a SELECT.
pub fn check_settings_target(node: &Expr, settings: Option<&QuerySettings>) -> HogQLResult<()> {
    if settings.is_some_and(|s| !s.is_empty()) && !is_select(node) {
        return Err(internal_error("Settings can only be applied to SELECT queries"));
    }
    Ok(())
}

/// Render a prepared tree.
pub fn print_prepared(
    node: &Expr,
    ctx: &mut HogQLContext,
    dialect: Dialect,
    settings: Option<&QuerySettings>,
    pretty: bool
) -> HogQLResult<String> {
    Printer::new(ctx, dialect, pretty).print(node, settings)
}
