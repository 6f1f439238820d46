//! Name and type resolution.
//!
//! [`resolve_types`] consumes an untyped tree and returns the same tree with
//! a [`Type`] on every node. Names are bound against an explicit stack of
//! scopes: each SELECT pushes a frame holding its tables, aliases, output
//! columns and CTEs, and lambdas push frames that only hold their argument
//! names.
//!
//! Field lookup in a frame goes: joined table names (for chains of two or
//! more segments), column aliases, columns of every joined table, lambda
//! arguments of enclosing lambdas, CTEs, and finally context globals.

mod constants;
mod fields;
mod scope;
mod select;

use std::sync::Arc;

pub use constants::{arithmetic_type, expr_constant_type};

use self::scope::Frame;
use crate::{
    ast::{
        Call, CompareOp, ConstantDataType, ConstantType, Expr, ExprKind, FieldAliasType,
        SelectQueryType, Span, Type, WindowExpr, WindowFunction
    },
    context::HogQLContext,
    database::Database,
    error::{HogQLResult, internal_error, query_error},
    printer::Dialect,
    transforms::cohorts
};

/// Bound on nested expression-field expansion and field traversal.
pub const MAX_EXPANSION_DEPTH: usize = 10;

/// Resolve every name in `node` and attach types.
///
/// `outer_scopes` are visible to the outermost node, e.g. when a generated
/// subquery is resolved for a SELECT that is already typed.
pub fn resolve_types(
    node: Expr,
    ctx: &mut HogQLContext,
    dialect: Dialect,
    outer_scopes: &[Arc<SelectQueryType>]
) -> HogQLResult<Expr> {
    let database = ctx.database.clone().ok_or_else(|| {
        internal_error("Database needs to be attached to the context before resolving types")
    })?;
    let frames = outer_scopes.iter().map(|scope| Frame::from_type(scope.as_ref().clone())).collect();
    let mut resolver = Resolver {
        ctx,
        dialect,
        database,
        frames,
        set_ctes: Vec::new(),
        expansion_depth: 0
    };
    resolver.visit(node)
}

pub(crate) struct Resolver<'a> {
    ctx:             &'a mut HogQLContext,
    dialect:         Dialect,
    database:        Arc<Database>,
    frames:          Vec<Frame>,
    /// CTEs shared by all branches of the set queries being resolved
    set_ctes:        Vec<indexmap::IndexMap<String, crate::ast::Cte>>,
    expansion_depth: usize
}

fn typed(kind: ExprKind, ty: Type, span: Option<Span>) -> Expr {
    Expr {
        kind,
        ty: Some(ty),
        span
    }
}

fn boolean() -> Type {
    Type::constant(ConstantDataType::Boolean)
}

impl Resolver<'_> {
    pub(crate) fn visit(&mut self, expr: Expr) -> HogQLResult<Expr> {
        let span = expr.span;
        if expr.ty.is_some() {
            return Err(internal_error("Type already resolved for node").with_span(span));
        }
        self.visit_kind(expr.kind, span).map_err(|e| e.with_span(span))
    }

    fn visit_all(&mut self, exprs: Vec<Expr>) -> HogQLResult<Vec<Expr>> {
        exprs.into_iter().map(|e| self.visit(e)).collect()
    }

    /// Run `f` with `frame` pushed, popping it even when `f` fails.
    fn with_frame<T>(
        &mut self,
        frame: Frame,
        f: impl FnOnce(&mut Self) -> HogQLResult<T>
    ) -> (Frame, HogQLResult<T>) {
        self.frames.push(frame);
        let result = f(self);
        let frame = self.frames.pop().unwrap_or_default();
        (frame, result)
    }

    fn visit_kind(&mut self, kind: ExprKind, span: Option<Span>) -> HogQLResult<Expr> {
        match kind {
            ExprKind::Constant(value) => {
                let ty = Type::Constant(value.constant_type());
                Ok(typed(ExprKind::Constant(value), ty, span))
            }
            ExprKind::Field {
                chain
            } => self.visit_field(chain, span),
            ExprKind::Placeholder {
                chain
            } => Err(query_error(format!(
                "Placeholders, such as {{{}}}, are not supported in this context",
                chain.iter().map(ToString::to_string).collect::<Vec<_>>().join(".")
            ))),
            ExprKind::Call(call) => self.visit_call(call, span),
            ExprKind::Arithmetic {
                op,
                left,
                right
            } => {
                let left = self.visit(*left)?;
                let right = self.visit(*right)?;
                let ty = arithmetic_type(&expr_constant_type(&left), &expr_constant_type(&right));
                Ok(typed(
                    ExprKind::Arithmetic {
                        op,
                        left: Box::new(left),
                        right: Box::new(right)
                    },
                    Type::Constant(ty),
                    span
                ))
            }
            ExprKind::Compare {
                op: op @ (CompareOp::InCohort | CompareOp::NotInCohort),
                left,
                right
            } => {
                let rewritten = cohorts::in_cohort_subquery(self.ctx, *left, *right, op == CompareOp::NotInCohort)?;
                self.visit(rewritten.with_span(span))
            }
            ExprKind::Compare {
                op,
                left,
                right
            } => {
                let left = self.visit(*left)?;
                let right = self.visit(*right)?;
                Ok(typed(
                    ExprKind::Compare {
                        op,
                        left: Box::new(left),
                        right: Box::new(right)
                    },
                    boolean(),
                    span
                ))
            }
            ExprKind::And(exprs) => Ok(typed(ExprKind::And(self.visit_all(exprs)?), boolean(), span)),
            ExprKind::Or(exprs) => Ok(typed(ExprKind::Or(self.visit_all(exprs)?), boolean(), span)),
            ExprKind::Not(inner) => {
                let inner = self.visit(*inner)?;
                Ok(typed(ExprKind::Not(Box::new(inner)), boolean(), span))
            }
            ExprKind::Between {
                expr,
                low,
                high,
                negated
            } => {
                let expr = self.visit(*expr)?;
                let low = self.visit(*low)?;
                let high = self.visit(*high)?;
                Ok(typed(
                    ExprKind::Between {
                        expr: Box::new(expr),
                        low: Box::new(low),
                        high: Box::new(high),
                        negated
                    },
                    boolean(),
                    span
                ))
            }
            ExprKind::Tuple(exprs) => {
                let exprs = self.visit_all(exprs)?;
                let types = exprs.iter().map(expr_constant_type).collect();
                Ok(typed(ExprKind::Tuple(exprs), Type::constant(ConstantDataType::Tuple(types)), span))
            }
            ExprKind::Array(exprs) => {
                let exprs = self.visit_all(exprs)?;
                let item = exprs.first().map(expr_constant_type).unwrap_or_else(ConstantType::unknown);
                Ok(typed(
                    ExprKind::Array(exprs),
                    Type::constant(ConstantDataType::Array(Box::new(item))),
                    span
                ))
            }
            ExprKind::ArrayAccess {
                array,
                property,
                nullish
            } => self.visit_array_access(*array, *property, nullish, span),
            ExprKind::TupleAccess {
                tuple,
                index,
                nullish
            } => {
                if index == 0 {
                    return Err(query_error("SQL indexes start from one, not from zero. E.g: array[1]"));
                }
                let tuple = self.visit(*tuple)?;
                let item = match expr_constant_type(&tuple).data_type {
                    ConstantDataType::Tuple(items) => usize::try_from(index - 1)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .unwrap_or_else(ConstantType::unknown),
                    _ => ConstantType::unknown()
                };
                Ok(typed(
                    ExprKind::TupleAccess {
                        tuple: Box::new(tuple),
                        index,
                        nullish
                    },
                    Type::Constant(item),
                    span
                ))
            }
            ExprKind::Alias {
                alias,
                expr,
                hidden
            } => self.visit_alias(alias, *expr, hidden, span),
            ExprKind::Lambda {
                args,
                body
            } => {
                let frame = Frame::from_type(SelectQueryType::lambda(args.clone()));
                let (_, body) = self.with_frame(frame, |r| r.visit(*body));
                Ok(typed(
                    ExprKind::Lambda {
                        args,
                        body: Box::new(body?)
                    },
                    Type::Constant(ConstantType::unknown()),
                    span
                ))
            }
            ExprKind::WindowFunction(window) => self.visit_window_function(window, span),
            ExprKind::SelectQuery(query) => self.visit_select_query(*query, span),
            ExprKind::SelectSetQuery(set) => self.visit_select_set_query(*set, span),
            ExprKind::Unanalyzable => Err(internal_error("Unanalyzable marker reached the resolver"))
        }
    }

    fn visit_call(&mut self, call: Call, span: Option<Span>) -> HogQLResult<Expr> {
        let Call {
            name,
            args,
            params,
            distinct
        } = call;
        let args = self.visit_all(args)?;
        let params = params.map(|p| self.visit_all(p)).transpose()?;
        let ty = constants::call_type(&name, &args, params.as_deref());
        Ok(typed(
            ExprKind::Call(Call {
                name,
                args,
                params,
                distinct
            }),
            Type::Call(ty),
            span
        ))
    }

    fn visit_alias(&mut self, alias: String, expr: Expr, hidden: bool, span: Option<Span>) -> HogQLResult<Expr> {
        if alias.is_empty() {
            return Err(query_error("Alias cannot be empty"));
        }
        if !hidden && self.current_frame().is_some_and(|f| f.visible_aliases.contains(&alias)) {
            return Err(query_error(format!("Cannot redefine an alias with the name: {}", alias)));
        }
        let expr = self.visit(expr)?;
        let inner = expr.ty.clone().unwrap_or_else(|| Type::Constant(ConstantType::unknown()));
        let alias_type = FieldAliasType {
            alias: alias.clone(),
            ty:    Box::new(inner)
        };
        if let Some(frame) = self.current_frame_mut() {
            if !hidden {
                frame.visible_aliases.insert(alias.clone());
                frame.ty.aliases.insert(alias.clone(), alias_type.clone());
            } else if !frame.ty.aliases.contains_key(&alias) {
                frame.ty.aliases.insert(alias.clone(), alias_type.clone());
            }
        }
        Ok(typed(
            ExprKind::Alias {
                alias,
                expr: Box::new(expr),
                hidden
            },
            Type::FieldAlias(alias_type),
            span
        ))
    }

    pub(super) fn visit_window_expr(&mut self, window: WindowExpr) -> HogQLResult<WindowExpr> {
        let WindowExpr {
            partition_by,
            order_by,
            frame_method,
            frame_start,
            frame_end
        } = window;
        let partition_by = partition_by.map(|p| self.visit_all(p)).transpose()?;
        let order_by = order_by
            .map(|items| {
                items
                    .into_iter()
                    .map(|mut item| {
                        item.expr = self.visit(item.expr)?;
                        Ok(item)
                    })
                    .collect::<HogQLResult<Vec<_>>>()
            })
            .transpose()?;
        Ok(WindowExpr {
            partition_by,
            order_by,
            frame_method,
            frame_start,
            frame_end
        })
    }

    fn visit_window_function(&mut self, window: WindowFunction, span: Option<Span>) -> HogQLResult<Expr> {
        let WindowFunction {
            name,
            args,
            params,
            over_expr,
            over_identifier
        } = window;
        if let Some(identifier) = &over_identifier
            && !self.current_frame().is_some_and(|f| f.windows.contains(identifier))
        {
            return Err(query_error(format!("Window {} is not defined", identifier)));
        }
        let args = self.visit_all(args)?;
        let params = params.map(|p| self.visit_all(p)).transpose()?;
        let over_expr = over_expr.map(|w| self.visit_window_expr(w)).transpose()?;
        let ty = constants::call_type(&name, &args, params.as_deref());
        Ok(typed(
            ExprKind::WindowFunction(WindowFunction {
                name,
                args,
                params,
                over_expr,
                over_identifier
            }),
            Type::Call(ty),
            span
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::HogQLQueryModifiers,
        parser::{parse_expr, parse_select}
    };

    fn context() -> HogQLContext {
        let database = Database::create_for(Some(1), &HogQLQueryModifiers::default());
        HogQLContext::new(1).with_database(Arc::new(database))
    }

    #[test]
    fn test_constant_folding_types() {
        let mut ctx = context();
        let expr = resolve_types(parse_expr("1 + 2", None).expect("parse"), &mut ctx, Dialect::ClickHouse, &[])
            .expect("resolve");
        assert_eq!(
            expr.ty.map(|t| t.resolve_constant_type()),
            Some(ConstantType::new(ConstantDataType::Integer))
        );
        let expr = resolve_types(parse_expr("1 + 2.5", None).expect("parse"), &mut ctx, Dialect::ClickHouse, &[])
            .expect("resolve");
        assert_eq!(
            expr.ty.map(|t| t.resolve_constant_type().data_type),
            Some(ConstantDataType::Float)
        );
    }

    #[test]
    fn test_requires_database() {
        let mut ctx = HogQLContext::new(1);
        let err = resolve_types(parse_expr("1", None).expect("parse"), &mut ctx, Dialect::ClickHouse, &[])
            .expect_err("no database");
        assert!(!err.is_exposed());
    }

    #[test]
    fn test_zero_index_is_rejected() {
        let mut ctx = context();
        let query = parse_select("SELECT [1, 2][0] FROM events").expect("parse");
        let err = resolve_types(query, &mut ctx, Dialect::ClickHouse, &[]).expect_err("zero index");
        assert_eq!(err.message(), "SQL indexes start from one, not from zero. E.g: array[1]");
    }

    #[test]
    fn test_double_resolution_is_an_error() {
        let mut ctx = context();
        let expr = resolve_types(parse_expr("1", None).expect("parse"), &mut ctx, Dialect::ClickHouse, &[])
            .expect("resolve");
        assert!(resolve_types(expr, &mut ctx, Dialect::ClickHouse, &[]).is_err());
    }
}
