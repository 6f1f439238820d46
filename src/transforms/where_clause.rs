//! Safe predicate extraction.
//!
//! Given a WHERE expression and a [`PredicateTarget`], [`extract_predicate`]
//! returns a predicate that only references the target's columns and keeps at
//! least every row the original predicate keeps. Whatever cannot be proven
//! safe is dropped:
//!
//! - an `AND` branch that can not be extracted is dropped;
//! - an `OR` with any branch that can not be extracted becomes `TRUE`;
//! - `NOT x` is only extracted when `x` translates exactly.
//!
//! Leaves that reference columns outside the target produce
//! [`Extracted::Unanalyzable`], which poisons every call or comparison that
//! contains it.

use crate::{
    ast::{CompareOp, Expr, ExprKind, Type},
    visitor::clone_expr
};

/// Outcome of extracting one sub-expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Expr(Expr),
    /// Nothing to push; always safe to drop
    True,
    /// Referenced something outside the target
    Unanalyzable
}

/// Decides which columns are local and how they are spelled inside the target.
pub trait PredicateTarget {
    /// Translation of a resolved field reference, or `None` if it is not local.
    fn rewrite_field(&self, field: &Expr) -> Option<Expr>;

    /// Only keep leaves that are false for NULL inputs (targets behind an
    /// outer join).
    fn null_rejecting_only(&self) -> bool {
        false
    }

    /// Target-specific handling of a comparison, tried before the default.
    fn rewrite_compare(&self, _op: CompareOp, _left: &Expr, _right: &Expr) -> Option<Extracted> {
        None
    }
}

/// Extract the safe part of `expr`; `None` when nothing can be pushed.
pub fn extract_predicate(expr: &Expr, target: &dyn PredicateTarget) -> Option<Expr> {
    match extract(expr, target) {
        Extracted::Expr(e) => Some(e),
        Extracted::True | Extracted::Unanalyzable => None
    }
}

/// Calls that are false whenever an argument is NULL.
const NULL_REJECTING_CALLS: &[&str] = &[
    "equals",
    "less",
    "lessOrEquals",
    "greater",
    "greaterOrEquals",
    "like",
    "ilike",
    "match",
    "in",
    "has",
    "startsWith",
    "endsWith"
];

fn is_null_rejecting_compare(op: CompareOp, left: &Expr, right: &Expr) -> bool {
    !op.is_negative()
        && op != CompareOp::InCohort
        && !left.is_null_constant()
        && !right.is_null_constant()
}

pub fn extract(expr: &Expr, target: &dyn PredicateTarget) -> Extracted {
    match &expr.kind {
        ExprKind::And(parts) => {
            let kept: Vec<Expr> = parts
                .iter()
                .filter_map(|part| match extract(part, target) {
                    Extracted::Expr(e) => Some(e),
                    Extracted::True | Extracted::Unanalyzable => None
                })
                .collect();
            match Expr::and_all(kept) {
                Some(e) => Extracted::Expr(e),
                None => Extracted::True
            }
        }
        ExprKind::Or(parts) => {
            let mut kept = Vec::with_capacity(parts.len());
            for part in parts {
                match extract(part, target) {
                    Extracted::Expr(e) => kept.push(e),
                    Extracted::True | Extracted::Unanalyzable => return Extracted::True
                }
            }
            Extracted::Expr(Expr::or(kept))
        }
        ExprKind::Not(inner) => {
            if target.null_rejecting_only() {
                return Extracted::True;
            }
            match exact(inner, target) {
                Some(e) => Extracted::Expr(Expr::not(e)),
                None if matches!(inner.kind, ExprKind::Field { .. }) => Extracted::Unanalyzable,
                None => Extracted::True
            }
        }
        ExprKind::Compare {
            op,
            left,
            right
        } => {
            if let Some(result) = target.rewrite_compare(*op, left, right) {
                return result;
            }
            if matches!(op, CompareOp::InCohort | CompareOp::NotInCohort) {
                return Extracted::Unanalyzable;
            }
            if target.null_rejecting_only() && !is_null_rejecting_compare(*op, left, right) {
                return Extracted::True;
            }
            match (exact(left, target), exact(right, target)) {
                (Some(l), Some(r)) => Extracted::Expr(Expr::compare(*op, l, r)),
                _ => Extracted::Unanalyzable
            }
        }
        ExprKind::Between {
            negated: true,
            ..
        } if target.null_rejecting_only() => Extracted::True,
        ExprKind::Call(call) => {
            if target.null_rejecting_only() && !NULL_REJECTING_CALLS.contains(&call.name.as_str()) {
                return Extracted::True;
            }
            match exact(expr, target) {
                Some(e) => Extracted::Expr(e),
                None => Extracted::Unanalyzable
            }
        }
        ExprKind::Alias {
            expr: inner, ..
        } => extract(inner, target),
        ExprKind::Constant(_) => Extracted::Expr(clone_expr(expr, false)),
        ExprKind::Field {
            ..
        } if target.null_rejecting_only() => Extracted::True,
        ExprKind::SelectQuery(_)
        | ExprKind::SelectSetQuery(_)
        | ExprKind::Lambda {
            ..
        }
        | ExprKind::Placeholder {
            ..
        }
        | ExprKind::Unanalyzable => Extracted::Unanalyzable,
        _ => match exact(expr, target) {
            Some(e) => Extracted::Expr(e),
            None => Extracted::Unanalyzable
        }
    }
}

/// Translate `expr` completely or not at all.
pub fn exact(expr: &Expr, target: &dyn PredicateTarget) -> Option<Expr> {
    let all = |exprs: &[Expr]| -> Option<Vec<Expr>> { exprs.iter().map(|e| exact(e, target)).collect() };
    let boxed = |e: &Expr| exact(e, target).map(Box::new);
    let kind = match &expr.kind {
        ExprKind::Constant(value) => ExprKind::Constant(value.clone()),
        ExprKind::Field {
            ..
        } => return target.rewrite_field(expr),
        ExprKind::Call(call) => {
            let mut call = call.clone();
            call.args = all(&call.args)?;
            if let Some(params) = &call.params {
                call.params = Some(all(params)?);
            }
            ExprKind::Call(call)
        }
        ExprKind::Arithmetic {
            op,
            left,
            right
        } => ExprKind::Arithmetic {
            op:    *op,
            left:  boxed(left)?,
            right: boxed(right)?
        },
        ExprKind::Compare {
            op,
            left,
            right
        } => {
            if matches!(op, CompareOp::InCohort | CompareOp::NotInCohort) {
                return None;
            }
            ExprKind::Compare {
                op:    *op,
                left:  boxed(left)?,
                right: boxed(right)?
            }
        }
        ExprKind::And(parts) => ExprKind::And(all(parts)?),
        ExprKind::Or(parts) => ExprKind::Or(all(parts)?),
        ExprKind::Not(inner) => ExprKind::Not(boxed(inner)?),
        ExprKind::Between {
            expr: inner,
            low,
            high,
            negated
        } => ExprKind::Between {
            expr:    boxed(inner)?,
            low:     boxed(low)?,
            high:    boxed(high)?,
            negated: *negated
        },
        ExprKind::Tuple(items) => ExprKind::Tuple(all(items)?),
        ExprKind::Array(items) => ExprKind::Array(all(items)?),
        ExprKind::ArrayAccess {
            array,
            property,
            nullish
        } => ExprKind::ArrayAccess {
            array:    boxed(array)?,
            property: boxed(property)?,
            nullish:  *nullish
        },
        ExprKind::TupleAccess {
            tuple,
            index,
            nullish
        } => ExprKind::TupleAccess {
            tuple:   boxed(tuple)?,
            index:   *index,
            nullish: *nullish
        },
        ExprKind::Alias {
            expr: inner, ..
        } => return exact(inner, target),
        ExprKind::Placeholder {
            ..
        }
        | ExprKind::Lambda {
            ..
        }
        | ExprKind::WindowFunction(_)
        | ExprKind::SelectQuery(_)
        | ExprKind::SelectSetQuery(_)
        | ExprKind::Unanalyzable => return None
    };
    Some(Expr::new(kind))
}

/// Functions whose result only depends on their arguments and the clock.
const CONSTANT_FUNCTIONS: &[&str] = &[
    "now",
    "now64",
    "today",
    "yesterday",
    "toDateTime",
    "toDateTime64",
    "toDate",
    "parseDateTimeBestEffort",
    "parseDateTime64BestEffortOrNull",
    "toTimeZone",
    "toStartOfDay",
    "toStartOfHour",
    "toStartOfWeek",
    "toStartOfMonth",
    "toStartOfInterval",
    "toIntervalSecond",
    "toIntervalMinute",
    "toIntervalHour",
    "toIntervalDay",
    "toIntervalWeek",
    "toIntervalMonth",
    "toIntervalYear",
    "plus",
    "minus",
    "assumeNotNull"
];

/// Whether `expr` evaluates to the same value for every row.
pub fn is_constant_like(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Constant(_) => true,
        ExprKind::Arithmetic {
            left,
            right,
            ..
        } => is_constant_like(left) && is_constant_like(right),
        ExprKind::Call(call) => {
            CONSTANT_FUNCTIONS.contains(&call.name.as_str()) && call.args.iter().all(is_constant_like)
        }
        ExprKind::Alias {
            expr, ..
        } => is_constant_like(expr),
        ExprKind::Tuple(items) | ExprKind::Array(items) => items.iter().all(is_constant_like),
        ExprKind::Field {
            ..
        } => matches!(expr.ty, Some(Type::Constant(_))),
        _ => false
    }
}

/// Columns of one lazily joined table, referenced by its print name.
///
/// Local fields are rewritten to `qualifier.field[.property...]`.
#[derive(Debug, Clone)]
pub struct TableAliasTarget {
    alias:      String,
    qualifier:  String,
    outer_join: bool
}

impl TableAliasTarget {
    pub fn new(alias: &str, qualifier: &str, outer_join: bool) -> Self {
        Self {
            alias: alias.to_string(),
            qualifier: qualifier.to_string(),
            outer_join
        }
    }
}

impl PredicateTarget for TableAliasTarget {
    fn rewrite_field(&self, field: &Expr) -> Option<Expr> {
        let mut chain = crate::ast::Chain::new();
        chain.push(self.qualifier.as_str().into());
        match field.ty.as_ref().map(Type::unwrap_alias)? {
            Type::Field(f) if f.table_type.is_lazy() && f.table_type.print_name() == self.alias => {
                chain.push(f.name.as_str().into());
            }
            Type::Property(p)
                if p.joined_subquery.is_none()
                    && p.field_type.table_type.is_lazy()
                    && p.field_type.table_type.print_name() == self.alias =>
            {
                chain.push(p.field_type.name.as_str().into());
                chain.extend(p.chain.iter().cloned());
            }
            _ => return None
        }
        Some(Expr::field_chain(chain))
    }

    fn null_rejecting_only(&self) -> bool {
        self.outer_join
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fields named `local_*` are local and keep their name.
    struct NameTarget;

    impl PredicateTarget for NameTarget {
        fn rewrite_field(&self, field: &Expr) -> Option<Expr> {
            let chain = field.chain()?;
            let name = chain.last()?.as_name()?;
            name.starts_with("local_").then(|| Expr::field(&["inner", name]))
        }
    }

    fn eq(field: &str, value: i64) -> Expr {
        Expr::compare(CompareOp::Eq, Expr::field(&[field]), Expr::constant(value))
    }

    #[test]
    fn test_and_keeps_analyzable_branch() {
        let expr = Expr::and(vec![eq("local_a", 1), eq("other", 2)]);
        let extracted = extract_predicate(&expr, &NameTarget);
        assert_eq!(
            extracted,
            Some(Expr::compare(CompareOp::Eq, Expr::field(&["inner", "local_a"]), Expr::constant(1i64)))
        );
    }

    #[test]
    fn test_or_with_unanalyzable_branch_is_dropped() {
        let expr = Expr::or(vec![eq("local_a", 1), eq("other", 2)]);
        assert_eq!(extract_predicate(&expr, &NameTarget), None);
    }

    #[test]
    fn test_tombstone_poisons_calls() {
        let expr = Expr::call("like", vec![
            Expr::call("concat", vec![Expr::field(&["local_a"]), Expr::field(&["other"])]),
            Expr::constant("%x%"),
        ]);
        assert_eq!(extract(&expr, &NameTarget), Extracted::Unanalyzable);
    }

    #[test]
    fn test_not_requires_exact_translation() {
        let partial = Expr::not(Expr::and(vec![eq("local_a", 1), eq("other", 2)]));
        assert_eq!(extract_predicate(&partial, &NameTarget), None);
        let full = Expr::not(eq("local_a", 1));
        assert!(extract_predicate(&full, &NameTarget).is_some());
    }

    #[test]
    fn test_literal_true_is_not_a_sentinel() {
        let expr = Expr::and(vec![Expr::boolean(true), eq("local_a", 1)]);
        let Some(Expr {
            kind: ExprKind::And(parts),
            ..
        }) = extract_predicate(&expr, &NameTarget)
        else {
            panic!("expected AND");
        };
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_subqueries_are_unanalyzable() {
        let expr = Expr::compare(
            CompareOp::In,
            Expr::field(&["local_a"]),
            Expr::select(crate::ast::SelectQuery::default())
        );
        assert_eq!(extract(&expr, &NameTarget), Extracted::Unanalyzable);
    }

    #[test]
    fn test_constant_like() {
        assert!(is_constant_like(&Expr::call("now", vec![])));
        assert!(is_constant_like(&Expr::call("minus", vec![
            Expr::call("now", vec![]),
            Expr::call("toIntervalDay", vec![Expr::constant(7i64)]),
        ])));
        assert!(!is_constant_like(&Expr::field(&["timestamp"])));
        assert!(!is_constant_like(&Expr::call("rand", vec![])));
    }
}
