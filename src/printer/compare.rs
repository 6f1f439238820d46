//! Comparison operators.
//!
//! ClickHouse comparisons follow SQL three-valued logic, while HogQL treats
//! `NULL = NULL` as true and never lets a NULL comparison leak into a
//! filter. Comparisons with a possibly-NULL side are therefore wrapped in
//! `ifNull` with the operator's default: false for positive operators, true
//! for negated ones. JOIN constraints keep the engine's own semantics.

use super::{Dialect, Printer};
use crate::{
    ast::{CompareOp, Expr, Type},
    error::{HogQLResult, internal_error}
};

fn is_nullable(expr: &Expr) -> bool {
    expr.ty.as_ref().is_none_or(Type::is_nullable)
}

fn is_membership(op: CompareOp) -> bool {
    matches!(
        op,
        CompareOp::In | CompareOp::NotIn | CompareOp::GlobalIn | CompareOp::GlobalNotIn
    )
}

/// Function-call form of `left op right`.
fn compare_function(op: CompareOp, left: &str, right: &str) -> HogQLResult<String> {
    let name = match op {
        CompareOp::Eq => "equals",
        CompareOp::NotEq => "notEquals",
        CompareOp::Gt => "greater",
        CompareOp::GtEq => "greaterOrEquals",
        CompareOp::Lt => "less",
        CompareOp::LtEq => "lessOrEquals",
        CompareOp::Like => "like",
        CompareOp::ILike => "ilike",
        CompareOp::NotLike => "notLike",
        CompareOp::NotILike => "notILike",
        CompareOp::In => "in",
        CompareOp::NotIn => "notIn",
        CompareOp::GlobalIn => "globalIn",
        CompareOp::GlobalNotIn => "globalNotIn",
        CompareOp::Regex => "match",
        CompareOp::IRegex => return Ok(format!("match({}, concat('(?i)', {}))", left, right)),
        CompareOp::NotRegex => return Ok(format!("not(match({}, {}))", left, right)),
        CompareOp::NotIRegex => return Ok(format!("not(match({}, concat('(?i)', {})))", left, right)),
        CompareOp::InCohort | CompareOp::NotInCohort => {
            return Err(internal_error("Cohort comparisons must be resolved before printing"));
        }
    };
    Ok(format!("{}({}, {})", name, left, right))
}

fn postgres_operator(op: CompareOp) -> HogQLResult<&'static str> {
    Ok(match op {
        CompareOp::Eq => "=",
        CompareOp::NotEq => "!=",
        CompareOp::Gt => ">",
        CompareOp::GtEq => ">=",
        CompareOp::Lt => "<",
        CompareOp::LtEq => "<=",
        CompareOp::Like => "LIKE",
        CompareOp::ILike => "ILIKE",
        CompareOp::NotLike => "NOT LIKE",
        CompareOp::NotILike => "NOT ILIKE",
        CompareOp::In | CompareOp::GlobalIn => "IN",
        CompareOp::NotIn | CompareOp::GlobalNotIn => "NOT IN",
        CompareOp::Regex => "~",
        CompareOp::IRegex => "~*",
        CompareOp::NotRegex => "!~",
        CompareOp::NotIRegex => "!~*",
        CompareOp::InCohort | CompareOp::NotInCohort => {
            return Err(internal_error("Cohort comparisons must be resolved before printing"));
        }
    })
}

impl Printer<'_> {
    pub(super) fn compare(&mut self, op: CompareOp, left: &Expr, right: &Expr) -> HogQLResult<String> {
        if self.dialect == Dialect::Postgres {
            return self.postgres_compare(op, left, right);
        }
        let null_safe = self.dialect == Dialect::ClickHouse && !self.in_join_constraint;
        if null_safe && let Some(sql) = self.optimized_property_compare(op, left, right)? {
            return Ok(sql);
        }

        if null_safe && matches!(op, CompareOp::Eq | CompareOp::NotEq) {
            let positive = op == CompareOp::Eq;
            match (left.is_null_constant(), right.is_null_constant()) {
                (true, true) => return Ok(if positive { "1" } else { "0" }.to_string()),
                (true, false) | (false, true) => {
                    let other = if left.is_null_constant() { right } else { left };
                    let other = self.visit(other)?;
                    let function = if positive { "isNull" } else { "isNotNull" };
                    return Ok(format!("{}({})", function, other));
                }
                (false, false) => {}
            }
        }

        let left_sql = self.visit(left)?;
        let right_sql = self.visit(right)?;
        let base = compare_function(op, &left_sql, &right_sql)?;
        if !null_safe {
            return Ok(base);
        }
        let left_nullable = is_nullable(left);
        let right_nullable = !is_membership(op) && is_nullable(right);
        if !left_nullable && !right_nullable {
            return Ok(base);
        }
        let both_columns = left_nullable
            && right_nullable
            && left.as_constant().is_none()
            && right.as_constant().is_none();
        Ok(match op {
            CompareOp::Eq if both_columns => format!(
                "ifNull({}, and(isNull({}), isNull({})))",
                base, left_sql, right_sql
            ),
            CompareOp::NotEq if both_columns => format!(
                "ifNull({}, or(isNotNull({}), isNotNull({})))",
                base, left_sql, right_sql
            ),
            op if op.is_negative() => format!("ifNull({}, 1)", base),
            _ => format!("ifNull({}, 0)", base)
        })
    }

    fn postgres_compare(&mut self, op: CompareOp, left: &Expr, right: &Expr) -> HogQLResult<String> {
        if matches!(op, CompareOp::Eq | CompareOp::NotEq) && (left.is_null_constant() || right.is_null_constant()) {
            let other = if left.is_null_constant() { right } else { left };
            let other = self.visit(other)?;
            let test = if op == CompareOp::Eq { "IS NULL" } else { "IS NOT NULL" };
            return Ok(format!("({} {})", other, test));
        }
        let operator = postgres_operator(op)?;
        Ok(format!("({} {} {})", self.visit(left)?, operator, self.visit(right)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_forms() {
        assert_eq!(compare_function(CompareOp::Eq, "a", "b").unwrap(), "equals(a, b)");
        assert_eq!(
            compare_function(CompareOp::NotIRegex, "a", "b").unwrap(),
            "not(match(a, concat('(?i)', b)))"
        );
        assert!(compare_function(CompareOp::InCohort, "a", "b").is_err());
    }

    #[test]
    fn test_postgres_operators() {
        assert_eq!(postgres_operator(CompareOp::NotIn).unwrap(), "NOT IN");
        assert_eq!(postgres_operator(CompareOp::IRegex).unwrap(), "~*");
    }
}
