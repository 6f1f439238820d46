//! `{name}` placeholder substitution.

use indexmap::IndexMap;

use crate::{
    ast::{Expr, ExprKind},
    error::{HogQLError, HogQLResult, syntax_error},
    visitor::{Visitor, VisitorMut, walk_expr, walk_expr_mut}
};

struct PlaceholderReplacer<'a> {
    values: &'a IndexMap<String, Expr>,
    error:  Option<HogQLError>
}

impl VisitorMut for PlaceholderReplacer<'_> {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        if self.error.is_some() {
            return;
        }
        let ExprKind::Placeholder {
            chain
        } = &expr.kind
        else {
            walk_expr_mut(self, expr);
            return;
        };
        let name = chain.iter().map(ToString::to_string).collect::<Vec<_>>().join(".");
        match self.values.get(&name) {
            Some(value) => {
                let span = expr.span;
                *expr = value.clone();
                if expr.span.is_none() {
                    expr.span = span;
                }
            }
            None => {
                let available = if self.values.is_empty() {
                    "none".to_string()
                } else {
                    self.values.keys().cloned().collect::<Vec<_>>().join(", ")
                };
                self.error = Some(syntax_error(
                    format!(
                        "Placeholder {{{}}} is not available in this context. You can use the following: {}",
                        name, available
                    ),
                    expr.span
                ));
            }
        }
    }
}

/// Substitute every `{name}` in `expr` with its value.
pub fn replace_placeholders(mut expr: Expr, values: &IndexMap<String, Expr>) -> HogQLResult<Expr> {
    let mut replacer = PlaceholderReplacer {
        values,
        error: None
    };
    replacer.visit_expr_mut(&mut expr);
    match replacer.error {
        Some(err) => Err(err),
        None => Ok(expr)
    }
}

struct PlaceholderFinder(Vec<String>);

impl Visitor for PlaceholderFinder {
    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Placeholder {
            chain
        } = &expr.kind
        {
            let name = chain.iter().map(ToString::to_string).collect::<Vec<_>>().join(".");
            if !self.0.contains(&name) {
                self.0.push(name);
            }
            return;
        }
        walk_expr(self, expr);
    }
}

/// Placeholder names used in `expr`, in order of first appearance.
pub fn find_placeholders(expr: &Expr) -> Vec<String> {
    let mut finder = PlaceholderFinder(Vec::new());
    finder.visit_expr(expr);
    finder.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::parse_expr, visitor::clear_spans};

    #[test]
    fn test_replaces_placeholder() {
        let mut values = IndexMap::new();
        values.insert("limit".to_string(), Expr::constant(10i64));
        let mut expr = parse_expr("x + {limit}", Some(&values)).expect("parse");
        clear_spans(&mut expr);
        assert_eq!(expr, parse_expr("x + 10", None).expect("parse"));
    }

    #[test]
    fn test_missing_placeholder_lists_available() {
        let mut values = IndexMap::new();
        values.insert("a".to_string(), Expr::constant(1i64));
        let err = parse_expr("{b}", Some(&values)).expect_err("missing");
        assert!(err.message().contains("You can use the following: a"));
    }

    #[test]
    fn test_find_placeholders() {
        let expr = parse_expr("{a} + {b} + {a}", None).expect("parse");
        assert_eq!(find_placeholders(&expr), vec!["a".to_string(), "b".to_string()]);
    }
}
