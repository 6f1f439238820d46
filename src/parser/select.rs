use indexmap::IndexMap;
use sqlparser::tokenizer::Token;

use super::Parser;
use crate::{
    ast::{
        ConstraintType, Cte, CteType, Expr, ExprKind, JoinConstraint, JoinExpr, LimitBy,
        RatioExpr, SampleExpr, SelectQuery, SelectSetNode, SelectSetQuery, SetOperator
    },
    error::{HogQLResult, syntax_error}
};

/// Words that may precede `JOIN` in a join clause.
const JOIN_WORDS: &[&str] = &[
    "GLOBAL", "ANY", "ALL", "ASOF", "SEMI", "ANTI", "LEFT", "RIGHT", "FULL", "INNER", "CROSS",
    "OUTER"
];

impl Parser<'_> {
    /// `query (UNION ALL | UNION DISTINCT | INTERSECT | EXCEPT query)*`
    pub(crate) fn parse_select_set(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        let initial = self.parse_select_unit()?;
        let mut subsequent = Vec::new();
        loop {
            let op = if self.consume_keyword("UNION") {
                if self.consume_keyword("ALL") {
                    SetOperator::UnionAll
                } else if self.consume_keyword("DISTINCT") {
                    SetOperator::UnionDistinct
                } else {
                    return Err(self.unexpected("expected ALL or DISTINCT after UNION"));
                }
            } else if self.consume_keyword("INTERSECT") {
                if self.consume_keyword("DISTINCT") {
                    SetOperator::IntersectDistinct
                } else {
                    SetOperator::Intersect
                }
            } else if self.consume_keyword("EXCEPT") {
                SetOperator::Except
            } else {
                break;
            };
            let query = self.parse_select_unit()?;
            subsequent.push(SelectSetNode {
                op,
                query
            });
        }
        if subsequent.is_empty() {
            return Ok(initial);
        }
        Ok(Expr::new(ExprKind::SelectSetQuery(Box::new(SelectSetQuery {
            initial,
            subsequent
        })))
        .with_span(self.span_from(start)))
    }

    fn parse_select_unit(&mut self) -> HogQLResult<Expr> {
        if self.consume_token(&Token::LParen) {
            let inner = self.parse_select_set()?;
            self.expect_token(&Token::RParen)?;
            return Ok(inner);
        }
        let start = self.start();
        let query = self.parse_select_query()?;
        Ok(Expr::select(query).with_span(self.span_from(start)))
    }

    fn parse_select_query(&mut self) -> HogQLResult<SelectQuery> {
        let mut query = SelectQuery::default();
        if self.consume_keyword("WITH") {
            query.ctes = Some(self.parse_ctes()?);
        }
        self.expect_keyword("SELECT")?;
        query.distinct = self.consume_keyword("DISTINCT");
        query.select = self.parse_column_list()?;

        if self.consume_keyword("FROM") {
            query.select_from = Some(Box::new(self.parse_join_chain()?));
        }
        if self.consume_keywords(&["LEFT", "ARRAY", "JOIN"]) {
            query.array_join_op = Some("LEFT ARRAY JOIN".to_string());
            query.array_join_list = Some(self.parse_column_list()?);
        } else if self.consume_keywords(&["ARRAY", "JOIN"]) {
            query.array_join_op = Some("ARRAY JOIN".to_string());
            query.array_join_list = Some(self.parse_column_list()?);
        }
        if self.consume_keyword("PREWHERE") {
            query.prewhere = Some(self.parse_expr()?);
        }
        if self.consume_keyword("WHERE") {
            query.where_clause = Some(self.parse_expr()?);
        }
        if self.consume_keywords(&["GROUP", "BY"]) {
            query.group_by = Some(self.parse_expr_list()?);
        }
        if self.consume_keyword("HAVING") {
            query.having = Some(self.parse_expr()?);
        }
        if self.consume_keyword("WINDOW") {
            let mut windows = IndexMap::new();
            loop {
                let name = self.parse_identifier()?;
                self.expect_keyword("AS")?;
                windows.insert(name, self.parse_window_spec()?);
                if !self.consume_token(&Token::Comma) {
                    break;
                }
            }
            query.window_exprs = Some(windows);
        }
        if self.consume_keywords(&["ORDER", "BY"]) {
            query.order_by = Some(self.parse_order_list()?);
        }
        while self.consume_keyword("LIMIT") {
            self.parse_limit(&mut query)?;
        }
        if self.consume_keyword("OFFSET") {
            query.offset = Some(self.parse_expr()?);
            self.consume_keyword("ROWS");
        }
        if self.consume_keyword("SETTINGS") {
            query.settings = Some(self.parse_settings()?);
        }
        Ok(query)
    }

    /// Everything after a `LIMIT` keyword.
    fn parse_limit(&mut self, query: &mut SelectQuery) -> HogQLResult<()> {
        let mut n = self.parse_expr()?;
        let mut offset = None;
        if self.consume_token(&Token::Comma) {
            offset = Some(n);
            n = self.parse_expr()?;
        } else if self.consume_keyword("OFFSET") {
            offset = Some(self.parse_expr()?);
        }
        if self.consume_keyword("BY") {
            query.limit_by = Some(LimitBy {
                n,
                offset,
                exprs: self.parse_expr_list()?
            });
            return Ok(());
        }
        if self.consume_keywords(&["WITH", "TIES"]) {
            query.limit_with_ties = true;
        }
        query.limit = Some(n);
        if offset.is_some() {
            query.offset = offset;
        }
        Ok(())
    }

    fn parse_settings(&mut self) -> HogQLResult<IndexMap<String, crate::ast::ConstantValue>> {
        let mut settings = IndexMap::new();
        loop {
            let start = self.start();
            let key = self.parse_identifier()?;
            self.expect_token(&Token::Eq)?;
            let value = self.parse_expr()?;
            let Some(value) = value.as_constant().cloned() else {
                return Err(syntax_error(
                    format!("Setting {} must be a constant", key),
                    self.span_from(start)
                ));
            };
            settings.insert(key, value);
            if !self.consume_token(&Token::Comma) {
                return Ok(settings);
            }
        }
    }

    fn parse_ctes(&mut self) -> HogQLResult<IndexMap<String, Cte>> {
        let mut ctes = IndexMap::new();
        loop {
            let start = self.start();
            let is_subquery = self.peek_identifier().is_some()
                && self.is_keyword_at(1, "AS")
                && matches!(self.peek_nth(2).token, Token::LParen);
            let cte = if is_subquery {
                let name = self.parse_identifier()?;
                self.expect_keyword("AS")?;
                self.expect_token(&Token::LParen)?;
                let expr = self.parse_select_set()?;
                self.expect_token(&Token::RParen)?;
                Cte {
                    name,
                    expr,
                    cte_type: CteType::Subquery
                }
            } else {
                let expr = self.parse_expr()?;
                self.expect_keyword("AS")?;
                Cte {
                    name: self.parse_identifier()?,
                    expr,
                    cte_type: CteType::Column
                }
            };
            if ctes.contains_key(&cte.name) {
                return Err(syntax_error(
                    format!("Duplicate CTE name: {}", cte.name),
                    self.span_from(start)
                ));
            }
            ctes.insert(cte.name.clone(), cte);
            if !self.consume_token(&Token::Comma) {
                return Ok(ctes);
            }
        }
    }

    /// Number of join keywords ahead if they end in `JOIN`.
    fn join_keywords_ahead(&self) -> Option<usize> {
        let mut n = 0;
        while JOIN_WORDS.iter().any(|w| self.is_keyword_at(n, w)) {
            n += 1;
        }
        self.is_keyword_at(n, "JOIN").then_some(n + 1)
    }

    fn parse_join_chain(&mut self) -> HogQLResult<JoinExpr> {
        let mut first = self.parse_table_expr()?;
        loop {
            let join_type = if self.consume_token(&Token::Comma) {
                "CROSS JOIN".to_string()
            } else if let Some(count) = self.join_keywords_ahead() {
                let mut words = Vec::with_capacity(count);
                for _ in 0..count {
                    if let Some(word) = self.advance().keyword() {
                        words.push(word);
                    }
                }
                words.join(" ")
            } else {
                return Ok(first);
            };
            let mut join = self.parse_table_expr()?;
            join.join_type = Some(join_type);
            if self.consume_keyword("ON") {
                join.constraint = Some(JoinConstraint::on(self.parse_expr()?));
            } else if self.consume_keyword("USING") {
                let exprs = self.parse_expr_list()?;
                let expr = if exprs.len() == 1 {
                    exprs.into_iter().next().unwrap_or_else(Expr::null)
                } else {
                    Expr::tuple(exprs)
                };
                join.constraint = Some(JoinConstraint {
                    expr,
                    constraint_type: ConstraintType::Using
                });
            }
            first.append(join);
        }
    }

    /// `table [[AS] alias] [FINAL] [SAMPLE ratio [OFFSET ratio]]`
    fn parse_table_expr(&mut self) -> HogQLResult<JoinExpr> {
        let start = self.start();
        let table = self.parse_primary_table()?.with_span(self.span_from(start));
        let alias = if self.consume_keyword("AS") || self.at_implicit_alias() {
            Some(self.parse_identifier()?)
        } else {
            None
        };
        let mut join = JoinExpr::table(table, alias);
        join.table_final = self.consume_keyword("FINAL");
        if self.consume_keyword("SAMPLE") {
            let sample_value = self.parse_ratio()?;
            let offset_value = if self.consume_keyword("OFFSET") {
                Some(self.parse_ratio()?)
            } else {
                None
            };
            join.sample = Some(SampleExpr {
                sample_value,
                offset_value
            });
        }
        Ok(join)
    }

    fn parse_primary_table(&mut self) -> HogQLResult<Expr> {
        match self.peek_token() {
            Token::LParen => {
                self.advance();
                let query = self.parse_select_set()?;
                self.expect_token(&Token::RParen)?;
                Ok(query)
            }
            Token::Word(_) | Token::LBrace | Token::Placeholder(_) => self.parse_expr(),
            _ => Err(self.unexpected("expected table"))
        }
    }

    fn parse_ratio_number(&mut self) -> HogQLResult<f64> {
        let lexeme = self.advance();
        match &lexeme.token {
            Token::Number(text, _) => text
                .parse::<f64>()
                .map_err(|_| syntax_error(format!("Invalid sample ratio: {}", text), Some(lexeme.span))),
            _ => Err(syntax_error("Expected a number in SAMPLE", Some(lexeme.span)))
        }
    }

    fn parse_ratio(&mut self) -> HogQLResult<RatioExpr> {
        let numerator = self.parse_ratio_number()?;
        let denominator = if self.consume_token(&Token::Div) {
            Some(self.parse_ratio_number()?)
        } else {
            None
        };
        Ok(RatioExpr {
            numerator,
            denominator
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{ast::ExprKind, parser::parse_select};

    #[test]
    fn test_comma_join_becomes_cross_join() {
        let expr = parse_select("SELECT 1 FROM a, b").expect("parse");
        let query = expr.as_select().expect("select");
        let from = query.select_from.as_deref().expect("from");
        let next = from.next_join.as_deref().expect("join");
        assert_eq!(next.join_type.as_deref(), Some("CROSS JOIN"));
    }

    #[test]
    fn test_limit_comma_form() {
        let expr = parse_select("SELECT 1 FROM a LIMIT 5, 10").expect("parse");
        let query = expr.as_select().expect("select");
        assert_eq!(query.limit, Some(crate::ast::Expr::constant(10i64)));
        assert_eq!(query.offset, Some(crate::ast::Expr::constant(5i64)));
    }

    #[test]
    fn test_union_all() {
        let expr = parse_select("SELECT 1 UNION ALL SELECT 2").expect("parse");
        assert!(matches!(expr.kind, ExprKind::SelectSetQuery(_)));
    }
}
