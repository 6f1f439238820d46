use sqlparser::tokenizer::Token;

use super::Parser;
use crate::{
    ast::{
        ArithmeticOp, Call, ChainItem, CompareOp, ConstantValue, Expr, ExprKind, FrameBound,
        FrameMethod, Order, OrderExpr, WindowExpr, WindowFrameExpr, WindowFunction
    },
    error::{HogQLResult, syntax_error}
};

const INTERVAL_UNITS: &[(&str, &str)] = &[
    ("SECOND", "toIntervalSecond"),
    ("MINUTE", "toIntervalMinute"),
    ("HOUR", "toIntervalHour"),
    ("DAY", "toIntervalDay"),
    ("WEEK", "toIntervalWeek"),
    ("MONTH", "toIntervalMonth"),
    ("QUARTER", "toIntervalQuarter"),
    ("YEAR", "toIntervalYear")
];

fn interval_function(unit: &str) -> Option<&'static str> {
    let unit = unit.to_ascii_uppercase();
    let unit = unit.strip_suffix('S').unwrap_or(&unit);
    INTERVAL_UNITS.iter().find(|(u, _)| *u == unit).map(|(_, f)| *f)
}

/// Conversion function for a `CAST(x AS type)` target.
fn cast_function(type_name: &str) -> Option<&'static str> {
    let lower = type_name.to_ascii_lowercase();
    Some(match lower.as_str() {
        "string" | "text" | "varchar" => "toString",
        "int" | "integer" | "bigint" | "int8" | "int16" | "int32" | "int64" | "uint8" | "uint16"
        | "uint32" | "uint64" => "toInt",
        "float" | "float32" | "float64" | "double" | "real" => "toFloat",
        "date" => "toDate",
        "datetime" | "timestamp" | "datetime64" => "toDateTime",
        "uuid" => "toUUID",
        "bool" | "boolean" => "toBool",
        _ => return None
    })
}

fn parse_number(text: &str) -> Option<ConstantValue> {
    if !text.contains(['.', 'e', 'E'])
        && let Ok(i) = text.parse::<i64>()
    {
        return Some(ConstantValue::Integer(i));
    }
    text.parse::<f64>().ok().map(ConstantValue::Float)
}

impl Parser<'_> {
    /// Expression with an optional `[AS] alias`.
    pub(crate) fn parse_column_expr(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        let expr = self.parse_expr()?;
        let alias = if self.consume_keyword("AS") {
            Some(self.parse_identifier()?)
        } else if self.at_implicit_alias() {
            Some(self.parse_identifier()?)
        } else {
            None
        };
        Ok(match alias {
            Some(alias) => Expr::alias(alias, expr).with_span(self.span_from(start)),
            None => expr
        })
    }

    pub(crate) fn parse_expr_list(&mut self) -> HogQLResult<Vec<Expr>> {
        let mut exprs = vec![self.parse_expr()?];
        while self.consume_token(&Token::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    pub(crate) fn parse_column_list(&mut self) -> HogQLResult<Vec<Expr>> {
        let mut exprs = vec![self.parse_column_expr()?];
        while self.consume_token(&Token::Comma) {
            exprs.push(self.parse_column_expr()?);
        }
        Ok(exprs)
    }

    /// Lambda arguments if the cursor is at `x ->` or `(x, y) ->`.
    fn lambda_args_ahead(&self) -> Option<usize> {
        if self.peek_identifier().is_some() && matches!(self.peek_nth(1).token, Token::Arrow) {
            return Some(1);
        }
        if !matches!(self.peek_token(), Token::LParen) {
            return None;
        }
        let mut n = 1;
        loop {
            if !matches!(self.peek_nth(n).token, Token::Word(_)) {
                return None;
            }
            match self.peek_nth(n + 1).token {
                Token::Comma => n += 2,
                Token::RParen if matches!(self.peek_nth(n + 2).token, Token::Arrow) => return Some(n + 2),
                _ => return None
            }
        }
    }

    pub(crate) fn parse_expr(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        if let Some(count) = self.lambda_args_ahead() {
            let mut args = Vec::new();
            for _ in 0..count {
                if let Some(name) = self.peek_identifier() {
                    args.push(name);
                }
                self.advance();
            }
            self.expect_token(&Token::Arrow)?;
            let body = self.parse_expr()?;
            return Ok(Expr::new(ExprKind::Lambda {
                args,
                body: Box::new(body)
            })
            .with_span(self.span_from(start)));
        }
        self.parse_or()
    }

    fn parse_or(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        let first = self.parse_and()?;
        let mut parts = vec![first];
        while self.consume_keyword("OR") {
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::or(parts).with_span(self.span_from(start))
        })
    }

    fn parse_and(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        let first = self.parse_not()?;
        let mut parts = vec![first];
        while self.consume_keyword("AND") {
            parts.push(self.parse_not()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::and(parts).with_span(self.span_from(start))
        })
    }

    fn parse_not(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        if self.is_keyword("NOT") && !self.is_keyword_at(1, "IN") {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::not(inner).with_span(self.span_from(start)));
        }
        self.parse_comparison()
    }

    fn compare_operator(&mut self) -> Option<CompareOp> {
        let op = match self.peek_token() {
            Token::Eq | Token::DoubleEq => match self.peek_nth(1).token {
                Token::Tilde => {
                    self.advance();
                    CompareOp::Regex
                }
                Token::TildeAsterisk => {
                    self.advance();
                    CompareOp::IRegex
                }
                _ => CompareOp::Eq
            },
            Token::Neq => CompareOp::NotEq,
            Token::Lt => CompareOp::Lt,
            Token::LtEq => CompareOp::LtEq,
            Token::Gt => CompareOp::Gt,
            Token::GtEq => CompareOp::GtEq,
            Token::Tilde => CompareOp::Regex,
            Token::TildeAsterisk => CompareOp::IRegex,
            Token::ExclamationMarkTilde => CompareOp::NotRegex,
            Token::ExclamationMarkTildeAsterisk => CompareOp::NotIRegex,
            _ => {
                let keyword_ops: &[(&[&str], CompareOp)] = &[
                    (&["LIKE"], CompareOp::Like),
                    (&["ILIKE"], CompareOp::ILike),
                    (&["NOT", "LIKE"], CompareOp::NotLike),
                    (&["NOT", "ILIKE"], CompareOp::NotILike),
                    (&["IN", "COHORT"], CompareOp::InCohort),
                    (&["NOT", "IN", "COHORT"], CompareOp::NotInCohort),
                    (&["IN"], CompareOp::In),
                    (&["NOT", "IN"], CompareOp::NotIn),
                    (&["GLOBAL", "IN"], CompareOp::GlobalIn),
                    (&["GLOBAL", "NOT", "IN"], CompareOp::GlobalNotIn)
                ];
                for (keywords, op) in keyword_ops {
                    if self.consume_keywords(keywords) {
                        return Some(*op);
                    }
                }
                return None;
            }
        };
        self.advance();
        Some(op)
    }

    fn parse_comparison(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        let left = self.parse_additive()?;

        if self.is_keyword("IS") {
            self.advance();
            let op = if self.consume_keyword("NOT") {
                CompareOp::NotEq
            } else {
                CompareOp::Eq
            };
            self.expect_keyword("NULL")?;
            return Ok(Expr::compare(op, left, Expr::null()).with_span(self.span_from(start)));
        }

        let negated_between = self.is_keyword("NOT") && self.is_keyword_at(1, "BETWEEN");
        if negated_between || self.is_keyword("BETWEEN") {
            if negated_between {
                self.advance();
            }
            self.advance();
            let low = self.parse_additive()?;
            self.expect_keyword("AND")?;
            let high = self.parse_additive()?;
            return Ok(Expr::new(ExprKind::Between {
                expr:    Box::new(left),
                low:     Box::new(low),
                high:    Box::new(high),
                negated: negated_between
            })
            .with_span(self.span_from(start)));
        }

        match self.compare_operator() {
            Some(op) => {
                let right = self.parse_additive()?;
                Ok(Expr::compare(op, left, right).with_span(self.span_from(start)))
            }
            None => Ok(left)
        }
    }

    fn parse_additive(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_token() {
                Token::Plus => Some(ArithmeticOp::Add),
                Token::Minus => Some(ArithmeticOp::Sub),
                Token::StringConcat => None,
                _ => break
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = match op {
                Some(op) => Expr::arithmetic(op, left, right),
                None => match left.kind {
                    ExprKind::Call(mut call) if call.name == "concat" => {
                        call.args.push(right);
                        Expr::new(ExprKind::Call(call))
                    }
                    kind => Expr::call("concat", vec![Expr::new(kind), right])
                }
            }
            .with_span(self.span_from(start));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_token() {
                Token::Mul => ArithmeticOp::Mult,
                Token::Div => ArithmeticOp::Div,
                Token::Mod => ArithmeticOp::Mod,
                _ => break
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::arithmetic(op, left, right).with_span(self.span_from(start));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        if self.consume_token(&Token::Minus) {
            if let Token::Number(text, _) = self.peek_token().clone() {
                self.advance();
                let value = match parse_number(&text) {
                    Some(ConstantValue::Integer(i)) => ConstantValue::Integer(-i),
                    Some(ConstantValue::Float(f)) => ConstantValue::Float(-f),
                    _ => return Err(syntax_error(format!("Invalid number: {}", text), self.span_from(start)))
                };
                let expr = Expr::constant(value).with_span(self.span_from(start));
                return self.parse_postfix(expr, start);
            }
            let inner = self.parse_unary()?;
            return Ok(Expr::call("negate", vec![inner]).with_span(self.span_from(start)));
        }
        if self.consume_token(&Token::Plus) {
            return self.parse_unary();
        }
        let primary = self.parse_primary()?;
        self.parse_postfix(primary, start)
    }

    fn parse_postfix(&mut self, mut expr: Expr, start: usize) -> HogQLResult<Expr> {
        loop {
            match self.peek_token().clone() {
                Token::LBracket => {
                    self.advance();
                    let property = self.parse_expr()?;
                    self.expect_token(&Token::RBracket)?;
                    expr = Expr::new(ExprKind::ArrayAccess {
                        array:    Box::new(expr),
                        property: Box::new(property),
                        nullish:  false
                    });
                }
                Token::Number(text, _) if text.starts_with('.') => {
                    self.advance();
                    let index = text[1..]
                        .parse::<i64>()
                        .map_err(|_| syntax_error(format!("Invalid tuple index: {}", text), self.span_from(start)))?;
                    expr = Expr::new(ExprKind::TupleAccess {
                        tuple: Box::new(expr),
                        index,
                        nullish: false
                    });
                }
                Token::Period => {
                    self.advance();
                    if let Token::Number(text, _) = self.peek_token().clone() {
                        self.advance();
                        let index = text
                            .parse::<i64>()
                            .map_err(|_| syntax_error(format!("Invalid tuple index: {}", text), self.span_from(start)))?;
                        expr = Expr::new(ExprKind::TupleAccess {
                            tuple: Box::new(expr),
                            index,
                            nullish: false
                        });
                    } else {
                        let name = self.parse_identifier()?;
                        expr = match expr.kind {
                            ExprKind::Field {
                                mut chain
                            } => {
                                chain.push(ChainItem::Name(name));
                                Expr::field_chain(chain)
                            }
                            kind => Expr::new(ExprKind::ArrayAccess {
                                array:    Box::new(Expr::new(kind)),
                                property: Box::new(Expr::constant(name)),
                                nullish:  false
                            })
                        };
                    }
                }
                Token::DoubleColon => {
                    self.advance();
                    let type_name = self.parse_identifier()?;
                    let function = cast_function(&type_name)
                        .ok_or_else(|| syntax_error(format!("Unsupported type: {}", type_name), self.span_from(start)))?;
                    expr = Expr::call(function, vec![expr]);
                }
                _ => return Ok(expr)
            }
            expr = expr.with_span(self.span_from(start));
        }
    }

    fn parse_primary(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        let lexeme = self.peek().clone();
        let expr = match &lexeme.token {
            Token::Number(text, _) => {
                self.advance();
                let value = parse_number(text)
                    .ok_or_else(|| syntax_error(format!("Invalid number: {}", text), Some(lexeme.span)))?;
                Expr::constant(value)
            }
            Token::SingleQuotedString(s) => {
                self.advance();
                Expr::constant(s.clone())
            }
            Token::LParen => self.parse_parenthesized()?,
            Token::LBracket => {
                self.advance();
                let items = if matches!(self.peek_token(), Token::RBracket) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.expect_token(&Token::RBracket)?;
                Expr::array(items)
            }
            Token::LBrace => {
                self.advance();
                let mut chain = smallvec::smallvec![ChainItem::Name(self.parse_identifier()?)];
                while self.consume_token(&Token::Period) {
                    chain.push(ChainItem::Name(self.parse_identifier()?));
                }
                self.expect_token(&Token::RBrace)?;
                Expr::new(ExprKind::Placeholder {
                    chain
                })
            }
            Token::Mul => {
                self.advance();
                Expr::field(&["*"])
            }
            Token::Word(word) if word.quote_style.is_none() => {
                match word.value.to_ascii_uppercase().as_str() {
                    "TRUE" => {
                        self.advance();
                        Expr::boolean(true)
                    }
                    "FALSE" => {
                        self.advance();
                        Expr::boolean(false)
                    }
                    "NULL" => {
                        self.advance();
                        Expr::null()
                    }
                    "CASE" => self.parse_case()?,
                    "INTERVAL" if !matches!(self.peek_nth(1).token, Token::LParen | Token::Comma) => {
                        self.parse_interval()?
                    }
                    "CAST" if matches!(self.peek_nth(1).token, Token::LParen) => self.parse_cast()?,
                    "DATE" | "TIMESTAMP"
                        if matches!(self.peek_nth(1).token, Token::SingleQuotedString(_)) =>
                    {
                        let function = if word.value.eq_ignore_ascii_case("DATE") {
                            "toDate"
                        } else {
                            "toDateTime"
                        };
                        self.advance();
                        let value = self.parse_primary()?;
                        Expr::call(function, vec![value])
                    }
                    _ => self.parse_identifier_expr()?
                }
            }
            Token::Word(_) | Token::Placeholder(_) => self.parse_identifier_expr()?,
            _ => return Err(self.unexpected("expected expression"))
        };
        Ok(expr.with_span(self.span_from(start)))
    }

    fn parse_parenthesized(&mut self) -> HogQLResult<Expr> {
        self.expect_token(&Token::LParen)?;
        if self.is_keyword("SELECT") || self.is_keyword("WITH") {
            let query = self.parse_select_set()?;
            self.expect_token(&Token::RParen)?;
            return Ok(query);
        }
        if self.consume_token(&Token::RParen) {
            return Ok(Expr::tuple(Vec::new()));
        }
        let first = self.parse_column_expr()?;
        if self.consume_token(&Token::RParen) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.consume_token(&Token::Comma) {
            if matches!(self.peek_token(), Token::RParen) {
                break;
            }
            items.push(self.parse_column_expr()?);
        }
        self.expect_token(&Token::RParen)?;
        Ok(Expr::tuple(items))
    }

    fn parse_case(&mut self) -> HogQLResult<Expr> {
        self.expect_keyword("CASE")?;
        let base = if self.is_keyword("WHEN") {
            None
        } else {
            Some(self.parse_expr()?)
        };
        let mut conditions = Vec::new();
        let mut results = Vec::new();
        while self.consume_keyword("WHEN") {
            conditions.push(self.parse_expr()?);
            self.expect_keyword("THEN")?;
            results.push(self.parse_expr()?);
        }
        if conditions.is_empty() {
            return Err(self.unexpected("expected WHEN"));
        }
        let otherwise = if self.consume_keyword("ELSE") {
            self.parse_expr()?
        } else {
            Expr::null()
        };
        self.expect_keyword("END")?;
        Ok(match base {
            Some(base) => Expr::call("transform", vec![
                base,
                Expr::array(conditions),
                Expr::array(results),
                otherwise,
            ]),
            None => {
                let mut args = Vec::with_capacity(conditions.len() * 2 + 1);
                for (condition, result) in conditions.into_iter().zip(results) {
                    args.push(condition);
                    args.push(result);
                }
                args.push(otherwise);
                Expr::call("multiIf", args)
            }
        })
    }

    fn parse_interval(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        self.expect_keyword("INTERVAL")?;
        if let Token::SingleQuotedString(text) = self.peek_token().clone() {
            self.advance();
            let mut parts = text.split_whitespace();
            let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(syntax_error(format!("Invalid interval: '{}'", text), self.span_from(start)));
            };
            let function = interval_function(unit)
                .ok_or_else(|| syntax_error(format!("Unsupported interval unit: {}", unit), self.span_from(start)))?;
            let amount = parse_number(amount)
                .ok_or_else(|| syntax_error(format!("Invalid interval: '{}'", text), self.span_from(start)))?;
            return Ok(Expr::call(function, vec![Expr::constant(amount)]));
        }
        let amount = self.parse_unary()?;
        let unit = self.parse_identifier()?;
        let function = interval_function(&unit)
            .ok_or_else(|| syntax_error(format!("Unsupported interval unit: {}", unit), self.span_from(start)))?;
        Ok(Expr::call(function, vec![amount]))
    }

    fn parse_cast(&mut self) -> HogQLResult<Expr> {
        let start = self.start();
        self.expect_keyword("CAST")?;
        self.expect_token(&Token::LParen)?;
        let expr = self.parse_expr()?;
        let type_name = if self.consume_keyword("AS") {
            self.parse_identifier()?
        } else {
            self.expect_token(&Token::Comma)?;
            match self.advance().token {
                Token::SingleQuotedString(s) => s,
                _ => return Err(syntax_error("Expected type name", self.span_from(start)))
            }
        };
        self.expect_token(&Token::RParen)?;
        let function = cast_function(&type_name)
            .ok_or_else(|| syntax_error(format!("Unsupported type: {}", type_name), self.span_from(start)))?;
        Ok(Expr::call(function, vec![expr]))
    }

    /// Field chain, `table.*`, or a function call.
    fn parse_identifier_expr(&mut self) -> HogQLResult<Expr> {
        let name = self.parse_identifier()?;
        if matches!(self.peek_token(), Token::LParen) {
            return self.parse_call(name);
        }
        let mut chain = smallvec::smallvec![ChainItem::Name(name)];
        while matches!(self.peek_token(), Token::Period) {
            match &self.peek_nth(1).token {
                Token::Mul => {
                    self.advance();
                    self.advance();
                    chain.push(ChainItem::Name("*".to_string()));
                    break;
                }
                Token::Word(_) | Token::Placeholder(_) => {
                    self.advance();
                    chain.push(ChainItem::Name(self.parse_identifier()?));
                }
                _ => break
            }
        }
        Ok(Expr::field_chain(chain))
    }

    fn parse_call_args(&mut self) -> HogQLResult<(Vec<Expr>, bool)> {
        self.expect_token(&Token::LParen)?;
        if self.consume_token(&Token::RParen) {
            return Ok((Vec::new(), false));
        }
        let distinct = self.consume_keyword("DISTINCT");
        if matches!(self.peek_token(), Token::Mul) && matches!(self.peek_nth(1).token, Token::RParen) {
            self.advance();
            self.advance();
            return Ok((Vec::new(), distinct));
        }
        let args = self.parse_expr_list()?;
        self.expect_token(&Token::RParen)?;
        Ok((args, distinct))
    }

    fn parse_call(&mut self, name: String) -> HogQLResult<Expr> {
        let (mut args, mut distinct) = self.parse_call_args()?;
        let mut params = None;
        if matches!(self.peek_token(), Token::LParen) {
            let (inner_args, inner_distinct) = self.parse_call_args()?;
            params = Some(args);
            args = inner_args;
            distinct = inner_distinct;
        }
        if self.consume_keyword("OVER") {
            let (over_expr, over_identifier) = if matches!(self.peek_token(), Token::LParen) {
                (Some(self.parse_window_spec()?), None)
            } else {
                (None, Some(self.parse_identifier()?))
            };
            return Ok(Expr::new(ExprKind::WindowFunction(WindowFunction {
                name,
                args,
                params,
                over_expr,
                over_identifier
            })));
        }
        Ok(Expr::new(ExprKind::Call(Call {
            name,
            args,
            params,
            distinct
        })))
    }

    pub(crate) fn parse_order_item(&mut self) -> HogQLResult<OrderExpr> {
        let expr = self.parse_column_expr()?;
        let order = if self.consume_keyword("DESC") || self.consume_keyword("DESCENDING") {
            Order::Desc
        } else {
            self.consume_keyword("ASC");
            self.consume_keyword("ASCENDING");
            Order::Asc
        };
        if self.consume_keyword("NULLS") && !(self.consume_keyword("FIRST") || self.consume_keyword("LAST")) {
            return Err(self.unexpected("expected FIRST or LAST"));
        }
        Ok(OrderExpr {
            expr,
            order
        })
    }

    pub(crate) fn parse_order_list(&mut self) -> HogQLResult<Vec<OrderExpr>> {
        let mut items = vec![self.parse_order_item()?];
        while self.consume_token(&Token::Comma) {
            items.push(self.parse_order_item()?);
        }
        Ok(items)
    }

    fn parse_frame_bound(&mut self) -> HogQLResult<WindowFrameExpr> {
        if self.consume_keywords(&["CURRENT", "ROW"]) {
            return Ok(WindowFrameExpr {
                frame_type:  FrameBound::CurrentRow,
                frame_value: None
            });
        }
        let frame_value = if self.consume_keyword("UNBOUNDED") {
            None
        } else {
            match self.advance().token {
                Token::Number(text, _) => Some(
                    text.parse::<i64>()
                        .map_err(|_| syntax_error(format!("Invalid frame offset: {}", text), None))?
                ),
                _ => return Err(self.unexpected("expected frame bound"))
            }
        };
        let frame_type = if self.consume_keyword("PRECEDING") {
            FrameBound::Preceding
        } else if self.consume_keyword("FOLLOWING") {
            FrameBound::Following
        } else {
            return Err(self.unexpected("expected PRECEDING or FOLLOWING"));
        };
        Ok(WindowFrameExpr {
            frame_type,
            frame_value
        })
    }

    /// `( [PARTITION BY ...] [ORDER BY ...] [ROWS|RANGE ...] )`
    pub(crate) fn parse_window_spec(&mut self) -> HogQLResult<WindowExpr> {
        self.expect_token(&Token::LParen)?;
        let mut window = WindowExpr::default();
        if self.consume_keywords(&["PARTITION", "BY"]) {
            window.partition_by = Some(self.parse_expr_list()?);
        }
        if self.consume_keywords(&["ORDER", "BY"]) {
            window.order_by = Some(self.parse_order_list()?);
        }
        let method = if self.consume_keyword("ROWS") {
            Some(FrameMethod::Rows)
        } else if self.consume_keyword("RANGE") {
            Some(FrameMethod::Range)
        } else {
            None
        };
        if method.is_some() {
            window.frame_method = method;
            if self.consume_keyword("BETWEEN") {
                window.frame_start = Some(self.parse_frame_bound()?);
                self.expect_keyword("AND")?;
                window.frame_end = Some(self.parse_frame_bound()?);
            } else {
                window.frame_start = Some(self.parse_frame_bound()?);
            }
        }
        self.expect_token(&Token::RParen)?;
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::parse_expr, visitor::clear_spans};

    fn parse(text: &str) -> Expr {
        let mut expr = parse_expr(text, None).expect("parse");
        clear_spans(&mut expr);
        expr
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            parse("1 + 2 * 3"),
            Expr::arithmetic(
                ArithmeticOp::Add,
                Expr::constant(1i64),
                Expr::arithmetic(ArithmeticOp::Mult, Expr::constant(2i64), Expr::constant(3i64))
            )
        );
    }

    #[test]
    fn test_interval_and_cast() {
        assert_eq!(parse("INTERVAL 7 DAY"), Expr::call("toIntervalDay", vec![Expr::constant(7i64)]));
        assert_eq!(parse("CAST(a AS String)"), Expr::call("toString", vec![Expr::field(&["a"])]));
    }

    #[test]
    fn test_case_becomes_multi_if() {
        assert_eq!(
            parse("CASE WHEN a THEN 1 ELSE 2 END"),
            Expr::call("multiIf", vec![Expr::field(&["a"]), Expr::constant(1i64), Expr::constant(2i64)])
        );
    }

    #[test]
    fn test_is_not_null() {
        assert_eq!(
            parse("a IS NOT NULL"),
            Expr::compare(CompareOp::NotEq, Expr::field(&["a"]), Expr::null())
        );
    }

    #[test]
    fn test_negative_numbers() {
        assert_eq!(parse("-5"), Expr::constant(-5i64));
    }
}
