//! HogQL parser.
//!
//! A hand-written recursive descent parser over the token stream produced by
//! [`lexer::tokenize`]. Operators are parsed by precedence climbing in
//! [`expr`], statements in [`select`]. The output is an untyped tree; names
//! are bound later by the resolver.

mod expr;
pub mod lexer;
mod select;

use indexmap::IndexMap;
use sqlparser::tokenizer::Token;

use self::lexer::Lexeme;
use crate::{
    ast::{Expr, OrderExpr, Span},
    error::{HogQLResult, syntax_error},
    transforms::placeholders::replace_placeholders
};

/// Words that end an expression and therefore can not be implicit aliases.
const RESERVED: &[&str] = &[
    "ALL", "AND", "ANTI", "ANY", "ARRAY", "AS", "ASC", "ASOF", "BETWEEN", "BY", "CASE", "CROSS",
    "DESC", "DISTINCT", "ELSE", "END", "EXCEPT", "FINAL", "FROM", "FULL", "GLOBAL", "GROUP",
    "HAVING", "ILIKE", "IN", "INNER", "INTERSECT", "IS", "JOIN", "LEFT", "LIKE", "LIMIT", "NOT",
    "NULLS", "OFFSET", "ON", "OR", "ORDER", "OUTER", "OVER", "PARTITION", "PREWHERE", "RANGE",
    "RIGHT", "ROWS", "SAMPLE", "SELECT", "SEMI", "SETTINGS", "THEN", "UNION", "USING", "WHEN",
    "WHERE", "WINDOW", "WITH"
];

pub(crate) struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Lexeme>,
    pos:    usize
}

impl<'a> Parser<'a> {
    pub(crate) fn new(source: &'a str) -> HogQLResult<Self> {
        Ok(Self {
            source,
            tokens: lexer::tokenize(source)?,
            pos: 0
        })
    }

    fn peek(&self) -> &Lexeme {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Lexeme {
        let index = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn peek_token(&self) -> &Token {
        &self.peek().token
    }

    fn advance(&mut self) -> Lexeme {
        let lexeme = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        lexeme
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_token(), Token::EOF)
    }

    fn start(&self) -> usize {
        self.peek().span.start
    }

    /// Span from `start` to the end of the last consumed token.
    fn span_from(&self, start: usize) -> Option<Span> {
        let end = if self.pos == 0 {
            start
        } else {
            self.tokens[self.pos - 1].span.end
        };
        Some(Span {
            start,
            end: end.max(start)
        })
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        self.peek().is_keyword(keyword)
    }

    fn is_keyword_at(&self, n: usize, keyword: &str) -> bool {
        self.peek_nth(n).is_keyword(keyword)
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume_keywords(&mut self, keywords: &[&str]) -> bool {
        if keywords.iter().enumerate().all(|(i, k)| self.is_keyword_at(i, k)) {
            for _ in keywords {
                self.advance();
            }
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> HogQLResult<()> {
        if self.consume_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", keyword)))
        }
    }

    fn consume_token(&mut self, token: &Token) -> bool {
        if self.peek_token() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_token(&mut self, token: &Token) -> HogQLResult<()> {
        if self.consume_token(token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{}'", token)))
        }
    }

    fn unexpected(&self, context: &str) -> crate::error::HogQLError {
        let lexeme = self.peek();
        let found = if matches!(lexeme.token, Token::EOF) {
            "end of input".to_string()
        } else {
            let span = lexeme.span;
            format!("'{}'", self.source.get(span.start..span.end).unwrap_or_default())
        };
        syntax_error(format!("Unexpected {}, {}", found, context), Some(lexeme.span))
    }

    /// Identifier at the cursor: a bare or quoted word, or a `$name`.
    fn peek_identifier(&self) -> Option<String> {
        match self.peek_token() {
            Token::Word(word) => Some(word.value.clone()),
            Token::Placeholder(name) if name.starts_with('$') && name.len() > 1 => Some(name.clone()),
            _ => None
        }
    }

    fn parse_identifier(&mut self) -> HogQLResult<String> {
        match self.peek_identifier() {
            Some(name) => {
                self.advance();
                Ok(name)
            }
            None => Err(self.unexpected("expected identifier"))
        }
    }

    /// Whether the current word can start an implicit alias.
    fn at_implicit_alias(&self) -> bool {
        match self.peek_token() {
            Token::Word(word) => {
                word.quote_style.is_some() || !RESERVED.contains(&word.value.to_ascii_uppercase().as_str())
            }
            _ => false
        }
    }

    fn expect_end(&mut self) -> HogQLResult<()> {
        while self.consume_token(&Token::SemiColon) {}
        if self.at_eof() {
            Ok(())
        } else {
            Err(self.unexpected("expected end of query"))
        }
    }
}

/// Parse a full SELECT or set query.
pub fn parse_select(text: &str) -> HogQLResult<Expr> {
    let mut parser = Parser::new(text)?;
    if !(parser.is_keyword("SELECT") || parser.is_keyword("WITH") || matches!(parser.peek_token(), Token::LParen)) {
        return Err(syntax_error(
            "Only SELECT queries are supported",
            Some(parser.peek().span)
        ));
    }
    let query = parser.parse_select_set()?;
    parser.expect_end()?;
    tracing::trace!(len = text.len(), "parsed select");
    Ok(query)
}

/// Parse a single expression, substituting `{name}` placeholders.
pub fn parse_expr(text: &str, placeholders: Option<&IndexMap<String, Expr>>) -> HogQLResult<Expr> {
    let mut parser = Parser::new(text)?;
    let expr = parser.parse_column_expr()?;
    parser.expect_end()?;
    match placeholders {
        Some(values) => replace_placeholders(expr, values),
        None => Ok(expr)
    }
}

/// Parse `expr [ASC|DESC]`.
pub fn parse_order_expr(text: &str) -> HogQLResult<OrderExpr> {
    let mut parser = Parser::new(text)?;
    let order = parser.parse_order_item()?;
    parser.expect_end()?;
    Ok(order)
}

/// Parse a SELECT, substituting placeholders.
pub fn parse_select_with_placeholders(
    text: &str,
    placeholders: &IndexMap<String, Expr>
) -> HogQLResult<Expr> {
    replace_placeholders(parse_select(text)?, placeholders)
}
