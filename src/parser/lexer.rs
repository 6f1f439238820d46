//! Token stream for the HogQL parser.
//!
//! Tokenization is delegated to `sqlparser` with its ClickHouse dialect;
//! this module only strips whitespace and comments and converts line/column
//! locations into byte offsets.

use sqlparser::{
    dialect::ClickHouseDialect,
    tokenizer::{Location, Token, Tokenizer}
};

use crate::{
    ast::Span,
    error::{HogQLResult, syntax_error}
};

/// A token together with its byte range in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub span:  Span
}

impl Lexeme {
    /// Upper-cased word text for unquoted words.
    pub fn keyword(&self) -> Option<String> {
        match &self.token {
            Token::Word(word) if word.quote_style.is_none() => Some(word.value.to_ascii_uppercase()),
            _ => None
        }
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        match &self.token {
            Token::Word(word) => word.quote_style.is_none() && word.value.eq_ignore_ascii_case(keyword),
            _ => false
        }
    }
}

/// Maps 1-based line/column positions to byte offsets.
struct OffsetMap<'a> {
    source:      &'a str,
    line_starts: Vec<usize>
}

impl<'a> OffsetMap<'a> {
    fn new(source: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            source,
            line_starts
        }
    }

    fn offset(&self, location: Location) -> usize {
        let line = usize::try_from(location.line).unwrap_or(0);
        let column = usize::try_from(location.column).unwrap_or(0);
        let Some(start) = line.checked_sub(1).and_then(|l| self.line_starts.get(l)) else {
            return self.source.len();
        };
        let rest = &self.source[*start..];
        rest.char_indices()
            .nth(column.saturating_sub(1))
            .map(|(i, _)| start + i)
            .unwrap_or(self.source.len())
    }
}

/// Tokenize `source`, dropping whitespace and comments. The result always
/// ends with [`Token::EOF`].
pub fn tokenize(source: &str) -> HogQLResult<Vec<Lexeme>> {
    let dialect = ClickHouseDialect {};
    let tokens = Tokenizer::new(&dialect, source)
        .tokenize_with_location()
        .map_err(|e| syntax_error(e.to_string(), None))?;
    let offsets = OffsetMap::new(source);

    let mut lexemes: Vec<Lexeme> = tokens
        .into_iter()
        .filter(|t| !matches!(t.token, Token::Whitespace(_)))
        .map(|t| Lexeme {
            span:  Span {
                start: offsets.offset(t.span.start),
                end:   offsets.offset(t.span.end)
            },
            token: t.token
        })
        .collect();
    if !matches!(lexemes.last().map(|l| &l.token), Some(Token::EOF)) {
        lexemes.push(Lexeme {
            token: Token::EOF,
            span:  Span {
                start: source.len(),
                end:   source.len()
            }
        });
    }
    Ok(lexemes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_skip_whitespace() {
        let lexemes = tokenize("select  a,\n  b").expect("tokenize");
        let spans: Vec<(usize, usize)> = lexemes.iter().map(|l| (l.span.start, l.span.end)).collect();
        assert_eq!(spans[0], (0, 6));
        assert_eq!(spans[1], (8, 9));
        assert_eq!(spans[3], (13, 14));
        assert!(matches!(lexemes.last().map(|l| &l.token), Some(Token::EOF)));
    }

    #[test]
    fn test_keyword_is_case_insensitive() {
        let lexemes = tokenize("SeLeCt").expect("tokenize");
        assert!(lexemes[0].is_keyword("select"));
        assert_eq!(lexemes[0].keyword().as_deref(), Some("SELECT"));
    }
}
