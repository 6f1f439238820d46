//! Identifier and literal escaping.
//!
//! Identifiers matching [`SIMPLE_IDENTIFIER`] print bare. Everything else is
//! quoted, with the characters of [`ESCAPES`] and the quote itself
//! backslash-escaped. [`unescape_identifier`] reverses the quoting.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

use super::Dialect;
use crate::error::{HogQLResult, query_error};

static SIMPLE_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("valid regex"));

/// Postgres folds unquoted names to lower case and reserves a leading `$`.
static SIMPLE_POSTGRES_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid regex"));

const ESCAPES: &[(char, &str)] = &[
    ('\u{8}', "\\b"),
    ('\u{c}', "\\f"),
    ('\r', "\\r"),
    ('\n', "\\n"),
    ('\t', "\\t"),
    ('\0', "\\0"),
    ('\u{7}', "\\a"),
    ('\u{b}', "\\v"),
    ('\\', "\\\\")
];

fn escape_with_quote(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        if c == quote {
            out.push('\\');
            out.push(c);
        } else if let Some((_, escaped)) = ESCAPES.iter().find(|(raw, _)| *raw == c) {
            out.push_str(escaped);
        } else {
            out.push(c);
        }
    }
    out.push(quote);
    out
}

fn unescape_with_quote(text: &str, quote: char) -> Option<String> {
    let inner = text.strip_prefix(quote)?.strip_suffix(quote)?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let next = chars.next()?;
        let raw = match next {
            'b' => '\u{8}',
            'f' => '\u{c}',
            'r' => '\r',
            'n' => '\n',
            't' => '\t',
            '0' => '\0',
            'a' => '\u{7}',
            'v' => '\u{b}',
            other => other
        };
        out.push(raw);
    }
    Some(out)
}

/// Identifier as written in `dialect`.
///
/// ClickHouse identifiers must not contain `%`, since the driver formats
/// parameters with `%(name)s` placeholders.
pub fn escape_identifier(name: &str, dialect: Dialect) -> HogQLResult<String> {
    match dialect {
        Dialect::ClickHouse if name.contains('%') => Err(query_error(format!(
            "The identifier \"{}\" is not permitted as it contains the \"%\" character",
            name
        ))),
        Dialect::ClickHouse | Dialect::HogQL => {
            if SIMPLE_IDENTIFIER.is_match(name) {
                Ok(name.to_string())
            } else {
                Ok(escape_with_quote(name, '`'))
            }
        }
        Dialect::Postgres => {
            if SIMPLE_POSTGRES_IDENTIFIER.is_match(name) {
                Ok(name.to_string())
            } else {
                Ok(format!("\"{}\"", name.replace('"', "\"\"")))
            }
        }
    }
}

/// Inverse of [`escape_identifier`].
pub fn unescape_identifier(text: &str, dialect: Dialect) -> Option<String> {
    match dialect {
        Dialect::ClickHouse | Dialect::HogQL => {
            if text.starts_with('`') {
                unescape_with_quote(text, '`')
            } else {
                Some(text.to_string())
            }
        }
        Dialect::Postgres => match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            Some(inner) => Some(inner.replace("\"\"", "\"")),
            None => Some(text.to_string())
        }
    }
}

/// Single-quoted string literal.
pub fn escape_string(value: &str, dialect: Dialect) -> HogQLResult<String> {
    match dialect {
        Dialect::ClickHouse if value.contains('%') => Err(query_error(format!(
            "The string '{}' can not be inlined as it contains the \"%\" character",
            value
        ))),
        Dialect::ClickHouse | Dialect::HogQL => Ok(escape_with_quote(value, '\'')),
        Dialect::Postgres => Ok(format!("'{}'", value.replace('\'', "''")))
    }
}

/// Inverse of [`escape_string`].
pub fn unescape_string(text: &str, dialect: Dialect) -> Option<String> {
    match dialect {
        Dialect::ClickHouse | Dialect::HogQL => unescape_with_quote(text, '\''),
        Dialect::Postgres => text
            .strip_prefix('\'')
            .and_then(|t| t.strip_suffix('\''))
            .map(|inner| inner.replace("''", "'"))
    }
}

pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{:?}", value)
    }
}

pub fn format_date(value: &NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_identifiers_print_bare() {
        assert_eq!(escape_identifier("events", Dialect::ClickHouse).unwrap(), "events");
        assert_eq!(escape_identifier("$browser", Dialect::HogQL).unwrap(), "$browser");
        assert_eq!(escape_identifier("1st", Dialect::HogQL).unwrap(), "`1st`");
        assert_eq!(escape_identifier("with space", Dialect::ClickHouse).unwrap(), "`with space`");
    }

    #[test]
    fn test_quote_and_control_characters() {
        assert_eq!(escape_identifier("a`b", Dialect::HogQL).unwrap(), "`a\\`b`");
        assert_eq!(escape_string("it's\n", Dialect::HogQL).unwrap(), "'it\\'s\\n'");
        assert_eq!(escape_string("it's", Dialect::Postgres).unwrap(), "'it''s'");
        assert_eq!(escape_identifier("$session_id", Dialect::Postgres).unwrap(), "\"$session_id\"");
    }

    #[test]
    fn test_percent_is_rejected_in_clickhouse() {
        assert!(escape_identifier("a%b", Dialect::ClickHouse).is_err());
        assert!(escape_string("100%", Dialect::ClickHouse).is_err());
        assert_eq!(escape_identifier("a%b", Dialect::HogQL).unwrap(), "`a%b`");
    }

    #[test]
    fn test_unescape_reverses_escape() {
        let original = "weird `name`\t\\";
        let escaped = escape_identifier(original, Dialect::ClickHouse).unwrap();
        assert_eq!(unescape_identifier(&escaped, Dialect::ClickHouse).as_deref(), Some(original));
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(f64::NAN), "nan");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }
}
