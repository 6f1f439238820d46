use hogql_compiler::{
    Dialect,
    printer::escape::{escape_identifier, escape_string, unescape_identifier, unescape_string}
};
use proptest::prelude::*;

#[test]
fn test_postgres_quotes_mixed_case() {
    assert_eq!(escape_identifier("Events", Dialect::Postgres).unwrap(), "\"Events\"");
    assert_eq!(escape_identifier("events", Dialect::Postgres).unwrap(), "events");
}

#[test]
fn test_clickhouse_string_escapes() {
    assert_eq!(escape_string("a'b\\c", Dialect::ClickHouse).unwrap(), "'a\\'b\\\\c'");
}

proptest! {
    #[test]
    fn identifier_escaping_reverses(name in "[^%]{0,24}") {
        for dialect in [Dialect::ClickHouse, Dialect::HogQL] {
            let escaped = escape_identifier(&name, dialect).unwrap();
            prop_assert_eq!(unescape_identifier(&escaped, dialect), Some(name.clone()));
        }
    }

    #[test]
    fn string_escaping_reverses(value in "\\PC{0,24}") {
        let escaped = escape_string(&value, Dialect::HogQL).unwrap();
        prop_assert_eq!(unescape_string(&escaped, Dialect::HogQL), Some(value.clone()));
        let escaped = escape_string(&value, Dialect::Postgres).unwrap();
        prop_assert_eq!(unescape_string(&escaped, Dialect::Postgres), Some(value));
    }

    #[test]
    fn percent_never_reaches_clickhouse(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}") {
        let text = format!("{}%{}", prefix, suffix);
        prop_assert!(escape_identifier(&text, Dialect::ClickHouse).is_err());
        prop_assert!(escape_string(&text, Dialect::ClickHouse).is_err());
    }
}
