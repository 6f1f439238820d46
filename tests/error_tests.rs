use hogql_compiler::{
    HogQLError,
    ast::Span,
    error::{format_located, internal_error, query_error, resolution_error, syntax_error}
};
use masterror::AppError;

#[test]
fn test_exposed_categories() {
    assert!(syntax_error("unexpected token", None).is_exposed());
    assert!(resolution_error("Unable to resolve field: x").is_exposed());
    assert!(query_error("Unknown table").is_exposed());
    assert!(!internal_error("broken invariant").is_exposed());
}

#[test]
fn test_display_prefixes() {
    assert_eq!(syntax_error("bad", None).to_string(), "Syntax error: bad");
    assert_eq!(query_error("bad").to_string(), "bad");
    assert_eq!(internal_error("bad").to_string(), "Internal error: bad");
    assert_eq!(internal_error("bad").message(), "bad");
}

#[test]
fn test_located_message() {
    let err = syntax_error("unexpected `)`", Some(Span {
        start: 7,
        end:   8
    }));
    assert_eq!(format_located(&err), "Syntax error: unexpected `)` (at 7..8)");
    assert_eq!(format_located(&query_error("nope")), "nope");
}

#[test]
fn test_serializes_with_kind_tag() {
    let json = serde_json::to_value(query_error("Unknown table")).unwrap();
    assert_eq!(json["kind"], "query");
    assert_eq!(json["message"], "Unknown table");
}

#[test]
fn test_converts_into_app_error() {
    let _exposed: AppError = query_error("Unknown table").into();
    let internal: HogQLError = internal_error("oops");
    let _internal: AppError = internal.into();
}
