use clap::Parser;
use hogql_compiler::{
    Dialect,
    cli::{Cli, Commands, Format, split_queries}
};

#[test]
fn test_split_keeps_quoted_semicolons() {
    let input = "SELECT 'a;b' FROM events;\nSELECT `x;y` FROM events; SELECT \"q;\"";
    assert_eq!(split_queries(input), vec![
        "SELECT 'a;b' FROM events",
        "SELECT `x;y` FROM events",
        "SELECT \"q;\"",
    ]);
}

#[test]
fn test_split_handles_escaped_quotes() {
    assert_eq!(split_queries(r"SELECT 'it\'s;'; SELECT 2"), vec![r"SELECT 'it\'s;'", "SELECT 2"]);
}

#[test]
fn test_print_defaults() {
    let cli = Cli::parse_from(["hogql", "print", "-q", "SELECT 1"]);
    let Commands::Print {
        dialect,
        output_format,
        pretty,
        verbose,
        no_color,
        ..
    } = cli.command;
    assert_eq!(dialect, None);
    assert!(matches!(output_format, Format::Text));
    assert!(!pretty && !verbose && !no_color);
}

#[test]
fn test_print_all_flags() {
    let cli = Cli::parse_from([
        "hogql", "print", "--file", "q.hogql", "-d", "hogql", "-t", "42", "-f", "json", "--pretty", "-v",
        "--no-color",
    ]);
    let Commands::Print {
        query,
        file,
        dialect,
        team_id,
        output_format,
        pretty,
        verbose,
        no_color
    } = cli.command;
    assert!(query.is_none());
    assert_eq!(file.as_deref().and_then(|p| p.to_str()), Some("q.hogql"));
    assert_eq!(dialect, Some(Dialect::HogQL));
    assert_eq!(team_id, Some(42));
    assert!(matches!(output_format, Format::Json));
    assert!(pretty && verbose && no_color);
}

#[test]
fn test_query_and_file_conflict() {
    let result = Cli::try_parse_from(["hogql", "print", "-q", "SELECT 1", "--file", "q.hogql"]);
    assert!(result.is_err());
}

#[test]
fn test_query_or_file_required() {
    assert!(Cli::try_parse_from(["hogql", "print"]).is_err());
}
