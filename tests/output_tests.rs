use std::sync::Arc;

use hogql_compiler::{
    CompileOptions, Dialect, HogQLContext, HogQLQueryModifiers, compile_many,
    database::Database,
    output::{OutputFormat, OutputOptions, format_results}
};

fn context() -> HogQLContext {
    let database = Database::create_for(Some(1), &HogQLQueryModifiers::default());
    HogQLContext::new(1).with_database(Arc::new(database))
}

fn plain(format: OutputFormat) -> OutputOptions {
    OutputOptions {
        format,
        colored: false,
        verbose: false
    }
}

#[test]
fn test_text_single_query() {
    let queries = ["SELECT event FROM events WHERE event = '$pageview'"];
    let results = compile_many(&queries, &context(), &CompileOptions::default());
    let text = format_results(&queries, &results, &plain(OutputFormat::Text));
    assert!(!text.contains("-- Query #1"));
    assert!(text.starts_with("SELECT events.event AS event FROM events"));
    assert!(text.contains("--   hogql_val_0 = \"$pageview\""));
}

#[test]
fn test_text_several_queries_with_error() {
    let queries = ["SELECT 1", "SELECT nope()"];
    let results = compile_many(&queries, &context(), &CompileOptions::default());
    let text = format_results(&queries, &results, &plain(OutputFormat::Text));
    assert!(text.contains("-- Query #1\nSELECT 1 LIMIT 100\n"));
    assert!(text.contains("-- Query #2\nError: Unsupported function call 'nope(...)'"));
}

#[test]
fn test_verbose_prints_timings() {
    let queries = ["SELECT 1"];
    let results = compile_many(&queries, &context(), &CompileOptions::default());
    let opts = OutputOptions {
        verbose: true,
        ..plain(OutputFormat::Text)
    };
    let text = format_results(&queries, &results, &opts);
    assert!(text.contains("-- timings: parse="));
}

#[test]
fn test_json_report() {
    let queries = ["SELECT 'a'"];
    let options = CompileOptions {
        dialect: Dialect::ClickHouse,
        ..Default::default()
    };
    let results = compile_many(&queries, &context(), &options);
    let json = format_results(&queries, &results, &plain(OutputFormat::Json));
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed[0]["query"], "SELECT 'a'");
    assert_eq!(parsed[0]["sql"], "SELECT %(hogql_val_0)s LIMIT 100");
    assert_eq!(parsed[0]["values"]["hogql_val_0"], "a");
    assert!(parsed[0].get("error").is_none());
    assert!(parsed[0].get("timings").is_none());
}

#[test]
fn test_yaml_report() {
    let queries = ["SELECT 1 FROM nowhere"];
    let results = compile_many(&queries, &context(), &CompileOptions::default());
    let yaml = format_results(&queries, &results, &plain(OutputFormat::Yaml));
    assert!(yaml.contains("query: SELECT 1 FROM nowhere"));
    assert!(yaml.contains("error:"));
}
