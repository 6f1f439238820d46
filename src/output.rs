use colored::Colorize;
use serde::Serialize;

use crate::{CompiledQuery, HogQLError, error::format_located};

/// Output format for results
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml
}

/// Output options
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format:  OutputFormat,
    pub colored: bool,
    pub verbose: bool
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format:  OutputFormat::Text,
            colored: true,
            verbose: false
        }
    }
}

/// Compilation outcome of one input query, for serialization
#[derive(Debug, Serialize)]
pub struct QueryReport<'a> {
    pub query:  &'a str,
    #[serde(flatten)]
    pub result: Option<&'a CompiledQuery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:  Option<String>
}

impl<'a> QueryReport<'a> {
    pub fn new(query: &'a str, result: &'a Result<CompiledQuery, HogQLError>) -> Self {
        match result {
            Ok(compiled) => Self {
                query,
                result: Some(compiled),
                error: None
            },
            Err(err) => Self {
                query,
                result: None,
                error: Some(user_message(err))
            }
        }
    }
}

/// Message shown for a failed compilation. Internal errors are not shown
/// verbatim.
pub fn user_message(err: &HogQLError) -> String {
    if err.is_exposed() {
        format_located(err)
    } else {
        tracing::error!(error = %err, "internal HogQL compiler error");
        "Unexpected compiler error".to_string()
    }
}

/// Format compilation results based on output options
pub fn format_results(queries: &[&str], results: &[Result<CompiledQuery, HogQLError>], opts: &OutputOptions) -> String {
    let reports: Vec<QueryReport<'_>> = queries
        .iter()
        .zip(results)
        .map(|(query, result)| QueryReport::new(query, result))
        .collect();
    match opts.format {
        OutputFormat::Json => serde_json::to_string_pretty(&reports).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(&reports).unwrap_or_default(),
        OutputFormat::Text => format_text(&reports, opts)
    }
}

fn format_text(reports: &[QueryReport<'_>], opts: &OutputOptions) -> String {
    let mut output = String::new();
    let many = reports.len() > 1;

    for (i, report) in reports.iter().enumerate() {
        if many {
            let header = format!("-- Query #{}", i + 1);
            if opts.colored {
                output.push_str(&header.cyan().bold().to_string());
            } else {
                output.push_str(&header);
            }
            output.push('\n');
        }

        if let Some(error) = &report.error {
            let line = format!("Error: {}", error);
            if opts.colored {
                output.push_str(&line.red().to_string());
            } else {
                output.push_str(&line);
            }
            output.push('\n');
        }

        let Some(compiled) = report.result else {
            continue;
        };
        output.push_str(&compiled.sql);
        output.push('\n');

        if !compiled.display_values.is_empty() {
            output.push_str("-- values:\n");
            for (key, value) in &compiled.display_values {
                let value = serde_json::to_string(value).unwrap_or_default();
                output.push_str(&format!("--   {} = {}\n", key, value));
            }
        }

        for notice in &compiled.notices {
            let line = format!("-- notice: {}", notice.message);
            if opts.colored {
                output.push_str(&line.yellow().to_string());
            } else {
                output.push_str(&line);
            }
            output.push('\n');
        }

        if opts.verbose && !compiled.timings.is_empty() {
            let timings: Vec<String> = compiled
                .timings
                .iter()
                .map(|(name, seconds)| format!("{}={:.3}ms", name, seconds * 1000.0))
                .collect();
            output.push_str(&format!("-- timings: {}\n", timings.join(", ")));
        }

        if many && i + 1 < reports.len() {
            output.push('\n');
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::{ast::ConstantValue, error::internal_error, error::query_error};

    fn compiled(sql: &str) -> CompiledQuery {
        let mut values = IndexMap::new();
        values.insert("hogql_val_0".to_string(), ConstantValue::String("$pageview".to_string()));
        CompiledQuery {
            sql:            sql.to_string(),
            values:         values.clone(),
            display_values: values,
            notices:        Vec::new(),
            timings:        IndexMap::new()
        }
    }

    fn plain() -> OutputOptions {
        OutputOptions {
            colored: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_text_lists_values() {
        let results = vec![Ok(compiled("SELECT %(hogql_val_0)s"))];
        let text = format_results(&["SELECT '$pageview'"], &results, &plain());
        assert!(text.starts_with("SELECT %(hogql_val_0)s\n"));
        assert!(text.contains("--   hogql_val_0 = \"$pageview\""));
    }

    #[test]
    fn test_json_contains_sql_and_errors() {
        let results = vec![Ok(compiled("SELECT 1")), Err(query_error("Unknown table"))];
        let opts = OutputOptions {
            format: OutputFormat::Json,
            ..plain()
        };
        let json = format_results(&["SELECT 1", "SELECT * FROM nope"], &results, &opts);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["sql"], "SELECT 1");
        assert_eq!(parsed[1]["error"], "Unknown table");
    }

    #[test]
    fn test_internal_errors_are_masked() {
        assert_eq!(user_message(&internal_error("lazy table leaked")), "Unexpected compiler error");
    }
}
