use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::printer::Dialect;

/// HogQL compiler - translate HogQL queries into ClickHouse or Postgres SQL
#[derive(Parser, Debug)]
#[command(name = "hogql")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile queries and print the generated SQL
    Print {
        /// Query text; several queries may be separated by `;`
        #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
        query: Option<String>,

        /// Path to a file with queries (use - for stdin)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Output SQL dialect
        #[arg(short, long, value_enum)]
        dialect: Option<Dialect>,

        /// Team every table is restricted to
        #[arg(short, long, env = "HOGQL_TEAM_ID")]
        team_id: Option<i64>,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "text")]
        output_format: Format,

        /// Indent nested queries
        #[arg(long)]
        pretty: bool,

        /// Print pass timings
        #[arg(short, long)]
        verbose: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Format {
    Text,
    Json,
    Yaml
}

/// Split input into queries on top-level `;`, keeping semicolons inside
/// string literals and quoted identifiers.
pub fn split_queries(input: &str) -> Vec<&str> {
    let mut queries = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, ';') => {
                queries.push(&input[start..i]);
                start = i + 1;
            }
            (None, _) => {}
        }
    }
    queries.push(&input[start..]);
    queries.into_iter().map(str::trim).filter(|q| !q.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_queries() {
        assert_eq!(split_queries("SELECT 1; SELECT 2;"), vec!["SELECT 1", "SELECT 2"]);
        assert_eq!(split_queries("SELECT ';' ; SELECT `a;b`"), vec!["SELECT ';'", "SELECT `a;b`"]);
        assert!(split_queries(" ; ").is_empty());
    }

    #[test]
    fn test_cli_parses_print() {
        let cli = Cli::parse_from(["hogql", "print", "-q", "SELECT 1", "--dialect", "postgres"]);
        let Commands::Print {
            query,
            dialect,
            ..
        } = cli.command;
        assert_eq!(query.as_deref(), Some("SELECT 1"));
        assert_eq!(dialect, Some(Dialect::Postgres));
    }
}
