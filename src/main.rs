use std::{
    fs::read_to_string,
    io::{self, Read},
    process
};

use clap::Parser;
use hogql_compiler::{
    CompileOptions, compile_many,
    cli::{Cli, Commands, Format, split_queries},
    config::Config,
    error::{AppResult, config_error, file_read_error},
    output::{OutputFormat, OutputOptions, format_results}
};
use tracing_subscriber::{EnvFilter, fmt};

fn init_tracing() {
    let filter = EnvFilter::try_from_env("HOGQL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run() -> AppResult<i32> {
    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Print {
            query,
            file,
            dialect,
            team_id,
            output_format,
            pretty,
            verbose,
            no_color
        } => {
            let input = match (query, file) {
                (Some(query), _) => query,
                (None, Some(path)) if path.to_str() == Some("-") => {
                    let mut buffer = String::new();
                    io::stdin()
                        .read_to_string(&mut buffer)
                        .map_err(|e| file_read_error("stdin", e))?;
                    buffer
                }
                (None, Some(path)) => {
                    read_to_string(&path).map_err(|e| file_read_error(&path.display().to_string(), e))?
                }
                (None, None) => return Err(config_error("Either --query or --file is required"))
            };

            if let Some(team_id) = team_id {
                config.compiler.team_id = team_id;
            }
            let options = CompileOptions {
                dialect:  dialect.unwrap_or(config.compiler.dialect),
                settings: config.query_settings(),
                pretty:   pretty || config.compiler.pretty
            };

            let queries = split_queries(&input);
            if queries.is_empty() {
                return Err(config_error("No queries to compile"));
            }
            tracing::debug!(count = queries.len(), dialect = %options.dialect, "compiling");

            let ctx = config.context();
            let results = compile_many(&queries, &ctx, &options);

            let output_opts = OutputOptions {
                format: match output_format {
                    Format::Text => OutputFormat::Text,
                    Format::Json => OutputFormat::Json,
                    Format::Yaml => OutputFormat::Yaml
                },
                colored: !no_color,
                verbose
            };
            print!("{}", format_results(&queries, &results, &output_opts));

            // Exit code 2 when any query failed to compile
            Ok(if results.iter().any(Result::is_err) { 2 } else { 0 })
        }
    }
}
