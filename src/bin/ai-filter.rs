//! ai-filter CLI - Filter tables with natural language
//!
//! Translates a query into column filters with an LLM provider, optionally
//! applying them to a JSON file of rows.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use table_ai_filter::{
    AiFilter, ColumnMetadata, MemoryTable, ParseOptions, ParseResult, ProviderOptions, Row,
    available_providers, build_prompt, create_provider, infer_columns, parse_natural_language,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ai-filter")]
#[command(author = "epiphytic")]
#[command(version)]
#[command(about = "Turn natural language queries into table filters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a query into filter conditions
    Parse {
        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        table: TableArgs,

        #[command(flatten)]
        provider: ProviderArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Translate a query and print the matching rows
    Filter {
        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        table: TableArgs,

        #[command(flatten)]
        provider: ProviderArgs,

        /// Do not fall back to a plain text search when translation fails
        #[arg(long)]
        no_fallback: bool,
    },

    /// Print the prompt that would be sent to the model
    Prompt {
        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        table: TableArgs,
    },

    /// List registered providers and whether they are configured
    Providers,
}

#[derive(Args)]
struct QueryArgs {
    /// Query text (reads from stdin if not provided)
    #[arg(short, long)]
    query: Option<String>,
}

#[derive(Args)]
struct TableArgs {
    /// JSON file holding column metadata
    #[arg(short, long)]
    columns: Option<PathBuf>,

    /// JSON file holding an array of row objects (columns are inferred when --columns is absent)
    #[arg(short, long)]
    data: Option<PathBuf>,
}

#[derive(Args)]
struct ProviderArgs {
    /// Provider name (openai, claude, ...)
    #[arg(short, long, env = "AI_FILTER_PROVIDER")]
    provider: Option<String>,

    /// Model override
    #[arg(short, long)]
    model: Option<String>,

    /// API key (defaults to the provider's environment variable)
    #[arg(long)]
    api_key: Option<String>,

    /// Endpoint override
    #[arg(long)]
    endpoint: Option<String>,

    /// Try keyword rules before calling the model
    #[arg(long)]
    rules_first: bool,
}

impl ProviderArgs {
    fn into_options(self) -> ParseOptions {
        ParseOptions {
            provider: self.provider,
            api_key: self.api_key,
            endpoint: self.endpoint,
            model: self.model,
            rules_first: self.rules_first,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Plain text output
    Text,
    /// The raw parse result as JSON
    Json,
}

fn read_query(args: QueryArgs) -> Result<String> {
    match args.query {
        Some(text) => Ok(text),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read query from stdin")?;
            Ok(buffer.trim().to_string())
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Load the table described by the arguments
fn load_table(args: &TableArgs) -> Result<MemoryTable> {
    let rows: Vec<Row> = match &args.data {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let columns: Vec<ColumnMetadata> = match &args.columns {
        Some(path) => read_json(path)?,
        None if !rows.is_empty() => infer_columns(&rows),
        None => bail!("Either --columns or --data is required"),
    };
    Ok(MemoryTable::new(columns, rows))
}

fn print_result(result: &ParseResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Text => {
            if result.success {
                for filter in &result.filters {
                    println!("{} {} {}", filter.id, filter.operator, filter.value);
                }
                if let Some(explanation) = &result.explanation {
                    eprintln!();
                    eprintln!("---");
                    eprintln!("{}", explanation);
                }
            } else {
                eprintln!("Error: {}", result.error.as_deref().unwrap_or_default());
            }
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse {
            query,
            table,
            provider,
            format,
        } => {
            let query = read_query(query)?;
            let table = load_table(&table)?;
            let result =
                parse_natural_language(&query, table.columns(), &[], Some(provider.into_options()))
                    .await;
            print_result(&result, format)?;
            if !result.success {
                std::process::exit(1);
            }
        }

        Commands::Filter {
            query,
            table,
            provider,
            no_fallback,
        } => {
            let query = read_query(query)?;
            let session = AiFilter::new(load_table(&table)?)
                .with_options(provider.into_options())
                .global_filter_fallback(!no_fallback);

            let outcome = session.process_query(Some(&query)).await;
            let state = session.state();
            if let Some(error) = &state.error {
                eprintln!("Error: {}", error);
            }
            if let Some(explanation) = &state.explanation {
                eprintln!("{}", explanation);
            }

            if outcome.applied || outcome.cleared || outcome.fallback_applied {
                let rows = session.with_adapter(|table| {
                    table
                        .visible_rows()
                        .into_iter()
                        .cloned()
                        .collect::<Vec<Row>>()
                });
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                std::process::exit(1);
            }
        }

        Commands::Prompt { query, table } => {
            let query = read_query(query)?;
            let table = load_table(&table)?;
            println!("{}", build_prompt(&query, table.columns(), &[]));
        }

        Commands::Providers => {
            for name in available_providers() {
                let (configured, model) = match create_provider(&name, &ProviderOptions::default()) {
                    Ok(provider) => (
                        provider.is_configured(),
                        provider.model().unwrap_or_default().to_string(),
                    ),
                    Err(_) => (false, String::new()),
                };
                let status = if configured { "configured" } else { "not configured" };
                println!("{}\t{}\t{}", name, status, model);
            }
        }
    }

    Ok(())
}
