// Schemaworks CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: One pool per invocation; files are validated concurrently across it.
// Design Decision: Exit status 1 when any document is invalid, so the CLI can gate CI steps.

mod commands;
mod input;
mod output;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use schemaworks_pool::{PoolConfig, PoolHandle};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "schemaworks")]
#[command(about = "Schemaworks CLI - Validate JSON and YAML documents against JSON schemas")]
#[command(version)]
pub struct Cli {
    /// Number of execution contexts (defaults to available parallelism)
    #[arg(long, env = "SCHEMAWORKS_POOL_SIZE")]
    pub pool_size: Option<usize>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate documents against a schema
    Validate {
        /// Schema file (JSON or YAML)
        #[arg(long, short)]
        schema: String,

        /// Treat each file as an array of items validated in one batch
        #[arg(long)]
        batch: bool,

        /// Documents to validate
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Check that a schema compiles
    Compile {
        /// Schema file (JSON or YAML)
        schema: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schemaworks_pool=info,schemaworks_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let output_format = output::OutputFormat::from_str(&cli.output);

    let mut config = PoolConfig::from_env();
    if let Some(size) = cli.pool_size {
        config = config.with_pool_size(size);
    }
    let handle = PoolHandle::new();
    let pool = handle.get(Some(config));
    info!(pool_size = pool.config().pool_size, "schemaworks starting");

    let result = match cli.command {
        Commands::Validate {
            schema,
            batch,
            files,
        } => commands::validate::run(&pool, output_format, cli.quiet, &schema, &files, batch).await,
        Commands::Compile { schema } => {
            commands::compile::run(&pool, output_format, cli.quiet, &schema).await
        }
    };

    handle.destroy().await;
    info!("Validator pool shut down");

    match result? {
        true => Ok(ExitCode::SUCCESS),
        false => Ok(ExitCode::FAILURE),
    }
}
