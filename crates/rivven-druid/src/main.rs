//! rivven-druid - read a Druid datasource as JSON lines
//!
//! # Usage
//!
//! ```bash
//! # Stream every record of the configured range to stdout
//! rivven-druid -c druid.yaml
//!
//! # Show the discovered result schema
//! rivven-druid -c druid.yaml schema
//!
//! # Print the generated query
//! rivven-druid -c druid.yaml query
//!
//! # Print the JSON schema of the configuration file
//! rivven-druid config-schema
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rivven_druid::config::DruidSourceConfig;
use rivven_druid::http::DruidHttpConnectionFactory;
use rivven_druid::query::QueryBuilder;
use rivven_druid::RecordCursor;

#[derive(Parser)]
#[command(name = "rivven-druid")]
#[command(version, about = "Read Apache Druid datasources as JSON lines")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "druid.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream records to stdout (default)
    Run {
        /// Stop after this many records
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Show the result schema
    Schema,
    /// Print the generated query
    Query,
    /// Print the JSON schema of the configuration
    ConfigSchema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Commands that don't need config
    if let Some(Commands::ConfigSchema) = cli.command {
        let schema = schemars::schema_for!(DruidSourceConfig);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let config = DruidSourceConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Commands::Run { limit: None }) {
        Commands::Run { limit } => run(config, limit).await,
        Commands::Schema => show_schema(config).await,
        Commands::Query => {
            println!("{}", QueryBuilder::new(&config).build()?);
            Ok(())
        }
        Commands::ConfigSchema => Ok(()),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Records go to stdout, logs to stderr
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn run(config: DruidSourceConfig, limit: Option<u64>) -> Result<()> {
    let datasource = config.datasource.clone();
    let mut cursor = RecordCursor::new(config, Arc::new(DruidHttpConnectionFactory::new()))
        .await
        .context("Failed to prepare Druid source")?;

    let started = Instant::now();
    cursor.open().await.context("Failed to open Druid query")?;

    let mut out = std::io::BufWriter::new(std::io::stdout());
    let result = write_records(&mut cursor, &mut out, limit).await;
    cursor.close().await;
    let count = result?;

    info!(
        datasource = %datasource,
        records = count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Finished reading Druid datasource"
    );
    Ok(())
}

/// Write records as JSON lines, returning how many were written
async fn write_records<W: Write>(
    cursor: &mut RecordCursor,
    out: &mut W,
    limit: Option<u64>,
) -> Result<u64> {
    let mut count = 0u64;

    while limit.map_or(true, |l| count < l) {
        let Some(record) = cursor.next_record().await? else {
            break;
        };
        serde_json::to_writer(&mut *out, &record.to_json())?;
        out.write_all(b"\n")?;
        count += 1;
    }

    out.flush()?;
    Ok(count)
}

async fn show_schema(config: DruidSourceConfig) -> Result<()> {
    let cursor = RecordCursor::new(config, Arc::new(DruidHttpConnectionFactory::new()))
        .await
        .context("Failed to discover Druid schema")?;

    println!("Transport: {}", cursor.transport());
    println!("Query: {}", cursor.query());
    println!();
    println!("{:<32} {:<12} SQL TYPE", "FIELD", "TYPE");
    for field in cursor.schema().fields() {
        println!("{:<32} {:<12} {}", field.name, field.data_type, field.sql_type);
    }
    Ok(())
}
