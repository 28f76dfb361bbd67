//! `bulk-modifier` command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bulk_modifier::commands::{run_create, run_update, run_upload, CreateOptions, UpdateOptions};
use bulk_modifier::config::{load_dotenv, Config};
use bulk_modifier::{AppError, RunContext};

#[derive(Debug, Parser)]
#[command(name = "bulk-modifier", version, about = "Generate and modify Salesforce records in bulk")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the queries in QUERIES, rewrite the results and upsert them back.
    Update(UpdateArgs),
    /// Generate new records with Mockaroo and upsert them.
    Create(CreateArgs),
    /// Upsert an existing CSV file.
    Upload(UploadArgs),
}

#[derive(Debug, Args)]
struct UpdateArgs {
    /// Write the modified files without sending them to Salesforce.
    #[arg(long)]
    query_only: bool,
}

#[derive(Debug, Args)]
struct CreateArgs {
    /// Object to create records for.
    #[arg(long)]
    obj: String,

    /// Number of records to generate.
    #[arg(long, default_value_t = 10)]
    count: usize,

    /// Relate every lookup to existing records, not only the owner.
    #[arg(long)]
    references: bool,

    /// Generate and merge the data without sending it to Salesforce.
    #[arg(long)]
    fetch_only: bool,

    /// Object referenced by WhoId when creating tasks or events (User, Contact, Lead).
    #[arg(long)]
    who: Option<String>,

    /// Object referenced by WhatId when creating tasks or events.
    #[arg(long)]
    what: Option<String>,

    /// Generate person accounts instead of business accounts.
    #[arg(long)]
    person_accounts: bool,
}

#[derive(Debug, Args)]
struct UploadArgs {
    /// Object the file is upserted into.
    #[arg(long)]
    obj: String,

    /// CSV file with an Id column.
    #[arg(long)]
    file: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(execute(cli.command, config)).map_err(|e| {
        let presentation = e.to_presentation();
        match presentation.action {
            Some(action) => anyhow!("{}: {}\n{}", presentation.title, presentation.message, action),
            None => anyhow!("{}: {}", presentation.title, presentation.message),
        }
    })
}

async fn execute(command: Command, config: Config) -> Result<(), AppError> {
    let ctx = RunContext::connect(config).await?;

    match command {
        Command::Update(args) => {
            let options = UpdateOptions {
                query_only: args.query_only,
            };
            let outcomes = run_update(Arc::new(ctx), options).await?;
            for outcome in outcomes {
                info!(
                    "{}: {} rows, {} columns modified, written to {}",
                    outcome.object,
                    outcome.rows,
                    outcome.modify.modified.len(),
                    outcome.modified_file.display()
                );
            }
        }
        Command::Create(args) => {
            let options = CreateOptions {
                object: args.obj,
                count: args.count,
                references: args.references,
                fetch_only: args.fetch_only,
                who: args.who,
                what: args.what,
                person_accounts: args.person_accounts,
            };
            let outcome = run_create(&ctx, &options).await?;
            info!(
                "{}: {} records in {}",
                outcome.object,
                outcome.records,
                outcome.data_file.display()
            );
        }
        Command::Upload(args) => {
            let report = run_upload(&ctx, &args.obj, &args.file).await?;
            info!(
                "{}: {} processed, {} failed",
                report.object, report.records_processed, report.records_failed
            );
        }
    }

    Ok(())
}
