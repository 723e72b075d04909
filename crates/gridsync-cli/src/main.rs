//! gridsync CLI - operate the offline mutation queue from the terminal
//!
//! Queue mutations and photos, inspect the queue, settle conflicts and run
//! sync passes against the remote API.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConflictCommands, PhotoCommands};
use crate::commands::common::{load_settings, open_store};
use crate::commands::completions::run_completions;
use crate::commands::conflicts::{
    run_conflicts_escalate, run_conflicts_list, run_conflicts_resolve,
};
use crate::commands::enqueue::run_enqueue;
use crate::commands::photo::{run_photo_add, PhotoAddRequest};
use crate::commands::queue::run_queue;
use crate::commands::retry::run_retry;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gridsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let settings = load_settings(cli.config.as_deref(), cli.db_path)?;
    let store = open_store(&settings).await?;

    match cli.command {
        Commands::Enqueue {
            entity_type,
            entity_id,
            operation,
            payload,
            json,
        } => {
            run_enqueue(
                &store,
                entity_type,
                &entity_id,
                operation,
                payload.as_deref(),
                json,
            )
            .await?;
        }
        Commands::Photo {
            command:
                PhotoCommands::Add {
                    parent_type,
                    parent_id,
                    path,
                    photo_type,
                    mime_type,
                    latitude,
                    longitude,
                    json,
                },
        } => {
            let request = PhotoAddRequest {
                parent_type,
                parent_id,
                path,
                photo_type,
                mime_type,
                location: latitude.zip(longitude),
            };
            run_photo_add(&store, &settings, request, json).await?;
        }
        Commands::Queue { json } => run_queue(&store, settings.retry_budget, json).await?,
        Commands::Status { json } => run_status(&store, &settings, json).await?,
        Commands::Sync { json } => run_sync(&store, &settings, json).await?,
        Commands::Retry { id } => run_retry(&store, &settings, &id).await?,
        Commands::Conflicts { command } => match command {
            None => run_conflicts_list(&store, false, false).await?,
            Some(ConflictCommands::List { all, json }) => {
                run_conflicts_list(&store, all, json).await?;
            }
            Some(ConflictCommands::Escalate { id }) => {
                run_conflicts_escalate(&store, &settings, &id).await?;
            }
            Some(ConflictCommands::Resolve {
                id,
                strategy,
                payload,
            }) => run_conflicts_resolve(&store, &id, strategy, payload.as_deref()).await?,
        },
        Commands::Watch { interval } => run_watch(store, &settings, interval).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
