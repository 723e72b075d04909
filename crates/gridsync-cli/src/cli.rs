use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use gridsync_core::models::PhotoType;
use gridsync_core::{EntityType, Operation, ResolutionStrategy};

#[derive(Parser)]
#[command(name = "gridsync")]
#[command(about = "Operate the offline mutation queue from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a local mutation for replay
    Enqueue {
        /// Entity kind (ticket, time_entry, expense, assessment)
        entity_type: EntityType,
        /// Identifier of the entity being changed
        entity_id: String,
        /// Mutation kind
        #[arg(long, default_value = "update")]
        operation: Operation,
        /// JSON payload (`-` reads stdin)
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue photos for upload
    Photo {
        #[command(subcommand)]
        command: PhotoCommands,
    },
    /// List items still waiting on the remote
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queue counts and sync totals
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one sync pass against the remote API
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Put a failed queue item back in line
    Retry {
        /// Queue item ID or unique ID prefix
        id: String,
    },
    /// Inspect and settle sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: Option<ConflictCommands>,
    },
    /// Keep syncing on an interval until interrupted
    Watch {
        /// Seconds between refresh ticks (defaults to settings)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum PhotoCommands {
    /// Queue an image file for upload
    Add {
        /// Entity kind the photo documents
        parent_type: EntityType,
        /// Identifier of the documented entity
        parent_id: String,
        /// Image file to queue
        path: PathBuf,
        /// Photo category (overview, equipment, damage, safety, context)
        #[arg(long, default_value = "context")]
        photo_type: PhotoType,
        /// Override MIME type detection
        #[arg(long, value_name = "TYPE")]
        mime_type: Option<String>,
        /// Capture latitude in degrees
        #[arg(long, value_name = "DEG", allow_negative_numbers = true, requires = "longitude")]
        latitude: Option<f64>,
        /// Capture longitude in degrees
        #[arg(long, value_name = "DEG", allow_negative_numbers = true, requires = "latitude")]
        longitude: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List conflicts (unresolved by default)
    List {
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a queue item to conflicts by hand
    Escalate {
        /// Queue item ID or unique ID prefix
        id: String,
    },
    /// Settle a conflict
    Resolve {
        /// Conflict ID or unique ID prefix
        id: String,
        /// keep_local, keep_remote or merge
        strategy: ResolutionStrategy,
        /// Merged JSON payload (`-` reads stdin)
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
