//! objsync CLI
//!
//! Command-line tools for restoring file snapshots into a store.
//!
//! # Commands
//!
//! - `restore` - Synchronize a repository directory into a store file
//! - `plan-delete` - Show the instructions needed to remove one object
//! - `hashes` - List or forget recorded fragment hashes

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// objsync command-line tools.
#[derive(Parser)]
#[command(name = "objsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the schema file (JSON list of type definitions)
    #[arg(global = true, short, long)]
    schema: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize a repository directory into a store file
    Restore {
        /// Repository root directory
        #[arg(short, long)]
        repo: PathBuf,

        /// Store snapshot file, created if missing
        #[arg(long)]
        store: PathBuf,

        /// Hash table file (defaults to `<store>.hashes.json`)
        #[arg(long)]
        hashes: Option<PathBuf>,

        /// Restore only these types
        #[arg(short = 't', long = "type")]
        types: Vec<String>,

        /// Never synchronize these types
        #[arg(long)]
        exclude: Vec<String>,

        /// Keep store objects that are absent from the repository
        #[arg(long)]
        no_delete: bool,

        /// Never commit records with unresolved optional references
        #[arg(long)]
        strict: bool,

        /// Upper bound on retry passes
        #[arg(long)]
        max_passes: Option<usize>,

        /// Show changes without saving the store
        #[arg(short, long)]
        dry_run: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the instructions needed to remove one object
    PlanDelete {
        /// Store snapshot file
        #[arg(long)]
        store: PathBuf,

        /// Object type
        #[arg(short = 't', long = "type")]
        object_type: String,

        /// Code name of the object
        #[arg(short, long)]
        code: String,

        /// Delete every dependent regardless of integrity
        #[arg(short, long)]
        all: bool,
    },

    /// List or forget recorded fragment hashes
    Hashes {
        /// Hash table file
        #[arg(long)]
        hashes: PathBuf,

        /// Limit to these types
        #[arg(short = 't', long = "type")]
        types: Vec<String>,

        /// Forget the listed entries so the next restore re-reads them
        #[arg(long)]
        forget: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Restore {
            repo,
            store,
            hashes,
            types,
            exclude,
            no_delete,
            strict,
            max_passes,
            dry_run,
            format,
        } => {
            let schema = cli.schema.ok_or("Schema file required for restore")?;
            let hashes = hashes.unwrap_or_else(|| store.with_extension("hashes.json"));
            let options = commands::restore::RestoreOptions {
                types,
                exclude,
                delete_missing: !no_delete,
                allow_partial_acceptance: !strict,
                max_passes,
                dry_run,
            };
            commands::restore::run(&repo, &schema, &store, &hashes, &options, &format)?;
        }
        Commands::PlanDelete {
            store,
            object_type,
            code,
            all,
        } => {
            let schema = cli.schema.ok_or("Schema file required for plan-delete")?;
            commands::plan_delete::run(&schema, &store, &object_type, &code, all)?;
        }
        Commands::Hashes {
            hashes,
            types,
            forget,
        } => {
            let schema = cli.schema.ok_or("Schema file required for hashes")?;
            commands::hashes::run(&schema, &hashes, &types, forget)?;
        }
        Commands::Version => {
            println!("objsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
