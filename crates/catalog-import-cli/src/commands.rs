use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "catalog-import")]
#[command(about = "Dependency-ordered, resumable catalog import from SQL dumps", long_about = None)]
pub struct Cli {
    /// Run against an in-memory store instead of the database
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Split the dump into per-table INSERT files
    Extract,
    /// Wipe the catalog, then extract, filter and load every table in dependency order
    OrderedImport {
        /// Load parent tables only; products are left for resume-import
        #[arg(long)]
        skip_products: bool,
        /// Do not ask before wiping existing catalog data
        #[arg(short, long)]
        yes: bool,
    },
    /// Import product batches, continuing after the last checkpoint
    ResumeImport {
        /// First batch to import (0-based)
        #[arg(long)]
        start: Option<usize>,
        /// Last batch to import (0-based, inclusive)
        #[arg(long)]
        end: Option<usize>,
        /// Write batch files and the manifest, then stop
        #[arg(long)]
        prepare_only: bool,
    },
    /// Print row counts for every catalog table
    Status,
    /// Run a migration script
    Migrate {
        /// Script to run instead of the configured migration file
        file: Option<PathBuf>,
    },
    /// Restore a plain SQL backup
    Restore {
        /// Backup file name in the backup directory, or a path
        file: String,
    },
    /// Replace all products with generated demo products
    DemoImport {
        /// Number of products to generate
        #[arg(long)]
        count: Option<usize>,
    },
    /// Print configuration values
    PrintConfig,
}
