//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Browse, index, search, and download from HTTP autoindex mirrors.
#[derive(Parser, Debug)]
#[command(name = "mirador")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List a remote directory
    Ls {
        /// Directory path relative to the configured base URL
        #[arg(default_value = "")]
        path: String,

        /// Print entry names only
        #[arg(long)]
        name_only: bool,

        /// Show at most this many entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Crawl the remote tree into the local search index
    Index {
        /// Crawl only this collection
        #[arg(short = 'C', long)]
        collection: Option<String>,

        /// Re-fetch every directory regardless of freshness
        #[arg(short, long)]
        force: bool,

        /// Collections crawled in parallel (1-16)
        #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(1..=16))]
        workers: u8,
    },

    /// Full-text search over the local index
    Search {
        /// Search terms
        query: String,

        /// Restrict to collections whose name contains this text
        #[arg(short = 'C', long)]
        collection: Option<String>,

        /// Maximum number of results (1-1000)
        #[arg(short = 'n', long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..=1000))]
        limit: u32,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Search and rank by region and language preferences
    Find {
        /// Search terms
        query: String,

        /// Rank a remote directory listing instead of the local index
        #[arg(short = 'p', long)]
        search_path: Option<String>,

        /// Restrict index lookups to collections containing this text
        #[arg(short = 'C', long)]
        collection: Option<String>,

        /// Preferred release region, e.g. "USA" or "Europe"
        #[arg(short = 'r', long)]
        prefer_region: Option<String>,

        /// Preferred languages in priority order (names, codes, or
        /// comma-separated lists)
        #[arg(short = 'l', long)]
        prefer_language: Vec<String>,

        /// Require the full query phrase to appear in the name
        #[arg(short, long)]
        exact: bool,

        /// Maximum number of results (1-1000)
        #[arg(short = 'n', long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..=1000))]
        limit: u32,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Download file URLs, or the best matches for a query
    Download {
        /// Absolute file URLs, or search terms when none parse as URLs
        #[arg(required = true)]
        targets: Vec<String>,

        /// Output directory (defaults to the configured download dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Resolve queries against this remote directory instead of the
        /// local index
        #[arg(short = 'p', long)]
        search_path: Option<String>,

        /// Preferred release region for query resolution
        #[arg(short = 'r', long)]
        prefer_region: Option<String>,

        /// Preferred languages in priority order for query resolution
        #[arg(short = 'l', long)]
        prefer_language: Vec<String>,

        /// Require the full query phrase to appear in the name
        #[arg(short, long)]
        exact: bool,

        /// Keep demo/kiosk/beta releases in query matches
        #[arg(long)]
        include_nonretail: bool,

        /// Download every match instead of only the best one
        #[arg(short, long)]
        all: bool,

        /// Cap on query matches considered (1-100)
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..=100))]
        match_limit: u32,

        /// Show what would be downloaded without transferring anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show index statistics
    Stats {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}
