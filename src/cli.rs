use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::report::TimeRange;

#[derive(Parser, Debug)]
#[command(
    name = "chat-token-monitor",
    version,
    about = "Estimate token usage of chat conversations and keep running totals"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Watch a rendered conversation document and update statistics on change.
    Watch {
        #[arg(value_name = "DOCUMENT", help = "Rendered document JSON (defaults to document.path)")]
        document: Option<PathBuf>,
    },
    /// Scan a rendered document once and merge it into the statistics.
    Scan {
        #[arg(value_name = "DOCUMENT", help = "Rendered document JSON (defaults to document.path)")]
        document: Option<PathBuf>,
    },
    /// Print today's tokens, stored sessions and storage use.
    Status {
        /// Also verify that stored totals match the per-session records.
        #[arg(long)]
        check: bool,
    },
    /// Print the statistics report for a time range.
    Report {
        #[arg(long, value_enum, default_value_t = TimeRange::All)]
        range: TimeRange,
    },
    /// Write every stored key to a dated JSON file.
    Export {
        #[arg(long, value_name = "DIR", help = "Target directory (defaults to the current one)")]
        out: Option<PathBuf>,
    },
    /// Erase all statistics and reseed an empty store.
    Clear {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}
