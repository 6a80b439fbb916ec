use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stowlog", about = "Inspect and decode stowlog archives", version)]
pub struct Cli {
    /// Diagnostic level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the log files of an archive directory
    List {
        /// Archive directory
        dir: PathBuf,
    },
    /// Decode every record of a single log file
    Decode {
        /// Log file
        file: PathBuf,
        /// Properties resource holding AES_KEY and IV
        #[arg(long)]
        params: PathBuf,
    },
    /// Select records by type and time range across an archive
    Select {
        /// Archive directory
        dir: PathBuf,
        /// Properties resource holding AES_KEY and IV
        #[arg(long)]
        params: PathBuf,
        /// Record types to keep (comma separated); all when omitted
        #[arg(long, value_delimiter = ',')]
        types: Vec<i32>,
        /// Inclusive start: epoch milliseconds or RFC 3339
        #[arg(long, conflicts_with = "days")]
        begin: Option<String>,
        /// Inclusive end: epoch milliseconds or RFC 3339
        #[arg(long, conflicts_with = "days")]
        end: Option<String>,
        /// Select the last N days up to now
        #[arg(long)]
        days: Option<u32>,
        /// Write output here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}
