use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "post-image-cache",
    version,
    about = "Two-tier (memory + disk) image cache for remote URLs",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Network timeout in seconds.
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Fetch every request independently, even for the same URL.
    #[arg(long, global = true)]
    pub no_coalesce: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load images through the cache and report where each came from.
    Get {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Number of times to request each URL.
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
    /// Print the disk key and file path for a URL.
    Key {
        /// Image URL.
        url: String,
    },
    /// Recover the URL from a disk key.
    DecodeKey {
        /// Disk key (cache file name).
        key: String,
    },
}
