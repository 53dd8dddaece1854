use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inspection tool for ndstore database files (opens read-only)
#[derive(Parser, Debug)]
#[command(name = "ndstore", version, about = "ndstore database inspector")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Header, size and write generation
    Status {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Check block tiling and free-list links of every data chunk
    Doctor {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Free blocks per non-empty size class
    FreeLists {
        #[arg(long)]
        path: PathBuf,
        /// Only classes of at least this many bytes
        #[arg(long, default_value_t = 0)]
        min_size: usize,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// CRC32 of every chunk
    Checksums {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
