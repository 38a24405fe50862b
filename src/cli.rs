//! Shared CLI definitions for the connekt client and connektd daemon

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// connektd - serve a storage directory over the Connekt protocol
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
pub struct DaemonOpts {
    /// Config file (default: ~/.config/connekt/connekt.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address (host:port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Storage root to serve; created if missing
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Maximum connections handled at once
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Append an event journal to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// connekt - upload, download and list files on a connektd server
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
pub struct ClientOpts {
    /// Config file (default: ~/.config/connekt/connekt.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Server as host[:port] or connekt://host[:port]
    #[arg(short, long, global = true)]
    pub server: Option<String>,

    /// Chunk size in bytes
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// Upload a local file into the server's storage root
    Upload { path: PathBuf },
    /// Download a file from the server's storage root
    Download {
        name: String,
        /// Local directory to save into (created if missing)
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// List the files in the server's storage root
    List,
    /// Check that the server is reachable
    Ping,
}
