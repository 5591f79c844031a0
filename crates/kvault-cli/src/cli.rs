use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "kvault",
    about = "Namespaced key-value and content-addressed blob storage on a plain filesystem",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the key-value store directory
    #[arg(long, global = true)]
    pub kv_dir: Option<PathBuf>,

    /// Override the blob store directory
    #[arg(long, global = true)]
    pub blob_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read and write namespaced key-value documents
    #[command(subcommand)]
    Kv(KvCommand),
    /// Store and fetch content-addressed blobs
    #[command(subcommand)]
    Blob(BlobCommand),
    /// Watch the key-value directory for external changes
    Watch(WatchArgs),
}

#[derive(Debug, Subcommand)]
pub enum KvCommand {
    /// Print the value stored under a key
    Get { namespace: String, key: String },
    /// Set a key; the value is parsed as null, bool, integer, float or string
    Put {
        namespace: String,
        key: String,
        value: String,
        /// Treat VALUE as a tagged JSON value, e.g. '{"type":"list","value":[]}'
        #[arg(long)]
        json: bool,
    },
    /// Remove a key
    Rm { namespace: String, key: String },
    /// List the entries of a namespace
    Ls { namespace: String },
    /// List namespaces
    Ids,
    /// Delete a whole namespace
    Drop { namespace: String },
}

#[derive(Debug, Subcommand)]
pub enum BlobCommand {
    /// Upload a file; its BLAKE3 digest becomes the key
    Put { namespace: String, file: PathBuf },
    /// Copy a blob out to a file
    Get {
        namespace: String,
        digest: String,
        output: PathBuf,
    },
    /// Delete one blob
    Rm { namespace: String, digest: String },
    /// Report whether a blob is stored
    Exists { namespace: String, digest: String },
    /// List namespaces, or the digests in one namespace
    Ls { namespace: Option<String> },
    /// Delete a whole namespace
    Drop { namespace: String },
    /// Remove temp files left by interrupted uploads
    Sweep {
        namespace: String,
        /// Only remove files older than this many seconds
        #[arg(long, default_value_t = 3600)]
        older_than: u64,
    },
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Poll interval in milliseconds, overriding the configuration
    #[arg(long)]
    pub interval_ms: Option<u64>,
}
