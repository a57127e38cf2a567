use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "leadsync",
    about = "LeadSync: multi-source lead synchronization service",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the sync service and its HTTP API until Ctrl-C
    Serve(ServeArgs),
    /// Validate a configuration file and list its sources
    Check(ConfigArgs),
    /// Print the canonical id of a source record
    CanonicalId(CanonicalIdArgs),
    /// Print the entries of a dead-letter log
    DeadLetters(DeadLettersArgs),
    /// Summarize events still awaiting redelivery in the event log
    Pending(ConfigArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(short, long, default_value = "leadsync.toml")]
    pub config: PathBuf,
    /// Override `server.bind_addr`
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(short, long, default_value = "leadsync.toml")]
    pub config: PathBuf,
}

#[derive(Args)]
pub struct CanonicalIdArgs {
    pub source: String,
    pub original_id: String,
}

#[derive(Args)]
pub struct DeadLettersArgs {
    pub file: PathBuf,
    /// Show only entries from this source
    #[arg(long)]
    pub source: Option<String>,
}
