//! Command line interface

use clap::{Args, Parser, Subcommand};

/// hiqty - distributed playback reconciliation engine
#[derive(Parser, Debug)]
#[command(name = "hiqty")]
#[command(version)]
#[command(about = "Plays guild queues from Redis, one node per guild")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "HIQTY_CONFIG_PATH")]
    pub config: Option<String>,

    /// Log at debug level regardless of configuration
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the player until SIGINT/SIGTERM, then drain
    Run,

    /// Resolve URLs and queue them for a guild
    Enqueue(EnqueueArgs),

    /// Ask the guild's player to stop; the queue is kept
    Stop(GuildArgs),

    /// Delete every key of a guild
    Purge(GuildArgs),

    /// Print a guild's desired state, channel, queue length and lease holder
    Status(GuildArgs),
}

#[derive(Args, Debug)]
pub struct GuildArgs {
    #[arg(short, long)]
    pub guild: String,
}

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    #[arg(short, long)]
    pub guild: String,

    /// Voice channel to play in
    #[arg(long)]
    pub channel: String,

    #[arg(required = true)]
    pub urls: Vec<String>,
}
