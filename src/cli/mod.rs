pub mod ask;
#[cfg(unix)]
pub mod chat;
pub mod check;
pub mod config;
pub mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lia")]
#[command(author, version, about = "Local Intelligent Agent: natural-language file and shell assistant")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "LIA_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve(serve::ServeArgs),

    /// Run a single request
    Ask(ask::AskArgs),

    /// Start an interactive session
    #[cfg(unix)]
    Chat(chat::ChatArgs),

    /// Show how the command gate judges a command, without running it
    Check(check::CheckArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}
