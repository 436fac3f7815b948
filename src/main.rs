use anyhow::Result;
use clap::Parser;

mod cli;

use cli::{Cli, Commands};
use lia::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Config commands must work even when the file is broken
    let config = match cli.command {
        Commands::Config(_) => None,
        _ => Some(Config::load_from(cli.config.as_deref())?),
    };

    // Initialize logging: RUST_LOG, then --verbose, then config
    let log_level = if cli.verbose {
        "debug"
    } else {
        config
            .as_ref()
            .map(|c| c.logging.level.as_str())
            .unwrap_or("info")
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    if config.as_ref().is_some_and(|c| c.logging.json) {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match (cli.command, config) {
        (Commands::Config(args), _) => cli::config::run(args, cli.config.as_deref()),
        (Commands::Serve(args), Some(config)) => cli::serve::run(args, config).await,
        (Commands::Ask(args), Some(config)) => cli::ask::run(args, config).await,
        #[cfg(unix)]
        (Commands::Chat(args), Some(config)) => cli::chat::run(args, config).await,
        (Commands::Check(args), Some(config)) => cli::check::run(args, &config),
        (_, None) => anyhow::bail!("Configuration was not loaded"),
    }
}
