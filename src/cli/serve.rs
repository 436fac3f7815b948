use anyhow::Result;
use clap::Args;

use lia::config::Config;
use lia::server::Server;

#[derive(Args)]
pub struct ServeArgs {
    /// Address to bind (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,
}

pub async fn run(args: ServeArgs, mut config: Config) -> Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let server = Server::new(&config)?;
    server.run().await
}
