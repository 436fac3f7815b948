use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

use lia::config::Config;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the config file location
    Path,

    /// Print the effective configuration
    Show,

    /// Write the default config template
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print a single value, e.g. `sandbox.command_timeout_secs`
    Get { key: String },

    /// Set a single value and save
    Set { key: String, value: String },
}

fn resolve_path(explicit: Option<&str>) -> Result<PathBuf> {
    match explicit {
        Some(p) => Ok(PathBuf::from(shellexpand::tilde(p).to_string())),
        None => Config::config_path(),
    }
}

pub fn run(args: ConfigArgs, explicit: Option<&str>) -> Result<()> {
    let path = resolve_path(explicit)?;

    match args.command {
        ConfigCommands::Path => {
            println!("{}", path.display());
        }
        ConfigCommands::Show => {
            let config = Config::load_from(explicit)?;
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Config already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::write_template(&path)?;
        }
        ConfigCommands::Get { key } => {
            let config = Config::load_from(explicit)?;
            println!("{}", config.get_value(&key)?);
        }
        ConfigCommands::Set { key, value } => {
            let mut config = Config::load_from(explicit)?;
            config.set_value(&key, &value)?;
            config
                .validate()
                .with_context(|| format!("Refusing to save invalid value for {}", key))?;
            config.save(&path)?;
            println!("{} = {}", key, value);
        }
    }

    Ok(())
}
