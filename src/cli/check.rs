use anyhow::Result;
use clap::Args;

use lia::config::Config;
use lia::security::CommandGate;

#[derive(Args)]
pub struct CheckArgs {
    /// The command line to evaluate
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

pub fn run(args: CheckArgs, config: &Config) -> Result<()> {
    let gate = CommandGate::new(&config.security)?;
    let raw = args.command.join(" ");
    let verdict = gate.evaluate(&raw);

    match verdict.reason {
        None => {
            let mode = if verdict.needs_shell { "shell" } else { "argv" };
            println!("allowed ({} mode): {}", mode, raw);
            Ok(())
        }
        Some(denial) => {
            println!("denied: {}", denial);
            std::process::exit(1);
        }
    }
}
