use anyhow::Result;
use clap::Args;
use std::io::Write;

use lia::config::Config;
use lia::intent::{CommandResult, ResolutionMode};
use lia::Pipeline;

#[derive(Args)]
pub struct AskArgs {
    /// The request, in plain language
    pub message: String,

    /// Which model resolves and serves the request: local or general
    #[arg(short, long, default_value = "local")]
    pub mode: ResolutionMode,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: AskArgs, config: Config) -> Result<()> {
    let pipeline = Pipeline::new(&config)?;
    let result = pipeline.run(&args.message, args.mode).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if !result.success {
        std::io::stdout().flush()?;
        std::process::exit(1);
    }
    Ok(())
}

pub fn print_result(result: &CommandResult) {
    println!("{}", result.message);
    if let Some(data) = &result.data {
        if let Some(files) = data.get("files").and_then(|f| f.as_array()) {
            for file in files {
                println!("  {}", file["path"].as_str().unwrap_or_default());
            }
        }
        if let Some(content) = data.get("content").and_then(|c| c.as_str()) {
            println!("\n{}", content);
        }
    }
    if let Some(script) = result.script.as_deref().filter(|s| !s.is_empty()) {
        println!("\n[generated script]\n{}", script);
    }
}
