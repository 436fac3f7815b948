use anyhow::Result;
use clap::Args;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use lia::config::Config;
use lia::intent::ResolutionMode;
use lia::Pipeline;

use super::ask::print_result;

#[derive(Args)]
pub struct ChatArgs {
    /// Which model resolves and serves requests: local or general
    #[arg(short, long, default_value = "local")]
    pub mode: ResolutionMode,
}

pub async fn run(args: ChatArgs, config: Config) -> Result<()> {
    let pipeline = Pipeline::new(&config)?;
    let mut mode = args.mode;

    println!("LIA interactive session ({} mode)", mode);
    println!("Type help for commands, exit to quit\n");

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("You: ");

        let input = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                break; // Ctrl+D
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let _ = rl.add_history_entry(input);

        match input {
            "exit" | "quit" => break,
            "clear" => {
                let _ = rl.clear_screen();
                continue;
            }
            "/local" | "/general" => {
                mode = input[1..].parse().unwrap_or(mode);
                println!("Switched to {} mode\n", mode);
                continue;
            }
            "/help" => {
                println!("Commands:");
                println!("  help              - What LIA can do");
                println!("  /local, /general  - Switch model");
                println!("  clear             - Clear the screen");
                println!("  exit              - Leave the session\n");
                continue;
            }
            _ => {}
        }

        let result = pipeline.run(input, mode).await;
        println!();
        print_result(&result);
        println!();
    }

    Ok(())
}
