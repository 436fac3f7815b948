use serde_json::json;

use super::CommandExecutor;
use crate::intent::{CommandResult, CommandType};

const HELP_TEXT: &str = "\
LIA (Local Intelligent Agent) - Help & Commands

File operations
  - Open folder:  \"Open Downloads\", \"Show Pictures folder\"
  - List files:   \"List all files\", \"Show PDF files in Documents\"
  - Create file:  \"Create notes.txt\", \"Make a new file called todo.md\"
  - Read file:    \"Read config.txt\", \"Show me the contents of script.sh\"
  - Search:       \"Find all *.log files\"
  - Copy / move / rename / delete files and folders

System commands
  - System info:  \"Show system information\", \"What's my uptime?\"
  - Processes:    \"Show running processes\"
  - Disk usage:   \"Show disk space\"

Questions
  - \"What is Python?\", \"Explain machine learning\"

Anything else is attempted with a short generated script, run in the
sandbox with a time limit.

Safety
  - Only allow-listed commands run; dangerous patterns are blocked
  - File operations are confined to the allowed directory
  - Output is truncated and every process has a timeout

Requests can be written in English, Azerbaijani and other languages.";

impl CommandExecutor {
    pub(super) fn help(&self) -> CommandResult {
        let commands = self.gate.allowed_commands();
        let message = format!(
            "{}\n\nSafe commands ({}): {}",
            HELP_TEXT,
            commands.len(),
            commands.join(", ")
        );
        CommandResult::ok(CommandType::Help, message).with_data(json!({
            "help_type": "general",
            "allowed_commands": commands.len(),
        }))
    }

    pub(super) fn system_info(&self) -> CommandResult {
        CommandResult::ok(CommandType::GetInfo, "System information retrieved").with_data(json!({
            "system": std::env::consts::OS,
            "family": std::env::consts::FAMILY,
            "arch": std::env::consts::ARCH,
            "home": self.guard.home().display().to_string(),
            "allowed_root": self.guard.root().display().to_string(),
            "working_dir": self.sandbox.working_dir().display().to_string(),
            "model": self.provider.name(),
            "version": env!("CARGO_PKG_VERSION"),
        }))
    }
}
