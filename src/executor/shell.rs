use serde_json::json;
use tracing::info;

use super::{display_truncate, CommandExecutor, ExecError, ExecResult};
use crate::intent::{CommandResult, CommandType};
use crate::sandbox::{Invocation, InvocationKind};

impl CommandExecutor {
    /// Gate, then sandbox. The gate's verdict decides argv or shell mode.
    pub(super) async fn execute_command(&self, command: &str) -> ExecResult {
        let spec = self.gate.authorize(command)?;
        let invocation = Invocation::from_spec(&spec);
        let mode = match invocation.kind() {
            InvocationKind::Shell => "shell",
            _ => "argv",
        };

        info!("Running '{}' ({} mode)", spec.raw, mode);
        let result = self.sandbox.run(&invocation).await?;

        if result.timed_out {
            return Err(ExecError::TimedOut {
                command: spec.raw,
                after: self.sandbox.limits().timeout_for(invocation.kind()),
                stdout: result.stdout,
            });
        }
        if !result.success() {
            return Err(ExecError::NonZeroExit {
                command: spec.raw,
                code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }

        let stdout = result.stdout.trim();
        let message = if stdout.is_empty() {
            format!("{} (executed successfully)", spec.raw)
        } else {
            let (shown, cut) = display_truncate(stdout, self.display_chars);
            if cut {
                format!(
                    "{}\n\n{}\n\n... (output truncated, showing first {} characters)",
                    spec.raw, shown, self.display_chars
                )
            } else {
                format!("{}\n\n{}", spec.raw, shown)
            }
        };

        Ok(
            CommandResult::ok(CommandType::ExecuteCommand, message).with_data(json!({
                "command": spec.raw,
                "mode": mode,
                "returncode": result.exit_code,
                "stdout": result.stdout,
                "stderr": result.stderr,
                "truncated": result.stdout_truncated || result.stderr_truncated,
                "elapsed_ms": result.elapsed.as_millis() as u64,
            })),
        )
    }
}
