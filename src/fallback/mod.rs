//! Generated-script fallback for requests no native handler could serve.
//!
//! The orchestrator asks a [`ScriptGenerator`] for a short script, rejects
//! degenerate or obviously unsafe output, runs it in the process sandbox
//! and folds the outcome back into a [`CommandResult`].

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::FallbackConfig;
use crate::intent::{CommandResult, CommandType, IntentParams};
use crate::llm::LlmProvider;
use crate::sandbox::{Invocation, ProcessSandbox, SandboxError, SandboxResult};
use crate::security::{scan_script, ScriptSafety};

const SCRIPT_MAX_TOKENS: u32 = 1000;

/// Outputs up to this many lines are echoed without a line-count header.
const SHORT_OUTPUT_LINES: usize = 10;

/// Request vocabulary that makes a failed native handler worth a script.
const COMPUTATION_WORDS_EN: &[&str] = &[
    "calculate", "compute", "average", "sum", "count", "analyze", "parse", "extract", "process",
    "convert", "transform", "compare", "find all", "filter", "sort by", "statistics", "json",
    "xml", "csv", "data", "numbers from", "pattern", "regex", "replace all", "manipulate",
    "generate random", "probability", "factorial", "fibonacci", "prime", "measure", "size",
    "how many", "total", "list all", "find", "search",
];

const COMPUTATION_WORDS_AZ: &[&str] = &[
    "hesabla", "ölç", "say", "cəm", "ortalama", "təhlil", "tap", "axtar", "süz", "çevir",
    "müqayisə", "statistika", "ölçü", "neçə", "cəmi", "siyahı", "hamısı",
];

/// Explanatory comment markers stripped from generated scripts.
const EXPLANATION_MARKERS: &[&str] = &["explanation", "note:", "this will", "this code"];

#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("Script fallback is disabled")]
    Disabled,

    #[error("Failed to generate a script: {reason}")]
    GenerationFailed { reason: String, script: String },

    #[error("Generated script rejected: {reason}")]
    UnsafeScript { reason: String, script: String },

    #[error("Script execution failed: {0}")]
    Sandbox(#[from] SandboxError),
}

/// What the failed native attempt looked like, handed to the generator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScriptContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_command: Option<CommandType>,
    #[serde(skip_serializing_if = "IntentParams::is_empty")]
    pub parameters: IntentParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScriptContext {
    pub fn is_empty(&self) -> bool {
        self.failed_command.is_none() && self.parameters.is_empty() && self.error.is_none()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    /// Return source text for `request`. Fences and prose are allowed;
    /// the orchestrator extracts the script.
    async fn generate_script(&self, request: &str, context: &ScriptContext) -> anyhow::Result<String>;
}

/// Script generator backed by an LLM provider.
pub struct LlmScriptGenerator {
    provider: Arc<dyn LlmProvider>,
    language: &'static str,
    home: PathBuf,
}

impl LlmScriptGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, interpreter: &str, home: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            language: language_for(interpreter),
            home: home.into(),
        }
    }

    pub fn prompt(&self, request: &str, context: &ScriptContext) -> String {
        let context_block = if context.is_empty() {
            String::new()
        } else {
            let json = serde_json::to_string_pretty(context).unwrap_or_default();
            format!("\n\nContext from the failed attempt:\n{json}")
        };
        let home = self.home.display();
        let lang = self.language;

        format!(
            "You write short, self-contained {lang} scripts for a local assistant.\n\
             The request may be in English, Azerbaijani or another language.\n\n\
             Request: {request}{context_block}\n\n\
             Rules:\n\
             1. Output only executable {lang} code, no explanations.\n\
             2. Use only the standard library.\n\
             3. No interactive input, no subprocesses, no dynamic code evaluation.\n\
             4. Print results clearly to stdout and handle errors gracefully.\n\
             5. Check that files and directories exist before using them.\n\
             6. Relevant directories:\n   \
                - Home: {home}\n   \
                - Documents: {home}/Documents\n   \
                - Downloads: {home}/Downloads\n   \
                - Desktop: {home}/Desktop\n\
             7. Keep the output to the essential information.\n\n\
             {lang} code:"
        )
    }
}

#[async_trait]
impl ScriptGenerator for LlmScriptGenerator {
    async fn generate_script(&self, request: &str, context: &ScriptContext) -> anyhow::Result<String> {
        let prompt = self.prompt(request, context);
        Ok(self.provider.generate(&prompt, SCRIPT_MAX_TOKENS).await?)
    }
}

fn language_for(interpreter: &str) -> &'static str {
    let name = Path::new(interpreter)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(interpreter);
    if name.starts_with("python") {
        "Python"
    } else if name == "node" || name == "deno" {
        "JavaScript"
    } else if matches!(name, "sh" | "bash" | "dash" | "zsh") {
        "POSIX shell"
    } else {
        "Python"
    }
}

/// A script that ran, successfully or not.
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub script: String,
    pub result: SandboxResult,
}

impl FallbackOutcome {
    pub fn message(&self) -> String {
        let stdout = self.result.stdout.trim();
        let stderr = self.result.stderr.trim();

        if self.result.timed_out {
            format!(
                "Script timed out after {}s",
                self.result.elapsed.as_secs().max(1)
            )
        } else if self.result.success() && !stdout.is_empty() {
            interpret_output(stdout)
        } else if self.result.success() {
            "Script ran but produced no output.".to_string()
        } else if !stderr.is_empty() {
            format!("Script execution encountered an error:\n{stderr}")
        } else {
            format!(
                "Script exited with code {}",
                self.result
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".into())
            )
        }
    }
}

fn interpret_output(output: &str) -> String {
    let lines = output.lines().count();
    if lines <= SHORT_OUTPUT_LINES {
        format!("Result:\n\n{output}")
    } else {
        format!("Result: (showing {lines} lines of output)\n\n{output}")
    }
}

pub struct FallbackOrchestrator {
    generator: Arc<dyn ScriptGenerator>,
    sandbox: Arc<ProcessSandbox>,
    interpreter: String,
    min_script_chars: usize,
    enabled: bool,
}

impl FallbackOrchestrator {
    pub fn new(
        config: &FallbackConfig,
        generator: Arc<dyn ScriptGenerator>,
        sandbox: Arc<ProcessSandbox>,
    ) -> Self {
        if config.enabled && language_for(&config.interpreter) == "POSIX shell" {
            warn!(
                "Fallback interpreter {} is a shell; the script scan does not cover shell syntax",
                config.interpreter
            );
        }
        Self {
            generator,
            sandbox,
            interpreter: config.interpreter.clone(),
            min_script_chars: config.min_script_chars,
            enabled: config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Unknown requests always qualify; failed handlers qualify only when
    /// the request reads like computation or analysis.
    pub fn is_eligible(&self, command_type: CommandType, request: &str) -> bool {
        self.enabled
            && (command_type == CommandType::Unknown || has_computation_vocabulary(request))
    }

    pub async fn run(
        &self,
        request: &str,
        context: &ScriptContext,
    ) -> Result<FallbackOutcome, FallbackError> {
        if !self.enabled {
            return Err(FallbackError::Disabled);
        }

        let raw = self
            .generator
            .generate_script(request, context)
            .await
            .map_err(|e| FallbackError::GenerationFailed {
                reason: e.to_string(),
                script: String::new(),
            })?;

        let script = extract_script(&raw);
        if script.chars().count() < self.min_script_chars {
            warn!("Generated script too short ({} chars)", script.len());
            return Err(FallbackError::GenerationFailed {
                reason: "generated script is empty or too short".into(),
                script,
            });
        }

        match scan_script(&script) {
            ScriptSafety::Unsafe(reason) => {
                return Err(FallbackError::UnsafeScript { reason, script });
            }
            ScriptSafety::Warn(note) => info!("Generated script note: {}", note),
            ScriptSafety::Safe => {}
        }

        info!("Running generated script with {}", self.interpreter);
        let result = self
            .sandbox
            .run(&Invocation::Script {
                interpreter: self.interpreter.clone(),
                body: script.clone(),
            })
            .await?;

        Ok(FallbackOutcome { script, result })
    }

    /// Run and always produce a result marked as fallback.
    pub async fn run_to_result(
        &self,
        command_type: CommandType,
        request: &str,
        context: &ScriptContext,
    ) -> CommandResult {
        fallback_result(command_type, self.run(request, context).await)
    }
}

/// Fold a fallback attempt into the uniform result shape.
pub fn fallback_result(
    command_type: CommandType,
    outcome: Result<FallbackOutcome, FallbackError>,
) -> CommandResult {
    let (success, message, data, script) = match outcome {
        Ok(outcome) => {
            let r = &outcome.result;
            let data = json!({
                "output": r.stdout,
                "error": (!r.stderr.is_empty()).then(|| r.stderr.clone()),
                "exit_code": r.exit_code,
                "timed_out": r.timed_out,
                "truncated": r.stdout_truncated || r.stderr_truncated,
            });
            (r.success(), outcome.message(), Some(data), outcome.script)
        }
        Err(FallbackError::GenerationFailed { reason, script }) => (
            false,
            format!("Failed to generate a script: {reason}"),
            None,
            script,
        ),
        Err(FallbackError::UnsafeScript { reason, script }) => (
            false,
            format!("Generated script was rejected: {reason}"),
            None,
            script,
        ),
        Err(other) => (false, other.to_string(), None, String::new()),
    };

    CommandResult {
        success,
        message,
        data,
        command_type,
        fallback_used: true,
        script: Some(script),
    }
}

pub fn has_computation_vocabulary(request: &str) -> bool {
    let lower = request.to_lowercase();
    COMPUTATION_WORDS_EN
        .iter()
        .chain(COMPUTATION_WORDS_AZ)
        .any(|word| lower.contains(word))
}

/// Pull the script out of a model reply: take the first fenced block if
/// any, then drop comment lines that only narrate the code.
pub fn extract_script(reply: &str) -> String {
    let trimmed = reply.trim();
    let body = match trimmed.find("```") {
        Some(start) => {
            let after = &trimmed[start + 3..];
            // skip the language tag
            let after = match after.find('\n') {
                Some(nl) if !after[..nl].contains(char::is_whitespace) => &after[nl + 1..],
                _ => after,
            };
            match after.find("```") {
                Some(end) => &after[..end],
                None => after,
            }
        }
        None => trimmed,
    };

    body.lines()
        .filter(|line| {
            let t = line.trim_start();
            let is_comment = t.starts_with('#') || t.starts_with("//");
            !(is_comment && {
                let lower = t.to_lowercase();
                EXPLANATION_MARKERS.iter().any(|m| lower.contains(m))
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxLimits;
    use std::time::Duration;

    fn sandbox(dir: &Path) -> Arc<ProcessSandbox> {
        Arc::new(
            ProcessSandbox::with_limits(
                dir,
                SandboxLimits {
                    command_timeout: Duration::from_secs(5),
                    shell_timeout: Duration::from_secs(5),
                    script_timeout: Duration::from_secs(5),
                    output_cap: 4096,
                },
            )
            .unwrap(),
        )
    }

    fn config(interpreter: &str) -> FallbackConfig {
        FallbackConfig {
            enabled: true,
            interpreter: interpreter.to_string(),
            min_script_chars: 10,
        }
    }

    #[test]
    fn extracts_fenced_code_and_drops_narration() {
        let reply = "Here you go:\n```python\n# This code sums numbers\nnums = [1, 2]\n# keep this\nprint(sum(nums))\n```\nEnjoy!";
        assert_eq!(extract_script(reply), "nums = [1, 2]\n# keep this\nprint(sum(nums))");
    }

    #[test]
    fn unfenced_reply_is_used_as_is() {
        assert_eq!(extract_script("  print('hi')  \n"), "print('hi')");
    }

    #[test]
    fn eligibility_rules() {
        let tmp = tempfile::tempdir().unwrap();
        let orchestrator = FallbackOrchestrator::new(
            &config("python3"),
            Arc::new(MockScriptGenerator::new()),
            sandbox(tmp.path()),
        );

        assert!(orchestrator.is_eligible(CommandType::Unknown, "do the thing"));
        assert!(orchestrator.is_eligible(
            CommandType::ReadFile,
            "calculate the average of numbers in notes.txt"
        ));
        assert!(orchestrator.is_eligible(CommandType::ListFiles, "faylları say"));
        assert!(!orchestrator.is_eligible(CommandType::ReadFile, "open my notes"));
    }

    #[test]
    fn short_outputs_are_echoed_long_ones_counted() {
        assert_eq!(interpret_output("42"), "Result:\n\n42");
        let long = (1..=12).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        assert!(interpret_output(&long).starts_with("Result: (showing 12 lines of output)"));
    }

    #[tokio::test]
    async fn degenerate_script_is_not_executed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut generator = MockScriptGenerator::new();
        generator
            .expect_generate_script()
            .times(1)
            .returning(|_, _| Ok("```\nx=1\n```".to_string()));

        let orchestrator =
            FallbackOrchestrator::new(&config("python3"), Arc::new(generator), sandbox(tmp.path()));
        let err = orchestrator
            .run("calculate", &ScriptContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FallbackError::GenerationFailed { .. }));
    }

    #[tokio::test]
    async fn unsafe_script_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut generator = MockScriptGenerator::new();
        generator
            .expect_generate_script()
            .returning(|_, _| Ok("import subprocess\nsubprocess.run(['id'])".to_string()));

        let orchestrator =
            FallbackOrchestrator::new(&config("python3"), Arc::new(generator), sandbox(tmp.path()));
        let result = orchestrator
            .run_to_result(CommandType::Unknown, "who am i", &ScriptContext::default())
            .await;
        assert!(!result.success);
        assert!(result.fallback_used);
        assert!(result.script.unwrap().contains("subprocess"));
    }

    #[tokio::test]
    async fn generator_errors_become_failed_results() {
        let tmp = tempfile::tempdir().unwrap();
        let mut generator = MockScriptGenerator::new();
        generator
            .expect_generate_script()
            .returning(|_, _| Err(anyhow::anyhow!("model offline")));

        let orchestrator =
            FallbackOrchestrator::new(&config("python3"), Arc::new(generator), sandbox(tmp.path()));
        let result = orchestrator
            .run_to_result(CommandType::Unknown, "anything", &ScriptContext::default())
            .await;
        assert!(!result.success);
        assert!(result.fallback_used);
        assert!(result.message.contains("model offline"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_script_runs_in_sandbox() {
        let tmp = tempfile::tempdir().unwrap();
        let mut generator = MockScriptGenerator::new();
        generator
            .expect_generate_script()
            .withf(|request, context| {
                request.contains("count") && context.failed_command == Some(CommandType::ReadFile)
            })
            .returning(|_, _| Ok("```sh\necho 3\necho done\n```".to_string()));

        let orchestrator =
            FallbackOrchestrator::new(&config("sh"), Arc::new(generator), sandbox(tmp.path()));
        let context = ScriptContext {
            failed_command: Some(CommandType::ReadFile),
            ..Default::default()
        };
        let result = orchestrator
            .run_to_result(CommandType::ReadFile, "count the lines", &context)
            .await;

        assert!(result.success, "{}", result.message);
        assert!(result.fallback_used);
        assert_eq!(result.message, "Result:\n\n3\ndone");
        assert_eq!(result.data.unwrap()["exit_code"], 0);
    }

    #[test]
    fn prompt_names_language_and_context() {
        let generator = LlmScriptGenerator::new(
            Arc::new(crate::llm::StaticProvider::new("x")),
            "/usr/bin/python3",
            "/home/user",
        );
        let context = ScriptContext {
            failed_command: Some(CommandType::ReadFile),
            error: Some("not found".into()),
            ..Default::default()
        };
        let prompt = generator.prompt("sum the numbers", &context);
        assert!(prompt.contains("Python"));
        assert!(prompt.contains("Request: sum the numbers"));
        assert!(prompt.contains("\"failed_command\": \"read_file\""));
        assert!(prompt.contains("/home/user/Downloads"));
    }
}
