//! Native handlers, one per [`CommandType`], plus recovery through the
//! script fallback.

mod files;
mod help;
mod shell;

use anyhow::{Context, Result};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, FallbackConfig};
use crate::fallback::{FallbackOrchestrator, LlmScriptGenerator, ScriptContext, ScriptGenerator};
use crate::intent::{param, CommandIntent, CommandResult, CommandType};
use crate::llm::{LlmError, LlmProvider, TokenStream};
use crate::sandbox::{ProcessSandbox, SandboxError};
use crate::security::{CommandGate, Denial, PathDenied, PathGuard};

const CHAT_MAX_TOKENS: u32 = 500;
const CONTENT_MAX_TOKENS: u32 = 3000;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Permission denied: {0}")]
    PermissionDenied(#[from] PathDenied),

    #[error("{0}")]
    CommandDenied(#[from] Denial),

    #[error("{0}")]
    MissingParameter(&'static str),

    #[error("{what} not found: {path}")]
    NotFound { what: &'static str, path: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error("Request not recognised")]
    Unrecognized,

    #[error("Command timed out after {}s: {command}", whole_secs(.after))]
    TimedOut {
        command: String,
        after: Duration,
        stdout: String,
    },

    #[error("Command failed (exit code {}): {command}{}", exit_label(.code), failure_details(.stdout, .stderr))]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to {action}: {source}")]
    Io {
        action: &'static str,
        source: std::io::Error,
    },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Language model error: {0}")]
    Llm(#[from] LlmError),
}

impl ExecError {
    /// Terminal errors are reported as-is and never reach the fallback.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecError::PermissionDenied(_)
                | ExecError::CommandDenied(_)
                | ExecError::MissingParameter(_)
                | ExecError::NotFound { .. }
                | ExecError::InvalidInput(_)
                | ExecError::Llm(_)
        )
    }

    pub fn io(action: &'static str) -> impl FnOnce(std::io::Error) -> ExecError {
        move |source| ExecError::Io { action, source }
    }

    pub fn into_result(self, command_type: CommandType) -> CommandResult {
        let data = match &self {
            ExecError::NonZeroExit {
                command,
                code,
                stdout,
                stderr,
            } => Some(json!({
                "command": command,
                "returncode": code,
                "stdout": stdout,
                "stderr": stderr,
            })),
            ExecError::TimedOut {
                command, stdout, ..
            } => Some(json!({
                "command": command,
                "timed_out": true,
                "stdout": stdout,
            })),
            _ => None,
        };
        let result = CommandResult::fail(command_type, self.to_string());
        match data {
            Some(data) => result.with_data(data),
            None => result,
        }
    }
}

fn chat_prompt(question: &str) -> String {
    format!(
        "You are LIA (Local Intelligent Agent), a helpful assistant.\n\
         Answer the user's question in a friendly, conversational way. \
         Keep your response concise but informative.\n\n\
         User's question: {question}\n\nYour response:"
    )
}

fn whole_secs(d: &Duration) -> u64 {
    d.as_secs()
}

fn exit_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

fn failure_details(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    if !stderr.trim().is_empty() {
        out.push_str("\n\nError details:\n");
        out.push_str(stderr.trim());
    }
    if !stdout.trim().is_empty() {
        out.push_str("\n\nOutput:\n");
        out.push_str(stdout.trim());
    }
    out
}

pub type ExecResult = std::result::Result<CommandResult, ExecError>;

/// Runs resolved intents against the filesystem, the command gate and the
/// sandbox. Shared pieces are reference-counted so executors for different
/// providers can be cut from one another cheaply.
#[derive(Clone)]
pub struct CommandExecutor {
    guard: Arc<PathGuard>,
    gate: Arc<CommandGate>,
    sandbox: Arc<ProcessSandbox>,
    fallback: Arc<FallbackOrchestrator>,
    fallback_config: FallbackConfig,
    provider: Arc<dyn LlmProvider>,
    display_chars: usize,
}

impl CommandExecutor {
    pub fn new(config: &Config, provider: Arc<dyn LlmProvider>) -> Result<Self> {
        let root = config.allowed_root();
        let guard = PathGuard::new(&root)
            .with_context(|| format!("Invalid allowed root {}", root.display()))?;
        let gate = CommandGate::new(&config.security).context("Invalid denied pattern")?;
        let sandbox =
            ProcessSandbox::new(&config.sandbox).context("Failed to set up process sandbox")?;

        info!(
            "Executor ready: root={} sandbox={} commands={}",
            guard.root().display(),
            sandbox.working_dir().display(),
            gate.allowed_commands().len()
        );

        Ok(Self::from_parts(
            guard,
            gate,
            sandbox,
            &config.fallback,
            provider,
            config.sandbox.display_chars,
        ))
    }

    pub fn from_parts(
        guard: PathGuard,
        gate: CommandGate,
        sandbox: ProcessSandbox,
        fallback: &FallbackConfig,
        provider: Arc<dyn LlmProvider>,
        display_chars: usize,
    ) -> Self {
        let guard = Arc::new(guard);
        let sandbox = Arc::new(sandbox);
        let generator = Arc::new(LlmScriptGenerator::new(
            provider.clone(),
            &fallback.interpreter,
            guard.home(),
        ));
        Self {
            fallback: Arc::new(FallbackOrchestrator::new(fallback, generator, sandbox.clone())),
            guard,
            gate: Arc::new(gate),
            sandbox,
            fallback_config: fallback.clone(),
            provider,
            display_chars,
        }
    }

    /// Same guard, gate and sandbox; a different model behind chat, content
    /// generation and fallback scripts.
    pub fn with_provider(&self, provider: Arc<dyn LlmProvider>) -> Self {
        let generator = Arc::new(LlmScriptGenerator::new(
            provider.clone(),
            &self.fallback_config.interpreter,
            self.guard.home(),
        ));
        Self {
            provider,
            ..self.clone().with_generator(generator)
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn ScriptGenerator>) -> Self {
        self.fallback = Arc::new(FallbackOrchestrator::new(
            &self.fallback_config,
            generator,
            self.sandbox.clone(),
        ));
        self
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    pub fn gate(&self) -> &CommandGate {
        &self.gate
    }

    pub fn sandbox(&self) -> &ProcessSandbox {
        &self.sandbox
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Never fails: every outcome, including denials, becomes a result.
    pub async fn execute(&self, intent: &CommandIntent) -> CommandResult {
        let command_type = intent.command_type;
        info!("Executing {}", command_type);

        match self.dispatch(intent).await {
            Ok(result) => result,
            Err(err) => self.recover(intent, err).await,
        }
    }

    async fn dispatch(&self, intent: &CommandIntent) -> ExecResult {
        let p = &intent.parameters;
        match intent.command_type {
            CommandType::OpenFolder => self.open_folder(param(&p.path).unwrap_or("~")).await,
            CommandType::OpenFile => {
                let path = param(&p.path).ok_or(ExecError::MissingParameter("No file path specified"))?;
                self.open_file(path).await
            }
            CommandType::ListFiles => {
                self.list_files(
                    param(&p.path).unwrap_or("."),
                    param(&p.pattern).unwrap_or("*"),
                )
                .await
            }
            CommandType::CreateFile => {
                let filename = param(&p.filename)
                    .or_else(|| param(&p.path))
                    .unwrap_or("newfile.txt");
                self.create_file(filename, param(&p.content)).await
            }
            CommandType::WriteFile => {
                let path = param(&p.path)
                    .or_else(|| param(&p.filename))
                    .ok_or(ExecError::MissingParameter("No file path specified"))?;
                self.write_file(path, p.content.as_deref().unwrap_or_default()).await
            }
            CommandType::ReadFile => {
                let path = param(&p.path).ok_or(ExecError::MissingParameter("No file path specified"))?;
                self.read_file(path).await
            }
            CommandType::DeleteFile => {
                let path = param(&p.path).ok_or(ExecError::MissingParameter("No file path specified"))?;
                self.delete_file(path).await
            }
            CommandType::SearchFiles => {
                self.search_files(
                    param(&p.pattern).unwrap_or("*"),
                    param(&p.path).unwrap_or("~"),
                )
                .await
            }
            CommandType::CopyFile => {
                let (source, destination) = source_and_destination(p)?;
                self.copy_file(source, destination).await
            }
            CommandType::MoveFile => {
                let (source, destination) = source_and_destination(p)?;
                self.move_file(source, destination).await
            }
            CommandType::RenameFile => match (param(&p.path), param(&p.new_name)) {
                (Some(path), Some(new_name)) => self.rename_file(path, new_name).await,
                _ => Err(ExecError::MissingParameter("Path and new name required")),
            },
            CommandType::GetInfo => match param(&p.path) {
                Some(path) => self.path_info(path).await,
                None => Ok(self.system_info()),
            },
            CommandType::ExecuteCommand => {
                let command = param(&p.command).ok_or(ExecError::MissingParameter("No command specified"))?;
                self.execute_command(command).await
            }
            CommandType::Chat => {
                let question = param(&p.question).unwrap_or(intent.original_message.as_str());
                self.chat(question).await
            }
            CommandType::Help => Ok(self.help()),
            CommandType::Unknown => Err(ExecError::Unrecognized),
        }
    }

    async fn recover(&self, intent: &CommandIntent, err: ExecError) -> CommandResult {
        let command_type = intent.command_type;

        if err.is_terminal() {
            match &err {
                ExecError::PermissionDenied(_) | ExecError::CommandDenied(_) => {
                    warn!("{} refused: {}", command_type, err)
                }
                _ => info!("{} failed: {}", command_type, err),
            }
            return err.into_result(command_type);
        }

        if !self.fallback.is_eligible(command_type, &intent.original_message) {
            info!("{} failed without fallback: {}", command_type, err);
            return match err {
                ExecError::Unrecognized => CommandResult::fail(
                    command_type,
                    "I could not work out what to do with that request. Try 'help' to see what I can do.",
                ),
                other => other.into_result(command_type),
            };
        }

        let context = if command_type == CommandType::Unknown {
            ScriptContext::default()
        } else {
            info!("{} failed ({}); trying script fallback", command_type, err);
            ScriptContext {
                failed_command: Some(command_type),
                parameters: intent.parameters.clone(),
                error: Some(err.to_string()),
            }
        };

        self.fallback
            .run_to_result(command_type, &intent.original_message, &context)
            .await
    }

    async fn chat(&self, question: &str) -> ExecResult {
        let answer = self.provider.generate(&chat_prompt(question), CHAT_MAX_TOKENS).await?;
        Ok(CommandResult::ok(CommandType::Chat, answer.trim()).with_data(json!({ "question": question })))
    }

    /// The chat answer as model tokens, for incremental delivery.
    pub async fn chat_stream(&self, question: &str) -> std::result::Result<TokenStream, LlmError> {
        self.provider
            .generate_stream(&chat_prompt(question), CHAT_MAX_TOKENS)
            .await
    }

    /// File content that reads like a writing request is produced by the model.
    async fn file_content(&self, filename: &str, content: Option<&str>) -> std::result::Result<String, ExecError> {
        const GENERATION_WORDS: &[&str] =
            &["write", "generate", "pages", "about", "search", "information", "content"];

        let Some(content) = content else {
            return Ok(format!("# {filename}\n\nCreated by LIA\n"));
        };
        let lower = content.to_lowercase();
        if !GENERATION_WORDS.iter().any(|w| lower.contains(w)) {
            return Ok(content.to_string());
        }

        info!("Generating content for {}", filename);
        let prompt = if lower.contains("about") || lower.contains("search") {
            let topic = ["about", "search", "information"]
                .iter()
                .fold(lower.clone(), |acc, w| acc.replace(w, ""));
            format!(
                "Write comprehensive information about {}. Create detailed content that explains \
                 the topic clearly and thoroughly. Format it well with headings and explanations.",
                topic.trim()
            )
        } else {
            format!(
                "Write detailed content for a file. The request was: {content}. \
                 Generate appropriate content that would fill approximately 1-2 pages."
            )
        };
        Ok(self.provider.generate(&prompt, CONTENT_MAX_TOKENS).await?)
    }

    fn documents_dir(&self) -> PathBuf {
        self.guard.home().join("Documents")
    }
}

fn source_and_destination(
    p: &crate::intent::IntentParams,
) -> std::result::Result<(&str, &str), ExecError> {
    match (param(&p.source), param(&p.destination)) {
        (Some(source), Some(destination)) => Ok((source, destination)),
        _ => Err(ExecError::MissingParameter("Source and destination paths required")),
    }
}

/// Keep at most `limit` characters for display.
pub(crate) fn display_truncate(text: &str, limit: usize) -> (String, bool) {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => (text[..cut].to_string(), true),
        None => (text.to_string(), false),
    }
}
