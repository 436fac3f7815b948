//! Request classification and the uniform result shape.

pub mod parser;

pub use parser::{intent_prompt, keyword_intent, parse_llm_reply, resolve_intent};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    OpenFolder,
    OpenFile,
    ListFiles,
    CreateFile,
    WriteFile,
    ReadFile,
    DeleteFile,
    SearchFiles,
    CopyFile,
    MoveFile,
    RenameFile,
    GetInfo,
    ExecuteCommand,
    Chat,
    Help,
    Unknown,
}

impl CommandType {
    pub const ALL: [CommandType; 16] = [
        CommandType::OpenFolder,
        CommandType::OpenFile,
        CommandType::ListFiles,
        CommandType::CreateFile,
        CommandType::WriteFile,
        CommandType::ReadFile,
        CommandType::DeleteFile,
        CommandType::SearchFiles,
        CommandType::CopyFile,
        CommandType::MoveFile,
        CommandType::RenameFile,
        CommandType::GetInfo,
        CommandType::ExecuteCommand,
        CommandType::Chat,
        CommandType::Help,
        CommandType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::OpenFolder => "open_folder",
            CommandType::OpenFile => "open_file",
            CommandType::ListFiles => "list_files",
            CommandType::CreateFile => "create_file",
            CommandType::WriteFile => "write_file",
            CommandType::ReadFile => "read_file",
            CommandType::DeleteFile => "delete_file",
            CommandType::SearchFiles => "search_files",
            CommandType::CopyFile => "copy_file",
            CommandType::MoveFile => "move_file",
            CommandType::RenameFile => "rename_file",
            CommandType::GetInfo => "get_info",
            CommandType::ExecuteCommand => "execute_command",
            CommandType::Chat => "chat",
            CommandType::Help => "help",
            CommandType::Unknown => "unknown",
        }
    }

    /// Lenient parse: anything unrecognised becomes `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|ct| ct.as_str() == label)
            .unwrap_or(CommandType::Unknown)
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which provider resolves and serves a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    /// Local model (Ollama).
    #[default]
    Local,
    /// Hosted OpenAI-compatible model (OpenRouter).
    General,
}

impl ResolutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMode::Local => "local",
            ResolutionMode::General => "general",
        }
    }
}

impl FromStr for ResolutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(ResolutionMode::Local),
            "general" => Ok(ResolutionMode::General),
            other => Err(format!("unknown mode '{}', expected local or general", other)),
        }
    }
}

impl fmt::Display for ResolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Anything else the model returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IntentParams {
    /// Build from loosely-typed model output. Scalars are stringified;
    /// nulls and blank strings are treated as absent.
    pub fn from_value(value: &Value) -> Self {
        let mut params = IntentParams::default();
        let Some(object) = value.as_object() else {
            return params;
        };

        for (key, raw) in object {
            let text = match raw {
                Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            };
            let slot = match key.as_str() {
                "path" => &mut params.path,
                "pattern" => &mut params.pattern,
                "content" => &mut params.content,
                "filename" => &mut params.filename,
                "source" => &mut params.source,
                "destination" => &mut params.destination,
                "new_name" => &mut params.new_name,
                "command" => &mut params.command,
                "question" => &mut params.question,
                _ => {
                    if !raw.is_null() {
                        params.extra.insert(key.clone(), raw.clone());
                    }
                    continue;
                }
            };
            *slot = text;
        }
        params
    }

    pub fn is_empty(&self) -> bool {
        *self == IntentParams::default()
    }
}

/// Trimmed, non-empty view of an optional parameter.
pub fn param(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandIntent {
    pub command_type: CommandType,
    #[serde(default)]
    pub parameters: IntentParams,
    pub original_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl CommandIntent {
    pub fn new(command_type: CommandType, message: impl Into<String>) -> Self {
        Self {
            command_type,
            parameters: IntentParams::default(),
            original_message: message.into(),
            reasoning: None,
        }
    }

    pub fn with_params(mut self, parameters: IntentParams) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// Uniform outcome returned by every handler and by the fallback path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub command_type: CommandType,
    #[serde(default)]
    pub fallback_used: bool,
    /// Generated script body, present iff `fallback_used`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl CommandResult {
    pub fn ok(command_type: CommandType, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            command_type,
            fallback_used: false,
            script: None,
        }
    }

    pub fn fail(command_type: CommandType, message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::ok(command_type, message)
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
