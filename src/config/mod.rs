#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::security::defaults;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub admission: AdmissionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// General-mode provider. Requests in general mode fall back to the
    /// local provider when this is not configured.
    #[serde(default)]
    pub openrouter: Option<OpenRouterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_host")]
    pub host: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_ollama_model(),
            timeout_secs: default_request_timeout(),
        }
    }
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_model() -> String {
    "llama3".to_string()
}
fn default_request_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// The key as written in the file, possibly a `${VAR}` reference.
    /// Use [`OpenRouterConfig::resolved_api_key`] for the real value.
    pub api_key: String,

    #[serde(default = "default_openrouter_model")]
    pub model: String,

    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl OpenRouterConfig {
    /// Expand a `${VAR}`/`$VAR` reference. The expanded key is never stored
    /// back into the config, so saving cannot write it to disk.
    pub fn resolved_api_key(&self) -> String {
        expand_env(self.api_key.trim())
    }
}

fn default_openrouter_model() -> String {
    "openai/gpt-4o-mini".to_string()
}
fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Every path operation is confined below this directory.
    #[serde(default = "default_allowed_root")]
    pub allowed_root: String,

    /// Base commands that `execute_command` may run (exact match).
    #[serde(default = "defaults::allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Substrings that deny a command outright, matched case-insensitively.
    #[serde(default = "defaults::denied_patterns")]
    pub denied_patterns: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_root: default_allowed_root(),
            allowed_commands: defaults::allowed_commands(),
            denied_patterns: defaults::denied_patterns(),
        }
    }
}

fn default_allowed_root() -> String {
    "~".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Fixed working directory for every child process.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,

    #[serde(default = "default_script_timeout")]
    pub script_timeout_secs: u64,

    /// Per-stream cap on captured output, marker included.
    #[serde(default = "default_output_cap")]
    pub output_cap_bytes: usize,

    /// Characters of stdout echoed into a result message.
    #[serde(default = "default_display_chars")]
    pub display_chars: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            command_timeout_secs: default_command_timeout(),
            shell_timeout_secs: default_shell_timeout(),
            script_timeout_secs: default_script_timeout(),
            output_cap_bytes: default_output_cap(),
            display_chars: default_display_chars(),
        }
    }
}

fn default_working_dir() -> String {
    "~".to_string()
}
fn default_command_timeout() -> u64 {
    10
}
fn default_shell_timeout() -> u64 {
    15
}
fn default_script_timeout() -> u64 {
    30
}
fn default_output_cap() -> usize {
    10_000
}
fn default_display_chars() -> usize {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interpreter that runs generated scripts.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    #[serde(default = "default_min_script_chars")]
    pub min_script_chars: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interpreter: default_interpreter(),
            min_script_chars: default_min_script_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_interpreter() -> String {
    "python3".to_string()
}
fn default_min_script_chars() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Above this many tracked clients the limiter sweeps idle buckets
    /// before admitting a new one.
    #[serde(default = "default_max_tracked_clients")]
    pub max_tracked_clients: usize,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            max_tracked_clients: default_max_tracked_clients(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_window_secs() -> u64 {
    30
}
fn default_max_requests() -> usize {
    10
}
fn default_max_tracked_clients() -> usize {
    10_000
}
fn default_cache_capacity() -> usize {
    256
}
fn default_cache_ttl() -> u64 {
    180
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit one JSON object per line instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from an explicit path, or from the default location when `None`.
    /// Only the default location gets a template written on first run.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
            None => {
                let path = Self::config_path()?;
                if !path.exists() {
                    Self::write_template(&path)?;
                    return Ok(Config::default());
                }
                path
            }
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.security.allowed_root.trim().is_empty() {
            anyhow::bail!("security.allowed_root cannot be empty");
        }
        if self.security.allowed_commands.is_empty() {
            anyhow::bail!("security.allowed_commands cannot be empty");
        }

        let timeouts = [
            ("command_timeout_secs", self.sandbox.command_timeout_secs),
            ("shell_timeout_secs", self.sandbox.shell_timeout_secs),
            ("script_timeout_secs", self.sandbox.script_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                anyhow::bail!("sandbox.{} must be greater than zero", name);
            }
        }
        if self.sandbox.output_cap_bytes < 256 {
            anyhow::bail!(
                "sandbox.output_cap_bytes must be at least 256 (got {})",
                self.sandbox.output_cap_bytes
            );
        }

        if self.fallback.enabled && self.fallback.interpreter.trim().is_empty() {
            anyhow::bail!("fallback.interpreter cannot be empty when fallback is enabled");
        }

        if self.admission.window_secs == 0 {
            anyhow::bail!("admission.window_secs must be greater than zero");
        }
        if self.admission.max_requests == 0 {
            anyhow::bail!("admission.max_requests must be greater than zero");
        }
        if self.admission.cache_capacity == 0 {
            anyhow::bail!("admission.cache_capacity must be greater than zero");
        }

        if let Some(ref openrouter) = self.providers.openrouter {
            if openrouter.api_key.trim().is_empty() {
                anyhow::bail!("OpenRouter API key is missing");
            }
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid logging.level '{}'. Expected one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            );
        }

        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Write the commented template (first-time setup).
    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;

        Ok(base.home_dir().join(".lia").join("config.toml"))
    }

    /// A copy safe to print: a literal OpenRouter key is masked, a `${VAR}`
    /// reference is left as written.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let Some(openrouter) = config.providers.openrouter.as_mut() {
            let key = openrouter.api_key.trim();
            if !key.is_empty() && !key.starts_with('$') {
                openrouter.api_key = "********".to_string();
            }
        }
        config
    }

    pub fn allowed_root(&self) -> PathBuf {
        expand_path(&self.security.allowed_root)
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["server", "bind"] => Ok(self.server.bind.clone()),
            ["server", "port"] => Ok(self.server.port.to_string()),
            ["providers", "ollama", "host"] => Ok(self.providers.ollama.host.clone()),
            ["providers", "ollama", "model"] => Ok(self.providers.ollama.model.clone()),
            ["security", "allowed_root"] => Ok(self.security.allowed_root.clone()),
            ["sandbox", "working_dir"] => Ok(self.sandbox.working_dir.clone()),
            ["sandbox", "command_timeout_secs"] => Ok(self.sandbox.command_timeout_secs.to_string()),
            ["sandbox", "shell_timeout_secs"] => Ok(self.sandbox.shell_timeout_secs.to_string()),
            ["sandbox", "script_timeout_secs"] => Ok(self.sandbox.script_timeout_secs.to_string()),
            ["sandbox", "output_cap_bytes"] => Ok(self.sandbox.output_cap_bytes.to_string()),
            ["sandbox", "display_chars"] => Ok(self.sandbox.display_chars.to_string()),
            ["fallback", "enabled"] => Ok(self.fallback.enabled.to_string()),
            ["fallback", "interpreter"] => Ok(self.fallback.interpreter.clone()),
            ["admission", "window_secs"] => Ok(self.admission.window_secs.to_string()),
            ["admission", "max_requests"] => Ok(self.admission.max_requests.to_string()),
            ["admission", "max_tracked_clients"] => {
                Ok(self.admission.max_tracked_clients.to_string())
            }
            ["admission", "cache_capacity"] => Ok(self.admission.cache_capacity.to_string()),
            ["admission", "cache_ttl_secs"] => Ok(self.admission.cache_ttl_secs.to_string()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "json"] => Ok(self.logging.json.to_string()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["server", "bind"] => self.server.bind = value.to_string(),
            ["server", "port"] => self.server.port = value.parse()?,
            ["providers", "ollama", "host"] => self.providers.ollama.host = value.to_string(),
            ["providers", "ollama", "model"] => self.providers.ollama.model = value.to_string(),
            ["security", "allowed_root"] => self.security.allowed_root = value.to_string(),
            ["sandbox", "working_dir"] => self.sandbox.working_dir = value.to_string(),
            ["sandbox", "command_timeout_secs"] => self.sandbox.command_timeout_secs = value.parse()?,
            ["sandbox", "shell_timeout_secs"] => self.sandbox.shell_timeout_secs = value.parse()?,
            ["sandbox", "script_timeout_secs"] => self.sandbox.script_timeout_secs = value.parse()?,
            ["sandbox", "output_cap_bytes"] => self.sandbox.output_cap_bytes = value.parse()?,
            ["sandbox", "display_chars"] => self.sandbox.display_chars = value.parse()?,
            ["fallback", "enabled"] => self.fallback.enabled = value.parse()?,
            ["fallback", "interpreter"] => self.fallback.interpreter = value.to_string(),
            ["admission", "window_secs"] => self.admission.window_secs = value.parse()?,
            ["admission", "max_requests"] => self.admission.max_requests = value.parse()?,
            ["admission", "max_tracked_clients"] => {
                self.admission.max_tracked_clients = value.parse()?
            }
            ["admission", "cache_capacity"] => self.admission.cache_capacity = value.parse()?,
            ["admission", "cache_ttl_secs"] => self.admission.cache_ttl_secs = value.parse()?,
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "json"] => self.logging.json = value.parse()?,
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw.trim()).to_string())
}

fn expand_env(s: &str) -> String {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else if let Some(var_name) = s.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else {
        s.to_string()
    }
}

/// Default config template with helpful comments (used for first-time setup)
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# LIA Configuration
# Auto-created on first run. Edit as needed.

[server]
bind = "127.0.0.1"
port = 8000

# Local mode
[providers.ollama]
host = "http://localhost:11434"
model = "llama3"

# General mode (OpenAI-compatible endpoint)
# [providers.openrouter]
# api_key = "${OPENROUTER_API_KEY}"
# model = "openai/gpt-4o-mini"
# base_url = "https://openrouter.ai/api/v1"

[security]
# All file operations stay inside this directory
allowed_root = "~"
# allowed_commands = ["ls", "pwd", "cat", ...]   # defaults to the built-in list
# denied_patterns = ["rm ", "sudo ", ...]        # defaults to the built-in list

[sandbox]
working_dir = "~"
command_timeout_secs = 10
shell_timeout_secs = 15
script_timeout_secs = 30
output_cap_bytes = 10000

[fallback]
enabled = true
# python3 or node; the script scan does not cover sh/bash scripts
interpreter = "python3"

[admission]
window_secs = 30
max_requests = 10
cache_capacity = 256
cache_ttl_secs = 180

[logging]
level = "info"
# json = true   # one JSON object per line
"#;
