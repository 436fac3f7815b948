use regex::RegexSet;
use std::collections::HashSet;
use thiserror::Error;

use crate::config::SecurityConfig;

/// Why a command string was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Denial {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Command '{command}' is not allowed. Safe commands: {}", .allowed.join(", "))]
    NotAllowlisted {
        command: String,
        allowed: Vec<String>,
    },

    #[error("Command blocked for security: contains dangerous pattern '{pattern}'")]
    DangerousPattern { pattern: String },
}

/// Outcome of evaluating a raw command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Option<Denial>,
    pub needs_shell: bool,
}

/// A command that passed the gate, ready for the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub raw: String,
    pub argv: Vec<String>,
    pub needs_shell: bool,
}

impl CommandSpec {
    pub fn base(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }
}

/// Allow-list plus deny-pattern classifier for shell commands.
///
/// The deny scan runs on the full lowercased command and wins over the
/// allow-list, so a denial always names the most specific rule broken.
#[derive(Debug, Clone)]
pub struct CommandGate {
    allowed: HashSet<String>,
    allowed_display: Vec<String>,
    patterns: Vec<String>,
    matcher: RegexSet,
}

impl CommandGate {
    pub fn new(config: &SecurityConfig) -> Result<Self, regex::Error> {
        Self::from_lists(&config.allowed_commands, &config.denied_patterns)
    }

    pub fn from_lists(allowed: &[String], denied: &[String]) -> Result<Self, regex::Error> {
        let mut allowed_display = Vec::with_capacity(allowed.len());
        let mut seen = HashSet::new();
        for cmd in allowed {
            if seen.insert(cmd.clone()) {
                allowed_display.push(cmd.clone());
            }
        }

        let patterns: Vec<String> = denied
            .iter()
            .map(|p| p.to_lowercase())
            .filter(|p| !p.trim().is_empty())
            .collect();
        let matcher = RegexSet::new(patterns.iter().map(|p| pattern_regex(p)))?;

        Ok(Self {
            allowed: seen,
            allowed_display,
            patterns,
            matcher,
        })
    }

    pub fn evaluate(&self, raw: &str) -> Verdict {
        let needs_shell = needs_shell(raw);
        match self.check(raw) {
            Ok(_) => Verdict {
                allowed: true,
                reason: None,
                needs_shell,
            },
            Err(denial) => Verdict {
                allowed: false,
                reason: Some(denial),
                needs_shell,
            },
        }
    }

    pub fn authorize(&self, raw: &str) -> Result<CommandSpec, Denial> {
        let argv = self.check(raw)?;
        Ok(CommandSpec {
            raw: raw.trim().to_string(),
            argv,
            needs_shell: needs_shell(raw),
        })
    }

    fn check(&self, raw: &str) -> Result<Vec<String>, Denial> {
        let argv: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
        let Some(base) = argv.first() else {
            return Err(Denial::EmptyCommand);
        };

        if let Some(pattern) = self.dangerous_pattern(raw) {
            tracing::warn!("Command denied by pattern '{}': {}", pattern, raw);
            return Err(Denial::DangerousPattern {
                pattern: pattern.to_string(),
            });
        }

        if !self.allowed.contains(base) {
            tracing::warn!("Command not in allow-list: {}", base);
            return Err(Denial::NotAllowlisted {
                command: base.clone(),
                allowed: self.allowed_display.clone(),
            });
        }

        Ok(argv)
    }

    fn dangerous_pattern(&self, raw: &str) -> Option<&str> {
        // single spaces, so `|  sh` and tabs cannot slip past `| sh`
        let lower = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        self.matcher
            .matches(&lower)
            .iter()
            .next()
            .map(|idx| self.patterns[idx].as_str())
    }

    pub fn allowed_commands(&self) -> &[String] {
        &self.allowed_display
    }
}

/// Pipes, redirection and chaining need a shell; everything else runs as argv.
pub fn needs_shell(raw: &str) -> bool {
    raw.contains('|') || raw.contains('>') || raw.contains("&&") || raw.contains("||")
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Patterns anchor at word edges: one that begins with a word character
/// only matches at a word start, so `rm ` does not fire inside `perform `,
/// and one that ends with a word character only matches at a word end, so
/// `| sh` does not fire on `| shuf`.
fn pattern_regex(pattern: &str) -> String {
    let escaped = regex::escape(pattern);
    let head = if pattern.chars().next().is_some_and(is_word_char) {
        r"(?:^|[^[:alnum:]_])"
    } else {
        ""
    };
    let tail = if pattern.chars().last().is_some_and(is_word_char) {
        r"(?:$|[^[:alnum:]_])"
    } else {
        ""
    };
    format!("{head}{escaped}{tail}")
}
