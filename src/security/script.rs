use once_cell::sync::Lazy;
use regex::Regex;

/// Result of the static scan over a generated script.
///
/// This is a best-effort heuristic over source text. It is trivially
/// bypassed by obfuscation and is not a security boundary; containment
/// comes from the sandbox limits.
///
/// The rules target Python and JavaScript. A shell script runs commands by
/// construction, so with an `sh`-family interpreter only the sandbox limits
/// apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSafety {
    Safe,
    /// Allowed, but worth a log line.
    Warn(String),
    Unsafe(String),
}

static BLOCK_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?i)\b(import|from)\s+subprocess\b").unwrap(),
            "Subprocess execution not allowed",
        ),
        (
            Regex::new(r"(?i)\bos\s*\.\s*(system|popen|exec\w*|spawn\w*|fork)\b").unwrap(),
            "System command execution not allowed",
        ),
        (
            Regex::new(r"(?i)\bexec\s*\(").unwrap(),
            "Dynamic code execution not allowed",
        ),
        (
            Regex::new(r"(?i)\beval\s*\(").unwrap(),
            "Dynamic evaluation not allowed",
        ),
        (
            Regex::new(r"(?i)(__import__|\bimportlib\b)").unwrap(),
            "Dynamic imports not allowed",
        ),
        (
            Regex::new(r"(?i)\bfrom\s+os\s+import\b[^\n]*\b(system|popen|exec\w*|spawn\w*|fork)\b")
                .unwrap(),
            "System command execution not allowed",
        ),
        (
            Regex::new(r"(?i)\b((import|from)\s+pty\b|pty\s*\.\s*(spawn|fork)\b)").unwrap(),
            "Pseudo-terminal spawning not allowed",
        ),
        (
            Regex::new(r"(?i)\bchild_process\b").unwrap(),
            "Subprocess execution not allowed",
        ),
        (
            Regex::new(r"\b(execSync|execFileSync|spawnSync)\s*\(").unwrap(),
            "Subprocess execution not allowed",
        ),
        // case-sensitive: `function (` is ordinary JavaScript
        (
            Regex::new(r"\bFunction\s*\(").unwrap(),
            "Dynamic code execution not allowed",
        ),
    ]
});

static WARN_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bopen\s*\(").unwrap());

pub fn scan_script(body: &str) -> ScriptSafety {
    for (rule, reason) in BLOCK_RULES.iter() {
        if rule.is_match(body) {
            tracing::warn!("Potentially unsafe script rejected: {}", reason);
            return ScriptSafety::Unsafe((*reason).to_string());
        }
    }

    if WARN_OPEN.is_match(body) {
        tracing::debug!("Generated script opens files");
        return ScriptSafety::Warn("File opening detected".to_string());
    }

    ScriptSafety::Safe
}
