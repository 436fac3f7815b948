use serde_json::Value;
use tracing::{debug, warn};

use super::{CommandIntent, CommandType, IntentParams};
use crate::llm::LlmProvider;

const INTENT_MAX_TOKENS: u32 = 512;

const INTENT_INSTRUCTIONS: &str = r#"You interpret requests for a local file system assistant.
Reply with a single JSON object and nothing else:

{
  "command_type": "open_folder | open_file | list_files | create_file | write_file | read_file | delete_file | search_files | copy_file | move_file | rename_file | get_info | execute_command | chat | help | unknown",
  "parameters": {
    "path": "file or folder path",
    "pattern": "glob pattern or file extension",
    "content": "content to write",
    "filename": "name of a file to create",
    "source": "source path for copy/move",
    "destination": "destination path for copy/move",
    "new_name": "new name for rename",
    "command": "shell command to execute",
    "question": "the user's question, for chat"
  },
  "reasoning": "one short sentence"
}

Omit parameters that do not apply. Questions and conversation use "chat" with "question".
Requests may be in English or Azerbaijani.

Examples:
"Open the Pictures folder" -> {"command_type": "open_folder", "parameters": {"path": "Pictures"}}
"List all PDF files in Downloads" -> {"command_type": "list_files", "parameters": {"path": "Downloads", "pattern": "*.pdf"}}
"list all photo files in Downloads" -> {"command_type": "list_files", "parameters": {"path": "Downloads", "pattern": "*.{jpg,jpeg,png,gif}"}}
"Yusif.txt adli fayl yarat" -> {"command_type": "create_file", "parameters": {"filename": "Yusif.txt"}}
"Delete old.txt" -> {"command_type": "delete_file", "parameters": {"path": "old.txt"}}
"run df -h" -> {"command_type": "execute_command", "parameters": {"command": "df -h"}}
"What is Python?" -> {"command_type": "chat", "parameters": {"question": "What is Python?"}}"#;

pub fn intent_prompt(message: &str) -> String {
    format!("{INTENT_INSTRUCTIONS}\n\nUser request: {message}\n\nJSON response:")
}

/// Ask the provider to classify `message`, falling back to keyword
/// matching when the provider fails or replies with something unparseable.
pub async fn resolve_intent(provider: &dyn LlmProvider, message: &str) -> CommandIntent {
    match provider.generate(&intent_prompt(message), INTENT_MAX_TOKENS).await {
        Ok(reply) => match parse_llm_reply(&reply, message) {
            Some(intent) => {
                debug!("Resolved intent {} via {}", intent.command_type, provider.name());
                intent
            }
            None => {
                warn!("Unparseable intent reply from {}; using keywords", provider.name());
                keyword_intent(message)
            }
        },
        Err(e) => {
            warn!("Intent resolution via {} failed: {}; using keywords", provider.name(), e);
            keyword_intent(message)
        }
    }
}

/// Parse a model reply into an intent. Code fences and surrounding prose
/// are tolerated; unknown labels become `Unknown`.
pub fn parse_llm_reply(reply: &str, message: &str) -> Option<CommandIntent> {
    let body = strip_fences(reply);
    let value: Value = serde_json::from_str(body)
        .ok()
        .or_else(|| extract_object(body).and_then(|o| serde_json::from_str(o).ok()))?;

    let label = value.get("command_type")?.as_str()?;
    let mut intent = CommandIntent::new(CommandType::from_label(label), message)
        .with_params(IntentParams::from_value(
            value.get("parameters").unwrap_or(&Value::Null),
        ));
    if let Some(reasoning) = value.get("reasoning").and_then(Value::as_str) {
        if !reasoning.trim().is_empty() {
            intent = intent.with_reasoning(reasoning.trim());
        }
    }
    Some(intent)
}

pub(crate) fn strip_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // drop the language tag line
        body = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

const HELP_WORDS: &[&str] = &[
    "help", "commands", "what can you do", "show me", "list commands", "available commands",
    "how to", "guide", "tutorial", "manual", "yardım", "komandalar", "nə edə bilərsən",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "why", "how", "when", "where", "who", "tell me", "explain", "describe", "can you",
    "do you know", "?", "nədir", "necə", "niyə",
];

const ACTION_WORDS: &[&str] = &[
    "open", "list", "create", "delete", "copy", "move", "rename", "show", "display",
];

const FILE_EXTENSIONS: &[&str] = &[".jpg", ".png", ".pdf", ".txt", ".doc", ".mp4", ".mp3"];

const IMAGE_WORDS: &[&str] = &["image", "photo", "picture", "jpg", "png", "şəkil"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// First word not in `skip`, compared case-insensitively.
fn first_word_except<'a>(words: &[&'a str], skip: &[&str]) -> Option<&'a str> {
    words
        .iter()
        .copied()
        .find(|w| !skip.contains(&w.to_lowercase().as_str()))
}

/// The word following `marker`, if any.
fn word_after<'a>(words: &[&'a str], marker: &str) -> Option<&'a str> {
    words
        .windows(2)
        .find(|pair| pair[0].eq_ignore_ascii_case(marker))
        .map(|pair| pair[1])
}

fn params() -> IntentParams {
    IntentParams::default()
}

/// Keyword classifier used when no model answer is usable.
pub fn keyword_intent(message: &str) -> CommandIntent {
    let lower = message.to_lowercase();
    let words: Vec<&str> = message.split_whitespace().collect();
    let intent = |ct: CommandType, p: IntentParams, why: &str| {
        CommandIntent::new(ct, message)
            .with_params(p)
            .with_reasoning(format!("keywords: {why}"))
    };

    if contains_any(&lower, HELP_WORDS) {
        return intent(CommandType::Help, params(), "help request");
    }

    if contains_any(&lower, QUESTION_WORDS) && !contains_any(&lower, ACTION_WORDS) {
        let p = IntentParams {
            question: Some(message.to_string()),
            ..params()
        };
        return intent(CommandType::Chat, p, "question");
    }

    if lower.contains("open") || lower.contains("aç") {
        let path = first_word_except(&words, &["open", "the", "folder", "directory", "file", "aç"])
            .unwrap_or("~")
            .to_string();
        let p = IntentParams {
            path: Some(path),
            ..params()
        };
        return if contains_any(&lower, FILE_EXTENSIONS) {
            intent(CommandType::OpenFile, p, "open file")
        } else {
            intent(CommandType::OpenFolder, p, "open folder")
        };
    }

    if lower.contains("list") || lower.contains("show") || lower.contains("göstər") {
        let pattern = if lower.contains("pdf") {
            "*.pdf"
        } else if contains_any(&lower, IMAGE_WORDS) {
            "*.{jpg,png,jpeg,gif,bmp,webp,JPG,PNG,JPEG}"
        } else {
            "*"
        };
        let path = if lower.contains("downloads") || lower.contains("yükləmələr") {
            "Downloads"
        } else if lower.contains("documents") || lower.contains("sənədlər") {
            "Documents"
        } else if lower.contains("pictures") || lower.contains("şəkillər") {
            "Pictures"
        } else {
            "."
        };
        let p = IntentParams {
            path: Some(path.to_string()),
            pattern: Some(pattern.to_string()),
            ..params()
        };
        return intent(CommandType::ListFiles, p, "listing");
    }

    if lower.contains("delete") || lower.contains("remove") {
        let p = IntentParams {
            path: first_word_except(&words, &["delete", "remove", "the", "file"]).map(String::from),
            ..params()
        };
        return intent(CommandType::DeleteFile, p, "delete");
    }

    if lower.contains("copy") {
        let p = IntentParams {
            source: word_after(&words, "copy").map(String::from),
            destination: word_after(&words, "to").map(String::from),
            ..params()
        };
        return intent(CommandType::CopyFile, p, "copy");
    }

    if lower.contains("rename") {
        let p = IntentParams {
            path: word_after(&words, "rename").map(String::from),
            new_name: word_after(&words, "to").map(String::from),
            ..params()
        };
        return intent(CommandType::RenameFile, p, "rename");
    }

    if lower.contains("create") || lower.contains("yarat") || lower.contains("fayl") {
        let filename = create_target(&words).unwrap_or_else(|| "newfile.txt".to_string());
        let p = IntentParams {
            filename: Some(filename),
            ..params()
        };
        return intent(CommandType::CreateFile, p, "create file");
    }

    intent(CommandType::Unknown, params(), "no match")
}

fn create_target(words: &[&str]) -> Option<String> {
    let clean = |w: &str| w.trim_matches(|c| c == '"' || c == '\'' || c == ',').to_string();
    for (i, word) in words.iter().enumerate() {
        if word.contains('.') && !word.starts_with('.') {
            return Some(clean(word));
        }
        let lower = word.to_lowercase();
        if ["named", "called", "name", "adli", "adlı"].contains(&lower.as_str()) {
            if let Some(next) = words.get(i + 1) {
                return Some(clean(next));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StaticProvider;

    #[test]
    fn parses_fenced_json() {
        let reply = "```json\n{\"command_type\": \"list_files\", \"parameters\": {\"path\": \"Downloads\", \"pattern\": \"*.pdf\"}, \"reasoning\": \"listing\"}\n```";
        let intent = parse_llm_reply(reply, "list pdfs").unwrap();
        assert_eq!(intent.command_type, CommandType::ListFiles);
        assert_eq!(intent.parameters.path.as_deref(), Some("Downloads"));
        assert_eq!(intent.parameters.pattern.as_deref(), Some("*.pdf"));
        assert_eq!(intent.reasoning.as_deref(), Some("listing"));
        assert_eq!(intent.original_message, "list pdfs");
    }

    #[test]
    fn tolerates_prose_around_json() {
        let reply = "Sure! {\"command_type\": \"help\"} Hope that helps.";
        let intent = parse_llm_reply(reply, "help").unwrap();
        assert_eq!(intent.command_type, CommandType::Help);
    }

    #[test]
    fn unknown_label_maps_to_unknown() {
        let intent = parse_llm_reply(r#"{"command_type": "wipe_disk"}"#, "x").unwrap();
        assert_eq!(intent.command_type, CommandType::Unknown);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_llm_reply("I cannot do that", "x").is_none());
        assert!(parse_llm_reply(r#"{"parameters": {}}"#, "x").is_none());
    }

    #[test]
    fn keyword_classification() {
        assert_eq!(keyword_intent("help").command_type, CommandType::Help);
        assert_eq!(keyword_intent("What is Rust?").command_type, CommandType::Chat);

        let open = keyword_intent("Open the Pictures folder");
        assert_eq!(open.command_type, CommandType::OpenFolder);
        assert_eq!(open.parameters.path.as_deref(), Some("Pictures"));

        assert_eq!(keyword_intent("open report.pdf").command_type, CommandType::OpenFile);

        let list = keyword_intent("list photos in downloads");
        assert_eq!(list.command_type, CommandType::ListFiles);
        assert_eq!(list.parameters.path.as_deref(), Some("Downloads"));
        assert!(list.parameters.pattern.as_deref().unwrap().contains("jpg"));

        let copy = keyword_intent("copy a.txt to backup");
        assert_eq!(copy.parameters.source.as_deref(), Some("a.txt"));
        assert_eq!(copy.parameters.destination.as_deref(), Some("backup"));

        let rename = keyword_intent("rename a.txt to b.txt");
        assert_eq!(rename.command_type, CommandType::RenameFile);
        assert_eq!(rename.parameters.new_name.as_deref(), Some("b.txt"));

        let create = keyword_intent("Yusif.txt adli fayl yarat");
        assert_eq!(create.command_type, CommandType::CreateFile);
        assert_eq!(create.parameters.filename.as_deref(), Some("Yusif.txt"));
    }

    #[test]
    fn computation_requests_are_unknown() {
        let intent = keyword_intent("calculate the average of numbers in notes.txt");
        assert_eq!(intent.command_type, CommandType::Unknown);
    }

    #[tokio::test]
    async fn resolve_falls_back_to_keywords_on_bad_reply() {
        let provider = StaticProvider::new("no json here");
        let intent = resolve_intent(&provider, "delete old.txt").await;
        assert_eq!(intent.command_type, CommandType::DeleteFile);
        assert_eq!(intent.parameters.path.as_deref(), Some("old.txt"));
    }

    #[tokio::test]
    async fn resolve_uses_model_reply() {
        let provider =
            StaticProvider::new(r#"{"command_type": "execute_command", "parameters": {"command": "ls -la"}}"#);
        let intent = resolve_intent(&provider, "show me the files").await;
        assert_eq!(intent.command_type, CommandType::ExecuteCommand);
        assert_eq!(intent.parameters.command.as_deref(), Some("ls -la"));
        assert!(provider.prompts()[0].contains("User request: show me the files"));
    }
}
