#![cfg(unix)]

use lia::config::{FallbackConfig, SecurityConfig};
use lia::executor::CommandExecutor;
use lia::intent::{CommandIntent, CommandType, IntentParams};
use lia::llm::StaticProvider;
use lia::sandbox::{ProcessSandbox, SandboxLimits};
use lia::security::{CommandGate, PathGuard};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    provider: Arc<StaticProvider>,
    executor: CommandExecutor,
}

fn fixture(reply: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let provider = Arc::new(StaticProvider::new(reply));

    let guard = PathGuard::with_home(&root, &root).unwrap();
    let gate = CommandGate::new(&SecurityConfig::default()).unwrap();
    let sandbox = ProcessSandbox::with_limits(
        &root,
        SandboxLimits {
            command_timeout: Duration::from_secs(1),
            shell_timeout: Duration::from_secs(2),
            script_timeout: Duration::from_secs(5),
            output_cap: 10_000,
        },
    )
    .unwrap();
    let fallback = FallbackConfig {
        enabled: true,
        interpreter: "sh".to_string(),
        min_script_chars: 10,
    };

    let executor =
        CommandExecutor::from_parts(guard, gate, sandbox, &fallback, provider.clone(), 2000);

    Fixture {
        _dir: dir,
        root,
        provider,
        executor,
    }
}

fn intent(command_type: CommandType, message: &str, params: serde_json::Value) -> CommandIntent {
    CommandIntent::new(command_type, message).with_params(IntentParams::from_value(&params))
}

fn write(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[tokio::test]
async fn test_path_escape_is_denied_without_fallback() {
    let f = fixture("unused");
    let result = f
        .executor
        .execute(&intent(
            CommandType::ReadFile,
            "read ../../etc/passwd",
            serde_json::json!({"path": "../../etc/passwd"}),
        ))
        .await;

    assert!(!result.success);
    assert!(!result.fallback_used);
    assert!(result.script.is_none());
    assert!(result.message.contains("Permission denied"));
    assert!(f.provider.prompts().is_empty());
}

#[tokio::test]
async fn test_destructive_command_is_denied() {
    let f = fixture("unused");
    let result = f
        .executor
        .execute(&intent(
            CommandType::ExecuteCommand,
            "wipe everything",
            serde_json::json!({"command": "rm -rf /"}),
        ))
        .await;

    assert!(!result.success);
    assert!(!result.fallback_used);
    assert!(result.message.contains("dangerous pattern"));
}

#[tokio::test]
async fn test_unlisted_command_is_denied() {
    let f = fixture("unused");
    let result = f
        .executor
        .execute(&intent(
            CommandType::ExecuteCommand,
            "run it",
            serde_json::json!({"command": "frobnicate --all"}),
        ))
        .await;

    assert!(!result.success);
    assert!(result.message.contains("'frobnicate' is not allowed"));
}

#[tokio::test]
async fn test_ls_runs_in_argv_mode() {
    let f = fixture("unused");
    write(&f.root, "visible.txt", "hi");

    let result = f
        .executor
        .execute(&intent(
            CommandType::ExecuteCommand,
            "list with details",
            serde_json::json!({"command": "ls -la"}),
        ))
        .await;

    assert!(result.success, "{}", result.message);
    assert!(result.message.starts_with("ls -la\n\n"));
    assert!(result.message.contains("visible.txt"));
    let data = result.data.unwrap();
    assert_eq!(data["mode"], "argv");
    assert_eq!(data["returncode"], 0);
}

#[tokio::test]
async fn test_pipe_runs_in_shell_mode() {
    let f = fixture("unused");
    write(&f.root, "foo.txt", "");
    write(&f.root, "bar.txt", "");

    let result = f
        .executor
        .execute(&intent(
            CommandType::ExecuteCommand,
            "grep for foo",
            serde_json::json!({"command": "ls | grep foo"}),
        ))
        .await;

    assert!(result.success, "{}", result.message);
    assert_eq!(result.data.unwrap()["mode"], "shell");
    assert_eq!(result.message, "ls | grep foo\n\nfoo.txt");
}

#[tokio::test]
async fn test_command_timeout_is_reported() {
    let f = fixture("unused");
    let result = f
        .executor
        .execute(&intent(
            CommandType::ExecuteCommand,
            "wait a while",
            serde_json::json!({"command": "sleep 10"}),
        ))
        .await;

    assert!(!result.success);
    assert!(!result.fallback_used);
    assert!(result.message.starts_with("Command timed out"));
    assert_eq!(result.data.unwrap()["timed_out"], true);
}

#[tokio::test]
async fn test_failed_command_without_vocabulary_skips_fallback() {
    let f = fixture("unused");
    let result = f
        .executor
        .execute(&intent(
            CommandType::ExecuteCommand,
            "show me the missing folder",
            serde_json::json!({"command": "ls missing-folder"}),
        ))
        .await;

    assert!(!result.success);
    assert!(!result.fallback_used);
    assert!(result.message.starts_with("Command failed (exit code"));
    assert!(f.provider.prompts().is_empty());
}

#[tokio::test]
async fn test_failed_command_with_vocabulary_uses_fallback() {
    let f = fixture("```sh\necho \"0 files\"\n```");
    let result = f
        .executor
        .execute(&intent(
            CommandType::ExecuteCommand,
            "count the files in missing-folder",
            serde_json::json!({"command": "ls missing-folder"}),
        ))
        .await;

    assert!(result.success, "{}", result.message);
    assert!(result.fallback_used);
    assert_eq!(result.command_type, CommandType::ExecuteCommand);
    assert_eq!(result.script.as_deref(), Some("echo \"0 files\""));

    let prompts = f.provider.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("\"failed_command\": \"execute_command\""));
}

#[tokio::test]
async fn test_unknown_request_computes_average_via_script() {
    let script = "```sh\n\
total=0\n\
n=0\n\
while read x; do\n\
  total=$((total + x))\n\
  n=$((n + 1))\n\
done < notes.txt\n\
echo $((total / n))\n\
```";
    let f = fixture(script);
    write(&f.root, "notes.txt", "2\n4\n6\n");

    let result = f
        .executor
        .execute(&CommandIntent::new(
            CommandType::Unknown,
            "calculate the average of numbers in notes.txt",
        ))
        .await;

    assert!(result.success, "{}", result.message);
    assert!(result.fallback_used);
    assert_eq!(result.command_type, CommandType::Unknown);
    assert_eq!(result.message, "Result:\n\n4");
    assert!(result.script.unwrap().contains("done < notes.txt"));
    assert_eq!(result.data.unwrap()["exit_code"], 0);
}

#[tokio::test]
async fn test_degenerate_script_is_not_run() {
    let f = fixture("ok");
    let result = f
        .executor
        .execute(&CommandIntent::new(CommandType::Unknown, "do something clever"))
        .await;

    assert!(!result.success);
    assert!(result.fallback_used);
    assert!(result.message.starts_with("Failed to generate a script"));
    assert!(result.script.is_some());
}

#[tokio::test]
async fn test_unsafe_script_is_rejected() {
    let f = fixture("import os\nos.system('id')\nprint('done')");
    let result = f
        .executor
        .execute(&CommandIntent::new(CommandType::Unknown, "who am i really"))
        .await;

    assert!(!result.success);
    assert!(result.fallback_used);
    assert!(result.message.contains("rejected"));
}

#[tokio::test]
async fn test_file_lifecycle() {
    let f = fixture("unused");
    let run = |command_type, params: serde_json::Value| {
        let intent = intent(command_type, "file op", params);
        let executor = f.executor.clone();
        async move { executor.execute(&intent).await }
    };

    let result = run(
        CommandType::WriteFile,
        serde_json::json!({"path": "work/draft.txt", "content": "first draft"}),
    )
    .await;
    assert!(result.success, "{}", result.message);
    assert_eq!(fs::read_to_string(f.root.join("work/draft.txt")).unwrap(), "first draft");

    let result = run(CommandType::ReadFile, serde_json::json!({"path": "work/draft.txt"})).await;
    assert!(result.success);
    assert_eq!(result.data.unwrap()["content"], "first draft");

    let result = run(
        CommandType::CopyFile,
        serde_json::json!({"source": "work/draft.txt", "destination": "work/copy.md"}),
    )
    .await;
    assert!(result.success, "{}", result.message);

    let result = run(
        CommandType::ListFiles,
        serde_json::json!({"path": "work", "pattern": "*.{txt,md}"}),
    )
    .await;
    assert!(result.success);
    let data = result.data.unwrap();
    assert_eq!(data["count"], 2);
    assert_eq!(data["files"][0]["name"], "copy.md");
    assert_eq!(data["files"][1]["name"], "draft.txt");

    let result = run(
        CommandType::RenameFile,
        serde_json::json!({"path": "work/copy.md", "new_name": "final.md"}),
    )
    .await;
    assert!(result.success, "{}", result.message);
    assert!(f.root.join("work/final.md").exists());

    let result = run(
        CommandType::RenameFile,
        serde_json::json!({"path": "work/final.md", "new_name": "../escape.md"}),
    )
    .await;
    assert!(!result.success);

    fs::create_dir_all(f.root.join("archive")).unwrap();
    let result = run(
        CommandType::MoveFile,
        serde_json::json!({"source": "work/final.md", "destination": "archive"}),
    )
    .await;
    assert!(result.success, "{}", result.message);
    assert!(f.root.join("archive/final.md").exists());
    assert!(!f.root.join("work/final.md").exists());

    let result = run(
        CommandType::SearchFiles,
        serde_json::json!({"path": ".", "pattern": "*.md"}),
    )
    .await;
    assert!(result.success);
    assert_eq!(result.data.unwrap()["count"], 1);

    let result = run(CommandType::DeleteFile, serde_json::json!({"path": "work"})).await;
    assert!(result.success, "{}", result.message);
    assert!(!f.root.join("work").exists());

    let result = run(CommandType::GetInfo, serde_json::json!({"path": "archive/final.md"})).await;
    assert!(result.success);
    assert_eq!(result.data.unwrap()["type"], "file");
}

#[tokio::test]
async fn test_oversized_brace_pattern_is_rejected() {
    let f = fixture("unused");
    write(&f.root, "a.txt", "x");
    let pattern = format!("{}*", "{a,b}".repeat(30));
    let result = f
        .executor
        .execute(&intent(
            CommandType::SearchFiles,
            "find files",
            serde_json::json!({"path": ".", "pattern": pattern}),
        ))
        .await;

    assert!(!result.success);
    assert!(!result.fallback_used);
    assert!(result.message.contains("more than 64 alternatives"), "{}", result.message);
    assert!(f.provider.prompts().is_empty());
}

#[tokio::test]
async fn test_root_cannot_be_deleted() {
    let f = fixture("unused");
    let root = f.root.display().to_string();
    let result = f
        .executor
        .execute(&intent(
            CommandType::DeleteFile,
            "delete everything",
            serde_json::json!({"path": root}),
        ))
        .await;

    assert!(!result.success);
    assert!(f.root.exists());
}

#[tokio::test]
async fn test_missing_parameters_fail_cleanly() {
    let f = fixture("unused");
    let result = f
        .executor
        .execute(&intent(CommandType::CopyFile, "copy", serde_json::json!({"source": "a"})))
        .await;
    assert!(!result.success);
    assert_eq!(result.message, "Source and destination paths required");

    let result = f
        .executor
        .execute(&intent(
            CommandType::ReadFile,
            "calculate stuff",
            serde_json::json!({"path": "nope.txt"}),
        ))
        .await;
    assert!(!result.success);
    assert!(!result.fallback_used);
    assert_eq!(result.message, "File not found: nope.txt");
}

#[tokio::test]
async fn test_create_file_lands_in_documents() {
    let f = fixture("unused");
    let result = f
        .executor
        .execute(&intent(
            CommandType::CreateFile,
            "create todo.md",
            serde_json::json!({"filename": "todo.md"}),
        ))
        .await;

    assert!(result.success, "{}", result.message);
    let created = f.root.join("Documents/todo.md");
    assert_eq!(
        fs::read_to_string(created).unwrap(),
        "# todo.md\n\nCreated by LIA\n"
    );
}

#[tokio::test]
async fn test_create_file_generates_requested_content() {
    let f = fixture("Rust is a systems programming language.");
    let result = f
        .executor
        .execute(&intent(
            CommandType::CreateFile,
            "make a file about rust",
            serde_json::json!({"filename": "./rust.txt", "content": "about rust"}),
        ))
        .await;

    assert!(result.success, "{}", result.message);
    assert_eq!(
        fs::read_to_string(f.root.join("rust.txt")).unwrap(),
        "Rust is a systems programming language."
    );
    assert!(f.provider.prompts()[0].contains("information about rust"));
}

#[tokio::test]
async fn test_chat_and_help() {
    let f = fixture("  Python is a programming language.  ");
    let result = f
        .executor
        .execute(&intent(
            CommandType::Chat,
            "what is python?",
            serde_json::json!({"question": "What is Python?"}),
        ))
        .await;
    assert!(result.success);
    assert_eq!(result.message, "Python is a programming language.");

    let result = f
        .executor
        .execute(&CommandIntent::new(CommandType::Help, "help"))
        .await;
    assert!(result.success);
    assert!(result.message.contains("Safe commands"));
    assert!(result.message.contains("grep"));
}
