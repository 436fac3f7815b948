//! Child-process execution with a fixed working directory, a minimal
//! environment, a hard wall-clock timeout and capped output capture.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::security::CommandSpec;

/// Appended to a stream that hit the cap. Counted inside the cap.
pub const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// Environment variables passed through to children.
const INHERITED_ENV: &[&str] = &["PATH", "HOME"];

/// How long to wait for pipe readers after the child is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

#[cfg(unix)]
const SHELL: (&str, &str) = ("sh", "-c");
#[cfg(windows)]
const SHELL: (&str, &str) = ("cmd", "/C");

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Nothing to execute")]
    EmptyInvocation,

    #[error("Sandbox working directory is unusable: {path}: {source}")]
    WorkingDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Literal argv, no shell interpretation.
    Argv(Vec<String>),
    /// A gated command line that needs pipes or redirection.
    Shell(String),
    /// Generated source run by an interpreter from a temp file.
    Script { interpreter: String, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    Argv,
    Shell,
    Script,
}

impl Invocation {
    pub fn kind(&self) -> InvocationKind {
        match self {
            Invocation::Argv(_) => InvocationKind::Argv,
            Invocation::Shell(_) => InvocationKind::Shell,
            Invocation::Script { .. } => InvocationKind::Script,
        }
    }

    pub fn from_spec(spec: &CommandSpec) -> Self {
        if spec.needs_shell {
            Invocation::Shell(spec.raw.clone())
        } else {
            Invocation::Argv(spec.argv.clone())
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub command_timeout: Duration,
    pub shell_timeout: Duration,
    pub script_timeout: Duration,
    pub output_cap: usize,
}

impl SandboxLimits {
    pub fn timeout_for(&self, kind: InvocationKind) -> Duration {
        match kind {
            InvocationKind::Argv => self.command_timeout,
            InvocationKind::Shell => self.shell_timeout,
            InvocationKind::Script => self.script_timeout,
        }
    }
}

impl From<&SandboxConfig> for SandboxLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            shell_timeout: Duration::from_secs(config.shell_timeout_secs),
            script_timeout: Duration::from_secs(config.script_timeout_secs),
            output_cap: config.output_cap_bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub elapsed: Duration,
}

impl SandboxResult {
    /// Exit code zero is the only success signal.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    working_dir: PathBuf,
    limits: SandboxLimits,
}

impl ProcessSandbox {
    pub fn new(config: &SandboxConfig) -> Result<Self, SandboxError> {
        let dir = PathBuf::from(shellexpand::tilde(&config.working_dir).to_string());
        Self::with_limits(dir, SandboxLimits::from(config))
    }

    /// The working directory must already exist; it is never created here.
    pub fn with_limits(
        working_dir: impl AsRef<Path>,
        limits: SandboxLimits,
    ) -> Result<Self, SandboxError> {
        let path = working_dir.as_ref().to_path_buf();
        let canonical = path
            .canonicalize()
            .map_err(|source| SandboxError::WorkingDir {
                path: path.clone(),
                source,
            })?;
        if !canonical.is_dir() {
            return Err(SandboxError::WorkingDir {
                path,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            });
        }
        Ok(Self {
            working_dir: canonical,
            limits,
        })
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    pub async fn run(&self, invocation: &Invocation) -> Result<SandboxResult, SandboxError> {
        let timeout = self.limits.timeout_for(invocation.kind());
        self.run_with(invocation, timeout, self.limits.output_cap)
            .await
    }

    pub async fn run_with(
        &self,
        invocation: &Invocation,
        timeout: Duration,
        output_cap: usize,
    ) -> Result<SandboxResult, SandboxError> {
        // Holds the script file open until the child is done with it.
        let mut _script_file = None;

        let (program, mut cmd) = match invocation {
            Invocation::Argv(argv) => {
                let (program, args) = argv.split_first().ok_or(SandboxError::EmptyInvocation)?;
                let mut cmd = Command::new(program);
                cmd.args(args);
                (program.clone(), cmd)
            }
            Invocation::Shell(line) => {
                if line.trim().is_empty() {
                    return Err(SandboxError::EmptyInvocation);
                }
                let mut cmd = Command::new(SHELL.0);
                cmd.arg(SHELL.1).arg(line);
                (SHELL.0.to_string(), cmd)
            }
            Invocation::Script { interpreter, body } => {
                let mut file = tempfile::Builder::new()
                    .prefix("lia-script-")
                    .suffix(script_suffix(interpreter))
                    .tempfile()?;
                file.write_all(body.as_bytes())?;
                file.flush()?;
                let mut cmd = Command::new(interpreter);
                cmd.arg(file.path());
                _script_file = Some(file);
                (interpreter.clone(), cmd)
            }
        };

        cmd.env_clear();
        for key in INHERITED_ENV {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        if let Invocation::Script { .. } = invocation {
            cmd.env("PYTHONDONTWRITEBYTECODE", "1");
        }

        cmd.current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        debug!("Sandbox spawn: {:?} in {}", invocation.kind(), self.working_dir.display());
        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|source| SandboxError::Spawn { program, source })?;

        let stdout_buf = Arc::new(Mutex::new(Captured::default()));
        let stderr_buf = Arc::new(Mutex::new(Captured::default()));
        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(drain_capped(pipe, output_cap, stdout_buf.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(drain_capped(pipe, output_cap, stderr_buf.clone())));

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (status?.code(), false),
            Err(_) => {
                warn!("Sandboxed process exceeded {:?}; killing", timeout);
                kill_group(&mut child).await;
                (None, true)
            }
        };

        let readers = [stdout_task, stderr_task]
            .into_iter()
            .flatten()
            .map(|task| async move {
                let abort = task.abort_handle();
                if tokio::time::timeout(READER_GRACE, task).await.is_err() {
                    debug!("Output reader still busy after exit; abandoning");
                    abort.abort();
                }
            });
        futures::future::join_all(readers).await;

        let (stdout, stdout_truncated) = take_captured(&stdout_buf, output_cap);
        let (stderr, stderr_truncated) = take_captured(&stderr_buf, output_cap);
        let elapsed = started.elapsed();

        info!(
            "Sandbox finished: kind={:?} exit={:?} timed_out={} elapsed={:?}",
            invocation.kind(),
            exit_code,
            timed_out,
            elapsed
        );

        Ok(SandboxResult {
            exit_code,
            stdout,
            stderr,
            timed_out,
            stdout_truncated,
            stderr_truncated,
            elapsed,
        })
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    overflowed: bool,
}

/// Keep at most `cap` bytes but read the pipe to EOF so the child never
/// blocks on a full pipe.
async fn drain_capped<R: AsyncRead + Unpin>(mut pipe: R, cap: usize, sink: Arc<Mutex<Captured>>) {
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
                let room = cap.saturating_sub(captured.bytes.len());
                if n > room {
                    captured.overflowed = true;
                }
                let take = n.min(room);
                captured.bytes.extend_from_slice(&chunk[..take]);
            }
        }
    }
}

fn take_captured(buf: &Arc<Mutex<Captured>>, cap: usize) -> (String, bool) {
    let captured = std::mem::take(&mut *buf.lock().unwrap_or_else(PoisonError::into_inner));
    finish_output(&captured.bytes, captured.overflowed, cap)
}

/// Decode captured bytes and enforce the cap with the marker included.
pub(crate) fn finish_output(bytes: &[u8], overflowed: bool, cap: usize) -> (String, bool) {
    let text = String::from_utf8_lossy(bytes).into_owned();
    if !overflowed && text.len() <= cap {
        return (text, false);
    }

    if cap <= TRUNCATION_MARKER.len() {
        return (TRUNCATION_MARKER[..cap].to_string(), true);
    }

    let mut cut = (cap - TRUNCATION_MARKER.len()).min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + TRUNCATION_MARKER.len());
    out.push_str(&text[..cut]);
    out.push_str(TRUNCATION_MARKER);
    (out, true)
}

async fn kill_group(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // Negative pid targets the whole group created by process_group(0).
            // SAFETY: kill(2) takes plain integers and touches no memory of ours.
            // The child has not been reaped yet, so its pid (and the group id
            // equal to it) cannot have been recycled.
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn script_suffix(interpreter: &str) -> &'static str {
    let name = Path::new(interpreter)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(interpreter);
    if name.starts_with("python") {
        ".py"
    } else if name == "node" {
        ".js"
    } else if matches!(name, "sh" | "bash" | "zsh") {
        ".sh"
    } else {
        ".txt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_untouched() {
        let (text, truncated) = finish_output(b"hello", false, 100);
        assert_eq!(text, "hello");
        assert!(!truncated);
    }

    #[test]
    fn overflow_keeps_marker_inside_cap() {
        let data = vec![b'a'; 500];
        let (text, truncated) = finish_output(&data, true, 100);
        assert!(truncated);
        assert_eq!(text.len(), 100);
        assert!(text.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let data = "é".repeat(200);
        let (text, truncated) = finish_output(data.as_bytes(), true, 101);
        assert!(truncated);
        assert!(text.len() <= 101);
        assert!(text.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn tiny_cap_still_bounded() {
        let (text, truncated) = finish_output(b"abcdef", true, 4);
        assert!(truncated);
        assert_eq!(text.len(), 4);
    }

    #[test]
    fn shell_only_for_flagged_specs() {
        let spec = CommandSpec {
            raw: "ls | wc -l".into(),
            argv: vec!["ls".into(), "|".into(), "wc".into(), "-l".into()],
            needs_shell: true,
        };
        assert_eq!(Invocation::from_spec(&spec).kind(), InvocationKind::Shell);

        let plain = CommandSpec {
            raw: "ls -la".into(),
            argv: vec!["ls".into(), "-la".into()],
            needs_shell: false,
        };
        assert_eq!(
            Invocation::from_spec(&plain),
            Invocation::Argv(vec!["ls".into(), "-la".into()])
        );
    }

    #[test]
    fn script_suffix_follows_interpreter() {
        assert_eq!(script_suffix("python3"), ".py");
        assert_eq!(script_suffix("/usr/bin/python3.12"), ".py");
        assert_eq!(script_suffix("sh"), ".sh");
    }
}
