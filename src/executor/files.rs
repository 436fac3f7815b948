use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{CommandExecutor, ExecError, ExecResult};
use crate::intent::{CommandResult, CommandType};
use crate::security::{NormalizedPath, PathGuard};

const SEARCH_LIMIT: usize = 100;
const PREVIEW_CHARS: usize = 200;
const MAX_BRACE_ALTERNATIVES: usize = 64;

#[derive(Debug, Serialize)]
struct FileEntry {
    name: String,
    path: String,
    size: u64,
    modified: Option<String>,
}

impl FileEntry {
    fn from_path(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(Self {
            name: path.file_name()?.to_string_lossy().into_owned(),
            path: path.display().to_string(),
            size: meta.len(),
            modified: meta.modified().ok().map(rfc3339),
        })
    }
}

fn rfc3339(time: std::time::SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

async fn blocking<T, F>(action: &'static str, f: F) -> Result<T, ExecError>
where
    F: FnOnce() -> Result<T, ExecError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExecError::Io {
            action,
            source: io::Error::other(e),
        })?
}

impl CommandExecutor {
    pub(super) async fn open_folder(&self, raw: &str) -> ExecResult {
        let path = self.guard.normalize(raw)?;
        if !path.as_path().is_dir() {
            return Err(ExecError::NotFound {
                what: "Folder",
                path: raw.to_string(),
            });
        }
        launch_opener(path.as_path())?;
        Ok(
            CommandResult::ok(CommandType::OpenFolder, format!("Opened folder: {}", path))
                .with_data(json!({ "path": path.to_string() })),
        )
    }

    pub(super) async fn open_file(&self, raw: &str) -> ExecResult {
        let path = self.guard.normalize(raw)?;
        if !path.as_path().is_file() {
            return Err(ExecError::NotFound {
                what: "File",
                path: raw.to_string(),
            });
        }
        launch_opener(path.as_path())?;
        let name = display_name(&path);
        Ok(
            CommandResult::ok(CommandType::OpenFile, format!("Opened file: {}", name))
                .with_data(json!({ "path": path.to_string(), "name": name })),
        )
    }

    pub(super) async fn list_files(&self, raw: &str, pattern: &str) -> ExecResult {
        let dir = self.existing_dir(raw)?;
        check_pattern(pattern)?;

        let guard = self.guard.clone();
        let base = dir.as_path().to_path_buf();
        let pattern_owned = pattern.to_string();
        let files = blocking("list files", move || {
            collect_matches(&guard, &base, &pattern_owned, false, usize::MAX)
        })
        .await?;

        let count = files.len();
        Ok(CommandResult::ok(
            CommandType::ListFiles,
            format!("Found {} file(s) matching '{}' in {}", count, pattern, dir),
        )
        .with_data(json!({ "files": files, "count": count })))
    }

    pub(super) async fn search_files(&self, pattern: &str, raw: &str) -> ExecResult {
        let dir = self.existing_dir(raw)?;
        check_pattern(pattern)?;

        let guard = self.guard.clone();
        let base = dir.as_path().to_path_buf();
        let pattern_owned = pattern.to_string();
        let files = blocking("search files", move || {
            collect_matches(&guard, &base, &pattern_owned, true, SEARCH_LIMIT)
        })
        .await?;

        let count = files.len();
        Ok(CommandResult::ok(
            CommandType::SearchFiles,
            format!("Found {} file(s) matching '{}'", count, pattern),
        )
        .with_data(json!({ "files": files, "count": count })))
    }

    /// A bare filename lands in the Documents folder, which must itself be
    /// inside the allowed root.
    pub(super) async fn create_file(&self, filename: &str, content: Option<&str>) -> ExecResult {
        let target = if filename.contains(['/', '\\']) || filename.starts_with('~') {
            self.guard.normalize(filename)?
        } else {
            let in_documents = self.documents_dir().join(filename);
            self.guard.normalize(&in_documents.to_string_lossy())?
        };
        if self.guard.is_root(&target) || target.as_path().is_dir() {
            return Err(ExecError::InvalidInput(format!(
                "Cannot create file: {} is a directory",
                target
            )));
        }

        let body = self.file_content(filename, content).await?;
        write_with_parents(target.as_path(), &body)
            .await
            .map_err(ExecError::io("create file"))?;

        info!("Created {}", target);
        let (preview, cut) = super::display_truncate(&body, PREVIEW_CHARS);
        let preview = if cut { format!("{preview}...") } else { preview };
        Ok(
            CommandResult::ok(CommandType::CreateFile, format!("Created file: {}", target)).with_data(
                json!({
                    "path": target.to_string(),
                    "size": body.len(),
                    "content_preview": preview,
                }),
            ),
        )
    }

    pub(super) async fn write_file(&self, raw: &str, content: &str) -> ExecResult {
        let target = self.guard.normalize(raw)?;
        if target.as_path().is_dir() {
            return Err(ExecError::InvalidInput(format!(
                "Cannot write: {} is a directory",
                target
            )));
        }

        write_with_parents(target.as_path(), content)
            .await
            .map_err(ExecError::io("write file"))?;

        info!("Wrote {} bytes to {}", content.len(), target);
        Ok(
            CommandResult::ok(CommandType::WriteFile, format!("Wrote to file: {}", target))
                .with_data(json!({ "path": target.to_string(), "size": content.len() })),
        )
    }

    pub(super) async fn read_file(&self, raw: &str) -> ExecResult {
        let path = self.guard.normalize(raw)?;
        if !path.as_path().is_file() {
            return Err(ExecError::NotFound {
                what: "File",
                path: raw.to_string(),
            });
        }

        let content = tokio::fs::read_to_string(path.as_path())
            .await
            .map_err(ExecError::io("read file"))?;

        Ok(
            CommandResult::ok(CommandType::ReadFile, format!("Read file: {}", path))
                .with_data(json!({ "path": path.to_string(), "content": content })),
        )
    }

    pub(super) async fn delete_file(&self, raw: &str) -> ExecResult {
        let path = self.guard.normalize(raw)?;
        if self.guard.is_root(&path) {
            return Err(ExecError::InvalidInput(
                "Refusing to delete the allowed root directory".to_string(),
            ));
        }

        let meta = tokio::fs::symlink_metadata(path.as_path())
            .await
            .map_err(|_| ExecError::NotFound {
                what: "File",
                path: raw.to_string(),
            })?;

        let name = display_name(&path);
        let message = if meta.is_dir() {
            tokio::fs::remove_dir_all(path.as_path())
                .await
                .map_err(ExecError::io("delete directory"))?;
            format!("Deleted directory: {}", name)
        } else {
            tokio::fs::remove_file(path.as_path())
                .await
                .map_err(ExecError::io("delete file"))?;
            format!("Deleted file: {}", name)
        };

        info!("Deleted {}", path);
        Ok(CommandResult::ok(CommandType::DeleteFile, message)
            .with_data(json!({ "path": path.to_string() })))
    }

    pub(super) async fn copy_file(&self, source: &str, destination: &str) -> ExecResult {
        let (from, to) = self.transfer_paths(source, destination)?;

        let src = from.as_path().to_path_buf();
        let dst = to.clone();
        blocking("copy", move || {
            if src.is_dir() {
                if dst.starts_with(&src) {
                    return Err(ExecError::InvalidInput(
                        "Cannot copy a directory into itself".to_string(),
                    ));
                }
                copy_dir(&src, &dst).map_err(ExecError::io("copy directory"))
            } else {
                fs::copy(&src, &dst)
                    .map(|_| ())
                    .map_err(ExecError::io("copy file"))
            }
        })
        .await?;

        info!("Copied {} to {}", from, to.display());
        Ok(CommandResult::ok(
            CommandType::CopyFile,
            format!("Copied {} to {}", display_name(&from), to.display()),
        )
        .with_data(json!({ "source": from.to_string(), "destination": to.display().to_string() })))
    }

    pub(super) async fn move_file(&self, source: &str, destination: &str) -> ExecResult {
        let (from, to) = self.transfer_paths(source, destination)?;
        if self.guard.is_root(&from) {
            return Err(ExecError::InvalidInput(
                "Refusing to move the allowed root directory".to_string(),
            ));
        }
        if from.as_path().is_dir() && to.starts_with(from.as_path()) {
            return Err(ExecError::InvalidInput(
                "Cannot move a directory into itself".to_string(),
            ));
        }

        let src = from.as_path().to_path_buf();
        let dst = to.clone();
        blocking("move", move || match fs::rename(&src, &dst) {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => {
                debug!("Cross-device move; copying then removing");
                if src.is_dir() {
                    copy_dir(&src, &dst).map_err(ExecError::io("move directory"))?;
                    fs::remove_dir_all(&src).map_err(ExecError::io("move directory"))
                } else {
                    fs::copy(&src, &dst).map_err(ExecError::io("move file"))?;
                    fs::remove_file(&src).map_err(ExecError::io("move file"))
                }
            }
            Err(e) => Err(ExecError::Io {
                action: "move",
                source: e,
            }),
        })
        .await?;

        info!("Moved {} to {}", from, to.display());
        Ok(CommandResult::ok(
            CommandType::MoveFile,
            format!("Moved {} to {}", display_name(&from), to.display()),
        )
        .with_data(json!({ "source": from.to_string(), "destination": to.display().to_string() })))
    }

    pub(super) async fn rename_file(&self, raw: &str, new_name: &str) -> ExecResult {
        if new_name.contains(['/', '\\']) || new_name == "." || new_name == ".." {
            return Err(ExecError::InvalidInput(format!(
                "New name must be a plain file name, got '{}'",
                new_name
            )));
        }

        let path = self.guard.normalize(raw)?;
        if self.guard.is_root(&path) {
            return Err(ExecError::InvalidInput(
                "Refusing to rename the allowed root directory".to_string(),
            ));
        }
        if tokio::fs::symlink_metadata(path.as_path()).await.is_err() {
            return Err(ExecError::NotFound {
                what: "File",
                path: raw.to_string(),
            });
        }

        let parent = path.as_path().parent().unwrap_or(self.guard.root());
        let target = self.guard.normalize(&parent.join(new_name).to_string_lossy())?;
        if target.as_path().exists() {
            return Err(ExecError::InvalidInput(format!(
                "Cannot rename: {} already exists",
                target
            )));
        }

        tokio::fs::rename(path.as_path(), target.as_path())
            .await
            .map_err(ExecError::io("rename"))?;

        info!("Renamed {} to {}", path, target);
        Ok(CommandResult::ok(
            CommandType::RenameFile,
            format!("Renamed {} to {}", display_name(&path), new_name),
        )
        .with_data(json!({ "old_path": path.to_string(), "new_path": target.to_string() })))
    }

    pub(super) async fn path_info(&self, raw: &str) -> ExecResult {
        let path = self.guard.normalize(raw)?;
        let meta = tokio::fs::metadata(path.as_path())
            .await
            .map_err(|_| ExecError::NotFound {
                what: "Path",
                path: raw.to_string(),
            })?;

        let name = display_name(&path);
        let kind = if meta.is_dir() { "directory" } else { "file" };
        Ok(
            CommandResult::ok(CommandType::GetInfo, format!("Information for {}", name)).with_data(
                json!({
                    "name": name,
                    "path": path.to_string(),
                    "type": kind,
                    "size": meta.len(),
                    "modified": meta.modified().ok().map(rfc3339),
                    "permissions": permissions(&meta),
                }),
            ),
        )
    }

    fn existing_dir(&self, raw: &str) -> Result<NormalizedPath, ExecError> {
        let dir = self.guard.normalize(raw)?;
        if !dir.as_path().is_dir() {
            return Err(ExecError::NotFound {
                what: "Directory",
                path: raw.to_string(),
            });
        }
        Ok(dir)
    }

    /// Source must exist. A destination that is an existing directory
    /// receives the source under its own name.
    fn transfer_paths(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<(NormalizedPath, PathBuf), ExecError> {
        let from = self.guard.normalize(source)?;
        if !from.as_path().exists() {
            return Err(ExecError::NotFound {
                what: "Source",
                path: source.to_string(),
            });
        }

        let to = self.guard.normalize(destination)?;
        let to = match (to.as_path().is_dir(), from.as_path().file_name()) {
            (true, Some(name)) => self
                .guard
                .normalize(&to.as_path().join(name).to_string_lossy())?
                .into_path_buf(),
            _ => to.into_path_buf(),
        };
        Ok((from, to))
    }
}

fn display_name(path: &NormalizedPath) -> String {
    path.as_path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn check_pattern(pattern: &str) -> Result<(), ExecError> {
    if pattern.contains(['/', '\\']) || pattern.contains("..") {
        return Err(ExecError::InvalidInput(format!(
            "Pattern must be a file name pattern, got '{}'",
            pattern
        )));
    }
    Ok(())
}

/// Glob `pattern` (with `{a,b}` alternatives) under `base`. Matches that
/// resolve outside the root through symlinks are dropped.
fn collect_matches(
    guard: &PathGuard,
    base: &Path,
    pattern: &str,
    recursive: bool,
    limit: usize,
) -> Result<Vec<FileEntry>, ExecError> {
    let escaped = glob::Pattern::escape(&base.to_string_lossy());
    let mut seen = std::collections::BTreeSet::new();
    let mut files = Vec::new();

    for alternative in expand_braces(pattern)? {
        let full = if recursive {
            format!("{}/**/{}", escaped, alternative)
        } else {
            format!("{}/{}", escaped, alternative)
        };
        let paths = glob::glob(&full)
            .map_err(|e| ExecError::InvalidInput(format!("Invalid pattern '{}': {}", pattern, e)))?;

        for path in paths.flatten() {
            if files.len() >= limit {
                break;
            }
            if guard.normalize(&path.to_string_lossy()).is_err() || !seen.insert(path.clone()) {
                continue;
            }
            if let Some(entry) = FileEntry::from_path(&path) {
                files.push(entry);
            }
        }
    }

    if !recursive {
        files.sort_by(|a, b| a.name.cmp(&b.name));
    }
    Ok(files)
}

/// `*.{jpg,png}` becomes `*.jpg`, `*.png`. Nested groups expand recursively,
/// up to [`MAX_BRACE_ALTERNATIVES`] patterns in total.
pub(crate) fn expand_braces(pattern: &str) -> Result<Vec<String>, ExecError> {
    let Some(open) = pattern.find('{') else {
        return Ok(vec![pattern.to_string()]);
    };

    let mut depth = 0;
    let mut close = None;
    let mut splits = Vec::new();
    for (i, c) in pattern[open..].char_indices() {
        let i = open + i;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(i),
            _ => {}
        }
    }

    let Some(close) = close else {
        return Ok(vec![pattern.to_string()]);
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    let mut expanded = Vec::new();
    for w in bounds.windows(2) {
        let option = &pattern[w[0] + 1..w[1]];
        expanded.extend(expand_braces(&format!("{prefix}{option}{suffix}"))?);
        if expanded.len() > MAX_BRACE_ALTERNATIVES {
            return Err(ExecError::InvalidInput(format!(
                "Pattern '{}' expands to more than {} alternatives",
                pattern, MAX_BRACE_ALTERNATIVES
            )));
        }
    }
    Ok(expanded)
}

async fn write_with_parents(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await
}

/// Symlinks inside the tree are skipped rather than followed.
fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            debug!("Skipping {} while copying", entry.path().display());
        }
    }
    Ok(())
}

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

fn permissions(meta: &fs::Metadata) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        format!("{:o}", meta.permissions().mode() & 0o777)
    }
    #[cfg(not(unix))]
    {
        if meta.permissions().readonly() {
            "readonly".to_string()
        } else {
            "readwrite".to_string()
        }
    }
}

fn launch_opener(path: &Path) -> Result<(), ExecError> {
    let program = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(windows) {
        "explorer"
    } else {
        "xdg-open"
    };
    spawn_detached(program, path).map(|_| ())
}

/// Start `program` without waiting on it. A background task reaps the child
/// so finished openers do not linger as zombies.
fn spawn_detached(
    program: &str,
    arg: &Path,
) -> Result<tokio::task::JoinHandle<Option<std::process::ExitStatus>>, ExecError> {
    let mut child = tokio::process::Command::new(program)
        .arg(arg)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(ExecError::io("launch the desktop opener"))?;

    let program = program.to_string();
    Ok(tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => {
                debug!("{} exited with {}", program, status);
                Some(status)
            }
            Err(e) => {
                debug!("Failed to wait for {}: {}", program, e);
                None
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn braces_expand() {
        assert_eq!(expand_braces("*.txt").unwrap(), vec!["*.txt"]);
        assert_eq!(expand_braces("*.{jpg,png}").unwrap(), vec!["*.jpg", "*.png"]);
        assert_eq!(
            expand_braces("{a,b{1,2}}.md").unwrap(),
            vec!["a.md", "b1.md", "b2.md"]
        );
        assert_eq!(expand_braces("broken{x").unwrap(), vec!["broken{x"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn detached_children_are_reaped() {
        let reaper = spawn_detached("true", Path::new(".")).unwrap();
        let status = reaper.await.unwrap().expect("child was waited on");
        assert!(status.success());

        assert!(matches!(
            spawn_detached("/nonexistent/opener", Path::new(".")),
            Err(ExecError::Io { .. })
        ));
    }

    #[test]
    fn brace_expansion_is_capped() {
        // 2^6 = 64 is the most allowed
        let six = "{a,b}".repeat(6);
        assert_eq!(expand_braces(&six).unwrap().len(), MAX_BRACE_ALTERNATIVES);

        let seven = "{a,b}".repeat(7);
        assert!(matches!(expand_braces(&seven), Err(ExecError::InvalidInput(_))));

        let twenty = format!("{}.txt", "{a,b}".repeat(20));
        assert!(matches!(expand_braces(&twenty), Err(ExecError::InvalidInput(_))));

        let wide = format!("{{{}}}", (0..100).map(|i| i.to_string()).collect::<Vec<_>>().join(","));
        assert!(expand_braces(&wide).is_err());
    }

    #[test]
    fn patterns_cannot_climb() {
        assert!(check_pattern("*.pdf").is_ok());
        assert!(check_pattern("../*").is_err());
        assert!(check_pattern("sub/*.txt").is_err());
    }

    #[test]
    fn recursive_glob_respects_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("a/b")).unwrap();
        for i in 0..5 {
            fs::write(root.join(format!("a/b/f{i}.txt")), "x").unwrap();
        }
        fs::write(root.join("top.txt"), "x").unwrap();

        let guard = PathGuard::with_home(&root, &root).unwrap();
        let all = collect_matches(&guard, &root, "*.txt", true, 100).unwrap();
        assert_eq!(all.len(), 6);
        let some = collect_matches(&guard, &root, "*.txt", true, 3).unwrap();
        assert_eq!(some.len(), 3);

        let flat = collect_matches(&guard, &root, "*.{txt,md}", false, usize::MAX).unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].name, "top.txt");
    }
}
