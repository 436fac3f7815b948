use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use super::defaults::FOLDER_ALIASES;

/// A path was rejected because it resolves outside the allowed root.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Path access denied: {input} is outside the allowed directory")]
pub struct PathDenied {
    pub input: String,
}

/// Canonical absolute path that is known to lie at or below the allowed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath(PathBuf);

impl NormalizedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for NormalizedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Resolves user-supplied path strings and confines them to a single root.
///
/// Resolution order:
/// 1. Folder aliases (`downloads`, `documents`, ...) for separator-free input
/// 2. Leading `~` expansion against the home directory
/// 3. Relative input is joined onto the allowed root
///
/// Symlinks are resolved by the OS for the longest existing prefix; the
/// non-existing tail is applied lexically. The guard never touches the
/// filesystem beyond metadata lookups.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    home: PathBuf,
}

impl PathGuard {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let home = directories::BaseDirs::new()
            .map(|b| b.home_dir().to_path_buf())
            .unwrap_or_else(|| root.as_ref().to_path_buf());
        Self::with_home(root, home)
    }

    /// Build a guard with an explicit home directory for alias and `~` expansion.
    pub fn with_home(root: impl AsRef<Path>, home: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("allowed root is not a directory: {}", root.display()),
            ));
        }
        Ok(Self {
            root,
            home: home.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn is_root(&self, path: &NormalizedPath) -> bool {
        path.as_path() == self.root
    }

    /// Map a bare folder alias to its location under the home directory.
    pub fn alias(&self, name: &str) -> Option<PathBuf> {
        let lower = name.trim().to_lowercase();
        FOLDER_ALIASES
            .iter()
            .find(|(alias, _)| *alias == lower)
            .map(|(_, dir)| {
                if dir.is_empty() {
                    self.home.clone()
                } else {
                    self.home.join(dir)
                }
            })
    }

    pub fn normalize(&self, raw: &str) -> Result<NormalizedPath, PathDenied> {
        let denied = || PathDenied {
            input: raw.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(denied());
        }

        let expanded = self.expand(trimmed);
        let resolved = resolve(&expanded).ok_or_else(denied)?;

        if resolved.starts_with(&self.root) {
            Ok(NormalizedPath(resolved))
        } else {
            tracing::warn!("Path denied: {} resolved to {}", raw, resolved.display());
            Err(denied())
        }
    }

    fn expand(&self, input: &str) -> PathBuf {
        let has_separator = input.contains('/') || input.contains('\\');
        if !has_separator {
            if let Some(aliased) = self.alias(input) {
                return aliased;
            }
        }

        let path = if input.starts_with('~') {
            let home = self.home.to_string_lossy().into_owned();
            PathBuf::from(shellexpand::tilde_with_context(input, || Some(home.as_str())).into_owned())
        } else {
            PathBuf::from(input)
        };

        if path.is_absolute() {
            path
        } else {
            self.root.join(path)
        }
    }
}

/// Canonicalize the deepest existing ancestor, then replay the rest lexically.
/// Returns `None` when an existing entry cannot be canonicalized (dangling or
/// looping symlinks) or cannot be inspected.
fn resolve(abs: &Path) -> Option<PathBuf> {
    let mut existing = abs;
    loop {
        match existing.symlink_metadata() {
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                existing = existing.parent()?;
            }
            Err(_) => return None,
        }
    }

    let mut resolved = existing.canonicalize().ok()?;
    let tail = abs.strip_prefix(existing).ok()?;

    for component in tail.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn guard_in(dir: &Path) -> PathGuard {
        PathGuard::with_home(dir, dir.to_path_buf()).unwrap()
    }

    #[test]
    fn accepts_existing_and_missing_paths_inside_root() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), "x").unwrap();
        let guard = guard_in(tmp.path());
        let root = tmp.path().canonicalize().unwrap();

        let existing = guard.normalize("a.txt").unwrap();
        assert_eq!(existing.as_path(), root.join("a.txt"));

        let missing = guard.normalize("sub/dir/new.txt").unwrap();
        assert_eq!(missing.as_path(), root.join("sub/dir/new.txt"));
        assert!(!root.join("sub").exists());
    }

    #[test]
    fn parent_traversal_is_denied() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().join("home");
        fs::create_dir(&home).unwrap();
        let guard = PathGuard::with_home(&home, home.clone()).unwrap();

        let err = guard.normalize("../../etc/passwd").unwrap_err();
        assert_eq!(err.input, "../../etc/passwd");
        assert!(guard.normalize("missing/../../outside").is_err());
        assert!(guard.normalize("inner/../still-inside").is_ok());
    }

    #[test]
    fn absolute_path_outside_root_is_denied() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::write(tmp.path().join("secret.txt"), "s").unwrap();
        let guard = guard_in(&root);

        let outside = tmp.path().join("secret.txt");
        assert!(guard.normalize(&outside.to_string_lossy()).is_err());
    }

    #[test]
    fn root_itself_is_allowed() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = guard_in(tmp.path());
        let root = guard.normalize(".").unwrap();
        assert!(guard.is_root(&root));
        assert!(guard.normalize("~").is_ok());
    }

    #[test]
    fn aliases_expand_case_insensitively() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("Documents")).unwrap();
        let guard = guard_in(tmp.path());
        let root = tmp.path().canonicalize().unwrap();

        assert_eq!(
            guard.normalize("DOCUMENTS").unwrap().as_path(),
            root.join("Documents")
        );
        assert_eq!(
            guard.normalize("downloads").unwrap().as_path(),
            root.join("Downloads")
        );
        // an alias word inside a path is just a directory name
        assert_eq!(
            guard.normalize("x/documents").unwrap().as_path(),
            root.join("x/documents")
        );
    }

    #[test]
    fn tilde_expands_to_home() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("notes.txt"), "1 2 3").unwrap();
        let guard = guard_in(tmp.path());
        let root = tmp.path().canonicalize().unwrap();

        assert_eq!(
            guard.normalize("~/notes.txt").unwrap().as_path(),
            root.join("notes.txt")
        );
    }

    #[test]
    fn tilde_uses_the_configured_home() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let home = root.join("home");
        fs::create_dir(&home).unwrap();
        let guard = PathGuard::with_home(&root, home.clone()).unwrap();

        assert_eq!(guard.normalize("~").unwrap().as_path(), home);
        assert_eq!(
            guard.normalize("~/drafts/a.txt").unwrap().as_path(),
            home.join("drafts/a.txt")
        );
        // a home outside the root is still fenced
        let outside = PathGuard::with_home(&home, root.clone()).unwrap();
        assert!(outside.normalize("~/a.txt").is_err());
    }

    #[test]
    fn empty_input_is_denied() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = guard_in(tmp.path());
        assert!(guard.normalize("   ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_denied() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let outside = tmp.path().join("outside");
        fs::create_dir(&root).unwrap();
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();
        let guard = guard_in(&root);

        assert!(guard.normalize("link/secret.txt").is_err());
        assert!(guard.normalize("link/new.txt").is_err());
        assert!(guard.normalize("link").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_denied() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir(&root).unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", root.join("dangling")).unwrap();
        let guard = guard_in(&root);

        assert!(guard.normalize("dangling").is_err());
        assert!(guard.normalize("dangling/child").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_inside_root_is_followed() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        fs::create_dir(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();
        let guard = guard_in(&root);

        assert_eq!(
            guard.normalize("alias/file.txt").unwrap().as_path(),
            root.join("real/file.txt")
        );
    }
}
