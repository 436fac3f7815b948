//! Confinement and classification for everything a request may touch.

pub mod command;
pub mod defaults;
pub mod path;
pub mod script;

pub use command::{needs_shell, CommandGate, CommandSpec, Denial, Verdict};
pub use path::{NormalizedPath, PathDenied, PathGuard};
pub use script::{scan_script, ScriptSafety};
