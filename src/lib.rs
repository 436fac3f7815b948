//! LIA: a local assistant that turns natural-language requests into
//! confined filesystem operations and sandboxed command execution.

pub mod admission;
pub mod config;
pub mod executor;
pub mod fallback;
pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod sandbox;
pub mod security;
pub mod server;

pub use config::Config;
pub use pipeline::Pipeline;
