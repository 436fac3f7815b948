//! Text-generation backends.
//!
//! Providers expose a prompt-in, text-out call. Intent resolution, chat
//! answers, file content and fallback scripts all go through it; the
//! token-streaming chat endpoint uses the streaming variant.

mod error;
mod ollama;
mod openrouter;
mod static_reply;

pub use error::LlmError;
pub use ollama::OllamaProvider;
pub use openrouter::OpenRouterProvider;
pub use static_reply::StaticProvider;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

use crate::config::ProvidersConfig;

/// Default completion budget for a single call.
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Text fragments in the order the backend produced them.
pub type TokenStream = BoxStream<'static, Result<String, LlmError>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider and model, e.g. `"ollama (llama3)"`.
    fn name(&self) -> String;

    /// Model identifier sent to the backend.
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError>;

    /// Stream the completion. Backends without streaming yield the whole
    /// reply as one fragment.
    async fn generate_stream(&self, prompt: &str, max_tokens: u32) -> Result<TokenStream, LlmError> {
        let text = self.generate(prompt, max_tokens).await?;
        Ok(futures::stream::iter([Ok::<_, LlmError>(text)]).boxed())
    }
}

/// Split a response body into lines, for NDJSON and SSE bodies.
pub(crate) fn body_lines(response: reqwest::Response) -> TokenStream {
    let lines = async_stream::stream! {
        let mut body = Box::pin(response.bytes_stream());
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    buf.extend_from_slice(&bytes);
                    for line in take_lines(&mut buf) {
                        yield Ok(line);
                    }
                }
                Err(e) => {
                    yield Err(LlmError::from(e));
                    return;
                }
            }
        }
        if !buf.is_empty() {
            yield Ok(String::from_utf8_lossy(&buf).trim_end().to_string());
        }
    };
    lines.boxed()
}

/// Drain every complete line from `buf`, leaving a trailing partial line.
fn take_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
    }
    lines
}

/// Local and general providers. General falls back to local when no
/// hosted provider is configured.
pub fn build_providers(
    config: &ProvidersConfig,
) -> Result<(Arc<dyn LlmProvider>, Arc<dyn LlmProvider>), LlmError> {
    let local: Arc<dyn LlmProvider> = Arc::new(OllamaProvider::new(&config.ollama)?);
    let general: Arc<dyn LlmProvider> = match &config.openrouter {
        Some(openrouter) => Arc::new(OpenRouterProvider::new(openrouter)?),
        None => {
            tracing::debug!("No general provider configured; general mode uses the local model");
            local.clone()
        }
    };
    Ok((local, general))
}
