use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use super::{LlmError, LlmProvider, TokenStream};

/// Offline provider that answers from a fixed script of replies.
///
/// Replies are handed out in order; the last one repeats forever. Every
/// prompt is recorded so callers can inspect what was asked. Streaming
/// hands out the next reply one word at a time.
pub struct StaticProvider {
    replies: Mutex<VecDeque<String>>,
    last: String,
    prompts: Mutex<Vec<String>>,
}

impl StaticProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self::sequence(vec![reply.into()])
    }

    pub fn sequence(replies: Vec<String>) -> Self {
        let last = replies.last().cloned().unwrap_or_default();
        Self {
            replies: Mutex::new(replies.into()),
            last,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LlmProvider for StaticProvider {
    fn name(&self) -> String {
        "static".to_string()
    }

    fn model(&self) -> &str {
        "static"
    }

    async fn generate(&self, prompt: &str, _max_tokens: u32) -> Result<String, LlmError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());

        let next = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(reply) => Ok(reply),
            None if self.last.is_empty() => Err(LlmError::EmptyResponse),
            None => Ok(self.last.clone()),
        }
    }

    async fn generate_stream(&self, prompt: &str, max_tokens: u32) -> Result<TokenStream, LlmError> {
        let reply = self.generate(prompt, max_tokens).await?;
        let words: Vec<Result<String, LlmError>> = reply
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(futures::stream::iter(words).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_in_order_then_repeats_last() {
        let provider = StaticProvider::sequence(vec!["one".into(), "two".into()]);
        assert_eq!(provider.generate("a", 10).await.unwrap(), "one");
        assert_eq!(provider.generate("b", 10).await.unwrap(), "two");
        assert_eq!(provider.generate("c", 10).await.unwrap(), "two");
        assert_eq!(provider.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn streams_reply_word_by_word() {
        let provider = StaticProvider::new("Rust is fast.");
        let tokens: Vec<String> = provider
            .generate_stream("q", 10)
            .await
            .unwrap()
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["Rust ", "is ", "fast."]);
        assert_eq!(provider.prompts(), vec!["q"]);
    }
}
