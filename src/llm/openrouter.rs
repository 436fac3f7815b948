//! OpenRouter provider (OpenAI-compatible `chat/completions`).
//!
//! Streaming requests get server-sent events: `data: {json}` lines with a
//! `choices[0].delta.content` fragment, comment lines starting with `:`,
//! and a final `data: [DONE]`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{body_lines, LlmError, LlmProvider, TokenStream};
use crate::config::OpenRouterConfig;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<ChoiceMessage>,
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, LlmError> {
    let Some(data) = line.strip_prefix("data:") else {
        // comments, blank separators and `event:` fields
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    let chunk: StreamChunk = serde_json::from_str(data)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|c| !c.is_empty())
        .map(SseLine::Token)
        .unwrap_or(SseLine::Skip))
}

pub struct OpenRouterProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenRouterProvider {
    pub fn new(config: &OpenRouterConfig) -> Result<Self, LlmError> {
        let api_key = config.resolved_api_key();
        if api_key.is_empty() || api_key.starts_with('$') {
            return Err(LlmError::ConfigError(format!(
                "OpenRouter API key is missing ({} is not set)",
                config.api_key.trim()
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> String {
        format!("openrouter ({})", self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        let response = self.send(prompt, max_tokens, false).await?;
        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    async fn generate_stream(&self, prompt: &str, max_tokens: u32) -> Result<TokenStream, LlmError> {
        let mut lines = body_lines(self.send(prompt, max_tokens, true).await?);
        let tokens = async_stream::stream! {
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                match parse_sse_line(&line) {
                    Ok(SseLine::Token(token)) => {
                        yield Ok(token);
                    }
                    Ok(SseLine::Done) => break,
                    Ok(SseLine::Skip) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        };
        Ok(tokens.boxed())
    }
}

impl OpenRouterProvider {
    async fn send(
        &self,
        prompt: &str,
        max_tokens: u32,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            stream,
        };

        debug!(
            "Calling OpenRouter ({}) with {} prompt chars, stream={}",
            self.model,
            prompt.len(),
            stream
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "LIA")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), body));
        }
        Ok(response)
    }
}
