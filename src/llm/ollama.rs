//! Ollama provider.
//!
//! Calls `POST {host}/api/generate`. With `stream: false` the reply is one
//! JSON object; with `stream: true` it is one JSON object per line, each
//! carrying a `response` fragment until `done`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{body_lines, LlmError, LlmProvider, TokenStream};
use crate::config::OllamaConfig;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

pub struct OllamaProvider {
    client: Client,
    host: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(config: &OllamaConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> String {
        format!("ollama ({})", self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        let response = self.send(prompt, max_tokens, false).await?;
        let body: GenerateResponse = response.json().await?;
        if body.response.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(body.response)
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
                match parse_stream_line(&line) {
                    Ok(Some(chunk)) => {
                        if !chunk.response.is_empty() {
                            yield Ok(chunk.response);
                        }
                        if chunk.done {
                            break;
                        }
                    }
                    Ok(None) => {}
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

impl OllamaProvider {
    async fn send(
        &self,
        prompt: &str,
        max_tokens: u32,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/api/generate", self.host);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream,
            options: GenerateOptions {
                num_predict: max_tokens,
            },
        };

        debug!(
            "Calling Ollama ({}) with {} prompt chars, stream={}",
            self.model,
            prompt.len(),
            stream
        );

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), body));
        }
        Ok(response)
    }
}

fn parse_stream_line(line: &str) -> Result<Option<GenerateResponse>, LlmError> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}
