//! The request path shared by the HTTP service and the CLI:
//! admit, resolve the intent (cached), execute.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::admission::{AdmissionControl, RateLimited};
use crate::config::{AdmissionConfig, Config};
use crate::executor::CommandExecutor;
use crate::intent::{resolve_intent, CommandIntent, CommandResult, ResolutionMode};
use crate::llm::{build_providers, LlmError, LlmProvider, TokenStream};

/// An intent and whether it came from the cache.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub intent: CommandIntent,
    pub cached: bool,
}

pub struct Pipeline {
    local: CommandExecutor,
    general: CommandExecutor,
    admission: AdmissionControl,
}

impl Pipeline {
    pub fn new(config: &Config) -> Result<Self> {
        let (local, general) =
            build_providers(&config.providers).context("Failed to set up model providers")?;
        Self::with_providers(config, local, general)
    }

    pub fn with_providers(
        config: &Config,
        local: Arc<dyn LlmProvider>,
        general: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        let executor = CommandExecutor::new(config, local)?;
        Ok(Self::from_executor(executor, general, &config.admission))
    }

    /// `executor` serves local mode; general mode shares its guard, gate and
    /// sandbox with `general` as the model.
    pub fn from_executor(
        executor: CommandExecutor,
        general: Arc<dyn LlmProvider>,
        admission: &AdmissionConfig,
    ) -> Self {
        Self {
            general: executor.with_provider(general),
            local: executor,
            admission: AdmissionControl::new(admission),
        }
    }

    pub fn executor(&self, mode: ResolutionMode) -> &CommandExecutor {
        match mode {
            ResolutionMode::Local => &self.local,
            ResolutionMode::General => &self.general,
        }
    }

    pub fn provider(&self, mode: ResolutionMode) -> &Arc<dyn LlmProvider> {
        self.executor(mode).provider()
    }

    pub fn admission(&self) -> &AdmissionControl {
        &self.admission
    }

    pub fn admit(&self, group: &str, client: &str) -> Result<(), RateLimited> {
        self.admission.admit(group, client)
    }

    pub async fn resolve(&self, message: &str, mode: ResolutionMode) -> Resolved {
        if let Some(intent) = self.admission.cache().get(mode, message) {
            debug!("Intent cache hit: {}", intent.command_type);
            return Resolved {
                intent,
                cached: true,
            };
        }

        let provider = self.provider(mode);
        let intent = resolve_intent(provider.as_ref(), message).await;
        self.admission.cache().insert(mode, message, intent.clone());
        Resolved {
            intent,
            cached: false,
        }
    }

    pub async fn execute(&self, intent: &CommandIntent, mode: ResolutionMode) -> CommandResult {
        self.executor(mode).execute(intent).await
    }

    pub async fn chat_tokens(&self, question: &str, mode: ResolutionMode) -> Result<TokenStream, LlmError> {
        self.executor(mode).chat_stream(question).await
    }

    /// Resolve and execute without admission control (CLI use).
    pub async fn run(&self, message: &str, mode: ResolutionMode) -> CommandResult {
        let span = info_span!("request", id = %Uuid::new_v4(), mode = %mode);
        async {
            let resolved = self.resolve(message, mode).await;
            info!(
                "Intent {} (cached: {})",
                resolved.intent.command_type, resolved.cached
            );
            let result = self.execute(&resolved.intent, mode).await;
            info!(
                "Finished {}: success={} fallback={}",
                result.command_type, result.success, result.fallback_used
            );
            result
        }
        .instrument(span)
        .await
    }

    pub async fn handle(
        &self,
        message: &str,
        mode: ResolutionMode,
        group: &str,
        client: &str,
    ) -> Result<CommandResult, RateLimited> {
        self.admit(group, client)?;
        Ok(self.run(message, mode).await)
    }
}
