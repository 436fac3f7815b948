//! HTTP server for LIA
//!
//! Every request goes through the shared [`Pipeline`]; rate limits are
//! keyed by endpoint group and client IP.

use anyhow::Result;
use axum::{
    extract::{ConnectInfo, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::admission::RateLimited;
use crate::config::Config;
use crate::intent::{param, CommandResult, CommandType, ResolutionMode};
use crate::llm::DEFAULT_MAX_TOKENS;
use crate::pipeline::{Pipeline, Resolved};

/// How often idle rate-limit buckets are dropped.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct Server {
    config: Config,
    pipeline: Arc<Pipeline>,
}

struct AppState {
    config: Config,
    pipeline: Arc<Pipeline>,
}

impl Server {
    pub fn new(config: &Config) -> Result<Self> {
        let pipeline = Arc::new(Pipeline::new(config)?);
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: &Config, pipeline: Arc<Pipeline>) -> Self {
        Self {
            config: config.clone(),
            pipeline,
        }
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            pipeline: self.pipeline.clone(),
        });

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/", get(root))
            .route("/health", get(health_check))
            .route("/api/chat", post(chat))
            .route("/api/chat/stream", post(chat_stream))
            .route("/api/chat/stream/v2", post(chat_stream_tokens))
            .route("/api/generate", post(generate))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    pub async fn run(&self) -> Result<()> {
        // Spawn rate-limit sweep task
        let sweep_pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = sweep_pipeline.admission().sweep();
                if removed > 0 {
                    debug!("Dropped {} idle rate-limit buckets", removed);
                }
            }
        });

        let app = self.router();

        let addr: SocketAddr =
            format!("{}:{}", self.config.server.bind, self.config.server.port).parse()?;

        info!("Starting HTTP server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}

// Error response type
struct AppError(StatusCode, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "detail": self.1 }))).into_response()
    }
}

fn too_many_requests(err: RateLimited) -> Response {
    warn!("{}", err);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(
            header::RETRY_AFTER,
            err.retry_after.as_secs().max(1).to_string(),
        )],
        Json(json!({ "detail": "Too many requests, please slow down." })),
    )
        .into_response()
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": "Local Intelligent Agent (LIA)",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let providers = &state.config.providers;
    Json(json!({
        "status": "healthy",
        "local_model": {
            "provider": "Ollama",
            "host": providers.ollama.host,
            "model": state.pipeline.provider(ResolutionMode::Local).model(),
        },
        "general_model": {
            "provider": if providers.openrouter.is_some() { "OpenRouter" } else { "Ollama" },
            "model": state.pipeline.provider(ResolutionMode::General).model(),
            "configured": providers.openrouter.is_some(),
        },
    }))
}

#[derive(Deserialize)]
struct UserRequest {
    message: String,
    #[serde(default)]
    mode: ResolutionMode,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
    timestamp: String,
    command_result: Option<CommandResult>,
}

impl ChatMessage {
    fn assistant(result: CommandResult) -> Self {
        Self {
            role: "assistant",
            content: result.message.clone(),
            timestamp: chrono::Local::now().to_rfc3339(),
            command_result: Some(result),
        }
    }
}

// Chat endpoint
async fn chat(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<UserRequest>,
) -> Response {
    if request.message.trim().is_empty() {
        return AppError(StatusCode::BAD_REQUEST, "Message cannot be empty".into()).into_response();
    }

    let client = addr.ip().to_string();
    match state
        .pipeline
        .handle(&request.message, request.mode, "chat", &client)
        .await
    {
        Ok(result) => Json(ChatMessage::assistant(result)).into_response(),
        Err(limited) => too_many_requests(limited),
    }
}

fn sse_data(value: serde_json::Value) -> Result<Event, Infallible> {
    Ok(Event::default().data(value.to_string()))
}

fn intent_event(resolved: &Resolved) -> Result<Event, Infallible> {
    sse_data(json!({
        "type": "intent",
        "data": {
            "command_type": resolved.intent.command_type,
            "reasoning": resolved.intent.reasoning,
            "cached": resolved.cached,
        }
    }))
}

// Streaming chat endpoint (SSE): status, intent, result, done
async fn chat_stream(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<UserRequest>,
) -> Response {
    let client = addr.ip().to_string();
    let pipeline = state.pipeline.clone();
    let span = info_span!("request", id = %Uuid::new_v4(), mode = %request.mode);

    let stream = async_stream::stream! {
        if let Err(limited) = pipeline.admit("stream", &client) {
            span.in_scope(|| warn!("{}", limited));
            yield sse_data(json!({"type": "error", "message": "Too many requests"}));
            return;
        }
        if request.message.trim().is_empty() {
            yield sse_data(json!({"type": "error", "message": "Message cannot be empty"}));
            return;
        }

        yield sse_data(json!({"type": "status", "message": "Processing..."}));

        let resolved = pipeline
            .resolve(&request.message, request.mode)
            .instrument(span.clone())
            .await;
        yield intent_event(&resolved);

        let result = pipeline
            .execute(&resolved.intent, request.mode)
            .instrument(span.clone())
            .await;
        span.in_scope(|| {
            info!(
                "Finished {}: success={} fallback={}",
                result.command_type, result.success, result.fallback_used
            )
        });
        yield sse_data(json!({"type": "result", "data": ChatMessage::assistant(result)}));

        yield sse_data(json!({"type": "done"}));
    };

    Sse::new(stream).into_response()
}

// Token streaming endpoint (SSE): chat answers arrive as `token` events,
// every other intent as a single `result`
async fn chat_stream_tokens(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<UserRequest>,
) -> Response {
    let client = addr.ip().to_string();
    let pipeline = state.pipeline.clone();
    let span = info_span!("request", id = %Uuid::new_v4(), mode = %request.mode);

    let stream = async_stream::stream! {
        if let Err(limited) = pipeline.admit("streamv2", &client) {
            span.in_scope(|| warn!("{}", limited));
            yield sse_data(json!({"type": "error", "message": "Too many requests"}));
            return;
        }
        if request.message.trim().is_empty() {
            yield sse_data(json!({"type": "error", "message": "Message cannot be empty"}));
            return;
        }

        yield sse_data(json!({"type": "status", "message": "Processing..."}));

        let resolved = pipeline
            .resolve(&request.message, request.mode)
            .instrument(span.clone())
            .await;
        yield intent_event(&resolved);

        if resolved.intent.command_type == CommandType::Chat {
            let question = param(&resolved.intent.parameters.question)
                .unwrap_or(request.message.as_str())
                .to_string();
            let tokens = pipeline
                .chat_tokens(&question, request.mode)
                .instrument(span.clone())
                .await;
            let mut tokens = match tokens {
                Ok(tokens) => tokens,
                Err(e) => {
                    span.in_scope(|| error!("Chat stream failed: {}", e));
                    yield sse_data(json!({"type": "error", "message": e.to_string()}));
                    return;
                }
            };
            while let Some(token) = tokens.next().instrument(span.clone()).await {
                match token {
                    Ok(content) => {
                        yield sse_data(json!({"type": "token", "content": content}));
                    }
                    Err(e) => {
                        span.in_scope(|| error!("Chat stream failed: {}", e));
                        yield sse_data(json!({"type": "error", "message": e.to_string()}));
                        return;
                    }
                }
            }
        } else {
            let result = pipeline
                .execute(&resolved.intent, request.mode)
                .instrument(span.clone())
                .await;
            span.in_scope(|| {
                info!(
                    "Finished {}: success={} fallback={}",
                    result.command_type, result.success, result.fallback_used
                )
            });
            yield sse_data(json!({"type": "result", "data": ChatMessage::assistant(result)}));
        }

        yield sse_data(json!({"type": "done"}));
    };

    Sse::new(stream).into_response()
}

// Raw content generation with the local model
async fn generate(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<UserRequest>,
) -> Response {
    let client = addr.ip().to_string();
    if let Err(limited) = state.pipeline.admit("gen", &client) {
        return too_many_requests(limited);
    }

    let provider = state.pipeline.provider(ResolutionMode::Local);
    match provider.generate(&request.message, DEFAULT_MAX_TOKENS).await {
        Ok(content) => Json(json!({ "success": true, "content": content })).into_response(),
        Err(e) => {
            error!("Content generation failed: {}", e);
            let status = if e.is_rate_limit() {
                StatusCode::TOO_MANY_REQUESTS
            } else {
                StatusCode::BAD_GATEWAY
            };
            AppError(status, e.to_string()).into_response()
        }
    }
}
