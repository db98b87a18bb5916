use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tracing::info;

use crate::analyzer::SentimentAnalyzer;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::prompts::PromptEngine;
use crate::provider::{LlmProvider, OpenAiProvider};
use crate::record::{AgentKind, AnalyzerParams, ProductCategory};
use crate::rpc::{self, CardFile, RpcRequest, RpcResponse};

pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Immutable per-service state. The analyzer itself is built per request so
/// metadata can pick category and token budget; requests share nothing
/// mutable.
pub struct AgentServiceState<P> {
    pub kind: AgentKind,
    pub provider: Arc<P>,
    pub prompt_engine: Arc<PromptEngine>,
    pub default_category: ProductCategory,
    pub default_max_tokens: u32,
    pub model_name: Option<String>,
    pub card_path: PathBuf,
}

impl<P> Clone for AgentServiceState<P> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            provider: Arc::clone(&self.provider),
            prompt_engine: Arc::clone(&self.prompt_engine),
            default_category: self.default_category,
            default_max_tokens: self.default_max_tokens,
            model_name: self.model_name.clone(),
            card_path: self.card_path.clone(),
        }
    }
}

pub fn router<P: LlmProvider + 'static>(state: AgentServiceState<P>) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler::<P>))
        .route("/health", get(health_handler::<P>))
        .route("/.well-known/agent.json", get(card_handler::<P>))
        .with_state(state)
}

async fn rpc_handler<P: LlmProvider + 'static>(
    State(state): State<AgentServiceState<P>>,
    Json(req): Json<RpcRequest>,
) -> Json<RpcResponse> {
    if let Some(error) = rpc::validate(&req) {
        return Json(error);
    }

    // Safe after validation, but never panic on a request path.
    let text = match req.params.message.as_ref().map(rpc::extract_text) {
        Some(Ok(text)) => text,
        _ => {
            return Json(rpc::error_response(
                &req.id,
                rpc::INVALID_PARAMS,
                "Invalid message format",
            ));
        }
    };

    let metadata = &req.params.metadata;
    let product_category = metadata
        .get("product_category")
        .and_then(Value::as_str)
        .map(ProductCategory::parse)
        .unwrap_or(state.default_category);
    let max_tokens = metadata
        .get("max_tokens")
        .and_then(Value::as_u64)
        .map(|raw| raw as u32)
        .unwrap_or(state.default_max_tokens);

    info!(
        "[sentimesh:service] {} analyzing ({product_category}, {max_tokens} tokens)",
        state.kind
    );

    let analyzer = match SentimentAnalyzer::new(
        state.kind,
        Arc::clone(&state.provider),
        AnalyzerParams {
            product_category,
            max_tokens,
            model_name: state.model_name.clone(),
            ..AnalyzerParams::default()
        },
        &state.prompt_engine,
    ) {
        Ok(analyzer) => analyzer,
        Err(e) => {
            return Json(rpc::error_response(
                &req.id,
                rpc::INTERNAL_ERROR,
                format!("{} agent setup failed: {e}", state.kind),
            ));
        }
    };

    // Analyzer failures come back as fallback records, never RPC errors:
    // the caller's workflow must stay progressable.
    let record = analyzer.analyze(&text).await;

    let output_text = match serde_json::to_string_pretty(&record) {
        Ok(output) => output,
        Err(e) => {
            return Json(rpc::error_response(
                &req.id,
                rpc::INTERNAL_ERROR,
                format!("failed to serialize record: {e}"),
            ));
        }
    };

    let task_id = req.params.id.clone();
    let session_id = task_id.as_deref().map(|id| {
        let prefix: String = id.chars().take(8).collect();
        format!("{}-session-{prefix}", state.kind)
    });

    Json(rpc::a2a_response(
        &req.id,
        task_id,
        output_text,
        session_id,
        serde_json::json!({
            "agent_type": state.kind.as_str(),
            "product_category": product_category.as_str(),
            "max_tokens": max_tokens,
            "sentiment": record.sentiment.as_str(),
            "confidence": record.confidence,
        }),
    ))
}

async fn health_handler<P: LlmProvider + 'static>(
    State(state): State<AgentServiceState<P>>,
) -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "agent": state.kind.as_str(),
        "version": SERVICE_VERSION,
    }))
}

async fn card_handler<P: LlmProvider + 'static>(
    State(state): State<AgentServiceState<P>>,
) -> Response {
    match rpc::load_card(&state.card_path) {
        CardFile::Loaded(card) => (StatusCode::OK, Json(card)).into_response(),
        CardFile::Missing => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"detail": "Agent card not found"})),
        )
            .into_response(),
        CardFile::Malformed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"detail": "Invalid agent card format"})),
        )
            .into_response(),
    }
}

/// Run one department agent service until ctrl-c.
pub async fn serve_agent(config: &Config, kind: AgentKind, port: u16) -> Result<()> {
    let provider = Arc::new(OpenAiProvider::from_env(
        &config.api_key_env,
        config.model_name.clone(),
    )?);
    let state = AgentServiceState {
        kind,
        provider,
        prompt_engine: Arc::new(PromptEngine::new(config.prompts_dir.clone())),
        default_category: config.product_category,
        default_max_tokens: config.max_tokens_per_agent,
        model_name: None,
        card_path: config.card_path(kind.as_str()),
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| Error::Supervisor(format!("failed to bind port {port}: {e}")))?;
    info!("[sentimesh:service] {kind} agent listening on port {port}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Supervisor(format!("{kind} agent server error: {e}")))
}

pub(crate) async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("[sentimesh:service] shutdown signal received");
}
