use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tracing::{info, warn};

use crate::client::A2aClient;
use crate::config::{Config, CoordinationMode};
use crate::error::{Error, Result};
use crate::executor::{A2aExecutor, InProcessExecutor};
use crate::prompts::PromptEngine;
use crate::provider::{LlmProvider, OpenAiProvider};
use crate::record::{AgentKind, ProductCategory};
use crate::rpc::{self, CardFile, RpcRequest, RpcResponse};
use crate::scrape::{self, ReviewScraper};
use crate::workflow::{RunSettings, WorkflowEngine, WorkflowReport};

pub struct CoordinatorState<P> {
    pub config: Arc<Config>,
    pub provider: Arc<P>,
    pub prompt_engine: Arc<PromptEngine>,
    pub scraper: Option<Arc<dyn ReviewScraper>>,
    pub card_path: PathBuf,
}

impl<P> Clone for CoordinatorState<P> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            provider: Arc::clone(&self.provider),
            prompt_engine: Arc::clone(&self.prompt_engine),
            scraper: self.scraper.clone(),
            card_path: self.card_path.clone(),
        }
    }
}

/// Per-request configuration pulled from task metadata over config defaults.
/// Unknown metadata keys are ignored here, at the boundary.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub settings: RunSettings,
    pub agent_types: Vec<AgentKind>,
    pub scrape: ScrapeRequest,
}

#[derive(Debug, Clone, Default)]
pub struct ScrapeRequest {
    pub enabled: bool,
    pub product_name: Option<String>,
    pub sources: Vec<String>,
    pub max_items_per_source: u32,
}

/// Resolve task metadata against config defaults. An unknown agent type is
/// a configuration error the workflow cannot absorb.
pub fn task_settings(config: &Config, metadata: &Value) -> Result<TaskSettings> {
    let agent_types = match metadata.get("agent_types").and_then(Value::as_array) {
        Some(raw) => {
            let mut kinds = Vec::with_capacity(raw.len());
            for tag in raw {
                let tag = tag.as_str().unwrap_or_default();
                let kind = AgentKind::parse(tag)
                    .filter(AgentKind::is_department)
                    .ok_or_else(|| Error::Workflow(format!("unknown agent type: {tag}")))?;
                kinds.push(kind);
            }
            if kinds.is_empty() {
                return Err(Error::Workflow("agent_types must not be empty".to_string()));
            }
            kinds
        }
        None => config.agent_types.clone(),
    };

    let settings = RunSettings {
        product_category: metadata
            .get("product_category")
            .and_then(Value::as_str)
            .map(ProductCategory::parse)
            .unwrap_or(config.product_category),
        max_tokens_per_agent: read_u32(metadata, "max_tokens_per_agent")
            .unwrap_or(config.max_tokens_per_agent),
        max_tokens_master: read_u32(metadata, "max_tokens_master")
            .unwrap_or(config.max_tokens_master),
        max_tokens_advisor: read_u32(metadata, "max_tokens_advisor")
            .unwrap_or(config.max_tokens_advisor),
        max_discussion_rounds: read_u32(metadata, "max_discussion_rounds")
            .unwrap_or(config.max_discussion_rounds),
        disagreement_threshold: metadata
            .get("disagreement_threshold")
            .and_then(Value::as_f64)
            .filter(|t| (0.0..=1.0).contains(t))
            .unwrap_or(config.disagreement_threshold),
        enable_consensus_debate: metadata
            .get("enable_consensus_debate")
            .and_then(Value::as_bool)
            .unwrap_or(config.enable_consensus_debate),
    };

    let scrape = ScrapeRequest {
        enabled: metadata
            .get("enable_scraping")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        product_name: metadata
            .get("product_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        sources: metadata
            .get("sources")
            .and_then(Value::as_array)
            .map(|raw| {
                raw.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| vec!["youtube".to_string(), "tiki".to_string()]),
        max_items_per_source: read_u32(metadata, "max_items_per_source").unwrap_or(5),
    };

    Ok(TaskSettings {
        settings,
        agent_types,
        scrape,
    })
}

fn read_u32(metadata: &Value, key: &str) -> Option<u32> {
    metadata.get(key).and_then(Value::as_u64).map(|raw| raw as u32)
}

pub fn router<P: LlmProvider + 'static>(state: CoordinatorState<P>) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler::<P>))
        .route("/health", get(health_handler::<P>))
        .route("/.well-known/agent.json", get(card_handler::<P>))
        .with_state(state)
}

async fn rpc_handler<P: LlmProvider + 'static>(
    State(state): State<CoordinatorState<P>>,
    Json(req): Json<RpcRequest>,
) -> Json<RpcResponse> {
    if let Some(error) = rpc::validate(&req) {
        return Json(error);
    }

    let input_text = match req.params.message.as_ref().map(rpc::extract_text) {
        Some(Ok(text)) => text,
        _ => {
            return Json(rpc::error_response(
                &req.id,
                rpc::INVALID_PARAMS,
                "Invalid message format",
            ));
        }
    };

    let task = match task_settings(&state.config, &req.params.metadata) {
        Ok(task) => task,
        Err(e) => {
            return Json(rpc::error_response(
                &req.id,
                rpc::INTERNAL_ERROR,
                format!("coordination failed: {e}"),
            ));
        }
    };

    let task_id = req.params.id.clone().unwrap_or_else(|| "unknown".to_string());
    info!(
        "[sentimesh:coordinator] task {task_id}: {} departments, category {}",
        task.agent_types.len(),
        task.settings.product_category
    );

    // Optional scrape-and-aggregate pre-step.
    let (review_text, scraping_metadata) =
        resolve_review_text(&state, &task, input_text).await;

    let mut workflow_state = match run_workflow(&state, &task, &review_text, &task_id).await {
        Ok(workflow_state) => workflow_state,
        Err(e) => {
            return Json(rpc::error_response(
                &req.id,
                rpc::INTERNAL_ERROR,
                format!("coordination failed: {e}"),
            ));
        }
    };

    if let Some(scraping) = scraping_metadata {
        workflow_state
            .metadata
            .insert("scraping_metadata".to_string(), scraping);
    }

    let report = WorkflowReport::from_state(workflow_state);
    let output_text = match serde_json::to_string_pretty(&report) {
        Ok(output) => output,
        Err(e) => {
            return Json(rpc::error_response(
                &req.id,
                rpc::INTERNAL_ERROR,
                format!("failed to serialize report: {e}"),
            ));
        }
    };

    let session_prefix: String = task_id.chars().take(8).collect();
    let agents_used: Vec<&str> = task.agent_types.iter().map(AgentKind::as_str).collect();

    Json(rpc::a2a_response(
        &req.id,
        req.params.id.clone(),
        output_text,
        Some(format!("coordinator-session-{session_prefix}")),
        serde_json::json!({
            "agent_type": "coordinator",
            "communication_protocol": state.config.coordinator_mode.as_str(),
            "product_category": report.product_category,
            "agents_used": agents_used,
            "overall_sentiment": report.master_analysis.sentiment.as_str(),
            "overall_confidence": report.master_analysis.confidence,
            "total_agents": task.agent_types.len(),
        }),
    ))
}

/// When scraping is requested and possible, replace the message text with
/// the combined scraped dataset; otherwise analyze the message text as-is.
async fn resolve_review_text<P>(
    state: &CoordinatorState<P>,
    task: &TaskSettings,
    input_text: String,
) -> (String, Option<Value>) {
    let Some(product_name) = task
        .scrape
        .enabled
        .then_some(task.scrape.product_name.clone())
        .flatten()
    else {
        return (input_text, None);
    };

    let Some(scraper) = state.scraper.clone() else {
        warn!("[sentimesh:coordinator] scraping requested but no scraper configured");
        return (input_text, None);
    };

    info!("[sentimesh:coordinator] scraping reviews for '{product_name}'");
    let sources = task.scrape.sources.clone();
    let max_items = task.scrape.max_items_per_source;
    let keyword = product_name.clone();
    let scraped = tokio::task::spawn_blocking(move || scraper.scrape(&keyword, &sources, max_items))
        .await
        .unwrap_or_else(|e| Err(Error::Scrape(format!("scrape task panicked: {e}"))));

    match scraped {
        Ok(items) if items.is_empty() => (
            format!("No reviews found for {product_name}."),
            Some(serde_json::json!({"product_name": product_name, "total_reviews": 0})),
        ),
        Ok(items) => {
            let (combined, metadata) = scrape::combine_reviews(&items, &product_name);
            (combined, Some(metadata))
        }
        Err(e) => {
            warn!("[sentimesh:coordinator] scraping failed: {e}, analyzing message text");
            (input_text, None)
        }
    }
}

async fn run_workflow<P: LlmProvider + 'static>(
    state: &CoordinatorState<P>,
    task: &TaskSettings,
    review_text: &str,
    task_id: &str,
) -> Result<crate::workflow::WorkflowState> {
    match state.config.coordinator_mode {
        CoordinationMode::InProcess => {
            let executor = InProcessExecutor::new(
                Arc::clone(&state.provider),
                &state.prompt_engine,
                &task.agent_types,
                &task.settings,
                None,
            )?;
            let engine = WorkflowEngine::new(
                executor,
                state.config.workflow_kind,
                task.settings.clone(),
            );
            Ok(engine.run(review_text, task_id).await)
        }
        CoordinationMode::A2a => {
            let mut departments = Vec::with_capacity(task.agent_types.len());
            for kind in &task.agent_types {
                let endpoint = state.config.agent_endpoint(*kind).ok_or_else(|| {
                    Error::Workflow(format!("no endpoint configured for {kind}"))
                })?;
                departments.push((*kind, endpoint));
            }
            let client = A2aClient::new(Duration::from_secs(state.config.agent_timeout))?;
            let executor = A2aExecutor::new(
                Arc::clone(&state.provider),
                &state.prompt_engine,
                departments,
                client,
                &task.settings,
                None,
            )?;
            let engine = WorkflowEngine::new(
                executor,
                state.config.workflow_kind,
                task.settings.clone(),
            );
            Ok(engine.run(review_text, task_id).await)
        }
    }
}

async fn health_handler<P: LlmProvider + 'static>(
    State(state): State<CoordinatorState<P>>,
) -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "agent": "coordinator",
        "version": crate::service::SERVICE_VERSION,
        "coordination_mode": state.config.coordinator_mode.as_str(),
        "available_agents": state
            .config
            .agent_types
            .iter()
            .map(AgentKind::as_str)
            .collect::<Vec<_>>(),
    }))
}

async fn card_handler<P: LlmProvider + 'static>(
    State(state): State<CoordinatorState<P>>,
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

/// Run the coordinator service until ctrl-c.
pub async fn serve_coordinator(config: &Config, port: u16) -> Result<()> {
    let provider = Arc::new(OpenAiProvider::from_env(
        &config.api_key_env,
        config.model_name.clone(),
    )?);
    let state = CoordinatorState {
        card_path: config.card_path("coordinator"),
        prompt_engine: Arc::new(PromptEngine::new(config.prompts_dir.clone())),
        config: Arc::new(config.clone()),
        provider,
        scraper: None,
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| Error::Supervisor(format!("failed to bind port {port}: {e}")))?;
    info!(
        "[sentimesh:coordinator] listening on port {port} ({} mode)",
        config.coordinator_mode.as_str()
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(crate::service::shutdown_signal())
        .await
        .map_err(|e| Error::Supervisor(format!("coordinator server error: {e}")))
}

/// One-shot in-process analysis for the `analyze` subcommand.
pub async fn analyze_once(config: &Config, review: &str) -> Result<WorkflowReport> {
    let provider = Arc::new(OpenAiProvider::from_env(
        &config.api_key_env,
        config.model_name.clone(),
    )?);
    let prompt_engine = PromptEngine::new(config.prompts_dir.clone());
    let settings = RunSettings::from_config(config);
    let executor = InProcessExecutor::new(
        provider,
        &prompt_engine,
        &config.agent_types,
        &settings,
        None,
    )?;
    let engine = WorkflowEngine::new(executor, config.workflow_kind, settings);
    let state = engine.run(review, "cli").await;
    Ok(WorkflowReport::from_state(state))
}
