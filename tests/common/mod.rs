#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;

use sentimesh::cli::Cli;
use sentimesh::config::{merge, Config, ConfigFile};
use sentimesh::error::{Error, Result};
use sentimesh::prompts::PromptEngine;
use sentimesh::provider::{CompletionRequest, LlmProvider};
use sentimesh::record::{AgentKind, ProductCategory};
use sentimesh::service::{router, AgentServiceState};

/// Provider that pops scripted responses in order, failing when exhausted.
pub struct ScriptedProvider {
    responses: Mutex<Vec<Result<String>>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

impl LlmProvider for ScriptedProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Err(Error::Provider("no more scripted responses".to_string()))
        } else {
            responses.remove(0)
        }
    }
}

/// Provider that always returns the same output, optionally after a delay.
pub struct RepeatProvider {
    output: String,
    delay: Duration,
}

impl RepeatProvider {
    pub fn new(output: String) -> Self {
        Self {
            output,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(output: String, delay: Duration) -> Self {
        Self { output, delay }
    }
}

impl LlmProvider for RepeatProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.output.clone())
    }
}

/// A model output the analyzers will parse cleanly.
pub fn sentiment_output(sentiment: &str, reasoning: &str) -> String {
    format!(
        r#"{{"sentiment": "{sentiment}", "confidence": 0.9, "emotions": [], "topics": [], "reasoning": "{reasoning}", "business_impact": "none"}}"#
    )
}

pub fn test_config(file: ConfigFile) -> Config {
    merge(file, &Cli::parse_from(["sentimesh", "up"])).unwrap()
}

/// Bind an ephemeral port and run one agent service on it.
pub async fn spawn_agent_service<P: LlmProvider + 'static>(
    kind: AgentKind,
    provider: P,
) -> SocketAddr {
    let state = AgentServiceState {
        kind,
        provider: Arc::new(provider),
        prompt_engine: Arc::new(PromptEngine::new(None)),
        default_category: ProductCategory::Electronics,
        default_max_tokens: 150,
        model_name: None,
        card_path: PathBuf::from("missing-card.json"),
    };
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

/// Reserve an ephemeral port nothing will be listening on.
pub fn dead_port() -> u16 {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
