use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::record::AnalysisRecord;
use crate::rpc::{self, Message, Part, PartText, RpcRequest, RpcResponse, TaskParams};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// HTTP client for nested agent-to-agent task calls.
#[derive(Clone)]
pub struct A2aClient {
    http: reqwest::Client,
}

impl A2aClient {
    /// `deadline` bounds each request attempt.
    pub fn new(deadline: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(deadline)
            .build()
            .map_err(|e| Error::Client(format!("failed to build http client: {e}")))?;
        Ok(Self { http })
    }

    /// Build an outbound task payload with a fresh task id.
    pub fn build_task_request(text: &str, metadata: Value) -> RpcRequest {
        let task_id = Uuid::new_v4().to_string();
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: task_id.clone(),
            method: rpc::TASKS_SEND.to_string(),
            params: TaskParams {
                id: Some(task_id),
                message: Some(Message {
                    role: Some("coordinator".to_string()),
                    parts: vec![Part {
                        part_type: "text".to_string(),
                        text: Some(PartText::Plain(text.to_string())),
                    }],
                }),
                metadata,
            },
        }
    }

    /// Send one task to an agent endpoint and decode the record artifact.
    pub async fn send_task(
        &self,
        endpoint: &str,
        text: &str,
        metadata: Value,
    ) -> Result<AnalysisRecord> {
        let payload = Self::build_task_request(text, metadata);
        debug!("[sentimesh:client] tasks/send to {endpoint}");
        let response = self.post_with_retry(endpoint, &payload).await?;
        parse_record_response(&response)
    }

    async fn post_with_retry(&self, endpoint: &str, payload: &RpcRequest) -> Result<RpcResponse> {
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        for attempt in 1..=MAX_RETRIES {
            match self.http.post(endpoint).json(payload).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if (200..300).contains(&status) {
                        return response.json::<RpcResponse>().await.map_err(|e| {
                            Error::Client(format!("failed to parse agent response: {e}"))
                        });
                    }
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        warn!(
                            attempt,
                            status, backoff_ms, "retrying agent call after HTTP error"
                        );
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms *= 2;
                        continue;
                    }
                    return Err(Error::Client(format!("agent returned HTTP {status}")));
                }
                // Connection refusals are worth retrying (agent may still be
                // binding its port); deadline expiry is a hard failure.
                Err(ref e) if attempt < MAX_RETRIES && e.is_connect() => {
                    warn!(
                        attempt,
                        error = %e,
                        backoff_ms,
                        "retrying agent call after connect error"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                Err(e) => {
                    return Err(Error::Client(format!("agent request failed: {e}")));
                }
            }
        }
        unreachable!()
    }
}

/// Only retry rate limits and server-side errors.
fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Decode an agent's RPC response into its analysis record.
pub fn parse_record_response(response: &RpcResponse) -> Result<AnalysisRecord> {
    if let Some(error) = &response.error {
        return Err(Error::Client(format!(
            "agent error {}: {}",
            error.code, error.message
        )));
    }
    let result = response
        .result
        .as_ref()
        .ok_or_else(|| Error::Client("agent response has neither result nor error".to_string()))?;
    let text = rpc::artifact_text(result)?;
    let record: AnalysisRecord = serde_json::from_str(text)
        .map_err(|e| Error::Client(format!("agent artifact is not an analysis record: {e}")))?;
    Ok(record.normalized())
}
