use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::prompts::{self, PromptEngine};
use crate::provider::{CompletionRequest, LlmProvider};
use crate::record::{AgentKind, AnalysisRecord, AnalyzerParams, Sentiment};

/// One sentiment analyzer. All seven specializations are this type; the
/// kind tag selects the system prompt and focus areas at construction.
pub struct SentimentAnalyzer<P> {
    kind: AgentKind,
    params: AnalyzerParams,
    system_prompt: String,
    provider: Arc<P>,
}

impl<P> Clone for SentimentAnalyzer<P> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            params: self.params.clone(),
            system_prompt: self.system_prompt.clone(),
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<P: LlmProvider> SentimentAnalyzer<P> {
    pub fn new(
        kind: AgentKind,
        provider: Arc<P>,
        params: AnalyzerParams,
        prompt_engine: &PromptEngine,
    ) -> Result<Self> {
        let system_prompt =
            prompt_engine.render_system(kind, params.product_category, params.max_tokens)?;
        Ok(Self {
            kind,
            params,
            system_prompt,
            provider,
        })
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn invoke(&self, user_prompt: String) -> Result<AnalysisRecord> {
        let request = CompletionRequest {
            system_prompt: self.system_prompt.clone(),
            user_prompt,
            max_tokens: self.params.max_tokens,
            temperature: self.params.temperature,
            model: self.params.model_name.clone(),
        };
        let output = self.provider.complete(&request).await?;
        parse_output(&output, self.kind)
    }

    /// Analyze a review. Never fails: provider errors and unparseable output
    /// become a fallback record with `error` set.
    pub async fn analyze(&self, text: &str) -> AnalysisRecord {
        match self.invoke(format!("Review: {text}")).await {
            Ok(record) => record,
            Err(e) => {
                warn!("[sentimesh:analyzer] {} analysis failed: {e}", self.kind);
                AnalysisRecord::fallback(self.kind, e.to_string())
            }
        }
    }

    /// Synthesize department records into the final verdict.
    /// Only the master_analyst specialization supports this operation.
    pub async fn synthesize(
        &self,
        department_records: &[AnalysisRecord],
        review: &str,
    ) -> Result<AnalysisRecord> {
        if self.kind != AgentKind::MasterAnalyst {
            return Err(Error::Analyzer(format!(
                "synthesize requires the master_analyst specialization, not {}",
                self.kind
            )));
        }
        let input = prompts::synthesis_input(department_records, review);
        Ok(match self.invoke(input).await {
            Ok(record) => record,
            Err(e) => {
                warn!("[sentimesh:analyzer] master synthesis failed: {e}");
                AnalysisRecord {
                    business_impact: "Unable to synthesize".to_string(),
                    ..AnalysisRecord::fallback(self.kind, e.to_string())
                }
            }
        })
    }

    /// Derive business recommendations from the master verdict.
    /// Only the business_advisor specialization supports this operation.
    pub async fn recommend(
        &self,
        master: &AnalysisRecord,
        department_records: &[AnalysisRecord],
        review: &str,
    ) -> Result<AnalysisRecord> {
        if self.kind != AgentKind::BusinessAdvisor {
            return Err(Error::Analyzer(format!(
                "recommend requires the business_advisor specialization, not {}",
                self.kind
            )));
        }
        let input = prompts::recommendation_input(master, department_records, review);
        Ok(match self.invoke(input).await {
            Ok(record) => record,
            Err(e) => {
                warn!("[sentimesh:analyzer] advisor recommendation failed: {e}");
                // The advisor fallback carries the master verdict forward.
                AnalysisRecord {
                    sentiment: master.sentiment,
                    business_impact: "Unable to provide recommendations".to_string(),
                    ..AnalysisRecord::fallback(self.kind, e.to_string())
                }
            }
        })
    }
}

/// Parse a model completion into a record. Tolerates code fences and prose
/// around the JSON object; reads fields leniently so one odd value doesn't
/// reject the whole output.
fn parse_output(raw: &str, kind: AgentKind) -> Result<AnalysisRecord> {
    let start = raw
        .find('{')
        .ok_or_else(|| Error::Analyzer("no JSON object in model output".to_string()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| Error::Analyzer("unterminated JSON object in model output".to_string()))?;
    if end < start {
        return Err(Error::Analyzer(
            "unterminated JSON object in model output".to_string(),
        ));
    }

    let value: Value = serde_json::from_str(&raw[start..=end])
        .map_err(|e| Error::Analyzer(format!("unparseable model output: {e}")))?;

    let sentiment = value
        .get("sentiment")
        .and_then(Value::as_str)
        .map(Sentiment::parse)
        .unwrap_or_default();

    let confidence = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.5),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.5),
        _ => 0.5,
    };

    Ok(AnalysisRecord {
        agent_type: kind.as_str().to_string(),
        agent_name: kind.agent_name().to_string(),
        sentiment,
        confidence,
        emotions: string_list(value.get("emotions")),
        topics: string_list(value.get("topics")),
        reasoning: value
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        business_impact: value
            .get("business_impact")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        error: None,
    }
    .normalized())
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
