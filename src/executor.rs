use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::analyzer::SentimentAnalyzer;
use crate::client::A2aClient;
use crate::error::Result;
use crate::prompts::PromptEngine;
use crate::provider::LlmProvider;
use crate::record::{AgentKind, AnalysisRecord, AnalyzerParams};
use crate::workflow::RunSettings;

/// Seam between the workflow engine and the analyzers. The two production
/// strategies implement it; tests script it directly.
pub trait AgentExecutor: Send + Sync {
    /// Department kinds in configured order. The workflow preserves and
    /// relies on this order.
    fn department_kinds(&self) -> &[AgentKind];

    /// Whether department invocations may be issued concurrently.
    fn parallel_departments(&self) -> bool {
        false
    }

    /// Invoke one department analyzer. Never fails: failures come back as
    /// fallback records.
    fn invoke_department(
        &self,
        kind: AgentKind,
        input: &str,
    ) -> impl std::future::Future<Output = AnalysisRecord> + Send;

    fn synthesize(
        &self,
        records: &[AnalysisRecord],
        review: &str,
    ) -> impl std::future::Future<Output = AnalysisRecord> + Send;

    fn recommend(
        &self,
        master: &AnalysisRecord,
        records: &[AnalysisRecord],
        review: &str,
    ) -> impl std::future::Future<Output = AnalysisRecord> + Send;
}

fn department_params(settings: &RunSettings, model_name: Option<&str>) -> AnalyzerParams {
    AnalyzerParams {
        product_category: settings.product_category,
        max_tokens: settings.max_tokens_per_agent,
        model_name: model_name.map(str::to_string),
        ..AnalyzerParams::default()
    }
}

fn build_synthesis_pair<P: LlmProvider>(
    provider: &Arc<P>,
    prompt_engine: &PromptEngine,
    settings: &RunSettings,
    model_name: Option<&str>,
) -> Result<(SentimentAnalyzer<P>, SentimentAnalyzer<P>)> {
    let master = SentimentAnalyzer::new(
        AgentKind::MasterAnalyst,
        Arc::clone(provider),
        AnalyzerParams {
            max_tokens: settings.max_tokens_master,
            ..department_params(settings, model_name)
        },
        prompt_engine,
    )?;
    let advisor = SentimentAnalyzer::new(
        AgentKind::BusinessAdvisor,
        Arc::clone(provider),
        AnalyzerParams {
            max_tokens: settings.max_tokens_advisor,
            ..department_params(settings, model_name)
        },
        prompt_engine,
    )?;
    Ok((master, advisor))
}

// ---------------------------------------------------------------------------
// In-process sequential strategy
// ---------------------------------------------------------------------------

/// Coordinator owns every analyzer directly; departments run in order with
/// no nested HTTP. This is the reference semantics.
pub struct InProcessExecutor<P> {
    kinds: Vec<AgentKind>,
    departments: Vec<SentimentAnalyzer<P>>,
    master: SentimentAnalyzer<P>,
    advisor: SentimentAnalyzer<P>,
}

impl<P: LlmProvider> InProcessExecutor<P> {
    pub fn new(
        provider: Arc<P>,
        prompt_engine: &PromptEngine,
        kinds: &[AgentKind],
        settings: &RunSettings,
        model_name: Option<&str>,
    ) -> Result<Self> {
        let mut departments = Vec::with_capacity(kinds.len());
        for kind in kinds {
            departments.push(SentimentAnalyzer::new(
                *kind,
                Arc::clone(&provider),
                department_params(settings, model_name),
                prompt_engine,
            )?);
        }
        let (master, advisor) =
            build_synthesis_pair(&provider, prompt_engine, settings, model_name)?;
        Ok(Self {
            kinds: kinds.to_vec(),
            departments,
            master,
            advisor,
        })
    }
}

impl<P: LlmProvider> AgentExecutor for InProcessExecutor<P> {
    fn department_kinds(&self) -> &[AgentKind] {
        &self.kinds
    }

    async fn invoke_department(&self, kind: AgentKind, input: &str) -> AnalysisRecord {
        match self.departments.iter().find(|a| a.kind() == kind) {
            Some(analyzer) => analyzer.analyze(input).await,
            None => AnalysisRecord::fallback(kind, format!("no {kind} analyzer configured")),
        }
    }

    async fn synthesize(&self, records: &[AnalysisRecord], review: &str) -> AnalysisRecord {
        match self.master.synthesize(records, review).await {
            Ok(record) => record,
            Err(e) => AnalysisRecord::fallback(AgentKind::MasterAnalyst, e.to_string()),
        }
    }

    async fn recommend(
        &self,
        master: &AnalysisRecord,
        records: &[AnalysisRecord],
        review: &str,
    ) -> AnalysisRecord {
        match self.advisor.recommend(master, records, review).await {
            Ok(record) => record,
            Err(e) => AnalysisRecord::fallback(AgentKind::BusinessAdvisor, e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Parallel A2A strategy
// ---------------------------------------------------------------------------

/// Departments are independent agent services reached over JSON-RPC, one
/// concurrent call each. Master and advisor still run in-process.
pub struct A2aExecutor<P> {
    kinds: Vec<AgentKind>,
    endpoints: Vec<String>,
    client: A2aClient,
    metadata: Value,
    master: SentimentAnalyzer<P>,
    advisor: SentimentAnalyzer<P>,
}

impl<P: LlmProvider> A2aExecutor<P> {
    pub fn new(
        provider: Arc<P>,
        prompt_engine: &PromptEngine,
        departments: Vec<(AgentKind, String)>,
        client: A2aClient,
        settings: &RunSettings,
        model_name: Option<&str>,
    ) -> Result<Self> {
        let (master, advisor) =
            build_synthesis_pair(&provider, prompt_engine, settings, model_name)?;
        let (kinds, endpoints) = departments.into_iter().unzip();
        Ok(Self {
            kinds,
            endpoints,
            client,
            metadata: serde_json::json!({
                "product_category": settings.product_category.as_str(),
                "max_tokens": settings.max_tokens_per_agent,
            }),
            master,
            advisor,
        })
    }
}

impl<P: LlmProvider> AgentExecutor for A2aExecutor<P> {
    fn department_kinds(&self) -> &[AgentKind] {
        &self.kinds
    }

    fn parallel_departments(&self) -> bool {
        true
    }

    async fn invoke_department(&self, kind: AgentKind, input: &str) -> AnalysisRecord {
        let Some(position) = self.kinds.iter().position(|k| *k == kind) else {
            return AnalysisRecord::fallback(kind, format!("no {kind} endpoint configured"));
        };
        let endpoint = &self.endpoints[position];
        match self
            .client
            .send_task(endpoint, input, self.metadata.clone())
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!("[sentimesh:executor] {kind} agent call failed: {e}");
                AnalysisRecord::fallback(kind, e.to_string())
            }
        }
    }

    async fn synthesize(&self, records: &[AnalysisRecord], review: &str) -> AnalysisRecord {
        match self.master.synthesize(records, review).await {
            Ok(record) => record,
            Err(e) => AnalysisRecord::fallback(AgentKind::MasterAnalyst, e.to_string()),
        }
    }

    async fn recommend(
        &self,
        master: &AnalysisRecord,
        records: &[AnalysisRecord],
        review: &str,
    ) -> AnalysisRecord {
        match self.advisor.recommend(master, records, review).await {
            Ok(record) => record,
            Err(e) => AnalysisRecord::fallback(AgentKind::BusinessAdvisor, e.to_string()),
        }
    }
}
