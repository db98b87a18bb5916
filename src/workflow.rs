use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::consensus;
use crate::executor::AgentExecutor;
use crate::prompts;
use crate::record::{AgentKind, AnalysisRecord, ProductCategory, Sentiment};

pub const WORKFLOW_VERSION: &str = "sentimesh-v0.1.0";

/// Per-run parameters, resolved from config defaults and request metadata.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub product_category: ProductCategory,
    pub max_tokens_per_agent: u32,
    pub max_tokens_master: u32,
    pub max_tokens_advisor: u32,
    pub max_discussion_rounds: u32,
    pub disagreement_threshold: f64,
    pub enable_consensus_debate: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            product_category: ProductCategory::Electronics,
            max_tokens_per_agent: 150,
            max_tokens_master: 500,
            max_tokens_advisor: 600,
            max_discussion_rounds: 2,
            disagreement_threshold: 0.6,
            enable_consensus_debate: true,
        }
    }
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            product_category: config.product_category,
            max_tokens_per_agent: config.max_tokens_per_agent,
            max_tokens_master: config.max_tokens_master,
            max_tokens_advisor: config.max_tokens_advisor,
            max_discussion_rounds: config.max_discussion_rounds,
            disagreement_threshold: config.disagreement_threshold,
            enable_consensus_debate: config.enable_consensus_debate,
        }
    }
}

/// Which graph to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    /// Departments → master → advisor, no consensus machinery.
    Linear,
    /// Departments → consensus check → bounded discussion loop → master → advisor.
    Consensus,
}

/// Mutable state of a single run. Owned by one coordinator invocation,
/// discarded on return, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub review_text: String,
    pub product_category: ProductCategory,
    pub product_id: String,
    pub department_records: Vec<AnalysisRecord>,
    pub discussion_messages: Vec<String>,
    pub current_round: u32,
    pub max_rounds: u32,
    pub disagreement: f64,
    pub consensus_reached: bool,
    pub master_record: Option<AnalysisRecord>,
    pub advisor_record: Option<AnalysisRecord>,
    pub metadata: Map<String, Value>,
}

impl WorkflowState {
    fn new(
        review_text: String,
        product_category: ProductCategory,
        product_id: String,
        max_rounds: u32,
    ) -> Self {
        Self {
            review_text,
            product_category,
            product_id,
            department_records: Vec::new(),
            discussion_messages: Vec::new(),
            current_round: 0,
            max_rounds,
            disagreement: 0.0,
            consensus_reached: false,
            master_record: None,
            advisor_record: None,
            metadata: Map::new(),
        }
    }
}

/// Machine states. Every run walks Departments → … → Done; the loop bound
/// guarantees Done is always reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Departments,
    Check,
    Discussion,
    Master,
    Advisor,
    Done,
}

/// The typed state graph over `WorkflowState`. Nodes are methods that
/// transform the state; edges are the match arms in `run`.
pub struct WorkflowEngine<E> {
    executor: E,
    kind: WorkflowKind,
    settings: RunSettings,
}

impl<E: AgentExecutor> WorkflowEngine<E> {
    pub fn new(executor: E, kind: WorkflowKind, settings: RunSettings) -> Self {
        Self {
            executor,
            kind,
            settings,
        }
    }

    /// Drive the state machine to completion. Always produces a complete
    /// result structure; failures are recorded in it, never raised.
    pub async fn run(&self, review: &str, product_id: &str) -> WorkflowState {
        let started = Instant::now();
        let mut state = WorkflowState::new(
            review.to_string(),
            self.settings.product_category,
            product_id.to_string(),
            self.settings.max_discussion_rounds,
        );

        let mut step = Step::Departments;
        while step != Step::Done {
            step = match step {
                Step::Departments => {
                    self.run_departments(&mut state).await;
                    match self.kind {
                        WorkflowKind::Linear => Step::Master,
                        WorkflowKind::Consensus => Step::Check,
                    }
                }
                Step::Check => {
                    self.run_check(&mut state);
                    if self.should_discuss(&state) {
                        Step::Discussion
                    } else {
                        Step::Master
                    }
                }
                Step::Discussion => {
                    self.run_discussion(&mut state).await;
                    Step::Check
                }
                Step::Master => {
                    self.run_master(&mut state).await;
                    Step::Advisor
                }
                Step::Advisor => {
                    self.run_advisor(&mut state).await;
                    Step::Done
                }
                Step::Done => Step::Done,
            };
        }

        state.metadata.insert(
            "processing_time".to_string(),
            Value::from(started.elapsed().as_secs_f64()),
        );
        info!(
            "[sentimesh:workflow] complete in {:.2}s, rounds={}, sentiment={}",
            started.elapsed().as_secs_f64(),
            state.current_round,
            state
                .master_record
                .as_ref()
                .map(|r| r.sentiment.as_str())
                .unwrap_or("unknown")
        );
        state
    }

    /// Conditional edge out of the consensus check.
    fn should_discuss(&self, state: &WorkflowState) -> bool {
        if state.consensus_reached || !self.settings.enable_consensus_debate {
            return false;
        }
        if state.current_round >= state.max_rounds {
            info!("[sentimesh:workflow] max discussion rounds reached, proceeding to synthesis");
            return false;
        }
        true
    }

    async fn run_departments(&self, state: &mut WorkflowState) {
        let kinds = self.executor.department_kinds().to_vec();
        if self.executor.parallel_departments() {
            // Concurrent fan-out. Each future owns exactly one slot in the
            // result buffer; assembly is in configured order regardless of
            // completion order.
            let futures = kinds.iter().enumerate().map(|(index, kind)| {
                let executor = &self.executor;
                let review = state.review_text.as_str();
                async move { (index, executor.invoke_department(*kind, review).await) }
            });
            let mut slots: Vec<Option<AnalysisRecord>> = vec![None; kinds.len()];
            for (index, record) in join_all(futures).await {
                slots[index] = Some(record);
            }
            for (kind, slot) in kinds.iter().zip(slots) {
                let record = slot
                    .unwrap_or_else(|| AnalysisRecord::fallback(*kind, "missing fan-out result"));
                log_department(&record);
                state.department_records.push(record);
            }
        } else {
            for kind in kinds {
                let input =
                    prompts::department_context(&state.review_text, &state.department_records);
                let record = self.executor.invoke_department(kind, &input).await;
                log_department(&record);
                state.department_records.push(record);
            }
        }
    }

    fn run_check(&self, state: &mut WorkflowState) {
        let check = consensus::check(
            &state.department_records,
            self.settings.disagreement_threshold,
        );
        state.disagreement = check.disagreement;
        state.consensus_reached = check.consensus_reached;
        info!(
            "[sentimesh:workflow] consensus check: disagreement={:.2}, threshold={}, reached={}",
            check.disagreement, self.settings.disagreement_threshold, check.consensus_reached
        );
    }

    /// One discussion round: every department agent revisits its analysis
    /// with the full record set as context. A successful refinement replaces
    /// the record at the same index; a failure keeps the prior record.
    async fn run_discussion(&self, state: &mut WorkflowState) {
        info!(
            "[sentimesh:workflow] discussion round {}...",
            state.current_round + 1
        );
        let context = prompts::discussion_context(
            &state.review_text,
            &state.department_records,
            state.disagreement,
        );
        let kinds = self.executor.department_kinds().to_vec();
        for (index, kind) in kinds.into_iter().enumerate() {
            let prompt = prompts::refinement_prompt(kind, &context);
            let refined = self.executor.invoke_department(kind, &prompt).await;
            if refined.is_fallback() {
                warn!("[sentimesh:workflow] {kind} refinement failed, keeping prior record");
                continue;
            }
            state
                .discussion_messages
                .push(prompts::transcript_line(&refined));
            state.department_records[index] = refined;
        }
        state.current_round += 1;
    }

    async fn run_master(&self, state: &mut WorkflowState) {
        let all_failed = !state.department_records.is_empty()
            && state.department_records.iter().all(AnalysisRecord::is_fallback);
        let record = if all_failed || state.department_records.is_empty() {
            warn!("[sentimesh:workflow] no usable department records, master falls back");
            AnalysisRecord::fallback(AgentKind::MasterAnalyst, "all department agents failed")
        } else {
            self.executor
                .synthesize(&state.department_records, &state.review_text)
                .await
        };
        info!(
            "[sentimesh:workflow] master synthesis: {} ({:.2})",
            record.sentiment, record.confidence
        );
        // department_records is frozen from here on.
        state.master_record = Some(record);
    }

    async fn run_advisor(&self, state: &mut WorkflowState) {
        let master = match &state.master_record {
            Some(record) => record.clone(),
            None => AnalysisRecord::fallback(AgentKind::MasterAnalyst, "master record missing"),
        };

        let all_failed = !state.department_records.is_empty()
            && state.department_records.iter().all(AnalysisRecord::is_fallback);
        let record = if all_failed || state.department_records.is_empty() {
            AnalysisRecord {
                sentiment: master.sentiment,
                ..AnalysisRecord::fallback(
                    AgentKind::BusinessAdvisor,
                    "all department agents failed",
                )
            }
        } else {
            self.executor
                .recommend(&master, &state.department_records, &state.review_text)
                .await
        };
        info!(
            "[sentimesh:workflow] business recommendations ready ({:.2})",
            record.confidence
        );
        state.advisor_record = Some(record);

        self.write_final_metadata(state);
    }

    fn write_final_metadata(&self, state: &mut WorkflowState) {
        let failed_agents: Vec<Value> = state
            .department_records
            .iter()
            .filter(|record| record.is_fallback())
            .map(|record| Value::from(record.agent_type.clone()))
            .collect();

        let metadata = &mut state.metadata;
        metadata.insert(
            "total_departments".to_string(),
            Value::from(state.department_records.len()),
        );
        metadata.insert(
            "discussion_rounds".to_string(),
            Value::from(state.current_round),
        );
        metadata.insert(
            "disagreement_level".to_string(),
            Value::from(state.disagreement),
        );
        metadata.insert(
            "consensus_reached".to_string(),
            Value::from(state.consensus_reached),
        );
        metadata.insert(
            "workflow_version".to_string(),
            Value::from(WORKFLOW_VERSION),
        );
        if !failed_agents.is_empty() {
            metadata.insert("failed_agents".to_string(), Value::from(failed_agents));
        }
    }
}

fn log_department(record: &AnalysisRecord) {
    if record.is_fallback() {
        warn!(
            "[sentimesh:workflow] {} failed: {}",
            record.agent_type,
            record.error.as_deref().unwrap_or("unknown error")
        );
    } else {
        info!(
            "[sentimesh:workflow] {}: {} ({:.2})",
            record.agent_type, record.sentiment, record.confidence
        );
    }
}

// ---------------------------------------------------------------------------
// Final report
// ---------------------------------------------------------------------------

/// The composite payload returned to clients as a single JSON artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub product_id: String,
    pub product_category: String,
    pub review_text: String,
    pub department_analyses: Vec<AnalysisRecord>,
    pub discussion_messages: Vec<String>,
    pub master_analysis: AnalysisRecord,
    pub business_recommendations: AnalysisRecord,
    pub workflow_metadata: Map<String, Value>,
}

impl WorkflowReport {
    pub fn from_state(state: WorkflowState) -> Self {
        let master = state
            .master_record
            .unwrap_or_else(|| AnalysisRecord::fallback(AgentKind::MasterAnalyst, "not produced"));
        let advisor = state.advisor_record.unwrap_or_else(|| AnalysisRecord {
            sentiment: master.sentiment,
            ..AnalysisRecord::fallback(AgentKind::BusinessAdvisor, "not produced")
        });
        Self {
            product_id: state.product_id,
            product_category: state.product_category.as_str().to_string(),
            review_text: state.review_text,
            department_analyses: state.department_records,
            discussion_messages: state.discussion_messages,
            master_analysis: master,
            business_recommendations: advisor,
            workflow_metadata: state.metadata,
        }
    }

    pub fn overall_sentiment(&self) -> Sentiment {
        self.master_analysis.sentiment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    fn record(kind: AgentKind, sentiment: Sentiment) -> AnalysisRecord {
        AnalysisRecord {
            agent_type: kind.as_str().to_string(),
            agent_name: kind.agent_name().to_string(),
            sentiment,
            confidence: 0.85,
            emotions: vec![],
            topics: vec![],
            reasoning: format!("{kind} view"),
            business_impact: String::new(),
            error: None,
        }
    }

    struct MockExecutor {
        kinds: Vec<AgentKind>,
        parallel: bool,
        initial: HashMap<AgentKind, AnalysisRecord>,
        refined: Mutex<HashMap<AgentKind, VecDeque<AnalysisRecord>>>,
        delays_ms: HashMap<AgentKind, u64>,
        calls: Mutex<Vec<String>>,
    }

    impl MockExecutor {
        fn new(kinds: &[AgentKind], sentiments: &[Sentiment]) -> Self {
            let initial = kinds
                .iter()
                .zip(sentiments)
                .map(|(kind, sentiment)| (*kind, record(*kind, *sentiment)))
                .collect();
            Self {
                kinds: kinds.to_vec(),
                parallel: false,
                initial,
                refined: Mutex::new(HashMap::new()),
                delays_ms: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_refined_round(self, sentiments: &[Sentiment]) -> Self {
            {
                let mut refined = self.refined.lock().unwrap();
                for (kind, sentiment) in self.kinds.iter().zip(sentiments) {
                    refined
                        .entry(*kind)
                        .or_default()
                        .push_back(record(*kind, *sentiment));
                }
            }
            self
        }

        fn fail_agent(mut self, kind: AgentKind) -> Self {
            self.initial
                .insert(kind, AnalysisRecord::fallback(kind, "simulated failure"));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl AgentExecutor for MockExecutor {
        fn department_kinds(&self) -> &[AgentKind] {
            &self.kinds
        }

        fn parallel_departments(&self) -> bool {
            self.parallel
        }

        async fn invoke_department(&self, kind: AgentKind, input: &str) -> AnalysisRecord {
            if let Some(ms) = self.delays_ms.get(&kind) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            let is_refinement = input.contains("Based on the discussion above");
            self.calls.lock().unwrap().push(format!(
                "{}:{kind}",
                if is_refinement { "refine" } else { "dept" }
            ));
            if is_refinement
                && let Some(queue) = self.refined.lock().unwrap().get_mut(&kind)
                && let Some(refined) = queue.pop_front()
            {
                return refined;
            }
            self.initial
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| AnalysisRecord::fallback(kind, "unscripted agent"))
        }

        async fn synthesize(&self, records: &[AnalysisRecord], _review: &str) -> AnalysisRecord {
            self.calls.lock().unwrap().push("master".to_string());
            let check = consensus::check(records, 1.0);
            AnalysisRecord {
                confidence: 0.9,
                ..record(AgentKind::MasterAnalyst, check.plurality)
            }
        }

        async fn recommend(
            &self,
            master: &AnalysisRecord,
            _records: &[AnalysisRecord],
            _review: &str,
        ) -> AnalysisRecord {
            self.calls.lock().unwrap().push("advisor".to_string());
            record(AgentKind::BusinessAdvisor, master.sentiment)
        }
    }

    fn settings(threshold: f64, max_rounds: u32) -> RunSettings {
        RunSettings {
            disagreement_threshold: threshold,
            max_discussion_rounds: max_rounds,
            ..RunSettings::default()
        }
    }

    const FIVE: [AgentKind; 5] = AgentKind::DEPARTMENTS;

    #[tokio::test]
    async fn test_clear_positive_no_discussion() {
        let executor = MockExecutor::new(&FIVE, &[Sentiment::Positive; 5]);
        let engine = WorkflowEngine::new(executor, WorkflowKind::Consensus, settings(0.6, 2));
        let state = engine
            .run("This phone is absolutely fantastic!", "prod-1")
            .await;

        assert_eq!(state.department_records.len(), 5);
        assert!(state
            .department_records
            .iter()
            .all(|r| r.sentiment == Sentiment::Positive));
        assert_eq!(state.disagreement, 0.0);
        assert!(state.consensus_reached);
        assert_eq!(state.current_round, 0);
        assert!(state.discussion_messages.is_empty());
        assert_eq!(
            state.master_record.as_ref().unwrap().sentiment,
            Sentiment::Positive
        );
        assert!(state.advisor_record.is_some());
    }

    #[tokio::test]
    async fn test_conflict_triggers_discussion_then_converges() {
        let executor = MockExecutor::new(
            &FIVE,
            &[
                Sentiment::Positive,
                Sentiment::Positive,
                Sentiment::Positive,
                Sentiment::Negative,
                Sentiment::Negative,
            ],
        )
        .with_refined_round(&[Sentiment::Positive; 5]);
        let engine = WorkflowEngine::new(executor, WorkflowKind::Consensus, settings(0.4, 3));
        let state = engine.run("Great build, awful delivery", "prod-2").await;

        assert!(state.current_round >= 1);
        assert_eq!(
            state.discussion_messages.len(),
            state.current_round as usize * 5
        );
        assert!(state.current_round <= 3);
        assert!(state.consensus_reached);
        assert!(state.master_record.is_some());
        assert!(state.advisor_record.is_some());
    }

    #[tokio::test]
    async fn test_agent_failure_tolerated() {
        let executor = MockExecutor::new(&FIVE, &[Sentiment::Positive; 5])
            .fail_agent(AgentKind::Technical);
        let engine = WorkflowEngine::new(executor, WorkflowKind::Consensus, settings(0.6, 2));
        let state = engine.run("Fantastic phone", "prod-3").await;

        assert_eq!(state.department_records.len(), 5);
        let failed = &state.department_records[4];
        assert_eq!(failed.agent_type, "technical");
        assert_eq!(failed.sentiment, Sentiment::Neutral);
        assert_eq!(failed.confidence, 0.5);
        assert!(failed.error.is_some());
        // the other four are intact
        assert_eq!(
            state
                .department_records
                .iter()
                .filter(|r| !r.is_fallback())
                .count(),
            4
        );
        assert!(state.master_record.is_some());
        assert!(state.advisor_record.is_some());
    }

    #[tokio::test]
    async fn test_bound_enforced_when_never_converging() {
        // No refined script: agents repeat their initial split forever.
        let executor = MockExecutor::new(
            &FIVE,
            &[
                Sentiment::Positive,
                Sentiment::Positive,
                Sentiment::Negative,
                Sentiment::Negative,
                Sentiment::Neutral,
            ],
        );
        let engine = WorkflowEngine::new(executor, WorkflowKind::Consensus, settings(0.1, 3));
        let state = engine.run("Polarizing product", "prod-4").await;

        assert_eq!(state.current_round, 3);
        assert!(!state.consensus_reached);
        assert!(state.master_record.is_some());
        assert!(state.advisor_record.is_some());
    }

    #[tokio::test]
    async fn test_debate_disabled_skips_discussion() {
        let executor = MockExecutor::new(
            &FIVE,
            &[
                Sentiment::Positive,
                Sentiment::Negative,
                Sentiment::Positive,
                Sentiment::Negative,
                Sentiment::Neutral,
            ],
        );
        let engine = WorkflowEngine::new(
            executor,
            WorkflowKind::Consensus,
            RunSettings {
                enable_consensus_debate: false,
                disagreement_threshold: 0.1,
                ..RunSettings::default()
            },
        );
        let state = engine.run("Mixed bag", "prod-5").await;

        assert_eq!(state.current_round, 0);
        assert!(state.discussion_messages.is_empty());
        assert!(!state.consensus_reached);
        assert!(state.advisor_record.is_some());
    }

    #[tokio::test]
    async fn test_linear_workflow_never_checks_consensus() {
        let executor = MockExecutor::new(
            &FIVE,
            &[
                Sentiment::Positive,
                Sentiment::Negative,
                Sentiment::Positive,
                Sentiment::Negative,
                Sentiment::Neutral,
            ],
        );
        let engine = WorkflowEngine::new(executor, WorkflowKind::Linear, settings(0.0, 5));
        let state = engine.run("Mixed bag", "prod-6").await;

        assert_eq!(state.current_round, 0);
        assert_eq!(state.disagreement, 0.0);
        assert!(!state.consensus_reached);
        assert!(state.discussion_messages.is_empty());
        assert!(state.master_record.is_some());
        assert!(state.advisor_record.is_some());
    }

    #[tokio::test]
    async fn test_parallel_fanout_preserves_configured_order() {
        let mut executor = MockExecutor::new(&FIVE, &[Sentiment::Positive; 5]);
        executor.parallel = true;
        // Reverse completion order relative to configured order.
        executor.delays_ms = HashMap::from([
            (AgentKind::Quality, 50),
            (AgentKind::Experience, 40),
            (AgentKind::UserExperience, 30),
            (AgentKind::Business, 20),
            (AgentKind::Technical, 10),
        ]);
        let engine = WorkflowEngine::new(executor, WorkflowKind::Consensus, settings(0.6, 2));
        let state = engine.run("Fast enough", "prod-7").await;

        let order: Vec<&str> = state
            .department_records
            .iter()
            .map(|r| r.agent_type.as_str())
            .collect();
        assert_eq!(
            order,
            vec![
                "quality",
                "experience",
                "user_experience",
                "business",
                "technical"
            ]
        );
    }

    #[tokio::test]
    async fn test_all_agents_failed_still_terminates_with_fallbacks() {
        let mut executor = MockExecutor::new(&FIVE, &[Sentiment::Positive; 5]);
        for kind in FIVE {
            executor = executor.fail_agent(kind);
        }
        let engine = WorkflowEngine::new(executor, WorkflowKind::Consensus, settings(0.6, 2));
        let state = engine.run("Nobody home", "prod-8").await;

        let master = state.master_record.as_ref().unwrap();
        assert!(master.is_fallback());
        assert_eq!(master.sentiment, Sentiment::Neutral);
        let advisor = state.advisor_record.as_ref().unwrap();
        assert!(advisor.is_fallback());
        assert_eq!(advisor.confidence, 0.5);
        let failed = state.metadata.get("failed_agents").unwrap();
        assert_eq!(failed.as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_all_failed_skips_master_and_advisor_invocation() {
        let mut executor = MockExecutor::new(&FIVE, &[Sentiment::Positive; 5]);
        for kind in FIVE {
            executor = executor.fail_agent(kind);
        }
        let engine = WorkflowEngine::new(executor, WorkflowKind::Consensus, settings(0.6, 2));
        let state = engine.run("Nobody home", "prod-9").await;
        assert!(state.advisor_record.is_some());
        // The fallback records were built by the engine; the executor's
        // synthesis and recommendation were never reached.
        let calls = engine.executor.calls();
        assert!(!calls.contains(&"master".to_string()));
        assert!(!calls.contains(&"advisor".to_string()));
    }

    #[tokio::test]
    async fn test_discussion_failure_keeps_prior_record() {
        // Disagreeing lineup; quality's refinement fails, others refine.
        let executor = MockExecutor::new(
            &FIVE,
            &[
                Sentiment::Positive,
                Sentiment::Positive,
                Sentiment::Positive,
                Sentiment::Negative,
                Sentiment::Negative,
            ],
        );
        {
            let mut refined = executor.refined.lock().unwrap();
            refined.insert(
                AgentKind::Quality,
                VecDeque::from([AnalysisRecord::fallback(
                    AgentKind::Quality,
                    "refinement timeout",
                )]),
            );
            for kind in [
                AgentKind::Experience,
                AgentKind::UserExperience,
                AgentKind::Business,
                AgentKind::Technical,
            ] {
                refined.insert(
                    kind,
                    VecDeque::from([record(kind, Sentiment::Positive)]),
                );
            }
        }
        let engine = WorkflowEngine::new(executor, WorkflowKind::Consensus, settings(0.4, 1));
        let state = engine.run("Great build, awful delivery", "prod-10").await;

        assert_eq!(state.current_round, 1);
        // quality kept its original positive record, not the fallback
        assert_eq!(state.department_records[0].agent_type, "quality");
        assert!(!state.department_records[0].is_fallback());
        assert_eq!(
            state.department_records[0].sentiment,
            Sentiment::Positive
        );
        // one transcript line per successful refinement only
        assert_eq!(state.discussion_messages.len(), 4);
    }

    #[tokio::test]
    async fn test_single_department_is_immediate_consensus() {
        let executor = MockExecutor::new(&[AgentKind::Quality], &[Sentiment::Negative]);
        let engine = WorkflowEngine::new(executor, WorkflowKind::Consensus, settings(0.0, 4));
        let state = engine.run("Terrible", "prod-11").await;

        assert!(state.consensus_reached);
        assert_eq!(state.current_round, 0);
        assert_eq!(state.department_records.len(), 1);
    }

    #[tokio::test]
    async fn test_sequential_departments_receive_prior_context() {
        let executor = MockExecutor::new(
            &[AgentKind::Quality, AgentKind::Technical],
            &[Sentiment::Positive, Sentiment::Positive],
        );
        let engine = WorkflowEngine::new(executor, WorkflowKind::Consensus, settings(0.6, 2));
        let state = engine.run("Nice gadget", "prod-12").await;
        assert_eq!(state.department_records.len(), 2);
        let calls = engine.executor.calls();
        assert_eq!(calls[0], "dept:quality");
        assert_eq!(calls[1], "dept:technical");
    }

    #[tokio::test]
    async fn test_final_metadata_fields() {
        let executor = MockExecutor::new(&FIVE, &[Sentiment::Positive; 5]);
        let engine = WorkflowEngine::new(executor, WorkflowKind::Consensus, settings(0.6, 2));
        let state = engine.run("Great", "prod-13").await;

        assert_eq!(state.metadata["total_departments"], 5);
        assert_eq!(state.metadata["discussion_rounds"], 0);
        assert_eq!(state.metadata["consensus_reached"], true);
        assert_eq!(state.metadata["workflow_version"], WORKFLOW_VERSION);
        assert!(state.metadata.contains_key("processing_time"));
        assert!(!state.metadata.contains_key("failed_agents"));
    }

    #[tokio::test]
    async fn test_report_from_state() {
        let executor = MockExecutor::new(&FIVE, &[Sentiment::Positive; 5]);
        let engine = WorkflowEngine::new(executor, WorkflowKind::Consensus, settings(0.6, 2));
        let state = engine.run("Great", "prod-14").await;
        let report = WorkflowReport::from_state(state);

        assert_eq!(report.product_id, "prod-14");
        assert_eq!(report.product_category, "electronics");
        assert_eq!(report.department_analyses.len(), 5);
        assert_eq!(report.overall_sentiment(), Sentiment::Positive);

        // report roundtrips through JSON
        let json = serde_json::to_string(&report).unwrap();
        let back: WorkflowReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.department_analyses.len(), 5);
    }
}
