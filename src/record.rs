use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum length of the free-text fields after normalization.
pub const MAX_FREE_TEXT: usize = 500;

/// Overall sentiment of a review as judged by one analyzer.
///
/// Parsing never fails: anything outside the known tags collapses to
/// `Neutral`, so a malformed wire value can't poison a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Sentiment {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Sentiment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Sentiment::parse(&raw))
    }
}

/// Analyzer specialization tag. The seven kinds share one implementation;
/// they differ only in prompt and focus-area data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Quality,
    Experience,
    UserExperience,
    Business,
    Technical,
    MasterAnalyst,
    BusinessAdvisor,
}

impl AgentKind {
    /// Default department lineup, in deployment order.
    pub const DEPARTMENTS: [AgentKind; 5] = [
        AgentKind::Quality,
        AgentKind::Experience,
        AgentKind::UserExperience,
        AgentKind::Business,
        AgentKind::Technical,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "quality" => Some(AgentKind::Quality),
            "experience" => Some(AgentKind::Experience),
            "user_experience" => Some(AgentKind::UserExperience),
            "business" => Some(AgentKind::Business),
            "technical" => Some(AgentKind::Technical),
            "master_analyst" => Some(AgentKind::MasterAnalyst),
            "business_advisor" => Some(AgentKind::BusinessAdvisor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Quality => "quality",
            AgentKind::Experience => "experience",
            AgentKind::UserExperience => "user_experience",
            AgentKind::Business => "business",
            AgentKind::Technical => "technical",
            AgentKind::MasterAnalyst => "master_analyst",
            AgentKind::BusinessAdvisor => "business_advisor",
        }
    }

    /// Implementation label carried on records for diagnostics.
    pub fn agent_name(&self) -> &'static str {
        match self {
            AgentKind::Quality => "ProductQualityAnalyzer",
            AgentKind::Experience => "CustomerExperienceAnalyzer",
            AgentKind::UserExperience => "UserExperienceAnalyzer",
            AgentKind::Business => "BusinessImpactAnalyzer",
            AgentKind::Technical => "TechnicalSpecAnalyzer",
            AgentKind::MasterAnalyst => "MasterAnalystAnalyzer",
            AgentKind::BusinessAdvisor => "BusinessAdvisorAnalyzer",
        }
    }

    pub fn is_department(&self) -> bool {
        !matches!(self, AgentKind::MasterAnalyst | AgentKind::BusinessAdvisor)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product category selecting the focus-area set for prompt specialization.
/// Unknown tags fall back to `Electronics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductCategory {
    #[default]
    Electronics,
    Fashion,
    HomeGarden,
    BeautyHealth,
    SportsOutdoors,
    BooksMedia,
}

impl ProductCategory {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "fashion" => ProductCategory::Fashion,
            "home_garden" => ProductCategory::HomeGarden,
            "beauty_health" => ProductCategory::BeautyHealth,
            "sports_outdoors" => ProductCategory::SportsOutdoors,
            "books_media" => ProductCategory::BooksMedia,
            _ => ProductCategory::Electronics,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductCategory::Electronics => "electronics",
            ProductCategory::Fashion => "fashion",
            ProductCategory::HomeGarden => "home_garden",
            ProductCategory::BeautyHealth => "beauty_health",
            ProductCategory::SportsOutdoors => "sports_outdoors",
            ProductCategory::BooksMedia => "books_media",
        }
    }
}

impl fmt::Display for ProductCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProductCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProductCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ProductCategory::parse(&raw))
    }
}

/// Per-invocation analyzer configuration. Unknown metadata keys never reach
/// this struct; the RPC boundary drops them.
#[derive(Debug, Clone)]
pub struct AnalyzerParams {
    pub product_category: ProductCategory,
    pub max_tokens: u32,
    pub temperature: f64,
    pub model_name: Option<String>,
}

impl Default for AnalyzerParams {
    fn default() -> Self {
        Self {
            product_category: ProductCategory::Electronics,
            max_tokens: 150,
            temperature: 0.3,
            model_name: None,
        }
    }
}

/// One analyzer's structured output, the fundamental unit moved between
/// agents and the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub agent_type: String,
    pub agent_name: String,
    pub sentiment: Sentiment,
    pub confidence: f64,
    #[serde(default)]
    pub emotions: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub business_impact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisRecord {
    /// Run the ingest normalization pipeline: sentiment is already an enum
    /// by construction, confidence is clamped, free text is truncated.
    /// Idempotent: applying twice equals applying once.
    pub fn normalized(mut self) -> Self {
        self.confidence = clamp_confidence(self.confidence);
        self.reasoning = truncate(&self.reasoning, MAX_FREE_TEXT);
        self.business_impact = truncate(&self.business_impact, MAX_FREE_TEXT);
        self
    }

    /// Well-formed substitute for a failed analysis. Failures never cross
    /// the analyzer interface as errors; they become this record.
    pub fn fallback(kind: AgentKind, error: impl Into<String>) -> Self {
        let error = error.into();
        AnalysisRecord {
            agent_type: kind.as_str().to_string(),
            agent_name: kind.agent_name().to_string(),
            sentiment: Sentiment::Neutral,
            confidence: 0.5,
            emotions: Vec::new(),
            topics: Vec::new(),
            reasoning: truncate(&format!("Analysis error: {error}"), MAX_FREE_TEXT),
            business_impact: "Unable to assess".to_string(),
            error: Some(error),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// Clamp a confidence score into [0, 1]; non-finite values become 0.5.
pub fn clamp_confidence(raw: f64) -> f64 {
    if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.5 }
}

/// Truncate to at most `max` characters, appending an ellipsis when cut.
/// Counts chars, not bytes, so multi-byte text never splits mid-character.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}
