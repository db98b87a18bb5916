use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::record::{AgentKind, AnalysisRecord, ProductCategory};

const DEFAULT_QUALITY: &str = include_str!("prompt_templates/quality.md");
const DEFAULT_EXPERIENCE: &str = include_str!("prompt_templates/experience.md");
const DEFAULT_USER_EXPERIENCE: &str = include_str!("prompt_templates/user_experience.md");
const DEFAULT_BUSINESS: &str = include_str!("prompt_templates/business.md");
const DEFAULT_TECHNICAL: &str = include_str!("prompt_templates/technical.md");
const DEFAULT_MASTER: &str = include_str!("prompt_templates/master_analyst.md");
const DEFAULT_ADVISOR: &str = include_str!("prompt_templates/business_advisor.md");

fn default_template(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Quality => DEFAULT_QUALITY,
        AgentKind::Experience => DEFAULT_EXPERIENCE,
        AgentKind::UserExperience => DEFAULT_USER_EXPERIENCE,
        AgentKind::Business => DEFAULT_BUSINESS,
        AgentKind::Technical => DEFAULT_TECHNICAL,
        AgentKind::MasterAnalyst => DEFAULT_MASTER,
        AgentKind::BusinessAdvisor => DEFAULT_ADVISOR,
    }
}

/// System-prompt template engine with embedded defaults and user overrides.
pub struct PromptEngine {
    override_dir: Option<PathBuf>,
}

impl PromptEngine {
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        Self { override_dir }
    }

    /// Load the system prompt template for an agent kind.
    /// Files named `<kind>.md` in `override_dir` take precedence.
    pub fn load_template(&self, kind: AgentKind) -> Result<String> {
        if let Some(dir) = &self.override_dir {
            let path = Path::new(dir).join(format!("{}.md", kind.as_str()));
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    Error::Prompt(format!(
                        "failed to read override template {}: {e}",
                        path.display()
                    ))
                });
            }
        }
        Ok(default_template(kind).to_string())
    }

    /// Render the full system prompt for one analyzer.
    pub fn render_system(
        &self,
        kind: AgentKind,
        category: ProductCategory,
        max_tokens: u32,
    ) -> Result<String> {
        let template = self.load_template(kind)?;
        let mut vars = HashMap::new();
        vars.insert("category".to_string(), category.as_str().to_string());
        vars.insert("max_tokens".to_string(), max_tokens.to_string());
        vars.insert(
            "focus_areas".to_string(),
            focus_areas(kind, category).join("\n- "),
        );
        self.render(kind.as_str(), &template, &vars)
    }

    /// Compile and fill one template. `label` names the template in every
    /// error, so a broken override file points at the agent it belongs to
    /// rather than at the engine.
    fn render(
        &self,
        label: &str,
        template: &str,
        vars: &HashMap<String, String>,
    ) -> Result<String> {
        let values = upon::to_value(vars)
            .map_err(|e| Error::Prompt(format!("{label} template values: {e}")))?;
        let engine = upon::Engine::new();
        let program = engine
            .compile(template)
            .map_err(|e| Error::Prompt(format!("{label} template does not compile: {e}")))?;
        program
            .render(&engine, values)
            .to_string()
            .map_err(|e| Error::Prompt(format!("{label} template did not render: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Focus areas per (agent kind, product category)
// ---------------------------------------------------------------------------

/// Category-specific focus list for a department specialization.
/// Master and advisor use a shared cross-cutting list.
pub fn focus_areas(kind: AgentKind, category: ProductCategory) -> &'static [&'static str] {
    use AgentKind::*;
    use ProductCategory::*;

    match (kind, category) {
        (Quality, Electronics) => &[
            "Product durability and build quality",
            "Technical performance and reliability",
            "Battery life and power efficiency",
            "Manufacturing defects or inconsistencies",
        ],
        (Quality, Fashion) => &[
            "Fabric quality and material durability",
            "Stitching and construction quality",
            "Fit and sizing accuracy",
            "Color fastness after washing",
        ],
        (Quality, HomeGarden) => &[
            "Material quality and durability",
            "Construction and assembly quality",
            "Safety and reliability in daily use",
            "Long-term value and longevity",
        ],
        (Quality, BeautyHealth) => &[
            "Product effectiveness and visible results",
            "Ingredient quality and safety",
            "Skin compatibility and adverse reactions",
            "Shelf life and packaging integrity",
        ],
        (Quality, SportsOutdoors) => &[
            "Durability under heavy and outdoor use",
            "Material resilience to weather and impact",
            "Consistency of performance across sessions",
            "Safety under load and stress",
        ],
        (Quality, BooksMedia) => &[
            "Print, binding, or media production quality",
            "Editing and factual accuracy",
            "Completeness of the content as advertised",
            "Physical condition on arrival",
        ],

        (Experience, Electronics) => &[
            "Customer service and technical support",
            "Delivery speed and packaging quality",
            "Warranty and return process",
            "Installation and setup experience",
        ],
        (Experience, Fashion) => &[
            "Customer service and styling advice",
            "Delivery and packaging presentation",
            "Return and exchange process",
            "Size recommendations and fitting help",
        ],
        (Experience, HomeGarden) => &[
            "Customer service and purchase advice",
            "Delivery and installation service",
            "Assembly instructions and support",
            "Warranty and maintenance service",
        ],
        (Experience, BeautyHealth) => &[
            "Customer service and consultation",
            "Delivery and packaging condition",
            "Return and refund process",
            "Usage guidance and aftercare advice",
        ],
        (Experience, SportsOutdoors) => &[
            "Customer service and gear advice",
            "Delivery reliability for seasonal needs",
            "Return process for sizing and fit",
            "Warranty handling for worn equipment",
        ],
        (Experience, BooksMedia) => &[
            "Order accuracy and availability",
            "Delivery speed and protective packaging",
            "Return process for damaged items",
            "Responsiveness of customer support",
        ],

        (UserExperience, Electronics) => &[
            "Ease of use and interface clarity",
            "Design aesthetics and ergonomics",
            "Feature satisfaction and delight",
            "Everyday convenience and lifestyle fit",
        ],
        (UserExperience, Fashion) => &[
            "Style and design appeal",
            "Comfort and wearability",
            "Confidence and self-expression",
            "Versatility across occasions",
        ],
        (UserExperience, HomeGarden) => &[
            "Aesthetic appeal in the home",
            "Ease of use and convenience",
            "Comfort and day-to-day satisfaction",
            "Pride and enjoyment of the space",
        ],
        (UserExperience, BeautyHealth) => &[
            "Sensory experience of application",
            "Confidence and self-esteem impact",
            "Ease of fitting into a routine",
            "Emotional payoff of the results",
        ],
        (UserExperience, SportsOutdoors) => &[
            "Comfort during extended activity",
            "Motivation and enjoyment of use",
            "Sense of achievement it enables",
            "Fit with an active lifestyle",
        ],
        (UserExperience, BooksMedia) => &[
            "Engagement and enjoyment of the content",
            "Emotional resonance and takeaways",
            "Readability and pacing",
            "Desire to recommend or revisit",
        ],

        (Business, Electronics) => &[
            "Market competitiveness and positioning",
            "Value for money and pricing perception",
            "Brand reputation and trust",
            "Customer retention potential",
        ],
        (Business, Fashion) => &[
            "Trend alignment and seasonality",
            "Price positioning and perceived value",
            "Brand image and desirability",
            "Repeat-purchase and loyalty signals",
        ],
        (Business, HomeGarden) => &[
            "Positioning in the home improvement market",
            "Value for money as an investment",
            "Brand trust and reliability perception",
            "Word-of-mouth potential among homeowners",
        ],
        (Business, BeautyHealth) => &[
            "Positioning against competing brands",
            "Price justification through results",
            "Trust and safety perception",
            "Subscription and repurchase potential",
        ],
        (Business, SportsOutdoors) => &[
            "Positioning among enthusiast brands",
            "Value perception for performance gear",
            "Community reputation and endorsements",
            "Upsell potential across the product line",
        ],
        (Business, BooksMedia) => &[
            "Positioning within the genre or format",
            "Price sensitivity for content",
            "Author or publisher brand strength",
            "Review-driven discovery potential",
        ],

        (Technical, Electronics) => &[
            "Specifications and measured performance",
            "Compatibility and integration",
            "Software and firmware quality",
            "Benchmark results versus claims",
        ],
        (Technical, Fashion) => &[
            "Fabric technology and construction methods",
            "Care requirements and maintenance",
            "Sustainability of materials",
            "Functional features and hardware",
        ],
        (Technical, HomeGarden) => &[
            "Specifications, capacity, and efficiency",
            "Safety features and compliance",
            "Energy and water consumption",
            "Integration with existing fixtures",
        ],
        (Technical, BeautyHealth) => &[
            "Active ingredients and formulations",
            "Clinically supported claims",
            "Dosage, concentration, and usage precision",
            "Interaction and sensitivity considerations",
        ],
        (Technical, SportsOutdoors) => &[
            "Measured performance and tolerances",
            "Material specifications and ratings",
            "Weatherproofing and certifications",
            "Weight, capacity, and sizing accuracy",
        ],
        (Technical, BooksMedia) => &[
            "Format quality: print, audio, or digital",
            "Edition accuracy and completeness",
            "Platform compatibility for digital media",
            "Supplementary material quality",
        ],

        // Synthesis roles share one cross-cutting list per category.
        (MasterAnalyst | BusinessAdvisor, _) => &[
            "Balance across quality, service, experience, business, and technical views",
            "Severity and frequency of the issues raised",
            "Credibility and specificity of the review evidence",
            "Overall customer outcome",
        ],
    }
}

// ---------------------------------------------------------------------------
// Workflow context builders
// ---------------------------------------------------------------------------

/// Department input: the review, plus a compact summary of earlier
/// department records when any exist.
pub fn department_context(review: &str, prior: &[AnalysisRecord]) -> String {
    if prior.is_empty() {
        return review.to_string();
    }
    let mut context = format!("{review}\n\nPREVIOUS AGENT ANALYSES:\n");
    for record in prior {
        context.push_str(&format!(
            "- {}: {} ({})\n",
            record.agent_type,
            record.sentiment,
            clip(&record.reasoning, 100)
        ));
    }
    context
}

/// Shared context for one discussion round: the review, every current
/// record, and the measured disagreement.
pub fn discussion_context(review: &str, records: &[AnalysisRecord], disagreement: f64) -> String {
    let mut context = format!("REVIEW: {review}\n\nCURRENT AGENT ANALYSES:\n");
    for record in records {
        context.push_str(&format!(
            "\n{} AGENT:\n- Sentiment: {} (confidence: {:.2})\n- Reasoning: {}\n",
            record.agent_type.to_uppercase(),
            record.sentiment,
            record.confidence,
            record.reasoning
        ));
    }
    context.push_str(&format!(
        "\nDISAGREEMENT LEVEL: {disagreement:.2}\n\n\
         Please discuss and refine your analyses considering the other agents' perspectives.\n"
    ));
    context
}

/// Per-agent refinement prompt for a discussion round.
pub fn refinement_prompt(kind: AgentKind, context: &str) -> String {
    format!(
        "You are the {} specialist.\n\n{context}\n\
         Based on the discussion above, provide your REFINED analysis of the review.\n\
         Consider the other agents' perspectives but maintain your specialized focus on {}.\n\
         Be willing to adjust your sentiment if other agents make valid points.",
        kind.as_str().to_uppercase(),
        kind.as_str()
    )
}

/// Master synthesis input: every department verdict plus the original review.
pub fn synthesis_input(records: &[AnalysisRecord], review: &str) -> String {
    let mut input = String::from("DEPARTMENT ANALYSES:\n\n");
    for record in records {
        input.push_str(&format!(
            "{} DEPARTMENT:\n- Sentiment: {} (confidence: {:.2})\n- Reasoning: {}\n\n",
            record.agent_type.to_uppercase(),
            record.sentiment,
            record.confidence,
            record.reasoning
        ));
    }
    input.push_str(&format!(
        "ORIGINAL REVIEW: {review}\n\nProvide your final synthesis:"
    ));
    input
}

/// Advisor input: master verdict, department one-liners, original review.
pub fn recommendation_input(
    master: &AnalysisRecord,
    records: &[AnalysisRecord],
    review: &str,
) -> String {
    let mut input = String::from("SENTIMENT ANALYSIS RESULTS:\n\n");
    input.push_str(&format!(
        "MASTER ANALYST FINAL ASSESSMENT:\n- Final Sentiment: {} (confidence: {:.2})\n- Reasoning: {}\n\n",
        master.sentiment, master.confidence, master.reasoning
    ));
    input.push_str("DEPARTMENT INSIGHTS:\n");
    for record in records {
        input.push_str(&format!(
            "- {}: {}\n",
            record.agent_type.to_uppercase(),
            record.sentiment
        ));
    }
    input.push_str(&format!(
        "\nORIGINAL REVIEW: {review}\n\nProvide actionable business recommendations:"
    ));
    input
}

/// One transcript line per refined record in a discussion round.
pub fn transcript_line(record: &AnalysisRecord) -> String {
    format!(
        "{}: {} - {}...",
        record.agent_type.to_uppercase(),
        record.sentiment,
        clip(&record.reasoning, 100)
    )
}

fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
