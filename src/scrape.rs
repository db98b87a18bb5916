use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::record::truncate;

/// Minimum cleaned length for a review to be worth analyzing.
pub const MIN_REVIEW_CHARS: usize = 10;
/// Cleaned reviews longer than this are cut before aggregation.
pub const MAX_REVIEW_CHARS: usize = 2000;

/// One scraped review with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Seam to the external scraping pipeline. The core only consumes this
/// contract; concrete scrapers live outside the crate.
pub trait ReviewScraper: Send + Sync {
    fn scrape(
        &self,
        keyword: &str,
        sources: &[String],
        max_items_per_source: u32,
    ) -> Result<Vec<ReviewItem>>;
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Collapse whitespace and bound the length. Returns `None` for texts too
/// short to carry a usable signal.
pub fn clean_text(text: &str) -> Option<String> {
    let cleaned = whitespace_re().replace_all(text, " ").trim().to_string();
    if cleaned.chars().count() < MIN_REVIEW_CHARS {
        return None;
    }
    Some(truncate(&cleaned, MAX_REVIEW_CHARS))
}

/// Concatenate scraped reviews into one provenance-labelled analysis
/// dataset, returning the combined text plus scraping metadata for the
/// workflow report.
pub fn combine_reviews(items: &[ReviewItem], product_name: &str) -> (String, Value) {
    let cleaned: Vec<(String, String)> = items
        .iter()
        .filter_map(|item| clean_text(&item.text).map(|text| (text, item.source.clone())))
        .collect();

    let sources: BTreeSet<&str> = cleaned.iter().map(|(_, source)| source.as_str()).collect();
    let mut by_source: BTreeMap<String, usize> = BTreeMap::new();
    for (_, source) in &cleaned {
        *by_source.entry(source.clone()).or_insert(0) += 1;
    }

    let mut combined = format!(
        "COMPREHENSIVE PRODUCT ANALYSIS DATASET\n\
         Product: {product_name}\n\
         Total Reviews: {}\n\
         Sources: {}\n\n",
        cleaned.len(),
        sources.iter().copied().collect::<Vec<_>>().join(", ")
    );

    for (index, (text, source)) in cleaned.iter().enumerate() {
        combined.push_str(&format!(
            "REVIEW {} (Source: {}):\n{text}\n\n",
            index + 1,
            source.to_uppercase()
        ));
    }

    combined.push_str(&format!(
        "ANALYSIS INSTRUCTION:\n\
         Analyze all {} customer reviews above as one dataset and provide an overall \
         sentiment assessment and business recommendations for {product_name}.",
        cleaned.len()
    ));

    let metadata = serde_json::json!({
        "product_name": product_name,
        "total_reviews": cleaned.len(),
        "sources_used": sources.iter().copied().collect::<Vec<_>>(),
        "reviews_by_source": by_source,
    });

    (combined, metadata)
}
