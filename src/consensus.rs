use std::collections::BTreeMap;

use crate::record::{AnalysisRecord, Sentiment};

/// Outcome of one consensus check over the current department records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusCheck {
    /// `1 - max_count / total`. 0.0 means unanimous.
    pub disagreement: f64,
    pub consensus_reached: bool,
    /// Plurality sentiment; ties break lexicographically on the tag.
    pub plurality: Sentiment,
}

/// Count records per sentiment. BTreeMap keys are ordered by tag, which
/// gives the deterministic tie-break for free.
pub fn sentiment_distribution(records: &[AnalysisRecord]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.sentiment.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Evaluate disagreement against a threshold. Fewer than two records cannot
/// disagree: the metric is 0 and consensus holds.
pub fn check(records: &[AnalysisRecord], threshold: f64) -> ConsensusCheck {
    if records.len() < 2 {
        return ConsensusCheck {
            disagreement: 0.0,
            consensus_reached: true,
            plurality: records
                .first()
                .map(|r| r.sentiment)
                .unwrap_or(Sentiment::Neutral),
        };
    }

    let counts = sentiment_distribution(records);
    let (plurality_tag, max_count) = counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(tag, count)| (*tag, *count))
        .expect("non-empty records");

    let disagreement = 1.0 - max_count as f64 / records.len() as f64;

    ConsensusCheck {
        disagreement,
        consensus_reached: disagreement < threshold,
        plurality: Sentiment::parse(plurality_tag),
    }
}
