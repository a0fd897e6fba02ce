//! Persona reviews and their weighted aggregation.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use nodeflow_core::persona::SUMMARIZER_ID;

use super::plan::lenient_strings;

/// Weights of the four review dimensions in the aggregated score.
pub const WEIGHT_PURPOSE: f64 = 0.4;
pub const WEIGHT_CONSTRAINTS: f64 = 0.3;
pub const WEIGHT_QUALITY: f64 = 0.2;
pub const WEIGHT_FEASIBILITY: f64 = 0.1;

const MAX_PRIORITY_IMPROVEMENTS: usize = 10;

/// Read a score, clamped to [0, 1]. Numeric strings are accepted;
/// anything else counts as 0.
fn lenient_score<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(clamp_score(raw))
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewScores {
    #[serde(default, deserialize_with = "lenient_score")]
    pub purpose_achievement: f64,
    #[serde(default, deserialize_with = "lenient_score")]
    pub constraint_compliance: f64,
    #[serde(default, deserialize_with = "lenient_score")]
    pub quality_standards: f64,
    #[serde(default, deserialize_with = "lenient_score")]
    pub feasibility: f64,
}

impl ReviewScores {
    /// Weighted overall score.
    pub fn weighted(&self) -> f64 {
        let total = self.purpose_achievement * WEIGHT_PURPOSE
            + self.constraint_compliance * WEIGHT_CONSTRAINTS
            + self.quality_standards * WEIGHT_QUALITY
            + self.feasibility * WEIGHT_FEASIBILITY;
        clamp_score(total)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(match raw.as_str().map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("high") => Self::High,
            Some("low") => Self::Low,
            _ => Self::Medium,
        })
    }
}

/// One persona's assessment of the current content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaReview {
    #[serde(default)]
    pub persona_id: String,
    #[serde(default)]
    pub scores: ReviewScores,
    #[serde(default, deserialize_with = "lenient_score")]
    pub overall_score: f64,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub strengths: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub weaknesses: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub verification_needed: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub assumptions: Vec<String>,
}

impl PersonaReview {
    /// Zero-scored stand-in for a review that could not be read.
    pub fn invalid(persona_id: &str) -> Self {
        Self {
            persona_id: persona_id.to_string(),
            scores: ReviewScores::default(),
            overall_score: 0.0,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            improvements: Vec::new(),
            priority: Priority::Medium,
            verification_needed: Vec::new(),
            assumptions: vec!["Invalid response format".into()],
        }
    }

    pub fn from_response(persona_id: &str, response: Option<Value>) -> Self {
        let Some(value) = response else {
            return Self::invalid(persona_id);
        };
        match serde_json::from_value::<Self>(value) {
            Ok(mut review) => {
                review.persona_id = persona_id.to_string();
                review
            }
            Err(e) => {
                warn!(persona = persona_id, error = %e, "Malformed persona review");
                Self::invalid(persona_id)
            }
        }
    }

    pub fn is_summarizer(&self) -> bool {
        self.persona_id == SUMMARIZER_ID
    }
}

/// Combined result of one quality-check pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedReview {
    pub scores: ReviewScores,
    pub overall_score: f64,
    pub key_strengths: Vec<String>,
    pub key_weaknesses: Vec<String>,
    pub priority_improvements: Vec<String>,
    pub next_steps: Vec<String>,
}

/// Order-preserving, case-insensitive de-duplication.
fn dedup<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Aggregate the non-summarizer reviews of one pass.
///
/// Each dimension is the mean across reviewers and the overall score is
/// their weighted sum. Improvements are ordered by reviewer priority.
pub fn aggregate(reviews: &[PersonaReview]) -> AggregatedReview {
    let scoring: Vec<&PersonaReview> = reviews.iter().filter(|r| !r.is_summarizer()).collect();
    if scoring.is_empty() {
        return AggregatedReview::default();
    }

    let n = scoring.len() as f64;
    let mean = |f: fn(&ReviewScores) -> f64| scoring.iter().map(|r| f(&r.scores)).sum::<f64>() / n;
    let scores = ReviewScores {
        purpose_achievement: mean(|s| s.purpose_achievement),
        constraint_compliance: mean(|s| s.constraint_compliance),
        quality_standards: mean(|s| s.quality_standards),
        feasibility: mean(|s| s.feasibility),
    };

    let mut by_priority = scoring.clone();
    by_priority.sort_by_key(|r| r.priority);
    let mut priority_improvements = dedup(by_priority.iter().flat_map(|r| r.improvements.iter()));
    priority_improvements.truncate(MAX_PRIORITY_IMPROVEMENTS);

    AggregatedReview {
        overall_score: scores.weighted(),
        scores,
        key_strengths: dedup(scoring.iter().flat_map(|r| r.strengths.iter())),
        key_weaknesses: dedup(scoring.iter().flat_map(|r| r.weaknesses.iter())),
        priority_improvements,
        next_steps: dedup(scoring.iter().flat_map(|r| r.verification_needed.iter())),
    }
}
