use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{BatchPrediction, RiskCount};

pub const HIGH_RISK_THRESHOLD: f64 = 0.7;
pub const MEDIUM_RISK_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "High Risk")]
    High,
    #[serde(rename = "Medium Risk")]
    Medium,
    #[serde(rename = "Low Risk")]
    Low,
    /// Only produced for batch rows that failed to score.
    #[serde(rename = "Unknown")]
    Unknown,
}

impl RiskLevel {
    /// Tier for a dropout probability. Each tier includes its lower bound.
    pub fn from_probability(dropout_probability: f64) -> Self {
        if dropout_probability >= HIGH_RISK_THRESHOLD {
            RiskLevel::High
        } else if dropout_probability >= MEDIUM_RISK_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::High => "High Risk",
            RiskLevel::Medium => "Medium Risk",
            RiskLevel::Low => "Low Risk",
            RiskLevel::Unknown => "Unknown",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" | "high risk" => Some(RiskLevel::High),
            "medium" | "medium risk" => Some(RiskLevel::Medium),
            "low" | "low risk" => Some(RiskLevel::Low),
            "unknown" => Some(RiskLevel::Unknown),
            _ => None,
        }
    }

    /// Intervention checklist for advisors handling a student in this tier.
    pub fn recommendations(self) -> &'static [&'static str] {
        match self {
            RiskLevel::High => &[
                "Schedule intensive academic counselling immediately",
                "Assign dedicated mentoring and guidance",
                "Review financial and academic difficulties",
                "Consider a remedial program",
            ],
            RiskLevel::Medium => &[
                "Monitor academic progress regularly",
                "Offer additional academic support",
                "Hold a light-touch counselling session",
                "Track attendance and participation",
            ],
            RiskLevel::Low => &[
                "Maintain current academic performance",
                "Recognise and motivate the student",
                "Involve the student in leadership activities",
                "Continue routine monitoring",
            ],
            RiskLevel::Unknown => &[],
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Counts batch results per tier, highest tier first. Tiers with no rows are omitted.
pub fn risk_distribution(predictions: &[BatchPrediction]) -> Vec<RiskCount> {
    let mut counts: std::collections::BTreeMap<RiskLevel, usize> =
        std::collections::BTreeMap::new();

    for prediction in predictions {
        *counts.entry(prediction.result.risk_level).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .map(|(risk_level, count)| RiskCount { risk_level, count })
        .collect()
}

/// Batch rows sorted by dropout probability, most at risk first. Error rows are skipped.
pub fn rank_by_dropout(predictions: &[BatchPrediction]) -> Vec<&BatchPrediction> {
    let mut ranked: Vec<&BatchPrediction> =
        predictions.iter().filter(|p| !p.is_error()).collect();
    ranked.sort_by(|a, b| {
        b.result
            .dropout_probability
            .partial_cmp(&a.result.dropout_probability)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.student_id.cmp(&b.student_id))
    });
    ranked
}
