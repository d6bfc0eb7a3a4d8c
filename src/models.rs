use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::risk::RiskLevel;

/// Name of the label column in the training data.
pub const STATUS_COLUMN: &str = "Status";
/// Class whose probability drives the risk tier.
pub const DROPOUT_CLASS: &str = "Dropout";
/// Status reported for a batch row that could not be scored.
pub const ERROR_STATUS: &str = "Error";

/// A single raw field value as it arrives from CSV, JSON or the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Parses a raw cell: anything that reads as a float is numeric.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(value) => FieldValue::Number(value),
            Err(_) => FieldValue::Text(trimmed.to_string()),
        }
    }

    /// Numeric view of the value. Text that does not parse becomes NaN.
    pub fn as_number(&self) -> f64 {
        match self {
            FieldValue::Number(value) => *value,
            FieldValue::Text(text) => text.trim().parse().unwrap_or(f64::NAN),
        }
    }

    /// Key used to look the value up in a categorical encoder table.
    pub fn category_key(&self) -> String {
        match self {
            FieldValue::Number(value) => format_number(*value),
            FieldValue::Text(text) => text.clone(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.category_key())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// One student's fields keyed by column name. Partial records are allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl StudentRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// The fields the single-student form asks for, at their initial values.
    pub fn form_defaults() -> Self {
        Self::new()
            .with("Age_at_enrollment", 20i64)
            .with("Admission_grade", 140.0)
            .with("Previous_qualification_grade", 140.0)
            .with("Curricular_units_1st_sem_grade", 12.0)
            .with("Curricular_units_2nd_sem_grade", 12.0)
            .with("Curricular_units_1st_sem_approved", 6i64)
            .with("Curricular_units_2nd_sem_approved", 6i64)
            .with("Gender", 0i64)
            .with("Marital_status", 1i64)
            .with("Tuition_fees_up_to_date", 1i64)
            .with("Scholarship_holder", 0i64)
            .with("Debtor", 0i64)
            .with("Displaced", 0i64)
            .with("International", 0i64)
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for StudentRecord {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut record = StudentRecord::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

/// Outcome of scoring one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_status: String,
    pub probabilities: BTreeMap<String, f64>,
    pub dropout_probability: f64,
    pub risk_level: RiskLevel,
}

/// A batch row: the prediction plus the row index it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPrediction {
    pub student_id: usize,
    #[serde(flatten)]
    pub result: PredictionResult,
}

impl BatchPrediction {
    /// Placeholder for a row that failed to score.
    pub fn error(student_id: usize) -> Self {
        Self {
            student_id,
            result: PredictionResult {
                predicted_status: ERROR_STATUS.to_string(),
                probabilities: BTreeMap::new(),
                dropout_probability: 0.0,
                risk_level: RiskLevel::Unknown,
            },
        }
    }

    pub fn is_error(&self) -> bool {
        self.result.predicted_status == ERROR_STATUS && self.result.risk_level == RiskLevel::Unknown
    }
}

/// Feature name with its impurity-based importance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Headline numbers for a labelled cohort.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortOverview {
    pub total_students: usize,
    pub graduates: usize,
    pub dropouts: usize,
    pub enrolled: usize,
    pub dropout_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusCount {
    pub status: String,
    pub count: usize,
}

/// Counts of each status per value of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Crosstab {
    pub column: String,
    pub statuses: Vec<String>,
    pub rows: Vec<(String, Vec<usize>)>,
}

/// Equal-width histogram of a numeric feature, one count series per status.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureHistogram {
    pub feature: String,
    pub edges: Vec<f64>,
    pub series: Vec<(String, Vec<usize>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskCount {
    pub risk_level: RiskLevel,
    pub count: usize,
}

/// A prediction stored in the risk ledger.
#[derive(Debug, Clone)]
pub struct RecordedPrediction {
    pub id: Uuid,
    pub run_id: Uuid,
    pub cohort: String,
    pub student_id: i64,
    pub predicted_status: String,
    pub dropout_probability: f64,
    pub risk_level: String,
    pub scored_at: DateTime<Utc>,
}
