//! Label encoding for categorical columns and the target label.
//!
//! Tables are built once by `fit` and never mutated afterwards; inference only
//! ever calls `transform`/`decode` through shared references.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PredictError, Result};
use crate::models::FieldValue;

/// Code substituted for a category that was never seen during training.
///
/// This aliases unseen values to whichever category sorted first, so an
/// unexpected value is indistinguishable from that category downstream.
pub const FALLBACK_CODE: usize = 0;

/// Dense `0..k` codes for the distinct values of one column, in sorted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut classes: Vec<String> = values.into_iter().map(|v| v.as_ref().to_string()).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn code_of(&self, value: &str) -> Option<usize> {
        self.classes.binary_search_by(|c| c.as_str().cmp(value)).ok()
    }

    /// Code for `value`, or [`FALLBACK_CODE`] when the value is unseen.
    pub fn transform(&self, value: &str) -> usize {
        self.code_of(value).unwrap_or(FALLBACK_CODE)
    }

    pub fn class_of(&self, code: usize) -> Option<&str> {
        self.classes.get(code).map(String::as_str)
    }

    fn is_sorted_unique(&self) -> bool {
        self.classes.windows(2).all(|pair| pair[0] < pair[1])
    }
}

/// One encoder per categorical feature column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoricalEncoders {
    tables: BTreeMap<String, LabelEncoder>,
}

impl CategoricalEncoders {
    /// Builds a table for each `(column, values)` pair.
    pub fn fit<I, N, V>(columns: I) -> Self
    where
        I: IntoIterator<Item = (N, Vec<V>)>,
        N: Into<String>,
        V: AsRef<str>,
    {
        let tables = columns
            .into_iter()
            .map(|(name, values)| (name.into(), LabelEncoder::fit(values)))
            .collect();
        Self { tables }
    }

    pub fn get(&self, column: &str) -> Option<&LabelEncoder> {
        self.tables.get(column)
    }

    pub fn is_categorical(&self, column: &str) -> bool {
        self.tables.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Encodes `value` for `column`, applying the unseen-category fallback.
    /// Returns `None` when the column is not categorical.
    pub fn transform(&self, column: &str, value: &FieldValue) -> Option<usize> {
        self.tables
            .get(column)
            .map(|table| table.transform(&value.category_key()))
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        for (column, table) in &self.tables {
            if table.is_empty() {
                return Err(format!("encoder for {column} has no classes"));
            }
            if !table.is_sorted_unique() {
                return Err(format!("encoder for {column} is not sorted and unique"));
            }
        }
        Ok(())
    }
}

/// Encoder for the `Status` label. Unlike feature encoders, unknown labels are errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetEncoder {
    inner: LabelEncoder,
}

impl TargetEncoder {
    pub fn fit<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            inner: LabelEncoder::fit(labels),
        }
    }

    pub fn classes(&self) -> &[String] {
        self.inner.classes()
    }

    pub fn n_classes(&self) -> usize {
        self.inner.len()
    }

    pub fn encode(&self, label: &str) -> Result<usize> {
        self.inner
            .code_of(label)
            .ok_or_else(|| PredictError::UnknownLabel(label.to_string()))
    }

    pub fn decode(&self, code: usize) -> Result<&str> {
        self.inner
            .class_of(code)
            .ok_or(PredictError::UnknownClassCode(code))
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.inner.len() < 2 {
            return Err("target encoder must hold at least 2 classes".to_string());
        }
        if !self.inner.is_sorted_unique() {
            return Err("target classes are not sorted and unique".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_assigns_sorted_dense_codes() {
        let encoder = LabelEncoder::fit(["single", "married", "single", "divorced"]);
        assert_eq!(encoder.classes(), ["divorced", "married", "single"]);
        assert_eq!(encoder.transform("divorced"), 0);
        assert_eq!(encoder.transform("married"), 1);
        assert_eq!(encoder.transform("single"), 2);
    }

    #[test]
    fn unseen_category_falls_back_to_code_zero() {
        let encoder = LabelEncoder::fit(["b", "c"]);
        assert_eq!(encoder.transform("zzz"), FALLBACK_CODE);
        assert_eq!(encoder.transform("b"), FALLBACK_CODE);
    }

    #[test]
    fn bank_only_encodes_known_columns() {
        let bank = CategoricalEncoders::fit([("Course", vec!["Nursing", "Design"])]);
        assert_eq!(bank.transform("Course", &FieldValue::from("Nursing")), Some(1));
        assert_eq!(bank.transform("Course", &FieldValue::from("Law")), Some(0));
        assert_eq!(bank.transform("Age", &FieldValue::Number(20.0)), None);
    }

    #[test]
    fn numeric_input_matches_integer_categories() {
        let bank = CategoricalEncoders::fit([("Shift", vec!["1", "2", "x"])]);
        assert_eq!(bank.transform("Shift", &FieldValue::Number(2.0)), Some(1));
    }

    #[test]
    fn target_round_trips_every_fitted_label() {
        let target = TargetEncoder::fit(["Graduate", "Dropout", "Enrolled", "Dropout"]);
        for label in ["Dropout", "Enrolled", "Graduate"] {
            let code = target.encode(label).unwrap();
            assert_eq!(target.decode(code).unwrap(), label);
        }
        assert_eq!(target.encode("Dropout").unwrap(), 0);
    }

    #[test]
    fn target_rejects_unknown_labels_and_codes() {
        let target = TargetEncoder::fit(["Dropout", "Graduate"]);
        assert!(matches!(target.encode("Transferred"), Err(PredictError::UnknownLabel(_))));
        assert!(matches!(target.decode(5), Err(PredictError::UnknownClassCode(5))));
    }

    #[test]
    fn validation_flags_unsorted_tables() {
        let json = r#"{"Course": {"classes": ["b", "a"]}}"#;
        let bank: CategoricalEncoders = serde_json::from_str(json).unwrap();
        assert!(bank.validate().is_err());
    }
}
