//! Training, inference and persistence of the dropout model.
//!
//! A [`TrainedBundle`] holds everything needed to reproduce predictions: the
//! forest, the fitted encoders, the ordered feature names and the retained
//! scaler. [`DropoutPredictor`] wraps an optional bundle and never mutates it
//! while scoring, so a loaded predictor can be shared across threads.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::align::{align_record, unexpected_fields};
use crate::config::ForestConfig;
use crate::dataset::Dataset;
use crate::encoding::{CategoricalEncoders, TargetEncoder};
use crate::error::{PredictError, Result};
use crate::forest::{argmax, RandomForest};
use crate::models::{BatchPrediction, FeatureImportance, PredictionResult, StudentRecord, DROPOUT_CLASS};
use crate::risk::RiskLevel;
use crate::scaler::StandardScaler;

/// Bumped whenever the serialized bundle layout changes.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedBundle {
    pub format_version: u32,
    pub model: RandomForest,
    pub scaler: StandardScaler,
    pub label_encoders: CategoricalEncoders,
    pub target_encoder: TargetEncoder,
    pub feature_names: Vec<String>,
    pub is_trained: bool,
    pub trained_at: DateTime<Utc>,
}

impl TrainedBundle {
    /// Checks that every member is present and consistent with the others.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(PredictError::ArtifactFormat(message));

        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(PredictError::IncompatibleArtifact {
                found: self.format_version,
                expected: BUNDLE_FORMAT_VERSION,
            });
        }
        if !self.is_trained {
            return fail("bundle is not marked as trained".to_string());
        }
        if self.feature_names.is_empty() {
            return fail("bundle has no feature names".to_string());
        }
        let mut names: Vec<&String> = self.feature_names.iter().collect();
        names.sort();
        names.dedup();
        if names.len() != self.feature_names.len() {
            return fail("feature names are not unique".to_string());
        }
        self.model.validate().map_err(PredictError::ArtifactFormat)?;
        if self.model.n_features() != self.feature_names.len() {
            return fail(format!(
                "model expects {} features but bundle names {}",
                self.model.n_features(),
                self.feature_names.len()
            ));
        }
        self.scaler.validate().map_err(PredictError::ArtifactFormat)?;
        if self.scaler.n_features() != self.feature_names.len() {
            return fail("scaler width does not match feature names".to_string());
        }
        self.target_encoder.validate().map_err(PredictError::ArtifactFormat)?;
        if self.target_encoder.n_classes() != self.model.n_classes() {
            return fail(format!(
                "target encoder has {} classes but model predicts {}",
                self.target_encoder.n_classes(),
                self.model.n_classes()
            ));
        }
        self.label_encoders.validate().map_err(PredictError::ArtifactFormat)?;
        if let Some(column) = self
            .label_encoders
            .columns()
            .find(|column| !self.feature_names.iter().any(|name| name == column))
        {
            return fail(format!("encoder column {column} is not a model feature"));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    format_version: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DropoutPredictor {
    bundle: Option<TrainedBundle>,
}

impl DropoutPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bundle(bundle: TrainedBundle) -> Result<Self> {
        bundle.validate()?;
        Ok(Self {
            bundle: Some(bundle),
        })
    }

    pub fn is_trained(&self) -> bool {
        self.bundle.as_ref().is_some_and(|bundle| bundle.is_trained)
    }

    pub fn bundle(&self) -> Option<&TrainedBundle> {
        self.bundle.as_ref()
    }

    fn trained(&self) -> Result<&TrainedBundle> {
        self.bundle
            .as_ref()
            .filter(|bundle| bundle.is_trained)
            .ok_or(PredictError::NotTrained)
    }

    /// Fits encoders, forest and scaler on `dataset`, replacing any loaded bundle.
    pub fn train(&mut self, dataset: &Dataset, config: &ForestConfig) -> Result<&TrainedBundle> {
        info!(
            rows = dataset.len(),
            trees = config.n_trees,
            max_depth = config.max_depth,
            "training dropout model"
        );

        let feature_names = dataset.columns().to_vec();
        let label_encoders = CategoricalEncoders::fit(
            dataset
                .categorical_columns()
                .into_iter()
                .map(|column| (column.to_string(), dataset.column_keys(column))),
        );
        let target_encoder = TargetEncoder::fit(dataset.statuses());

        let y = dataset
            .statuses()
            .iter()
            .map(|status| target_encoder.encode(status))
            .collect::<Result<Vec<usize>>>()?;
        let x: Vec<Vec<f64>> = dataset
            .records()
            .iter()
            .map(|record| align_record(record, &feature_names, &label_encoders))
            .collect();

        let model = RandomForest::fit(&x, &y, target_encoder.n_classes(), config)?;
        let scaler = StandardScaler::fit(&x);

        let bundle = TrainedBundle {
            format_version: BUNDLE_FORMAT_VERSION,
            model,
            scaler,
            label_encoders,
            target_encoder,
            feature_names,
            is_trained: true,
            trained_at: Utc::now(),
        };
        bundle.validate()?;
        info!(
            features = bundle.feature_names.len(),
            categorical = bundle.label_encoders.len(),
            classes = bundle.target_encoder.n_classes(),
            "model training completed"
        );

        Ok(&*self.bundle.insert(bundle))
    }

    /// Aligned feature vector for `record`, exactly as the classifier sees it.
    pub fn features_for(&self, record: &StudentRecord) -> Result<Vec<f64>> {
        let bundle = self.trained()?;
        Ok(align_record(record, &bundle.feature_names, &bundle.label_encoders))
    }

    pub fn predict_single(&self, record: &StudentRecord) -> Result<PredictionResult> {
        let bundle = self.trained()?;
        let features = align_record(record, &bundle.feature_names, &bundle.label_encoders);
        bundle.model.check_features(&features, &bundle.feature_names)?;

        let distribution = bundle.model.predict_proba(&features)?;
        let predicted_status = bundle.target_encoder.decode(argmax(&distribution))?.to_string();

        let probabilities: BTreeMap<String, f64> = bundle
            .target_encoder
            .classes()
            .iter()
            .cloned()
            .zip(distribution)
            .collect();
        let dropout_probability = probabilities.get(DROPOUT_CLASS).copied().unwrap_or(0.0);

        Ok(PredictionResult {
            predicted_status,
            probabilities,
            dropout_probability,
            risk_level: RiskLevel::from_probability(dropout_probability),
        })
    }

    /// Scores every record independently. A record that fails becomes an
    /// error placeholder; the rest of the batch is unaffected.
    pub fn predict_batch(&self, records: &[StudentRecord]) -> Vec<BatchPrediction> {
        let mut ignored_fields = 0usize;
        let predictions: Vec<BatchPrediction> = records
            .iter()
            .enumerate()
            .map(|(student_id, record)| {
                if let Some(bundle) = self.bundle.as_ref() {
                    ignored_fields += unexpected_fields(record, &bundle.feature_names).len();
                }
                match self.predict_single(record) {
                    Ok(result) => BatchPrediction { student_id, result },
                    Err(err) => {
                        warn!(student_id, error = %err, "failed to score student");
                        BatchPrediction::error(student_id)
                    }
                }
            })
            .collect();

        let failed = predictions.iter().filter(|p| p.is_error()).count();
        info!(
            scored = predictions.len() - failed,
            failed,
            ignored_fields,
            "batch prediction finished"
        );
        predictions
    }

    /// Features ranked by importance, most important first.
    pub fn feature_importances(&self) -> Result<Vec<FeatureImportance>> {
        let bundle = self.trained()?;
        let mut ranked: Vec<FeatureImportance> = bundle
            .feature_names
            .iter()
            .zip(bundle.model.feature_importances())
            .map(|(feature, importance)| FeatureImportance {
                feature: feature.clone(),
                importance: *importance,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(ranked)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bundle = self.trained()?;
        let bytes = serde_json::to_vec(bundle)
            .map_err(|err| PredictError::ArtifactFormat(err.to_string()))?;
        std::fs::write(path, bytes).map_err(|source| PredictError::ArtifactWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "model saved");
        Ok(())
    }

    /// Reads and validates a bundle. Nothing is kept if any check fails.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|source| PredictError::ArtifactRead {
            path: path.to_path_buf(),
            source,
        })?;
        let predictor = Self::from_slice(&bytes)?;
        info!(path = %path.display(), "model loaded");
        Ok(predictor)
    }

    /// Replaces the current bundle with the one at `path`. On failure the
    /// current bundle is left untouched.
    pub fn reload(&mut self, path: &Path) -> Result<()> {
        let loaded = Self::load(path)?;
        self.bundle = loaded.bundle;
        Ok(())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let probe: VersionProbe = serde_json::from_slice(bytes)
            .map_err(|err| PredictError::ArtifactFormat(err.to_string()))?;
        if probe.format_version != BUNDLE_FORMAT_VERSION {
            return Err(PredictError::IncompatibleArtifact {
                found: probe.format_version,
                expected: BUNDLE_FORMAT_VERSION,
            });
        }
        let bundle: TrainedBundle = serde_json::from_slice(bytes)
            .map_err(|err| PredictError::ArtifactFormat(err.to_string()))?;
        Self::from_bundle(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;

    /// Small cohort where a missed tuition payment and low grades mean dropout.
    fn cohort() -> Dataset {
        let mut csv = String::from(
            "Course;Daytime_evening_attendance;Tuition_fees_up_to_date;Curricular_units_2nd_sem_grade;Age_at_enrollment;Status\n",
        );
        for i in 0..90 {
            let course = ["Nursing", "Design", "Tourism"][i % 3];
            let row = match i % 3 {
                0 => format!("{course};1;0;{};{};Dropout\n", 2 + i % 4, 25 + i % 6),
                1 => format!("{course};1;1;{};{};Graduate\n", 13 + i % 4, 19 + i % 3),
                _ => format!("{course};0;1;{};{};Enrolled\n", 9 + i % 3, 21 + i % 5),
            };
            csv.push_str(&row);
        }
        Dataset::from_reader(csv.as_bytes()).unwrap()
    }

    fn trained() -> DropoutPredictor {
        let config = ForestConfig {
            n_trees: 20,
            ..ForestConfig::default()
        };
        let mut predictor = DropoutPredictor::new();
        predictor.train(&cohort(), &config).unwrap();
        predictor
    }

    fn likely_dropout() -> StudentRecord {
        StudentRecord::new()
            .with("Course", "Nursing")
            .with("Daytime_evening_attendance", 1i64)
            .with("Tuition_fees_up_to_date", 0i64)
            .with("Curricular_units_2nd_sem_grade", 3.0)
            .with("Age_at_enrollment", 27i64)
    }

    #[test]
    fn untrained_predictor_reports_not_trained() {
        let predictor = DropoutPredictor::new();
        assert!(!predictor.is_trained());
        assert!(matches!(
            predictor.predict_single(&likely_dropout()),
            Err(PredictError::NotTrained)
        ));
        assert!(matches!(predictor.feature_importances(), Err(PredictError::NotTrained)));
    }

    #[test]
    fn training_records_schema_and_encoders() {
        let predictor = trained();
        let bundle = predictor.bundle().unwrap();
        assert_eq!(bundle.feature_names.len(), 5);
        assert!(bundle.label_encoders.is_categorical("Course"));
        assert!(!bundle.label_encoders.is_categorical("Age_at_enrollment"));
        assert_eq!(bundle.target_encoder.classes(), ["Dropout", "Enrolled", "Graduate"]);
        assert_eq!(bundle.scaler.n_features(), 5);
    }

    #[test]
    fn predicts_dropout_with_high_risk() {
        let result = trained().predict_single(&likely_dropout()).unwrap();
        assert_eq!(result.predicted_status, "Dropout");
        assert_eq!(result.dropout_probability, result.probabilities["Dropout"]);
        assert_eq!(result.risk_level, RiskLevel::from_probability(result.dropout_probability));
        assert!(result.dropout_probability >= 0.7);
        let total: f64 = result.probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn partial_record_still_scores() {
        let predictor = trained();
        let record = StudentRecord::new().with("Curricular_units_2nd_sem_grade", 14.0);
        let features = predictor.features_for(&record).unwrap();
        assert_eq!(features.len(), 5);
        let result = predictor.predict_single(&record).unwrap();
        assert_eq!(result.probabilities.len(), 3);
    }

    #[test]
    fn batch_isolates_malformed_records() {
        let predictor = trained();
        let records = vec![
            likely_dropout(),
            likely_dropout().with("Age_at_enrollment", FieldValue::from("unknown")),
            likely_dropout().with("Nickname", "Sam"),
        ];
        let results = predictor.predict_batch(&records);
        assert_eq!(results.len(), 3);
        assert!(!results[0].is_error());
        assert!(results[1].is_error());
        assert_eq!(results[1].student_id, 1);
        assert_eq!(results[1].result.risk_level, RiskLevel::Unknown);
        assert!(!results[2].is_error());
        assert_eq!(results[2].result, results[0].result);
    }

    #[test]
    fn malformed_single_record_names_the_field() {
        let record = likely_dropout().with("Age_at_enrollment", FieldValue::from("n/a"));
        match trained().predict_single(&record) {
            Err(PredictError::NonFiniteFeature { name }) => assert_eq!(name, "Age_at_enrollment"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn importances_are_ranked_and_normalized() {
        let ranked = trained().feature_importances().unwrap();
        assert_eq!(ranked.len(), 5);
        assert!(ranked.windows(2).all(|pair| pair[0].importance >= pair[1].importance));
        let total: f64 = ranked.iter().map(|f| f.importance).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn save_and_load_reproduce_predictions() {
        let predictor = trained();
        let before = predictor.predict_single(&likely_dropout()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropout_model.json");
        predictor.save(&path).unwrap();

        let restored = DropoutPredictor::load(&path).unwrap();
        assert_eq!(restored.bundle(), predictor.bundle());
        assert_eq!(restored.predict_single(&likely_dropout()).unwrap(), before);
    }

    #[test]
    fn saving_untrained_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        assert!(matches!(DropoutPredictor::new().save(&path), Err(PredictError::NotTrained)));
        assert!(!path.exists());
    }

    #[test]
    fn load_rejects_missing_and_malformed_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            DropoutPredictor::load(&missing),
            Err(PredictError::ArtifactRead { .. })
        ));

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, b"not json").unwrap();
        assert!(matches!(
            DropoutPredictor::load(&garbage),
            Err(PredictError::ArtifactFormat(_))
        ));
    }

    #[test]
    fn load_rejects_incomplete_bundle() {
        let predictor = trained();
        let mut value = serde_json::to_value(predictor.bundle().unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("target_encoder");
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            DropoutPredictor::from_slice(&bytes),
            Err(PredictError::ArtifactFormat(_))
        ));
    }

    #[test]
    fn load_rejects_other_format_versions() {
        let predictor = trained();
        let mut value = serde_json::to_value(predictor.bundle().unwrap()).unwrap();
        value["format_version"] = serde_json::json!(99);
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            DropoutPredictor::from_slice(&bytes),
            Err(PredictError::IncompatibleArtifact { found: 99, .. })
        ));
    }

    #[test]
    fn load_rejects_inconsistent_feature_names() {
        let predictor = trained();
        let mut bundle = predictor.bundle().unwrap().clone();
        bundle.feature_names.pop();
        assert!(matches!(
            DropoutPredictor::from_bundle(bundle),
            Err(PredictError::ArtifactFormat(_))
        ));
    }

    #[test]
    fn failed_reload_keeps_current_bundle() {
        let mut predictor = trained();
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, b"{}").unwrap();
        assert!(predictor.reload(&garbage).is_err());
        assert!(predictor.is_trained());
    }

    #[test]
    fn predictor_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DropoutPredictor>();
    }
}
