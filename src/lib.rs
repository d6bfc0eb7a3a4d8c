//! Student dropout risk prediction.
//!
//! Trains a random forest on the semicolon-delimited student performance
//! export, aligns arbitrary student records to the training schema and turns
//! the dropout probability into a risk tier.

pub mod align;
pub mod analysis;
pub mod config;
pub mod dataset;
pub mod db;
pub mod encoding;
pub mod error;
pub mod forest;
pub mod logging;
pub mod models;
pub mod predictor;
pub mod report;
pub mod risk;
pub mod scaler;

pub use config::ForestConfig;
pub use dataset::Dataset;
pub use error::PredictError;
pub use models::{BatchPrediction, FieldValue, PredictionResult, StudentRecord};
pub use predictor::{DropoutPredictor, TrainedBundle};
pub use risk::RiskLevel;
