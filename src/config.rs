use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable holding the Postgres connection string for the risk ledger.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
/// Where `train` writes the bundle and the other commands read it from by default.
pub const DEFAULT_MODEL_PATH: &str = "dropout_model.json";

/// Random forest hyperparameters. Stored in the bundle alongside the trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
            seed: 42,
        }
    }
}

impl ForestConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.n_trees == 0 {
            return Err("n_trees must be at least 1".to_string());
        }
        if self.max_depth == 0 {
            return Err("max_depth must be at least 1".to_string());
        }
        if self.min_samples_split < 2 {
            return Err("min_samples_split must be at least 2".to_string());
        }
        if self.min_samples_leaf == 0 {
            return Err("min_samples_leaf must be at least 1".to_string());
        }
        Ok(())
    }
}

pub fn database_url() -> anyhow::Result<String> {
    std::env::var(DATABASE_URL_ENV)
        .context("DATABASE_URL must be set to a Postgres instance for ledger commands")
}
