use serde::{Deserialize, Serialize};

/// Per-column standardization (`(x - mean) / std`), fitted alongside the forest.
///
/// Trees are scale invariant so prediction does not use it; it travels with
/// the bundle so downstream consumers get the same statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Population mean and standard deviation of each column. Constant columns get scale 1.
    pub fn fit(x: &[Vec<f64>]) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let n = x.len().max(1) as f64;
        let mut mean = vec![0.0; n_features];
        for row in x {
            for (acc, value) in mean.iter_mut().zip(row) {
                *acc += value;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut variance = vec![0.0; n_features];
        for row in x {
            for ((acc, value), m) in variance.iter_mut().zip(row).zip(&mean) {
                *acc += (value - m) * (value - m);
            }
        }
        let scale = variance
            .into_iter()
            .map(|v| {
                let std = (v / n).sqrt();
                if std > 0.0 {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        Self { mean, scale }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    pub fn transform(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(value, (mean, scale))| (value - mean) / scale)
            .collect()
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.mean.len() != self.scale.len() {
            return Err("scaler mean and scale lengths differ".to_string());
        }
        if self.scale.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err("scaler has a non-positive scale".to_string());
        }
        Ok(())
    }
}
