//! Random forest classifier built from CART trees with Gini impurity.
//!
//! Each tree is grown on a bootstrap sample and considers a random subset of
//! `sqrt(n_features)` features at every split. Class probabilities are the
//! mean of the per-tree leaf class frequencies. Trees are stored as flat node
//! arrays so the whole forest serializes with serde.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ForestConfig;
use crate::error::{PredictError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    /// Samples with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Class frequencies of the training samples that reached this leaf.
    Leaf { distribution: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], index: usize) -> usize {
            match &nodes[index] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
            }
        }
        walk(&self.nodes, 0)
    }

    /// Leaf distribution reached by `features`. Assumes a validated tree.
    pub fn leaf_distribution(&self, features: &[f64]) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { distribution } => return distribution,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    fn validate(&self, n_features: usize, n_classes: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {index} splits on unknown feature {feature}"));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {index} has a non-finite threshold"));
                    }
                    // Children are always stored after their parent, which rules out cycles.
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(format!("node {index} points at invalid child {child}"));
                        }
                    }
                }
                TreeNode::Leaf { distribution } => {
                    if distribution.len() != n_classes {
                        return Err(format!(
                            "leaf {index} has {} classes but expected {n_classes}",
                            distribution.len()
                        ));
                    }
                    if distribution.iter().any(|p| !p.is_finite() || *p < 0.0) {
                        return Err(format!("leaf {index} has an invalid probability"));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    config: ForestConfig,
    n_features: usize,
    n_classes: usize,
    trees: Vec<DecisionTree>,
    feature_importances: Vec<f64>,
}

impl RandomForest {
    /// Fits the forest on a dense row-major matrix with class codes `y`.
    pub fn fit(x: &[Vec<f64>], y: &[usize], n_classes: usize, config: &ForestConfig) -> Result<Self> {
        config.validate().map_err(PredictError::Training)?;
        if x.is_empty() {
            return Err(PredictError::EmptyDataset);
        }
        if x.len() != y.len() {
            return Err(PredictError::Training(format!(
                "{} feature rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        if n_classes < 2 {
            return Err(PredictError::Training("need at least 2 classes".to_string()));
        }
        let n_features = x[0].len();
        if n_features == 0 {
            return Err(PredictError::Training("feature matrix has no columns".to_string()));
        }
        for (row_index, row) in x.iter().enumerate() {
            if row.len() != n_features {
                return Err(PredictError::Training(format!(
                    "row {row_index} has {} values but expected {n_features}",
                    row.len()
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(PredictError::Training(format!(
                    "row {row_index} contains a non-finite value"
                )));
            }
        }
        if let Some(bad) = y.iter().find(|label| **label >= n_classes) {
            return Err(PredictError::Training(format!("label code {bad} is out of range")));
        }

        let max_features = ((n_features as f64).sqrt() as usize).max(1);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut trees = Vec::with_capacity(config.n_trees);
        let mut importances = vec![0.0; n_features];
        let n_samples = x.len();

        for tree_index in 0..config.n_trees {
            let bootstrap: Vec<usize> = (0..n_samples).map(|_| rng.random_range(0..n_samples)).collect();
            let mut builder = TreeBuilder {
                x,
                y,
                n_classes,
                config,
                max_features,
                rng: StdRng::seed_from_u64(rng.random()),
                nodes: Vec::new(),
                importances: vec![0.0; n_features],
            };
            builder.build(bootstrap, 0);

            let total: f64 = builder.importances.iter().sum();
            if total > 0.0 {
                for (acc, value) in importances.iter_mut().zip(&builder.importances) {
                    *acc += value / total;
                }
            }
            let tree = DecisionTree { nodes: builder.nodes };
            debug!(tree = tree_index, nodes = tree.node_count(), "grew tree");
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for value in importances.iter_mut() {
                *value /= total;
            }
        }

        Ok(Self {
            config: config.clone(),
            n_features,
            n_classes,
            trees,
            feature_importances: importances,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Mean decrease in impurity per feature, normalized to sum to 1.
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    pub fn check_features(&self, features: &[f64], names: &[String]) -> Result<()> {
        if features.len() != self.n_features {
            return Err(PredictError::FeatureCount {
                expected: self.n_features,
                found: features.len(),
            });
        }
        if let Some(index) = features.iter().position(|v| !v.is_finite()) {
            let name = names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("#{index}"));
            return Err(PredictError::NonFiniteFeature { name });
        }
        Ok(())
    }

    /// Probability of each class code for one aligned feature vector.
    pub fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>> {
        self.check_features(features, &[])?;
        let mut probabilities = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (acc, p) in probabilities.iter_mut().zip(tree.leaf_distribution(features)) {
                *acc += p;
            }
        }
        let n_trees = self.trees.len() as f64;
        for p in probabilities.iter_mut() {
            *p /= n_trees;
        }
        Ok(probabilities)
    }

    /// Most probable class code. Ties go to the lower code.
    pub fn predict(&self, features: &[f64]) -> Result<usize> {
        let probabilities = self.predict_proba(features)?;
        Ok(argmax(&probabilities))
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        if self.n_classes < 2 {
            return Err("forest must predict at least 2 classes".to_string());
        }
        if self.feature_importances.len() != self.n_features {
            return Err("feature importances do not match feature count".to_string());
        }
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features, self.n_classes)
                .map_err(|err| format!("tree {index}: {err}"))?;
        }
        Ok(())
    }
}

pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (index, value) in values.iter().enumerate() {
        if *value > values[best] {
            best = index;
        }
    }
    best
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|c| {
            let p = *c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

struct Split {
    feature: usize,
    threshold: f64,
    /// `n_left * gini_left + n_right * gini_right`.
    weighted_impurity: f64,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [usize],
    n_classes: usize,
    config: &'a ForestConfig,
    max_features: usize,
    rng: StdRng,
    nodes: Vec<TreeNode>,
    importances: Vec<f64>,
}

impl TreeBuilder<'_> {
    fn class_counts(&self, samples: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &sample in samples {
            counts[self.y[sample]] += 1;
        }
        counts
    }

    /// Grows the subtree for `samples` and returns its root index.
    fn build(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let n = samples.len();
        let counts = self.class_counts(&samples);
        let node_impurity = gini(&counts, n);
        let distribution = counts.iter().map(|c| *c as f64 / n as f64).collect();
        let index = self.nodes.len();
        self.nodes.push(TreeNode::Leaf { distribution });

        if depth >= self.config.max_depth
            || n < self.config.min_samples_split
            || n < 2 * self.config.min_samples_leaf
            || node_impurity <= 0.0
        {
            return index;
        }

        let Some(split) = self.best_split(&samples, &counts) else {
            return index;
        };

        self.importances[split.feature] += n as f64 * node_impurity - split.weighted_impurity;

        let x = self.x;
        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&sample| x[sample][split.feature] <= split.threshold);
        let left = self.build(left, depth + 1);
        let right = self.build(right, depth + 1);
        self.nodes[index] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        index
    }

    fn best_split(&mut self, samples: &[usize], counts: &[usize]) -> Option<Split> {
        let x = self.x;
        let y = self.y;
        let n = samples.len();
        let min_leaf = self.config.min_samples_leaf;

        let mut features: Vec<usize> = (0..x[0].len()).collect();
        features.shuffle(&mut self.rng);

        let mut order = samples.to_vec();
        let mut left_counts = vec![0usize; self.n_classes];
        let mut right_counts = vec![0usize; self.n_classes];
        let mut best: Option<Split> = None;
        let mut visited = 0;

        for feature in features {
            if visited >= self.max_features && best.is_some() {
                break;
            }
            order.sort_by(|a, b| x[*a][feature].total_cmp(&x[*b][feature]));
            if x[order[0]][feature] == x[order[n - 1]][feature] {
                continue;
            }
            visited += 1;

            left_counts.iter_mut().for_each(|c| *c = 0);
            for position in 0..n - 1 {
                left_counts[y[order[position]]] += 1;
                let current = x[order[position]][feature];
                let next = x[order[position + 1]][feature];
                if current == next {
                    continue;
                }
                let n_left = position + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                for class in 0..self.n_classes {
                    right_counts[class] = counts[class] - left_counts[class];
                }
                let weighted_impurity = n_left as f64 * gini(&left_counts, n_left)
                    + n_right as f64 * gini(&right_counts, n_right);
                if best
                    .as_ref()
                    .map_or(true, |b| weighted_impurity < b.weighted_impurity)
                {
                    let mut threshold = current + (next - current) / 2.0;
                    if threshold >= next {
                        threshold = current;
                    }
                    best = Some(Split {
                        feature,
                        threshold,
                        weighted_impurity,
                    });
                }
            }
        }

        best
    }
}
