//! Gradient boosted trees with a softmax objective

use super::portable::softmax_rows;
use super::tree::{Gradients, RegressionTree, TreeParams};
use ndarray::Array2;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Gradient boosting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbmParams {
    /// Number of boosting rounds
    pub ntrees: usize,
    pub max_depth: usize,
    pub min_rows: usize,
    /// Shrinkage
    pub learn_rate: f64,
    /// Row subsample ratio per round
    pub sample_rate: f64,
    /// Column subsample ratio per round
    pub col_sample_rate: f64,
    pub seed: u64,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            ntrees: 50,
            max_depth: 5,
            min_rows: 5,
            learn_rate: 0.1,
            sample_rate: 0.8,
            col_sample_rate: 0.8,
            seed: 42,
        }
    }
}

/// Fitted boosting rounds, one tree per class per round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbmBody {
    learn_rate: f64,
    initial: Vec<f64>,
    rounds: Vec<Vec<RegressionTree>>,
}

impl GbmBody {
    /// Fit on `x` with class indices `y`. Returns the model and raw split
    /// gains per feature.
    pub fn fit(x: &Array2<f64>, y: &[usize], n_classes: usize, params: &GbmParams) -> (Self, Vec<f64>) {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);

        // Log class priors
        let mut counts = vec![0.0f64; n_classes];
        for &k in y {
            counts[k] += 1.0;
        }
        let initial: Vec<f64> = counts
            .iter()
            .map(|&c| ((c + 1.0) / (n_samples as f64 + n_classes as f64)).ln())
            .collect();

        let mut scores = Array2::from_shape_fn((n_samples, n_classes), |(_, k)| initial[k]);
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_rows: params.min_rows,
            ..TreeParams::default()
        };

        let mut importance = vec![0.0; n_features];
        let mut rounds = Vec::with_capacity(params.ntrees);

        for _ in 0..params.ntrees {
            let mut probs = scores.clone();
            softmax_rows(&mut probs);

            let rows = sample(n_samples, params.sample_rate, &mut rng);
            let cols = sample(n_features, params.col_sample_rate, &mut rng);

            let mut round = Vec::with_capacity(n_classes);
            for k in 0..n_classes {
                let grad: Vec<f64> = (0..n_samples)
                    .map(|i| probs[[i, k]] - if y[i] == k { 1.0 } else { 0.0 })
                    .collect();
                let hess: Vec<f64> = (0..n_samples)
                    .map(|i| (probs[[i, k]] * (1.0 - probs[[i, k]])).max(1e-6))
                    .collect();

                let tree = RegressionTree::grow(
                    x,
                    &Gradients { grad: &grad, hess: &hess },
                    &rows,
                    &cols,
                    &tree_params,
                    &mut importance,
                );

                for (i, value) in tree.predict(x).into_iter().enumerate() {
                    scores[[i, k]] += params.learn_rate * value;
                }
                round.push(tree);
            }
            rounds.push(round);
        }

        let body = Self {
            learn_rate: params.learn_rate,
            initial,
            rounds,
        };
        (body, importance)
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut scores = Array2::from_shape_fn((x.nrows(), self.initial.len()), |(_, k)| self.initial[k]);
        for round in &self.rounds {
            for (k, tree) in round.iter().enumerate() {
                for (i, value) in tree.predict(x).into_iter().enumerate() {
                    scores[[i, k]] += self.learn_rate * value;
                }
            }
        }
        softmax_rows(&mut scores);
        scores
    }

    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }
}

/// Sorted random subset of `0..n`, never empty for `n > 0`
pub(super) fn sample(n: usize, rate: f64, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
    let size = ((n as f64) * rate).ceil().max(1.0) as usize;
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices.truncate(size.min(n));
    indices.sort_unstable();
    indices
}
