//! Random forest of per-class regression trees on one-hot targets

use super::gbm::sample;
use super::tree::{Gradients, RegressionTree, TreeParams};
use ndarray::Array2;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrfParams {
    pub ntrees: usize,
    pub max_depth: usize,
    pub min_rows: usize,
    /// Columns per tree; `None` means sqrt of the feature count
    pub mtries: Option<usize>,
    pub seed: u64,
}

impl Default for DrfParams {
    fn default() -> Self {
        Self {
            ntrees: 50,
            max_depth: 12,
            min_rows: 2,
            mtries: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrfBody {
    n_classes: usize,
    /// One tree per class per forest member
    trees: Vec<Vec<RegressionTree>>,
}

impl DrfBody {
    pub fn fit(x: &Array2<f64>, y: &[usize], n_classes: usize, params: &DrfParams) -> (Self, Vec<f64>) {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);

        let mtries = params
            .mtries
            .unwrap_or_else(|| (n_features as f64).sqrt().ceil() as usize)
            .clamp(1, n_features.max(1));

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_rows: params.min_rows,
            lambda: 0.0,
            min_split_gain: 1e-9,
        };
        let hess = vec![1.0; n_samples];
        let targets: Vec<Vec<f64>> = (0..n_classes)
            .map(|k| y.iter().map(|&c| if c == k { -1.0 } else { 0.0 }).collect())
            .collect();

        let mut importance = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(params.ntrees);

        for _ in 0..params.ntrees {
            let rows: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
            let cols = sample(n_features, mtries as f64 / n_features.max(1) as f64, &mut rng);

            let member: Vec<RegressionTree> = targets
                .iter()
                .map(|grad| {
                    RegressionTree::grow(
                        x,
                        &Gradients { grad, hess: &hess },
                        &rows,
                        &cols,
                        &tree_params,
                        &mut importance,
                    )
                })
                .collect();
            trees.push(member);
        }

        (Self { n_classes, trees }, importance)
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut probs = Array2::<f64>::zeros((x.nrows(), self.n_classes));
        for member in &self.trees {
            for (k, tree) in member.iter().enumerate() {
                for (i, value) in tree.predict(x).into_iter().enumerate() {
                    probs[[i, k]] += value.max(0.0);
                }
            }
        }
        for mut row in probs.rows_mut() {
            let total: f64 = row.sum();
            if total > 0.0 {
                row.mapv_inplace(|v| v / total);
            } else {
                row.fill(1.0 / self.n_classes as f64);
            }
        }
        probs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forest_probabilities() {
        let x = Array2::from_shape_fn((60, 3), |(i, j)| match j {
            0 => i as f64,
            1 => (i % 5) as f64,
            _ => ((i * 7) % 11) as f64,
        });
        let y: Vec<usize> = (0..60).map(|i| usize::from(i >= 30)).collect();

        let params = DrfParams {
            ntrees: 10,
            mtries: Some(3),
            ..DrfParams::default()
        };
        let (drf, importance) = DrfBody::fit(&x, &y, 2, &params);
        let probs = drf.predict_proba(&x);

        assert!(probs[[0, 0]] > 0.5);
        assert!(probs[[59, 1]] > 0.5);
        assert!((probs.row(5).sum() - 1.0).abs() < 1e-9);
        assert!(importance[0] > 0.0);
    }
}
