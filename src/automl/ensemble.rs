//! Stacked ensemble with a GLM metalearner over base-model probabilities

use super::glm::{GlmBody, GlmParams};
use super::portable::ModelBody;
use ndarray::{concatenate, Array2, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleBody {
    base_models: Vec<ModelBody>,
    metalearner: GlmBody,
}

impl EnsembleBody {
    /// Fit the metalearner on the base models' predictions for `x`, which
    /// must be rows the base models were not trained on.
    pub fn fit(base_models: Vec<ModelBody>, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Self {
        let level_one = level_one_frame(&base_models, x);
        let params = GlmParams {
            lambda: 1e-3,
            ..GlmParams::default()
        };
        let metalearner = GlmBody::fit(&level_one, y, n_classes, &params);
        Self {
            base_models,
            metalearner,
        }
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Array2<f64> {
        let level_one = level_one_frame(&self.base_models, x);
        self.metalearner.predict_proba(&level_one)
    }

    pub fn n_base_models(&self) -> usize {
        self.base_models.len()
    }
}

fn level_one_frame(base_models: &[ModelBody], x: &Array2<f64>) -> Array2<f64> {
    let columns: Vec<Array2<f64>> = base_models.iter().map(|m| m.predict_proba(x)).collect();
    let views: Vec<_> = columns.iter().map(|c| c.view()).collect();
    concatenate(Axis(1), &views).unwrap_or_else(|_| Array2::zeros((x.nrows(), 0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automl::gbm::{GbmBody, GbmParams};

    #[test]
    fn test_ensemble_combines_bases() {
        let x = Array2::from_shape_fn((80, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 3) as f64 });
        let y: Vec<usize> = (0..80).map(|i| usize::from(i >= 40)).collect();

        let glm = GlmBody::fit(&x, &y, 2, &GlmParams::default());
        let (gbm, _) = GbmBody::fit(&x, &y, 2, &GbmParams { ntrees: 10, ..GbmParams::default() });

        let ensemble = EnsembleBody::fit(vec![ModelBody::Glm(glm), ModelBody::Gbm(gbm)], &x, &y, 2);
        assert_eq!(ensemble.n_base_models(), 2);

        let probs = ensemble.predict_proba(&x);
        assert_eq!(probs.shape(), &[80, 2]);
        assert!(probs[[0, 0]] > 0.5);
        assert!(probs[[79, 1]] > 0.5);
    }
}
