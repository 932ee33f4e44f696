//! Multinomial logistic regression

use super::portable::softmax_rows;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct GlmParams {
    /// L2 penalty
    pub lambda: f64,
    pub max_iterations: usize,
    pub learning_rate: f64,
}

impl Default for GlmParams {
    fn default() -> Self {
        Self {
            lambda: 1e-4,
            max_iterations: 300,
            learning_rate: 0.5,
        }
    }
}

/// Fitted coefficients on standardized inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlmBody {
    means: Vec<f64>,
    stds: Vec<f64>,
    /// p x K
    weights: Array2<f64>,
    intercepts: Array1<f64>,
}

impl GlmBody {
    pub fn fit(x: &Array2<f64>, y: &[usize], n_classes: usize, params: &GlmParams) -> Self {
        let n = x.nrows().max(1) as f64;
        let p = x.ncols();

        let means: Vec<f64> = x
            .mean_axis(Axis(0))
            .map(|m| m.to_vec())
            .unwrap_or_else(|| vec![0.0; p]);
        let stds: Vec<f64> = x
            .std_axis(Axis(0), 0.0)
            .iter()
            .map(|&s| if s > 0.0 && s.is_finite() { s } else { 1.0 })
            .collect();

        let z = standardize(x, &means, &stds);

        let mut onehot = Array2::<f64>::zeros((x.nrows(), n_classes));
        for (i, &k) in y.iter().enumerate() {
            onehot[[i, k]] = 1.0;
        }

        let mut weights = Array2::<f64>::zeros((p, n_classes));
        let mut intercepts = Array1::<f64>::zeros(n_classes);

        for _ in 0..params.max_iterations {
            let mut probs = z.dot(&weights) + &intercepts;
            softmax_rows(&mut probs);
            let residual = probs - &onehot;

            let grad_w = z.t().dot(&residual) / n + &weights * params.lambda;
            let grad_b = residual.sum_axis(Axis(0)) / n;

            weights.scaled_add(-params.learning_rate, &grad_w);
            intercepts.scaled_add(-params.learning_rate, &grad_b);
        }

        Self {
            means,
            stds,
            weights,
            intercepts,
        }
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Array2<f64> {
        let z = standardize(x, &self.means, &self.stds);
        let mut probs = z.dot(&self.weights) + &self.intercepts;
        softmax_rows(&mut probs);
        probs
    }

    /// Sum of absolute standardized coefficients per feature
    pub fn coefficient_magnitudes(&self) -> Vec<f64> {
        self.weights
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|w| w.abs()).sum())
            .collect()
    }
}

fn standardize(x: &Array2<f64>, means: &[f64], stds: &[f64]) -> Array2<f64> {
    let mut z = x.clone();
    for (j, mut col) in z.axis_iter_mut(Axis(1)).enumerate() {
        col.mapv_inplace(|v| (v - means[j]) / stds[j]);
    }
    z
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glm_learns_linear_boundary() {
        let x = Array2::from_shape_fn((60, 2), |(i, j)| if j == 0 { i as f64 } else { 1.0 });
        let y: Vec<usize> = (0..60).map(|i| usize::from(i >= 30)).collect();

        let glm = GlmBody::fit(&x, &y, 2, &GlmParams::default());
        let probs = glm.predict_proba(&x);

        assert!(probs[[0, 0]] > 0.5);
        assert!(probs[[59, 1]] > 0.5);
        let row_sum: f64 = probs.row(10).sum();
        assert!((row_sum - 1.0).abs() < 1e-9);

        let mags = glm.coefficient_magnitudes();
        assert!(mags[0] > mags[1]);
    }
}
