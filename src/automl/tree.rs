//! Second-order regression tree shared by the boosting and forest families

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Regression tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

/// Growth limits
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_rows: usize,
    /// L2 penalty on leaf values
    pub lambda: f64,
    pub min_split_gain: f64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 5,
            min_rows: 5,
            lambda: 1.0,
            min_split_gain: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    root: TreeNode,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Per-row first and second order statistics
pub struct Gradients<'a> {
    pub grad: &'a [f64],
    pub hess: &'a [f64],
}

impl RegressionTree {
    /// Grow a tree on `rows` using only `features`. Split gains are added to
    /// `importance[feature]`.
    pub fn grow(
        x: &Array2<f64>,
        stats: &Gradients<'_>,
        rows: &[usize],
        features: &[usize],
        params: &TreeParams,
        importance: &mut [f64],
    ) -> Self {
        let root = Self::build(x, stats, rows.to_vec(), features, params, 0, importance);
        Self { root }
    }

    fn build(
        x: &Array2<f64>,
        stats: &Gradients<'_>,
        rows: Vec<usize>,
        features: &[usize],
        params: &TreeParams,
        depth: usize,
        importance: &mut [f64],
    ) -> TreeNode {
        let (g, h) = sums(stats, &rows);
        let leaf = TreeNode::Leaf {
            value: -g / (h + params.lambda),
        };

        if depth >= params.max_depth || rows.len() < 2 * params.min_rows {
            return leaf;
        }

        let best = features
            .par_iter()
            .filter_map(|&f| best_split(x.column(f), f, stats, &rows, params, g, h))
            .max_by(|a, b| a.gain.total_cmp(&b.gain).then_with(|| b.feature.cmp(&a.feature)));

        let Some(split) = best else {
            return leaf;
        };
        if split.gain <= params.min_split_gain {
            return leaf;
        }

        importance[split.feature] += split.gain;

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| x[[i, split.feature]] <= split.threshold);

        let left = Self::build(x, stats, left_rows, features, params, depth + 1, importance);
        let right = Self::build(x, stats, right_rows, features, params, depth + 1, importance);

        TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        x.rows().into_iter().map(|row| self.predict_row(row)).collect()
    }
}

fn sums(stats: &Gradients<'_>, rows: &[usize]) -> (f64, f64) {
    rows.iter()
        .fold((0.0, 0.0), |(g, h), &i| (g + stats.grad[i], h + stats.hess[i]))
}

fn best_split(
    column: ArrayView1<'_, f64>,
    feature: usize,
    stats: &Gradients<'_>,
    rows: &[usize],
    params: &TreeParams,
    g_total: f64,
    h_total: f64,
) -> Option<Candidate> {
    let mut order: Vec<usize> = rows.to_vec();
    order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));

    let parent = g_total * g_total / (h_total + params.lambda);
    let mut best: Option<Candidate> = None;
    let (mut g_left, mut h_left) = (0.0, 0.0);

    for (pos, pair) in order.windows(2).enumerate() {
        let i = pair[0];
        g_left += stats.grad[i];
        h_left += stats.hess[i];

        let n_left = pos + 1;
        let n_right = order.len() - n_left;
        if n_left < params.min_rows || n_right < params.min_rows {
            continue;
        }

        let (lo, hi) = (column[pair[0]], column[pair[1]]);
        if lo == hi {
            continue;
        }

        let g_right = g_total - g_left;
        let h_right = h_total - h_left;
        let gain = g_left * g_left / (h_left + params.lambda)
            + g_right * g_right / (h_right + params.lambda)
            - parent;

        if best.as_ref().map_or(true, |b| gain > b.gain) {
            best = Some(Candidate {
                feature,
                threshold: lo + (hi - lo) / 2.0,
                gain,
            });
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(node: &TreeNode) -> usize {
        match node {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + depth(left).max(depth(right)),
        }
    }

    #[test]
    fn test_tree_separates_step_function() {
        let x = Array2::from_shape_vec((20, 2), (0..40).map(|i| (i / 2) as f64).collect()).unwrap();
        // Target 1 above the midpoint, squared loss gradients at prediction 0
        let y: Vec<f64> = (0..20).map(|i| if i >= 10 { 1.0 } else { 0.0 }).collect();
        let grad: Vec<f64> = y.iter().map(|v| -v).collect();
        let hess = vec![1.0; 20];
        let rows: Vec<usize> = (0..20).collect();
        let mut importance = vec![0.0; 2];

        let params = TreeParams {
            max_depth: 2,
            min_rows: 2,
            lambda: 0.0,
            min_split_gain: 1e-9,
        };
        let tree = RegressionTree::grow(
            &x,
            &Gradients { grad: &grad, hess: &hess },
            &rows,
            &[0, 1],
            &params,
            &mut importance,
        );

        let preds = tree.predict(&x);
        assert!((preds[0] - 0.0).abs() < 1e-9);
        assert!((preds[19] - 1.0).abs() < 1e-9);
        assert!(importance.iter().sum::<f64>() > 0.0);
        assert!(depth(&tree.root) >= 1);
    }

    #[test]
    fn test_constant_feature_yields_leaf() {
        let x = Array2::from_elem((10, 1), 3.0);
        let grad = vec![-1.0; 10];
        let hess = vec![1.0; 10];
        let rows: Vec<usize> = (0..10).collect();
        let mut importance = vec![0.0];
        let tree = RegressionTree::grow(
            &x,
            &Gradients { grad: &grad, hess: &hess },
            &rows,
            &[0],
            &TreeParams::default(),
            &mut importance,
        );
        assert_eq!(depth(&tree.root), 0);
        assert_eq!(importance[0], 0.0);
    }
}
