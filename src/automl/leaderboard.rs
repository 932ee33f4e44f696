//! Ranked search results

use super::{Algorithm, CandidateModel, ImportanceResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Holdout metrics used to rank candidates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Multinomial log loss
    pub logloss: f64,
    pub mean_per_class_error: f64,
    pub rmse: f64,
    /// Rows the metrics were computed on
    pub n_rows: usize,
}

impl ModelMetrics {
    /// Compute metrics from class probabilities and true class indices
    pub fn from_probabilities(probs: &Array2<f64>, y: &[usize]) -> Self {
        let n_classes = probs.ncols();
        let n = y.len();
        if n == 0 || n_classes == 0 {
            return Self {
                logloss: f64::INFINITY,
                mean_per_class_error: 1.0,
                rmse: f64::INFINITY,
                n_rows: n,
            };
        }

        let mut logloss = 0.0;
        let mut squared = 0.0;
        let mut seen = vec![0usize; n_classes];
        let mut wrong = vec![0usize; n_classes];

        for (i, &k) in y.iter().enumerate() {
            let row = probs.row(i);
            logloss -= row[k].clamp(1e-15, 1.0).ln();
            squared += (1.0 - row[k]).powi(2);

            let predicted = row
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (c, &p)| if p > best.1 { (c, p) } else { best })
                .0;
            seen[k] += 1;
            if predicted != k {
                wrong[k] += 1;
            }
        }

        let per_class: Vec<f64> = seen
            .iter()
            .zip(wrong.iter())
            .filter(|(s, _)| **s > 0)
            .map(|(s, w)| *w as f64 / *s as f64)
            .collect();

        Self {
            logloss: logloss / n as f64,
            mean_per_class_error: per_class.iter().sum::<f64>() / per_class.len().max(1) as f64,
            rmse: (squared / n as f64).sqrt(),
            n_rows: n,
        }
    }
}

/// One ranked candidate
pub struct LeaderboardEntry {
    pub model: Box<dyn CandidateModel>,
    pub metrics: ModelMetrics,
}

impl std::fmt::Debug for LeaderboardEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderboardEntry")
            .field("model_id", &self.model.model_id())
            .field("algorithm", &self.model.algorithm())
            .field("metrics", &self.metrics)
            .finish()
    }
}

/// Candidates sorted by ascending log loss, ties broken by model id
#[derive(Debug, Default)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
}

/// Scaled importance of every feature for every model that reports one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarImpHeatmap {
    pub models: Vec<String>,
    pub features: Vec<String>,
    /// `values[m][f]`, 0.0 where a model does not report the feature
    pub values: Vec<Vec<f64>>,
}

impl Leaderboard {
    pub fn new(mut entries: Vec<LeaderboardEntry>) -> Self {
        entries.sort_by(|a, b| {
            a.metrics
                .logloss
                .total_cmp(&b.metrics.logloss)
                .then_with(|| a.model.model_id().cmp(b.model.model_id()))
        });
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    /// Best model overall
    pub fn leader(&self) -> Option<&dyn CandidateModel> {
        self.entries.first().map(|e| e.model.as_ref())
    }

    /// Best model of one family
    pub fn best_of_family(&self, algorithm: Algorithm) -> Option<&dyn CandidateModel> {
        self.entries
            .iter()
            .find(|e| e.model.algorithm() == algorithm)
            .map(|e| e.model.as_ref())
    }

    pub fn model_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.model.model_id()).collect()
    }

    /// Importance across all models that support it, in leaderboard order
    pub fn varimp_heatmap(&self) -> VarImpHeatmap {
        let supported: Vec<(String, super::FeatureImportance)> = self
            .entries
            .iter()
            .filter_map(|e| match e.model.feature_importance() {
                ImportanceResult::Supported(map) => Some((e.model.model_id().to_string(), map)),
                ImportanceResult::Unsupported { .. } => None,
            })
            .collect();

        let features: Vec<String> = supported
            .iter()
            .flat_map(|(_, map)| map.iter().map(|(k, _)| k.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let values = supported
            .iter()
            .map(|(_, map)| features.iter().map(|f| map.get(f).unwrap_or(0.0)).collect())
            .collect();

        VarImpHeatmap {
            models: supported.into_iter().map(|(id, _)| id).collect(),
            features,
            values,
        }
    }
}
