//! Automated model search
//!
//! The training stage only depends on the contract in this module: an
//! [`AutoMlEngine`] searches candidate models on a frame and returns a
//! [`Leaderboard`] of [`CandidateModel`]s ranked best first. [`LocalAutoMl`]
//! is the in-process engine shipped with the crate.

mod drf;
mod ensemble;
mod gbm;
mod glm;
mod leaderboard;
mod local;
mod portable;
mod tree;

pub use leaderboard::{Leaderboard, LeaderboardEntry, ModelMetrics, VarImpHeatmap};
pub use local::LocalAutoMl;
pub use portable::{GeneratorSpec, ModelBody, PortableModel, GENERATOR_FILE_NAME};

use crate::error::{LifecycleError, Result};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Model family produced by the search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Algorithm {
    /// Generalized linear model (multinomial logistic)
    Glm,
    /// Gradient boosted trees
    Gbm,
    /// Distributed random forest
    Drf,
    /// Stacked ensemble over the other families
    StackedEnsemble,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Glm => "GLM",
            Algorithm::Gbm => "GBM",
            Algorithm::Drf => "DRF",
            Algorithm::StackedEnsemble => "StackedEnsemble",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Algorithm {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "glm" => Ok(Algorithm::Glm),
            "gbm" => Ok(Algorithm::Gbm),
            "drf" => Ok(Algorithm::Drf),
            "stackedensemble" | "stacked_ensemble" => Ok(Algorithm::StackedEnsemble),
            other => Err(LifecycleError::InvalidContext(format!(
                "unknown algorithm family '{}'",
                other
            ))),
        }
    }
}

/// Parameters of one search
#[derive(Debug, Clone)]
pub struct SearchSpec {
    /// Predictor columns, in order
    pub features: Vec<String>,
    /// Categorical response column
    pub target: String,
    /// Upper bound on base models trained
    pub max_models: usize,
    pub seed: u64,
    pub exclude_algos: Vec<Algorithm>,
    /// Fraction of rows held out from base-model training
    pub validation_fraction: f64,
}

impl SearchSpec {
    pub fn new(features: Vec<String>, target: impl Into<String>, max_models: usize, seed: u64) -> Self {
        Self {
            features,
            target: target.into(),
            max_models,
            seed,
            exclude_algos: Vec::new(),
            validation_fraction: 0.2,
        }
    }

    pub fn with_exclude_algos(mut self, algos: Vec<Algorithm>) -> Self {
        self.exclude_algos = algos;
        self
    }

    pub fn with_validation_fraction(mut self, fraction: f64) -> Self {
        self.validation_fraction = fraction;
        self
    }

    pub fn allows(&self, algorithm: Algorithm) -> bool {
        !self.exclude_algos.contains(&algorithm)
    }
}

/// Feature name to non-negative importance, scaled so the largest is 1.0
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureImportance(BTreeMap<String, f64>);

impl FeatureImportance {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scale raw per-feature scores by their maximum
    pub fn from_raw(features: &[String], raw: &[f64]) -> Self {
        let max = raw
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .map(f64::abs)
            .fold(0.0f64, f64::max);
        let map = features
            .iter()
            .zip(raw.iter())
            .map(|(name, &v)| {
                let v = if v.is_finite() { v.abs() } else { 0.0 };
                let scaled = if max > 0.0 { v / max } else { 0.0 };
                (name.clone(), scaled)
            })
            .collect();
        Self(map)
    }

    pub fn get(&self, feature: &str) -> Option<f64> {
        self.0.get(feature).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.0
    }

    /// Features sorted by decreasing importance
    pub fn ranked(&self) -> Vec<(&str, f64)> {
        let mut out: Vec<(&str, f64)> = self.0.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        out
    }
}

/// Outcome of asking a model for its feature importance
#[derive(Debug, Clone, PartialEq)]
pub enum ImportanceResult {
    Supported(FeatureImportance),
    Unsupported { reason: String },
}

impl ImportanceResult {
    pub fn is_supported(&self) -> bool {
        matches!(self, ImportanceResult::Supported(_))
    }

    /// The importance map, or an empty one when unsupported
    pub fn into_map_or_empty(self) -> FeatureImportance {
        match self {
            ImportanceResult::Supported(map) => map,
            ImportanceResult::Unsupported { .. } => FeatureImportance::empty(),
        }
    }
}

/// Files written by [`CandidateModel::export`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedArtifact {
    pub model_path: PathBuf,
    pub generator_path: Option<PathBuf>,
}

/// A trained model on the leaderboard
pub trait CandidateModel: Send + Sync {
    fn model_id(&self) -> &str;

    fn algorithm(&self) -> Algorithm;

    fn feature_importance(&self) -> ImportanceResult;

    /// Write the portable model into `dir`, plus the generator support file
    /// when `with_generator` is set
    fn export(&self, dir: &Path, with_generator: bool) -> Result<ExportedArtifact>;
}

/// Automated model search engine
pub trait AutoMlEngine {
    fn search(&self, frame: &DataFrame, spec: &SearchSpec) -> Result<Leaderboard>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_importance_scaled_by_max() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let imp = FeatureImportance::from_raw(&names, &[2.0, 8.0, 0.0]);
        assert_eq!(imp.get("b"), Some(1.0));
        assert_eq!(imp.get("a"), Some(0.25));
        assert_eq!(imp.get("c"), Some(0.0));
        assert_eq!(imp.ranked()[0].0, "b");
    }

    #[test]
    fn test_importance_all_zero() {
        let names = vec!["a".to_string()];
        let imp = FeatureImportance::from_raw(&names, &[0.0]);
        assert_eq!(imp.get("a"), Some(0.0));
    }

    #[test]
    fn test_unsupported_maps_to_empty() {
        let result = ImportanceResult::Unsupported {
            reason: "ensemble".into(),
        };
        assert!(!result.is_supported());
        assert!(result.into_map_or_empty().is_empty());
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("gbm".parse::<Algorithm>().unwrap(), Algorithm::Gbm);
        assert_eq!(
            "StackedEnsemble".parse::<Algorithm>().unwrap(),
            Algorithm::StackedEnsemble
        );
        assert!("xgboost".parse::<Algorithm>().is_err());
    }
}
