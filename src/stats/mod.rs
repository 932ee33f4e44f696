//! Dataset statistics reported by the stages
//!
//! A successful training or scoring invocation ends with exactly one call to
//! the [`StatsReporter`]. [`JsonStatsReporter`] summarizes each column and
//! writes the result next to the run's artifacts.

pub mod plots;

use crate::automl::FeatureImportance;
use crate::context::ExecutionContext;
use crate::data::numeric_values;
use crate::error::{LifecycleError, Result};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::info;

pub const TRAINING_STATS_FILE: &str = "data_stats.json";
pub const SCORING_STATS_FILE: &str = "scoring_stats.json";

/// Summary of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    pub dtype: String,
    pub count: usize,
    pub null_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Class frequencies, for categorical columns only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequencies: Option<BTreeMap<String, usize>>,
}

/// Summarize `columns` of `df`. Columns named in `categorical`, or holding
/// strings, get class frequencies; numeric ones get moments and bounds.
pub fn summarize(df: &DataFrame, columns: &[String], categorical: &[String]) -> Result<Vec<ColumnSummary>> {
    columns
        .iter()
        .map(|name| {
            let series = df
                .column(name)
                .map_err(|_| LifecycleError::FeatureNotFound(name.clone()))?
                .as_materialized_series();
            let dtype = series.dtype().clone();
            let mut summary = ColumnSummary {
                name: name.clone(),
                dtype: dtype.to_string(),
                count: series.len(),
                null_count: series.null_count(),
                mean: None,
                std: None,
                min: None,
                max: None,
                frequencies: None,
            };

            if categorical.contains(name) || !(dtype.is_primitive_numeric() || dtype.is_bool()) {
                let as_str = series.cast(&DataType::String)?;
                let mut freq = BTreeMap::new();
                for value in as_str.str()?.into_iter().flatten() {
                    *freq.entry(value.to_string()).or_insert(0) += 1;
                }
                summary.frequencies = Some(freq);
            } else {
                let values: Vec<f64> = numeric_values(df, name)?.into_iter().flatten().collect();
                if !values.is_empty() {
                    let n = values.len() as f64;
                    let mean = values.iter().sum::<f64>() / n;
                    let var = if values.len() > 1 {
                        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
                    } else {
                        0.0
                    };
                    summary.mean = Some(mean);
                    summary.std = Some(var.sqrt());
                    summary.min = Some(values.iter().copied().fold(f64::INFINITY, f64::min));
                    summary.max = Some(values.iter().copied().fold(f64::NEG_INFINITY, f64::max));
                }
            }
            Ok(summary)
        })
        .collect()
}

/// Everything reported at the end of a training run
#[derive(Debug, Clone, Copy)]
pub struct TrainingStats<'a> {
    pub dataset: &'a DataFrame,
    pub features: &'a [String],
    pub targets: &'a [String],
    pub categorical: &'a [String],
    pub feature_importance: &'a FeatureImportance,
    pub context: &'a ExecutionContext,
}

/// Everything reported at the end of a scoring run
#[derive(Debug, Clone, Copy)]
pub struct ScoringStats<'a> {
    /// Unscaled input features
    pub features_frame: &'a DataFrame,
    pub features: &'a [String],
    /// Persisted predictions for the current job
    pub predictions: &'a DataFrame,
    pub target: &'a str,
    pub context: &'a ExecutionContext,
}

/// Receiver of the stages' success signal
pub trait StatsReporter {
    fn report_training(&self, stats: TrainingStats<'_>) -> Result<()>;

    fn report_scoring(&self, stats: ScoringStats<'_>) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct TrainingReport<'a> {
    generated_at: DateTime<Utc>,
    job_id: &'a str,
    model_version: &'a str,
    rows: usize,
    features: &'a [String],
    targets: &'a [String],
    categorical: &'a [String],
    columns: Vec<ColumnSummary>,
    feature_importance: &'a FeatureImportance,
}

#[derive(Debug, Serialize)]
struct ScoringReport<'a> {
    generated_at: DateTime<Utc>,
    job_id: &'a str,
    model_version: &'a str,
    rows_scored: usize,
    rows_persisted: usize,
    features: Vec<ColumnSummary>,
    predictions: Vec<ColumnSummary>,
}

/// Writes stats as JSON documents into the context's artifact output path
#[derive(Debug, Clone, Default)]
pub struct JsonStatsReporter;

impl JsonStatsReporter {
    pub fn new() -> Self {
        Self
    }

    fn write<T: Serialize>(&self, ctx: &ExecutionContext, file: &str, report: &T) -> Result<PathBuf> {
        fs::create_dir_all(&ctx.artifact_output_path)?;
        let path = ctx.artifact_output_path.join(file);
        fs::write(&path, serde_json::to_vec_pretty(report)?)?;
        Ok(path)
    }
}

impl StatsReporter for JsonStatsReporter {
    fn report_training(&self, stats: TrainingStats<'_>) -> Result<()> {
        let mut columns: Vec<String> = stats.features.to_vec();
        columns.extend(stats.targets.iter().cloned());

        let report = TrainingReport {
            generated_at: Utc::now(),
            job_id: stats.context.job_id.as_str(),
            model_version: stats.context.model_version.as_str(),
            rows: stats.dataset.height(),
            features: stats.features,
            targets: stats.targets,
            categorical: stats.categorical,
            columns: summarize(stats.dataset, &columns, stats.categorical)?,
            feature_importance: stats.feature_importance,
        };
        let path = self.write(stats.context, TRAINING_STATS_FILE, &report)?;
        info!(path = %path.display(), "Training stats written");
        Ok(())
    }

    fn report_scoring(&self, stats: ScoringStats<'_>) -> Result<()> {
        let target = vec![stats.target.to_string()];
        let report = ScoringReport {
            generated_at: Utc::now(),
            job_id: stats.context.job_id.as_str(),
            model_version: stats.context.model_version.as_str(),
            rows_scored: stats.features_frame.height(),
            rows_persisted: stats.predictions.height(),
            features: summarize(stats.features_frame, stats.features, &[])?,
            predictions: summarize(stats.predictions, &target, &target)?,
        };
        let path = self.write(stats.context, SCORING_STATS_FILE, &report)?;
        info!(path = %path.display(), "Scoring stats written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_numeric_and_categorical() {
        let df = df!(
            "x" => &[Some(1.0), Some(3.0), None],
            "y" => &["a", "b", "a"]
        )
        .unwrap();
        let cols = vec!["x".to_string(), "y".to_string()];
        let summary = summarize(&df, &cols, &["y".to_string()]).unwrap();

        assert_eq!(summary[0].null_count, 1);
        assert_eq!(summary[0].mean, Some(2.0));
        assert_eq!(summary[0].min, Some(1.0));
        assert!(summary[0].frequencies.is_none());

        let freq = summary[1].frequencies.as_ref().unwrap();
        assert_eq!(freq["a"], 2);
        assert_eq!(freq["b"], 1);
    }

    #[test]
    fn test_integer_target_treated_as_categorical() {
        let df = df!("t" => &[0i64, 1, 1]).unwrap();
        let cols = vec!["t".to_string()];
        let summary = summarize(&df, &cols, &cols).unwrap();
        assert_eq!(summary[0].frequencies.as_ref().unwrap()["1"], 2);
    }

    #[test]
    fn test_missing_column() {
        let df = df!("t" => &[0i64]).unwrap();
        assert!(summarize(&df, &["u".to_string()], &[]).is_err());
    }
}
