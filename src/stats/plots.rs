//! Diagnostic plot artifacts
//!
//! Plots are stored as JSON chart descriptions so any front end can render
//! them.

use crate::automl::{FeatureImportance, VarImpHeatmap};
use crate::error::Result;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// A diagnostic chart produced during training
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticPlot {
    /// Bar chart of the selected model's scaled importance
    FeatureImportance {
        model_id: String,
        /// (feature, importance), most important first
        bars: Vec<(String, f64)>,
    },
    /// Models by features matrix of scaled importance
    VarImpHeatmap(VarImpHeatmap),
}

impl DiagnosticPlot {
    pub fn feature_importance(model_id: impl Into<String>, importance: &FeatureImportance) -> Self {
        DiagnosticPlot::FeatureImportance {
            model_id: model_id.into(),
            bars: importance
                .ranked()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    /// Artifact file name
    pub fn file_name(&self) -> &'static str {
        match self {
            DiagnosticPlot::FeatureImportance { .. } => "feature_importance.json",
            DiagnosticPlot::VarImpHeatmap(_) => "feature_heatmap.json",
        }
    }
}

/// Destination for diagnostic plots
pub trait PlotSink {
    /// Save `plot` under `dir`, returning the written path
    fn save(&self, dir: &Path, plot: &DiagnosticPlot) -> Result<PathBuf>;
}

/// Writes plots as JSON files
#[derive(Debug, Clone, Default)]
pub struct FsPlotSink;

impl PlotSink for FsPlotSink {
    fn save(&self, dir: &Path, plot: &DiagnosticPlot) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(plot.file_name());
        fs::write(&path, serde_json::to_vec_pretty(plot)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_feature_importance_plot_sorted() {
        let names = vec!["a".to_string(), "b".to_string()];
        let imp = FeatureImportance::from_raw(&names, &[1.0, 4.0]);
        let plot = DiagnosticPlot::feature_importance("GBM_1", &imp);
        match &plot {
            DiagnosticPlot::FeatureImportance { bars, .. } => {
                assert_eq!(bars[0], ("b".to_string(), 1.0));
                assert_eq!(bars[1], ("a".to_string(), 0.25));
            }
            other => panic!("unexpected plot {:?}", other),
        }
    }

    #[test]
    fn test_sink_writes_heatmap() {
        let dir = TempDir::new().unwrap();
        let plot = DiagnosticPlot::VarImpHeatmap(VarImpHeatmap {
            models: vec!["GBM_1".into()],
            features: vec!["a".into()],
            values: vec![vec![1.0]],
        });
        let path = FsPlotSink.save(dir.path(), &plot).unwrap();
        assert!(path.ends_with("feature_heatmap.json"));
        let raw = fs::read_to_string(path).unwrap();
        assert!(raw.contains("\"kind\": \"var_imp_heatmap\""));
    }
}
