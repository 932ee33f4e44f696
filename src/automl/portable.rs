//! Portable model document written by export and read back for scoring

use super::drf::DrfBody;
use super::ensemble::EnsembleBody;
use super::gbm::GbmBody;
use super::glm::GlmBody;
use super::Algorithm;
use crate::data::feature_matrix;
use crate::error::{LifecycleError, Result};
use ndarray::{Array2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the generator support file written next to an exported model
pub const GENERATOR_FILE_NAME: &str = "modelops-genmodel.json";

const FORMAT_VERSION: u32 = 1;

/// Fitted parameters of one model family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ModelBody {
    Glm(GlmBody),
    Gbm(GbmBody),
    Drf(DrfBody),
    Ensemble(EnsembleBody),
}

impl ModelBody {
    /// Class probabilities, one row per input row
    pub fn predict_proba(&self, x: &Array2<f64>) -> Array2<f64> {
        match self {
            ModelBody::Glm(body) => body.predict_proba(x),
            ModelBody::Gbm(body) => body.predict_proba(x),
            ModelBody::Drf(body) => body.predict_proba(x),
            ModelBody::Ensemble(body) => body.predict_proba(x),
        }
    }
}

/// Self-contained, serializable classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortableModel {
    pub format_version: u32,
    pub model_id: String,
    pub algorithm: Algorithm,
    /// Input columns in training order
    pub features: Vec<String>,
    /// Values substituted for missing inputs
    pub imputation: Vec<f64>,
    pub response: String,
    /// Class labels, indexed by probability column
    pub levels: Vec<String>,
    pub body: ModelBody,
}

/// Input schema and levels of an exported model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSpec {
    pub format_version: u32,
    pub model_id: String,
    pub algorithm: Algorithm,
    pub features: Vec<String>,
    pub response: String,
    pub levels: Vec<String>,
}

impl PortableModel {
    pub fn new(
        model_id: impl Into<String>,
        algorithm: Algorithm,
        features: Vec<String>,
        imputation: Vec<f64>,
        response: impl Into<String>,
        levels: Vec<String>,
        body: ModelBody,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            model_id: model_id.into(),
            algorithm,
            features,
            imputation,
            response: response.into(),
            levels,
            body,
        }
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Array2<f64> {
        self.body.predict_proba(x)
    }

    /// Most probable class index per row
    pub fn predict_index(&self, x: &Array2<f64>) -> Vec<usize> {
        argmax_rows(&self.predict_proba(x))
    }

    /// Predicted class labels for the rows of `frame`
    pub fn predict_labels(&self, frame: &DataFrame) -> Result<Vec<String>> {
        let x = feature_matrix(frame, &self.features, &self.imputation)?;
        self.predict_index(&x)
            .into_iter()
            .map(|k| {
                self.levels.get(k).cloned().ok_or_else(|| {
                    LifecycleError::Artifact(format!("model {} has no level {}", self.model_id, k))
                })
            })
            .collect()
    }

    pub fn generator_spec(&self) -> GeneratorSpec {
        GeneratorSpec {
            format_version: self.format_version,
            model_id: self.model_id.clone(),
            algorithm: self.algorithm,
            features: self.features.clone(),
            response: self.response.clone(),
            levels: self.levels.clone(),
        }
    }

    /// Write `<model_id>.json` into `dir`
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.model_id));
        fs::write(&path, serde_json::to_vec(self)?)?;
        Ok(path)
    }

    pub fn write_generator(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(GENERATOR_FILE_NAME);
        fs::write(&path, serde_json::to_vec_pretty(&self.generator_spec())?)?;
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read(path).map_err(|e| {
            LifecycleError::Artifact(format!("cannot read model {}: {}", path.display(), e))
        })?;
        let model: Self = serde_json::from_slice(&raw)?;
        if model.format_version != FORMAT_VERSION {
            return Err(LifecycleError::Artifact(format!(
                "unsupported model format version {}",
                model.format_version
            )));
        }
        Ok(model)
    }
}

/// Row-wise softmax, stable against large logits
pub(super) fn softmax_rows(logits: &mut Array2<f64>) {
    for mut row in logits.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let total: f64 = row.sum();
        if total > 0.0 {
            row.mapv_inplace(|v| v / total);
        }
    }
}

pub(super) fn argmax_rows(probs: &Array2<f64>) -> Vec<usize> {
    probs
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (k, &p)| if p > best.1 { (k, p) } else { best })
                .0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automl::glm::GlmParams;
    use tempfile::TempDir;

    fn fitted() -> PortableModel {
        let x = Array2::from_shape_fn((40, 1), |(i, _)| i as f64);
        let y: Vec<usize> = (0..40).map(|i| usize::from(i >= 20)).collect();
        let body = GlmBody::fit(&x, &y, 2, &GlmParams::default());
        PortableModel::new(
            "GLM_1_AutoML_1",
            Algorithm::Glm,
            vec!["x".to_string()],
            vec![19.5],
            "y",
            vec!["0".to_string(), "1".to_string()],
            ModelBody::Glm(body),
        )
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let mut logits = Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 1000.0, 0.0, 0.0]).unwrap();
        softmax_rows(&mut logits);
        for row in logits.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert_eq!(argmax_rows(&logits), vec![2, 0]);
    }

    #[test]
    fn test_write_and_read_back_predicts_labels() {
        let dir = TempDir::new().unwrap();
        let model = fitted();
        let path = model.write(dir.path()).unwrap();
        assert!(path.ends_with("GLM_1_AutoML_1.json"));

        let restored = PortableModel::read(&path).unwrap();
        let frame = df!("x" => &[Some(0.0), Some(39.0), None]).unwrap();
        let labels = restored.predict_labels(&frame).unwrap();
        assert_eq!(labels[0], "0");
        assert_eq!(labels[1], "1");
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn test_generator_file() {
        let dir = TempDir::new().unwrap();
        let path = fitted().write_generator(dir.path()).unwrap();
        let spec: GeneratorSpec = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert_eq!(spec.features, vec!["x".to_string()]);
        assert_eq!(spec.levels.len(), 2);
    }
}
