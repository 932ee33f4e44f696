//! Versioned artifact store
//!
//! Trained models and fitted scaling transforms are addressed by model
//! version. Publishing a version is normally the orchestration platform's
//! job; [`FsArtifactStore`] also exposes it so a local setup can stand in.

use crate::automl::PortableModel;
use crate::context::ModelVersion;
use crate::error::{LifecycleError, Result};
use crate::preprocessing::ScaleTransform;
use polars::prelude::*;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the column a [`Predictor`] writes its labels to
pub const PREDICTION_COLUMN: &str = "prediction";

/// Kind of versioned object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Model,
    Scaler,
}

impl ArtifactKind {
    /// Store object name for a version, e.g. `model_3`
    pub fn object_name(&self, version: &ModelVersion) -> String {
        match self {
            ArtifactKind::Model => format!("model_{}", version),
            ArtifactKind::Scaler => format!("scaler_{}", version),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Model => f.write_str("model"),
            ArtifactKind::Scaler => f.write_str("scaler"),
        }
    }
}

/// A model that can label the rows of a frame
pub trait Predictor: Send + Sync {
    /// Returns `[id_column, prediction]`, one row per input row, in input order
    fn predict(&self, frame: &DataFrame, id_column: &str) -> Result<DataFrame>;
}

impl Predictor for PortableModel {
    fn predict(&self, frame: &DataFrame, id_column: &str) -> Result<DataFrame> {
        let ids = frame
            .column(id_column)
            .map_err(|_| LifecycleError::FeatureNotFound(id_column.to_string()))?
            .clone();
        let labels = self.predict_labels(frame)?;
        let predictions = Series::new(PREDICTION_COLUMN.into(), labels);
        Ok(DataFrame::new(vec![ids, predictions.into()])?)
    }
}

/// Object loaded from the store
pub enum LoadedArtifact {
    Model(Box<dyn Predictor>),
    Scaler(ScaleTransform),
}

/// Read access to versioned artifacts
pub trait ArtifactStore {
    fn load(&self, kind: ArtifactKind, version: &ModelVersion) -> Result<LoadedArtifact>;

    fn load_model(&self, version: &ModelVersion) -> Result<Box<dyn Predictor>> {
        match self.load(ArtifactKind::Model, version)? {
            LoadedArtifact::Model(model) => Ok(model),
            LoadedArtifact::Scaler(_) => Err(LifecycleError::Artifact(format!(
                "{} is not a model",
                ArtifactKind::Model.object_name(version)
            ))),
        }
    }

    fn load_scaler(&self, version: &ModelVersion) -> Result<ScaleTransform> {
        match self.load(ArtifactKind::Scaler, version)? {
            LoadedArtifact::Scaler(scaler) => Ok(scaler),
            LoadedArtifact::Model(_) => Err(LifecycleError::Artifact(format!(
                "{} is not a scaler",
                ArtifactKind::Scaler.object_name(version)
            ))),
        }
    }
}

/// Artifact store laid out as `<root>/<kind>_<version>.json`
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, kind: ArtifactKind, version: &ModelVersion) -> PathBuf {
        self.root.join(format!("{}.json", kind.object_name(version)))
    }

    pub fn contains(&self, kind: ArtifactKind, version: &ModelVersion) -> bool {
        self.path(kind, version).is_file()
    }

    /// Publish an exported model file under `version`
    pub fn publish_model(&self, artifact: &Path, version: &ModelVersion) -> Result<PathBuf> {
        // Refuse files that would not load back
        PortableModel::read(artifact)?;
        fs::create_dir_all(&self.root)?;
        let dest = self.path(ArtifactKind::Model, version);
        fs::copy(artifact, &dest)?;
        info!(version = %version, path = %dest.display(), "Published model");
        Ok(dest)
    }

    /// Publish a fitted scaling transform under `version`
    pub fn publish_scaler(&self, scaler: &ScaleTransform, version: &ModelVersion) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let dest = self.path(ArtifactKind::Scaler, version);
        fs::write(&dest, serde_json::to_vec_pretty(scaler)?)?;
        info!(version = %version, path = %dest.display(), "Published scaler");
        Ok(dest)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn load(&self, kind: ArtifactKind, version: &ModelVersion) -> Result<LoadedArtifact> {
        let path = self.path(kind, version);
        if !path.is_file() {
            return Err(LifecycleError::Resolution(format!(
                "{} not found in artifact store {}",
                kind.object_name(version),
                self.root.display()
            )));
        }
        match kind {
            ArtifactKind::Model => Ok(LoadedArtifact::Model(Box::new(PortableModel::read(&path)?))),
            ArtifactKind::Scaler => {
                let raw = fs::read(&path)?;
                let scaler: ScaleTransform = serde_json::from_slice(&raw)?;
                Ok(LoadedArtifact::Scaler(scaler))
            }
        }
    }
}
