//! Normalization of exported model files

use crate::automl::{ExportedArtifact, GENERATOR_FILE_NAME};
use crate::error::{LifecycleError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Fixed file name of the trained model artifact
pub const ARTIFACT_FILE_NAME: &str = "model.h2o";

/// Where the trained model ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedArtifact {
    pub path: PathBuf,
    /// Generator file placed next to the model by this run
    pub generator_path: Option<PathBuf>,
    /// `model.h2o` was already present and has been left untouched
    pub pre_existing: bool,
}

/// Scratch directory inside `dir` that a model is exported into before
/// [`normalize`] places it
pub fn staging_dir(dir: &Path, model_id: &str) -> PathBuf {
    dir.join(format!(".export-{}", model_id))
}

/// Move an export into `dir`: the model as [`ARTIFACT_FILE_NAME`] and its
/// generator file, if any, as [`GENERATOR_FILE_NAME`].
///
/// An existing `model.h2o` is never overwritten. In that case neither
/// exported file is moved, so a generator already in `dir` keeps describing
/// the model it was written with, and a warning is logged.
pub fn normalize(exported: &ExportedArtifact, dir: &Path) -> Result<NormalizedArtifact> {
    let target = dir.join(ARTIFACT_FILE_NAME);

    if target.exists() {
        warn!(
            path = %target.display(),
            exported = %exported.model_path.display(),
            "Model artifact already exists, not overwriting"
        );
        return Ok(NormalizedArtifact {
            path: target,
            generator_path: None,
            pre_existing: true,
        });
    }

    move_file(&exported.model_path, &target)?;
    let generator_path = match &exported.generator_path {
        Some(staged) => {
            let placed = dir.join(GENERATOR_FILE_NAME);
            move_file(staged, &placed)?;
            Some(placed)
        }
        None => None,
    };

    Ok(NormalizedArtifact {
        path: target,
        generator_path,
        pre_existing: false,
    })
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if from == to {
        return Ok(());
    }
    fs::rename(from, to).map_err(|e| {
        LifecycleError::Artifact(format!(
            "cannot rename {} to {}: {}",
            from.display(),
            to.display(),
            e
        ))
    })
}
