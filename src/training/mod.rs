//! Training stage
//!
//! Resolves the training dataset, runs the automated model search, exports
//! the selected model as `model.h2o` and reports dataset statistics.

mod artifact;
mod stage;

pub use artifact::{normalize, staging_dir, NormalizedArtifact, ARTIFACT_FILE_NAME};
pub use stage::{select_model, TrainingStage, TrainingSummary};
