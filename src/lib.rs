//! modelops-lifecycle - Training and scoring stages for warehouse-backed AutoML
//!
//! Two independent stages run inside an orchestrated pipeline:
//! - [`training`] resolves a dataset, runs an automated model search, exports
//!   the selected model as `model.h2o` and reports dataset statistics
//! - [`scoring`] applies a published model and scaler to a dataset and
//!   replaces the predictions table
//!
//! # Modules
//!
//! - [`context`] - Execution context supplied per invocation
//! - [`config`] - Process-wide runtime configuration
//! - [`data`] - Data access adapter and the local parquet warehouse
//! - [`preprocessing`] - Feature scaling transform
//! - [`automl`] - Search engine contract and the in-process engine
//! - [`store`] - Versioned artifact store
//! - [`stats`] - Dataset statistics and diagnostic plots
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

pub mod config;
pub mod context;
pub mod data;
pub mod preprocessing;

pub mod automl;
pub mod store;
pub mod stats;

// Stages
pub mod training;
pub mod scoring;

pub mod cli;

pub use error::{LifecycleError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{LifecycleError, Result};

    pub use crate::config::{IdentityAlignment, RuntimeConfig};
    pub use crate::context::{DatasetInfo, ExecutionContext, Hyperparameters, JobId, ModelVersion, StageOptions, TableRef};

    pub use crate::data::{DataAccess, LocalWarehouse, WriteMode};
    pub use crate::preprocessing::{ScaleTransform, ScalerType};

    pub use crate::automl::{
        Algorithm, AutoMlEngine, CandidateModel, FeatureImportance, ImportanceResult, Leaderboard, LocalAutoMl,
        SearchSpec,
    };
    pub use crate::store::{ArtifactKind, ArtifactStore, FsArtifactStore, Predictor};
    pub use crate::stats::plots::{DiagnosticPlot, FsPlotSink, PlotSink};
    pub use crate::stats::{JsonStatsReporter, ScoringStats, StatsReporter, TrainingStats};

    pub use crate::scoring::{PredictionRecordSet, ScoringStage, ScoringSummary};
    pub use crate::training::{TrainingStage, TrainingSummary, ARTIFACT_FILE_NAME};
}
