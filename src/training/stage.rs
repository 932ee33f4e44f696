use super::artifact::{normalize, staging_dir, NormalizedArtifact};
use crate::automl::{
    Algorithm, AutoMlEngine, CandidateModel, FeatureImportance, ImportanceResult, Leaderboard, SearchSpec,
};
use crate::context::{ExecutionContext, StageOptions};
use crate::data::{as_factor, DataAccess};
use crate::error::{LifecycleError, Result};
use crate::stats::plots::{DiagnosticPlot, PlotSink};
use crate::stats::{StatsReporter, TrainingStats};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a successful training run
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub model_id: String,
    pub algorithm: Algorithm,
    pub artifact_path: PathBuf,
    /// The artifact was already present and was not replaced
    pub pre_existing: bool,
    /// Generator file written next to the artifact by this run
    pub generator_path: Option<PathBuf>,
    pub feature_importance: FeatureImportance,
    pub levels: Vec<String>,
    pub leaderboard_size: usize,
}

/// Best gradient boosted model, or the overall leader when the search
/// produced none
pub fn select_model(leaderboard: &Leaderboard) -> Result<&dyn CandidateModel> {
    leaderboard
        .best_of_family(Algorithm::Gbm)
        .or_else(|| leaderboard.leader())
        .ok_or_else(|| LifecycleError::Engine("search produced no models".into()))
}

/// Training stage bound to its collaborators
pub struct TrainingStage<'a> {
    data: &'a dyn DataAccess,
    engine: &'a dyn AutoMlEngine,
    plots: &'a dyn PlotSink,
    stats: &'a dyn StatsReporter,
}

impl<'a> TrainingStage<'a> {
    pub fn new(
        data: &'a dyn DataAccess,
        engine: &'a dyn AutoMlEngine,
        plots: &'a dyn PlotSink,
        stats: &'a dyn StatsReporter,
    ) -> Self {
        Self {
            data,
            engine,
            plots,
            stats,
        }
    }

    /// Train, export and report. Every failure except unsupported feature
    /// importance is fatal.
    pub fn train(&self, ctx: &ExecutionContext, options: &StageOptions) -> Result<TrainingSummary> {
        let start = Instant::now();
        let target = ctx.target_name().to_string();

        let frame = self.data.resolve(ctx.dataset_query())?;
        ctx.validate_against(&frame)?;

        let (frame, levels) = as_factor(&frame, &target)?;
        debug!(target = %target, levels = ?levels, "Response converted to factor");

        let spec = self.search_spec(ctx)?;

        info!(
            job_id = %ctx.job_id,
            rows = frame.height(),
            max_models = spec.max_models,
            seed = spec.seed,
            "Starting training"
        );
        let leaderboard = self.engine.search(&frame, &spec)?;
        info!(
            models = leaderboard.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Finished training"
        );

        let model = select_model(&leaderboard)?;
        info!(model_id = model.model_id(), algorithm = %model.algorithm(), "Selected model");

        let dir = &ctx.artifact_output_path;
        let staging = staging_dir(dir, model.model_id());
        let exported = model.export(&staging, options.flag("export_generator", true))?;
        let normalized = normalize(&exported, dir);
        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!(path = %staging.display(), error = %e, "Could not remove export staging directory");
        }
        let NormalizedArtifact {
            path,
            generator_path,
            pre_existing,
        } = normalized?;
        info!(path = %path.display(), "Saved trained model");

        let feature_importance = self.importance(model, &leaderboard, ctx);

        let targets = vec![target.clone()];
        self.stats.report_training(TrainingStats {
            dataset: &frame,
            features: ctx.feature_names(),
            targets: &targets,
            categorical: &targets,
            feature_importance: &feature_importance,
            context: ctx,
        })?;

        Ok(TrainingSummary {
            model_id: model.model_id().to_string(),
            algorithm: model.algorithm(),
            artifact_path: path,
            pre_existing,
            generator_path,
            feature_importance,
            levels,
            leaderboard_size: leaderboard.len(),
        })
    }

    fn search_spec(&self, ctx: &ExecutionContext) -> Result<SearchSpec> {
        let hp = &ctx.hyperparams;
        let exclude = hp
            .exclude_algos()
            .iter()
            .map(|name| name.parse::<Algorithm>())
            .collect::<Result<Vec<_>>>()?;

        Ok(SearchSpec::new(
            ctx.feature_names().to_vec(),
            ctx.target_name(),
            hp.max_models()?,
            hp.seed()?,
        )
        .with_exclude_algos(exclude)
        .with_validation_fraction(hp.validation_fraction()))
    }

    /// Importance of the selected model, falling back to a heatmap across the
    /// leaderboard when the model cannot report one. Never fails.
    fn importance(&self, model: &dyn CandidateModel, leaderboard: &Leaderboard, ctx: &ExecutionContext) -> FeatureImportance {
        let dir = &ctx.artifact_output_path;
        match model.feature_importance() {
            ImportanceResult::Supported(map) => {
                let plot = DiagnosticPlot::feature_importance(model.model_id(), &map);
                if let Err(e) = self.plots.save(dir, &plot) {
                    warn!(error = %e, "Could not save feature importance plot");
                }
                map
            }
            ImportanceResult::Unsupported { reason } => {
                info!(model_id = model.model_id(), reason = %reason, "Feature importance unavailable, plotting heatmap");
                let plot = DiagnosticPlot::VarImpHeatmap(leaderboard.varimp_heatmap());
                if let Err(e) = self.plots.save(dir, &plot) {
                    warn!(error = %e, "Could not save feature heatmap");
                }
                FeatureImportance::empty()
            }
        }
    }
}
