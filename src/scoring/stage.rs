use super::records::{PredictionRecordSet, JOB_ID_COLUMN};
use crate::config::IdentityAlignment;
use crate::context::{ExecutionContext, JobId, StageOptions, TableRef};
use crate::data::{row_index, DataAccess, WriteMode};
use crate::error::{LifecycleError, Result};
use crate::stats::{ScoringStats, StatsReporter};
use crate::store::{ArtifactStore, PREDICTION_COLUMN};
use polars::prelude::*;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a successful scoring run
#[derive(Debug, Clone)]
pub struct ScoringSummary {
    pub job_id: JobId,
    pub destination: TableRef,
    pub rows_written: usize,
    /// Rows of the destination table carrying this job id after the write
    pub rows_persisted: usize,
}

/// Scoring stage bound to its collaborators
pub struct ScoringStage<'a> {
    data: &'a dyn DataAccess,
    store: &'a dyn ArtifactStore,
    stats: &'a dyn StatsReporter,
    alignment: IdentityAlignment,
}

impl<'a> ScoringStage<'a> {
    pub fn new(data: &'a dyn DataAccess, store: &'a dyn ArtifactStore, stats: &'a dyn StatsReporter) -> Self {
        Self {
            data,
            store,
            stats,
            alignment: IdentityAlignment::default(),
        }
    }

    pub fn with_alignment(mut self, alignment: IdentityAlignment) -> Self {
        self.alignment = alignment;
        self
    }

    /// Score the context's dataset with the model of `ctx.model_version`.
    /// No option currently changes scoring.
    pub fn score(&self, ctx: &ExecutionContext, _options: &StageOptions) -> Result<ScoringSummary> {
        let start = Instant::now();
        let entity_key = ctx.entity_key();
        let target = ctx.target_name();

        info!(version = %ctx.model_version, "Loading scaler");
        let scaler = self.store.load_scaler(&ctx.model_version)?;
        let model = self.store.load_model(&ctx.model_version)?;

        let frame = self.data.resolve(ctx.dataset_query())?;
        let unscaled = self.data.resolve(ctx.dataset_query())?;

        let scaled = scaler.transform(&frame, &[entity_key])?;

        info!(rows = scaled.height(), "Scoring");
        let predictions = model.predict(&scaled, entity_key)?;
        let labels = class_labels(&predictions, target)?;
        info!(elapsed_ms = start.elapsed().as_millis() as u64, "Finished scoring");

        if labels.len() != unscaled.height() {
            return Err(LifecycleError::RowCountMismatch {
                expected: unscaled.height(),
                actual: labels.len(),
            });
        }

        let keys = self.entity_keys(&unscaled, &predictions, entity_key)?;
        let records = PredictionRecordSet::new(&ctx.job_id, entity_key, target, &keys, &labels);

        let destination = ctx.dataset_info.predictions_table_ref();
        self.data
            .persist(&records.to_frame()?, &destination, WriteMode::Replace)?;
        info!(table = %destination, rows = records.len(), "Saved predictions");

        let persisted = self.data.resolve(&format!(
            "SELECT * FROM {} WHERE {} = '{}'",
            self.data.qualify(&ctx.dataset_info.predictions_metadata_table()),
            JOB_ID_COLUMN,
            ctx.job_id.as_str().replace('\'', "''")
        ))?;

        self.stats.report_scoring(ScoringStats {
            features_frame: &unscaled,
            features: ctx.feature_names(),
            predictions: &persisted,
            target,
            context: ctx,
        })?;
        info!("All done");

        Ok(ScoringSummary {
            job_id: ctx.job_id.clone(),
            destination,
            rows_written: records.len(),
            rows_persisted: persisted.height(),
        })
    }

    /// Entity keys for the record set. Positional alignment takes the
    /// unscaled frame's row index, keyed alignment the prediction frame's key
    /// column.
    fn entity_keys(&self, unscaled: &DataFrame, predictions: &DataFrame, entity_key: &str) -> Result<Vec<i64>> {
        let predicted = row_index(predictions, entity_key)?;
        match self.alignment {
            IdentityAlignment::Keyed => Ok(predicted),
            IdentityAlignment::Positional => {
                let positional = row_index(unscaled, entity_key)?;
                let diverging = positional.iter().zip(predicted.iter()).filter(|(a, b)| a != b).count();
                if diverging > 0 {
                    warn!(
                        rows = diverging,
                        entity_key,
                        "Positional entity keys differ from the prediction frame's keys"
                    );
                } else {
                    debug!("Positional entity keys match the prediction frame");
                }
                Ok(positional)
            }
        }
    }
}

/// Predicted labels renamed to `target` and coerced to integer classes
fn class_labels(predictions: &DataFrame, target: &str) -> Result<Vec<i64>> {
    let column = predictions
        .column(PREDICTION_COLUMN)
        .map_err(|_| LifecycleError::FeatureNotFound(PREDICTION_COLUMN.to_string()))?
        .as_materialized_series()
        .clone()
        .with_name(target.into());

    let as_float = column.strict_cast(&DataType::Float64).map_err(|e| {
        LifecycleError::Data(format!("predicted {} labels are not numeric: {}", target, e))
    })?;
    as_float
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(i, v)| match v {
            Some(v) if v.fract() == 0.0 => Ok(v as i64),
            Some(v) => Err(LifecycleError::Data(format!(
                "predicted {} label {} at row {} is not an integer class",
                target, v, i
            ))),
            None => Err(LifecycleError::Data(format!("missing {} prediction at row {}", target, i))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_labels_from_strings() {
        let df = df!("id" => &[1i64, 2, 3], "prediction" => &["0", "1", "1.0"]).unwrap();
        assert_eq!(class_labels(&df, "y").unwrap(), vec![0, 1, 1]);
    }

    #[test]
    fn test_class_labels_reject_text() {
        let df = df!("id" => &[1i64], "prediction" => &["yes"]).unwrap();
        assert!(matches!(class_labels(&df, "y"), Err(LifecycleError::Data(_))));
    }
}
