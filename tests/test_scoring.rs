//! Integration test: Scoring stage end-to-end

use modelops_lifecycle::automl::LocalAutoMl;
use modelops_lifecycle::config::IdentityAlignment;
use modelops_lifecycle::context::{DatasetInfo, ExecutionContext, Hyperparameters, ModelVersion, StageOptions, TableRef};
use modelops_lifecycle::data::{ColumnDef, ColumnType, DataAccess, LocalWarehouse, TableSchema, WriteMode};
use modelops_lifecycle::error::{LifecycleError, Result};
use modelops_lifecycle::preprocessing::{ScaleTransform, ScalerType};
use modelops_lifecycle::scoring::ScoringStage;
use modelops_lifecycle::stats::plots::FsPlotSink;
use modelops_lifecycle::stats::{JsonStatsReporter, ScoringStats, StatsReporter, TrainingStats, SCORING_STATS_FILE};
use modelops_lifecycle::store::{ArtifactKind, ArtifactStore, FsArtifactStore, LoadedArtifact, Predictor};
use modelops_lifecycle::training::{TrainingStage, ARTIFACT_FILE_NAME};
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

const WELDING_IDS: [i64; 10] = [101, 102, 103, 104, 105, 106, 107, 108, 109, 110];

fn welding_training_df(n: usize) -> DataFrame {
    let current: Vec<f64> = (0..n).map(|i| 80.0 + (i % 40) as f64).collect();
    let speed: Vec<f64> = (0..n).map(|i| 5.0 + ((i * 7) % 11) as f64 * 0.5).collect();
    let defect: Vec<i64> = current.iter().map(|c| i64::from(*c >= 100.0)).collect();
    df!(
        "WELDING_ID" => (0..n as i64).collect::<Vec<_>>(),
        "Current" => current,
        "Speed" => speed,
        "Defect" => defect
    )
    .unwrap()
}

fn welding_scoring_df() -> DataFrame {
    df!(
        "WELDING_ID" => &WELDING_IDS,
        "Current" => &[82.0, 85.0, 90.0, 95.0, 99.0, 101.0, 105.0, 110.0, 115.0, 118.0],
        "Speed" => &[5.0, 5.5, 6.0, 6.5, 7.0, 7.5, 8.0, 8.5, 9.0, 9.5]
    )
    .unwrap()
}

struct Fixture {
    dir: TempDir,
    warehouse: LocalWarehouse,
}

impl Fixture {
    fn output(&self) -> PathBuf {
        self.dir.path().join("artifacts").join("output")
    }

    fn store(&self) -> FsArtifactStore {
        FsArtifactStore::new(self.dir.path().join("store"))
    }
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let warehouse = LocalWarehouse::open(dir.path().join("warehouse"), "welding").unwrap();
    warehouse
        .persist(&welding_training_df(200), &TableRef::new("welding", "weld_history"), WriteMode::Replace)
        .unwrap();
    warehouse
        .persist(&welding_scoring_df(), &TableRef::new("welding", "weld_batch"), WriteMode::Replace)
        .unwrap();
    Fixture { dir, warehouse }
}

fn context(output: &Path, sql: &str, job: &str) -> ExecutionContext {
    let info = DatasetInfo {
        sql: sql.into(),
        feature_names: vec!["Current".into(), "Speed".into()],
        target_names: vec!["Defect".into()],
        entity_key: "WELDING_ID".into(),
        predictions_database: "welding".into(),
        predictions_table: "weld_predictions".into(),
    };
    ExecutionContext::builder(info)
        .hyperparams(Hyperparameters::new().with("max_models", 3).with("seed", 42))
        .artifact_output_path(output)
        .model_version("3")
        .job_id(job)
        .build()
        .unwrap()
}

fn fitted_scaler(df: &DataFrame, scaler_type: ScalerType) -> ScaleTransform {
    let mut scaler = ScaleTransform::new(scaler_type);
    scaler.fit(df, &["Current", "Speed"]).unwrap();
    scaler
}

/// Train on the history table and publish the result as version 3
fn train_and_publish(fx: &Fixture) -> FsArtifactStore {
    let output = fx.output();
    let ctx = context(&output, "SELECT * FROM weld_history", "train-job");
    let engine = LocalAutoMl::new().with_ntrees(10);
    TrainingStage::new(&fx.warehouse, &engine, &FsPlotSink, &JsonStatsReporter::new())
        .train(&ctx, &StageOptions::new())
        .unwrap();

    let store = fx.store();
    let version = ModelVersion::new("3");
    store
        .publish_model(&output.join(ARTIFACT_FILE_NAME), &version)
        .unwrap();
    // The model was trained on raw features, so the published transform is the identity
    let history = fx.warehouse.resolve("SELECT * FROM weld_history").unwrap();
    store
        .publish_scaler(&fitted_scaler(&history, ScalerType::None), &version)
        .unwrap();
    store
}

#[derive(Debug, Clone)]
struct ScoringRecord {
    feature_rows: usize,
    persisted: DataFrame,
}

#[derive(Default)]
struct RecordingReporter {
    scoring: Mutex<Vec<ScoringRecord>>,
}

impl StatsReporter for RecordingReporter {
    fn report_training(&self, _stats: TrainingStats<'_>) -> Result<()> {
        Ok(())
    }

    fn report_scoring(&self, stats: ScoringStats<'_>) -> Result<()> {
        self.scoring.lock().unwrap().push(ScoringRecord {
            feature_rows: stats.features_frame.height(),
            persisted: stats.predictions.clone(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum StubBehaviour {
    /// Predictions in input order
    InOrder,
    /// Predictions in reverse input order
    Reversed,
    /// Last row missing
    Truncated,
}

/// Labels even ids as defective
#[derive(Clone, Copy)]
struct StubPredictor(StubBehaviour);

impl Predictor for StubPredictor {
    fn predict(&self, frame: &DataFrame, id_column: &str) -> Result<DataFrame> {
        let mut ids: Vec<i64> = frame
            .column(id_column)?
            .i64()?
            .into_no_null_iter()
            .collect();
        match self.0 {
            StubBehaviour::InOrder => {}
            StubBehaviour::Reversed => ids.reverse(),
            StubBehaviour::Truncated => {
                ids.pop();
            }
        }
        let labels: Vec<&str> = ids.iter().map(|id| if id % 2 == 0 { "1" } else { "0" }).collect();
        Ok(df!(id_column => ids, "prediction" => labels)?)
    }
}

struct StubStore {
    scaler: ScaleTransform,
    behaviour: StubBehaviour,
}

impl ArtifactStore for StubStore {
    fn load(&self, kind: ArtifactKind, _version: &ModelVersion) -> Result<LoadedArtifact> {
        Ok(match kind {
            ArtifactKind::Model => LoadedArtifact::Model(Box::new(StubPredictor(self.behaviour))),
            ArtifactKind::Scaler => LoadedArtifact::Scaler(self.scaler.clone()),
        })
    }
}

fn stub_store(behaviour: StubBehaviour) -> StubStore {
    StubStore {
        scaler: fitted_scaler(&welding_scoring_df(), ScalerType::Standard),
        behaviour,
    }
}

fn i64_column(df: &DataFrame, name: &str) -> Vec<i64> {
    df.column(name).unwrap().i64().unwrap().into_no_null_iter().collect()
}

#[test]
fn test_score_published_model() {
    let fx = fixture();
    let store = train_and_publish(&fx);
    let ctx = context(&fx.output(), "SELECT * FROM weld_batch", "score-job");

    let result = ScoringStage::new(&fx.warehouse, &store, &JsonStatsReporter::new()).score(&ctx, &StageOptions::new());
    assert!(result.is_ok(), "Scoring should succeed: {:?}", result.as_ref().err());
    let summary = result.unwrap();
    assert_eq!(summary.rows_written, 10);
    assert_eq!(summary.rows_persisted, 10);
    assert_eq!(summary.destination, TableRef::new("welding", "weld_predictions"));

    let out = fx.warehouse.read_table(&summary.destination).unwrap();
    let names: Vec<&str> = out.get_column_names().into_iter().map(|c| c.as_str()).collect();
    assert_eq!(names, vec!["job_id", "WELDING_ID", "Defect", "json_report"]);
    assert_eq!(i64_column(&out, "WELDING_ID"), WELDING_IDS.to_vec());
    let defects = i64_column(&out, "Defect");
    assert!(defects.iter().all(|d| *d == 0 || *d == 1));
    assert_eq!(defects[0], 0);
    assert_eq!(defects[9], 1);
    assert!(out
        .column("json_report")
        .unwrap()
        .str()
        .unwrap()
        .into_no_null_iter()
        .all(|r| r.is_empty()));
    assert!(out
        .column("job_id")
        .unwrap()
        .str()
        .unwrap()
        .into_no_null_iter()
        .all(|j| j == "score-job"));

    assert!(fx.output().join(SCORING_STATS_FILE).exists());
}

#[test]
fn test_replace_twice_does_not_duplicate() {
    let fx = fixture();
    let store = stub_store(StubBehaviour::InOrder);
    let ctx = context(&fx.output(), "SELECT * FROM weld_batch", "score-job");
    let reporter = RecordingReporter::default();
    let stage = ScoringStage::new(&fx.warehouse, &store, &reporter);

    stage.score(&ctx, &StageOptions::new()).unwrap();
    stage.score(&ctx, &StageOptions::new()).unwrap();

    let out = fx
        .warehouse
        .read_table(&TableRef::new("welding", "weld_predictions"))
        .unwrap();
    assert_eq!(out.height(), 10);
    assert_eq!(i64_column(&out, "Defect"), vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);

    let calls = reporter.scoring.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].feature_rows, 10);
    assert_eq!(calls[1].persisted.height(), 10);
}

#[test]
fn test_positional_alignment_keeps_source_order() {
    let fx = fixture();
    let store = stub_store(StubBehaviour::Reversed);
    let ctx = context(&fx.output(), "SELECT * FROM weld_batch", "score-job");

    ScoringStage::new(&fx.warehouse, &store, &RecordingReporter::default())
        .score(&ctx, &StageOptions::new())
        .unwrap();

    let out = fx
        .warehouse
        .read_table(&TableRef::new("welding", "weld_predictions"))
        .unwrap();
    // Keys follow the unscaled frame, predictions follow the model output
    assert_eq!(i64_column(&out, "WELDING_ID"), WELDING_IDS.to_vec());
    assert_eq!(i64_column(&out, "Defect"), vec![1, 0, 1, 0, 1, 0, 1, 0, 1, 0]);
}

#[test]
fn test_keyed_alignment_uses_prediction_keys() {
    let fx = fixture();
    let store = stub_store(StubBehaviour::Reversed);
    let ctx = context(&fx.output(), "SELECT * FROM weld_batch", "score-job");

    ScoringStage::new(&fx.warehouse, &store, &RecordingReporter::default())
        .with_alignment(IdentityAlignment::Keyed)
        .score(&ctx, &StageOptions::new())
        .unwrap();

    let out = fx
        .warehouse
        .read_table(&TableRef::new("welding", "weld_predictions"))
        .unwrap();
    let mut reversed = WELDING_IDS.to_vec();
    reversed.reverse();
    assert_eq!(i64_column(&out, "WELDING_ID"), reversed);
    assert_eq!(i64_column(&out, "Defect"), vec![1, 0, 1, 0, 1, 0, 1, 0, 1, 0]);
}

#[test]
fn test_row_count_mismatch_is_fatal() {
    let fx = fixture();
    let store = stub_store(StubBehaviour::Truncated);
    let ctx = context(&fx.output(), "SELECT * FROM weld_batch", "score-job");

    let result = ScoringStage::new(&fx.warehouse, &store, &RecordingReporter::default()).score(&ctx, &StageOptions::new());
    assert!(matches!(
        result,
        Err(LifecycleError::RowCountMismatch { expected: 10, actual: 9 })
    ));
    assert!(!fx.warehouse.table_exists(&TableRef::new("welding", "weld_predictions")));
}

#[test]
fn test_missing_version_is_resolution_error() {
    let fx = fixture();
    let store = fx.store();
    let ctx = context(&fx.output(), "SELECT * FROM weld_batch", "score-job");

    let result = ScoringStage::new(&fx.warehouse, &store, &RecordingReporter::default()).score(&ctx, &StageOptions::new());
    assert!(matches!(result, Err(LifecycleError::Resolution(_))));
}

#[test]
fn test_declared_schema_rejects_incompatible_table() {
    let fx = fixture();
    let destination = TableRef::new("welding", "weld_predictions");
    fx.warehouse
        .create_table(
            &destination,
            &TableSchema::new(vec![
                ColumnDef::new("job_id", ColumnType::Varchar),
                ColumnDef::new("WELDING_ID", ColumnType::BigInt),
                ColumnDef::new("Defect", ColumnType::BigInt),
            ]),
        )
        .unwrap();

    let store = stub_store(StubBehaviour::InOrder);
    let ctx = context(&fx.output(), "SELECT * FROM weld_batch", "score-job");
    let result = ScoringStage::new(&fx.warehouse, &store, &RecordingReporter::default()).score(&ctx, &StageOptions::new());
    assert!(matches!(result, Err(LifecycleError::SchemaMismatch { .. })));
}

#[test]
fn test_declared_schema_matching_by_position() {
    let fx = fixture();
    let destination = TableRef::new("welding", "weld_predictions");
    fx.warehouse
        .create_table(
            &destination,
            &TableSchema::new(vec![
                ColumnDef::new("job_id", ColumnType::Varchar),
                ColumnDef::new("WELDING_ID", ColumnType::BigInt),
                ColumnDef::new("Defect", ColumnType::BigInt),
                ColumnDef::new("json_report", ColumnType::Clob),
            ]),
        )
        .unwrap();

    let store = stub_store(StubBehaviour::InOrder);
    let ctx = context(&fx.output(), "SELECT * FROM weld_batch", "score-job-2");
    let summary = ScoringStage::new(&fx.warehouse, &store, &RecordingReporter::default())
        .score(&ctx, &StageOptions::new())
        .unwrap();
    assert_eq!(summary.rows_persisted, 10);

    let out = fx.warehouse.read_table(&destination).unwrap();
    assert_eq!(out.column("Defect").unwrap().dtype(), &DataType::Int64);
    assert!(fs::read_dir(fx.dir.path().join("warehouse").join("welding"))
        .unwrap()
        .any(|e| e.unwrap().file_name() == "weld_predictions.schema.json"));
}
