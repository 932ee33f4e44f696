//! Execution context supplied by the orchestration platform
//!
//! A context is deserialized once per invocation, validated, and then only
//! ever lent to a stage by shared reference. Stages never mutate it.

use crate::error::{LifecycleError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Model version identifier used to address persisted artifacts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelVersion(String);

impl ModelVersion {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the orchestration job running a stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a warehouse table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub database: String,
    pub table: String,
}

impl TableRef {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    /// Fully qualified table name (`database.table`)
    pub fn fqtn(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Dataset location and column roles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// Data-retrieval statement resolving to the dataset
    #[serde(alias = "datasetQuery", alias = "query")]
    pub sql: String,

    #[serde(alias = "featureNames")]
    pub feature_names: Vec<String>,

    #[serde(alias = "targetNames")]
    pub target_names: Vec<String>,

    #[serde(alias = "entityKey")]
    pub entity_key: String,

    #[serde(default, alias = "predictionsDatabase")]
    pub predictions_database: String,

    #[serde(default, alias = "predictionsTable")]
    pub predictions_table: String,
}

impl DatasetInfo {
    /// Destination table for scoring output
    pub fn predictions_table_ref(&self) -> TableRef {
        TableRef::new(&self.predictions_database, &self.predictions_table)
    }

    /// Table holding persisted predictions metadata (the predictions table itself)
    pub fn predictions_metadata_table(&self) -> TableRef {
        self.predictions_table_ref()
    }
}

/// Open hyperparameter mapping with typed accessors for the keys the stages use
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hyperparameters(Map<String, Value>);

impl Hyperparameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set an arbitrary hyperparameter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Upper bound on candidate models in the search (`max_models`, > 0)
    pub fn max_models(&self) -> Result<usize> {
        let value = self
            .lookup(&["max_models", "maxModels"])
            .ok_or_else(|| LifecycleError::InvalidContext("missing hyperparameter max_models".into()))?;
        match value.as_u64() {
            Some(n) if n > 0 => Ok(n as usize),
            _ => Err(LifecycleError::InvalidContext(format!(
                "max_models must be a positive integer, got {}",
                value
            ))),
        }
    }

    /// Seed controlling the search order
    pub fn seed(&self) -> Result<u64> {
        let value = self
            .lookup(&["seed"])
            .ok_or_else(|| LifecycleError::InvalidContext("missing hyperparameter seed".into()))?;
        value
            .as_u64()
            .or_else(|| value.as_i64().map(|v| v as u64))
            .ok_or_else(|| LifecycleError::InvalidContext(format!("seed must be an integer, got {}", value)))
    }

    /// Algorithm families excluded from the search
    pub fn exclude_algos(&self) -> Vec<String> {
        self.lookup(&["exclude_algos", "excludeAlgos"])
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fraction of rows held out to rank candidates
    pub fn validation_fraction(&self) -> f64 {
        self.lookup(&["validation_fraction", "validationFraction"])
            .and_then(Value::as_f64)
            .filter(|f| *f > 0.0 && *f < 1.0)
            .unwrap_or(0.2)
    }

    fn lookup(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|k| self.0.get(*k))
    }
}

/// Immutable per-invocation context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(alias = "datasetInfo")]
    pub dataset_info: DatasetInfo,

    #[serde(default, alias = "hyperparameters")]
    pub hyperparams: Hyperparameters,

    #[serde(alias = "artifactOutputPath")]
    pub artifact_output_path: PathBuf,

    #[serde(alias = "modelVersion")]
    pub model_version: ModelVersion,

    #[serde(alias = "jobId")]
    pub job_id: JobId,
}

impl ExecutionContext {
    /// Start building a context from a dataset description
    pub fn builder(dataset_info: DatasetInfo) -> ContextBuilder {
        ContextBuilder::new(dataset_info)
    }

    /// Parse and validate a context document
    pub fn from_json(raw: &str) -> Result<Self> {
        let ctx: Self = serde_json::from_str(raw)?;
        ctx.validate()?;
        Ok(ctx)
    }

    /// Read and validate a context document from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LifecycleError::InvalidContext(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn dataset_query(&self) -> &str {
        &self.dataset_info.sql
    }

    pub fn feature_names(&self) -> &[String] {
        &self.dataset_info.feature_names
    }

    /// First entry of the target list
    pub fn target_name(&self) -> &str {
        // validate() guarantees a non-empty target list
        self.dataset_info
            .target_names
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn entity_key(&self) -> &str {
        &self.dataset_info.entity_key
    }

    /// Check the invariants that do not depend on data
    pub fn validate(&self) -> Result<()> {
        let info = &self.dataset_info;
        if info.sql.trim().is_empty() {
            return Err(LifecycleError::InvalidContext("dataset query is empty".into()));
        }
        let target = info
            .target_names
            .first()
            .ok_or_else(|| LifecycleError::InvalidContext("target list is empty".into()))?;
        if info.feature_names.iter().any(|f| f == target) {
            return Err(LifecycleError::InvalidContext(format!(
                "target '{}' is also listed as a feature",
                target
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = info.feature_names.iter().find(|f| !seen.insert(f.as_str())) {
            return Err(LifecycleError::InvalidContext(format!("duplicate feature '{}'", dup)));
        }
        Ok(())
    }

    /// Check that the resolved dataset carries every column the context names
    pub fn validate_against(&self, df: &DataFrame) -> Result<()> {
        let columns: HashSet<&str> = df.get_column_names().into_iter().map(|c| c.as_str()).collect();
        let target = self.target_name();
        if !columns.contains(target) {
            return Err(LifecycleError::InvalidContext(format!(
                "target '{}' is not a column of the resolved dataset",
                target
            )));
        }
        if let Some(missing) = self.feature_names().iter().find(|f| !columns.contains(f.as_str())) {
            return Err(LifecycleError::InvalidContext(format!(
                "feature '{}' is not a column of the resolved dataset",
                missing
            )));
        }
        Ok(())
    }
}

/// Builder for [`ExecutionContext`], mostly used by tests and the CLI
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    dataset_info: DatasetInfo,
    hyperparams: Hyperparameters,
    artifact_output_path: PathBuf,
    model_version: ModelVersion,
    job_id: JobId,
}

impl ContextBuilder {
    fn new(dataset_info: DatasetInfo) -> Self {
        Self {
            dataset_info,
            hyperparams: Hyperparameters::default(),
            artifact_output_path: PathBuf::from("artifacts/output"),
            model_version: ModelVersion::new("1"),
            job_id: JobId::new("local"),
        }
    }

    pub fn hyperparams(mut self, hyperparams: Hyperparameters) -> Self {
        self.hyperparams = hyperparams;
        self
    }

    pub fn artifact_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_output_path = path.into();
        self
    }

    pub fn model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = ModelVersion::new(version);
        self
    }

    pub fn job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = JobId::new(job_id);
        self
    }

    /// Validate and build the context
    pub fn build(self) -> Result<ExecutionContext> {
        let ctx = ExecutionContext {
            dataset_info: self.dataset_info,
            hyperparams: self.hyperparams,
            artifact_output_path: self.artifact_output_path,
            model_version: self.model_version,
            job_id: self.job_id,
        };
        ctx.validate()?;
        Ok(ctx)
    }
}

/// Open-ended configuration bag passed alongside the context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageOptions(Map<String, Value>);

impl StageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Boolean option with a default when absent or not a boolean
    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_json() -> &'static str {
        r#"{
            "dataset_info": {
                "sql": "SELECT * FROM pima_patient_features",
                "feature_names": ["NumTimesPrg", "PlGlcConc", "BloodP"],
                "target_names": ["HasDiabetes"],
                "entity_key": "PatientId",
                "predictions_database": "demo",
                "predictions_table": "pima_patient_predictions"
            },
            "hyperparams": {"max_models": 5, "seed": 42},
            "artifact_output_path": "artifacts/output",
            "model_version": "3",
            "job_id": "job-1"
        }"#
    }

    #[test]
    fn test_parse_context() {
        let ctx = ExecutionContext::from_json(context_json()).unwrap();
        assert_eq!(ctx.target_name(), "HasDiabetes");
        assert_eq!(ctx.entity_key(), "PatientId");
        assert_eq!(ctx.hyperparams.max_models().unwrap(), 5);
        assert_eq!(ctx.hyperparams.seed().unwrap(), 42);
        assert_eq!(ctx.model_version.as_str(), "3");
        assert_eq!(
            ctx.dataset_info.predictions_table_ref().fqtn(),
            "demo.pima_patient_predictions"
        );
    }

    #[test]
    fn test_camel_case_aliases() {
        let raw = r#"{
            "datasetInfo": {
                "datasetQuery": "SELECT * FROM t",
                "featureNames": ["a"],
                "targetNames": ["y"],
                "entityKey": "id"
            },
            "hyperparameters": {"maxModels": 2, "seed": 1},
            "artifactOutputPath": "out",
            "modelVersion": "7",
            "jobId": "j"
        }"#;
        let ctx = ExecutionContext::from_json(raw).unwrap();
        assert_eq!(ctx.dataset_query(), "SELECT * FROM t");
        assert_eq!(ctx.hyperparams.max_models().unwrap(), 2);
    }

    #[test]
    fn test_target_listed_as_feature_is_rejected() {
        let info = DatasetInfo {
            sql: "SELECT * FROM t".into(),
            feature_names: vec!["a".into(), "y".into()],
            target_names: vec!["y".into()],
            entity_key: "id".into(),
            predictions_database: String::new(),
            predictions_table: String::new(),
        };
        let result = ExecutionContext::builder(info).build();
        assert!(matches!(result, Err(LifecycleError::InvalidContext(_))));
    }

    #[test]
    fn test_max_models_must_be_positive() {
        let hp = Hyperparameters::new().with("max_models", 0).with("seed", 1);
        assert!(hp.max_models().is_err());
        let hp = Hyperparameters::new().with("seed", -3);
        assert_eq!(hp.seed().unwrap(), (-3i64) as u64);
        assert!(hp.max_models().is_err());
    }

    #[test]
    fn test_validate_against_frame() {
        let ctx = ExecutionContext::from_json(context_json()).unwrap();
        let df = df!(
            "PatientId" => &[1i64, 2],
            "NumTimesPrg" => &[1.0, 2.0],
            "PlGlcConc" => &[90.0, 120.0],
            "HasDiabetes" => &[0i64, 1]
        )
        .unwrap();
        let err = ctx.validate_against(&df).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidContext(ref m) if m.contains("BloodP")));
    }

    #[test]
    fn test_stage_options_flag() {
        let opts = StageOptions::new().with("export_generator", false);
        assert!(!opts.flag("export_generator", true));
        assert!(opts.flag("missing", true));
    }
}
