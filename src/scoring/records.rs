//! Prediction records written to the predictions table

use crate::context::JobId;
use crate::error::Result;
use polars::prelude::*;

pub const JOB_ID_COLUMN: &str = "job_id";
pub const JSON_REPORT_COLUMN: &str = "json_report";

/// One scored row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionRecord {
    pub job_id: JobId,
    pub entity_key: i64,
    pub prediction: i64,
    /// Always empty
    pub json_report: String,
}

/// Scored rows with fixed column names.
///
/// The frame columns are `[job_id, <entity key>, <target>, json_report]`,
/// in that order; the destination table matches them by position.
#[derive(Debug, Clone)]
pub struct PredictionRecordSet {
    entity_key: String,
    target: String,
    records: Vec<PredictionRecord>,
}

impl PredictionRecordSet {
    /// Pair entity keys and predictions row by row
    pub fn new(
        job_id: &JobId,
        entity_key: impl Into<String>,
        target: impl Into<String>,
        keys: &[i64],
        predictions: &[i64],
    ) -> Self {
        let records = keys
            .iter()
            .zip(predictions.iter())
            .map(|(&entity_key, &prediction)| PredictionRecord {
                job_id: job_id.clone(),
                entity_key,
                prediction,
                json_report: String::new(),
            })
            .collect();
        Self {
            entity_key: entity_key.into(),
            target: target.into(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    pub fn column_names(&self) -> [&str; 4] {
        [JOB_ID_COLUMN, &self.entity_key, &self.target, JSON_REPORT_COLUMN]
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        let job_ids: Vec<&str> = self.records.iter().map(|r| r.job_id.as_str()).collect();
        let keys: Vec<i64> = self.records.iter().map(|r| r.entity_key).collect();
        let predictions: Vec<i64> = self.records.iter().map(|r| r.prediction).collect();
        let reports: Vec<&str> = self.records.iter().map(|r| r.json_report.as_str()).collect();

        let columns: Vec<Column> = vec![
            Series::new(JOB_ID_COLUMN.into(), job_ids).into(),
            Series::new(self.entity_key.as_str().into(), keys).into(),
            Series::new(self.target.as_str().into(), predictions).into(),
            Series::new(JSON_REPORT_COLUMN.into(), reports).into(),
        ];
        Ok(DataFrame::new(columns)?)
    }
}
