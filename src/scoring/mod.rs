//! Scoring stage
//!
//! Applies a published model and scaling transform to a dataset and replaces
//! the predictions table with one row per scored entity.

mod records;
mod stage;

pub use records::{PredictionRecord, PredictionRecordSet, JOB_ID_COLUMN, JSON_REPORT_COLUMN};
pub use stage::{ScoringStage, ScoringSummary};
