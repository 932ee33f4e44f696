//! Command-line interface
//!
//! Runs the training and scoring stages against the local warehouse and
//! artifact store, plus the housekeeping commands a local setup needs.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::automl::{LocalAutoMl, PortableModel};
use crate::config::RuntimeConfig;
use crate::context::{ExecutionContext, ModelVersion, StageOptions, TableRef};
use crate::data::{DataAccess, LocalWarehouse};
use crate::preprocessing::{ScaleTransform, ScalerType};
use crate::scoring::ScoringStage;
use crate::stats::plots::FsPlotSink;
use crate::stats::JsonStatsReporter;
use crate::store::FsArtifactStore;
use crate::training::TrainingStage;

fn dim(s: &str) -> ColoredString {
    s.truecolor(100, 100, 100)
}

fn muted(s: &str) -> ColoredString {
    s.truecolor(140, 140, 140)
}

fn ok(s: &str) -> ColoredString {
    s.truecolor(100, 210, 120)
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

#[derive(Parser)]
#[command(name = "modelops")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Training and scoring lifecycle stages for AutoML models")]
#[command(long_about = None)]
pub struct Cli {
    /// Runtime configuration file (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the training stage
    Train {
        /// Execution context document (JSON)
        #[arg(short, long)]
        context: PathBuf,

        /// Skip the generator support file
        #[arg(long)]
        no_generator: bool,
    },

    /// Run the scoring stage
    Score {
        /// Execution context document (JSON)
        #[arg(short, long)]
        context: PathBuf,
    },

    /// Publish a trained model and a fitted scaler under a model version
    Publish {
        /// Exported model file (model.h2o)
        #[arg(short, long)]
        artifact: PathBuf,

        /// Model version to publish under
        #[arg(short, long)]
        version: String,

        /// Query whose rows the scaler is fitted on
        #[arg(long)]
        scaler_query: String,

        /// Scaler type (standard, minmax, maxabs, none)
        #[arg(long, default_value = "standard")]
        scaler_type: String,
    },

    /// Load a CSV file into a warehouse table
    Import {
        /// CSV file with a header row
        #[arg(long)]
        csv: PathBuf,

        /// Destination table, `database.table` or a bare table name
        #[arg(short, long)]
        table: String,
    },

    /// Show the shape of a query result
    Info {
        /// Query to resolve
        #[arg(short, long)]
        query: String,
    },
}

fn open_warehouse(config: &RuntimeConfig) -> anyhow::Result<LocalWarehouse> {
    Ok(LocalWarehouse::open(&config.warehouse_root, &config.default_database)?)
}

fn parse_table(name: &str, default_database: &str) -> anyhow::Result<TableRef> {
    let table = match name.split_once('.') {
        Some((db, table)) => TableRef::new(db, table),
        None => TableRef::new(default_database, name),
    };
    if table.database.is_empty() || table.table.is_empty() {
        anyhow::bail!("Invalid table name: {}", name);
    }
    Ok(table)
}

pub fn cmd_train(config: &RuntimeConfig, context: &Path, no_generator: bool) -> anyhow::Result<()> {
    section("Train");
    let start = Instant::now();

    let ctx = ExecutionContext::from_file(context)?;
    let warehouse = open_warehouse(config)?;
    let engine = LocalAutoMl::new();
    let options = StageOptions::new().with("export_generator", !no_generator);

    let summary = TrainingStage::new(&warehouse, &engine, &FsPlotSink, &JsonStatsReporter::new())
        .train(&ctx, &options)?;

    step_ok(&format!("Selected {} ({})", summary.model_id, summary.algorithm));
    if summary.pre_existing {
        println!(
            "  {} {}",
            "!".yellow(),
            muted("model.h2o already existed and was left untouched")
        );
    }
    println!("  {:<12} {}", muted("Artifact"), summary.artifact_path.display());
    println!("  {:<12} {}", muted("Models"), summary.leaderboard_size);
    for (feature, value) in summary.feature_importance.ranked().into_iter().take(10) {
        println!("  {:<20} {:.4}", feature, value);
    }
    println!("  {:<12} {:.2}s", muted("Elapsed"), start.elapsed().as_secs_f64());
    println!();
    Ok(())
}

pub fn cmd_score(config: &RuntimeConfig, context: &Path) -> anyhow::Result<()> {
    section("Score");
    let start = Instant::now();

    let ctx = ExecutionContext::from_file(context)?;
    let warehouse = open_warehouse(config)?;
    let store = FsArtifactStore::new(&config.store_root);

    let summary = ScoringStage::new(&warehouse, &store, &JsonStatsReporter::new())
        .with_alignment(config.identity_alignment)
        .score(&ctx, &StageOptions::new())?;

    step_ok(&format!("Wrote {} predictions to {}", summary.rows_written, summary.destination));
    println!("  {:<12} {:.2}s", muted("Elapsed"), start.elapsed().as_secs_f64());
    println!();
    Ok(())
}

pub fn cmd_publish(
    config: &RuntimeConfig,
    artifact: &Path,
    version: &str,
    scaler_query: &str,
    scaler_type: &str,
) -> anyhow::Result<()> {
    section("Publish");

    let version = ModelVersion::new(version);
    let store = FsArtifactStore::new(&config.store_root);
    let model = PortableModel::read(artifact)?;

    let warehouse = open_warehouse(config)?;
    let frame = warehouse.resolve(scaler_query)?;
    let features: Vec<&str> = model.features.iter().map(String::as_str).collect();
    let mut scaler = ScaleTransform::new(scaler_type.parse::<ScalerType>()?);
    scaler.fit(&frame, &features)?;

    let model_path = store.publish_model(artifact, &version)?;
    step_ok(&format!("Model {} -> {}", model.model_id, model_path.display()));
    let scaler_path = store.publish_scaler(&scaler, &version)?;
    step_ok(&format!("Scaler ({} columns) -> {}", features.len(), scaler_path.display()));
    println!();
    Ok(())
}

pub fn cmd_import(config: &RuntimeConfig, csv: &Path, table: &str) -> anyhow::Result<()> {
    section("Import");
    let warehouse = open_warehouse(config)?;
    let table = parse_table(table, &config.default_database)?;
    let rows = warehouse.import_csv(csv, &table)?;
    step_ok(&format!("{} rows -> {}", rows, table));
    println!();
    Ok(())
}

pub fn cmd_info(config: &RuntimeConfig, query: &str) -> anyhow::Result<()> {
    section("Query Info");

    let df = open_warehouse(config)?.resolve(query)?;

    println!("  {:<12} {}", muted("Rows"), df.height());
    println!("  {:<12} {}", muted("Columns"), df.width());
    println!();

    println!("  {:<20} {:<12} {:>6}", muted("Column"), muted("Type"), muted("Nulls"));
    println!("  {}", dim(&"─".repeat(42)));

    for col in df.get_columns() {
        println!(
            "  {:<20} {:<12} {:>6}",
            col.name(),
            format!("{}", col.dtype()).truecolor(140, 140, 140),
            col.null_count()
        );
    }

    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table() {
        let t = parse_table("demo.features", "modelops").unwrap();
        assert_eq!(t, TableRef::new("demo", "features"));
        let t = parse_table("features", "modelops").unwrap();
        assert_eq!(t.database, "modelops");
        assert!(parse_table(".x", "modelops").is_err());
    }

    #[test]
    fn test_cli_parses_train() {
        let cli = Cli::try_parse_from(["modelops", "train", "--context", "ctx.json", "--no-generator"]).unwrap();
        match cli.command {
            Commands::Train { context, no_generator } => {
                assert_eq!(context, PathBuf::from("ctx.json"));
                assert!(no_generator);
            }
            _ => panic!("expected train"),
        }
    }
}
