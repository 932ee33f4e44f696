//! In-process AutoML engine
//!
//! Trains a seeded plan of GLM, GBM and DRF candidates on a training split,
//! stacks them into ensembles on a blending split, and ranks everything by
//! log loss on a third split none of the models has seen.

use super::drf::{DrfBody, DrfParams};
use super::ensemble::EnsembleBody;
use super::gbm::{GbmBody, GbmParams};
use super::glm::{GlmBody, GlmParams};
use super::leaderboard::{Leaderboard, LeaderboardEntry, ModelMetrics};
use super::portable::{ModelBody, PortableModel};
use super::{
    Algorithm, AutoMlEngine, CandidateModel, ExportedArtifact, FeatureImportance, ImportanceResult,
    SearchSpec,
};
use crate::data::{class_levels, feature_matrix, numeric_values};
use crate::error::{LifecycleError, Result};
use ndarray::{Array2, Axis};
use polars::prelude::*;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Smallest frame the engine can split three ways
const MIN_ROWS: usize = 4;

/// Candidate produced by [`LocalAutoMl`]
#[derive(Debug, Clone)]
pub struct LocalCandidate {
    model: PortableModel,
    raw_importance: Option<Vec<f64>>,
}

impl CandidateModel for LocalCandidate {
    fn model_id(&self) -> &str {
        &self.model.model_id
    }

    fn algorithm(&self) -> Algorithm {
        self.model.algorithm
    }

    fn feature_importance(&self) -> ImportanceResult {
        match &self.raw_importance {
            Some(raw) => ImportanceResult::Supported(FeatureImportance::from_raw(&self.model.features, raw)),
            None => ImportanceResult::Unsupported {
                reason: format!("{} models do not expose variable importance", self.model.algorithm),
            },
        }
    }

    fn export(&self, dir: &Path, with_generator: bool) -> Result<ExportedArtifact> {
        let model_path = self
            .model
            .write(dir)
            .map_err(|e| LifecycleError::Artifact(format!("export of {} failed: {}", self.model.model_id, e)))?;
        let generator_path = if with_generator {
            Some(self.model.write_generator(dir)?)
        } else {
            None
        };
        Ok(ExportedArtifact {
            model_path,
            generator_path,
        })
    }
}

#[derive(Debug, Clone)]
enum PlanStep {
    Glm(GlmParams),
    Gbm(GbmParams),
    Drf(DrfParams),
}

impl PlanStep {
    fn algorithm(&self) -> Algorithm {
        match self {
            PlanStep::Glm(_) => Algorithm::Glm,
            PlanStep::Gbm(_) => Algorithm::Gbm,
            PlanStep::Drf(_) => Algorithm::Drf,
        }
    }
}

/// Row positions of the three splits
struct Splits {
    train: Vec<usize>,
    blend: Vec<usize>,
    rank: Vec<usize>,
}

/// Prepared numeric problem
struct Problem {
    features: Vec<String>,
    imputation: Vec<f64>,
    levels: Vec<String>,
    x: Array2<f64>,
    y: Vec<usize>,
}

impl Problem {
    fn subset(&self, rows: &[usize]) -> (Array2<f64>, Vec<usize>) {
        (self.x.select(Axis(0), rows), rows.iter().map(|&i| self.y[i]).collect())
    }
}

/// Local AutoML engine
#[derive(Debug, Clone, Default)]
pub struct LocalAutoMl {
    /// Overrides the number of trees of every tree-based candidate
    ntrees: Option<usize>,
}

impl LocalAutoMl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ntrees(mut self, ntrees: usize) -> Self {
        self.ntrees = Some(ntrees.max(1));
        self
    }

    /// Candidate plan for a search, after exclusions and the model bound
    fn plan(&self, spec: &SearchSpec) -> Vec<(String, PlanStep)> {
        let seed = spec.seed;
        let gbm = |max_depth: usize, min_rows: usize, offset: u64| GbmParams {
            max_depth,
            min_rows,
            seed: seed.wrapping_add(offset),
            ..GbmParams::default()
        };

        let mut steps = vec![
            ("GLM_1".to_string(), PlanStep::Glm(GlmParams::default())),
            ("GBM_1".to_string(), PlanStep::Gbm(gbm(6, 1, 1))),
            (
                "DRF_1".to_string(),
                PlanStep::Drf(DrfParams {
                    seed: seed.wrapping_add(2),
                    ..DrfParams::default()
                }),
            ),
            ("GBM_2".to_string(), PlanStep::Gbm(gbm(7, 10, 3))),
            ("GBM_3".to_string(), PlanStep::Gbm(gbm(8, 10, 4))),
            (
                "DRF_2".to_string(),
                PlanStep::Drf(DrfParams {
                    max_depth: 20,
                    mtries: Some(1),
                    seed: seed.wrapping_add(5),
                    ..DrfParams::default()
                }),
            ),
            ("GBM_4".to_string(), PlanStep::Gbm(gbm(10, 10, 6))),
            (
                "GLM_2".to_string(),
                PlanStep::Glm(GlmParams {
                    lambda: 1e-2,
                    ..GlmParams::default()
                }),
            ),
        ];
        steps.retain(|(_, step)| spec.allows(step.algorithm()));

        // Random GBM grid fills the remaining budget
        if spec.allows(Algorithm::Gbm) && steps.len() < spec.max_models {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
            let remaining = spec.max_models - steps.len();
            for i in 1..=remaining {
                let params = GbmParams {
                    ntrees: rng.gen_range(30..=80),
                    max_depth: rng.gen_range(3..=10),
                    min_rows: *[1usize, 5, 10].choose(&mut rng).unwrap_or(&5),
                    learn_rate: *[0.05, 0.1, 0.2].choose(&mut rng).unwrap_or(&0.1),
                    sample_rate: rng.gen_range(0.6..=1.0),
                    col_sample_rate: rng.gen_range(0.4..=1.0),
                    seed: seed.wrapping_add(100 + i as u64),
                };
                steps.push((format!("GBM_grid_1_model_{}", i), PlanStep::Gbm(params)));
            }
        }

        steps.truncate(spec.max_models);

        for (_, step) in steps.iter_mut() {
            if let Some(ntrees) = self.ntrees {
                match step {
                    PlanStep::Gbm(p) => p.ntrees = ntrees,
                    PlanStep::Drf(p) => p.ntrees = ntrees,
                    PlanStep::Glm(_) => {}
                }
            }
        }

        steps
            .into_iter()
            .map(|(name, step)| (model_id(&name, seed), step))
            .collect()
    }

    fn prepare(&self, frame: &DataFrame, spec: &SearchSpec) -> Result<Problem> {
        let target = frame
            .column(&spec.target)
            .map_err(|_| LifecycleError::Engine(format!("response column '{}' not found", spec.target)))?
            .as_materialized_series();
        if target.dtype() != &DataType::String {
            return Err(LifecycleError::Engine(format!(
                "response column '{}' must be categorical, found {}",
                spec.target,
                target.dtype()
            )));
        }

        // Rows without a response take no part in the search
        let frame = frame.filter(&target.is_not_null())?;
        let target = frame.column(&spec.target)?.as_materialized_series();

        let levels = class_levels(target)?;
        if levels.len() < 2 {
            return Err(LifecycleError::Engine(format!(
                "response column '{}' has {} level(s), need at least 2",
                spec.target,
                levels.len()
            )));
        }
        if frame.height() < MIN_ROWS {
            return Err(LifecycleError::Engine(format!(
                "{} rows with a response, need at least {}",
                frame.height(),
                MIN_ROWS
            )));
        }

        let index: HashMap<&str, usize> = levels.iter().enumerate().map(|(k, l)| (l.as_str(), k)).collect();
        let y: Vec<usize> = target
            .str()
            .map_err(|e| LifecycleError::Engine(e.to_string()))?
            .into_iter()
            .map(|v| v.and_then(|l| index.get(l).copied()).unwrap_or(0))
            .collect();

        let imputation = spec
            .features
            .iter()
            .map(|name| {
                let values = numeric_values(&frame, name).map_err(|e| LifecycleError::Engine(e.to_string()))?;
                let present: Vec<f64> = values.into_iter().flatten().filter(|v| v.is_finite()).collect();
                Ok(if present.is_empty() {
                    0.0
                } else {
                    present.iter().sum::<f64>() / present.len() as f64
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        let x = feature_matrix(&frame, &spec.features, &imputation)?;

        Ok(Problem {
            features: spec.features.clone(),
            imputation,
            levels,
            x,
            y,
        })
    }

    fn wrap(&self, problem: &Problem, spec: &SearchSpec, id: String, algorithm: Algorithm, body: ModelBody) -> PortableModel {
        PortableModel::new(
            id,
            algorithm,
            problem.features.clone(),
            problem.imputation.clone(),
            spec.target.clone(),
            problem.levels.clone(),
            body,
        )
    }
}

impl AutoMlEngine for LocalAutoMl {
    fn search(&self, frame: &DataFrame, spec: &SearchSpec) -> Result<Leaderboard> {
        if spec.max_models == 0 {
            return Err(LifecycleError::Engine("max_models must be positive".into()));
        }
        let start = Instant::now();
        let problem = self.prepare(frame, spec)?;
        let n_classes = problem.levels.len();
        let splits = split_rows(problem.y.len(), spec.validation_fraction, spec.seed);

        let plan = self.plan(spec);
        info!(
            planned = plan.len(),
            train_rows = splits.train.len(),
            levels = n_classes,
            "AutoML search started"
        );

        let (x_train, y_train) = problem.subset(&splits.train);
        let (x_blend, y_blend) = problem.subset(&splits.blend);
        let (x_rank, y_rank) = problem.subset(&splits.rank);

        let mut bases: Vec<(LocalCandidate, ModelMetrics)> = Vec::with_capacity(plan.len());
        for (id, step) in plan {
            let algorithm = step.algorithm();
            let (body, importance) = match step {
                PlanStep::Glm(params) => {
                    let glm = GlmBody::fit(&x_train, &y_train, n_classes, &params);
                    let magnitudes = glm.coefficient_magnitudes();
                    (ModelBody::Glm(glm), magnitudes)
                }
                PlanStep::Gbm(params) => {
                    let (gbm, gains) = GbmBody::fit(&x_train, &y_train, n_classes, &params);
                    (ModelBody::Gbm(gbm), gains)
                }
                PlanStep::Drf(params) => {
                    let (drf, gains) = DrfBody::fit(&x_train, &y_train, n_classes, &params);
                    (ModelBody::Drf(drf), gains)
                }
            };

            let metrics = ModelMetrics::from_probabilities(&body.predict_proba(&x_rank), &y_rank);
            debug!(model_id = %id, logloss = metrics.logloss, "Candidate trained");

            let model = self.wrap(&problem, spec, id, algorithm, body);
            bases.push((
                LocalCandidate {
                    model,
                    raw_importance: Some(importance),
                },
                metrics,
            ));
        }

        let mut entries: Vec<LeaderboardEntry> = Vec::new();

        if bases.len() >= 2 && spec.allows(Algorithm::StackedEnsemble) {
            let all: Vec<ModelBody> = bases.iter().map(|(c, _)| c.model.body.clone()).collect();

            let mut best: Vec<(Algorithm, f64, ModelBody)> = Vec::new();
            for (candidate, metrics) in &bases {
                let algorithm = candidate.model.algorithm;
                match best.iter_mut().find(|(a, _, _)| *a == algorithm) {
                    Some(slot) if metrics.logloss < slot.1 => {
                        *slot = (algorithm, metrics.logloss, candidate.model.body.clone());
                    }
                    Some(_) => {}
                    None => best.push((algorithm, metrics.logloss, candidate.model.body.clone())),
                }
            }
            let best_of_family: Vec<ModelBody> = best.into_iter().map(|(_, _, body)| body).collect();

            for (name, members) in [("StackedEnsemble_AllModels", all), ("StackedEnsemble_BestOfFamily", best_of_family)] {
                let ensemble = EnsembleBody::fit(members, &x_blend, &y_blend, n_classes);
                let body = ModelBody::Ensemble(ensemble);
                let metrics = ModelMetrics::from_probabilities(&body.predict_proba(&x_rank), &y_rank);
                let id = model_id(name, spec.seed);
                debug!(model_id = %id, logloss = metrics.logloss, "Ensemble trained");

                let model = self.wrap(&problem, spec, id, Algorithm::StackedEnsemble, body);
                entries.push(LeaderboardEntry {
                    model: Box::new(LocalCandidate {
                        model,
                        raw_importance: None,
                    }),
                    metrics,
                });
            }
        }

        entries.extend(bases.into_iter().map(|(candidate, metrics)| LeaderboardEntry {
            model: Box::new(candidate) as Box<dyn CandidateModel>,
            metrics,
        }));

        let leaderboard = Leaderboard::new(entries);
        info!(
            models = leaderboard.len(),
            leader = leaderboard.leader().map(|m| m.model_id()).unwrap_or_default(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "AutoML search finished"
        );
        Ok(leaderboard)
    }
}

fn model_id(name: &str, seed: u64) -> String {
    match name.strip_prefix("GBM_grid_1_") {
        Some(rest) => format!("GBM_grid_1_AutoML_{}_{}", seed, rest),
        None => format!("{}_AutoML_{}", name, seed),
    }
}

/// Seeded three-way split; blend and rank share the holdout fraction evenly
fn split_rows(n: usize, fraction: f64, seed: u64) -> Splits {
    let mut rows: Vec<usize> = (0..n).collect();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    rows.shuffle(&mut rng);

    let holdout = ((n as f64 * fraction).round() as usize).clamp(2, n.saturating_sub(2).max(2));
    let blend_len = holdout / 2;

    let rank = rows.split_off(n - (holdout - blend_len));
    let blend = rows.split_off(rows.len() - blend_len);
    let mut train = rows;
    train.sort_unstable();

    Splits { train, blend, rank }
}
