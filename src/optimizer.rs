//! Exhaustive, priority-weighted search over an extraction parameter grid.
//!
//! Unlike the evaluator's bounded search this tries every combination and only
//! reports which parameters won; re-extracting with them is up to the caller.

use crate::{
    config::Optimizer,
    engine::Extractor,
    metrics,
    table::{ExtractedTable, ExtractionParams, Tabular},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerMetric {
    Accuracy,
    Completeness,
    Structure,
    Speed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerMetrics {
    pub accuracy: f64,
    pub completeness: f64,
    pub structure: f64,
    pub speed: f64,
}

impl OptimizerMetrics {
    pub fn get(&self, metric: OptimizerMetric) -> f64 {
        match metric {
            OptimizerMetric::Accuracy => self.accuracy,
            OptimizerMetric::Completeness => self.completeness,
            OptimizerMetric::Structure => self.structure,
            OptimizerMetric::Speed => self.speed,
        }
    }

    /// Mean per-table metrics for one extraction that took `elapsed`.
    pub fn measure(tables: &[ExtractedTable], elapsed: Duration) -> Self {
        let n = tables.len().max(1) as f64;
        let mut out = Self {
            speed: speed_score(elapsed.as_secs_f64()),
            ..Default::default()
        };
        for t in tables {
            out.accuracy += metrics::accuracy(t.parsing_report.as_ref(), t.rows()).unwrap_or(0.0);
            out.completeness += metrics::completeness(t.rows()).unwrap_or(0.0);
            out.structure += structure_score(t.rows());
        }
        out.accuracy /= n;
        out.completeness /= n;
        out.structure /= n;
        out
    }
}

/// `1 / (1 + variance(row lengths))`; ragged grids score lower.
pub fn structure_score<T>(rows: &[Vec<T>]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let n = rows.len() as f64;
    let mean = rows.iter().map(|r| r.len() as f64).sum::<f64>() / n;
    let variance = rows
        .iter()
        .map(|r| (r.len() as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    1.0 / (1.0 + variance)
}

pub fn speed_score(execution_seconds: f64) -> f64 {
    1.0 / (1.0 + execution_seconds.max(0.0))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredParams {
    pub params: ExtractionParams,
    pub metrics: OptimizerMetrics,
    pub score: f64,
    pub execution_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub best_params: ExtractionParams,
    pub best_score: f64,
    /// Every combination that produced tables, best first.
    pub ranked: Vec<ScoredParams>,
    pub skipped: usize,
    pub budget_exhausted: bool,
}

pub struct TableOptimizer {
    cfg: Optimizer,
}

impl TableOptimizer {
    pub fn new(cfg: &Optimizer) -> Self {
        Self { cfg: cfg.clone() }
    }

    /// Full Cartesian product of the parameter space. Keys iterate in sorted order,
    /// the last key varying fastest.
    pub fn param_grid(&self) -> Vec<ExtractionParams> {
        let mut grid = vec![ExtractionParams::new()];
        for (name, values) in &self.cfg.param_space {
            let mut next = Vec::with_capacity(grid.len() * values.len());
            for partial in &grid {
                for v in values {
                    next.push(partial.clone().with(name, v.clone()));
                }
            }
            grid = next;
        }
        if self.cfg.param_space.is_empty() {
            return Vec::new();
        }
        grid
    }

    /// Harmonic priority weighting: the metric at rank `i` weighs `1 / (i + 1)`.
    pub fn calculate_score(&self, metrics: &OptimizerMetrics) -> f64 {
        self.cfg
            .priorities
            .iter()
            .enumerate()
            .map(|(rank, m)| metrics.get(*m) / (rank as f64 + 1.0))
            .sum()
    }

    pub fn search(
        &self,
        extractor: &dyn Extractor,
        filepath: &Path,
        page: u32,
    ) -> Option<OptimizationResult> {
        let grid = self.param_grid();
        let budget = Duration::from_secs(self.cfg.time_budget_seconds);
        let started = Instant::now();
        let mut ranked = Vec::new();
        let mut skipped = 0;
        let mut budget_exhausted = false;

        info!("optimizer page={page} combinations={}", grid.len());

        for params in grid {
            if self.cfg.time_budget_seconds > 0 && started.elapsed() > budget {
                warn!(
                    "optimizer time budget exceeded ({}s); keeping best so far",
                    self.cfg.time_budget_seconds
                );
                budget_exhausted = true;
                break;
            }

            let t0 = Instant::now();
            let tables = match extractor.extract(filepath, page, &params, None) {
                Ok(tables) if !tables.is_empty() => tables,
                Ok(_) => {
                    debug!("optimizer params={params} produced no tables");
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("optimizer params={params} failed: {e:#}");
                    skipped += 1;
                    continue;
                }
            };
            let elapsed = t0.elapsed();
            let metrics = OptimizerMetrics::measure(&tables, elapsed);
            let score = self.calculate_score(&metrics);
            debug!("optimizer params={params} score={score:.4}");
            ranked.push(ScoredParams {
                params,
                metrics,
                score,
                execution_seconds: elapsed.as_secs_f64(),
            });
        }

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        let best = ranked.first()?;
        info!(
            "optimizer best params={} score={:.4}",
            best.params, best.score
        );
        Some(OptimizationResult {
            best_params: best.params.clone(),
            best_score: best.score,
            ranked,
            skipped,
            budget_exhausted,
        })
    }

    /// The single best parameter set, or `None` if no combination produced a table.
    pub fn optimize(
        &self,
        extractor: &dyn Extractor,
        filepath: &Path,
        page: u32,
    ) -> Option<ExtractionParams> {
        self.search(extractor, filepath, page).map(|r| r.best_params)
    }
}
