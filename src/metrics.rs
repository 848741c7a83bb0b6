//! Per-table extraction quality metrics.
//!
//! Each metric returns a [`MetricResult`]: `Ok(score)` with a score in `[0, 1]`,
//! or a [`MetricError`] saying why it could not be computed. [`QualityScoreSet::evaluate`]
//! turns errors into the documented sentinels and records them as degradations.

use crate::table::{CellKind, CellValue, ParsingReport, Tabular};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{error, warn};

pub const NUMERIC_VIOLATION_PENALTY: f64 = 0.8;
pub const UNKNOWN_WHITESPACE_SCORE: f64 = 0.5;
const COLUMN_COUNT_WEIGHT: f64 = 0.7;
const COLUMN_TYPE_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    #[error("table has no parsing report")]
    MissingParsingReport,
    #[error("parsing report has no `{0}` field")]
    MissingField(&'static str),
    #[error("parsing report field `{0}` is not a finite number")]
    NonFinite(&'static str),
    #[error("table has no cells")]
    EmptyTable,
}

pub type MetricResult = Result<f64, MetricError>;

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d*\.?\d+$").expect("static regex"))
}

pub(crate) fn is_numeric(v: &CellValue) -> bool {
    match v {
        CellValue::Int(_) => true,
        CellValue::Float(f) => f.is_finite(),
        CellValue::Text(s) => numeric_re().is_match(s.trim()),
        _ => false,
    }
}

fn report_field(
    report: Option<&ParsingReport>,
    name: &'static str,
    pick: fn(&ParsingReport) -> Option<f64>,
) -> MetricResult {
    let report = report.ok_or(MetricError::MissingParsingReport)?;
    let value = pick(report).ok_or(MetricError::MissingField(name))?;
    if !value.is_finite() {
        return Err(MetricError::NonFinite(name));
    }
    Ok(value.clamp(0.0, 100.0))
}

fn column<'a>(rows: &'a [Vec<CellValue>], idx: usize) -> impl Iterator<Item = &'a CellValue> {
    rows.iter().filter_map(move |r| r.get(idx))
}

/// Count of non-numeric, non-empty values sitting in mostly-numeric columns.
///
/// The first row is the header and never counts toward either side.
pub fn numeric_violations(rows: &[Vec<CellValue>]) -> usize {
    let body = rows.get(1..).unwrap_or_default();
    let width = body.iter().map(Vec::len).max().unwrap_or(0);
    let mut violations = 0;
    for idx in 0..width {
        let values: Vec<&CellValue> = column(body, idx).collect();
        if values.is_empty() {
            continue;
        }
        let numeric_or_empty = values
            .iter()
            .filter(|v| v.is_blank() || is_numeric(v))
            .count();
        if numeric_or_empty * 2 <= values.len() {
            continue;
        }
        violations += values
            .iter()
            .filter(|v| !v.is_blank() && !is_numeric(v))
            .count();
    }
    violations
}

/// Engine-reported accuracy, with a flat penalty if any numeric column holds text.
pub fn accuracy(report: Option<&ParsingReport>, rows: &[Vec<CellValue>]) -> MetricResult {
    let score = report_field(report, "accuracy", |r| r.accuracy)? / 100.0;
    if numeric_violations(rows) > 0 {
        return Ok(score * NUMERIC_VIOLATION_PENALTY);
    }
    Ok(score)
}

/// Share of cells that are neither null nor whitespace-only.
pub fn completeness(rows: &[Vec<CellValue>]) -> MetricResult {
    let total: usize = rows.iter().map(Vec::len).sum();
    if total == 0 {
        return Err(MetricError::EmptyTable);
    }
    let blank = rows.iter().flatten().filter(|c| c.is_blank()).count();
    Ok((1.0 - blank as f64 / total as f64).clamp(0.0, 1.0))
}

/// Column-count uniformity across rows (0.7) and value-type uniformity within columns (0.3).
pub fn consistency(rows: &[Vec<CellValue>]) -> MetricResult {
    let total: usize = rows.iter().map(Vec::len).sum();
    if total == 0 {
        return Err(MetricError::EmptyTable);
    }

    let mut len_counts: HashMap<usize, usize> = HashMap::new();
    for r in rows {
        *len_counts.entry(r.len()).or_insert(0) += 1;
    }
    let modal = len_counts.values().copied().max().unwrap_or(0);
    let count_score = modal as f64 / rows.len() as f64;

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut type_scores = Vec::new();
    if rows.len() >= 3 {
        for idx in 0..width {
            let kinds: Vec<CellKind> = column(rows, idx)
                .filter(|v| !v.is_blank())
                .map(CellValue::kind)
                .collect();
            if kinds.len() < 2 {
                continue;
            }
            let mut kind_counts: HashMap<CellKind, usize> = HashMap::new();
            for k in &kinds {
                *kind_counts.entry(*k).or_insert(0) += 1;
            }
            let dominant = kind_counts.values().copied().max().unwrap_or(0);
            type_scores.push(dominant as f64 / kinds.len() as f64);
        }
    }
    let type_score = if type_scores.is_empty() {
        1.0
    } else {
        type_scores.iter().sum::<f64>() / type_scores.len() as f64
    };

    Ok((COLUMN_COUNT_WEIGHT * count_score + COLUMN_TYPE_WEIGHT * type_score).clamp(0.0, 1.0))
}

/// Inverse of the engine-reported whitespace percentage.
pub fn whitespace(report: Option<&ParsingReport>) -> MetricResult {
    let ws = report_field(report, "whitespace", |r| r.whitespace)?;
    Ok((100.0 - ws) / 100.0)
}

/// Weights applied to the four metrics when folding them into a confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub accuracy: f64,
    pub completeness: f64,
    pub consistency: f64,
    pub whitespace: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.4,
            completeness: 0.3,
            consistency: 0.1,
            whitespace: 0.2,
        }
    }
}

impl QualityWeights {
    pub fn sum(&self) -> f64 {
        self.accuracy + self.completeness + self.consistency + self.whitespace
    }

    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() < 1e-6
            && [self.accuracy, self.completeness, self.consistency, self.whitespace]
                .iter()
                .all(|w| *w >= 0.0)
    }

    /// Weighted sum scaled to 0-100.
    pub fn confidence(&self, accuracy: f64, completeness: f64, consistency: f64, whitespace: f64) -> f64 {
        let weighted = self.accuracy * accuracy
            + self.completeness * completeness
            + self.consistency * consistency
            + self.whitespace * whitespace;
        (100.0 * weighted).clamp(0.0, 100.0)
    }
}

/// The four metric scores of one table plus the derived 0-100 confidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScoreSet {
    pub accuracy: f64,
    pub completeness: f64,
    pub consistency: f64,
    pub whitespace: f64,
    pub confidence: f64,
    /// Metrics that fell back to a sentinel, with the reason.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

impl QualityScoreSet {
    pub fn from_metrics(
        weights: &QualityWeights,
        accuracy: f64,
        completeness: f64,
        consistency: f64,
        whitespace: f64,
    ) -> Self {
        Self {
            accuracy,
            completeness,
            consistency,
            whitespace,
            confidence: weights.confidence(accuracy, completeness, consistency, whitespace),
            degraded: Vec::new(),
        }
    }

    /// All-zero score set, used when a report is corrupt rather than merely incomplete.
    pub fn failed(reason: String) -> Self {
        Self {
            degraded: vec![reason],
            ..Default::default()
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn evaluate<T: Tabular + ?Sized>(
        table: &T,
        report: Option<&ParsingReport>,
        weights: &QualityWeights,
    ) -> Self {
        let rows = table.rows();
        let mut degraded = Vec::new();

        let results = [
            ("accuracy", accuracy(report, rows)),
            ("completeness", completeness(rows)),
            ("consistency", consistency(rows)),
            ("whitespace", whitespace(report)),
        ];

        let mut scores = [0.0; 4];
        for (i, (name, res)) in results.into_iter().enumerate() {
            scores[i] = match res {
                Ok(v) => v,
                Err(e @ MetricError::NonFinite(_)) => {
                    error!("quality evaluation failed: {e}");
                    return Self::failed(format!("{name}: {e}"));
                }
                Err(e) => {
                    let fallback = match (name, &e) {
                        ("whitespace", MetricError::MissingParsingReport)
                        | ("whitespace", MetricError::MissingField(_)) => UNKNOWN_WHITESPACE_SCORE,
                        _ => 0.0,
                    };
                    warn!("{name} metric degraded to {fallback}: {e}");
                    degraded.push(format!("{name}: {e}"));
                    fallback
                }
            };
        }

        let mut set = Self::from_metrics(weights, scores[0], scores[1], scores[2], scores[3]);
        set.degraded = degraded;
        set
    }
}
