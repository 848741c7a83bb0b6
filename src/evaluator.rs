//! Quality evaluation and bounded parameter search for one page.

use crate::{
    cache::{CacheKey, Fingerprint, TableExtractionCache},
    config::{Hashing, Quality},
    engine::Extractor,
    metrics::QualityScoreSet,
    table::{BBox, ExtractedTable, ExtractionParams},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Search quality (0-1) at which the search stops trying further candidates.
pub const GOOD_ENOUGH_QUALITY: f64 = 0.9;

const LATTICE_LINE_SCALES: [u32; 3] = [15, 40, 80];
const STREAM_EDGE_TOLS: [u32; 3] = [500, 1000, 1500];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchState {
    Idle,
    Searching,
    FoundGoodEnough,
    Exhausted,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    FoundGoodEnough,
    Exhausted,
}

/// One parameter combination tried during a search.
#[derive(Debug, Clone)]
pub struct ExtractionAttempt {
    pub params: ExtractionParams,
    pub tables: Option<Vec<ExtractedTable>>,
    /// Mean table confidence scaled to 0-1.
    pub quality: f64,
    pub metrics: Vec<QualityScoreSet>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub params: ExtractionParams,
    pub quality: f64,
    pub table_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ExtractionAttempt> for AttemptSummary {
    fn from(a: &ExtractionAttempt) -> Self {
        Self {
            params: a.params.clone(),
            quality: a.quality,
            table_count: a.tables.as_ref().map_or(0, Vec::len),
            error: a.error.clone(),
        }
    }
}

/// The winning attempt of a search. `tables == None` means no usable table was found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub tables: Option<Vec<ExtractedTable>>,
    pub params: ExtractionParams,
    pub quality: f64,
    pub outcome: SearchOutcome,
    pub attempts: Vec<AttemptSummary>,
}

impl ExtractionResult {
    pub fn found(&self) -> bool {
        self.tables.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSetQuality {
    pub tables: Vec<QualityScoreSet>,
    pub average_confidence: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,
    pub meets_threshold: bool,
}

/// Cache store plus the settings that decide how searches are keyed and whether
/// the store is consulted at all.
pub struct SearchCache<'a> {
    pub store: &'a mut TableExtractionCache,
    pub hashing: &'a Hashing,
    pub enabled: bool,
}

pub struct TableQualityEvaluator {
    cfg: Quality,
    success_count: HashMap<String, u32>,
    state: SearchState,
}

impl TableQualityEvaluator {
    pub fn new(cfg: &Quality) -> Self {
        Self {
            cfg: cfg.clone(),
            success_count: HashMap::new(),
            state: SearchState::Idle,
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// How often `params` produced a new best result in this evaluator's lifetime.
    pub fn success_count(&self, params: &ExtractionParams) -> u32 {
        self.success_count.get(&params.key()).copied().unwrap_or(0)
    }

    pub fn evaluate_table(&self, table: &ExtractedTable) -> QualityScoreSet {
        QualityScoreSet::evaluate(table, table.parsing_report.as_ref(), &self.cfg.weights)
    }

    pub fn evaluate_tables(&self, tables: &[ExtractedTable]) -> TableSetQuality {
        let scores: Vec<QualityScoreSet> = tables.iter().map(|t| self.evaluate_table(t)).collect();
        let confidences: Vec<f64> = scores.iter().map(|s| s.confidence).collect();
        let average = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };
        TableSetQuality {
            average_confidence: average,
            min_confidence: confidences.iter().copied().fold(f64::NAN, f64::min).max(0.0),
            max_confidence: confidences.iter().copied().fold(0.0, f64::max),
            meets_threshold: !scores.is_empty() && average >= self.cfg.confidence_threshold,
            tables: scores,
        }
    }

    /// The fixed candidate grid: lattice line scales, then stream edge tolerances
    /// crossed with text splitting.
    pub fn candidate_params() -> Vec<ExtractionParams> {
        let mut out = Vec::new();
        for ls in LATTICE_LINE_SCALES {
            out.push(
                ExtractionParams::new()
                    .with("flavor", "lattice")
                    .with("line_scale", ls),
            );
        }
        for et in STREAM_EDGE_TOLS {
            for split in [true, false] {
                out.push(
                    ExtractionParams::new()
                        .with("flavor", "stream")
                        .with("edge_tol", et)
                        .with("split_text", split),
                );
            }
        }
        out
    }

    /// Candidates in the order they will be tried: historically successful first,
    /// grid order among ties, truncated to `max_search_iterations`.
    pub fn ordered_candidates(&self) -> Vec<ExtractionParams> {
        let mut candidates = Self::candidate_params();
        candidates.sort_by_key(|p| std::cmp::Reverse(self.success_count(p)));
        candidates.truncate(self.cfg.max_search_iterations);
        candidates
    }

    fn transition(&mut self, next: SearchState) {
        debug!("search state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn attempt(
        &self,
        extractor: &dyn Extractor,
        page: u32,
        filepath: &Path,
        params: ExtractionParams,
        bbox: Option<BBox>,
    ) -> ExtractionAttempt {
        let areas = bbox.map(|b| [b]);
        match extractor.extract(filepath, page, &params, areas.as_ref().map(|a| a.as_slice())) {
            Ok(tables) if !tables.is_empty() => {
                let metrics: Vec<QualityScoreSet> =
                    tables.iter().map(|t| self.evaluate_table(t)).collect();
                let quality = metrics.iter().map(|m| m.confidence).sum::<f64>()
                    / metrics.len() as f64
                    / 100.0;
                ExtractionAttempt {
                    params,
                    tables: Some(tables),
                    quality,
                    metrics,
                    error: None,
                }
            }
            Ok(_) => ExtractionAttempt {
                params,
                tables: None,
                quality: 0.0,
                metrics: Vec::new(),
                error: None,
            },
            Err(e) => {
                warn!("extraction attempt failed page={page} params={params}: {e:#}");
                ExtractionAttempt {
                    params,
                    tables: None,
                    quality: 0.0,
                    metrics: Vec::new(),
                    error: Some(format!("{e:#}")),
                }
            }
        }
    }

    /// Try candidate parameter sets in order and keep the best-scoring extraction.
    ///
    /// Failed or empty attempts are skipped. Stops early once an attempt reaches
    /// [`GOOD_ENOUGH_QUALITY`].
    pub fn find_best_table_extraction(
        &mut self,
        extractor: &dyn Extractor,
        page: u32,
        filepath: &Path,
        bbox: Option<BBox>,
    ) -> ExtractionResult {
        let candidates = self.ordered_candidates();
        self.transition(SearchState::Searching);

        let mut best: Option<ExtractionAttempt> = None;
        let mut best_quality = 0.0;
        let mut attempts = Vec::with_capacity(candidates.len());
        let mut outcome = SearchOutcome::Exhausted;

        for params in candidates {
            let attempt = self.attempt(extractor, page, filepath, params, bbox);
            attempts.push(AttemptSummary::from(&attempt));
            debug!(
                "attempt page={page} params={} quality={:.3}",
                attempt.params, attempt.quality
            );
            let current_quality = attempt.quality;

            if attempt.tables.is_some() && current_quality > best_quality {
                best_quality = current_quality;
                *self.success_count.entry(attempt.params.key()).or_insert(0) += 1;
                best = Some(attempt);
            }

            if current_quality >= GOOD_ENOUGH_QUALITY {
                outcome = SearchOutcome::FoundGoodEnough;
                break;
            }
        }

        self.transition(match outcome {
            SearchOutcome::FoundGoodEnough => SearchState::FoundGoodEnough,
            SearchOutcome::Exhausted => SearchState::Exhausted,
        });

        let result = match best {
            Some(b) => {
                info!(
                    "best extraction page={page} params={} quality={:.3} tries={}",
                    b.params,
                    b.quality,
                    attempts.len()
                );
                ExtractionResult {
                    tables: b.tables,
                    params: b.params,
                    quality: b.quality,
                    outcome,
                    attempts,
                }
            }
            None => {
                warn!("no usable table found page={page} tries={}", attempts.len());
                ExtractionResult {
                    tables: None,
                    params: ExtractionParams::new(),
                    quality: 0.0,
                    outcome,
                    attempts,
                }
            }
        };

        self.transition(SearchState::Done);
        result
    }

    /// [`Self::find_best_table_extraction`] served through `cache`, keyed on
    /// `(page, filepath, bbox)` and the file's fingerprint.
    pub fn find_best_cached(
        &mut self,
        cache: SearchCache<'_>,
        extractor: &dyn Extractor,
        page: u32,
        filepath: &Path,
        bbox: Option<BBox>,
    ) -> ExtractionResult {
        let key = Fingerprint::of_path(cache.hashing, filepath).and_then(|fp| {
            CacheKey::new(
                "find_best_table_extraction",
                &(page, filepath.display().to_string(), bbox),
                Some(&fp),
            )
        });
        match key {
            Ok(key) => cache.store.cached(&key, cache.enabled, || {
                self.find_best_table_extraction(extractor, page, filepath, bbox)
            }),
            Err(e) => {
                warn!("cache key unavailable, searching uncached: {e:#}");
                self.find_best_table_extraction(extractor, page, filepath, bbox)
            }
        }
    }
}
