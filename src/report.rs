use crate::{
    cache::CacheStats,
    evaluator::{ExtractionResult, TableSetQuality},
    merge::TableAnalysis,
    optimizer::OptimizationResult,
    table::BBox,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ScoreReport {
    pub generated_at: String,
    pub input: String,
    pub quality: TableSetQuality,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub generated_at: String,
    pub input: String,
    pub page: u32,
    pub bbox: Option<BBox>,
    pub cache_enabled: bool,
    pub result: ExtractionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizeReport {
    pub generated_at: String,
    pub input: String,
    pub page: u32,
    pub result: Option<OptimizationResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub generated_at: String,
    pub input: String,
    pub advisor: String,
    pub analyses: Vec<TableAnalysis>,
    pub merge_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub generated_at: String,
    pub action: String,
    pub stats: CacheStats,
}

/// Diagnostic for `doctor`, also covering the LLM executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReport {
    pub extraction: serde_json::Value,
    pub claude_path: String,
    pub claude_found: bool,
    pub config_hash: String,
}
