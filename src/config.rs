use crate::{metrics::QualityWeights, optimizer::OptimizerMetric, util::expand_tilde};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub hashing: Hashing,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub optimizer: Optimizer,
    #[serde(default)]
    pub merge: Merge,
    #[serde(default)]
    pub llm: Llm,
    #[serde(default)]
    pub extraction: Extraction,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.quality.weights.is_normalized() {
            bail!(
                "quality.weights must be non-negative and sum to 1.0 (got {})",
                self.quality.weights.sum()
            );
        }
        if self.quality.confidence_threshold < 0.0 || self.quality.confidence_threshold > 100.0 {
            bail!(
                "quality.confidence_threshold must be within 0..=100: {}",
                self.quality.confidence_threshold
            );
        }
        if self.cache.max_size == 0 {
            bail!("cache.max_size must be at least 1");
        }
        if self.optimizer.param_space.values().any(Vec::is_empty) {
            bail!("optimizer.param_space has a parameter with no candidate values");
        }
        for (name, t) in [
            ("merge.same_page_threshold", self.merge.same_page_threshold),
            ("merge.cross_page_threshold", self.merge.cross_page_threshold),
            ("merge.sequence_threshold", self.merge.sequence_threshold),
            (
                "merge.table_merge_confidence_threshold",
                self.merge.table_merge_confidence_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&t) {
                bail!("{name} must be within 0..=1: {t}");
            }
        }
        Ok(())
    }

    /// A stable, normalization-friendly string for hashing.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Hashing {
    /// `mtime`, `fast_2x16mb` or `full_sha256`.
    pub mode: String,
    pub fast_window_bytes: u64,
}
impl Default for Hashing {
    fn default() -> Self {
        Self {
            mode: "mtime".into(),
            fast_window_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Cache {
    pub enabled: bool,
    /// Empty means `~/.marker/cache/tables`, or a temp-dir path when HOME is unset.
    pub dir: String,
    pub max_size: usize,
}
impl Default for Cache {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "".into(),
            max_size: 100,
        }
    }
}

impl Cache {
    pub fn resolved_dir(&self) -> PathBuf {
        if !self.dir.is_empty() {
            return expand_tilde(&self.dir);
        }
        match std::env::var("HOME") {
            Ok(home) if !home.is_empty() => PathBuf::from(home).join(".marker/cache/tables"),
            _ => std::env::temp_dir().join("marker-cache").join("tables"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Quality {
    pub confidence_threshold: f64,
    pub max_search_iterations: usize,
    #[serde(default)]
    pub weights: QualityWeights,
}
impl Default for Quality {
    fn default() -> Self {
        Self {
            confidence_threshold: 60.0,
            max_search_iterations: 10,
            weights: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Optimizer {
    pub param_space: BTreeMap<String, Vec<serde_json::Value>>,
    pub priorities: Vec<OptimizerMetric>,
    /// 0 disables the budget.
    pub time_budget_seconds: u64,
}
impl Default for Optimizer {
    fn default() -> Self {
        let mut param_space = BTreeMap::new();
        param_space.insert("flavor".into(), vec!["lattice".into(), "stream".into()]);
        param_space.insert("line_scale".into(), vec![15.into(), 40.into(), 80.into()]);
        param_space.insert("split_text".into(), vec![false.into(), true.into()]);
        Self {
            param_space,
            priorities: vec![
                OptimizerMetric::Accuracy,
                OptimizerMetric::Completeness,
                OptimizerMetric::Structure,
                OptimizerMetric::Speed,
            ],
            time_budget_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Merge {
    pub use_llm: bool,
    pub same_page_threshold: f64,
    pub cross_page_threshold: f64,
    pub sequence_threshold: f64,
    pub min_tables_for_claude_analysis: usize,
    pub table_merge_confidence_threshold: f64,
    /// Largest vertical gap (page units) between two same-page tables still considered adjacent.
    pub max_vertical_gap: f64,
    /// Minimum horizontal overlap, as a share of the narrower table's width.
    pub min_horizontal_overlap: f64,
    /// Share of the page height counted as "near the edge" for cross-page pairs.
    pub page_edge_fraction: f64,
}
impl Default for Merge {
    fn default() -> Self {
        Self {
            use_llm: false,
            same_page_threshold: 0.7,
            cross_page_threshold: 0.8,
            sequence_threshold: 0.7,
            min_tables_for_claude_analysis: 2,
            table_merge_confidence_threshold: 0.75,
            max_vertical_gap: 50.0,
            min_horizontal_overlap: 0.5,
            page_edge_fraction: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Llm {
    pub claude_path: String,
    pub timeout_seconds: u64,
    pub max_rows_in_prompt: usize,
}
impl Default for Llm {
    fn default() -> Self {
        Self {
            claude_path: "claude".into(),
            timeout_seconds: 30,
            max_rows_in_prompt: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Extraction {
    pub python_exe: String,
    pub scripts_dir: String,
    pub timeout_seconds: u64,
    pub pin_scripts_dir: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
impl Default for Extraction {
    fn default() -> Self {
        Self {
            python_exe: "python3".into(),
            scripts_dir: "scripts".into(),
            timeout_seconds: 120,
            pin_scripts_dir: true,
            env: Default::default(),
        }
    }
}
