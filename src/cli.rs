use crate::{
    cache::TableExtractionCache,
    config::Config,
    engine::python::CamelotEngine,
    evaluator::{SearchCache, TableQualityEvaluator},
    merge::{
        ClaudeCliTransport, HeuristicAdvisor, LlmMergeAdvisor, MergeAdvisor, TableMergeAnalyzer,
        document::Document,
    },
    optimizer::TableOptimizer,
    report::{CacheReport, DoctorReport, MergeReport, OptimizeReport, ScoreReport, SearchReport},
    table::{BBox, ExtractedTable},
    util::{ensure_dir, now_rfc3339, sha256_hex},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "table-check")]
#[command(about = "Table extraction quality scoring, parameter search and merge analysis")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./table-check.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Doctor {},
    /// Score already-extracted tables (JSON list of tables).
    Score {
        #[arg(long)]
        input: PathBuf,
    },
    /// Search extraction parameters for one page.
    Search {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        page: u32,
        /// Restrict extraction to "x0,y0,x1,y1".
        #[arg(long)]
        bbox: Option<BBox>,
        #[arg(long)]
        no_cache: bool,
    },
    /// Rank the full optimizer parameter grid for one page.
    Optimize {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        page: u32,
    },
    /// Decide which tables of a parsed document (JSON) should be merged.
    Merge {
        #[arg(long)]
        input: PathBuf,
        /// Ask the LLM instead of using heuristics.
        #[arg(long)]
        llm: bool,
    },
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    Stats,
    Clear,
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::Score { input } => score(&cfg, input),
        Command::Search {
            input,
            page,
            bbox,
            no_cache,
        } => search(&cfg, input, *page, *bbox, !*no_cache),
        Command::Optimize { input, page } => optimize(&cfg, input, *page),
        Command::Merge { input, llm } => merge(&cfg, input, *llm || cfg.merge.use_llm),
        Command::Cache { action } => cache(&cfg, action),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["table-check.toml", "table-check.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Reports go to stdout, so logs stay on stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(cfg.cache.resolved_dir().join("table-check.log"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    let extraction = match CamelotEngine::new(&cfg.extraction).and_then(|e| e.doctor()) {
        Ok(diag) => serde_json::to_value(diag)?,
        Err(e) => serde_json::json!({ "ok": false, "error": format!("{e:#}") }),
    };
    let claude_path = crate::util::expand_tilde(&cfg.llm.claude_path);
    let claude_found = claude_path.is_file()
        || std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|d| d.join(&claude_path).is_file()))
            .unwrap_or(false);
    print_json(&DoctorReport {
        extraction,
        claude_path: claude_path.display().to_string(),
        claude_found,
        config_hash: sha256_hex(cfg.normalized_for_hash().as_bytes()),
    })
}

fn score(cfg: &Config, input: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("reading tables: {}", input.display()))?;
    let tables: Vec<ExtractedTable> =
        serde_json::from_str(&raw).with_context(|| "parsing tables JSON")?;
    let evaluator = TableQualityEvaluator::new(&cfg.quality);
    let quality = evaluator.evaluate_tables(&tables);
    info!(
        "scored tables={} average_confidence={:.1}",
        tables.len(),
        quality.average_confidence
    );
    print_json(&ScoreReport {
        generated_at: now_rfc3339(),
        input: input.display().to_string(),
        quality,
    })
}

fn search(cfg: &Config, input: &Path, page: u32, bbox: Option<BBox>, use_cache: bool) -> Result<()> {
    validate_pdf_input(input)?;
    let engine = CamelotEngine::new(&cfg.extraction)?;
    let mut cache = TableExtractionCache::open(&cfg.cache.resolved_dir(), cfg.cache.max_size)?;
    let mut evaluator = TableQualityEvaluator::new(&cfg.quality);
    let cache_enabled = use_cache && cfg.cache.enabled;

    let search_cache = SearchCache {
        store: &mut cache,
        hashing: &cfg.hashing,
        enabled: cache_enabled,
    };
    let result = evaluator.find_best_cached(search_cache, &engine, page, input, bbox);
    print_json(&SearchReport {
        generated_at: now_rfc3339(),
        input: input.display().to_string(),
        page,
        bbox,
        cache_enabled,
        result,
    })
}

fn optimize(cfg: &Config, input: &Path, page: u32) -> Result<()> {
    validate_pdf_input(input)?;
    let engine = CamelotEngine::new(&cfg.extraction)?;
    let optimizer = TableOptimizer::new(&cfg.optimizer);
    let result = optimizer.search(&engine, input, page);
    if result.is_none() {
        warn!("no parameter combination produced a table on page {page}");
    }
    print_json(&OptimizeReport {
        generated_at: now_rfc3339(),
        input: input.display().to_string(),
        page,
        result,
    })
}

fn merge(cfg: &Config, input: &Path, use_llm: bool) -> Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("reading document: {}", input.display()))?;
    let doc: Document = serde_json::from_str(&raw).with_context(|| "parsing document JSON")?;

    let advisor: Box<dyn MergeAdvisor> = if use_llm {
        Box::new(LlmMergeAdvisor::new(
            ClaudeCliTransport::new(&cfg.llm),
            &cfg.merge,
            &cfg.llm,
        ))
    } else {
        Box::new(HeuristicAdvisor::new(&cfg.merge))
    };
    let advisor_name = advisor.name().to_string();
    let analyzer = TableMergeAnalyzer::new(&cfg.merge, advisor);
    let analyses = analyzer.analyze_document(&doc);
    let merge_count = analyses.iter().filter(|a| a.should_merge).count();

    print_json(&MergeReport {
        generated_at: now_rfc3339(),
        input: input.display().to_string(),
        advisor: advisor_name,
        analyses,
        merge_count,
    })
}

fn cache(cfg: &Config, action: &CacheAction) -> Result<()> {
    let mut cache = TableExtractionCache::open(&cfg.cache.resolved_dir(), cfg.cache.max_size)?;
    let action = match action {
        CacheAction::Stats => "stats",
        CacheAction::Clear => {
            cache.clear();
            "clear"
        }
    };
    print_json(&CacheReport {
        generated_at: now_rfc3339(),
        action: action.to_string(),
        stats: cache.stats(),
    })
}

fn validate_pdf_input(input: &Path) -> Result<()> {
    if !input.exists() {
        return Err(anyhow!("input does not exist: {}", input.display()));
    }
    if let Some(ext) = input.extension().and_then(|s| s.to_str()) {
        if !ext.eq_ignore_ascii_case("pdf") {
            return Err(anyhow!("input is not a PDF: {}", input.display()));
        }
    } else {
        warn!("input has no extension; assuming PDF: {}", input.display());
    }
    Ok(())
}
