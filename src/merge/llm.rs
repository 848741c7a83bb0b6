use super::{MergeAdvisor, MergeContext, MergeType, MergeVerdict, TablePair};
use crate::{
    config::{Llm, Merge},
    table::{CellValue, Tabular},
    util::{WaitError, wait_with_timeout},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Structured answer expected from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMergeResponse {
    pub should_merge: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub merge_type: Option<MergeType>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub benefits: Vec<String>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Analysis failed")]
    Failed { code: Option<i32>, stderr: String },
    #[error("Analysis timed out after {0}s")]
    Timeout(u64),
    #[error("Failed to parse analysis response: {0}")]
    Parse(String),
    #[error("Failed to run analysis: {0}")]
    Io(String),
}

/// Sends a prompt to a model and returns its parsed verdict.
///
/// Prompt and response formats are the transport's business.
pub trait LlmTransport {
    fn analyze(&self, prompt: &str) -> Result<LlmMergeResponse, TransportError>;
}

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("static regex"))
}

/// Pull the first fenced ```json block out of `text`; bare JSON is accepted too.
pub fn parse_fenced_json(text: &str) -> Result<LlmMergeResponse, TransportError> {
    let body = match fenced_json_re().captures(text).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => text.trim(),
    };
    serde_json::from_str(body).map_err(|e| TransportError::Parse(e.to_string()))
}

/// Invokes `<claude_path> analyze <prompt_file>` and reads the verdict from stdout.
pub struct ClaudeCliTransport {
    claude_path: PathBuf,
    timeout: Duration,
}

impl ClaudeCliTransport {
    pub fn new(cfg: &Llm) -> Self {
        Self {
            claude_path: crate::util::expand_tilde(&cfg.claude_path),
            timeout: Duration::from_secs(cfg.timeout_seconds),
        }
    }
}

impl LlmTransport for ClaudeCliTransport {
    fn analyze(&self, prompt: &str) -> Result<LlmMergeResponse, TransportError> {
        // Removed on drop, whichever way this returns.
        let mut prompt_file = tempfile::Builder::new()
            .prefix("table-merge-")
            .suffix(".txt")
            .tempfile()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        prompt_file
            .write_all(prompt.as_bytes())
            .and_then(|_| prompt_file.flush())
            .map_err(|e| TransportError::Io(e.to_string()))?;

        debug!(
            "llm analyze {} {}",
            self.claude_path.display(),
            prompt_file.path().display()
        );
        let mut child = Command::new(&self.claude_path)
            .arg("analyze")
            .arg(prompt_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Io(format!("{}: {e}", self.claude_path.display())))?;

        let output = match wait_with_timeout(&mut child, self.timeout) {
            Ok(output) => output,
            Err(WaitError::Timeout(t, _)) => return Err(TransportError::Timeout(t.as_secs())),
            Err(WaitError::Io(e)) => return Err(TransportError::Io(format!("{e:#}"))),
        };

        if !output.status.success() {
            return Err(TransportError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_fenced_json(&String::from_utf8_lossy(&output.stdout))
    }
}

pub struct LlmMergeAdvisor<T: LlmTransport> {
    transport: T,
    min_confidence: f64,
    max_rows: usize,
}

impl<T: LlmTransport> LlmMergeAdvisor<T> {
    pub fn new(transport: T, merge: &Merge, llm: &Llm) -> Self {
        Self {
            transport,
            min_confidence: merge.table_merge_confidence_threshold,
            max_rows: llm.max_rows_in_prompt.max(1),
        }
    }

    pub fn build_prompt(&self, pair: &TablePair<'_>, context: &MergeContext) -> String {
        let mut p = String::new();
        p.push_str("You are verifying table extraction from a PDF document.\n");
        p.push_str("Decide whether the two tables below are parts of ONE logical table ");
        p.push_str("that was split during extraction.\n\n");
        p.push_str(&format!(
            "Placement: {:?}, table 1 on page {}, table 2 on page {}.\n",
            pair.scope, pair.first_page.page_id, pair.second_page.page_id
        ));
        if let Some(title) = context.title.as_ref().and_then(|t| t.text.as_deref()) {
            p.push_str(&format!("Title: {title}\n"));
        }
        if let Some(text) = &context.preceding_text {
            p.push_str(&format!("Text before table 1: {text}\n"));
        }
        if let Some(text) = &context.following_text {
            p.push_str(&format!("Text after table 2: {text}\n"));
        }
        for (label, table) in [("TABLE 1", pair.first), ("TABLE 2", pair.second)] {
            p.push_str(&format!(
                "\n## {label} ({} rows x {} columns)\n",
                table.row_count(),
                table.column_count()
            ));
            p.push_str(&self.render_table(table));
        }
        p.push_str(
            "\nRespond with a ```json block containing: should_merge (bool), \
             confidence (0-1), reasoning (string), merge_type \
             (\"vertical_append\", \"horizontal_join\" or \"none\"), \
             concerns (list of strings), benefits (list of strings).\n",
        );
        p
    }

    fn render_table(&self, table: &dyn Tabular) -> String {
        let shown = &table.rows()[..table.row_count().min(self.max_rows)];
        let head = crate::table::ExtractedTable::new(shown.to_vec(), None);
        let json_rows: Vec<Vec<&CellValue>> = shown.iter().map(|r| r.iter().collect()).collect();
        let text = shown
            .iter()
            .map(|r| {
                r.iter()
                    .map(|c| c.as_text().into_owned())
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "CSV:\n{}\nJSON:\n{}\nTEXT:\n{}\n",
            head.to_csv(),
            serde_json::to_string(&json_rows).unwrap_or_default(),
            text
        )
    }

    /// Ask the model about one pair. Every failure becomes a no-merge verdict with
    /// the failure as its reasoning.
    pub fn should_merge_tables(&self, pair: &TablePair<'_>, context: &MergeContext) -> MergeVerdict {
        let prompt = self.build_prompt(pair, context);
        let resp = match self.transport.analyze(&prompt) {
            Ok(resp) => resp,
            Err(e) => {
                match &e {
                    TransportError::Failed { code, stderr } => {
                        warn!("llm merge analysis failed code={code:?}: {stderr}")
                    }
                    other => warn!("llm merge analysis failed: {other}"),
                }
                return MergeVerdict::rejected(e.to_string());
            }
        };

        let confidence = if resp.confidence.is_finite() {
            resp.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mut warnings: Vec<String> = resp
            .concerns
            .iter()
            .map(|c| format!("concern: {c}"))
            .collect();
        let mut should_merge = resp.should_merge;
        if should_merge && confidence < self.min_confidence {
            warnings.push(format!(
                "model confidence {confidence:.2} below table_merge_confidence_threshold {:.2}",
                self.min_confidence
            ));
            should_merge = false;
        }
        let merge_type = match resp.merge_type {
            Some(MergeType::Unknown) => {
                warnings.push("model returned an unknown merge_type".to_string());
                MergeType::VerticalAppend
            }
            Some(MergeType::None) if should_merge => {
                warnings.push("model recommended a merge with merge_type none".to_string());
                MergeType::VerticalAppend
            }
            Some(t) => t,
            None => MergeType::VerticalAppend,
        };

        MergeVerdict {
            should_merge,
            confidence,
            merge_type: if should_merge { merge_type } else { MergeType::None },
            reasoning: resp.reasoning,
            warnings,
            adjacent: None,
            continuation: None,
        }
    }
}

impl<T: LlmTransport> MergeAdvisor for LlmMergeAdvisor<T> {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn analyze(&self, pair: &TablePair<'_>, context: &MergeContext) -> MergeVerdict {
        self.should_merge_tables(pair, context)
    }
}
