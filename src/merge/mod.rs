//! Advisory analysis of which adjacent tables form one logical table.
//!
//! Nothing here mutates the document; concatenating grids is left to the caller,
//! guided by [`MergeInstructions`].

pub mod document;
pub mod heuristic;
pub mod llm;
pub mod title;

use crate::{config::Merge, table::Tabular};
use document::{Block, Document, LocatedTable, Page, TableBlock};
use serde::{Deserialize, Serialize};
use title::{TableTitle, normalize_text, resolve_title};
use tracing::{debug, info};

pub use heuristic::HeuristicAdvisor;
pub use llm::{ClaudeCliTransport, LlmMergeAdvisor, LlmTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeScope {
    SamePage,
    CrossPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeType {
    VerticalAppend,
    HorizontalJoin,
    None,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAnalysis {
    pub table1_columns: usize,
    pub table2_columns: usize,
    pub columns_match: bool,
    pub headers_match: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub table1_rows: usize,
    pub table2_rows: usize,
    /// `None` when the geometry needed to decide is missing.
    pub adjacent: Option<bool>,
    pub continuation: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeInstructions {
    pub target_table_id: String,
    pub append_table_id: String,
    pub merge_type: MergeType,
    /// The second table repeats the first table's header row.
    pub drop_repeated_header: bool,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableAnalysis {
    pub table1_id: String,
    pub table2_id: String,
    pub page1: u32,
    pub page2: u32,
    pub scope: MergeScope,
    pub should_merge: bool,
    /// Merge certainty in `[0, 1]`.
    pub confidence: f64,
    pub merge_type: MergeType,
    pub table_title: TableTitle,
    pub column_analysis: ColumnAnalysis,
    pub content_analysis: ContentAnalysis,
    pub reasoning: String,
    pub warnings: Vec<String>,
    pub merge_instructions: Option<MergeInstructions>,
}

/// Where a table of a pair lives.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PageInfo {
    pub page_id: u32,
    pub height: Option<f64>,
}

impl From<&Page> for PageInfo {
    fn from(p: &Page) -> Self {
        Self {
            page_id: p.page_id,
            height: p.height,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TablePair<'a> {
    pub first: &'a TableBlock,
    pub second: &'a TableBlock,
    pub first_page: PageInfo,
    pub second_page: PageInfo,
    pub scope: MergeScope,
}

impl TablePair<'_> {
    pub fn column_analysis(&self) -> ColumnAnalysis {
        let headers_match = match (self.first.header(), self.second.header()) {
            (Some(a), Some(b)) => normalized_row(a) == normalized_row(b),
            _ => false,
        };
        let c1 = self.first.column_count();
        let c2 = self.second.column_count();
        ColumnAnalysis {
            table1_columns: c1,
            table2_columns: c2,
            columns_match: c1 > 0 && c1 == c2,
            headers_match,
        }
    }
}

pub(crate) fn normalized_row(row: &[crate::table::CellValue]) -> Vec<String> {
    row.iter()
        .map(|c| normalize_text(&c.as_text()).to_lowercase())
        .collect()
}

/// Text around a pair, offered to advisors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeContext {
    pub title: Option<TableTitle>,
    pub preceding_text: Option<String>,
    pub following_text: Option<String>,
}

/// What an advisor thinks of one pair, before scope thresholds are applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeVerdict {
    pub should_merge: bool,
    pub confidence: f64,
    pub merge_type: MergeType,
    pub reasoning: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub adjacent: Option<bool>,
    #[serde(default)]
    pub continuation: Option<bool>,
}

impl MergeVerdict {
    pub fn rejected(reasoning: impl Into<String>) -> Self {
        Self {
            should_merge: false,
            confidence: 0.0,
            merge_type: MergeType::None,
            reasoning: reasoning.into(),
            warnings: Vec::new(),
            adjacent: None,
            continuation: None,
        }
    }
}

pub trait MergeAdvisor {
    fn name(&self) -> &'static str;
    fn analyze(&self, pair: &TablePair<'_>, context: &MergeContext) -> MergeVerdict;
}

/// Strict lower bounds on merge confidence per scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeThresholds {
    pub same_page: f64,
    pub cross_page: f64,
}

impl Default for MergeThresholds {
    fn default() -> Self {
        Self {
            same_page: 0.7,
            cross_page: 0.8,
        }
    }
}

impl MergeThresholds {
    pub fn for_scope(&self, scope: MergeScope) -> f64 {
        match scope {
            MergeScope::SamePage => self.same_page,
            MergeScope::CrossPage => self.cross_page,
        }
    }

    pub fn accepts(&self, scope: MergeScope, confidence: f64) -> bool {
        confidence > self.for_scope(scope)
    }
}

pub struct TableMergeAnalyzer {
    advisor: Box<dyn MergeAdvisor>,
    thresholds: MergeThresholds,
    sequence_threshold: f64,
    min_tables: usize,
}

impl TableMergeAnalyzer {
    pub fn new(cfg: &Merge, advisor: Box<dyn MergeAdvisor>) -> Self {
        Self {
            advisor,
            thresholds: MergeThresholds {
                same_page: cfg.same_page_threshold,
                cross_page: cfg.cross_page_threshold,
            },
            sequence_threshold: cfg.sequence_threshold,
            min_tables: cfg.min_tables_for_claude_analysis,
        }
    }

    pub fn thresholds(&self) -> MergeThresholds {
        self.thresholds
    }

    /// Every consecutive same-page pair, then every last/first pair of consecutive
    /// pages, in document order.
    pub fn analyze_document(&self, doc: &Document) -> Vec<TableAnalysis> {
        let total = doc.table_count();
        if total < self.min_tables.max(2) {
            debug!("merge analysis skipped: {total} table(s)");
            return Vec::new();
        }

        let mut out = Vec::new();
        for page in &doc.pages {
            let flat = page.flatten();
            let tables = page.tables();
            for w in tables.windows(2) {
                out.push(self.analyze_pair(
                    (page, &flat[..], w[0]),
                    (page, &flat[..], w[1]),
                    MergeScope::SamePage,
                ));
            }
        }

        for w in doc.pages.windows(2) {
            let (p1, p2) = (&w[0], &w[1]);
            if p1.page_id.checked_add(1) != Some(p2.page_id) {
                continue;
            }
            let (t1, t2) = (p1.tables(), p2.tables());
            if let (Some(last), Some(first)) = (t1.last(), t2.first()) {
                let (f1, f2) = (p1.flatten(), p2.flatten());
                out.push(self.analyze_pair(
                    (p1, &f1[..], *last),
                    (p2, &f2[..], *first),
                    MergeScope::CrossPage,
                ));
            }
        }

        let merges = out.iter().filter(|a| a.should_merge).count();
        info!(
            "merge analysis advisor={} pairs={} merges={}",
            self.advisor.name(),
            out.len(),
            merges
        );
        out
    }

    /// Only the pairs that should be merged.
    pub fn merge_candidates(&self, doc: &Document) -> Vec<TableAnalysis> {
        self.analyze_document(doc)
            .into_iter()
            .filter(|a| a.should_merge)
            .collect()
    }

    fn analyze_pair(
        &self,
        (page1, flat1, loc1): (&Page, &[&Block], LocatedTable<'_>),
        (page2, flat2, loc2): (&Page, &[&Block], LocatedTable<'_>),
        scope: MergeScope,
    ) -> TableAnalysis {
        let pair = TablePair {
            first: loc1.table,
            second: loc2.table,
            first_page: PageInfo::from(page1),
            second_page: PageInfo::from(page2),
            scope,
        };
        let title = resolve_title(flat1, loc1.position);
        let context = MergeContext {
            title: Some(title.clone()),
            preceding_text: loc1
                .position
                .checked_sub(1)
                .and_then(|i| flat1.get(i))
                .and_then(|b| b.text())
                .map(normalize_text),
            following_text: flat2
                .get(loc2.position + 1)
                .and_then(|b| b.text())
                .map(normalize_text),
        };

        let verdict = self.advisor.analyze(&pair, &context);
        let column_analysis = pair.column_analysis();
        let mut warnings = verdict.warnings.clone();

        let passes = self.thresholds.accepts(scope, verdict.confidence);
        if verdict.should_merge && !passes {
            warnings.push(format!(
                "confidence {:.2} does not exceed the {:?} threshold {:.2}",
                verdict.confidence,
                scope,
                self.thresholds.for_scope(scope)
            ));
        }
        let should_merge = verdict.should_merge && passes;
        let merge_type = if should_merge {
            verdict.merge_type
        } else {
            MergeType::None
        };

        let merge_instructions = should_merge.then(|| MergeInstructions {
            target_table_id: pair.first.id.clone(),
            append_table_id: pair.second.id.clone(),
            merge_type,
            drop_repeated_header: column_analysis.headers_match,
            title: title.text.clone(),
        });

        debug!(
            "pair {} -> {} scope={:?} confidence={:.2} merge={}",
            pair.first.id, pair.second.id, scope, verdict.confidence, should_merge
        );

        TableAnalysis {
            table1_id: pair.first.id.clone(),
            table2_id: pair.second.id.clone(),
            page1: page1.page_id,
            page2: page2.page_id,
            scope,
            should_merge,
            confidence: verdict.confidence,
            merge_type,
            table_title: title,
            content_analysis: ContentAnalysis {
                table1_rows: pair.first.row_count(),
                table2_rows: pair.second.row_count(),
                adjacent: verdict.adjacent,
                continuation: verdict.continuation,
            },
            column_analysis,
            reasoning: verdict.reasoning,
            warnings,
            merge_instructions,
        }
    }

    /// Fold an ordered run of tables into contiguous merge groups of indices.
    ///
    /// Table `i` joins the current group only if the advisor says merge with
    /// confidence at least `sequence_threshold`.
    pub fn analyze_table_sequence(&self, tables: &[&TableBlock], context: &MergeContext) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        if tables.is_empty() {
            return groups;
        }
        let mut current = vec![0];
        for i in 1..tables.len() {
            let pair = TablePair {
                first: tables[i - 1],
                second: tables[i],
                first_page: PageInfo::default(),
                second_page: PageInfo::default(),
                scope: MergeScope::SamePage,
            };
            let verdict = self.advisor.analyze(&pair, context);
            if verdict.should_merge && verdict.confidence >= self.sequence_threshold {
                current.push(i);
            } else {
                groups.push(std::mem::replace(&mut current, vec![i]));
            }
        }
        groups.push(current);
        groups
    }
}
