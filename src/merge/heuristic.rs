use super::{MergeAdvisor, MergeContext, MergeScope, MergeType, MergeVerdict, TablePair, normalized_row};
use crate::{
    config::Merge,
    metrics::is_numeric,
    table::{CellValue, Tabular},
};

const BASE_CONFIDENCE: f64 = 0.5;
const COLUMNS_MATCH_BONUS: f64 = 0.3;
const ADJACENT_BONUS: f64 = 0.1;
const CONTINUATION_BONUS: f64 = 0.1;
/// Tables may overlap vertically by this much and still count as stacked.
const OVERLAP_TOLERANCE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellShape {
    Blank,
    Number,
    Text,
}

fn row_shape(row: &[CellValue]) -> Vec<CellShape> {
    row.iter()
        .map(|c| {
            if c.is_blank() {
                CellShape::Blank
            } else if is_numeric(c) {
                CellShape::Number
            } else {
                CellShape::Text
            }
        })
        .collect()
}

/// Merge scoring from column counts, geometry and row continuation, without an LLM.
pub struct HeuristicAdvisor {
    merge_threshold: f64,
    max_vertical_gap: f64,
    min_horizontal_overlap: f64,
    page_edge_fraction: f64,
}

impl HeuristicAdvisor {
    pub fn new(cfg: &Merge) -> Self {
        Self {
            merge_threshold: cfg.same_page_threshold,
            max_vertical_gap: cfg.max_vertical_gap,
            min_horizontal_overlap: cfg.min_horizontal_overlap,
            page_edge_fraction: cfg.page_edge_fraction,
        }
    }

    /// Same page: the second box starts just below the first and they share most
    /// of their horizontal extent. Cross page: the first table ends near the bottom
    /// of its page and the second starts near the top of the next.
    pub fn are_tables_adjacent(&self, pair: &TablePair<'_>) -> Option<bool> {
        match pair.scope {
            MergeScope::SamePage => {
                let (a, b) = (pair.first.bbox?, pair.second.bbox?);
                let narrower = a.width().min(b.width());
                if narrower <= 0.0 {
                    return Some(false);
                }
                let gap = b.y0 - a.y1;
                let overlap = a.horizontal_overlap(&b) / narrower;
                Some(
                    gap >= -OVERLAP_TOLERANCE
                        && gap <= self.max_vertical_gap
                        && overlap >= self.min_horizontal_overlap,
                )
            }
            MergeScope::CrossPage => {
                let edge = self.page_edge_fraction;
                let near_bottom = match (pair.first.bbox, pair.first_page.height) {
                    (Some(b), Some(h)) if h > 0.0 => Some(b.y1 >= h * (1.0 - edge)),
                    _ => None,
                };
                let near_top = match (pair.second.bbox, pair.second_page.height) {
                    (Some(b), Some(h)) if h > 0.0 => Some(b.y0 <= h * edge),
                    _ => None,
                };
                // Without geometry the pair is still last-on-page / first-on-next-page.
                Some(near_bottom.unwrap_or(true) && near_top.unwrap_or(true))
            }
        }
    }

    /// The second table repeats the first's header, or its first row has the same
    /// blank/number/text shape as the first table's last data row.
    pub fn check_continuation(&self, pair: &TablePair<'_>) -> Option<bool> {
        let header = pair.first.header()?;
        let lead = pair.second.header()?;
        if normalized_row(header) == normalized_row(lead) {
            return Some(true);
        }
        if pair.first.row_count() < 2 {
            return Some(false);
        }
        let last = pair.first.rows().last()?;
        Some(row_shape(last) == row_shape(lead))
    }
}

impl MergeAdvisor for HeuristicAdvisor {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn analyze(&self, pair: &TablePair<'_>, _context: &MergeContext) -> MergeVerdict {
        let columns = pair.column_analysis();
        let adjacent = self.are_tables_adjacent(pair);
        let continuation = self.check_continuation(pair);

        let mut confidence = BASE_CONFIDENCE;
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        if columns.columns_match {
            confidence += COLUMNS_MATCH_BONUS;
            reasons.push(format!("both tables have {} columns", columns.table1_columns));
        } else {
            reasons.push(format!(
                "column counts differ ({} vs {})",
                columns.table1_columns, columns.table2_columns
            ));
        }

        match adjacent {
            Some(true) => {
                confidence += ADJACENT_BONUS;
                reasons.push("tables are adjacent".to_string());
            }
            Some(false) => reasons.push("tables are not adjacent".to_string()),
            None => warnings.push("bounding boxes missing; adjacency not verified".to_string()),
        }

        if continuation == Some(true) {
            confidence += CONTINUATION_BONUS;
            reasons.push("second table continues the first".to_string());
        }

        let confidence = confidence.clamp(0.0, 1.0);
        let should_merge = confidence > self.merge_threshold && columns.columns_match;

        MergeVerdict {
            should_merge,
            confidence,
            merge_type: if should_merge {
                MergeType::VerticalAppend
            } else {
                MergeType::None
            },
            reasoning: reasons.join("; "),
            warnings,
            adjacent,
            continuation,
        }
    }
}
