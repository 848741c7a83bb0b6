use super::document::Block;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

const CAPTION_KEYWORDS: [&str; 3] = ["table", "exhibit", "figure"];
const DATA_KEYWORDS: [&str; 10] = [
    "data",
    "results",
    "statistics",
    "analysis",
    "comparison",
    "summary",
    "breakdown",
    "distribution",
    "metrics",
    "performance",
];
const MAX_CAPTION_CHARS: usize = 200;
const MAX_TITLE_CHARS: usize = 80;
const INFERRED_PREFIX: &str = "Inferred: ";
const CAPTION_WINDOW: usize = 2;
const PARAGRAPH_WINDOW: usize = 3;
const HEADER_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleSource {
    Caption,
    Text,
    PrecedingParagraph,
    SectionHeader,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableTitle {
    pub found: bool,
    pub text: Option<String>,
    pub source: TitleSource,
    pub is_inferred: bool,
    pub inference_context: Option<String>,
}

impl TableTitle {
    pub fn not_found() -> Self {
        Self {
            found: false,
            text: None,
            source: TitleSource::None,
            is_inferred: false,
            inference_context: None,
        }
    }

    fn explicit(text: String, source: TitleSource) -> Self {
        Self {
            found: true,
            text: Some(text),
            source,
            is_inferred: false,
            inference_context: None,
        }
    }

    fn inferred(text: &str, source: TitleSource, context: Option<String>) -> Self {
        Self {
            found: true,
            text: Some(truncate_title(&format!("{INFERRED_PREFIX}{text}"))),
            source,
            is_inferred: true,
            inference_context: context,
        }
    }
}

/// NFKC, whitespace runs collapsed to one space, trimmed.
pub fn normalize_text(s: &str) -> String {
    s.nfkc()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Titles over 80 characters become their first 77 characters plus "...".
pub fn truncate_title(s: &str) -> String {
    if s.chars().count() <= MAX_TITLE_CHARS {
        return s.to_string();
    }
    let head: String = s.chars().take(MAX_TITLE_CHARS - 3).collect();
    format!("{head}...")
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

fn is_caption_like(text: &str) -> bool {
    text.chars().count() < MAX_CAPTION_CHARS && contains_any(text, &CAPTION_KEYWORDS)
}

fn preceding<'a>(blocks: &[&'a Block], position: usize, window: usize) -> impl Iterator<Item = &'a Block> {
    let start = position.saturating_sub(window);
    blocks[start..position.min(blocks.len())]
        .iter()
        .rev()
        .copied()
        .take_while(|b| b.as_table().is_none())
}

/// Title for the table at `position` in a page's flattened blocks.
///
/// Explicit captions win over inference. The search never looks past another table.
pub fn resolve_title(blocks: &[&Block], position: usize) -> TableTitle {
    let after = blocks.get(position + 1).copied().filter(|b| b.as_table().is_none());
    for block in preceding(blocks, position, CAPTION_WINDOW).chain(after) {
        let source = match block {
            Block::Caption(_) => TitleSource::Caption,
            Block::Text(_) => TitleSource::Text,
            _ => continue,
        };
        if let Some(text) = block.text() {
            let text = normalize_text(text);
            if is_caption_like(&text) {
                return TableTitle::explicit(text, source);
            }
        }
    }

    for block in preceding(blocks, position, PARAGRAPH_WINDOW) {
        if let Block::Text(t) = block {
            let text = normalize_text(&t.text);
            if !text.is_empty() && contains_any(&text, &DATA_KEYWORDS) {
                let context: String = text.chars().take(MAX_CAPTION_CHARS).collect();
                return TableTitle::inferred(&text, TitleSource::PrecedingParagraph, Some(context));
            }
        }
    }

    for block in preceding(blocks, position, HEADER_WINDOW) {
        if let Block::SectionHeader(t) = block {
            let text = normalize_text(&t.text);
            if !text.is_empty() {
                return TableTitle::inferred(&text, TitleSource::SectionHeader, Some(text.clone()));
            }
        }
    }

    TableTitle::not_found()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::document::TextBlock;

    fn text(s: &str) -> Block {
        Block::Text(TextBlock {
            text: s.into(),
            bbox: None,
        })
    }

    fn table() -> Block {
        Block::Table(crate::merge::document::TableBlock {
            id: "t".into(),
            rows: vec![],
            bbox: None,
        })
    }

    #[test]
    fn truncates_long_titles() {
        let long = "x".repeat(100);
        let t = truncate_title(&long);
        assert_eq!(t.chars().count(), 80);
        assert!(t.ends_with("..."));
        assert_eq!(truncate_title("short"), "short");
    }

    #[test]
    fn stops_at_previous_table() {
        let blocks = [text("Table 1: Revenue"), table(), table()];
        let refs: Vec<&Block> = blocks.iter().collect();
        assert_eq!(resolve_title(&refs, 2), TableTitle::not_found());
        assert_eq!(
            resolve_title(&refs, 1).text.as_deref(),
            Some("Table 1: Revenue")
        );
    }
}
