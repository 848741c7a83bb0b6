//! The slice of a parsed document the merge analyzer reads.

use crate::table::{BBox, CellValue, Tabular};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_id: u32,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "block_type", rename_all = "snake_case")]
pub enum Block {
    Table(TableBlock),
    Group {
        #[serde(default)]
        children: Vec<Block>,
    },
    Text(TextBlock),
    SectionHeader(TextBlock),
    Caption(TextBlock),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableBlock {
    pub id: String,
    pub rows: Vec<Vec<CellValue>>,
    #[serde(default)]
    pub bbox: Option<BBox>,
}

impl Tabular for TableBlock {
    fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    #[serde(default)]
    pub bbox: Option<BBox>,
}

impl Block {
    pub fn as_table(&self) -> Option<&TableBlock> {
        match self {
            Block::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Block::Text(t) | Block::SectionHeader(t) | Block::Caption(t) => Some(&t.text),
            _ => None,
        }
    }
}

/// A table together with where it sits in its page's flattened block order.
#[derive(Debug, Clone, Copy)]
pub struct LocatedTable<'a> {
    pub page_id: u32,
    pub position: usize,
    pub table: &'a TableBlock,
}

impl Page {
    /// Blocks in document order with group blocks replaced by their children.
    pub fn flatten(&self) -> Vec<&Block> {
        fn walk<'a>(blocks: &'a [Block], out: &mut Vec<&'a Block>) {
            for b in blocks {
                match b {
                    Block::Group { children } => walk(children, out),
                    other => out.push(other),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.blocks, &mut out);
        out
    }

    pub fn tables(&self) -> Vec<LocatedTable<'_>> {
        self.flatten()
            .into_iter()
            .enumerate()
            .filter_map(|(position, b)| {
                b.as_table().map(|table| LocatedTable {
                    page_id: self.page_id,
                    position,
                    table,
                })
            })
            .collect()
    }
}

impl Document {
    pub fn table_count(&self) -> usize {
        self.pages.iter().map(|p| p.tables().len()).sum()
    }

    pub fn page(&self, page_id: u32) -> Option<&Page> {
        self.pages.iter().find(|p| p.page_id == page_id)
    }
}
