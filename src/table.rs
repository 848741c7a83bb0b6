use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// One cell of an extracted grid.
///
/// Deserializes from plain JSON scalars, so `[["a", 1, null]]` is a valid row list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Runtime type of a cell, used for per-column type uniformity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Null,
    Bool,
    Int,
    Float,
    Text,
}

impl CellValue {
    pub fn kind(&self) -> CellKind {
        match self {
            CellValue::Null => CellKind::Null,
            CellValue::Bool(_) => CellKind::Bool,
            CellValue::Int(_) => CellKind::Int,
            CellValue::Float(_) => CellKind::Float,
            CellValue::Text(_) => CellKind::Text,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Null or whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            CellValue::Null => Cow::Borrowed(""),
            CellValue::Bool(b) => Cow::Owned(b.to_string()),
            CellValue::Int(i) => Cow::Owned(i.to_string()),
            CellValue::Float(f) => Cow::Owned(f.to_string()),
            CellValue::Text(s) => Cow::Borrowed(s.as_str()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Int(i)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::Float(f)
    }
}

/// Quality hints reported by the extraction engine, as percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsingReport {
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub whitespace: Option<f64>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub page: Option<String>,
}

/// Axis-aligned box in page coordinates, origin top-left, `y` growing downwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).max(0.0)
    }

    /// Length of the overlap of the two boxes projected onto the x axis.
    pub fn horizontal_overlap(&self, other: &BBox) -> f64 {
        (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0)
    }

    /// Camelot `table_areas` notation: "x0,y0,x1,y1".
    pub fn to_area_string(&self) -> String {
        format!("{},{},{},{}", self.x0, self.y0, self.x1, self.y1)
    }
}

impl std::str::FromStr for BBox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid bbox '{s}': {e}"))?;
        match parts.as_slice() {
            [x0, y0, x1, y1] => Ok(BBox::new(*x0, *y0, *x1, *y1)),
            _ => Err(format!("bbox needs 4 comma-separated numbers, got '{s}'")),
        }
    }
}

/// Read access to a rectangular-ish cell grid.
pub trait Tabular {
    fn rows(&self) -> &[Vec<CellValue>];

    fn row_count(&self) -> usize {
        self.rows().len()
    }

    /// Widest row; ragged grids are common in raw extraction output.
    fn column_count(&self) -> usize {
        self.rows().iter().map(Vec::len).max().unwrap_or(0)
    }

    fn header(&self) -> Option<&[CellValue]> {
        self.rows().first().map(Vec::as_slice)
    }

    fn to_csv(&self) -> String {
        let mut wtr = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());
        for row in self.rows() {
            let record: Vec<Cow<'_, str>> = row.iter().map(CellValue::as_text).collect();
            if wtr.write_record(record.iter().map(|c| c.as_bytes())).is_err() {
                break;
            }
        }
        let bytes = wtr.into_inner().unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// A table as produced by one call of the extraction primitive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub rows: Vec<Vec<CellValue>>,
    #[serde(default)]
    pub parsing_report: Option<ParsingReport>,
    #[serde(default)]
    pub bbox: Option<BBox>,
}

impl ExtractedTable {
    pub fn new(rows: Vec<Vec<CellValue>>, parsing_report: Option<ParsingReport>) -> Self {
        Self {
            rows,
            parsing_report,
            bbox: None,
        }
    }
}

impl Tabular for ExtractedTable {
    fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }
}

/// Opaque parameter set handed to the extraction primitive.
///
/// Keys are kept sorted so the JSON form is canonical and can be used as an
/// identity for success bookkeeping and cache keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionParams(pub BTreeMap<String, serde_json::Value>);

impl ExtractionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn flavor(&self) -> Option<&str> {
        self.0.get("flavor").and_then(|v| v.as_str())
    }

    pub fn key(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for ExtractionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_deserialize_from_plain_json() {
        let rows: Vec<Vec<CellValue>> =
            serde_json::from_str(r#"[["a", 1, 2.5, null, true]]"#).unwrap();
        let kinds: Vec<CellKind> = rows[0].iter().map(CellValue::kind).collect();
        assert_eq!(
            kinds,
            vec![
                CellKind::Text,
                CellKind::Int,
                CellKind::Float,
                CellKind::Null,
                CellKind::Bool
            ]
        );
    }

    #[test]
    fn csv_quotes_embedded_commas() {
        let t = ExtractedTable::new(
            vec![vec!["City".into(), "Note".into()], vec!["Paris".into(), "a, b".into()]],
            None,
        );
        assert_eq!(t.to_csv(), "City,Note\nParis,\"a, b\"\n");
    }

    #[test]
    fn params_key_is_order_independent() {
        let a = ExtractionParams::new().with("flavor", "stream").with("edge_tol", 500);
        let b = ExtractionParams::new().with("edge_tol", 500).with("flavor", "stream");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn bbox_parses_from_area_string() {
        let b: BBox = "10,20,110.5,220".parse().unwrap();
        assert_eq!(b, BBox::new(10.0, 20.0, 110.5, 220.0));
        assert!("1,2,3".parse::<BBox>().is_err());
    }
}
