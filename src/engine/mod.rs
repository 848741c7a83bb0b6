pub mod python;
pub mod types;

use crate::table::{BBox, ExtractedTable, ExtractionParams};
use anyhow::Result;
use std::path::Path;

pub use types::{DocDiag, ExtractIn, ExtractOut};

/// The external table-extraction primitive.
///
/// Implementations either return the tables found on `page` (possibly none) or an
/// error; callers treat both "empty" and "error" as a failed attempt.
pub trait Extractor {
    fn extract(
        &self,
        filepath: &Path,
        page: u32,
        params: &ExtractionParams,
        table_areas: Option<&[BBox]>,
    ) -> Result<Vec<ExtractedTable>>;
}

impl<E: Extractor + ?Sized> Extractor for &E {
    fn extract(
        &self,
        filepath: &Path,
        page: u32,
        params: &ExtractionParams,
        table_areas: Option<&[BBox]>,
    ) -> Result<Vec<ExtractedTable>> {
        (**self).extract(filepath, page, params, table_areas)
    }
}
