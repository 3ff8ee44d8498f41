#![cfg(feature = "excel")]

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use crate::error::{ReaderError, ReaderResult};
use crate::types::Cell;

use super::convert::{partial_path, CommandConverter, SourceConverter};

/// Converts spreadsheets in-process with `calamine`; archives still go through [`CommandConverter`].
///
/// Behavior:
/// - Reads the first worksheet only
/// - Writes every row, including blank ones, so line indexes match the sheet
/// - Whole floats are written in integer form (`3.0` -> `3`)
#[derive(Debug, Clone, Default)]
pub struct CalamineConverter {
    pub archives: CommandConverter,
}

impl SourceConverter for CalamineConverter {
    fn extract(&self, archive: &Path, extension: &str, dest: &Path) -> ReaderResult<()> {
        self.archives.extract(archive, extension, dest)
    }

    fn convert_to_csv(&self, workbook: &Path, _extension: &str, dest: &Path) -> ReaderResult<()> {
        let mut wb = open_workbook_auto(workbook)?;
        let Some(sheet) = wb.sheet_names().first().cloned() else {
            return Err(ReaderError::Conversion {
                path: workbook.display().to_string(),
                message: "workbook has no sheets".to_string(),
            });
        };
        let range = wb.worksheet_range(&sheet)?;

        let partial = partial_path(dest);
        {
            let mut wtr = csv::WriterBuilder::new().flexible(true).from_path(&partial)?;
            for row in range.rows() {
                let cells: Vec<String> = row.iter().map(|c| cell_from_data(c).normalized().into_owned()).collect();
                wtr.write_record(&cells)?;
            }
            wtr.flush()?;
        }
        std::fs::rename(&partial, dest)?;
        tracing::debug!(workbook = %workbook.display(), sheet = %sheet, rows = range.height(), "converted worksheet");
        Ok(())
    }
}

/// Maps a spreadsheet cell onto a raw [`Cell`], keeping numbers numeric.
pub fn cell_from_data(c: &Data) -> Cell {
    match c {
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) => Cell::Float(*f),
        Data::Int(i) => Cell::Text(i.to_string()),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) => Cell::Text(dt.to_string()),
        Data::DateTimeIso(s) => Cell::Text(s.clone()),
        Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(e) => Cell::Text(format!("{e:?}")),
        Data::Empty => Cell::Text(String::new()),
    }
}
