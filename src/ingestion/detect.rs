//! Delimiter dialect detection from the first physical lines of a file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{ReaderError, ReaderResult};
use crate::types::CsvFormat;

/// Knobs for [`detect_format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectOptions {
    /// Physical lines sampled.
    pub lines: usize,
    /// Minimum occurrences of a separator for it to win.
    pub threshold: usize,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            lines: 3,
            threshold: 6,
        }
    }
}

/// Detects the dialect of `path`.
///
/// `original_extension` is the extension of the uploaded file; spreadsheets are converted to
/// comma-delimited text, so `xls`/`xlsx` always yield [`CsvFormat::Csv`] without reading.
pub fn detect_format(
    path: impl AsRef<Path>,
    original_extension: Option<&str>,
    opts: DetectOptions,
) -> ReaderResult<CsvFormat> {
    if matches!(original_extension, Some("xls" | "xlsx")) {
        return Ok(CsvFormat::Csv);
    }

    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ReaderError::unreadable(path, e))?;
    let mut rdr = BufReader::new(file);

    let mut sample = Vec::new();
    for _ in 0..opts.lines {
        let read = rdr
            .read_until(b'\n', &mut sample)
            .map_err(|e| ReaderError::unreadable(path, e))?;
        if read == 0 {
            break;
        }
    }

    let format = classify_sample(&sample, opts.threshold);
    tracing::debug!(path = %path.display(), ?format, "detected csv format");
    Ok(format)
}

/// Tab wins over semicolon; comma is the fallback.
pub fn classify_sample(sample: &[u8], threshold: usize) -> CsvFormat {
    let tabs = sample.iter().filter(|&&b| b == b'\t').count();
    let semicolons = sample.iter().filter(|&&b| b == b';').count();

    if tabs >= threshold {
        CsvFormat::Tsv
    } else if semicolons >= threshold {
        CsvFormat::Dsv
    } else {
        CsvFormat::Csv
    }
}
