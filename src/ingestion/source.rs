//! Row Source: resolves a document to a delimited text file and streams its rows.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use csv::ByteRecord;
use encoding_rs::Encoding;

use crate::document::Document;
use crate::error::{ReaderError, ReaderResult};
use crate::types::{Cell, Dialect, RawRow};

use super::convert::{SourceConverter, SourceKind, cache_path};

/// Resolves documents to row-iterable paths, converting through a [`SourceConverter`] when needed.
pub struct RowSource<'a> {
    converter: &'a dyn SourceConverter,
    cache_dir: &'a Path,
    fallback_encoding: &'static Encoding,
}

impl<'a> RowSource<'a> {
    pub fn new(
        converter: &'a dyn SourceConverter,
        cache_dir: &'a Path,
        fallback_encoding: &'static Encoding,
    ) -> Self {
        Self {
            converter,
            cache_dir,
            fallback_encoding,
        }
    }

    /// Path of delimited text for `doc`.
    ///
    /// Archives and spreadsheets are converted once into a cache file keyed on the document id;
    /// an existing cache file is reused without invoking the converter.
    pub fn resolve(&self, doc: &Document) -> ReaderResult<PathBuf> {
        let source = doc.source.as_ref().ok_or_else(|| ReaderError::UnreadableFile {
            path: String::new(),
            message: format!("document {} has no source", doc.id),
        })?;
        let ext = source.extension();
        let kind = SourceKind::from_extension(ext.as_deref());
        if kind == SourceKind::Delimited {
            return Ok(source.path().to_path_buf());
        }

        let cached = cache_path(self.cache_dir, &doc.id, kind);
        if cached.exists() {
            tracing::debug!(document = %doc.id, path = %cached.display(), "reusing cached conversion");
            return Ok(cached);
        }

        let ext = ext.unwrap_or_default();
        tracing::info!(document = %doc.id, from = %source.path().display(), to = %cached.display(), ?kind, "converting source");
        match kind {
            SourceKind::Archive => self.converter.extract(source.path(), &ext, &cached)?,
            SourceKind::Spreadsheet => self.converter.convert_to_csv(source.path(), &ext, &cached)?,
            SourceKind::Delimited => {}
        }

        if cached.exists() {
            Ok(cached)
        } else {
            Err(ReaderError::Conversion {
                path: source.path().display().to_string(),
                message: "converter produced no output".to_string(),
            })
        }
    }

    /// Resolves `doc` and opens a row stream over it.
    pub fn open(&self, doc: &Document, dialect: Dialect) -> ReaderResult<RowStream> {
        let path = self.resolve(doc)?;
        RowStream::open(&path, dialect, self.fallback_encoding)
    }
}

/// Sequential stream of `(line, row)` pairs with a 0-based line counter.
///
/// The first decoding or quoting error is yielded as [`ReaderError::CannotParseCsv`]; the stream is
/// fused afterwards. Rows yielded before the failure remain valid.
///
/// The `csv` reader accepts malformed quoting, so with a quoting dialect each record's raw bytes
/// are re-scanned from a second handle on the same file.
pub struct RowStream {
    reader: csv::Reader<File>,
    record: ByteRecord,
    line: usize,
    fallback_encoding: &'static Encoding,
    failed: bool,
    dialect: Dialect,
    raw: Option<BufReader<File>>,
    raw_pos: u64,
    scan: Vec<u8>,
}

impl RowStream {
    pub fn open(path: &Path, dialect: Dialect, fallback_encoding: &'static Encoding) -> ReaderResult<Self> {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(dialect.delimiter);
        match dialect.quote {
            Some(q) => builder.quote(q),
            None => builder.quoting(false),
        };
        let reader = builder
            .from_path(path)
            .map_err(|e| ReaderError::unreadable(path, e))?;
        let raw = match dialect.quote {
            Some(_) => Some(BufReader::new(
                File::open(path).map_err(|e| ReaderError::unreadable(path, e))?,
            )),
            None => None,
        };
        tracing::debug!(path = %path.display(), delimiter = %(dialect.delimiter as char), "opened row stream");

        Ok(Self {
            reader,
            record: ByteRecord::new(),
            line: 0,
            fallback_encoding,
            failed: false,
            dialect,
            raw,
            raw_pos: 0,
            scan: Vec::new(),
        })
    }

    /// Reads up to `limit` rows as trimmed text.
    pub fn take_text_rows(&mut self, limit: usize) -> ReaderResult<Vec<Vec<String>>> {
        let mut rows = Vec::with_capacity(limit);
        for item in self.by_ref().take(limit) {
            let (_, row) = item?;
            rows.push(row.iter().map(|c| c.normalized().trim().to_string()).collect());
        }
        Ok(rows)
    }

    /// Scans the raw bytes consumed by the last record for quoting errors.
    fn check_quoting(&mut self) -> ReaderResult<()> {
        let (Some(raw), Some(quote)) = (self.raw.as_mut(), self.dialect.quote) else {
            return Ok(());
        };
        let end = self.reader.position().byte();
        self.scan.clear();
        raw.take(end.saturating_sub(self.raw_pos))
            .read_to_end(&mut self.scan)?;

        let mut bytes = self.scan.as_slice();
        if self.raw_pos == 0 {
            bytes = bytes.strip_prefix(b"\xef\xbb\xbf".as_slice()).unwrap_or(bytes);
        }
        self.raw_pos = end;
        scan_quoting(bytes, self.dialect.delimiter, quote).map_err(|message| ReaderError::CannotParseCsv {
            line: self.line,
            message: message.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> String {
        match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                let (text, _) = self.fallback_encoding.decode_without_bom_handling(bytes);
                text.into_owned()
            }
        }
    }
}

impl Iterator for RowStream {
    type Item = ReaderResult<(usize, RawRow)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.read_byte_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => {
                if let Err(e) = self.check_quoting() {
                    self.failed = true;
                    tracing::error!(line = self.line, error = %e, "row stream failed");
                    return Some(Err(e));
                }
                let line = self.line;
                let mut row: RawRow = self.record.iter().map(|b| Cell::Text(self.decode(b))).collect();
                if line == 0 {
                    if let Some(Cell::Text(first)) = row.first_mut() {
                        if let Some(stripped) = first.strip_prefix('\u{feff}') {
                            *first = stripped.to_string();
                        }
                    }
                }
                self.line += 1;
                Some(Ok((line, row)))
            }
            Err(e) => {
                self.failed = true;
                tracing::error!(line = self.line, error = %e, "row stream failed");
                Some(Err(ReaderError::CannotParseCsv {
                    line: self.line,
                    message: e.to_string(),
                }))
            }
        }
    }
}

/// Strict quoting rules over raw record bytes: a quoted field runs to a closing quote (doubled
/// quotes escape), and only a delimiter or line end may follow it.
fn scan_quoting(raw: &[u8], delimiter: u8, quote: u8) -> Result<(), &'static str> {
    let mut i = 0;
    let mut field_start = true;
    while i < raw.len() {
        let b = raw[i];
        if field_start && b == quote {
            i += 1;
            loop {
                match raw.get(i) {
                    None => return Err("unclosed quoted field"),
                    Some(&c) if c == quote => {
                        if raw.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    Some(_) => i += 1,
                }
            }
            match raw.get(i) {
                Some(&c) if c != delimiter && c != b'\n' && c != b'\r' => {
                    return Err("unexpected text after closing quote");
                }
                _ => {}
            }
            field_start = false;
            continue;
        }
        field_start = b == delimiter || b == b'\n' || b == b'\r';
        i += 1;
    }
    Ok(())
}
