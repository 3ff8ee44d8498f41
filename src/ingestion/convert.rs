//! Archive extraction and spreadsheet conversion collaborators.
//!
//! Converters are idempotent and may fail silently: the row source only trusts the existence of
//! the cache file afterwards. Implementations must therefore write to a temporary name and rename
//! into place, so an existing cache file always means a complete conversion.

use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use glob::Pattern;

use crate::error::{ReaderError, ReaderResult};

/// How an uploaded file becomes row-iterable text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `.zip` / `.gz`: extracted to a cached text file.
    Archive,
    /// `.xlsx` / `.xls`: converted to a cached comma-delimited file.
    Spreadsheet,
    /// Anything else is read in place.
    Delimited,
}

impl SourceKind {
    /// Classifies by extension (case-insensitive).
    pub fn from_extension(ext: Option<&str>) -> Self {
        match ext.map(str::to_ascii_lowercase).as_deref() {
            Some("zip" | "gz") => Self::Archive,
            Some("xlsx" | "xls") => Self::Spreadsheet,
            _ => Self::Delimited,
        }
    }

    /// Cache file suffix for converted output.
    pub fn cache_suffix(self) -> &'static str {
        match self {
            Self::Archive => "txt",
            Self::Spreadsheet | Self::Delimited => "csv",
        }
    }
}

/// Deterministic cache path for a document's converted source.
pub fn cache_path(cache_dir: &Path, document_id: &str, kind: SourceKind) -> PathBuf {
    cache_dir.join(format!("uploaded-file-{document_id}.{}", kind.cache_suffix()))
}

/// Removes every cached artifact for `document_id`. Returns how many files were removed.
pub fn purge_cache(cache_dir: &Path, document_id: &str) -> ReaderResult<usize> {
    let pattern = cache_dir.join(format!("uploaded-file-{}.*", Pattern::escape(document_id)));
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern).map_err(|e| ReaderError::InvalidConfig {
        message: format!("bad cache pattern '{pattern}': {e}"),
    })?;

    let mut removed = 0;
    for entry in entries.flatten() {
        fs::remove_file(&entry)?;
        tracing::debug!(path = %entry.display(), "removed cached artifact");
        removed += 1;
    }
    Ok(removed)
}

/// External collaborator turning archives and spreadsheets into plain text.
pub trait SourceConverter: Send + Sync {
    /// Extracts the text payload of `archive` into `dest`.
    fn extract(&self, archive: &Path, extension: &str, dest: &Path) -> ReaderResult<()>;

    /// Converts the first worksheet of `workbook` into comma-delimited text at `dest`.
    fn convert_to_csv(&self, workbook: &Path, extension: &str, dest: &Path) -> ReaderResult<()>;
}

/// Shells out to `unzip`, `gzip` and `xlsx2csv`.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    pub unzip: String,
    pub gzip: String,
    pub xlsx2csv: String,
    /// Zip entries tried in order; the first pattern with a match wins.
    pub entry_patterns: Vec<String>,
}

impl Default for CommandConverter {
    fn default() -> Self {
        Self {
            unzip: "unzip".to_string(),
            gzip: "gzip".to_string(),
            xlsx2csv: "xlsx2csv".to_string(),
            entry_patterns: vec!["*.txt".to_string(), "*.csv".to_string()],
        }
    }
}

impl CommandConverter {
    /// Picks the zip entry to extract from a listing.
    pub fn select_entry<'a>(&self, entries: &[&'a str]) -> Option<&'a str> {
        self.entry_patterns.iter().find_map(|p| {
            let pattern = Pattern::new(p).ok()?;
            entries.iter().copied().find(|e| pattern.matches(e))
        })
    }

    fn run(&self, program: &str, args: &[&OsStr]) -> ReaderResult<Vec<u8>> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(ReaderError::Conversion {
                path: args
                    .last()
                    .map(|a| a.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                message: format!(
                    "{program} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(output.stdout)
    }
}

impl SourceConverter for CommandConverter {
    fn extract(&self, archive: &Path, extension: &str, dest: &Path) -> ReaderResult<()> {
        let payload = if extension.eq_ignore_ascii_case("gz") {
            self.run(&self.gzip, &[OsStr::new("-dc"), archive.as_os_str()])?
        } else {
            let listing = self.run(&self.unzip, &[OsStr::new("-Z1"), archive.as_os_str()])?;
            let listing = String::from_utf8_lossy(&listing);
            let entries: Vec<&str> = listing.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
            let Some(entry) = self.select_entry(&entries) else {
                tracing::warn!(archive = %archive.display(), "archive has no text entry");
                return Ok(());
            };
            self.run(&self.unzip, &[OsStr::new("-p"), archive.as_os_str(), OsStr::new(entry)])?
        };
        write_atomically(dest, &payload)
    }

    fn convert_to_csv(&self, workbook: &Path, _extension: &str, dest: &Path) -> ReaderResult<()> {
        let partial = partial_path(dest);
        self.run(&self.xlsx2csv, &[workbook.as_os_str(), partial.as_os_str()])?;
        if partial.exists() {
            fs::rename(&partial, dest)?;
        }
        Ok(())
    }
}

pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

pub(crate) fn write_atomically(dest: &Path, bytes: &[u8]) -> ReaderResult<()> {
    let partial = partial_path(dest);
    let mut file = fs::File::create(&partial)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&partial, dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_from_extension() {
        assert_eq!(SourceKind::from_extension(Some("ZIP")), SourceKind::Archive);
        assert_eq!(SourceKind::from_extension(Some("gz")), SourceKind::Archive);
        assert_eq!(SourceKind::from_extension(Some("xls")), SourceKind::Spreadsheet);
        assert_eq!(SourceKind::from_extension(Some("txt")), SourceKind::Delimited);
        assert_eq!(SourceKind::from_extension(None), SourceKind::Delimited);
    }

    #[test]
    fn zip_entry_prefers_txt_over_csv() {
        let conv = CommandConverter::default();
        let entries = ["readme.md", "data.csv", "dump/export.txt"];
        assert_eq!(conv.select_entry(&entries), Some("dump/export.txt"));
        assert_eq!(conv.select_entry(&["a.csv", "b.csv"]), Some("a.csv"));
        assert_eq!(conv.select_entry(&["image.png"]), None);
    }

    #[test]
    fn cache_path_is_keyed_on_document_identity() {
        let dir = Path::new("/var/cache/reader");
        assert_eq!(
            cache_path(dir, "17", SourceKind::Archive),
            PathBuf::from("/var/cache/reader/uploaded-file-17.txt")
        );
        assert_eq!(
            cache_path(dir, "17", SourceKind::Spreadsheet),
            PathBuf::from("/var/cache/reader/uploaded-file-17.csv")
        );
    }
}
