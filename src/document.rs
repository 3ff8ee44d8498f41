//! The document handle: source reference plus all mutable parse state.
//!
//! The host application owns persistence; a [`Document`] is serde-serializable so the host can
//! store it however it likes. All state is scoped to one instance.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReaderError, ReaderResult};
use crate::types::{CsvFormat, ErrorReason, ParseDefinition, ParseErrorRecord, ParseStatus};

/// Reference to the uploaded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Where the bytes live on disk.
    pub path: PathBuf,
    /// Name the file was uploaded under; decides the extension.
    pub filename: String,
    pub byte_size: u64,
}

impl SourceRef {
    pub fn new(path: impl Into<PathBuf>, filename: impl Into<String>, byte_size: u64) -> Self {
        Self {
            path: path.into(),
            filename: filename.into(),
            byte_size,
        }
    }

    /// Builds a reference from a file on disk, using its own name and size.
    pub fn from_path(path: impl AsRef<Path>) -> ReaderResult<Self> {
        let path = path.as_ref();
        let byte_size = fs::metadata(path)?.len();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(path, filename, byte_size))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// Lowercased extension of the uploaded filename, without the dot.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

/// An uploaded document and its parse state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Identity used to key cached artifacts and scheduler calls.
    pub id: String,
    /// Registry key of the document kind.
    pub kind: String,
    pub source: Option<SourceRef>,
    pub parse_status: ParseStatus,
    pub parse_definition: Option<ParseDefinition>,
    /// Detected delimiter dialect of the resolved source.
    pub source_format: Option<CsvFormat>,
    pub parse_errors: Vec<ParseErrorRecord>,
    /// Reason the last phase ended in `error` or `unparseable`.
    pub document_error: Option<ErrorReason>,
    pub parse_started_at: Option<DateTime<Utc>>,
    pub parse_finished_at: Option<DateTime<Utc>>,
    pub parse_analyzed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    parse_first_rows: Option<Vec<Vec<String>>>,
}

impl Document {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, source: SourceRef) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            source: Some(source),
            parse_status: ParseStatus::Pending,
            parse_definition: None,
            source_format: None,
            parse_errors: Vec::new(),
            document_error: None,
            parse_started_at: None,
            parse_finished_at: None,
            parse_analyzed_at: None,
            parse_first_rows: None,
        }
    }

    pub fn status(&self) -> ParseStatus {
        self.parse_status
    }

    /// Moves to `to` if the state machine allows it.
    pub fn transition(&mut self, to: ParseStatus) -> ReaderResult<()> {
        if !self.parse_status.can_transition_to(to) {
            return Err(ReaderError::InvalidTransition {
                from: self.parse_status,
                to,
            });
        }
        tracing::debug!(document = %self.id, from = %self.parse_status, to = %to, "status transition");
        self.parse_status = to;
        Ok(())
    }

    /// Ends the current phase in `error`.
    pub fn fail(&mut self, reason: ErrorReason) {
        tracing::warn!(document = %self.id, from = %self.parse_status, reason = %reason, "document failed");
        self.document_error = Some(reason);
        self.parse_status = ParseStatus::Error;
    }

    /// Cached first rows, if they have been read.
    pub fn first_rows(&self) -> Option<&[Vec<String>]> {
        self.parse_first_rows.as_deref()
    }

    /// Stores the first rows unless already cached; returns the cached value either way.
    pub fn cache_first_rows(&mut self, rows: Vec<Vec<String>>) -> &[Vec<String>] {
        self.parse_first_rows.get_or_insert(rows)
    }

    /// Clears everything an analysis run recomputes.
    pub(crate) fn reset_analysis(&mut self) {
        self.parse_definition = None;
        self.parse_analyzed_at = None;
        self.parse_first_rows = None;
        self.parse_errors.clear();
        self.document_error = None;
    }

    /// Clears all parse state for a re-upload.
    pub(crate) fn reset(&mut self) {
        self.reset_analysis();
        self.source_format = None;
        self.parse_started_at = None;
        self.parse_finished_at = None;
        self.parse_status = ParseStatus::Pending;
    }

    /// A parse run has started and not finished.
    pub fn is_processing(&self) -> bool {
        self.parse_started_at.is_some() && self.parse_finished_at.is_none()
    }

    /// A definition exists, was accepted, and no run has started yet.
    pub fn ready_for_parse(&self) -> bool {
        self.parse_definition.is_some() && self.parse_analyzed_at.is_some() && self.parse_started_at.is_none()
    }

    /// Whether a non-empty definition is already attached.
    pub fn has_definition(&self) -> bool {
        self.parse_definition
            .as_ref()
            .is_some_and(|d| !d.columns.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new("42", "price_list", SourceRef::new("/tmp/x.csv", "Prices.CSV", 10))
    }

    #[test]
    fn extension_is_lowercased_from_uploaded_name() {
        assert_eq!(doc().source.unwrap().extension().as_deref(), Some("csv"));
        let no_ext = SourceRef::new("/tmp/x", "README", 1);
        assert_eq!(no_ext.extension(), None);
    }

    #[test]
    fn first_rows_are_cached_once() {
        let mut d = doc();
        assert!(d.first_rows().is_none());
        d.cache_first_rows(vec![vec!["a".into()]]);
        let cached = d.cache_first_rows(vec![vec!["b".into()]]).to_vec();
        assert_eq!(cached, vec![vec!["a".to_string()]]);
    }

    #[test]
    fn state_machine_rejects_parse_before_waiting() {
        let mut d = doc();
        assert!(matches!(
            d.transition(ParseStatus::Parsing),
            Err(ReaderError::InvalidTransition { .. })
        ));
        d.transition(ParseStatus::Analyzing).unwrap();
        d.transition(ParseStatus::Analyzed).unwrap();
        d.transition(ParseStatus::WaitingParse).unwrap();
        d.transition(ParseStatus::Parsing).unwrap();
        assert!(d.transition(ParseStatus::Analyzing).is_err());
        d.transition(ParseStatus::Parsed).unwrap();
    }

    #[test]
    fn error_and_unparseable_require_a_retrigger() {
        let mut d = doc();
        d.transition(ParseStatus::Analyzing).unwrap();
        d.transition(ParseStatus::Unparseable).unwrap();
        assert!(d.transition(ParseStatus::WaitingParse).is_err());
        d.transition(ParseStatus::Analyzing).unwrap();

        d.fail(ErrorReason::UnreadableFile);
        assert_eq!(d.status(), ParseStatus::Error);
        assert!(d.transition(ParseStatus::WaitingParse).is_err());
        d.reset();
        assert_eq!(d.status(), ParseStatus::Pending);
        assert!(d.document_error.is_none());
    }
}
