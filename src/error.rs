use thiserror::Error;

use crate::types::{ErrorReason, ParseStatus};

/// Convenience result type for analysis and parsing operations.
pub type ReaderResult<T> = Result<T, ReaderError>;

/// Error type returned by the reader.
///
/// Hard failures halt the current phase and put the document into `error` (or `unparseable`).
/// Row-level problems are never returned as errors; they are recorded as
/// [`crate::types::ParseErrorRecord`]s on the document instead.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer/reader error outside of row streaming (e.g. writing a conversion cache file).
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "excel")]
    /// Spreadsheet conversion error (feature-gated behind `excel`).
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),

    /// A column definition carries an invalid pattern.
    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration could not be decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The source file could not be read for format detection.
    #[error("unreadable file '{path}': {message}")]
    UnreadableFile { path: String, message: String },

    /// The row stream hit a decoding or quoting error.
    #[error("cannot parse csv row at line {line}: {message}")]
    CannotParseCsv { line: usize, message: String },

    /// Archive extraction or spreadsheet conversion did not produce a file.
    #[error("conversion of '{path}' failed: {message}")]
    Conversion { path: String, message: String },

    /// Parsing was requested for a document without a parse definition.
    #[error("document has no parse definition")]
    NoParseDefinition,

    /// The parse definition does not map every required field.
    #[error("parse definition does not map every required field")]
    NotReadyForParse,

    /// The registry has no column definitions for the document kind.
    #[error("document kind '{kind}' has no column definitions")]
    Unparseable { kind: String },

    /// The document names a kind the registry does not know.
    #[error("unknown document kind '{kind}'")]
    UnknownKind { kind: String },

    /// The requested status change is not allowed by the state machine.
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: ParseStatus, to: ParseStatus },

    /// Options or column definitions are inconsistent.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl ReaderError {
    /// Reason code persisted on the document when this error halts a phase.
    pub fn reason(&self) -> ErrorReason {
        match self {
            ReaderError::Io(_) | ReaderError::UnreadableFile { .. } | ReaderError::Conversion { .. } => {
                ErrorReason::UnreadableFile
            }
            ReaderError::NoParseDefinition => ErrorReason::NoParseDefinition,
            ReaderError::NotReadyForParse => ErrorReason::NotReadyForParse,
            ReaderError::Unparseable { .. } | ReaderError::UnknownKind { .. } => ErrorReason::Unparseable,
            _ => ErrorReason::CannotParseCsv,
        }
    }

    pub(crate) fn unreadable(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        ReaderError::UnreadableFile {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}
