//! Core data model types shared by detection, analysis and parsing.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Delimiter dialect of a delimited text source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CsvFormat {
    /// Comma-separated, double-quoted.
    #[default]
    Csv,
    /// Semicolon-separated.
    Dsv,
    /// Space-separated.
    Ssv,
    /// Tab-separated.
    Tsv,
    /// Comma-separated with quoting disabled.
    Nqcsv,
}

impl CsvFormat {
    /// Fixed delimiter/quote tuple for this format.
    pub fn dialect(self) -> Dialect {
        let (delimiter, quote) = match self {
            CsvFormat::Csv => (b',', Some(b'"')),
            CsvFormat::Dsv => (b';', Some(b'"')),
            CsvFormat::Ssv => (b' ', Some(b'"')),
            CsvFormat::Tsv => (b'\t', Some(b'"')),
            CsvFormat::Nqcsv => (b',', None),
        };
        Dialect { delimiter, quote }
    }
}

/// Delimiter and quote character used to split a physical line into cells.
///
/// `quote == None` disables quote handling entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    pub quote: Option<u8>,
}

/// A raw cell as produced by a row source.
///
/// Delimited sources only ever produce [`Cell::Text`]; spreadsheet cells keep their numeric type
/// so that whole floats can be rendered without a spurious `.0`.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Float(f64),
}

impl Cell {
    /// Numeric normalization: a float equal to its own truncation becomes its integer form.
    pub fn normalized(&self) -> Cow<'_, str> {
        match self {
            Cell::Text(s) => Cow::Borrowed(s.as_str()),
            Cell::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Cow::Owned((*f as i64).to_string())
            }
            Cell::Float(f) => Cow::Owned(f.to_string()),
        }
    }

    /// Cell text as it came from the source, before numeric normalization.
    pub fn raw_text(&self) -> Cow<'_, str> {
        match self {
            Cell::Text(s) => Cow::Borrowed(s.as_str()),
            Cell::Float(f) => Cow::Owned(format!("{f:?}")),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Float(_) => false,
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<f64> for Cell {
    fn from(f: f64) -> Self {
        Cell::Float(f)
    }
}

/// One row of raw cells, in source column order.
pub type RawRow = Vec<Cell>;

/// Inferred or manually supplied column mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ParseDefinition {
    /// Delimiter dialect used to stream the source.
    pub csv_format: CsvFormat,
    /// Field name -> 0-based column index.
    pub columns: BTreeMap<String, usize>,
    /// When `true`, the first non-blank row is a header and is never parsed as data.
    pub head: bool,
}

impl ParseDefinition {
    pub fn new(csv_format: CsvFormat, columns: BTreeMap<String, usize>, head: bool) -> Self {
        Self {
            csv_format,
            columns,
            head,
        }
    }

    /// Sufficiency rule: every required field has a column.
    pub fn is_sufficient<S: AsRef<str>>(&self, required: &[S]) -> bool {
        is_sufficient(&self.columns, required)
    }
}

/// Sufficiency rule over a bare column map.
///
/// An empty map is never sufficient, even when no field is required.
pub fn is_sufficient<S: AsRef<str>>(columns: &BTreeMap<String, usize>, required: &[S]) -> bool {
    if columns.is_empty() {
        return false;
    }
    required.iter().all(|name| columns.contains_key(name.as_ref()))
}

/// Lifecycle state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    #[default]
    Pending,
    WaitingAnalyze,
    Analyzing,
    NeedsManualAnalyze,
    Analyzed,
    WaitingParse,
    Parsing,
    Parsed,
    Error,
    Unparseable,
}

impl ParseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseStatus::Pending => "pending",
            ParseStatus::WaitingAnalyze => "waiting_analyze",
            ParseStatus::Analyzing => "analyzing",
            ParseStatus::NeedsManualAnalyze => "needs_manual_analyze",
            ParseStatus::Analyzed => "analyzed",
            ParseStatus::WaitingParse => "waiting_parse",
            ParseStatus::Parsing => "parsing",
            ParseStatus::Parsed => "parsed",
            ParseStatus::Error => "error",
            ParseStatus::Unparseable => "unparseable",
        }
    }

    /// Whether the state machine allows moving from `self` to `to`.
    ///
    /// `pending` (re-upload) and `error` are reachable from anywhere. `waiting_analyze` and
    /// `analyzing` are reachable from every state that is not already running a phase.
    pub fn can_transition_to(self, to: ParseStatus) -> bool {
        use ParseStatus::*;
        match to {
            Pending | Error => true,
            WaitingAnalyze => !self.is_busy(),
            Analyzing => !matches!(self, Analyzing | Parsing | WaitingParse),
            Analyzed | NeedsManualAnalyze | Unparseable => self == Analyzing,
            WaitingParse => matches!(self, Pending | Analyzed | NeedsManualAnalyze | Parsed),
            Parsing => self == WaitingParse,
            Parsed => self == Parsing,
        }
    }

    /// A phase is queued or running; re-triggers must be ignored.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            ParseStatus::WaitingAnalyze
                | ParseStatus::Analyzing
                | ParseStatus::WaitingParse
                | ParseStatus::Parsing
        )
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason codes recorded on rows and on the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    UnreadableFile,
    CannotParseCsv,
    UnknownField,
    NotAllRequiredFieldsSet,
    NoParseDefinition,
    NotReadyForParse,
    Unparseable,
    /// The abort policy stopped the run.
    MaxErrorsReached,
}

impl ErrorReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReason::UnreadableFile => "unreadable_file",
            ErrorReason::CannotParseCsv => "cannot_parse_csv",
            ErrorReason::UnknownField => "unknown_field",
            ErrorReason::NotAllRequiredFieldsSet => "not_all_required_fields_set",
            ErrorReason::NoParseDefinition => "no_parse_definition",
            ErrorReason::NotReadyForParse => "not_ready_for_parse",
            ErrorReason::Unparseable => "unparseable",
            ErrorReason::MaxErrorsReached => "max_errors_reached",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected row (or a stream failure) kept for operator review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseErrorRecord {
    /// 0-based line index from the row source.
    pub line: usize,
    pub raw_row: Vec<String>,
    pub reason: ErrorReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ParseErrorRecord {
    pub fn new(line: usize, raw_row: Vec<String>, reason: ErrorReason) -> Self {
        Self {
            line,
            raw_row,
            reason,
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// An accepted row: cleaned, validated values for every mapped field that resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldRecord {
    /// Original cells as text, in source column order.
    pub raw_data: Vec<String>,
    /// 0-based line index from the row source.
    pub line: usize,
    pub fields: BTreeMap<String, String>,
}

impl FieldRecord {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn sufficiency_requires_every_required_field() {
        let required = ["sku", "price"];
        assert!(is_sufficient(&map(&[("sku", 0), ("price", 1)]), &required));
        assert!(is_sufficient(&map(&[("sku", 0), ("price", 1), ("name", 2)]), &required));
        assert!(!is_sufficient(&map(&[("sku", 0), ("name", 2)]), &required));
        assert!(!is_sufficient(&BTreeMap::new(), &required));
        assert!(!is_sufficient(&BTreeMap::new(), &[] as &[&str]));
    }

    #[test]
    fn whole_floats_normalize_to_integers() {
        assert_eq!(Cell::Float(7.0).normalized(), "7");
        assert_eq!(Cell::Float(-3.0).normalized(), "-3");
        assert_eq!(Cell::Float(2.5).normalized(), "2.5");
        assert_eq!(Cell::from("7.0").normalized(), "7.0");
        assert_eq!(Cell::Float(7.0).raw_text(), "7.0");
        assert_eq!(Cell::Float(2.5).raw_text(), "2.5");
        assert!(Cell::from(" \t").is_blank());
        assert!(!Cell::Float(0.0).is_blank());
    }

    #[test]
    fn dialects() {
        assert_eq!(CsvFormat::Tsv.dialect().delimiter, b'\t');
        assert_eq!(CsvFormat::Ssv.dialect().delimiter, b' ');
        assert_eq!(CsvFormat::Nqcsv.dialect().quote, None);
        assert_eq!(CsvFormat::Dsv.dialect().quote, Some(b'"'));
    }

    #[test]
    fn busy_states_block_new_phases() {
        for busy in [
            ParseStatus::WaitingAnalyze,
            ParseStatus::Analyzing,
            ParseStatus::WaitingParse,
            ParseStatus::Parsing,
        ] {
            assert!(busy.is_busy());
            assert!(!busy.can_transition_to(ParseStatus::WaitingAnalyze));
            assert!(!busy.can_transition_to(ParseStatus::WaitingParse));
            assert!(busy.can_transition_to(ParseStatus::Error));
        }
        assert!(ParseStatus::WaitingAnalyze.can_transition_to(ParseStatus::Analyzing));
        assert!(!ParseStatus::Error.can_transition_to(ParseStatus::WaitingParse));
        assert!(ParseStatus::Error.can_transition_to(ParseStatus::Analyzing));
    }

    #[test]
    fn status_and_reason_codes_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ParseStatus::NeedsManualAnalyze).unwrap(),
            "\"needs_manual_analyze\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorReason::NotAllRequiredFieldsSet).unwrap(),
            format!("\"{}\"", ErrorReason::NotAllRequiredFieldsSet)
        );
    }
}
