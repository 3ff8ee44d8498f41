//! Bounded Iterator: drives a row stream through a [`RowParser`] under an abort policy.

use serde::{Deserialize, Serialize};

use crate::error::{ReaderError, ReaderResult};
use crate::types::{ErrorReason, FieldRecord, ParseErrorRecord, RawRow};

use super::row::{RowOutcome, RowParser};

/// When a parse run gives up.
///
/// A run aborts once `errors > max_errors`, or once at least `grace_lines` lines were read and
/// errors make up a `1 / error_ratio` share of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbortPolicy {
    pub max_errors: usize,
    pub grace_lines: usize,
    pub error_ratio: usize,
}

impl Default for AbortPolicy {
    fn default() -> Self {
        Self {
            max_errors: 100,
            grace_lines: 100,
            error_ratio: 5,
        }
    }
}

impl AbortPolicy {
    pub fn should_abort(&self, errors: usize, line: usize) -> bool {
        errors > self.max_errors || (line >= self.grace_lines && errors.saturating_mul(self.error_ratio) >= line)
    }
}

/// Receives accepted records in line order.
pub trait RecordSink {
    fn accept(&mut self, record: FieldRecord, line: usize);
}

impl<F> RecordSink for F
where
    F: FnMut(FieldRecord, usize),
{
    fn accept(&mut self, record: FieldRecord, line: usize) {
        self(record, line)
    }
}

/// Counters for one parse run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseSummary {
    /// Rows pulled from the source, blank and header rows included.
    pub lines_read: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Stopped by the [`AbortPolicy`] rather than by end of input.
    pub aborted: bool,
}

/// Feeds `rows` through `parser`, handing accepted records to `sink` and appending rejections to
/// `errors`.
///
/// The policy is checked after every row. A stream error is recorded as a
/// `cannot_parse_csv` entry and returned; records already delivered stay delivered.
pub fn drive<I, S>(
    rows: I,
    parser: &mut RowParser<'_>,
    policy: AbortPolicy,
    errors: &mut Vec<ParseErrorRecord>,
    sink: &mut S,
    progress_every: usize,
) -> ReaderResult<ParseSummary>
where
    I: IntoIterator<Item = ReaderResult<(usize, RawRow)>>,
    S: RecordSink + ?Sized,
{
    let mut summary = ParseSummary::default();

    for item in rows {
        let (line, row) = match item {
            Ok(pair) => pair,
            Err(e) => {
                let (line, details) = match &e {
                    ReaderError::CannotParseCsv { line, message } => (*line, message.clone()),
                    other => (summary.lines_read, other.to_string()),
                };
                errors.push(ParseErrorRecord::new(line, Vec::new(), ErrorReason::CannotParseCsv).with_details(details));
                return Err(e);
            }
        };
        summary.lines_read += 1;

        match parser.parse_row(&row, line) {
            RowOutcome::Accepted(record) => {
                summary.accepted += 1;
                sink.accept(record, line);
            }
            RowOutcome::Skipped(_) => {}
            RowOutcome::Rejected(err) => {
                summary.rejected += 1;
                tracing::debug!(line, reason = %err.reason, field = ?err.field, "row rejected");
                errors.push(err);
            }
        }

        if policy.should_abort(errors.len(), line) {
            tracing::warn!(line, errors = errors.len(), "too many errors, aborting parse");
            summary.aborted = true;
            break;
        }

        if progress_every > 0 && summary.lines_read % progress_every == 0 {
            tracing::info!(lines = summary.lines_read, accepted = summary.accepted, "parse progress");
        }
    }

    Ok(summary)
}
