//! Row-level parsing.
//!
//! - [`row`]: the field pipeline applied to each raw row
//! - [`stream`]: abort policy and the loop that drives a row stream through the pipeline

pub mod row;
pub mod stream;

pub use row::{RowOutcome, RowParser, SkipReason, clean_value, strip_symmetric_quotes};
pub use stream::{AbortPolicy, ParseSummary, RecordSink, drive};
