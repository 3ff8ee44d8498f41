//! `document-reader` turns uploaded tabular files whose column layout is unknown into streams of
//! validated field records.
//!
//! A [`document::Document`] moves through two phases:
//!
//! 1. **Analyze**: detect the delimiter dialect, cache the first rows, and infer which column
//!    holds which field, either from a header row or from two consecutive rows with the same
//!    layout ([`analysis::Analyzer`]).
//! 2. **Parse**: stream every row through the field pipeline ([`parsing::RowParser`]), hand
//!    accepted records to a sink and record rejected rows on the document, stopping early when the
//!    error rate gets too high ([`parsing::AbortPolicy`]).
//!
//! The fields a document kind expects are declared in a [`registry::Registry`], either in code or
//! from JSON.
//!
//! ## What you can read
//!
//! - delimited text: comma, semicolon, tab or space separated, with or without quoting
//! - `.zip` / `.gz` archives holding such text (extracted with external tools, cached)
//! - `.xlsx` / `.xls` workbooks (converted with `xlsx2csv`, or in-process with the Cargo feature
//!   `excel`)
//!
//! ## Quick example
//!
//! ```no_run
//! use document_reader::{Document, DocumentReader, ReaderOptions, Registry, SourceRef};
//! use document_reader::types::FieldRecord;
//!
//! # fn main() -> Result<(), document_reader::ReaderError> {
//! let registry = Registry::from_json_path("kinds.json")?;
//! let reader = DocumentReader::new(registry, ReaderOptions::default())?;
//!
//! let mut doc = Document::new("7", "price_list", SourceRef::from_path("upload.csv")?);
//! reader.schedule_analyze(&mut doc, &())?;
//! if reader.schedule_parse(&mut doc, &())? {
//!     reader.parse(&mut doc, &mut |rec: FieldRecord, line: usize| {
//!         println!("{line}: {:?}", rec.fields);
//!     })?;
//! }
//! for err in &doc.parse_errors {
//!     println!("line {}: {}", err.line, err.reason);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`registry`]: column definitions and document kinds
//! - [`document`]: the document handle and its status state machine
//! - [`ingestion`]: format detection, conversion and row streaming
//! - [`analysis`]: column-layout inference
//! - [`parsing`]: the field pipeline and the bounded streaming loop
//! - [`reader`]: [`DocumentReader`], options and the scheduler interface
//! - [`types`]: shared value types
//! - [`error`]: error types used across the crate

pub mod analysis;
pub mod document;
pub mod error;
pub mod ingestion;
pub mod parsing;
pub mod reader;
pub mod registry;
pub mod types;

pub use document::{Document, SourceRef};
pub use error::{ReaderError, ReaderResult};
pub use reader::{DocumentReader, ReaderOptions, Scheduler};
pub use registry::Registry;
