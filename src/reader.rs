//! Document-level entry points.
//!
//! [`DocumentReader`] ties the pieces together for one [`Document`] at a time:
//!
//! - [`DocumentReader::schedule_analyze`]: inline analysis for small files, otherwise
//!   `waiting_analyze` plus a [`Scheduler`] call
//! - [`DocumentReader::analyze`]: format detection, first-row sampling and column inference
//! - [`DocumentReader::set_columns`]: manual mapping from an inverted column list
//! - [`DocumentReader::schedule_parse`] / [`DocumentReader::parse`]: guarded parse run
//! - [`DocumentReader::for_each_row`]: the bounded streaming loop on its own
//!
//! When [`ReaderOptions::observer`] is set, analysis outcomes, parse summaries and phase failures
//! are reported to it; failures at or above [`ReaderOptions::alert_at_or_above`] also raise
//! `on_alert`.
//!
//! ```no_run
//! use document_reader::document::{Document, SourceRef};
//! use document_reader::reader::{DocumentReader, ReaderOptions};
//! use document_reader::registry::{ColumnDefinition, ColumnSet, Registry, Validation};
//! use document_reader::types::FieldRecord;
//!
//! # fn main() -> Result<(), document_reader::ReaderError> {
//! let registry = Registry::new().with_kind(ColumnSet::new(
//!     "price_list",
//!     vec![
//!         ColumnDefinition::new("sku").required().pattern(r"^\w+$")?.head(r"(?i)^sku$")?,
//!         ColumnDefinition::new("price").required().validation(Validation::Float).head(r"(?i)price")?,
//!     ],
//! ));
//! let reader = DocumentReader::new(registry, ReaderOptions::default())?;
//!
//! let mut doc = Document::new("1", "price_list", SourceRef::from_path("prices.csv")?);
//! reader.analyze(&mut doc)?;
//! reader.schedule_parse(&mut doc, &())?;
//! let summary = reader.parse(&mut doc, &mut |rec: FieldRecord, _line: usize| {
//!     println!("{:?}", rec.fields);
//! })?;
//! println!("accepted={} rejected={}", summary.accepted, summary.rejected);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use encoding_rs::Encoding;
use serde::Deserialize;

use crate::analysis::{AnalysisOutcome, Analyzer};
use crate::document::{Document, SourceRef};
use crate::error::{ReaderError, ReaderResult};
use crate::ingestion::{
    DetectOptions, Phase, ReaderContext, ReaderObserver, ReaderSeverity, RowSource, RowStream, SourceConverter,
    detect_format, purge_cache,
};
use crate::parsing::{AbortPolicy, ParseSummary, RecordSink, RowParser, drive};
use crate::registry::{DocumentKind, Registry};
use crate::types::{Dialect, ErrorReason, ParseDefinition, ParseErrorRecord, ParseStatus, is_sufficient};

/// Host-side job queue for deferred phases.
///
/// Delivery, retries and at-most-one-in-flight are the implementor's concern.
pub trait Scheduler {
    fn schedule_analyze(&self, document_id: &str);
    fn schedule_parse(&self, document_id: &str);
}

/// Runs nothing; for hosts that drive phases synchronously.
impl Scheduler for () {
    fn schedule_analyze(&self, _document_id: &str) {}
    fn schedule_parse(&self, _document_id: &str) {}
}

/// Tunables for a [`DocumentReader`].
///
/// Use [`Default`] for common cases, or load from JSON with [`ReaderOptions::from_json_path`];
/// missing keys take their default.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Where extracted/converted sources are cached.
    pub cache_dir: PathBuf,
    /// Sources smaller than this are analyzed inline by `schedule_analyze`.
    pub inline_analyze_max_bytes: u64,
    /// Rows cached on the document for analysis.
    pub first_rows: usize,
    /// Rows the analyzer examines.
    pub sample_rows: usize,
    pub detect_lines: usize,
    pub detect_threshold: usize,
    /// WHATWG label of the encoding used for cells that are not valid UTF-8.
    pub fallback_encoding: String,
    pub abort: AbortPolicy,
    /// Rows between progress log lines; `0` disables them.
    pub progress_every: usize,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: ReaderSeverity,
    /// Optional observer for outcomes and alerts.
    #[serde(skip)]
    pub observer: Option<Arc<dyn ReaderObserver>>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir(),
            inline_analyze_max_bytes: 200_000,
            first_rows: 11,
            sample_rows: 10,
            detect_lines: 3,
            detect_threshold: 6,
            fallback_encoding: "windows-1251".to_string(),
            abort: AbortPolicy::default(),
            progress_every: 10_000,
            alert_at_or_above: ReaderSeverity::Critical,
            observer: None,
        }
    }
}

impl fmt::Debug for ReaderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderOptions")
            .field("cache_dir", &self.cache_dir)
            .field("inline_analyze_max_bytes", &self.inline_analyze_max_bytes)
            .field("first_rows", &self.first_rows)
            .field("sample_rows", &self.sample_rows)
            .field("detect_lines", &self.detect_lines)
            .field("detect_threshold", &self.detect_threshold)
            .field("fallback_encoding", &self.fallback_encoding)
            .field("abort", &self.abort)
            .field("progress_every", &self.progress_every)
            .field("alert_at_or_above", &self.alert_at_or_above)
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

impl ReaderOptions {
    pub fn from_json_str(json: &str) -> ReaderResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> ReaderResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ReaderError::unreadable(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn detect_options(&self) -> DetectOptions {
        DetectOptions {
            lines: self.detect_lines,
            threshold: self.detect_threshold,
        }
    }

    /// Resolves [`Self::fallback_encoding`].
    pub fn encoding(&self) -> ReaderResult<&'static Encoding> {
        Encoding::for_label(self.fallback_encoding.as_bytes()).ok_or_else(|| ReaderError::InvalidConfig {
            message: format!("unknown fallback encoding '{}'", self.fallback_encoding),
        })
    }
}

/// Analysis and parsing for documents of the kinds in a [`Registry`].
///
/// Holds no per-document state; one reader can serve any number of documents, each driven by at
/// most one phase at a time.
pub struct DocumentReader {
    registry: Registry,
    options: ReaderOptions,
    encoding: &'static Encoding,
    converter: Arc<dyn SourceConverter>,
}

impl fmt::Debug for DocumentReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentReader")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("encoding", &self.encoding.name())
            .finish()
    }
}

impl DocumentReader {
    /// Creates a reader with the default converter: external tools for archives, and for
    /// spreadsheets either `calamine` (feature `excel`) or `xlsx2csv`.
    pub fn new(registry: Registry, options: ReaderOptions) -> ReaderResult<Self> {
        let encoding = options.encoding()?;
        Ok(Self {
            registry,
            options,
            encoding,
            converter: default_converter(),
        })
    }

    pub fn with_converter(mut self, converter: Arc<dyn SourceConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Registered kind of `doc`.
    pub fn kind_for(&self, doc: &Document) -> ReaderResult<&dyn DocumentKind> {
        self.registry
            .get(&doc.kind)
            .map(|k| k.as_ref())
            .ok_or_else(|| ReaderError::UnknownKind { kind: doc.kind.clone() })
    }

    fn row_source(&self) -> RowSource<'_> {
        RowSource::new(self.converter.as_ref(), &self.options.cache_dir, self.encoding)
    }

    /// Starts analysis for `doc`. Returns `false` when a phase is already queued or running, or
    /// when `doc` already carries a non-empty mapping (inferred or set by hand).
    ///
    /// - a kind with a default parse definition skips inference and goes to `waiting_parse`
    /// - sources below `inline_analyze_max_bytes` are analyzed before returning
    /// - larger sources move to `waiting_analyze` and are handed to `scheduler`
    pub fn schedule_analyze(&self, doc: &mut Document, scheduler: &dyn Scheduler) -> ReaderResult<bool> {
        if doc.status().is_busy() {
            tracing::debug!(document = %doc.id, status = %doc.status(), "analysis already in flight");
            return Ok(false);
        }
        if doc.has_definition() {
            tracing::debug!(document = %doc.id, "parse definition already present");
            return Ok(false);
        }

        if let Some(definition) = self
            .registry
            .get(&doc.kind)
            .and_then(|k| k.default_parse_definition())
        {
            doc.transition(ParseStatus::Analyzing)?;
            doc.reset_analysis();
            doc.parse_definition = Some(definition.clone());
            doc.parse_analyzed_at = Some(Utc::now());
            doc.transition(ParseStatus::Analyzed)?;
            tracing::info!(document = %doc.id, "using default parse definition");
            self.notify_analyzed(doc, &AnalysisOutcome::Analyzed(definition));
            return self.schedule_parse(doc, scheduler);
        }

        let size = doc.source.as_ref().map_or(0, SourceRef::byte_size);
        if size < self.options.inline_analyze_max_bytes {
            self.analyze(doc)?;
        } else {
            doc.transition(ParseStatus::WaitingAnalyze)?;
            tracing::info!(document = %doc.id, size, "analysis deferred");
            scheduler.schedule_analyze(&doc.id);
        }
        Ok(true)
    }

    /// Infers a parse definition for `doc`.
    ///
    /// Unknown kinds and kinds without column definitions end in `unparseable`; an inference that
    /// finds nothing ends in `needs_manual_analyze` with an empty mapping. Unreadable sources and
    /// stream failures put the document into `error` and are returned.
    pub fn analyze(&self, doc: &mut Document) -> ReaderResult<AnalysisOutcome> {
        let ctx = context(doc, Phase::Analyze);
        let result = self.run_analysis(doc);
        match &result {
            Ok(outcome) => self.notify_analyzed(doc, outcome),
            Err(e) => self.report_failure(&ctx, e),
        }
        result
    }

    fn run_analysis(&self, doc: &mut Document) -> ReaderResult<AnalysisOutcome> {
        doc.transition(ParseStatus::Analyzing)?;
        doc.reset_analysis();

        let kind = match self.registry.get(&doc.kind) {
            Some(kind) if !kind.column_definitions().is_empty() => kind.as_ref(),
            _ => {
                tracing::warn!(document = %doc.id, kind = %doc.kind, "no column definitions for kind");
                doc.transition(ParseStatus::Unparseable)?;
                doc.document_error = Some(ErrorReason::Unparseable);
                return Ok(AnalysisOutcome::Unparseable);
            }
        };

        let path = match self.row_source().resolve(doc) {
            Ok(path) => path,
            Err(e) => return halt(doc, e),
        };
        let extension = doc.source.as_ref().and_then(SourceRef::extension);
        let format = match detect_format(&path, extension.as_deref(), self.options.detect_options()) {
            Ok(format) => format,
            Err(e) => return halt(doc, e),
        };
        doc.source_format = Some(format);
        tracing::debug!(document = %doc.id, ?format, "format detected");

        let rows = match self.read_first_rows(&path, format.dialect()) {
            Ok(rows) => rows,
            Err(e) => {
                if let ReaderError::CannotParseCsv { line, message } = &e {
                    doc.parse_errors.push(
                        ParseErrorRecord::new(*line, Vec::new(), ErrorReason::CannotParseCsv).with_details(message.as_str()),
                    );
                }
                return halt(doc, e);
            }
        };

        let inferred = Analyzer::new(kind, self.options.sample_rows).infer(doc.cache_first_rows(rows));
        let outcome = match inferred {
            Some(inference) => {
                let definition = ParseDefinition::new(format, inference.columns, inference.head);
                doc.parse_definition = Some(definition.clone());
                doc.parse_analyzed_at = Some(Utc::now());
                doc.transition(ParseStatus::Analyzed)?;
                AnalysisOutcome::Analyzed(definition)
            }
            None => {
                doc.parse_definition = Some(ParseDefinition::new(format, BTreeMap::new(), false));
                doc.transition(ParseStatus::NeedsManualAnalyze)?;
                AnalysisOutcome::NeedsManualAnalyze
            }
        };
        tracing::info!(document = %doc.id, outcome = outcome.status().as_str(), "analysis finished");
        Ok(outcome)
    }

    fn read_first_rows(&self, path: &Path, dialect: Dialect) -> ReaderResult<Vec<Vec<String>>> {
        let mut stream = RowStream::open(path, dialect, self.encoding)?;
        stream.take_text_rows(self.options.first_rows)
    }

    /// Applies a manual mapping given as an inverted column list: position `i` names the field in
    /// column `i`, blank or `None` for unmapped columns. The first occurrence of a name wins.
    ///
    /// Returns whether the mapping is sufficient; only a sufficient mapping stamps
    /// `parse_analyzed_at`. Ignored (returns `false`) while a phase is queued or running.
    pub fn set_columns(&self, doc: &mut Document, columns: &[Option<String>]) -> ReaderResult<bool> {
        if doc.status().is_busy() {
            tracing::debug!(document = %doc.id, status = %doc.status(), "mapping change ignored while busy");
            return Ok(false);
        }
        let required = self.kind_for(doc)?.required_fields();

        let mut mapping = BTreeMap::new();
        for (idx, name) in columns.iter().enumerate() {
            let Some(name) = name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
                continue;
            };
            mapping.entry(name.to_string()).or_insert(idx);
        }

        let sufficient = is_sufficient(&mapping, &required);
        let previous = doc.parse_definition.take();
        let format = previous
            .as_ref()
            .map(|d| d.csv_format)
            .or(doc.source_format)
            .unwrap_or_default();
        let head = previous.is_some_and(|d| d.head);

        doc.parse_definition = Some(ParseDefinition::new(format, mapping, head));
        doc.parse_analyzed_at = sufficient.then(Utc::now);
        tracing::info!(document = %doc.id, sufficient, "manual mapping set");
        Ok(sufficient)
    }

    /// Queues a parse run. Returns `false` when a phase is already queued or running.
    ///
    /// Fails without touching the status when `doc` has no definition or the definition does not
    /// map every required field.
    pub fn schedule_parse(&self, doc: &mut Document, scheduler: &dyn Scheduler) -> ReaderResult<bool> {
        if doc.status().is_busy() {
            tracing::debug!(document = %doc.id, status = %doc.status(), "parse already in flight");
            return Ok(false);
        }
        let required = self.kind_for(doc)?.required_fields();
        let Some(definition) = doc.parse_definition.as_ref() else {
            return Err(ReaderError::NoParseDefinition);
        };
        if !definition.is_sufficient(&required) {
            return Err(ReaderError::NotReadyForParse);
        }

        doc.transition(ParseStatus::WaitingParse)?;
        doc.parse_errors.clear();
        doc.document_error = None;
        doc.parse_started_at = None;
        doc.parse_finished_at = None;
        scheduler.schedule_parse(&doc.id);
        Ok(true)
    }

    /// Runs a queued parse: `waiting_parse` -> `parsing` -> `parsed`, or `error` when the run
    /// fails or is aborted by the [`AbortPolicy`].
    pub fn parse<S>(&self, doc: &mut Document, sink: &mut S) -> ReaderResult<ParseSummary>
    where
        S: RecordSink + ?Sized,
    {
        let ctx = context(doc, Phase::Parse);
        let result = self.run_parse(doc, sink);
        match &result {
            Ok(summary) => {
                if let Some(obs) = self.options.observer.as_ref() {
                    obs.on_parsed(&ctx, summary);
                }
            }
            Err(e) => self.report_failure(&ctx, e),
        }
        result
    }

    fn run_parse<S>(&self, doc: &mut Document, sink: &mut S) -> ReaderResult<ParseSummary>
    where
        S: RecordSink + ?Sized,
    {
        doc.transition(ParseStatus::Parsing)?;
        doc.parse_started_at = Some(Utc::now());
        doc.parse_finished_at = None;
        doc.parse_errors.clear();
        doc.document_error = None;

        let result = self.for_each_row(doc, sink);
        doc.parse_finished_at = Some(Utc::now());
        let summary = result?;

        if !summary.aborted {
            doc.transition(ParseStatus::Parsed)?;
        }
        Ok(summary)
    }

    /// Streams every row of `doc` through the row parser, handing accepted records to `sink` and
    /// appending rejections to `doc.parse_errors`.
    ///
    /// Missing or insufficient definitions fail before the source is opened. Does not move the
    /// document through `parsing`/`parsed`; see [`Self::parse`].
    pub fn for_each_row<S>(&self, doc: &mut Document, sink: &mut S) -> ReaderResult<ParseSummary>
    where
        S: RecordSink + ?Sized,
    {
        let kind = match self.kind_for(doc) {
            Ok(kind) => kind,
            Err(e) => return halt(doc, e),
        };
        let Some(definition) = doc.parse_definition.clone() else {
            return halt(doc, ReaderError::NoParseDefinition);
        };
        if !definition.is_sufficient(&kind.required_fields()) {
            return halt(doc, ReaderError::NotReadyForParse);
        }

        let stream = match self.row_source().open(doc, definition.csv_format.dialect()) {
            Ok(stream) => stream,
            Err(e) => return halt(doc, e),
        };
        tracing::info!(document = %doc.id, format = ?definition.csv_format, head = definition.head, "parse started");

        let mut parser = RowParser::new(kind, &definition);
        let mut errors = std::mem::take(&mut doc.parse_errors);
        let result = drive(
            stream,
            &mut parser,
            self.options.abort,
            &mut errors,
            sink,
            self.options.progress_every,
        );
        doc.parse_errors = errors;

        match result {
            Ok(summary) => {
                if summary.aborted {
                    doc.fail(ErrorReason::MaxErrorsReached);
                }
                Ok(summary)
            }
            Err(e) => halt(doc, e),
        }
    }

    /// Drops cached conversions for `doc` and clears all parse state (re-upload).
    pub fn reset(&self, doc: &mut Document) -> ReaderResult<()> {
        let removed = purge_cache(&self.options.cache_dir, &doc.id)?;
        tracing::info!(document = %doc.id, removed, "document reset");
        doc.reset();
        Ok(())
    }

    fn notify_analyzed(&self, doc: &Document, outcome: &AnalysisOutcome) {
        if let Some(obs) = self.options.observer.as_ref() {
            obs.on_analyzed(&context(doc, Phase::Analyze), outcome);
        }
    }

    fn report_failure(&self, ctx: &ReaderContext, e: &ReaderError) {
        if let Some(obs) = self.options.observer.as_ref() {
            let sev = ReaderSeverity::for_error(e);
            obs.on_failure(ctx, sev, e);
            if sev >= self.options.alert_at_or_above {
                obs.on_alert(ctx, sev, e);
            }
        }
    }
}

fn context(doc: &Document, phase: Phase) -> ReaderContext {
    ReaderContext {
        document_id: doc.id.clone(),
        path: doc.source.as_ref().map(|s| s.path().to_path_buf()),
        phase,
    }
}

/// Puts `doc` into `error` with the reason for `e` and returns `e`.
fn halt<T>(doc: &mut Document, e: ReaderError) -> ReaderResult<T> {
    doc.fail(e.reason());
    Err(e)
}

#[cfg(feature = "excel")]
fn default_converter() -> Arc<dyn SourceConverter> {
    Arc::new(crate::ingestion::CalamineConverter::default())
}

#[cfg(not(feature = "excel"))]
fn default_converter() -> Arc<dyn SourceConverter> {
    Arc::new(crate::ingestion::CommandConverter::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_load_from_partial_json() {
        let opts = ReaderOptions::from_json_str(
            r#"{"first_rows": 5, "abort": {"max_errors": 10}, "alert_at_or_above": "error"}"#,
        )
        .unwrap();
        assert_eq!(opts.first_rows, 5);
        assert_eq!(opts.sample_rows, 10);
        assert_eq!(opts.abort.max_errors, 10);
        assert_eq!(opts.abort.error_ratio, 5);
        assert_eq!(opts.alert_at_or_above, ReaderSeverity::Error);
        assert!(opts.observer.is_none());
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let opts = ReaderOptions {
            fallback_encoding: "klingon".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            DocumentReader::new(Registry::new(), opts),
            Err(ReaderError::InvalidConfig { .. })
        ));
        assert_eq!(ReaderOptions::default().encoding().unwrap(), encoding_rs::WINDOWS_1251);
    }
}
