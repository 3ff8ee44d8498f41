use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::analysis::AnalysisOutcome;
use crate::error::ReaderError;
use crate::parsing::ParseSummary;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (phase failed).
    Error,
    /// Critical error (typically I/O or other infrastructure failures).
    Critical,
}

impl ReaderSeverity {
    /// Severity of a phase-halting error.
    pub fn for_error(e: &ReaderError) -> Self {
        match e {
            ReaderError::Io(_) | ReaderError::UnreadableFile { .. } | ReaderError::Conversion { .. } => {
                ReaderSeverity::Critical
            }
            ReaderError::Csv(err) => match err.kind() {
                ::csv::ErrorKind::Io(_) => ReaderSeverity::Critical,
                _ => ReaderSeverity::Error,
            },
            ReaderError::Unparseable { .. } => ReaderSeverity::Warning,
            _ => ReaderSeverity::Error,
        }
    }
}

/// Which phase an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Analyze,
    Parse,
}

/// Context about an analysis or parse attempt.
#[derive(Debug, Clone)]
pub struct ReaderContext {
    pub document_id: String,
    /// Uploaded source path, if the document has one.
    pub path: Option<PathBuf>,
    pub phase: Phase,
}

/// Observer interface for phase outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait ReaderObserver: Send + Sync {
    /// Called when analysis reaches a terminal outcome.
    fn on_analyzed(&self, _ctx: &ReaderContext, _outcome: &AnalysisOutcome) {}

    /// Called when a parse run ends, including runs stopped by the abort policy.
    fn on_parsed(&self, _ctx: &ReaderContext, _summary: &ParseSummary) {}

    /// Called when a phase fails.
    fn on_failure(&self, _ctx: &ReaderContext, _severity: ReaderSeverity, _error: &ReaderError) {}

    /// Called when a failure meets an alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &ReaderContext, severity: ReaderSeverity, error: &ReaderError) {
        self.on_failure(ctx, severity, error)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ReaderObserver>>,
}

impl CompositeObserver {
    /// Create a new composite observer from a list of observers.
    pub fn new(observers: Vec<Arc<dyn ReaderObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl ReaderObserver for CompositeObserver {
    fn on_analyzed(&self, ctx: &ReaderContext, outcome: &AnalysisOutcome) {
        for o in &self.observers {
            o.on_analyzed(ctx, outcome);
        }
    }

    fn on_parsed(&self, ctx: &ReaderContext, summary: &ParseSummary) {
        for o in &self.observers {
            o.on_parsed(ctx, summary);
        }
    }

    fn on_failure(&self, ctx: &ReaderContext, severity: ReaderSeverity, error: &ReaderError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &ReaderContext, severity: ReaderSeverity, error: &ReaderError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Emits phase events as `tracing` events.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ReaderObserver for TracingObserver {
    fn on_analyzed(&self, ctx: &ReaderContext, outcome: &AnalysisOutcome) {
        tracing::info!(document = %ctx.document_id, outcome = outcome.status().as_str(), "analysis finished");
    }

    fn on_parsed(&self, ctx: &ReaderContext, summary: &ParseSummary) {
        tracing::info!(
            document = %ctx.document_id,
            lines = summary.lines_read,
            accepted = summary.accepted,
            rejected = summary.rejected,
            aborted = summary.aborted,
            "parse finished"
        );
    }

    fn on_failure(&self, ctx: &ReaderContext, severity: ReaderSeverity, error: &ReaderError) {
        tracing::error!(document = %ctx.document_id, phase = ?ctx.phase, ?severity, %error, "phase failed");
    }

    fn on_alert(&self, ctx: &ReaderContext, severity: ReaderSeverity, error: &ReaderError) {
        tracing::error!(alert = true, document = %ctx.document_id, phase = ?ctx.phase, ?severity, %error, "phase failed");
    }
}

/// Appends phase events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{} {line}", Utc::now().to_rfc3339());
        }
    }
}

impl ReaderObserver for FileObserver {
    fn on_analyzed(&self, ctx: &ReaderContext, outcome: &AnalysisOutcome) {
        self.append_line(&format!(
            "analyzed document={} status={}",
            ctx.document_id,
            outcome.status()
        ));
    }

    fn on_parsed(&self, ctx: &ReaderContext, summary: &ParseSummary) {
        self.append_line(&format!(
            "parsed document={} lines={} accepted={} rejected={} aborted={}",
            ctx.document_id, summary.lines_read, summary.accepted, summary.rejected, summary.aborted
        ));
    }

    fn on_failure(&self, ctx: &ReaderContext, severity: ReaderSeverity, error: &ReaderError) {
        self.append_line(&format!(
            "fail severity={:?} phase={:?} document={} err={}",
            severity, ctx.phase, ctx.document_id, error
        ));
    }

    fn on_alert(&self, ctx: &ReaderContext, severity: ReaderSeverity, error: &ReaderError) {
        self.append_line(&format!(
            "ALERT severity={:?} phase={:?} document={} err={}",
            severity, ctx.phase, ctx.document_id, error
        ));
    }
}
