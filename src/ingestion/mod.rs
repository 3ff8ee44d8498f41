//! Getting rows out of uploaded files.
//!
//! - [`detect`]: delimiter dialect detection from a small sample
//! - [`convert`]: archive extraction / spreadsheet conversion collaborators and their cache
//! - [`source`]: resolution of a document to a delimited file and the [`RowStream`] over it
//! - [`observability`]: observer hooks for phase outcomes
//! - `excel` (feature `excel`): in-process spreadsheet conversion

pub mod convert;
pub mod detect;
#[cfg(feature = "excel")]
pub mod excel;
pub mod observability;
pub mod source;

pub use convert::{CommandConverter, SourceConverter, SourceKind, cache_path, purge_cache};
pub use detect::{DetectOptions, detect_format};
#[cfg(feature = "excel")]
pub use excel::CalamineConverter;
pub use observability::{
    CompositeObserver, FileObserver, Phase, ReaderContext, ReaderObserver, ReaderSeverity, TracingObserver,
};
pub use source::{RowSource, RowStream};
