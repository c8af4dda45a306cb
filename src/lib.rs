//! Build-output ingestion and precompiled-header caching for C/C++ indexers.
//!
//! [`MakefileParser`] drives `make`, follows its directory announcements and
//! reports every compiler invocation to a [`BuildObserver`].
//! [`PrecompileRegistry`] keeps one precompiled header per invocation
//! signature for the analysis engine to reuse.

pub mod types;
pub mod error;
pub mod config;
pub mod tracker;
pub mod invocation;
pub mod build;
pub mod precompile;
pub mod logging;
pub mod cli;
pub mod cli_types;

// Re-export commonly used types
pub use types::{BuildSummary, CompilerInvocation, InvocationKind};
pub use error::{EngineError, IngestError, PrecompileError, Result, TrackError};
pub use config::{FingerprintMode, IngestConfig};
pub use tracker::{DirectoryTracker, PathStack, TrackEvent};
pub use invocation::{GccInvocationParser, InvocationParser};
pub use build::{BuildObserver, BuildSession, CollectingObserver, MakefileParser};
pub use precompile::{
    PrecompileEntry, PrecompileRegistry, PrecompileSignature, SourceAnalysisEngine, Staleness,
    TranslationUnit,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
