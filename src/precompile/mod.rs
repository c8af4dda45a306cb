//! Precompiled-header cache keyed by compiler-invocation signature.
//!
//! A [`PrecompileRegistry`] hands out one [`PrecompileEntry`] per
//! [`PrecompileSignature`]. Entries accumulate header text, parse it once
//! through a [`SourceAnalysisEngine`] and remember the files the parse
//! depended on. Reusing a parse is only valid while
//! [`PrecompileEntry::staleness`] reports [`Staleness::Fresh`]; the cache
//! never re-validates on its own.

pub mod engine;
pub mod entry;
pub mod fingerprint;
pub mod preprocess;
pub mod registry;
pub mod signature;

pub use engine::{SourceAnalysisEngine, TranslationUnit};
pub use entry::PrecompileEntry;
pub use fingerprint::{ChangeToken, Fingerprints, Staleness};
pub use preprocess::{HeaderPreprocessor, Preprocessed};
pub use registry::PrecompileRegistry;
pub use signature::PrecompileSignature;
