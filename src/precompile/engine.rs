use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::EngineError;

/// Opaque handle to a parsed translation unit. Cheap to clone; the artifact
/// is owned by whichever engine produced it.
#[derive(Clone)]
pub struct TranslationUnit(Arc<dyn Any + Send + Sync>);

impl TranslationUnit {
    pub fn new<T: Any + Send + Sync>(artifact: T) -> Self {
        Self(Arc::new(artifact))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Whether both handles refer to the same parse.
    pub fn ptr_eq(&self, other: &TranslationUnit) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TranslationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationUnit")
            .field("refs", &Arc::strong_count(&self.0))
            .finish()
    }
}

/// The native parser that turns preprocessed header text into an artifact.
#[cfg_attr(test, mockall::automock)]
pub trait SourceAnalysisEngine: Send + Sync {
    fn parse(&self, file_name: &Path, source: &[u8], flags: &[String]) -> Result<TranslationUnit, EngineError>;
}
