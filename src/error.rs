use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while following the build tool's directory announcements.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Unable to resolve directory {dir} against {base}: {source}")]
    Unresolvable {
        dir: String,
        base: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Leaving directory {dir} would pop the root entry {root}")]
    StackUnderflow { dir: String, root: PathBuf },
}

/// Failures from the native source-analysis engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Parse failed: {0}")]
    Parse(String),

    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum PrecompileError {
    #[error("No header data accumulated for {0}")]
    Empty(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Source analysis failed: {0}")]
    Engine(#[from] EngineError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

/// Top-level error for a build ingestion session.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("A build session is already active on this parser")]
    SessionActive,

    #[error("Build file {path} is not usable: {source}")]
    BuildFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while reading build output: {0}")]
    Io(#[from] io::Error),

    #[error("Directory tracking aborted the session: {0}")]
    Directory(#[from] TrackError),
}

impl IngestError {
    /// Raw OS error code, when the failure came from the operating system.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            IngestError::Spawn { source, .. } | IngestError::BuildFile { source, .. } => {
                source.raw_os_error()
            }
            IngestError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// Whether the session was aborted and must not be resumed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Directory(_))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
