//! Working-directory tracking for recursive make output.
//!
//! GNU make announces every directory change when run with `-w`:
//!
//! ```text
//! make[1]: Entering directory `/src/lib'
//! make[1]: Leaving directory '/src/lib'
//! ```
//!
//! [`DirectoryTracker`] follows those announcements so every compiler line
//! can be attributed to the directory it actually ran in.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, error, trace, warn};

use crate::error::TrackError;

type Result<T> = std::result::Result<T, TrackError>;

static DIRECTORY_ANNOUNCEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"make[^:]*: ([^ ]+) directory [`']([^']+)'")
        .expect("directory announcement pattern is valid")
});

/// Ordered directory nesting; the last entry is the current directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStack {
    paths: Vec<PathBuf>,
}

impl PathStack {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: vec![root.into()],
        }
    }

    pub fn top(&self) -> &Path {
        // Never empty: `pop` refuses to remove the root.
        &self.paths[self.paths.len() - 1]
    }

    pub fn root(&self) -> &Path {
        &self.paths[0]
    }

    pub fn depth(&self) -> usize {
        self.paths.len()
    }

    pub fn push(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Removes the top entry. Returns `None` instead of popping the root.
    pub fn pop(&mut self) -> Option<PathBuf> {
        if self.paths.len() > 1 {
            self.paths.pop()
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }
}

/// What a single line did to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEvent {
    /// Not a directory announcement.
    Ignored,
    Entered(PathBuf),
    Left(PathBuf),
    /// The stack was popped but the popped entry does not match the
    /// announced directory.
    Mismatch { announced: String, popped: PathBuf },
    /// Announcement with a verb other than `Entering`/`Leaving`; stack unchanged.
    UnknownVerb { verb: String, dir: String },
}

impl TrackEvent {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, TrackEvent::Mismatch { .. } | TrackEvent::UnknownVerb { .. })
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryTracker {
    stack: PathStack,
}

impl DirectoryTracker {
    /// Starts tracking with `root` as the only entry.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            stack: PathStack::new(root),
        }
    }

    /// Directory applied to the next parsed compiler invocation.
    pub fn path(&self) -> &Path {
        self.stack.top()
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn stack(&self) -> &PathStack {
        &self.stack
    }

    /// Applies `line` to the stack if it is a directory announcement.
    ///
    /// An `Entering` path that cannot be resolved, or a `Leaving` that would
    /// pop the root, is an error: every later invocation would carry a wrong
    /// working directory.
    pub fn track(&mut self, line: &str) -> Result<TrackEvent> {
        let Some(captures) = DIRECTORY_ANNOUNCEMENT.captures(line) else {
            return Ok(TrackEvent::Ignored);
        };
        let verb = &captures[1];
        let dir = &captures[2];

        match verb {
            "Entering" => self.enter_directory(dir),
            "Leaving" => self.leave_directory(dir),
            _ => {
                warn!(verb, dir, "Invalid directory track");
                Ok(TrackEvent::UnknownVerb {
                    verb: verb.to_string(),
                    dir: dir.to_string(),
                })
            }
        }
    }

    fn enter_directory(&mut self, dir: &str) -> Result<TrackEvent> {
        let base = self.path().to_path_buf();
        match base.join(dir).canonicalize() {
            Ok(resolved) => {
                debug!(dir = %resolved.display(), "New directory resolved");
                self.stack.push(resolved.clone());
                Ok(TrackEvent::Entered(resolved))
            }
            Err(source) => {
                error!(dir, base = %base.display(), "Unable to resolve path");
                Err(TrackError::Unresolvable {
                    dir: dir.to_string(),
                    base,
                    source,
                })
            }
        }
    }

    fn leave_directory(&mut self, dir: &str) -> Result<TrackEvent> {
        trace!(dir, "Leaving directory");
        let Some(popped) = self.stack.pop() else {
            error!(dir, "Leaving directory with only the root on the stack");
            return Err(TrackError::StackUnderflow {
                dir: dir.to_string(),
                root: self.stack.root().to_path_buf(),
            });
        };

        // The announcement is relative to the directory make returns to.
        let same = match self.path().join(dir).canonicalize() {
            Ok(resolved) => resolved == popped,
            Err(_) => popped.file_name() == Path::new(dir).file_name(),
        };
        if !same {
            warn!(
                announced = dir,
                popped = %popped.display(),
                "Leaving a directory that is not the current one"
            );
            return Ok(TrackEvent::Mismatch {
                announced: dir.to_string(),
                popped,
            });
        }
        Ok(TrackEvent::Left(popped))
    }
}
