use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::config::FingerprintMode;

/// Change token recorded for one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeToken {
    /// Modification time, nanoseconds since the epoch.
    Modified(u64),
    /// blake3 digest of the content.
    Content(String),
}

impl ChangeToken {
    pub fn capture(path: &Path, mode: FingerprintMode) -> io::Result<Self> {
        match mode {
            FingerprintMode::Mtime => {
                let modified = std::fs::metadata(path)?.modified()?;
                let nanos = modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
                    .unwrap_or(0);
                Ok(ChangeToken::Modified(nanos))
            }
            FingerprintMode::Content => Ok(Self::of_content(&std::fs::read(path)?)),
        }
    }

    pub fn of_content(bytes: &[u8]) -> Self {
        ChangeToken::Content(blake3::hash(bytes).to_hex().to_string())
    }

    /// Reads `path` and returns its content with the token describing that
    /// content. The modification time is sampled before reading, so an edit
    /// racing the read shows up as stale later.
    pub fn read(path: &Path, mode: FingerprintMode) -> io::Result<(Vec<u8>, Self)> {
        match mode {
            FingerprintMode::Mtime => {
                let token = Self::capture(path, mode)?;
                Ok((std::fs::read(path)?, token))
            }
            FingerprintMode::Content => {
                let bytes = std::fs::read(path)?;
                let token = Self::of_content(&bytes);
                Ok((bytes, token))
            }
        }
    }

    pub fn mode(&self) -> FingerprintMode {
        match self {
            ChangeToken::Modified(_) => FingerprintMode::Mtime,
            ChangeToken::Content(_) => FingerprintMode::Content,
        }
    }
}

/// Verdict of comparing recorded fingerprints with the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    /// Paths whose token changed or that can no longer be read.
    Stale(Vec<PathBuf>),
}

impl Staleness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Staleness::Fresh)
    }
}

/// Dependency fingerprint table of a precompiled entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints {
    entries: BTreeMap<PathBuf, ChangeToken>,
}

impl Fingerprints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current token of every path.
    pub fn capture<I, P>(paths: I, mode: FingerprintMode) -> io::Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut fingerprints = Self::new();
        for path in paths {
            let path = path.as_ref();
            fingerprints.insert(path, ChangeToken::capture(path, mode)?);
        }
        Ok(fingerprints)
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, token: ChangeToken) -> Option<ChangeToken> {
        self.entries.insert(path.into(), token)
    }

    pub fn get(&self, path: &Path) -> Option<&ChangeToken> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &ChangeToken)> {
        self.entries.iter().map(|(p, t)| (p.as_path(), t))
    }

    /// Compares each recorded token with a fresh one taken the same way.
    pub fn staleness(&self) -> Staleness {
        let changed: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|(path, token)| {
                ChangeToken::capture(path, token.mode())
                    .map(|current| current != **token)
                    .unwrap_or(true)
            })
            .map(|(path, _)| path.clone())
            .collect();

        if changed.is_empty() {
            Staleness::Fresh
        } else {
            Staleness::Stale(changed)
        }
    }
}

impl<P: Into<PathBuf>> FromIterator<(P, ChangeToken)> for Fingerprints {
    fn from_iter<I: IntoIterator<Item = (P, ChangeToken)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(p, t)| (p.into(), t)).collect(),
        }
    }
}
