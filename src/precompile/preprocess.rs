//! Include expansion run over accumulated header data before it is handed
//! to the analysis engine.

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::fingerprint::{ChangeToken, Fingerprints};
use crate::config::FingerprintMode;
use crate::error::PrecompileError;

static INCLUDE_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*#\s*include\s*([<"])([^>"]+)[>"]"#).expect("include pattern is valid")
});

/// Output of a preprocessing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preprocessed {
    pub source: Vec<u8>,
    /// Every file inlined, in first-inclusion order.
    pub dependencies: Vec<PathBuf>,
    /// Tokens of the origin (when it exists on disk) and of every inlined
    /// file, taken as each was read.
    pub fingerprints: Fingerprints,
}

/// Inlines `#include` directives, each file at most once.
///
/// Quoted includes are looked up next to the including file first, then in
/// `include_paths`, then in `system_includes`; angle includes skip the first
/// step. Conditional directives are passed through untouched, and so is any
/// include that cannot be found; the engine sees it as written.
#[derive(Debug, Clone)]
pub struct HeaderPreprocessor<'a> {
    include_paths: &'a [PathBuf],
    system_includes: &'a [PathBuf],
    mode: FingerprintMode,
}

impl<'a> HeaderPreprocessor<'a> {
    pub fn new(include_paths: &'a [PathBuf], system_includes: &'a [PathBuf]) -> Self {
        Self {
            include_paths,
            system_includes,
            mode: FingerprintMode::default(),
        }
    }

    pub fn fingerprint_mode(mut self, mode: FingerprintMode) -> Self {
        self.mode = mode;
        self
    }

    /// Expands `data` as if it were the content of `origin`.
    pub fn run(&self, data: &[u8], origin: &Path) -> Result<Preprocessed, PrecompileError> {
        let mut out = Preprocessed::default();
        match ChangeToken::capture(origin, self.mode) {
            Ok(token) => {
                out.fingerprints.insert(origin, token);
            }
            // Synthetic headers have no file behind them.
            Err(e) => debug!(path = %origin.display(), error = %e, "No fingerprint"),
        }

        let mut seen = HashSet::new();
        seen.insert(origin.to_path_buf());
        self.expand(data, origin, &mut seen, &mut out)?;
        Ok(out)
    }

    fn expand(
        &self,
        data: &[u8],
        origin: &Path,
        seen: &mut HashSet<PathBuf>,
        out: &mut Preprocessed,
    ) -> Result<(), PrecompileError> {
        for line in data.split_inclusive(|&b| b == b'\n') {
            let Some(captures) = INCLUDE_DIRECTIVE.captures(line) else {
                out.source.extend_from_slice(line);
                continue;
            };

            let quoted = &captures[1] == b"\"";
            let name = String::from_utf8_lossy(&captures[2]).into_owned();
            let Some(path) = self.resolve(&name, quoted, origin) else {
                debug!(include = %name, from = %origin.display(), "Include not found, left in place");
                out.source.extend_from_slice(line);
                continue;
            };

            if !seen.insert(path.clone()) {
                trace!(include = %path.display(), "Already included");
                continue;
            }

            let (content, token) = ChangeToken::read(&path, self.mode).map_err(|source| PrecompileError::Read {
                path: path.clone(),
                source,
            })?;
            out.dependencies.push(path.clone());
            out.fingerprints.insert(path.clone(), token);
            self.expand(&content, &path, seen, out)?;
            if !content.ends_with(b"\n") {
                out.source.push(b'\n');
            }
        }
        Ok(())
    }

    fn resolve(&self, name: &str, quoted: bool, origin: &Path) -> Option<PathBuf> {
        let local = quoted.then(|| origin.parent()).flatten();
        local
            .into_iter()
            .chain(self.include_paths.iter().map(PathBuf::as_path))
            .chain(self.system_includes.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
            .map(|found| found.canonicalize().unwrap_or(found))
    }
}
