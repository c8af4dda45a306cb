use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::types::{absolutize, CompilerInvocation};

// Flags that only name outputs or dependency files; they never change how
// a header parses.
const OUTPUT_FLAGS_WITH_VALUE: &[&str] = &["-o", "-MF", "-MT", "-MQ"];
const OUTPUT_FLAGS: &[&str] = &["-c", "-M", "-MM", "-MD", "-MMD", "-MP", "-MG"];

/// Cache key for a precompiled header: the header plus the flags that
/// influence how it parses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrecompileSignature {
    digest: String,
    header: PathBuf,
    flags: Vec<String>,
}

impl PrecompileSignature {
    /// Builds a signature from already-normalized flags.
    pub fn new(header: impl Into<PathBuf>, flags: Vec<String>) -> Self {
        let header = header.into();
        let mut hasher = blake3::Hasher::new();
        hasher.update(header.as_os_str().to_string_lossy().as_bytes());
        hasher.update(&[0]);
        for flag in &flags {
            hasher.update(flag.as_bytes());
            hasher.update(&[0]);
        }
        Self {
            digest: hasher.finalize().to_hex().to_string(),
            header,
            flags,
        }
    }

    /// Derives the signature `invocation` implies for `header`.
    ///
    /// The source file, output and dependency-file flags are dropped and
    /// relative `-I` paths are made absolute, so the same header compiled
    /// the same way from different directories shares one signature.
    pub fn from_invocation(invocation: &CompilerInvocation, header: &Path) -> Self {
        let cwd = &invocation.working_directory;
        let mut flags = Vec::with_capacity(invocation.flags.len());
        let mut iter = invocation.flags.iter();

        while let Some(flag) = iter.next() {
            let flag = flag.as_str();
            if OUTPUT_FLAGS_WITH_VALUE.contains(&flag) {
                iter.next();
                continue;
            }
            if OUTPUT_FLAGS.contains(&flag) || (flag.starts_with("-o") && flag.len() > 2) {
                continue;
            }
            if !flag.starts_with('-') && absolutize(cwd, Path::new(flag)) == invocation.source_file {
                continue;
            }

            if flag == "-I" {
                if let Some(dir) = iter.next() {
                    flags.push(format!("-I{}", absolutize(cwd, Path::new(dir)).display()));
                }
            } else if let Some(dir) = flag.strip_prefix("-I").filter(|d| !d.is_empty()) {
                flags.push(format!("-I{}", absolutize(cwd, Path::new(dir)).display()));
            } else {
                flags.push(flag.to_string());
            }
        }

        Self::new(absolutize(cwd, header), flags)
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn header(&self) -> &Path {
        &self.header
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Absolute `-I` directories carried by the signature, in order.
    pub fn include_paths(&self) -> Vec<PathBuf> {
        self.flags
            .iter()
            .filter_map(|f| f.strip_prefix("-I"))
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .collect()
    }
}

impl fmt::Display for PrecompileSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.digest.get(..12).unwrap_or(&self.digest);
        write!(f, "{} ({})", self.header.display(), short)
    }
}
