use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::invocation::takes_value;

/// What a compiler invocation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    Compile,
    PrecompiledHeader,
}

/// One compile or precompile command observed in build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerInvocation {
    pub working_directory: PathBuf,
    pub compiler: String,
    pub source_file: PathBuf,
    pub kind: InvocationKind,
    /// Every token after the compiler, in command-line order.
    pub flags: Vec<String>,
    pub output: Option<PathBuf>,
    pub raw_line: String,
}

impl CompilerInvocation {
    pub fn is_pch(&self) -> bool {
        self.kind == InvocationKind::PrecompiledHeader
    }

    /// Appends session-wide flags, skipping ones already present.
    ///
    /// An option that takes a value is compared together with that value, so
    /// `-include a.h -include b.h` keeps both headers.
    pub fn with_extra_flags(mut self, extra: &[String]) -> Self {
        let mut appended = Vec::new();
        let present = option_units(&self.flags);
        for unit in option_units(extra) {
            if !present.contains(&unit) {
                appended.extend_from_slice(unit);
            }
        }
        self.flags.extend(appended);
        self
    }

    /// `-I` search paths, resolved against the working directory.
    pub fn include_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let mut iter = self.flags.iter();
        while let Some(flag) = iter.next() {
            let dir = if flag == "-I" {
                iter.next().map(String::as_str)
            } else {
                flag.strip_prefix("-I").filter(|rest| !rest.is_empty())
            };
            if let Some(dir) = dir {
                paths.push(absolutize(&self.working_directory, Path::new(dir)));
            }
        }
        paths
    }

    /// Candidate precompiled-header artifacts this invocation may consume.
    ///
    /// `-include-pch X` names the artifact directly. `-include X` is matched
    /// against the `X.gch` and `X.pch` artifacts a compiler would pick up.
    pub fn pch_references(&self) -> Vec<PathBuf> {
        let mut refs = Vec::new();
        let mut iter = self.flags.iter();
        while let Some(flag) = iter.next() {
            match flag.as_str() {
                "-include-pch" => {
                    if let Some(pch) = iter.next() {
                        refs.push(absolutize(&self.working_directory, Path::new(pch)));
                    }
                }
                "-include" => {
                    if let Some(header) = iter.next() {
                        let header = absolutize(&self.working_directory, Path::new(header));
                        for ext in ["gch", "pch"] {
                            let mut artifact = header.clone().into_os_string();
                            artifact.push(".");
                            artifact.push(ext);
                            refs.push(PathBuf::from(artifact));
                        }
                    }
                }
                _ => {}
            }
        }
        refs
    }
}

/// Outcome of one completed build session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub source_count: usize,
    pub pch_count: usize,
    pub stderr: String,
}

impl BuildSummary {
    pub fn summary(&self) -> String {
        format!(
            "Build {} | exit: {} | sources: {} | precompiled headers: {}",
            if self.success { "succeeded" } else { "failed" },
            self.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            self.source_count,
            self.pch_count
        )
    }
}

/// Joins `path` onto `base` when relative and folds `.`/`..` lexically.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Splits a flag list into options, each paired with its value if it takes one.
fn option_units(flags: &[String]) -> Vec<&[String]> {
    let mut units = Vec::new();
    let mut i = 0;
    while i < flags.len() {
        let len = if takes_value(&flags[i]) && i + 1 < flags.len() { 2 } else { 1 };
        units.push(&flags[i..i + len]);
        i += len;
    }
    units
}
