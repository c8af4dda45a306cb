//! Recognising compiler command lines in build output.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::types::{absolutize, CompilerInvocation, InvocationKind};

/// Turns a raw build-output line into a structured invocation.
///
/// Implementations are authoritative: a `Some` result is trusted as-is and
/// the line is never offered to directory tracking.
pub trait InvocationParser: Send + Sync {
    fn parse(&self, line: &str, working_directory: &Path) -> Option<CompilerInvocation>;
}

static COMPILER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[\w.+]+-)*(?:gcc|g\+\+|cc|c\+\+|clang|clang\+\+)(?:-[\d.]+)?$")
        .expect("compiler name pattern is valid")
});

const LAUNCHERS: &[&str] = &["ccache", "distcc", "sccache", "icecc"];

const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "c++", "C", "m", "mm"];
const HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx", "h++", "H"];

// Options whose value is the following token.
const VALUE_OPTIONS: &[&str] = &[
    "-o", "-I", "-D", "-U", "-x", "-include", "-include-pch", "-imacros", "-isystem",
    "-iquote", "-idirafter", "-isysroot", "--sysroot", "-MF", "-MT", "-MQ", "-arch",
    "-target", "-Xclang", "-Xpreprocessor", "-Xassembler", "-Xlinker",
];

pub(crate) fn takes_value(flag: &str) -> bool {
    VALUE_OPTIONS.contains(&flag)
}

/// Default recogniser for gcc- and clang-style command lines.
#[derive(Debug, Clone, Default)]
pub struct GccInvocationParser;

impl GccInvocationParser {
    pub fn new() -> Self {
        Self
    }
}

impl InvocationParser for GccInvocationParser {
    fn parse(&self, line: &str, working_directory: &Path) -> Option<CompilerInvocation> {
        let command = line.trim();
        let command = command
            .strip_prefix("libtool: compile:")
            .map(str::trim_start)
            .unwrap_or(command);

        let mut tokens = split_command_line(command)?;
        while tokens
            .first()
            .map(|t| LAUNCHERS.contains(&file_name(t)))
            .unwrap_or(false)
        {
            tokens.remove(0);
        }
        if tokens.is_empty() || !COMPILER_NAME.is_match(file_name(&tokens[0])) {
            return None;
        }

        let compiler = tokens.remove(0);
        let flags = tokens;

        let mut compile_only = false;
        let mut header_language = false;
        let mut output = None;
        let mut source = None;

        let mut i = 0;
        while i < flags.len() {
            let flag = flags[i].as_str();
            if VALUE_OPTIONS.contains(&flag) {
                let value = flags.get(i + 1).map(String::as_str);
                match (flag, value) {
                    ("-o", Some(v)) => output = Some(v.to_string()),
                    ("-x", Some(v)) => header_language = v.ends_with("-header"),
                    _ => {}
                }
                i += 2;
                continue;
            }

            if flag == "-c" {
                compile_only = true;
            } else if let Some(v) = flag.strip_prefix("-o").filter(|v| !v.is_empty()) {
                output = Some(v.to_string());
            } else if !flag.starts_with('-') && source.is_none() && is_source_like(flag) {
                source = Some(flag.to_string());
            }
            i += 1;
        }

        let source = source?;
        let kind = if header_language || is_header(&source) {
            InvocationKind::PrecompiledHeader
        } else if compile_only {
            InvocationKind::Compile
        } else {
            // Link steps and other compiler driver uses.
            return None;
        };

        Some(CompilerInvocation {
            working_directory: working_directory.to_path_buf(),
            compiler,
            source_file: absolutize(working_directory, Path::new(&source)),
            kind,
            output: output.map(|o| absolutize(working_directory, Path::new(&o))),
            flags,
            raw_line: line.to_string(),
        })
    }
}

fn file_name(token: &str) -> &str {
    token.rsplit('/').next().unwrap_or(token)
}

fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    name.rfind('.').map(|idx| &name[idx + 1..])
}

fn is_header(path: &str) -> bool {
    extension(path).map_or(false, |ext| HEADER_EXTENSIONS.contains(&ext))
}

fn is_source_like(path: &str) -> bool {
    extension(path).map_or(false, |ext| {
        SOURCE_EXTENSIONS.contains(&ext) || HEADER_EXTENSIONS.contains(&ext)
    })
}

/// Splits a command line the way a POSIX shell would for simple words:
/// single quotes, double quotes with backslash escapes, bare backslashes.
///
/// Returns `None` on an unterminated quote.
pub fn split_command_line(line: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '\'' => break,
                        ch => current.push(ch),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => match chars.next()? {
                            esc @ ('"' | '\\' | '$' | '`') => current.push(esc),
                            other => {
                                current.push('\\');
                                current.push(other);
                            }
                        },
                        ch => current.push(ch),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}
