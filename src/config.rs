use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub make: MakeConfig,
    /// Flags merged into every parsed compiler invocation.
    pub extra_flags: Vec<String>,
    pub precompile: PrecompileConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MakeConfig {
    pub program: String,
    /// Appended after the fixed `-j1 -w -f <file> -C <dir>` flags.
    pub fixed_args: Vec<String>,
    /// Interception shim to preload. Defaults to the `makelib` library
    /// installed next to the running executable.
    pub preload_library: Option<PathBuf>,
    /// Caller argument that turns shim injection off for a run.
    pub disable_preload_flag: String,
    /// Log written by the shim; removed before every run.
    pub shim_log: PathBuf,
    /// How long a terminated build gets before it is killed.
    pub termination_grace_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    #[default]
    Mtime,
    Content,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecompileConfig {
    pub system_includes: Vec<PathBuf>,
    pub fingerprint_mode: FingerprintMode,
}

impl Default for MakeConfig {
    fn default() -> Self {
        Self {
            program: "make".to_string(),
            fixed_args: vec!["AM_DEFAULT_VERBOSITY=1".to_string(), "VERBOSE=1".to_string()],
            preload_library: None,
            disable_preload_flag: "-B".to_string(),
            shim_log: PathBuf::from("/tmp/makelib.log"),
            termination_grace_ms: 100,
        }
    }
}

impl IngestConfig {
    pub const ENV_PREFIX: &'static str = "BUILDLORE";

    /// Loads defaults, then `path` (or the per-user config file when `None`),
    /// then `BUILDLORE__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = Self::default_path() {
                    builder = builder.add_source(File::from(default_path).required(false));
                }
            }
        }

        let config = builder
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("extra_flags")
                    .with_list_parse_key("make.fixed_args")
                    .with_list_parse_key("precompile.system_includes")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "buildlore").map(|dirs| dirs.config_dir().join("buildlore.toml"))
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Shim path to preload. An explicit path is used as given; otherwise
    /// the shim installed at `<exe dir>/../makelib/`, if there is one.
    pub fn preload_library(&self) -> Option<PathBuf> {
        if let Some(path) = &self.make.preload_library {
            return Some(path.clone());
        }
        let exe = std::env::current_exe().ok()?;
        exe.parent()?
            .join("../makelib")
            .join(SHIM_FILE_NAME)
            .canonicalize()
            .ok()
    }
}

#[cfg(target_os = "macos")]
const SHIM_FILE_NAME: &str = "libmakelib.dylib";
#[cfg(not(target_os = "macos"))]
const SHIM_FILE_NAME: &str = "libmakelib.so";

#[cfg(target_os = "macos")]
pub const PRELOAD_VARIABLE: &str = "DYLD_INSERT_LIBRARIES";
#[cfg(not(target_os = "macos"))]
pub const PRELOAD_VARIABLE: &str = "LD_PRELOAD";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.make.program, "make");
        assert_eq!(config.make.disable_preload_flag, "-B");
        assert_eq!(config.make.shim_log, PathBuf::from("/tmp/makelib.log"));
        assert_eq!(config.precompile.fingerprint_mode, FingerprintMode::Mtime);
        assert!(config.extra_flags.is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = IngestConfig::from_toml_str(
            r#"
extra_flags = ["-DINDEXING"]

[make]
program = "gmake"

[precompile]
fingerprint_mode = "content"
system_includes = ["/usr/include"]
"#,
        )
        .unwrap();

        assert_eq!(config.make.program, "gmake");
        assert_eq!(config.make.termination_grace_ms, 100);
        assert_eq!(config.extra_flags, vec!["-DINDEXING".to_string()]);
        assert_eq!(config.precompile.fingerprint_mode, FingerprintMode::Content);
        assert_eq!(config.precompile.system_includes, vec![PathBuf::from("/usr/include")]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buildlore.toml");
        std::fs::write(&path, "[make]\nshim_log = \"/tmp/other.log\"\n").unwrap();

        let config = IngestConfig::load(Some(&path)).unwrap();
        assert_eq!(config.make.shim_log, PathBuf::from("/tmp/other.log"));
        assert_eq!(config.make.program, "make");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(IngestConfig::load(Some(Path::new("/nonexistent/buildlore.toml"))).is_err());
    }

    #[test]
    fn test_explicit_preload_library_wins() {
        let mut config = IngestConfig::default();
        config.make.preload_library = Some(PathBuf::from("/opt/shim.so"));
        assert_eq!(config.preload_library(), Some(PathBuf::from("/opt/shim.so")));
    }
}
