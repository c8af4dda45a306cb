use anyhow::{bail, Context, Result};
use std::io::Write;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

use crate::{
    cli_types::{HeadersArgs, RunArgs},
    precompile::HeaderPreprocessor,
    BuildSummary, CompilerInvocation, IngestConfig, MakefileParser,
};

pub struct CliApp {
    config: IngestConfig,
    verbose: bool,
}

impl CliApp {
    pub fn new(config: IngestConfig, verbose: bool) -> Self {
        info!("Initializing buildlore CLI");
        Self { config, verbose }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Runs the build, streaming invocations to stdout as they are parsed.
    pub async fn run_build(&self, args: RunArgs) -> Result<BuildSummary> {
        let start_time = Instant::now();
        let json = match args.format.as_str() {
            "json" => true,
            "text" => false,
            other => bail!("Unknown output format: {}", other),
        };

        let mut config = self.config.clone();
        config.extra_flags.extend(args.extra_flags);
        if let Some(program) = args.program {
            config.make.program = program;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<CompilerInvocation>();
        let printer = tokio::spawn(async move {
            let mut out = std::io::stdout();
            while let Some(invocation) = rx.recv().await {
                let line = if json {
                    serde_json::to_string(&invocation)?
                } else {
                    format_invocation(&invocation)
                };
                writeln!(out, "{}", line)?;
            }
            out.flush()?;
            Ok::<(), anyhow::Error>(())
        });

        let mut parser = MakefileParser::new(config, tx);
        let result = parser
            .run(&args.makefile, &args.make_args)
            .await
            .with_context(|| format!("Failed to build {}", args.makefile.display()));
        // Dropping the parser closes the channel so the printer can finish.
        drop(parser);
        printer.await.context("Output task panicked")??;
        let summary = result?;

        eprintln!("{}", summary.summary());
        if !summary.success && !summary.stderr.is_empty() {
            eprint!("{}", summary.stderr);
        }
        if self.verbose {
            eprintln!("Completed in {:?}", start_time.elapsed());
        }
        Ok(summary)
    }

    /// Inlines the includes of a header and lists the files it depends on,
    /// each with the change token the precompile cache would record.
    pub fn headers(&self, args: HeadersArgs) -> Result<()> {
        let header = args
            .header
            .canonicalize()
            .with_context(|| format!("Header not found: {}", args.header.display()))?;
        let data = std::fs::read(&header)
            .with_context(|| format!("Failed to read {}", header.display()))?;

        let preprocessed = HeaderPreprocessor::new(&args.include_paths, &self.config.precompile.system_includes)
            .fingerprint_mode(self.config.precompile.fingerprint_mode)
            .run(&data, &header)
            .with_context(|| format!("Failed to expand {}", header.display()))?;
        let fingerprints = &preprocessed.fingerprints;

        match args.format.as_str() {
            "json" => {
                let json = serde_json::to_string_pretty(fingerprints)
                    .context("Failed to serialize fingerprints")?;
                println!("{}", json);
            }
            "text" => {
                for (path, token) in fingerprints.iter() {
                    println!("{}\t{:?}", path.display(), token);
                }
                if self.verbose {
                    eprintln!(
                        "{} dependencies, {} bytes after expansion",
                        preprocessed.dependencies.len(),
                        preprocessed.source.len()
                    );
                }
            }
            other => bail!("Unknown output format: {}", other),
        }
        Ok(())
    }

    pub fn show_config(&self) -> Result<()> {
        let toml = self
            .config
            .to_toml()
            .context("Failed to serialize configuration")?;
        println!("{}", toml);
        if let Some(path) = IngestConfig::default_path() {
            eprintln!("Default config file: {}", path.display());
        }
        Ok(())
    }
}

fn format_invocation(invocation: &CompilerInvocation) -> String {
    let kind = if invocation.is_pch() { "pch" } else { "cc" };
    format!(
        "{}\t{}\t{}",
        kind,
        invocation.working_directory.display(),
        invocation.source_file.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InvocationKind;
    use std::path::PathBuf;

    #[test]
    fn test_format_invocation_text() {
        let invocation = CompilerInvocation {
            working_directory: PathBuf::from("/src/lib"),
            compiler: "gcc".to_string(),
            source_file: PathBuf::from("/src/lib/a.c"),
            kind: InvocationKind::Compile,
            flags: vec!["-c".to_string(), "a.c".to_string()],
            output: None,
            raw_line: "gcc -c a.c".to_string(),
        };
        assert_eq!(format_invocation(&invocation), "cc\t/src/lib\t/src/lib/a.c");
    }

    #[tokio::test]
    async fn test_unknown_format_is_rejected() {
        let app = CliApp::new(IngestConfig::default(), false);
        let err = app
            .run_build(RunArgs {
                makefile: PathBuf::from("Makefile"),
                format: "yaml".to_string(),
                extra_flags: Vec::new(),
                program: None,
                make_args: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("yaml"));
    }

    #[test]
    fn test_headers_lists_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dep.h"), "int dep;\n").unwrap();
        let header = dir.path().join("all.h");
        std::fs::write(&header, "#include \"dep.h\"\n").unwrap();

        let app = CliApp::new(IngestConfig::default(), false);
        app.headers(HeadersArgs {
            header,
            include_paths: Vec::new(),
            format: "json".to_string(),
        })
        .unwrap();
    }
}
