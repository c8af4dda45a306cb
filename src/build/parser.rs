use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::observer::{BuildObserver, CollectingObserver};
use super::session::{BuildSession, Dispatch, PchAliases};
use crate::config::{IngestConfig, PRELOAD_VARIABLE};
use crate::error::{IngestError, Result};
use crate::invocation::{GccInvocationParser, InvocationParser};
use crate::tracker::DirectoryTracker;
use crate::types::BuildSummary;

const READ_CHUNK: usize = 8 * 1024;

/// Runs make once and turns its output into compiler invocations.
///
/// ```no_run
/// use buildlore::{MakefileParser, IngestConfig};
///
/// let mut parser = MakefileParser::builder()
///     .config(IngestConfig::default())
///     .observer(|inv: buildlore::CompilerInvocation| println!("{}", inv.source_file.display()))
///     .build();
/// let summary = parser.run_blocking("project/Makefile".as_ref(), &[])?;
/// println!("{}", summary.summary());
/// # Ok::<(), buildlore::IngestError>(())
/// ```
pub struct MakefileParser<O: BuildObserver = CollectingObserver> {
    config: IngestConfig,
    invocation_parser: Box<dyn InvocationParser>,
    observer: O,
    pch_aliases: PchAliases,
    makefile: Option<PathBuf>,
    session: Option<BuildSession>,
}

pub struct MakefileParserBuilder<O: BuildObserver> {
    config: IngestConfig,
    invocation_parser: Option<Box<dyn InvocationParser>>,
    observer: O,
}

impl MakefileParser<CollectingObserver> {
    pub fn builder() -> MakefileParserBuilder<CollectingObserver> {
        MakefileParserBuilder {
            config: IngestConfig::default(),
            invocation_parser: None,
            observer: CollectingObserver::default(),
        }
    }
}

impl<O: BuildObserver> MakefileParserBuilder<O> {
    pub fn config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn invocation_parser(mut self, parser: impl InvocationParser + 'static) -> Self {
        self.invocation_parser = Some(Box::new(parser));
        self
    }

    pub fn observer<P: BuildObserver>(self, observer: P) -> MakefileParserBuilder<P> {
        MakefileParserBuilder {
            config: self.config,
            invocation_parser: self.invocation_parser,
            observer,
        }
    }

    pub fn build(self) -> MakefileParser<O> {
        MakefileParser {
            config: self.config,
            invocation_parser: self
                .invocation_parser
                .unwrap_or_else(|| Box::new(GccInvocationParser::new())),
            observer: self.observer,
            pch_aliases: PchAliases::default(),
            makefile: None,
            session: None,
        }
    }
}

impl<O: BuildObserver> MakefileParser<O> {
    pub fn new(config: IngestConfig, observer: O) -> Self {
        MakefileParser::builder().config(config).observer(observer).build()
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn makefile(&self) -> Option<&Path> {
        self.makefile.as_deref()
    }

    pub fn session(&self) -> Option<&BuildSession> {
        self.session.as_ref()
    }

    /// True once the build process has exited. A parser that never spawned
    /// a process is not done.
    pub fn is_done(&self) -> bool {
        self.session.as_ref().map_or(false, BuildSession::is_done)
    }

    pub fn source_count(&self) -> usize {
        self.session.as_ref().map_or(0, BuildSession::source_count)
    }

    pub fn pch_count(&self) -> usize {
        self.session.as_ref().map_or(0, BuildSession::pch_count)
    }

    /// Records that the precompiled header `output` was generated from `input`.
    pub fn set_pch(&mut self, output: impl Into<PathBuf>, input: impl Into<PathBuf>) {
        self.pch_aliases.set(output, input);
    }

    /// Resolves candidate PCH artifacts to their input headers, in order,
    /// skipping candidates that were never recorded.
    pub fn map_pch_to_input<P: AsRef<Path>>(&self, candidates: &[P]) -> Vec<PathBuf> {
        self.pch_aliases.map_to_input(candidates)
    }

    /// Arguments passed to the build program, after the program itself.
    pub fn build_arguments(&self, makefile: &Path, directory: &Path, args: &[String]) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![
            "-j1".into(),
            "-w".into(),
            "-f".into(),
            makefile.into(),
            "-C".into(),
            directory.into(),
        ];
        argv.extend(self.config.make.fixed_args.iter().map(OsString::from));
        argv.extend(args.iter().map(OsString::from));
        argv
    }

    /// Shim to preload for this run, unless the caller disabled it.
    pub fn preload_for(&self, args: &[String]) -> Option<PathBuf> {
        if args.iter().any(|a| *a == self.config.make.disable_preload_flag) {
            debug!("Preload disabled by {}", self.config.make.disable_preload_flag);
            return None;
        }
        self.config.preload_library()
    }

    /// Runs the build to completion. Resolves once the build process has
    /// exited, after every invocation has been delivered to the observer.
    pub async fn run(&mut self, makefile: &Path, args: &[String]) -> Result<BuildSummary> {
        if self.session.is_some() {
            return Err(IngestError::SessionActive);
        }

        let makefile = makefile
            .canonicalize()
            .map_err(|source| IngestError::BuildFile {
                path: makefile.to_path_buf(),
                source,
            })?;
        let directory = makefile
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| IngestError::BuildFile {
                path: makefile.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "build file has no parent directory"),
            })?;

        let mut command = Command::new(&self.config.make.program);
        command
            .args(self.build_arguments(&makefile, &directory, args))
            .current_dir(&directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(shim) = self.preload_for(args) {
            command.env(PRELOAD_VARIABLE, shim);
        }

        match std::fs::remove_file(&self.config.make.shim_log) {
            Ok(()) => debug!(path = %self.config.make.shim_log.display(), "Removed stale shim log"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!(error = %e, "Could not remove shim log"),
        }

        info!(
            "{} -j1 -w -f {} -C {}",
            self.config.make.program,
            makefile.display(),
            directory.display()
        );
        self.makefile = Some(makefile);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = IngestError::Spawn {
                    program: self.config.make.program.clone(),
                    source,
                };
                error!(error = %err, "Error");
                self.observer.on_error(&err);
                return Err(err);
            }
        };

        let grace = Duration::from_millis(self.config.make.termination_grace_ms);
        let mut session = BuildSession::new(DirectoryTracker::new(directory), grace);
        session.attach(child);
        self.session = Some(session);

        match self.drive().await {
            Ok(summary) => {
                self.observer.on_done(&summary);
                Ok(summary)
            }
            Err(err) => {
                error!(error = %err, "Build session failed");
                if err.is_fatal() {
                    if let Some(session) = self.session.as_mut() {
                        session.kill().await;
                    }
                }
                self.observer.on_error(&err);
                Err(err)
            }
        }
    }

    /// Blocking form of [`run`](Self::run) for callers outside a runtime.
    pub fn run_blocking(&mut self, makefile: &Path, args: &[String]) -> Result<BuildSummary> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run(makefile, args))
    }

    async fn drive(&mut self) -> Result<BuildSummary> {
        let Self {
            config,
            invocation_parser,
            observer,
            pch_aliases,
            session,
            ..
        } = self;
        let session = session
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no build session"))?;

        let (mut stdout, mut stderr) = {
            let child = session
                .child_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no build process"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stderr not captured"))?;
            (stdout, stderr)
        };

        let mut dispatch = Dispatch {
            parser: &**invocation_parser,
            observer,
            extra_flags: &config.extra_flags,
            pch_aliases,
        };

        let mut out_chunk = vec![0u8; READ_CHUNK];
        let mut err_chunk = vec![0u8; READ_CHUNK];
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            tokio::select! {
                read = stdout.read(&mut out_chunk), if stdout_open => match read? {
                    0 => stdout_open = false,
                    n => session.feed(&out_chunk[..n], &mut dispatch)?,
                },
                read = stderr.read(&mut err_chunk), if stderr_open => match read? {
                    0 => stderr_open = false,
                    n => session.capture_stderr(&err_chunk[..n]),
                },
            }
        }
        session.finish_output();

        let child = session
            .child_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no build process"))?;
        let status = child.wait().await?;
        session.record_exit(status);

        Ok(BuildSummary {
            exit_code: status.code(),
            success: status.success(),
            source_count: session.source_count(),
            pch_count: session.pch_count(),
            stderr: session.stderr(),
        })
    }
}
