use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, trace, warn};

use super::line_buffer::LineBuffer;
use super::observer::BuildObserver;
use crate::error::TrackError;
use crate::invocation::InvocationParser;
use crate::tracker::{DirectoryTracker, TrackEvent};

// Upper bound on retained stderr; only the tail is kept.
const STDERR_LIMIT: usize = 64 * 1024;
const KILL_WAIT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Maps precompiled-header output artifacts back to the header they were
/// generated from.
#[derive(Debug, Clone, Default)]
pub struct PchAliases {
    outputs: HashMap<PathBuf, PathBuf>,
}

impl PchAliases {
    pub fn set(&mut self, output: impl Into<PathBuf>, input: impl Into<PathBuf>) {
        self.outputs.insert(output.into(), input.into());
    }

    pub fn get(&self, output: &Path) -> Option<&Path> {
        self.outputs.get(output).map(PathBuf::as_path)
    }

    /// Resolves candidates in order, skipping the ones never recorded.
    pub fn map_to_input<P: AsRef<Path>>(&self, candidates: &[P]) -> Vec<PathBuf> {
        candidates
            .iter()
            .filter_map(|c| self.outputs.get(c.as_ref()).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Collaborators a session needs while dispatching lines.
pub(crate) struct Dispatch<'a> {
    pub parser: &'a dyn InvocationParser,
    pub observer: &'a mut dyn BuildObserver,
    pub extra_flags: &'a [String],
    pub pch_aliases: &'a mut PchAliases,
}

/// State of one build run: the child process, its directory context and
/// the partial output not yet split into lines.
pub struct BuildSession {
    child: Option<Child>,
    tracker: DirectoryTracker,
    buffer: LineBuffer,
    stderr: Vec<u8>,
    source_count: usize,
    pch_count: usize,
    exit_status: Option<ExitStatus>,
    grace: Duration,
}

impl BuildSession {
    pub(crate) fn new(tracker: DirectoryTracker, grace: Duration) -> Self {
        Self {
            child: None,
            tracker,
            buffer: LineBuffer::new(),
            stderr: Vec::new(),
            source_count: 0,
            pch_count: 0,
            exit_status: None,
            grace,
        }
    }

    pub(crate) fn attach(&mut self, child: Child) {
        self.child = Some(child);
    }

    pub(crate) fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    pub fn tracker(&self) -> &DirectoryTracker {
        &self.tracker
    }

    pub fn source_count(&self) -> usize {
        self.source_count
    }

    pub fn pch_count(&self) -> usize {
        self.pch_count
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn is_done(&self) -> bool {
        self.exit_status.is_some()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Appends stdout bytes and dispatches every line they complete.
    pub(crate) fn feed(&mut self, bytes: &[u8], dispatch: &mut Dispatch<'_>) -> Result<(), TrackError> {
        self.buffer.push(bytes);
        while let Some(line) = self.buffer.next_line() {
            self.process_line(&line, dispatch)?;
        }
        Ok(())
    }

    pub(crate) fn process_line(&mut self, line: &str, dispatch: &mut Dispatch<'_>) -> Result<(), TrackError> {
        trace!("{}", line);
        match dispatch.parser.parse(line, self.tracker.path()) {
            Some(invocation) => {
                let invocation = invocation.with_extra_flags(dispatch.extra_flags);
                if invocation.is_pch() {
                    self.pch_count += 1;
                    if let Some(output) = &invocation.output {
                        dispatch.pch_aliases.set(output.clone(), invocation.source_file.clone());
                    }
                } else {
                    self.source_count += 1;
                }
                dispatch.observer.on_invocation(invocation);
            }
            None => {
                if let TrackEvent::Mismatch { .. } | TrackEvent::UnknownVerb { .. } =
                    self.tracker.track(line)?
                {
                    debug!(line, "Directory anomaly ignored");
                }
            }
        }
        Ok(())
    }

    pub(crate) fn capture_stderr(&mut self, bytes: &[u8]) {
        debug!(stderr = %String::from_utf8_lossy(bytes), "stderr");
        self.stderr.extend_from_slice(bytes);
        if self.stderr.len() > STDERR_LIMIT {
            let excess = self.stderr.len() - STDERR_LIMIT;
            self.stderr.drain(..excess);
        }
    }

    /// Called once both output streams reached end of file.
    pub(crate) fn finish_output(&mut self) {
        let dropped = self.buffer.discard_partial();
        if dropped > 0 {
            debug!(bytes = dropped, "Discarding unterminated final line");
        }
    }

    pub(crate) fn record_exit(&mut self, status: ExitStatus) {
        debug!(?status, "Build process finished");
        self.exit_status = Some(status);
    }

    /// Kills the child and waits for it; used when the session is aborted.
    pub(crate) async fn kill(&mut self) {
        if self.exit_status.is_some() {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Kill failed");
            }
            match child.wait().await {
                Ok(status) => self.exit_status = Some(status),
                Err(e) => warn!(error = %e, "Failed to reap killed build process"),
            }
        }
    }

    fn poll_exit(child: &mut Child, deadline: Instant) -> Option<ExitStatus> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if Instant::now() < deadline => std::thread::sleep(POLL_INTERVAL),
                Ok(None) => return None,
                Err(e) => {
                    debug!(error = %e, "try_wait failed");
                    return None;
                }
            }
        }
    }

    fn reap(child: &mut Child, grace: Duration) {
        Self::terminate_gracefully(child);
        if Self::poll_exit(child, Instant::now() + grace).is_some() {
            return;
        }

        warn!(pid = ?child.id(), "Killing build process that ignored SIGTERM");
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Kill failed");
        }
        if Self::poll_exit(child, Instant::now() + KILL_WAIT).is_none() {
            warn!(pid = ?child.id(), "Build process did not exit after SIGKILL");
        }
    }

    #[cfg(unix)]
    fn terminate_gracefully(child: &Child) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            return;
        };
        let Ok(pid) = i32::try_from(pid) else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM failed");
        }
    }

    #[cfg(not(unix))]
    fn terminate_gracefully(_child: &Child) {}
}

impl Drop for BuildSession {
    /// Terminates a still-running build and reaps it. This blocks for at most
    /// the grace period plus `KILL_WAIT`; on a multi-threaded runtime the
    /// worker hands its other tasks off first.
    fn drop(&mut self) {
        if self.exit_status.is_some() {
            return;
        }
        let grace = self.grace;
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }

        let on_worker = Handle::try_current()
            .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
            .unwrap_or(false);
        if on_worker {
            tokio::task::block_in_place(|| Self::reap(child, grace));
        } else {
            Self::reap(child, grace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::observer::CollectingObserver;
    use crate::invocation::GccInvocationParser;
    use crate::types::InvocationKind;
    use tempfile::TempDir;

    struct Harness {
        parser: GccInvocationParser,
        observer: CollectingObserver,
        extra_flags: Vec<String>,
        pch_aliases: PchAliases,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                parser: GccInvocationParser::new(),
                observer: CollectingObserver::default(),
                extra_flags: vec!["-DINDEXING".to_string()],
                pch_aliases: PchAliases::default(),
            }
        }

        fn feed(&mut self, session: &mut BuildSession, bytes: &[u8]) -> Result<(), TrackError> {
            let mut dispatch = Dispatch {
                parser: &self.parser,
                observer: &mut self.observer,
                extra_flags: &self.extra_flags,
                pch_aliases: &mut self.pch_aliases,
            };
            session.feed(bytes, &mut dispatch)
        }
    }

    fn fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    fn session(root: &Path) -> BuildSession {
        BuildSession::new(DirectoryTracker::new(root), Duration::from_millis(10))
    }

    #[test]
    fn test_invocation_inside_sub_make() {
        let (_dir, root) = fixture();
        let lib = root.join("lib");
        let mut session = session(&root);
        let mut harness = Harness::new();

        let output = format!(
            "make[1]: Entering directory `{lib}'\ngcc -Iinc -c foo.c -o foo.o\nmake[1]: Leaving directory `{lib}'\n",
            lib = lib.display()
        );
        harness.feed(&mut session, output.as_bytes()).unwrap();

        let invocations = &harness.observer.invocations;
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].source_file, lib.join("foo.c"));
        assert_eq!(invocations[0].working_directory, lib);
        assert_eq!(invocations[0].kind, InvocationKind::Compile);
        assert!(invocations[0].flags.contains(&"-DINDEXING".to_string()));
        assert_eq!(session.tracker().depth(), 1);
        assert_eq!(session.source_count(), 1);
        assert_eq!(session.pch_count(), 0);
    }

    #[test]
    fn test_invocations_do_not_touch_tracker() {
        let (_dir, root) = fixture();
        let mut session = session(&root);
        let mut harness = Harness::new();

        // Parses as an invocation, so it must never be read as an announcement.
        harness
            .feed(&mut session, b"gcc -c 'make: Entering directory `lib'\\''.c'\n")
            .unwrap();
        assert_eq!(harness.observer.invocations.len(), 1);
        assert_eq!(session.tracker().depth(), 1);
        assert_eq!(session.tracker().path(), root.as_path());
    }

    #[test]
    fn test_partial_lines_wait_for_newline() {
        let (_dir, root) = fixture();
        let mut session = session(&root);
        let mut harness = Harness::new();

        harness.feed(&mut session, b"gcc -c a.c\ngcc -c b").unwrap();
        assert_eq!(harness.observer.invocations.len(), 1);
        harness.feed(&mut session, b".c\ngcc -c trailing.c").unwrap();
        assert_eq!(harness.observer.invocations.len(), 2);

        session.finish_output();
        assert_eq!(harness.observer.invocations.len(), 2);
        assert_eq!(harness.observer.invocations[1].source_file, root.join("b.c"));
    }

    #[test]
    fn test_pch_generation_is_aliased() {
        let (_dir, root) = fixture();
        let mut session = session(&root);
        let mut harness = Harness::new();

        harness
            .feed(
                &mut session,
                b"g++ -x c++-header pch.h -o pch.h.gch\ng++ -include pch.h -c main.cpp\n",
            )
            .unwrap();

        assert_eq!(session.pch_count(), 1);
        assert_eq!(session.source_count(), 1);
        let compile = &harness.observer.invocations[1];
        assert_eq!(
            harness.pch_aliases.map_to_input(&compile.pch_references()),
            vec![root.join("pch.h")]
        );
    }

    #[test]
    fn test_fatal_directory_error_stops_dispatch() {
        let (_dir, root) = fixture();
        let mut session = session(&root);
        let mut harness = Harness::new();

        let err = harness
            .feed(
                &mut session,
                b"make[1]: Entering directory `nowhere'\ngcc -c lost.c\n",
            )
            .unwrap_err();
        assert!(matches!(err, TrackError::Unresolvable { .. }));
        assert!(harness.observer.invocations.is_empty());
    }

    #[test]
    fn test_unknown_verb_is_not_fatal() {
        let (_dir, root) = fixture();
        let mut session = session(&root);
        let mut harness = Harness::new();

        harness
            .feed(&mut session, b"make: unknown-verb directory `/x'\ngcc -c a.c\n")
            .unwrap();
        assert_eq!(session.tracker().depth(), 1);
        assert_eq!(harness.observer.invocations.len(), 1);
    }

    #[test]
    fn test_stderr_keeps_tail() {
        let (_dir, root) = fixture();
        let mut session = session(&root);
        session.capture_stderr(&vec![b'a'; STDERR_LIMIT]);
        session.capture_stderr(b"warning: last");
        let stderr = session.stderr();
        assert_eq!(stderr.len(), STDERR_LIMIT);
        assert!(stderr.ends_with("warning: last"));
    }

    #[test]
    fn test_map_to_input_skips_unknown() {
        let mut aliases = PchAliases::default();
        aliases.set("/b/x.gch", "/b/x.h");
        aliases.set("/b/y.pch", "/b/y.h");
        let mapped = aliases.map_to_input(&["/b/y.pch", "/b/missing.gch", "/b/x.gch"]);
        assert_eq!(mapped, vec![PathBuf::from("/b/y.h"), PathBuf::from("/b/x.h")]);
    }
}
