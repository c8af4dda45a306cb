use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::error::IngestError;
use crate::types::{BuildSummary, CompilerInvocation};

/// Receives the events of a build session, synchronously and in the order
/// the build produced them.
pub trait BuildObserver: Send {
    /// A line parsed as a compiler invocation.
    fn on_invocation(&mut self, invocation: CompilerInvocation);

    /// The build process exited, whatever its exit code.
    fn on_done(&mut self, _summary: &BuildSummary) {}

    /// Spawning or reading the build failed, or the session was aborted.
    fn on_error(&mut self, _error: &IngestError) {}
}

impl<F> BuildObserver for F
where
    F: FnMut(CompilerInvocation) + Send,
{
    fn on_invocation(&mut self, invocation: CompilerInvocation) {
        self(invocation)
    }
}

/// Forwards invocations to a consumer task, e.g. an indexing scheduler.
impl BuildObserver for UnboundedSender<CompilerInvocation> {
    fn on_invocation(&mut self, invocation: CompilerInvocation) {
        if self.send(invocation).is_err() {
            debug!("Invocation consumer went away");
        }
    }
}

/// Keeps every event; handy for batch callers that only want the result.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    pub invocations: Vec<CompilerInvocation>,
    pub summary: Option<BuildSummary>,
    pub errors: Vec<String>,
}

impl BuildObserver for CollectingObserver {
    fn on_invocation(&mut self, invocation: CompilerInvocation) {
        self.invocations.push(invocation);
    }

    fn on_done(&mut self, summary: &BuildSummary) {
        self.summary = Some(summary.clone());
    }

    fn on_error(&mut self, error: &IngestError) {
        self.errors.push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InvocationKind;
    use std::path::PathBuf;

    fn invocation(source: &str) -> CompilerInvocation {
        CompilerInvocation {
            working_directory: PathBuf::from("/src"),
            compiler: "cc".to_string(),
            source_file: PathBuf::from(source),
            kind: InvocationKind::Compile,
            flags: vec!["-c".to_string(), source.to_string()],
            output: None,
            raw_line: format!("cc -c {}", source),
        }
    }

    #[test]
    fn test_sender_forwards_in_order() {
        let (mut tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<CompilerInvocation>();
        tx.on_invocation(invocation("/src/a.c"));
        tx.on_invocation(invocation("/src/b.c"));
        drop(tx);

        let first = tokio_test::block_on(rx.recv()).unwrap();
        let second = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(first.source_file, PathBuf::from("/src/a.c"));
        assert_eq!(second.source_file, PathBuf::from("/src/b.c"));
        assert!(tokio_test::block_on(rx.recv()).is_none());
    }

    #[test]
    fn test_sender_survives_closed_receiver() {
        let (mut tx, rx) = tokio::sync::mpsc::unbounded_channel::<CompilerInvocation>();
        drop(rx);
        tx.on_invocation(invocation("/src/a.c"));
    }

    #[test]
    fn test_collecting_observer_records_everything() {
        let mut observer = CollectingObserver::default();
        observer.on_invocation(invocation("/src/a.c"));
        observer.on_done(&BuildSummary {
            exit_code: Some(0),
            success: true,
            source_count: 1,
            ..Default::default()
        });
        observer.on_error(&IngestError::SessionActive);

        assert_eq!(observer.invocations.len(), 1);
        assert_eq!(observer.summary.as_ref().map(|s| s.source_count), Some(1));
        assert_eq!(observer.errors.len(), 1);
    }

    #[test]
    fn test_closure_observer() {
        let mut count = 0;
        {
            let mut observer = |_: CompilerInvocation| count += 1;
            observer.on_invocation(invocation("/src/a.c"));
            observer.on_done(&BuildSummary::default());
        }
        assert_eq!(count, 1);
    }
}
