use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::engine::{SourceAnalysisEngine, TranslationUnit};
use super::fingerprint::{Fingerprints, Staleness};
use super::preprocess::HeaderPreprocessor;
use super::signature::PrecompileSignature;
use crate::config::FingerprintMode;
use crate::error::PrecompileError;

#[derive(Debug)]
struct EntryState {
    header_file_path: PathBuf,
    data: Vec<u8>,
    dependencies: Fingerprints,
    unit: Option<TranslationUnit>,
    // Bumped by `clear` so a parse started before it is not stored.
    generation: u64,
}

/// One precompiled header: its accumulated source, the dependencies it was
/// built from and, once parsed, the translation unit.
#[derive(Debug)]
pub struct PrecompileEntry {
    signature: PrecompileSignature,
    mode: FingerprintMode,
    state: Mutex<EntryState>,
    // Held for the whole of `precompile` so one entry parses at a time.
    build: Mutex<()>,
}

impl PrecompileEntry {
    pub(crate) fn new(
        signature: PrecompileSignature,
        header_file_path: PathBuf,
        dependencies: Fingerprints,
        mode: FingerprintMode,
    ) -> Self {
        Self {
            signature,
            mode,
            state: Mutex::new(EntryState {
                header_file_path,
                data: Vec::new(),
                dependencies,
                unit: None,
                generation: 0,
            }),
            build: Mutex::new(()),
        }
    }

    pub fn signature(&self) -> &PrecompileSignature {
        &self.signature
    }

    pub fn header_file_path(&self) -> PathBuf {
        self.state.lock().header_file_path.clone()
    }

    pub fn data(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    pub fn dependencies(&self) -> Fingerprints {
        self.state.lock().dependencies.clone()
    }

    pub fn set_dependencies(&self, dependencies: Fingerprints) {
        self.state.lock().dependencies = dependencies;
    }

    /// The cached parse, if any. Not checked against the fingerprints.
    pub fn translation_unit(&self) -> Option<TranslationUnit> {
        self.state.lock().unit.clone()
    }

    /// Appends to the header source that the next parse will see.
    pub fn add_data(&self, bytes: &[u8]) {
        self.state.lock().data.extend_from_slice(bytes);
    }

    /// Drops the accumulated data and the parsed unit. Signature and
    /// fingerprints are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.data.clear();
        state.unit = None;
        state.generation += 1;
    }

    /// Compares the recorded fingerprints with the filesystem.
    pub fn staleness(&self) -> Staleness {
        self.dependencies().staleness()
    }

    /// Parses the accumulated data, or returns the unit a previous or
    /// concurrent call already produced.
    ///
    /// On failure no unit is stored and the call may be retried. If the
    /// entry is cleared while the parse runs, the unit is returned but not
    /// kept. Fingerprints are those of the files as the preprocessor read
    /// them.
    pub fn precompile(
        &self,
        system_includes: &[PathBuf],
        engine: &dyn SourceAnalysisEngine,
    ) -> Result<TranslationUnit, PrecompileError> {
        let _building = self.build.lock();

        let (data, header, generation) = {
            let state = self.state.lock();
            if let Some(unit) = &state.unit {
                return Ok(unit.clone());
            }
            (state.data.clone(), state.header_file_path.clone(), state.generation)
        };
        if data.is_empty() {
            return Err(PrecompileError::Empty(header));
        }

        let include_paths = self.signature.include_paths();
        let preprocessed = HeaderPreprocessor::new(&include_paths, system_includes)
            .fingerprint_mode(self.mode)
            .run(&data, &header)
            .map_err(|e| {
                warn!(header = %header.display(), error = %e, "Preprocessing failed");
                e
            })?;

        let unit = engine
            .parse(&header, &preprocessed.source, self.signature.flags())
            .map_err(|e| {
                warn!(header = %header.display(), error = %e, "Precompile failed");
                PrecompileError::from(e)
            })?;

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(signature = %self.signature, "Entry cleared during precompile, result discarded");
            return Ok(unit);
        }
        info!(
            signature = %self.signature,
            dependencies = preprocessed.fingerprints.len(),
            "Precompiled header"
        );
        state.dependencies = preprocessed.fingerprints;
        state.unit = Some(unit.clone());
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::path::Path;
    use crate::precompile::engine::MockSourceAnalysisEngine;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn entry(header: &Path) -> PrecompileEntry {
        PrecompileEntry::new(
            PrecompileSignature::new(header, vec!["-DX".to_string()]),
            header.to_path_buf(),
            Fingerprints::new(),
            FingerprintMode::Content,
        )
    }

    fn engine_returning(tag: &'static str) -> MockSourceAnalysisEngine {
        let mut engine = MockSourceAnalysisEngine::new();
        engine
            .expect_parse()
            .returning(move |_, _, _| Ok(TranslationUnit::new(tag)));
        engine
    }

    #[test]
    fn test_add_data_appends() {
        let e = entry(Path::new("/virtual/pch.h"));
        e.add_data(b"#include <a.h>\n");
        e.add_data(b"#include <b.h>\n");
        assert_eq!(e.data(), b"#include <a.h>\n#include <b.h>\n");
    }

    #[test]
    fn test_precompile_passes_expanded_source_and_flags() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join("dep.h"), "int dep;\n").unwrap();
        let header = root.join("pch.h");
        std::fs::write(&header, "#include \"dep.h\"\n").unwrap();

        let e = entry(&header);
        e.add_data(b"#include \"dep.h\"\n");

        let mut engine = MockSourceAnalysisEngine::new();
        engine
            .expect_parse()
            .withf(|_, source, flags| {
                source.to_vec() == b"int dep;\n".to_vec() && flags.to_vec() == vec!["-DX".to_string()]
            })
            .times(1)
            .returning(|_, _, _| Ok(TranslationUnit::new(7u32)));

        let unit = e.precompile(&[], &engine).unwrap();
        assert_eq!(unit.downcast_ref::<u32>(), Some(&7));

        // Cached: the engine is not called again.
        let again = e.precompile(&[], &engine).unwrap();
        assert!(again.ptr_eq(&unit));

        let deps = e.dependencies();
        assert!(deps.get(&header).is_some());
        assert!(deps.get(&root.join("dep.h")).is_some());
        assert!(e.staleness().is_fresh());
    }

    #[test]
    fn test_failed_precompile_leaves_no_unit() {
        let e = entry(Path::new("/virtual/pch.h"));
        e.add_data(b"int x;\n");

        let mut engine = MockSourceAnalysisEngine::new();
        engine
            .expect_parse()
            .times(1)
            .returning(|_, _, _| Err(EngineError::Parse("syntax error".to_string())));

        let err = e.precompile(&[], &engine).unwrap_err();
        assert!(matches!(err, PrecompileError::Engine(_)));
        assert!(e.translation_unit().is_none());

        // Retry succeeds once the engine does.
        let unit = e.precompile(&[], &engine_returning("ok")).unwrap();
        assert_eq!(unit.downcast_ref::<&str>(), Some(&"ok"));
    }

    #[test]
    fn test_missing_include_is_left_for_the_engine() {
        let e = entry(Path::new("/virtual/pch.h"));
        e.add_data(b"#include <does_not_exist.h>\n");

        let mut engine = MockSourceAnalysisEngine::new();
        engine
            .expect_parse()
            .withf(|_, source, _| source.to_vec() == b"#include <does_not_exist.h>\n".to_vec())
            .times(1)
            .returning(|_, _, _| Ok(TranslationUnit::new("kept")));

        e.precompile(&[], &engine).unwrap();
        assert!(e.translation_unit().is_some());
        assert!(e.dependencies().is_empty());
    }

    #[test]
    fn test_edit_during_parse_leaves_entry_stale() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let dep = root.join("dep.h");
        std::fs::write(&dep, "int dep;\n").unwrap();
        let header = root.join("pch.h");

        let e = entry(&header);
        e.add_data(b"#include \"dep.h\"\n");

        let edited = dep.clone();
        let mut engine = MockSourceAnalysisEngine::new();
        engine.expect_parse().times(1).returning(move |_, _, _| {
            std::fs::write(&edited, "int changed;\n").unwrap();
            Ok(TranslationUnit::new("old content"))
        });

        e.precompile(&[], &engine).unwrap();
        assert_eq!(e.staleness(), Staleness::Stale(vec![dep]));
    }

    struct SlowEngine;

    impl SourceAnalysisEngine for SlowEngine {
        fn parse(&self, _: &Path, _: &[u8], _: &[String]) -> Result<TranslationUnit, EngineError> {
            std::thread::sleep(std::time::Duration::from_millis(200));
            Ok(TranslationUnit::new("slow"))
        }
    }

    #[test]
    fn test_clear_during_parse_discards_result() {
        let e = std::sync::Arc::new(entry(Path::new("/virtual/pch.h")));
        e.add_data(b"int x;\n");

        let worker = {
            let e = e.clone();
            std::thread::spawn(move || e.precompile(&[], &SlowEngine))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        e.clear();

        let unit = worker.join().unwrap().unwrap();
        assert_eq!(unit.downcast_ref::<&str>(), Some(&"slow"));
        assert!(e.data().is_empty());
        assert!(e.translation_unit().is_none());
    }

    #[test]
    fn test_empty_entry_cannot_precompile() {
        let e = entry(Path::new("/virtual/pch.h"));
        let err = e.precompile(&[], &engine_returning("unused")).unwrap_err();
        assert!(matches!(err, PrecompileError::Empty(_)));
    }

    #[test]
    fn test_stale_unit_survives_until_clear() {
        let dir = TempDir::new().unwrap();
        let header = dir.path().join("header.h");
        std::fs::write(&header, "int a;\n").unwrap();

        let e = PrecompileEntry::new(
            PrecompileSignature::new(&header, Vec::new()),
            header.clone(),
            Fingerprints::capture([&header], FingerprintMode::Content).unwrap(),
            FingerprintMode::Content,
        );
        e.add_data(b"int a;\n");
        let first = e.precompile(&[], &engine_returning("first")).unwrap();

        std::fs::write(&header, "int b;\n").unwrap();
        assert_eq!(e.staleness(), Staleness::Stale(vec![header.clone()]));
        assert!(e.translation_unit().unwrap().ptr_eq(&first));

        e.clear();
        assert!(e.translation_unit().is_none());
        assert!(e.data().is_empty());
        assert_eq!(e.dependencies().len(), 1);

        e.add_data(b"int b;\n");
        let second = e.precompile(&[], &engine_returning("second")).unwrap();
        assert!(!second.ptr_eq(&first));
        assert!(e.staleness().is_fresh());
    }

    proptest! {
        #[test]
        fn test_accumulation_is_concatenation(
            a in proptest::collection::vec(any::<u8>(), 0..256),
            b in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let e = entry(Path::new("/virtual/pch.h"));
            e.add_data(&a);
            e.add_data(&b);
            let mut expected = a.clone();
            expected.extend_from_slice(&b);
            prop_assert_eq!(e.data(), expected);
        }
    }
}
