use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::entry::PrecompileEntry;
use super::fingerprint::Fingerprints;
use super::signature::PrecompileSignature;
use crate::config::{FingerprintMode, PrecompileConfig};

#[derive(Debug, Default)]
struct Slots {
    entries: Vec<Arc<PrecompileEntry>>,
    index: HashMap<PrecompileSignature, usize>,
}

/// Daemon-wide set of precompiled headers, one entry per signature.
///
/// Construct one at startup and share it (it is `Sync`); [`cleanup`] tears
/// every entry down. Enumeration follows insertion order.
///
/// [`cleanup`]: PrecompileRegistry::cleanup
#[derive(Debug, Default)]
pub struct PrecompileRegistry {
    slots: RwLock<Slots>,
    mode: FingerprintMode,
}

impl PrecompileRegistry {
    pub fn new(mode: FingerprintMode) -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
            mode,
        }
    }

    pub fn from_config(config: &PrecompileConfig) -> Self {
        Self::new(config.fingerprint_mode)
    }

    /// Returns the entry for `signature`, creating it on first request.
    pub fn precompiler(&self, signature: &PrecompileSignature) -> Arc<PrecompileEntry> {
        if let Some(entry) = self.get(signature) {
            return entry;
        }

        let slots = self.slots.upgradable_read();
        if let Some(&idx) = slots.index.get(signature) {
            return Arc::clone(&slots.entries[idx]);
        }

        let mut slots = RwLockUpgradableReadGuard::upgrade(slots);
        let entry = Arc::new(PrecompileEntry::new(
            signature.clone(),
            signature.header().to_path_buf(),
            Fingerprints::new(),
            self.mode,
        ));
        let idx = slots.entries.len();
        slots.entries.push(Arc::clone(&entry));
        slots.index.insert(signature.clone(), idx);
        debug!(%signature, "New precompile entry");
        entry
    }

    /// Installs a fresh entry with known fingerprints, replacing any entry
    /// already registered for `signature` in place.
    pub fn create(
        &self,
        signature: &PrecompileSignature,
        header_file_path: impl Into<PathBuf>,
        dependencies: Fingerprints,
    ) -> Arc<PrecompileEntry> {
        let entry = Arc::new(PrecompileEntry::new(
            signature.clone(),
            header_file_path.into(),
            dependencies,
            self.mode,
        ));

        let mut slots = self.slots.write();
        match slots.index.get(signature).copied() {
            Some(idx) => {
                debug!(%signature, "Replacing precompile entry");
                slots.entries[idx] = Arc::clone(&entry);
            }
            None => {
                let idx = slots.entries.len();
                slots.entries.push(Arc::clone(&entry));
                slots.index.insert(signature.clone(), idx);
            }
        }
        entry
    }

    pub fn get(&self, signature: &PrecompileSignature) -> Option<Arc<PrecompileEntry>> {
        let slots = self.slots.read();
        slots.index.get(signature).map(|&idx| Arc::clone(&slots.entries[idx]))
    }

    /// Snapshot of all live entries in insertion order.
    pub fn precompiles(&self) -> Vec<Arc<PrecompileEntry>> {
        self.slots.read().entries.clone()
    }

    /// Drops every entry. Handles already given out stay usable but are no
    /// longer reachable through the registry.
    pub fn cleanup(&self) {
        let mut slots = self.slots.write();
        debug!(entries = slots.entries.len(), "Cleaning up precompile registry");
        slots.entries.clear();
        slots.index.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
