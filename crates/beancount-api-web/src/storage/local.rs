use anyhow::Result;
use async_trait::async_trait;
use beancount_api::{Ledger, SourceFile};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{StorageProvider, fingerprint_disk, fingerprint_sources, load_blocking};
use crate::watcher::FileWatcher;

/// Reads the ledger from the local filesystem.
///
/// Change detection compares a hash of the entrypoint and every included file. With watching
/// enabled the hash is only recomputed after the file watcher saw one of those files change.
pub struct LocalStorage {
    entrypoint: PathBuf,
    watch: bool,
    dirty: Arc<AtomicBool>,
    state: Mutex<LoadState>,
}

#[derive(Default)]
struct LoadState {
    files: Vec<PathBuf>,
    fingerprint: String,
    watcher: Option<FileWatcher>,
}

impl LocalStorage {
    pub fn new(entrypoint: PathBuf, watch: bool) -> Self {
        LocalStorage {
            entrypoint,
            watch,
            dirty: Arc::new(AtomicBool::new(true)),
            state: Mutex::new(LoadState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remembers what a load was built from. The fingerprint covers the text that was parsed, so
    /// a write landing after the read still counts as a change.
    fn record(&self, sources: &[SourceFile]) {
        let files: Vec<PathBuf> = sources.iter().map(|source| source.path.clone()).collect();
        let fingerprint = fingerprint_sources(sources);

        let rewatch = {
            let state = self.state();
            state.files != files || state.watcher.is_none()
        };
        let watcher = rewatch.then(|| self.watch_files(&files));

        let mut state = self.state();
        if let Some(watcher) = watcher {
            // a fresh watcher has not seen writes made since the read
            self.dirty.store(true, Ordering::SeqCst);
            state.watcher = watcher;
        }
        tracing::debug!(
            "Loaded {} ledger files from {}",
            files.len(),
            self.entrypoint.display()
        );
        state.files = files;
        state.fingerprint = fingerprint;
    }

    fn watch_files(&self, files: &[PathBuf]) -> Option<FileWatcher> {
        if !self.watch {
            return None;
        }
        let dirty = self.dirty.clone();
        match FileWatcher::new(files, move || dirty.store(true, Ordering::SeqCst)) {
            Ok(watcher) => Some(watcher),
            Err(error) => {
                tracing::warn!("Falling back to polling, cannot watch ledger files: {error:#}");
                None
            }
        }
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn load(&self) -> Result<Ledger> {
        // events arriving while we read mark the new snapshot stale again
        self.dirty.store(false, Ordering::SeqCst);

        let loaded = load_blocking(self.entrypoint.clone()).await?;
        self.record(&loaded.sources);
        Ok(loaded.ledger)
    }

    async fn changed(&self, _current: &Ledger) -> Result<bool> {
        let (files, previous, watching) = {
            let state = self.state();
            (
                state.files.clone(),
                state.fingerprint.clone(),
                state.watcher.is_some(),
            )
        };
        if watching && !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }

        let current = tokio::task::spawn_blocking(move || fingerprint_disk(&files)).await?;
        Ok(current != previous)
    }
}
