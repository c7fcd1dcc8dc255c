use anyhow::Result;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebouncedEvent, Debouncer, NoCache, new_debouncer};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error};

/// Watches a set of ledger files and calls `on_change` when any of them is written, created or
/// removed.
///
/// The parent directories are watched instead of the files themselves, so editors that replace
/// a file by renaming over it are still noticed.
pub struct FileWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher, NoCache>,
}

impl FileWatcher {
    pub fn new<F>(files: &[PathBuf], on_change: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let watched: BTreeSet<PathBuf> = files.iter().map(|file| normalize(file)).collect();
        let directories: BTreeSet<PathBuf> = watched
            .iter()
            .filter_map(|file| file.parent().map(Path::to_path_buf))
            .collect();

        let mut debouncer = new_debouncer(
            Duration::from_millis(100),
            None,
            move |res: Result<Vec<DebouncedEvent>, _>| {
                let events = match res {
                    Ok(events) => events,
                    Err(e) => {
                        error!("Watch error: {:?}", e);
                        return;
                    }
                };

                let relevant = events
                    .iter()
                    .filter(|e| {
                        matches!(
                            e.event.kind,
                            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                        )
                    })
                    .filter(|e| e.event.paths.iter().any(|p| watched.contains(&normalize(p))))
                    .count();

                if relevant > 0 {
                    debug!("Ledger file modification detected: {relevant} events");
                    on_change();
                }
            },
        )?;

        for directory in &directories {
            debug!("Watching directory: {:?}", directory);
            debouncer.watch(directory, RecursiveMode::NonRecursive)?;
        }

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
