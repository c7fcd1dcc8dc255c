//! The process-wide ledger snapshot and its background refresher.

use anyhow::{Context, Result};
use beancount_api::Ledger;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::storage::StorageProvider;

/// Published after a new snapshot replaced the old one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReloadEvent {
    pub entries: usize,
    pub errors: usize,
}

/// Holds the current [`Ledger`] snapshot.
///
/// Readers get a cheap `Arc` clone of whatever snapshot is current. A refresh builds the next
/// snapshot completely before swapping it in, so a reader never sees a partial one, and a
/// reference handed out earlier keeps pointing at the old snapshot.
pub struct SnapshotCache {
    storage: Arc<dyn StorageProvider>,
    interval: Duration,
    current: Mutex<Arc<Ledger>>,
    // serializes refreshes; never taken by readers
    writer: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ReloadEvent>,
}

impl SnapshotCache {
    /// Performs the initial load. Failing here means the server must not start.
    pub async fn prime(storage: Arc<dyn StorageProvider>, interval: Duration) -> Result<Arc<Self>> {
        let ledger = storage
            .load()
            .await
            .context("Failed to load the initial ledger")?;
        tracing::info!(
            "Loaded ledger with {} entries and {} errors",
            ledger.entries().len(),
            ledger.errors().len()
        );

        let (events, _) = broadcast::channel(16);
        Ok(Arc::new(SnapshotCache {
            storage,
            interval,
            current: Mutex::new(Arc::new(ledger)),
            writer: tokio::sync::Mutex::new(()),
            events,
        }))
    }

    pub fn get(&self) -> Arc<Ledger> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Reloads the snapshot if the storage reports a change. Returns whether a swap happened.
    ///
    /// A failed change check counts as "unchanged". A failed load leaves the current snapshot
    /// in place and is returned to the caller.
    pub async fn refresh(&self) -> Result<bool> {
        let _writer = self.writer.lock().await;

        let current = self.get();
        match self.storage.changed(&current).await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(error) => {
                tracing::error!("Failed to check the ledger for changes: {error:#}");
                return Ok(false);
            }
        }
        drop(current);

        let ledger = Arc::new(
            self.storage
                .load()
                .await
                .context("Failed to reload the ledger")?,
        );
        let event = ReloadEvent {
            entries: ledger.entries().len(),
            errors: ledger.errors().len(),
        };

        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = ledger;
        tracing::info!(
            "Reloaded ledger with {} entries and {} errors",
            event.entries,
            event.errors
        );
        // no subscribers is fine
        let _ = self.events.send(event);

        Ok(true)
    }

    /// Starts the background loop: sleep for the interval, refresh, repeat until `shutdown` is
    /// cancelled. Failures are logged and the loop keeps going.
    pub fn spawn_refresher(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(cache.interval) => {}
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = cache.refresh() => {
                        if let Err(error) = result {
                            tracing::error!("{error:#}");
                        }
                    }
                }
            }
            tracing::debug!("Ledger refresher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INTERVAL: Duration = Duration::from_secs(5);

    fn ledger(accounts: &[&str]) -> Ledger {
        let source: String = accounts
            .iter()
            .map(|account| format!("2024-01-01 open {account}\n"))
            .collect();
        Ledger::from_source(&source)
    }

    /// Replays a fixed sequence of `changed` and `load` outcomes.
    #[derive(Default)]
    struct Scripted {
        changes: Mutex<VecDeque<Result<bool, String>>>,
        loads: Mutex<VecDeque<Result<Ledger, String>>>,
        load_calls: AtomicUsize,
        change_calls: AtomicUsize,
    }

    impl Scripted {
        fn new(
            changes: impl IntoIterator<Item = Result<bool, String>>,
            loads: impl IntoIterator<Item = Result<Ledger, String>>,
        ) -> Arc<Self> {
            Arc::new(Scripted {
                changes: Mutex::new(changes.into_iter().collect()),
                loads: Mutex::new(loads.into_iter().collect()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl StorageProvider for Scripted {
        async fn load(&self) -> Result<Ledger> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.loads.lock().unwrap().pop_front();
            match next {
                Some(Ok(ledger)) => Ok(ledger),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Err(anyhow::anyhow!("no more scripted loads")),
            }
        }

        async fn changed(&self, _current: &Ledger) -> Result<bool> {
            self.change_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.changes.lock().unwrap().pop_front();
            match next {
                Some(Ok(changed)) => Ok(changed),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Ok(false),
            }
        }
    }

    #[tokio::test]
    async fn priming_failure_is_fatal() {
        let storage = Scripted::new([], [Err("bucket unreachable".to_string())]);

        let error = SnapshotCache::prime(storage, INTERVAL).await.err().unwrap();
        assert!(format!("{error:#}").contains("bucket unreachable"));
    }

    #[tokio::test]
    async fn refresh_swaps_snapshot() {
        let first = ledger(&["Assets:Cash"]);
        let second = ledger(&["Assets:Cash", "Assets:Bank"]);
        let storage = Scripted::new(
            [Ok(false), Ok(true)],
            [Ok(first.clone()), Ok(second.clone())],
        );
        let cache = SnapshotCache::prime(storage.clone(), INTERVAL).await.unwrap();
        let mut events = cache.subscribe();

        let before = cache.get();
        assert_eq!(*before, first);

        assert!(!cache.refresh().await.unwrap());
        assert_eq!(*cache.get(), first);
        assert_eq!(storage.load_calls.load(Ordering::SeqCst), 1);

        assert!(cache.refresh().await.unwrap());
        assert_eq!(*cache.get(), second);
        assert_eq!(
            events.try_recv().unwrap(),
            ReloadEvent {
                entries: 2,
                errors: 0
            }
        );

        // a reference taken before the swap still sees the complete old snapshot
        assert_eq!(*before, first);
    }

    #[tokio::test]
    async fn failed_reload_keeps_old_snapshot() {
        let first = ledger(&["Assets:Cash"]);
        let storage = Scripted::new(
            [Ok(true), Err("listing failed".to_string())],
            [Ok(first.clone()), Err("parse failed".to_string())],
        );
        let cache = SnapshotCache::prime(storage, INTERVAL).await.unwrap();

        assert!(cache.refresh().await.is_err());
        assert_eq!(*cache.get(), first);

        // a failing change check is treated as unchanged
        assert!(!cache.refresh().await.unwrap());
        assert_eq!(*cache.get(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn refresher_survives_failures() {
        let first = ledger(&["Assets:Cash"]);
        let second = ledger(&["Assets:Cash", "Assets:Bank"]);
        let storage = Scripted::new(
            [Ok(true), Ok(true)],
            [
                Ok(first.clone()),
                Err("temporarily unreachable".to_string()),
                Ok(second.clone()),
            ],
        );
        let cache = SnapshotCache::prime(storage.clone(), INTERVAL).await.unwrap();
        let shutdown = CancellationToken::new();
        let refresher = cache.spawn_refresher(shutdown.clone());

        // nothing happens before the first interval elapses
        tokio::time::sleep(INTERVAL / 2).await;
        assert_eq!(storage.change_calls.load(Ordering::SeqCst), 0);

        // first tick: the reload fails and the old snapshot stays
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(storage.load_calls.load(Ordering::SeqCst), 2);
        assert_eq!(*cache.get(), first);

        // second tick: the loop is still running and picks up the change
        tokio::time::sleep(INTERVAL).await;
        assert_eq!(storage.load_calls.load(Ordering::SeqCst), 3);
        assert_eq!(*cache.get(), second);

        shutdown.cancel();
        refresher.await.unwrap();
        assert!(refresher_is_quiet(&storage).await);
    }

    async fn refresher_is_quiet(storage: &Scripted) -> bool {
        let calls = storage.change_calls.load(Ordering::SeqCst);
        tokio::time::sleep(INTERVAL * 3).await;
        storage.change_calls.load(Ordering::SeqCst) == calls
    }
}
