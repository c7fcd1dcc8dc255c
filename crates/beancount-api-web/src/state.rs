use beancount_api::Ledger;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::SnapshotCache;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<SnapshotCache>,
    /// Cancelled when the server shuts down; ends long-lived event streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(cache: Arc<SnapshotCache>, shutdown: CancellationToken) -> Self {
        AppState { cache, shutdown }
    }

    pub fn ledger(&self) -> Arc<Ledger> {
        self.cache.get()
    }
}
