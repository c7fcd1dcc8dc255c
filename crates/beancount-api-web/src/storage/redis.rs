use anyhow::{Context, Result};
use async_trait::async_trait;
use beancount_api::Ledger;
use futures::StreamExt as _;
use redis::{AsyncCommands as _, Client, ConnectionInfo, IntoConnectionInfo as _};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::StorageProvider;
use crate::config::RedisSettings;

/// Reads the ledger text from a single key. Any message on the channel marks the ledger as
/// changed; publishers are expected to announce every write to the key.
pub struct RedisStorage {
    client: Client,
    key: String,
    channel: String,
    dirty: Arc<AtomicBool>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl RedisStorage {
    pub fn new(settings: &RedisSettings) -> Result<Self> {
        let client = Client::open(connection_info(settings)?)
            .context("Invalid Redis connection settings")?;
        Ok(RedisStorage {
            client,
            key: settings.key.clone(),
            channel: settings.channel.clone(),
            dirty: Arc::new(AtomicBool::new(false)),
            subscription: Mutex::new(None),
        })
    }

    /// Subscribes to the channel unless a live subscription exists. Returns whether a new one
    /// was started.
    async fn subscribe(&self) -> Result<bool> {
        let mut subscription = self.subscription.lock().await;
        if subscription.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(false);
        }

        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("Failed to connect to Redis")?;
        pubsub
            .subscribe(&self.channel)
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.channel))?;
        tracing::debug!("Subscribed to Redis channel {}", self.channel);

        let dirty = self.dirty.clone();
        let channel = self.channel.clone();
        *subscription = Some(tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while messages.next().await.is_some() {
                dirty.store(true, Ordering::SeqCst);
            }
            tracing::warn!("Redis subscription to {channel} ended");
        }));
        Ok(true)
    }
}

impl Drop for RedisStorage {
    fn drop(&mut self) {
        if let Some(task) = self.subscription.get_mut().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl StorageProvider for RedisStorage {
    async fn load(&self) -> Result<Ledger> {
        // subscribe before reading so a publish during the read is not lost
        self.subscribe().await?;
        self.dirty.store(false, Ordering::SeqCst);

        let mut connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;
        let source: Option<String> = connection
            .get(&self.key)
            .await
            .with_context(|| format!("Failed to read Redis key {}", self.key))?;
        let source = source.with_context(|| format!("Redis key {} does not exist", self.key))?;

        tokio::task::spawn_blocking(move || Ledger::from_source(&source))
            .await
            .context("ledger parsing task failed")
    }

    async fn changed(&self, _current: &Ledger) -> Result<bool> {
        // messages sent while unsubscribed were missed
        if self.subscribe().await? {
            return Ok(true);
        }
        Ok(self.dirty.swap(false, Ordering::SeqCst))
    }
}

fn connection_info(settings: &RedisSettings) -> Result<ConnectionInfo> {
    let scheme = if settings.ssl { "rediss" } else { "redis" };
    let mut info = format!("{scheme}://{}:{}/", settings.host, settings.port)
        .into_connection_info()
        .with_context(|| format!("Invalid Redis host {}", settings.host))?;
    info.redis.password = settings.password.clone();
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::ConnectionAddr;

    #[test]
    fn connects_over_tls_by_default() {
        let settings = RedisSettings {
            password: Some("p@ss/word".to_string()),
            ..RedisSettings::default()
        };
        let info = connection_info(&settings).unwrap();

        assert!(
            matches!(&info.addr, ConnectionAddr::TcpTls { host, port: 6379, .. } if host == "localhost"),
            "{:?}",
            info.addr
        );
        assert_eq!(info.redis.password.as_deref(), Some("p@ss/word"));
    }

    #[test]
    fn plain_connection() {
        let settings = RedisSettings {
            host: "cache.internal".to_string(),
            port: 6380,
            ssl: false,
            ..RedisSettings::default()
        };
        let info = connection_info(&settings).unwrap();

        assert_eq!(
            info.addr,
            ConnectionAddr::Tcp("cache.internal".to_string(), 6380)
        );
        assert_eq!(info.redis.password, None);
    }

    #[tokio::test]
    async fn unreachable_server_fails_to_load() {
        let storage = RedisStorage::new(&RedisSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            ssl: false,
            ..RedisSettings::default()
        })
        .unwrap();

        assert!(storage.load().await.is_err());
    }
}
