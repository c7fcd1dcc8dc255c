//! Backends that produce ledger snapshots and report whether their source changed.

mod local;
mod redis;
mod s3;

pub use local::LocalStorage;
pub use self::redis::RedisStorage;
pub use s3::S3Storage;

use anyhow::{Context, Result};
use async_trait::async_trait;
use beancount_api::{Ledger, SourceFile};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Settings, StorageKind};

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Produces a complete snapshot of the ledger.
    async fn load(&self) -> Result<Ledger>;

    /// Whether the source differs from what `current` was loaded from.
    async fn changed(&self, current: &Ledger) -> Result<bool>;
}

pub fn from_settings(settings: &Settings) -> Result<Arc<dyn StorageProvider>> {
    let storage: Arc<dyn StorageProvider> = match settings.storage {
        StorageKind::Local => Arc::new(LocalStorage::new(settings.entrypoint_path(), settings.watch)),
        StorageKind::S3 => Arc::new(S3Storage::new(settings)?),
        StorageKind::Redis => Arc::new(RedisStorage::new(&settings.redis)?),
    };
    Ok(storage)
}

/// Loads the ledger at `entrypoint` on the blocking pool.
async fn load_blocking(entrypoint: PathBuf) -> Result<beancount_api::LoadedLedger> {
    tokio::task::spawn_blocking(move || beancount_api::load_file(&entrypoint))
        .await
        .context("ledger loading task failed")?
}

/// Hashes file names and contents. A file without contents could not be read, so a deleted
/// include shows up as a change.
fn fingerprint<'a>(files: impl IntoIterator<Item = (&'a Path, Option<&'a str>)>) -> String {
    let mut hasher = Sha256::new();
    for (path, contents) in files {
        hasher.update(path.as_os_str().as_encoded_bytes());
        match contents {
            Some(contents) => {
                hasher.update(b"\x01");
                hasher.update((contents.len() as u64).to_le_bytes());
                hasher.update(contents.as_bytes());
            }
            None => hasher.update(b"\x00"),
        }
    }
    hex::encode(hasher.finalize())
}

/// The fingerprint of what a load parsed.
fn fingerprint_sources(sources: &[SourceFile]) -> String {
    fingerprint(
        sources
            .iter()
            .map(|source| (source.path.as_path(), source.contents.as_deref())),
    )
}

/// The fingerprint of `files` as they are on disk now.
fn fingerprint_disk(files: &[PathBuf]) -> String {
    let contents: Vec<_> = files
        .iter()
        .map(|file| std::fs::read_to_string(file).ok())
        .collect();
    fingerprint(
        files
            .iter()
            .map(PathBuf::as_path)
            .zip(contents.iter().map(Option::as_deref)),
    )
}

/// Rejects object keys that would escape the directory they are mirrored into.
fn is_safe_relative(key: &str) -> bool {
    use std::path::Component;

    !key.is_empty()
        && Path::new(key)
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
