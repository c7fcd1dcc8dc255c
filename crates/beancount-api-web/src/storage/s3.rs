use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use beancount_api::Ledger;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use super::{StorageProvider, is_safe_relative, load_blocking};
use crate::config::Settings;

/// Object key to ETag.
type Listing = BTreeMap<String, String>;

/// Mirrors a bucket into the work directory and loads the entrypoint from there.
///
/// The bucket is considered changed when its set of keys or any ETag differs from the listing
/// taken at the last load.
pub struct S3Storage {
    client: Client,
    bucket: String,
    work_dir: PathBuf,
    entrypoint: PathBuf,
    loaded: Mutex<Listing>,
}

impl S3Storage {
    pub fn new(settings: &Settings) -> Result<Self> {
        let s3 = &settings.s3;
        let bucket = s3
            .bucket
            .clone()
            .filter(|bucket| !bucket.is_empty())
            .context("S3 storage requires a bucket")?;

        let mut config = aws_sdk_s3::Config::builder()
            .region(Region::new(s3.region.clone()))
            .behavior_version(BehaviorVersion::latest());
        if let Some(endpoint) = &s3.endpoint {
            config = config.endpoint_url(endpoint.clone()).force_path_style(true);
        }
        if let (Some(key_id), Some(secret)) = (&s3.access_key_id, &s3.secret_access_key) {
            config = config.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "beancount-api",
            ));
        }

        Ok(S3Storage {
            client: Client::from_conf(config.build()),
            bucket,
            work_dir: settings.work_dir.clone(),
            entrypoint: settings.entrypoint.clone(),
            loaded: Mutex::new(Listing::new()),
        })
    }

    async fn list(&self) -> Result<Listing> {
        let mut listing = Listing::new();
        let mut continuation = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation)
                .send()
                .await
                .with_context(|| format!("Failed to list bucket {}", self.bucket))?;

            listing.extend(objects(
                page.contents()
                    .iter()
                    .map(|object| (object.key(), object.e_tag())),
            ));

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string())
                }
                _ => break,
            }
        }
        Ok(listing)
    }

    async fn download(&self, key: &str) -> Result<()> {
        if !is_safe_relative(key) {
            bail!("Refusing to mirror object with unsafe key '{key}'");
        }
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to fetch s3://{}/{key}", self.bucket))?;
        let data = object.body.collect().await?.into_bytes();

        let path = self.work_dir.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for S3Storage {
    async fn load(&self) -> Result<Ledger> {
        let listing = self.list().await?;
        ensure_not_empty(&self.bucket, &listing)?;
        for key in listing.keys() {
            self.download(key).await?;
        }
        tracing::debug!(
            "Mirrored {} objects from bucket {}",
            listing.len(),
            self.bucket
        );

        let loaded = load_blocking(self.work_dir.join(&self.entrypoint)).await?;
        *self.loaded.lock().unwrap_or_else(PoisonError::into_inner) = listing;
        Ok(loaded.ledger)
    }

    async fn changed(&self, _current: &Ledger) -> Result<bool> {
        let listing = self.list().await?;
        let loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        let changes = changed_keys(&loaded, &listing);
        if !changes.is_empty() {
            tracing::debug!("Changed objects in bucket {}: {changes:?}", self.bucket);
        }
        Ok(!changes.is_empty())
    }
}

/// Builds a listing from `(key, etag)` pairs, leaving out directory placeholders.
fn objects<'a>(
    pairs: impl IntoIterator<Item = (Option<&'a str>, Option<&'a str>)>,
) -> impl Iterator<Item = (String, String)> {
    pairs.into_iter().filter_map(|(key, etag)| {
        let key = key.filter(|key| !key.ends_with('/'))?;
        Some((key.to_string(), etag.unwrap_or_default().to_string()))
    })
}

fn ensure_not_empty(bucket: &str, listing: &Listing) -> Result<()> {
    if listing.is_empty() {
        bail!("Bucket {bucket} is empty");
    }
    Ok(())
}

/// Keys that were added, removed or re-uploaded between two listings.
fn changed_keys<'a>(before: &'a Listing, after: &'a Listing) -> Vec<&'a str> {
    let mut keys: Vec<&str> = after
        .iter()
        .filter(|(key, etag)| before.get(*key) != Some(*etag))
        .map(|(key, _)| key.as_str())
        .chain(
            before
                .keys()
                .filter(|key| !after.contains_key(*key))
                .map(String::as_str),
        )
        .collect();
    keys.sort_unstable();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(entries: &[(&str, &str)]) -> Listing {
        objects(entries.iter().map(|(key, etag)| (Some(*key), Some(*etag)))).collect()
    }

    #[test]
    fn skips_directory_placeholders() {
        let listing: Listing = objects([
            (Some("main.beancount"), Some("\"a\"")),
            (Some("years/"), Some("\"d\"")),
            (Some("years/2024.beancount"), None),
            (None, Some("\"x\"")),
        ])
        .collect();

        assert_eq!(
            listing,
            Listing::from([
                ("main.beancount".to_string(), "\"a\"".to_string()),
                ("years/2024.beancount".to_string(), String::new()),
            ])
        );
    }

    #[test]
    fn compares_keys_and_etags() {
        let before = listing(&[("main.beancount", "1"), ("accounts.beancount", "1")]);

        assert!(changed_keys(&before, &before.clone()).is_empty());

        let reuploaded = listing(&[("main.beancount", "2"), ("accounts.beancount", "1")]);
        assert_eq!(changed_keys(&before, &reuploaded), ["main.beancount"]);

        let added = listing(&[
            ("main.beancount", "1"),
            ("accounts.beancount", "1"),
            ("prices.beancount", "1"),
        ]);
        assert_eq!(changed_keys(&before, &added), ["prices.beancount"]);

        let removed = listing(&[("main.beancount", "1")]);
        assert_eq!(changed_keys(&before, &removed), ["accounts.beancount"]);
    }

    #[test]
    fn empty_bucket_is_an_error() {
        let error = ensure_not_empty("books", &Listing::new()).unwrap_err();
        assert_eq!(error.to_string(), "Bucket books is empty");

        assert!(ensure_not_empty("books", &listing(&[("main.beancount", "1")])).is_ok());
    }
}
