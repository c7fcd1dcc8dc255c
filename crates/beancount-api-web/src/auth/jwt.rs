use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use axum::http::HeaderMap;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{Authenticator, bearer};
use crate::config::JwtSettings;

/// Unknown key ids refetch the key set at most this often.
const REFETCH_INTERVAL: Duration = Duration::from_secs(60);

struct Keys {
    set: JwkSet,
    fetched: Instant,
}

/// Accepts bearer JWTs signed by a key from the JWKS endpoint, issued by the configured issuer
/// for the configured audience.
pub struct JwtAuth {
    jwks_url: String,
    validation: Validation,
    keys: Mutex<Keys>,
    http: reqwest::Client,
}

impl JwtAuth {
    /// Fetches the key set once up front, so a wrong JWKS url stops startup.
    pub async fn connect(settings: &JwtSettings) -> Result<Self> {
        let http = reqwest::Client::new();
        let jwks_url = settings.jwks.clone().context("JWT auth requires a JWKS url")?;
        let set = fetch(&http, &jwks_url).await?;
        tracing::info!("Loaded {} signing keys from {jwks_url}", set.keys.len());
        JwtAuth::new(settings, set)
    }

    pub fn new(settings: &JwtSettings, set: JwkSet) -> Result<Self> {
        Ok(JwtAuth {
            jwks_url: settings.jwks.clone().unwrap_or_default(),
            validation: validation(settings)?,
            keys: Mutex::new(Keys {
                set,
                fetched: Instant::now(),
            }),
            http: reqwest::Client::new(),
        })
    }

    async fn decoding_key(&self, kid: &str) -> Option<DecodingKey> {
        let mut keys = self.keys.lock().await;
        if keys.set.find(kid).is_none() && keys.fetched.elapsed() >= REFETCH_INTERVAL {
            keys.fetched = Instant::now();
            match fetch(&self.http, &self.jwks_url).await {
                Ok(set) => keys.set = set,
                Err(error) => tracing::warn!("Failed to refresh signing keys: {error:#}"),
            }
        }

        let jwk = keys.set.find(kid)?;
        DecodingKey::from_jwk(jwk)
            .inspect_err(|error| tracing::warn!("Unusable signing key {kid}: {error}"))
            .ok()
    }
}

#[async_trait]
impl Authenticator for JwtAuth {
    async fn authenticate(&self, headers: &HeaderMap) -> bool {
        let Some(token) = bearer(headers) else {
            return false;
        };
        let kid = match jsonwebtoken::decode_header(token) {
            Ok(header) => header.kid,
            Err(error) => {
                tracing::debug!("Rejected malformed token: {error}");
                return false;
            }
        };
        let Some(kid) = kid else {
            tracing::debug!("Rejected token without a key id");
            return false;
        };
        let Some(key) = self.decoding_key(&kid).await else {
            tracing::debug!("Rejected token signed by unknown key {kid}");
            return false;
        };

        match jsonwebtoken::decode::<serde_json::Value>(token, &key, &self.validation) {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Rejected token: {error}");
                false
            }
        }
    }
}

async fn fetch(http: &reqwest::Client, url: &str) -> Result<JwkSet> {
    http.get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .with_context(|| format!("Failed to fetch signing keys from {url}"))?
        .json()
        .await
        .with_context(|| format!("Invalid JWKS document at {url}"))
}

fn validation(settings: &JwtSettings) -> Result<Validation> {
    let algorithms = settings
        .algorithms
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<Algorithm>()
                .map_err(|_| anyhow::anyhow!("Unknown JWT algorithm {name}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let Some(&first) = algorithms.first() else {
        bail!("JWT auth requires at least one algorithm");
    };

    let mut validation = Validation::new(first);
    validation.algorithms = algorithms;
    if let Some(audience) = &settings.audience {
        validation.set_audience(&[audience]);
    }
    if let Some(issuer) = &settings.issuer {
        validation.set_issuer(&[issuer]);
    }
    Ok(validation)
}
