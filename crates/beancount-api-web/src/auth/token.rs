use async_trait::async_trait;
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use super::{Authenticator, bearer};

/// Accepts requests carrying `Authorization: Bearer <token>` with the configured token.
pub struct TokenAuth {
    digest: [u8; 32],
}

impl TokenAuth {
    pub fn new(token: &str) -> Self {
        TokenAuth {
            digest: Sha256::digest(token.as_bytes()).into(),
        }
    }
}

#[async_trait]
impl Authenticator for TokenAuth {
    async fn authenticate(&self, headers: &HeaderMap) -> bool {
        let Some(token) = bearer(headers) else {
            return false;
        };

        // constant time over fixed-size digests
        let digest: [u8; 32] = Sha256::digest(token.as_bytes()).into();
        digest
            .iter()
            .zip(self.digest.iter())
            .fold(0, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
