mod jwt;
mod token;

pub use jwt::JwtAuth;
pub use token::TokenAuth;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::api::ErrorResponse;
use crate::config::{AuthKind, Settings};

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> bool;
}

/// Builds the configured authenticator, or `None` when requests are not authenticated.
pub async fn from_settings(settings: &Settings) -> Result<Option<Arc<dyn Authenticator>>> {
    let auth: Arc<dyn Authenticator> = match settings.auth_kind() {
        None => return Ok(None),
        Some(AuthKind::Token) => {
            let token = settings
                .auth_token
                .as_deref()
                .context("token auth requires BAPI_AUTH_TOKEN")?;
            Arc::new(TokenAuth::new(token))
        }
        Some(AuthKind::Jwt) => Arc::new(JwtAuth::connect(&settings.jwt).await?),
    };
    Ok(Some(auth))
}

/// The credentials of an `Authorization: Bearer <credentials>` header.
fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|credentials| !credentials.is_empty())
}

pub async fn require_auth(
    State(auth): State<Arc<dyn Authenticator>>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.authenticate(request.headers()).await {
        tracing::debug!("Rejected unauthenticated request to {}", request.uri().path());
        return ErrorResponse::new(StatusCode::FORBIDDEN, "Not authorized").into_response();
    }
    next.run(request).await
}

#[cfg(test)]
pub(crate) fn headers(authorization: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        axum::http::HeaderValue::from_str(authorization).unwrap(),
    );
    headers
}
