//! Token sources.

use crate::errors::AuthError;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// Default metadata server base URL.
pub const DEFAULT_METADATA_BASE: &str = "http://metadata.google.internal";

const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// A token as returned by a source, before caching.
#[derive(Clone, PartialEq, Eq)]
pub struct FetchedToken {
    /// The bearer token.
    pub token: String,
    /// Expiry, if the source knows it.
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for FetchedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Produces bearer tokens for an audience.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetches a fresh token for `audience`.
    async fn fetch(&self, audience: &str) -> Result<FetchedToken, AuthError>;
}

/// Fetches OIDC identity tokens from the instance metadata server.
#[derive(Debug, Clone)]
pub struct MetadataTokenSource {
    client: reqwest::Client,
    base_url: String,
}

impl MetadataTokenSource {
    /// Creates a source against the default metadata server.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Client`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, AuthError> {
        Self::with_base_url(DEFAULT_METADATA_BASE)
    }

    /// Creates a source against a custom metadata base URL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Client`] if the HTTP client cannot be built.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(METADATA_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// The metadata base URL, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn fetch(&self, audience: &str) -> Result<FetchedToken, AuthError> {
        let url = format!("{}{IDENTITY_PATH}", self.base_url);
        debug!(audience = %audience, "Fetching identity token");

        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .query(&[("audience", audience), ("format", "full")])
            .send()
            .await
            .map_err(|e| AuthError::fetch(audience, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::fetch(audience, e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::fetch(
                audience,
                format!("metadata server returned HTTP {}: {}", status.as_u16(), body.trim()),
            ));
        }

        let token = body.trim().to_string();
        if token.is_empty() {
            return Err(AuthError::Malformed("empty token".to_string()));
        }

        let expires_at = jwt_expiry(&token);
        Ok(FetchedToken { token, expires_at })
    }
}

/// Serves one fixed token for every audience.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Creates a static source.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl std::fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenSource")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch(&self, _audience: &str) -> Result<FetchedToken, AuthError> {
        if self.token.is_empty() {
            return Err(AuthError::Malformed("empty token".to_string()));
        }
        Ok(FetchedToken {
            token: self.token.clone(),
            expires_at: None,
        })
    }
}

/// Reads the `exp` claim of a JWT without verifying it.
#[must_use]
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

#[cfg(test)]
pub(crate) fn fake_jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"aud":"https://tools","exp":{exp}}}"#));
    format!("{header}.{claims}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_jwt_expiry_reads_exp_claim() {
        let token = fake_jwt(1_900_000_000);
        let expiry = jwt_expiry(&token).unwrap();
        assert_eq!(expiry.timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_jwt_expiry_none_for_opaque_token() {
        assert!(jwt_expiry("opaque-token").is_none());
        assert!(jwt_expiry("a.!!!.c").is_none());
    }

    #[tokio::test]
    async fn test_static_source_returns_token() {
        let source = StaticTokenSource::new("secret");
        let fetched = source.fetch("https://tools").await.unwrap();
        assert_eq!(fetched.token, "secret");
        assert!(fetched.expires_at.is_none());
        assert!(!format!("{source:?}").contains("secret"));
    }

    #[tokio::test]
    async fn test_static_source_rejects_empty() {
        let source = StaticTokenSource::new("");
        assert!(matches!(
            source.fetch("aud").await,
            Err(AuthError::Malformed(_))
        ));
    }

    #[test]
    fn test_metadata_source_builds_and_trims_base_url() {
        let source = MetadataTokenSource::with_base_url("http://169.254.169.254/").unwrap();
        assert_eq!(source.base_url(), "http://169.254.169.254");
        assert_eq!(MetadataTokenSource::new().unwrap().base_url(), DEFAULT_METADATA_BASE);
    }

    #[tokio::test]
    async fn test_metadata_source_requests_identity_token() {
        let server = MockServer::start().await;
        let token = fake_jwt(1_900_000_000);

        Mock::given(method("GET"))
            .and(path(IDENTITY_PATH))
            .and(header("Metadata-Flavor", "Google"))
            .and(query_param("audience", "https://tools.example"))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(200).set_body_string(token.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let source = MetadataTokenSource::with_base_url(server.uri()).unwrap();
        let fetched = source.fetch("https://tools.example").await.unwrap();

        assert_eq!(fetched.token, token);
        assert_eq!(fetched.expires_at.unwrap().timestamp(), 1_900_000_000);
    }

    #[tokio::test]
    async fn test_metadata_source_propagates_http_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let source = MetadataTokenSource::with_base_url(server.uri()).unwrap();
        let err = source.fetch("https://tools.example").await.unwrap_err();

        match err {
            AuthError::Fetch { audience, reason } => {
                assert_eq!(audience, "https://tools.example");
                assert!(reason.contains("403"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
