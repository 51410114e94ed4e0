//! Cached, per-audience bearer credentials.

use super::sources::{FetchedToken, TokenSource};
use crate::errors::AuthError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A bearer credential scoped to one audience. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// The bearer token.
    pub token: String,
    /// The audience the token was minted for.
    pub audience: String,
    /// When the token stops being valid.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Returns true if the credential is still usable `guard` from now.
    #[must_use]
    pub fn is_fresh(&self, guard: Duration, now: DateTime<Utc>) -> bool {
        let guard = chrono::Duration::from_std(guard).unwrap_or_else(|_| chrono::Duration::zero());
        now + guard < self.expires_at
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("audience", &self.audience)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

type Slot = Arc<Mutex<Option<Credential>>>;

/// Hands out bearer tokens, fetching only when the cached one is close to expiry.
///
/// Each audience has its own async lock, so concurrent callers for the same
/// audience wait for a single in-flight fetch while other audiences proceed.
pub struct TokenProvider {
    source: Arc<dyn TokenSource>,
    refresh_guard: Duration,
    default_lifetime: Duration,
    slots: DashMap<String, Slot>,
    fetches: AtomicUsize,
}

impl TokenProvider {
    /// Creates a new provider over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            refresh_guard: Duration::from_secs(60),
            default_lifetime: Duration::from_secs(3600),
            slots: DashMap::new(),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Sets how long before expiry a token is refreshed.
    #[must_use]
    pub fn with_refresh_guard(mut self, guard: Duration) -> Self {
        self.refresh_guard = guard;
        self
    }

    /// Sets the lifetime assumed for tokens without a known expiry.
    #[must_use]
    pub fn with_default_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_lifetime = lifetime;
        self
    }

    /// Returns a valid token for `audience`.
    ///
    /// # Errors
    ///
    /// Propagates the source's [`AuthError`]; a failed fetch leaves the
    /// cache empty so the next call tries again.
    pub async fn get_token(&self, audience: &str) -> Result<String, AuthError> {
        let slot = self.slot(audience);
        let mut cached = slot.lock().await;

        if let Some(credential) = cached.as_ref() {
            if credential.is_fresh(self.refresh_guard, Utc::now()) {
                return Ok(credential.token.clone());
            }
            debug!(audience = %audience, "Cached token near expiry, refreshing");
        }

        let FetchedToken { token, expires_at } = self.source.fetch(audience).await?;
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let expires_at = expires_at.unwrap_or_else(|| {
            Utc::now()
                + chrono::Duration::from_std(self.default_lifetime)
                    .unwrap_or_else(|_| chrono::Duration::hours(1))
        });
        info!(audience = %audience, expires_at = %expires_at, "Obtained token");

        *cached = Some(Credential {
            token: token.clone(),
            audience: audience.to_string(),
            expires_at,
        });
        Ok(token)
    }

    /// Drops the cached credential for `audience`.
    pub async fn invalidate(&self, audience: &str) {
        let slot = self.slots.get(audience).map(|entry| Arc::clone(entry.value()));
        if let Some(slot) = slot {
            *slot.lock().await = None;
            debug!(audience = %audience, "Invalidated cached token");
        }
    }

    /// Number of successful fetches performed so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn slot(&self, audience: &str) -> Slot {
        Arc::clone(
            self.slots
                .entry(audience.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value(),
        )
    }
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("refresh_guard", &self.refresh_guard)
            .field("audiences", &self.slots.len())
            .finish_non_exhaustive()
    }
}
