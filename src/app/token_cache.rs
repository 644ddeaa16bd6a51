use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{AuthToken, DomainError};
use crate::ports::{Clock, SystemClock, TokenSource};

/// Process-wide cache for the speech backend credential.
///
/// Expiry is checked on every read and is the only invalidation; there is
/// no background refresh. The slot lock is held across a fetch so
/// concurrent readers share it.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    slot: Mutex<Option<AuthToken>>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>, ttl: Duration) -> Self {
        Self::with_clock(source, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(source: Arc<dyn TokenSource>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached token, fetching a fresh one if missing or expired.
    ///
    /// Fetch failures come back as `TokenUnavailable`.
    pub async fn get_token(&self) -> Result<AuthToken, DomainError> {
        let mut slot = self.slot.lock().await;
        let now = self.clock.now();

        if let Some(token) = slot.as_ref() {
            if !token.is_expired(now, self.ttl) {
                debug!(region = token.region(), "Using cached speech token");
                return Ok(token.clone());
            }
            debug!("Cached speech token expired");
        }

        match self.source.fetch(now).await {
            Ok(token) => {
                info!(region = token.region(), ttl_secs = self.ttl.as_secs(), "Speech token refreshed");
                *slot = Some(token.clone());
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Speech token fetch failed");
                *slot = None;
                Err(match e {
                    DomainError::TokenUnavailable(_) => e,
                    other => DomainError::TokenUnavailable(other.to_string()),
                })
            }
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
