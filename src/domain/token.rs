use std::fmt;
use std::time::{Duration, Instant};

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Short-lived credential for the cloud speech backend.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AuthToken {
    value: String,
    region: String,
    #[zeroize(skip)]
    issued_at: Instant,
}

impl AuthToken {
    pub fn new(value: impl Into<String>, region: impl Into<String>, issued_at: Instant) -> Self {
        Self {
            value: value.into(),
            region: region.into(),
            issued_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Expiry is evaluated against the caller's notion of now.
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.issued_at) >= ttl
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .field("region", &self.region)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl PartialEq for AuthToken {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.region == other.region && self.issued_at == other.issued_at
    }
}
