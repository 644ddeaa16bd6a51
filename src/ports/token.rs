use std::time::Instant;

use async_trait::async_trait;

use crate::domain::{AuthToken, DomainError};

/// Port for the endpoint that issues speech credentials.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch a fresh token, stamped with `issued_at`.
    async fn fetch(&self, issued_at: Instant) -> Result<AuthToken, DomainError>;
}

/// Time source, injectable so token expiry can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
