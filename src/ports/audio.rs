use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::{AudioPayload, CaptureEvent, CaptureHandle, DomainError};

/// Port for microphone capture.
///
/// At most one capture is open at a time. Implementations own the device
/// between `begin` and `end` and must release it on every path out of `end`.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Acquire the microphone and start accumulating audio.
    ///
    /// Fails with `DeviceUnavailable` if the device cannot be acquired and
    /// with `CaptureAlreadyOpen` if a capture is open; never queues.
    async fn begin(&self) -> Result<CaptureHandle, DomainError>;

    /// Finalize the capture, release the device and return the encoded audio.
    ///
    /// The device is released even when this returns an error.
    /// Fails with `EmptyCapture` if no samples were produced.
    async fn end(&self, handle: CaptureHandle) -> Result<AudioPayload, DomainError>;

    /// Subscribe to device-initiated capture events.
    fn subscribe(&self) -> broadcast::Receiver<CaptureEvent>;
}
