//! Captioning service trait.

use crate::error::CaptionError;
use crate::pool::Credential;
use crate::request::RequestPart;
use async_trait::async_trait;
use std::time::Duration;

/// Trait implemented by remote captioning backends.
///
/// Uses `async_trait` because native async fn in trait is not object-safe
/// (the controller and dispatcher hold an `Arc<dyn CaptionService>`).
#[async_trait]
pub trait CaptionService: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Generate one caption from the ordered part sequence.
    ///
    /// The error variant tells the caller what to do next: `Transient`
    /// goes through the backoff loop, `RateLimited` penalizes the
    /// credential, `Refused` is final for the image.
    async fn generate(
        &self,
        parts: &[RequestPart],
        credential: &Credential,
    ) -> Result<String, CaptionError>;

    /// Cheap liveness probe for the pool's health check.
    async fn probe(&self, credential: &Credential) -> bool;

    /// Per-request timeout.
    fn timeout(&self) -> Duration;
}
