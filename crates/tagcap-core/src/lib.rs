//! Tagcap Core - tag-grounded caption refinement engine.
//!
//! Tagcap curates an image-captioning dataset: for each image with a set of
//! ground-truth tags it asks a remote multimodal service for a caption that
//! mentions every tag, scores how well the caption covers them, and retries
//! with explicit feedback until coverage is perfect or the retry budget
//! runs out, concurrently, over a pool of rate-limited credentials.
//!
//! # Architecture
//!
//! ```text
//! Discover -> Dispatch -> (acquire credential -> generate -> score -> refine)* -> Artifacts
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tagcap_core::{
//!     CancelFlag, Config, CoverageValidator, Dispatcher, DispatchOptions, GeminiService,
//!     RefineOptions, RefinementController, ResourcePool, TaskDiscovery,
//! };
//!
//! #[tokio::main]
//! async fn main() -> tagcap_core::Result<()> {
//!     let config = Config::load()?;
//!     let service = Arc::new(GeminiService::new(&config.service)?);
//!     let pool = Arc::new(ResourcePool::new(credentials, config.pool.pool_options()));
//!     let controller = Arc::new(RefinementController::new(
//!         service,
//!         pool,
//!         CoverageValidator::new(config.coverage.clone()),
//!         config.templates.clone(),
//!         RefineOptions::from_config(&config.processing, &config.service),
//!     )?);
//!     let tasks = TaskDiscovery::new(config.processing.extensions.clone())
//!         .discover("./images".as_ref())?;
//!     let stats = Dispatcher::new(controller, DispatchOptions::default())
//!         .run(tasks, &CancelFlag::new(), |_| {})
//!         .await?;
//!     println!("accepted: {}", stats.accepted);
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod config;
pub mod coverage;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod pool;
pub mod refine;
pub mod request;
pub mod service;
pub mod types;

// Re-exports for convenient access
pub use config::{Config, PoolConfig, ProcessingConfig, ServiceConfig, SkipPolicy};
pub use coverage::{CoverageOptions, CoverageValidator};
pub use discovery::TaskDiscovery;
pub use dispatch::{DispatchOptions, Dispatcher, TaskResult};
pub use error::{CaptionError, CaptionResult, ConfigError, Result, TagcapError};
pub use media::ImageInput;
pub use pool::{Credential, Lease, PoolOptions, ResourcePool};
pub use refine::{RefineOptions, RefineOutcome, RefinementController};
pub use request::{RequestPart, Templates};
pub use service::{CaptionService, GeminiService};
pub use types::{artifacts, CancelFlag, Candidate, RunStats, Tag, TagSet};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_config_wires_into_options() {
        let config = Config::default();
        let options = RefineOptions::from_config(&config.processing, &config.service);
        assert_eq!(options.repeat_count, 3);
        assert_eq!(options.max_retries, 5);
        assert_eq!(options.max_image_edge, 768);
    }
}
