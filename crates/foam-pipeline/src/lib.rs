//! `foam-pipeline` – spherization orchestration.
//!
//! Decides whether a mesh can be fitted, repairs and retries when it cannot,
//! runs many such computations at once, and remembers the best result per
//! key across runs.
//!
//! # Modules
//!
//! - [`pipeline`] – [`SpherizationPipeline`][pipeline::SpherizationPipeline]:
//!   place → probe → (repair) → fit → (repair and retry once) → un-offset.
//!   The external operations sit behind the
//!   [`SphereTools`][pipeline::SphereTools] trait.
//! - [`executor`] – [`TaskExecutor`][executor::TaskExecutor]: named tasks on a
//!   bounded blocking pool, at most one in flight per name.
//! - [`cache`] – [`ResultCache`][cache::ResultCache]: best
//!   [`SphereLevel`][foam_types::SphereLevel] per
//!   [`CacheKey`][foam_types::CacheKey], persisted as JSON on
//!   [`close`][cache::ResultCache::close].
//! - [`service`] – [`SpherizationService`][service::SpherizationService]:
//!   request/resolve over the executor and the cache.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console and
//!   optional OTLP tracing setup for binaries.

pub mod cache;
pub mod executor;
pub mod pipeline;
pub mod service;
pub mod telemetry;

pub use cache::ResultCache;
pub use executor::{ExecutorConfig, TaskExecutor};
pub use pipeline::{SphereTools, SpherizationPipeline};
pub use service::{RequestOutcome, ServiceConfig, SpherizationService};
pub use telemetry::{TracerProviderGuard, init_tracing};
