//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline epilogue produces:
//!     → store.rs (ring buffers: metrics, logs, rate-limit buckets)
//!     → metrics.rs (Prometheus counters, histograms)
//!
//! Consumers:
//!     → Live dashboard (broadcast fan-out over WebSocket)
//!     → Polling endpoint (recent snapshot + trailing-window stats)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Telemetry is best-effort: buffers drop the oldest under load and
//!   never apply backpressure to request handling
//! - Rate-limit keys pass through mask.rs before storage so the live
//!   feed never holds raw PII
//! - Fan-out is a broadcast channel; a slow subscriber lags and misses
//!   events instead of slowing the write path

pub mod mask;
pub mod metrics;
pub mod store;

pub use store::{LiveEvent, ObservabilityStore};
