//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → brute_force.rs (is the source address under a block?)
//!     → [auth resolves identity]
//!     → rate_limit.rs (fixed-window budget for the resolved key)
//!     → Pass to handler
//! ```
//!
//! # Design Decisions
//! - Brute-force check runs first: a blocked address never costs a
//!   provider round trip or a counter write
//! - Fixed-window counting is simple and auditable; sustained abuse is
//!   the brute-force guard's job, not the limiter's
//! - Fail toward cheap denial when the store is unreachable

pub mod brute_force;
pub mod rate_limit;

pub use brute_force::{BruteForceGuard, FailureAnalysis, RiskLevel};
pub use rate_limit::{RateLimitDecision, RateLimitKey, RateLimiter};
