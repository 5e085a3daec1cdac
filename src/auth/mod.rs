//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! Bearer token
//!     → claims.rs (decode + strict schema, no crypto)
//!     → session.rs (revocation/expiry checks, provider verify, upsert)
//!     → permissions.rs (capability set from role + status, TTL cached)
//!     → RequestContext carried through the pipeline
//! ```
//!
//! # Design Decisions
//! - Locally decodable rejections (format, expiry, prior revocation)
//!   happen before any network call to the identity provider
//! - The provider is the only source of truth for subject identity
//! - Session rows are addressed deterministically so revalidation is
//!   an idempotent upsert

pub mod claims;
pub mod permissions;
pub mod provider;
pub mod session;

pub use claims::TokenClaims;
pub use provider::IdentityProvider;
pub use session::{SessionValidator, ValidationOutcome, ValidationReason};
