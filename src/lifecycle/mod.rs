//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Initialize services → Start listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain audit queue → Exit
//! ```
//!
//! # Design Decisions
//! - One broadcast channel fans the shutdown signal to every
//!   long-running task (server loop, audit writer)
//! - The audit writer drains its queue before exiting so recorded
//!   events are not lost to a restart

pub mod shutdown;

pub use shutdown::Shutdown;
