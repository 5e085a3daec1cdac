//! HTTP surface of the gateway.
//!
//! # Architecture
//! ```text
//! TcpListener
//!     ↓
//! TraceLayer → RequestIdLayer → TimeoutLayer
//!     ↓
//! security pipeline (middleware)
//!     ↓
//! handlers: public endpoints, auth endpoints, admin dashboard
//! ```

pub mod dashboard;
pub mod request;
pub mod server;

pub use request::{RequestId, RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use server::{AppState, HttpServer, Services};
