//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID + trace layers)
//!     → request.rs (event-stream check, body limit, request ID)
//!     → [routing cache → channel → dispatcher → correlator]
//!     → response.rs (status + headers minus transfer-encoding, body)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use server::{AppState, HttpServer, RelayInfo};
