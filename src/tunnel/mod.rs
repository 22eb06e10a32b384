//! Request/response correlation and delivery engine.
//!
//! # Data Flow
//! ```text
//! TunnelRequest → RequestDispatcher → channel (forward / forward-chunk)
//!                                          │
//! inbound frames → Listener → RequestContext → ResponseCorrelator
//!                                          │
//!                       Completion { Inline | Assembled | Blob }
//! ```

pub mod assembly;
pub mod context;
pub mod correlator;
pub mod dispatcher;
pub mod message;
pub mod request;

pub use assembly::ChunkAssembly;
pub use context::{RequestContext, ResolutionGuard};
pub use correlator::{request_id_matches, Completion, CorrelationState, ResponseCorrelator};
pub use dispatcher::{Dispatch, RequestDispatcher};
pub use message::{InboundMessage, OutboundMessage, RequestDescriptor, ResponseDescriptor};
pub use request::TunnelRequest;
