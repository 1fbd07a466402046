//! Request routing and response envelopes for the JSON-lines protocol.

mod error;
mod handlers;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Request};
