//! Presentation API: JSON commands and an SSE feed of session events.

mod bootstrap;
mod dto;
mod error;
mod logging;
mod routes;

pub use bootstrap::{run_server, shutdown_signal, ServerConfig};
pub use dto::{PlaceBetRequest, RegisterRequest, VisibilityRequest};
pub use error::ApiError;
pub use logging::log_requests;
pub use routes::{RouletteServer, ServerContext};
