//! Reveal pipeline: the buffer that withholds authoritative updates, the deterministic
//! endpoint mapper and the completion guard that finishes every reveal exactly once.

pub mod buffer;
pub mod guard;
pub mod mapper;

pub use buffer::{BufferError, PendingReveal, RevealBuffer, RevealResult, VisibleRound};
pub use guard::{AnimationRun, Completion, CompletionPath, GuardError, RevealGuard, RunGeneration};
pub use mapper::{compute_endpoint, MapperError, RevealEndpoint, WHEEL_ORDER};
