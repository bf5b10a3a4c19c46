//! Reconciliation with the outcome source: what a snapshot means, and how long to wait
//! before asking again.

pub mod backoff;
pub mod classify;

pub use backoff::Backoff;
pub use classify::{classify, Classification, PollContext, PollDecision};
