use thiserror::Error;

use crate::reveal::{BufferError, GuardError};
use crate::round::RoundPhase;
use crate::source::SourceError;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("only a hosting session can {action}")]
    NotHost { action: &'static str },
    #[error("cannot {action} during the {phase:?} phase")]
    PhaseMismatch {
        action: &'static str,
        phase: RoundPhase,
    },
    #[error("a reveal is still in progress")]
    RevealInProgress,
    #[error("a draw is already in flight")]
    DrawInFlight,
    #[error("no local participant configured")]
    NoLocalParticipant,
    #[error("the draw did not produce a new outcome")]
    NoNewOutcome,
    #[error("cannot reveal outcome: {0}")]
    Reveal(#[from] GuardError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("round driver is no longer running")]
    DriverClosed,
}
