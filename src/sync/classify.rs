use tracing::trace;

use crate::round::{DrawTimestamp, EpochMillis, Outcome, RoundPhase, RoundSnapshot};

const LOG_TARGET: &str = "sync::classify";

/// Where the client stands when a snapshot arrives.
#[derive(Debug, Clone, Copy)]
pub struct PollContext<'a> {
    pub phase: RoundPhase,
    pub last_processed: Option<&'a DrawTimestamp>,
    /// No snapshot has been processed since the client attached.
    pub first_observation: bool,
    pub now: EpochMillis,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision {
    /// An outcome this client has not revealed yet.
    NewOutcome(Outcome),
    /// A betting window with a future deadline opened while the client was waiting.
    OpenWindow { end_time_epoch_ms: EpochMillis },
    /// Already betting; follow the authoritative deadline.
    RefreshWindow { end_time_epoch_ms: EpochMillis },
    /// Bets are open on the ledger but it reports no deadline.
    OpenUnbounded,
    NoChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub decision: PollDecision,
    /// Timestamp to remember as processed, if this snapshot moves the de-duplication key.
    pub record: Option<DrawTimestamp>,
}

impl Classification {
    fn no_change() -> Self {
        Self {
            decision: PollDecision::NoChange,
            record: None,
        }
    }
}

/// Decides what one snapshot means for the local round.
///
/// A new outcome wins over a window in the same snapshot. The first snapshot after attaching
/// only records its timestamp, whatever the phase, so an outcome that predates the client is
/// never replayed. A host may have opened its window before that snapshot lands.
pub fn classify(snapshot: &RoundSnapshot, ctx: PollContext<'_>) -> Classification {
    if ctx.phase == RoundPhase::Spinning {
        return Classification::no_change();
    }

    let drawn_at = snapshot
        .last_outcome
        .as_ref()
        .map(|outcome| &outcome.drawn_at)
        .filter(|drawn_at| !drawn_at.is_empty());

    let mut record = None;
    if ctx.first_observation {
        record = Some(drawn_at.cloned().unwrap_or_default());
        trace!(
            target: LOG_TARGET,
            drawn_at = ?record,
            "first observation recorded"
        );
    } else if let Some(outcome) = snapshot.last_outcome.as_ref() {
        if drawn_at.is_some() && drawn_at != ctx.last_processed {
            return Classification {
                decision: PollDecision::NewOutcome(outcome.clone()),
                record: Some(outcome.drawn_at.clone()),
            };
        }
    }

    let decision = match (snapshot.betting_window_end_epoch_ms, ctx.phase) {
        (Some(end_time_epoch_ms), RoundPhase::Waiting) if end_time_epoch_ms > ctx.now => {
            PollDecision::OpenWindow { end_time_epoch_ms }
        }
        (Some(end_time_epoch_ms), RoundPhase::Betting) if end_time_epoch_ms > ctx.now => {
            PollDecision::RefreshWindow { end_time_epoch_ms }
        }
        (None, RoundPhase::Waiting) if !snapshot.current_bets.is_empty() => {
            PollDecision::OpenUnbounded
        }
        _ => PollDecision::NoChange,
    };

    Classification { decision, record }
}
