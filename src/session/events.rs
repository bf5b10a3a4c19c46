use serde::{Deserialize, Serialize};

use crate::reveal::{CompletionPath, RevealEndpoint, RevealResult, RunGeneration};
use crate::round::{
    Bet, EpochMillis, Outcome, Participant, ParticipantId, RoundPhase, SessionMode,
};
use crate::stats::ParticipantStats;

/// Notifications for the presentation layer, in the order the session produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    PhaseChanged {
        from: RoundPhase,
        to: RoundPhase,
    },
    Countdown {
        seconds_remaining: u32,
    },
    /// The betting deadline passed. `draw_requested` is set when this client must draw.
    BettingClosed {
        draw_requested: bool,
    },
    RevealStarted {
        generation: RunGeneration,
        number: u8,
        endpoint: RevealEndpoint,
        duration_ms: u64,
    },
    RevealCompleted {
        generation: RunGeneration,
        path: CompletionPath,
        endpoint: RevealEndpoint,
        result: Option<RevealResult>,
    },
    ParticipantsUpdated {
        participants: Vec<Participant>,
    },
    ErrorRaised {
        message: String,
    },
    ErrorCleared,
    RoundAbandoned,
}

impl SessionEvent {
    /// Stable name used as the SSE event type.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::PhaseChanged { .. } => "phase_changed",
            SessionEvent::Countdown { .. } => "countdown",
            SessionEvent::BettingClosed { .. } => "betting_closed",
            SessionEvent::RevealStarted { .. } => "reveal_started",
            SessionEvent::RevealCompleted { .. } => "reveal_completed",
            SessionEvent::ParticipantsUpdated { .. } => "participants_updated",
            SessionEvent::ErrorRaised { .. } => "error_raised",
            SessionEvent::ErrorCleared => "error_cleared",
            SessionEvent::RoundAbandoned => "round_abandoned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RevealView {
    pub generation: RunGeneration,
    pub number: u8,
    pub endpoint: RevealEndpoint,
    pub started_at_epoch_ms: EpochMillis,
}

/// Everything the presentation layer may render, as of the last processed input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub mode: SessionMode,
    pub local_participant: Option<ParticipantId>,
    pub phase: RoundPhase,
    pub countdown_seconds_remaining: u32,
    pub betting_deadline_epoch_ms: Option<EpochMillis>,
    pub is_reveal_in_progress: bool,
    pub draw_in_flight: bool,
    pub reveal: Option<RevealView>,
    pub participants: Vec<Participant>,
    pub history: Vec<u8>,
    pub last_outcome: Option<Outcome>,
    pub last_result: Option<RevealResult>,
    pub open_bets: Vec<Bet>,
    pub error: Option<String>,
    pub stats: Option<ParticipantStats>,
}

impl SessionView {
    pub fn local_balance(&self) -> Option<u64> {
        let id = self.local_participant.as_deref()?;
        self.participants
            .iter()
            .find(|participant| participant.id == id)
            .map(|participant| participant.balance)
    }
}
