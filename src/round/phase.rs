//! Round phase definitions and transitions

use serde::{Deserialize, Serialize};

/// Phases a client moves through for each round of play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// No round in progress; re-entered after every reveal
    #[default]
    Waiting,
    /// Betting window is open (with or without a known deadline)
    Betting,
    /// An outcome has been captured and its reveal is running
    Spinning,
}

impl RoundPhase {
    /// Check if transition from current phase to target phase is valid.
    pub fn can_transition_to(&self, target: RoundPhase) -> bool {
        use RoundPhase::*;
        matches!(
            (self, target),
            (Waiting, Betting)
                | (Waiting, Spinning)
                | (Betting, Spinning)
                | (Betting, Waiting)
                | (Spinning, Waiting)
        )
    }

    /// Whether stakes may be placed in this phase
    pub fn accepts_bets(&self) -> bool {
        matches!(self, RoundPhase::Waiting | RoundPhase::Betting)
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            RoundPhase::Waiting => "Waiting for the next round",
            RoundPhase::Betting => "Placing bets",
            RoundPhase::Spinning => "Wheel is spinning",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinning_only_returns_to_waiting() {
        assert!(RoundPhase::Spinning.can_transition_to(RoundPhase::Waiting));
        assert!(!RoundPhase::Spinning.can_transition_to(RoundPhase::Betting));
        assert!(!RoundPhase::Spinning.can_transition_to(RoundPhase::Spinning));
    }

    #[test]
    fn waiting_is_the_default_phase() {
        assert_eq!(RoundPhase::default(), RoundPhase::Waiting);
        assert!(RoundPhase::Waiting.accepts_bets());
        assert!(!RoundPhase::Spinning.accepts_bets());
    }
}
