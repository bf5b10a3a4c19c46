//! Common fixtures for unit tests

use std::path::PathBuf;

use crate::round::{Bet, BetKind, Color, DrawTimestamp, Outcome, Participant, RoundSnapshot, Winner};

/// Helpers shared across test modules.
pub mod serde {
    use std::fmt::Debug;

    /// Assert that a value survives a serde_json round-trip using structural equality.
    pub fn assert_round_trip_eq<T>(value: &T)
    where
        T: ::serde::Serialize + ::serde::de::DeserializeOwned + PartialEq + Debug,
    {
        let json = serde_json::to_string(value)
            .expect("serialization should succeed during round-trip testing");
        let restored: T = serde_json::from_str(&json)
            .expect("deserialization should succeed during round-trip testing");
        assert_eq!(restored, *value, "serde_json round-trip altered the value");
    }
}

pub fn participant(id: &str, balance: u64) -> Participant {
    Participant {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        balance,
    }
}

pub fn outcome(drawn_at: &str, number: u8, winners: Vec<Winner>) -> Outcome {
    Outcome {
        number,
        color: Color::of(number),
        drawn_at: DrawTimestamp::new(drawn_at),
        winners,
    }
}

pub fn straight_bet(participant_id: &str, number: u8, amount: u64) -> Bet {
    Bet {
        participant_id: participant_id.to_string(),
        participant_name: participant_id.to_uppercase(),
        bet_kind: BetKind::Straight,
        numbers: vec![number],
        amount,
    }
}

pub fn snapshot_with_outcome(outcome: Outcome, history: Vec<u8>) -> RoundSnapshot {
    RoundSnapshot {
        current_bets: Vec::new(),
        betting_window_end_epoch_ms: None,
        last_outcome: Some(outcome),
        history,
    }
}

/// Fresh directory under the system temp dir, unique per call.
pub fn scratch_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("roulette-sync-{label}-{}", uuid::Uuid::new_v4()))
}
