use std::fmt;

use serde::{Deserialize, Serialize};

pub type ParticipantId = String;
pub type Chips = u64;
pub type EpochMillis = i64;

/// Highest number on a single-zero wheel.
pub const MAX_NUMBER: u8 = 36;

/// Opaque, monotonically increasing token identifying one draw.
///
/// Clients compare tokens for equality only; ordering is owned by the outcome source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrawTimestamp(String);

impl DrawTimestamp {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DrawTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Black,
    Green,
}

impl Color {
    pub fn of(number: u8) -> Self {
        if number == 0 {
            Color::Green
        } else if is_red(number) {
            Color::Red
        } else {
            Color::Black
        }
    }
}

pub fn is_red(number: u8) -> bool {
    matches!(
        number,
        1 | 3 | 5 | 7 | 9 | 12 | 14 | 16 | 18 | 19 | 21 | 23 | 25 | 27 | 30 | 32 | 34 | 36
    )
}

/// Bet categories accepted by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetKind {
    Straight,
    Red,
    Black,
    Even,
    Odd,
    Low,
    High,
    FirstDozen,
    SecondDozen,
    ThirdDozen,
    FirstColumn,
    SecondColumn,
    ThirdColumn,
}

impl BetKind {
    /// Net multiplier paid on top of the returned stake.
    pub fn payout_multiplier(&self) -> Chips {
        match self {
            BetKind::Straight => 35,
            BetKind::FirstDozen | BetKind::SecondDozen | BetKind::ThirdDozen => 2,
            BetKind::FirstColumn | BetKind::SecondColumn | BetKind::ThirdColumn => 2,
            BetKind::Red
            | BetKind::Black
            | BetKind::Even
            | BetKind::Odd
            | BetKind::Low
            | BetKind::High => 1,
        }
    }

    pub fn covers(&self, number: u8, bet_numbers: &[u8]) -> bool {
        match self {
            BetKind::Straight => bet_numbers.contains(&number),
            BetKind::Red => is_red(number),
            BetKind::Black => number != 0 && !is_red(number),
            BetKind::Even => number != 0 && number % 2 == 0,
            BetKind::Odd => number % 2 == 1,
            BetKind::Low => (1..=18).contains(&number),
            BetKind::High => (19..=36).contains(&number),
            BetKind::FirstDozen => (1..=12).contains(&number),
            BetKind::SecondDozen => (13..=24).contains(&number),
            BetKind::ThirdDozen => (25..=36).contains(&number),
            BetKind::FirstColumn => number != 0 && number % 3 == 1,
            BetKind::SecondColumn => number != 0 && number % 3 == 2,
            BetKind::ThirdColumn => number != 0 && number % 3 == 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub balance: Chips,
}

/// An open stake as reported by the outcome source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub participant_id: ParticipantId,
    #[serde(default)]
    pub participant_name: String,
    pub bet_kind: BetKind,
    #[serde(default)]
    pub numbers: Vec<u8>,
    pub amount: Chips,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub participant_id: ParticipantId,
    pub participant_name: String,
    pub bet_kind: BetKind,
    pub bet_amount: Chips,
    pub payout: Chips,
}

/// Authoritative result of one draw. Never mutated after it is received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub number: u8,
    pub color: Color,
    pub drawn_at: DrawTimestamp,
    #[serde(default)]
    pub winners: Vec<Winner>,
}

impl Outcome {
    pub fn winner_entry(&self, participant_id: &str) -> Option<&Winner> {
        self.winners
            .iter()
            .find(|winner| winner.participant_id == participant_id)
    }

    /// Sum of payouts owed to one participant; a participant may win on several bets.
    pub fn payout_for(&self, participant_id: &str) -> Chips {
        self.winners
            .iter()
            .filter(|winner| winner.participant_id == participant_id)
            .fold(0, |total: Chips, winner| total.saturating_add(winner.payout))
    }
}

/// Read model returned by the outcome source for the shared round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    #[serde(default)]
    pub current_bets: Vec<Bet>,
    #[serde(default)]
    pub betting_window_end_epoch_ms: Option<EpochMillis>,
    #[serde(default)]
    pub last_outcome: Option<Outcome>,
    #[serde(default)]
    pub history: Vec<u8>,
}

impl RoundSnapshot {
    pub fn last_drawn_at(&self) -> Option<&DrawTimestamp> {
        self.last_outcome.as_ref().map(|outcome| &outcome.drawn_at)
    }

    pub fn stake_of(&self, participant_id: &str) -> Chips {
        total_stake(&self.current_bets, participant_id)
    }
}

pub fn total_stake(bets: &[Bet], participant_id: &str) -> Chips {
    bets.iter()
        .filter(|bet| bet.participant_id == participant_id)
        .fold(0, |total: Chips, bet| total.saturating_add(bet.amount))
}

/// Which side of a shared round this client plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Single player; spins draw immediately without a betting window.
    Solo,
    /// Owns the round: starts betting windows and draws when they expire.
    Host,
    /// Observes a host's round and reconciles through polling.
    Join,
}

impl SessionMode {
    pub fn can_draw(&self) -> bool {
        matches!(self, SessionMode::Solo | SessionMode::Host)
    }

    pub fn can_start_round(&self) -> bool {
        matches!(self, SessionMode::Host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::serde::assert_round_trip_eq;
    use crate::test_utils::straight_bet;

    #[test]
    fn color_classes_cover_the_wheel() {
        assert_eq!(Color::of(0), Color::Green);
        let reds = (1..=MAX_NUMBER).filter(|n| Color::of(*n) == Color::Red).count();
        let blacks = (1..=MAX_NUMBER)
            .filter(|n| Color::of(*n) == Color::Black)
            .count();
        assert_eq!(reds, 18);
        assert_eq!(blacks, 18);
    }

    #[test]
    fn zero_loses_every_outside_bet() {
        let outside = [
            BetKind::Red,
            BetKind::Black,
            BetKind::Even,
            BetKind::Odd,
            BetKind::Low,
            BetKind::High,
            BetKind::FirstDozen,
            BetKind::SecondDozen,
            BetKind::ThirdDozen,
            BetKind::FirstColumn,
            BetKind::SecondColumn,
            BetKind::ThirdColumn,
        ];
        for kind in outside {
            assert!(!kind.covers(0, &[]), "{kind:?} must lose on zero");
        }
        assert!(BetKind::Straight.covers(0, &[0]));
    }

    #[test]
    fn columns_and_dozens_partition_numbers() {
        for n in 1..=MAX_NUMBER {
            let columns = [
                BetKind::FirstColumn,
                BetKind::SecondColumn,
                BetKind::ThirdColumn,
            ]
            .iter()
            .filter(|kind| kind.covers(n, &[]))
            .count();
            let dozens = [
                BetKind::FirstDozen,
                BetKind::SecondDozen,
                BetKind::ThirdDozen,
            ]
            .iter()
            .filter(|kind| kind.covers(n, &[]))
            .count();
            assert_eq!(columns, 1, "number {n}");
            assert_eq!(dozens, 1, "number {n}");
        }
        assert!(BetKind::FirstColumn.covers(34, &[]));
        assert!(BetKind::ThirdColumn.covers(36, &[]));
    }

    #[test]
    fn bet_kind_uses_graphql_enum_names() {
        let json = serde_json::to_string(&BetKind::FirstDozen).unwrap();
        assert_eq!(json, "\"FIRST_DOZEN\"");
        assert_round_trip_eq(&BetKind::ThirdColumn);
    }

    #[test]
    fn payout_for_sums_multiple_winning_bets() {
        let outcome = Outcome {
            number: 17,
            color: Color::Black,
            drawn_at: DrawTimestamp::new("1"),
            winners: vec![
                Winner {
                    participant_id: "b".into(),
                    participant_name: "Bea".into(),
                    bet_kind: BetKind::Straight,
                    bet_amount: 10,
                    payout: 360,
                },
                Winner {
                    participant_id: "b".into(),
                    participant_name: "Bea".into(),
                    bet_kind: BetKind::Odd,
                    bet_amount: 5,
                    payout: 10,
                },
            ],
        };
        assert_eq!(outcome.payout_for("b"), 370);
        assert_eq!(outcome.payout_for("a"), 0);
        assert!(outcome.winner_entry("b").is_some());
    }
    #[test]
    fn stake_and_payout_totals_saturate() {
        let bets = vec![
            straight_bet("b", 17, Chips::MAX),
            straight_bet("b", 4, 1),
            straight_bet("c", 4, 7),
        ];
        assert_eq!(total_stake(&bets, "b"), Chips::MAX);
        assert_eq!(total_stake(&bets, "c"), 7);

        let mut outcome = crate::test_utils::outcome("1", 17, vec![]);
        for payout in [Chips::MAX, Chips::MAX] {
            outcome.winners.push(Winner {
                participant_id: "b".into(),
                participant_name: "Bea".into(),
                bet_kind: BetKind::Straight,
                bet_amount: 1,
                payout,
            });
        }
        assert_eq!(outcome.payout_for("b"), Chips::MAX);
    }
}
