use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::round::{Chips, DrawTimestamp, Outcome, Participant};
use crate::stats::{ParticipantStats, StatsStore};

const LOG_TARGET: &str = "reveal::buffer";

/// Authoritative update held back until its reveal finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReveal {
    pub outcome: Outcome,
    pub total_staked_by_local_participant: Chips,
    pub updated_participants: Vec<Participant>,
    pub updated_history: Vec<u8>,
}

/// What the presentation layer is allowed to show.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleRound {
    pub participants: Vec<Participant>,
    pub history: Vec<u8>,
    pub last_outcome: Option<Outcome>,
}

impl VisibleRound {
    pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|participant| participant.id == participant_id)
    }
}

/// Result of one flushed reveal, from the local participant's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealResult {
    pub outcome: Outcome,
    pub stake: Chips,
    /// Total paid to the local participant; `None` when they are not among the winners.
    pub payout: Option<Chips>,
    /// Whether the round counted towards the statistics.
    pub recorded: bool,
    pub stats: Option<ParticipantStats>,
}

impl RevealResult {
    pub fn won(&self) -> bool {
        self.payout.is_some()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("reveal for draw {0} has not been flushed yet")]
    Occupied(DrawTimestamp),
}

/// Holds at most one [`PendingReveal`] out of view.
#[derive(Debug, Default)]
pub struct RevealBuffer {
    pending: Option<PendingReveal>,
}

impl RevealBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&PendingReveal> {
        self.pending.as_ref()
    }

    pub fn is_holding(&self) -> bool {
        self.pending.is_some()
    }

    pub fn capture(&mut self, pending: PendingReveal) -> Result<(), BufferError> {
        if let Some(existing) = &self.pending {
            return Err(BufferError::Occupied(existing.outcome.drawn_at.clone()));
        }
        info!(
            target: LOG_TARGET,
            drawn_at = %pending.outcome.drawn_at,
            number = pending.outcome.number,
            stake = pending.total_staked_by_local_participant,
            "reveal captured"
        );
        self.pending = Some(pending);
        Ok(())
    }

    /// Publishes the held update into `visible` and folds the round into the local
    /// participant's statistics. Returns `None` when nothing is held.
    pub fn flush(
        &mut self,
        visible: &mut VisibleRound,
        local_participant: Option<&str>,
        stats_store: &dyn StatsStore,
    ) -> Option<RevealResult> {
        let pending = self.pending.take()?;
        let PendingReveal {
            outcome,
            total_staked_by_local_participant: stake,
            updated_participants,
            updated_history,
        } = pending;

        visible.participants = updated_participants;
        visible.history = updated_history;
        visible.last_outcome = Some(outcome.clone());

        let payout = local_participant
            .filter(|id| outcome.winner_entry(id).is_some())
            .map(|id| outcome.payout_for(id));

        let mut recorded = false;
        let stats = local_participant.map(|id| {
            let mut stats = match stats_store.load(id) {
                Ok(stats) => stats,
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        participant = id,
                        error = %err,
                        "failed to load stats, starting from zero"
                    );
                    ParticipantStats::default()
                }
            };
            recorded = stats.record_round(stake, payout);
            if recorded {
                if let Err(err) = stats_store.save(id, &stats) {
                    warn!(
                        target: LOG_TARGET,
                        participant = id,
                        error = %err,
                        "failed to persist stats"
                    );
                }
            }
            stats
        });

        info!(
            target: LOG_TARGET,
            drawn_at = %outcome.drawn_at,
            number = outcome.number,
            won = payout.is_some(),
            recorded,
            "reveal flushed"
        );

        Some(RevealResult {
            outcome,
            stake,
            payout,
            recorded,
            stats,
        })
    }

    /// Drops the held update without publishing it.
    pub fn discard(&mut self) -> Option<PendingReveal> {
        let discarded = self.pending.take();
        if let Some(pending) = &discarded {
            info!(
                target: LOG_TARGET,
                drawn_at = %pending.outcome.drawn_at,
                "pending reveal discarded"
            );
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::{BetKind, Color, Winner};
    use crate::stats::InMemoryStatsStore;
    use crate::test_utils::{outcome, participant};

    fn pending(outcome: Outcome, stake: Chips, participants: Vec<Participant>) -> PendingReveal {
        PendingReveal {
            outcome,
            total_staked_by_local_participant: stake,
            updated_participants: participants,
            updated_history: vec![17],
        }
    }

    #[test]
    fn capture_leaves_visible_state_untouched() {
        let mut buffer = RevealBuffer::new();
        let visible = VisibleRound {
            participants: vec![participant("b", 950)],
            ..Default::default()
        };
        buffer
            .capture(pending(
                outcome("t1", 17, vec![]),
                50,
                vec![participant("b", 2_750)],
            ))
            .unwrap();
        assert!(buffer.is_holding());
        assert_eq!(visible.participant("b").unwrap().balance, 950);
    }

    #[test]
    fn second_capture_is_rejected_until_flush() {
        let mut buffer = RevealBuffer::new();
        buffer
            .capture(pending(outcome("t1", 1, vec![]), 0, vec![]))
            .unwrap();
        let err = buffer
            .capture(pending(outcome("t2", 2, vec![]), 0, vec![]))
            .unwrap_err();
        assert_eq!(err, BufferError::Occupied(DrawTimestamp::new("t1")));
    }

    #[test]
    fn winning_flush_updates_balance_and_stats() {
        let stats = InMemoryStatsStore::new();
        stats
            .save(
                "b",
                &ParticipantStats {
                    best_win: 100,
                    ..Default::default()
                },
            )
            .unwrap();
        let win = Winner {
            participant_id: "b".into(),
            participant_name: "Bea".into(),
            bet_kind: BetKind::Straight,
            bet_amount: 50,
            payout: 1_800,
        };
        let mut buffer = RevealBuffer::new();
        let mut visible = VisibleRound {
            participants: vec![participant("b", 950)],
            ..Default::default()
        };
        buffer
            .capture(pending(
                outcome("t1", 17, vec![win]),
                50,
                vec![participant("b", 2_750)],
            ))
            .unwrap();

        let result = buffer.flush(&mut visible, Some("b"), &stats).unwrap();
        assert!(result.won());
        assert_eq!(result.payout, Some(1_800));
        assert_eq!(visible.participant("b").unwrap().balance, 2_750);
        assert_eq!(visible.history, vec![17]);
        assert_eq!(visible.last_outcome.as_ref().unwrap().color, Color::Black);

        let saved = stats.get("b").unwrap();
        assert_eq!(saved.total_wins, 1);
        assert_eq!(saved.best_win, 1_800);
        assert_eq!(saved.total_rounds, 1);
        assert!(!buffer.is_holding());
        assert!(buffer.flush(&mut visible, Some("b"), &stats).is_none());
    }

    #[test]
    fn losing_flush_records_stake() {
        let stats = InMemoryStatsStore::new();
        let mut buffer = RevealBuffer::new();
        let mut visible = VisibleRound::default();
        buffer
            .capture(pending(outcome("t1", 4, vec![]), 30, vec![]))
            .unwrap();
        let result = buffer.flush(&mut visible, Some("b"), &stats).unwrap();
        assert!(!result.won());
        assert!(result.recorded);
        let saved = stats.get("b").unwrap();
        assert_eq!(saved.total_losses, 1);
        assert_eq!(saved.total_loss_amount, 30);
    }

    #[test]
    fn discard_never_publishes() {
        let mut buffer = RevealBuffer::new();
        buffer
            .capture(pending(
                outcome("t1", 4, vec![]),
                0,
                vec![participant("a", 1)],
            ))
            .unwrap();
        assert!(buffer.discard().is_some());
        let mut visible = VisibleRound::default();
        assert!(buffer
            .flush(&mut visible, Some("a"), &InMemoryStatsStore::new())
            .is_none());
        assert!(visible.participants.is_empty());
    }
}
