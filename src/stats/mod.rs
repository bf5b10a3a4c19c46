//! Cumulative per-participant statistics, persisted on the client across sessions.

use serde::{Deserialize, Serialize};

use crate::round::Chips;

pub mod file;
pub mod in_memory;

pub use file::JsonFileStatsStore;
pub use in_memory::InMemoryStatsStore;

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("stats io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stats encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantStats {
    pub total_wins: u64,
    pub total_losses: u64,
    pub total_win_amount: Chips,
    pub total_loss_amount: Chips,
    pub total_rounds: u64,
    pub total_wagered: Chips,
    pub best_win: Chips,
}

impl ParticipantStats {
    /// Folds one settled round into the totals.
    ///
    /// Rounds without a stake are not counted. `payout` is `Some` when the participant
    /// appears among the winners.
    pub fn record_round(&mut self, stake: Chips, payout: Option<Chips>) -> bool {
        if stake == 0 {
            return false;
        }
        match payout {
            Some(payout) => {
                self.total_wins += 1;
                self.total_win_amount = self.total_win_amount.saturating_add(payout);
                self.best_win = self.best_win.max(payout);
            }
            None => {
                self.total_losses += 1;
                self.total_loss_amount = self.total_loss_amount.saturating_add(stake);
            }
        }
        self.total_rounds += 1;
        self.total_wagered = self.total_wagered.saturating_add(stake);
        true
    }
}

/// Storage for [`ParticipantStats`] keyed by participant identity.
pub trait StatsStore: Send + Sync {
    /// Missing records load as zeroed stats.
    fn load(&self, participant_id: &str) -> Result<ParticipantStats, StatsError>;

    fn save(&self, participant_id: &str, stats: &ParticipantStats) -> Result<(), StatsError>;
}
