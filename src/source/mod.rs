//! The authoritative ledger as seen by a client: reads return snapshots, writes are
//! fire-and-forget mutations whose effect shows up in a later snapshot.

use async_trait::async_trait;
use thiserror::Error;

use crate::round::{BetKind, Chips, Participant, RoundSnapshot};

pub mod graphql;
pub mod in_memory;

pub use graphql::{GraphQlOutcomeSource, GraphQlSourceConfig};
pub use in_memory::{InMemoryOutcomeSource, InMemorySourceConfig};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("outcome source responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("graphql error: {0}")]
    GraphQl(String),
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("rejected by ledger: {0}")]
    Rejected(String),
    #[error("outcome source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    /// A response arrived but did not have the expected shape.
    pub fn is_malformed(&self) -> bool {
        matches!(self, SourceError::Malformed(_))
    }
}

/// Round state plus participant balances, read together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundRead {
    pub snapshot: RoundSnapshot,
    pub participants: Vec<Participant>,
}

#[async_trait]
pub trait OutcomeSource: Send + Sync {
    async fn read_round_snapshot(&self) -> Result<RoundSnapshot, SourceError>;

    async fn read_participants(&self) -> Result<Vec<Participant>, SourceError>;

    /// Opens a betting window on the ledger. Host only.
    async fn start_round(&self) -> Result<(), SourceError>;

    /// Asks the ledger to draw and settle. The result is observed through the next snapshot.
    async fn draw_outcome(&self) -> Result<(), SourceError>;

    async fn place_bet(
        &self,
        participant_id: &str,
        bet_kind: BetKind,
        numbers: &[u8],
        amount: Chips,
    ) -> Result<(), SourceError>;

    async fn register_participant(
        &self,
        participant_id: &str,
        name: &str,
        initial_balance: Chips,
    ) -> Result<(), SourceError>;

    /// One poll's worth of data. Implementations that can fetch both in a single round trip
    /// should override this.
    async fn read_round(&self) -> Result<RoundRead, SourceError> {
        let snapshot = self.read_round_snapshot().await?;
        let participants = self.read_participants().await?;
        Ok(RoundRead {
            snapshot,
            participants,
        })
    }
}
