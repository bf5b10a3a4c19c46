use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::round::{ParticipantId, SessionMode};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BETTING_WINDOW: Duration = Duration::from_secs(30);
pub const DEFAULT_SPIN_DURATION: Duration = Duration::from_millis(5_000);
pub const DEFAULT_REVEAL_GRACE: Duration = Duration::from_millis(500);
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(15);
pub const DEFAULT_EVENT_CAPACITY: usize = 64;
pub const DEFAULT_COMMAND_CAPACITY: usize = 32;

/// Timing and capacity knobs for one client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub mode: SessionMode,
    /// Identity bets and statistics are attributed to. Observers may run without one.
    pub local_participant: Option<ParticipantId>,
    pub poll_interval: Duration,
    pub betting_window: Duration,
    pub spin_duration: Duration,
    pub reveal_grace: Duration,
    pub watchdog_interval: Duration,
    pub max_backoff: Duration,
    pub event_capacity: usize,
    pub command_capacity: usize,
    pub stats_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Solo,
            local_participant: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            betting_window: DEFAULT_BETTING_WINDOW,
            spin_duration: DEFAULT_SPIN_DURATION,
            reveal_grace: DEFAULT_REVEAL_GRACE,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            max_backoff: DEFAULT_MAX_BACKOFF,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            stats_dir: PathBuf::from(".roulette"),
        }
    }
}

impl ClientConfig {
    pub fn new(mode: SessionMode, local_participant: Option<ParticipantId>) -> Self {
        Self {
            mode,
            local_participant,
            ..Self::default()
        }
    }
}
