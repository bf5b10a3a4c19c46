use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{ParticipantStats, StatsError, StatsStore};

#[derive(Debug, Clone, Default)]
pub struct InMemoryStatsStore {
    inner: Arc<RwLock<HashMap<String, ParticipantStats>>>,
}

impl InMemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, participant_id: &str) -> Option<ParticipantStats> {
        self.inner.read().get(participant_id).copied()
    }
}

impl StatsStore for InMemoryStatsStore {
    fn load(&self, participant_id: &str) -> Result<ParticipantStats, StatsError> {
        Ok(self.get(participant_id).unwrap_or_default())
    }

    fn save(&self, participant_id: &str, stats: &ParticipantStats) -> Result<(), StatsError> {
        self.inner.write().insert(participant_id.to_string(), *stats);
        Ok(())
    }
}
