use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{ParticipantStats, StatsError, StatsStore};

const LOG_TARGET: &str = "stats::file";
const FILE_PREFIX: &str = "roulette_stats_";

/// One JSON document per participant inside `dir`.
#[derive(Debug, Clone)]
pub struct JsonFileStatsStore {
    dir: PathBuf,
}

impl JsonFileStatsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, participant_id: &str) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{}.json", sanitize(participant_id)))
    }
}

impl StatsStore for JsonFileStatsStore {
    fn load(&self, participant_id: &str) -> Result<ParticipantStats, StatsError> {
        let path = self.path_for(participant_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(ParticipantStats::default());
            }
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(stats) => Ok(stats),
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    path = %path.display(),
                    error = %err,
                    "discarding unreadable stats record"
                );
                Ok(ParticipantStats::default())
            }
        }
    }

    fn save(&self, participant_id: &str, stats: &ParticipantStats) -> Result<(), StatsError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(participant_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(stats)?)?;
        fs::rename(&tmp, &path)?;
        debug!(target: LOG_TARGET, path = %path.display(), "stats saved");
        Ok(())
    }
}

fn sanitize(participant_id: &str) -> String {
    participant_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
