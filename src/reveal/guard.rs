use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::mapper::{compute_endpoint, MapperError, RevealEndpoint};
use crate::round::EpochMillis;

const LOG_TARGET: &str = "reveal::guard";

/// Identifies one reveal animation; stale timer callbacks carry an older generation.
pub type RunGeneration = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPath {
    /// The scheduled animation ran to its end.
    Natural,
    /// The client came back to the foreground after the nominal duration had elapsed.
    Visibility,
    /// Low-frequency backstop after duration plus grace.
    Watchdog,
}

impl CompletionPath {
    pub fn is_forced(&self) -> bool {
        !matches!(self, CompletionPath::Natural)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationRun {
    pub generation: RunGeneration,
    pub target_outcome_number: u8,
    pub start_wall_clock_ms: EpochMillis,
    pub endpoint: RevealEndpoint,
    completed: bool,
    handle_attached: bool,
}

impl AnimationRun {
    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn elapsed_ms(&self, now: EpochMillis) -> i64 {
        now.saturating_sub(self.start_wall_clock_ms)
    }
}

/// Emitted exactly once per run, by whichever path wins.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub generation: RunGeneration,
    pub path: CompletionPath,
    pub target_outcome_number: u8,
    /// Forced paths must snap the animated elements here before reporting the result.
    pub endpoint: RevealEndpoint,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("a reveal for {0} is still in progress")]
    AlreadyRunning(u8),
    #[error(transparent)]
    Endpoint(#[from] MapperError),
}

/// Drives a reveal to completion through the timed path or one of the recovery paths.
#[derive(Debug)]
pub struct RevealGuard {
    duration_ms: i64,
    grace_ms: i64,
    next_generation: RunGeneration,
    run: Option<AnimationRun>,
}

impl RevealGuard {
    pub fn new(duration: Duration, grace: Duration) -> Self {
        Self {
            duration_ms: duration_to_ms(duration),
            grace_ms: duration_to_ms(grace),
            next_generation: 1,
            run: None,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms.max(0) as u64)
    }

    pub fn run(&self) -> Option<&AnimationRun> {
        self.run.as_ref()
    }

    pub fn is_in_progress(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.completed)
    }

    /// Starts a new run, replacing the previous (completed) one.
    pub fn start(
        &mut self,
        target_outcome_number: u8,
        now: EpochMillis,
    ) -> Result<&AnimationRun, GuardError> {
        if let Some(active) = self.run.as_ref().filter(|run| !run.completed) {
            return Err(GuardError::AlreadyRunning(active.target_outcome_number));
        }
        let endpoint = compute_endpoint(target_outcome_number)?;
        let generation = self.next_generation;
        self.next_generation += 1;

        info!(
            target: LOG_TARGET,
            generation,
            number = target_outcome_number,
            duration_ms = self.duration_ms,
            "reveal started"
        );

        Ok(self.run.insert(AnimationRun {
            generation,
            target_outcome_number,
            start_wall_clock_ms: now,
            endpoint,
            completed: false,
            handle_attached: true,
        }))
    }

    /// Natural end of the scheduled animation for `generation`.
    pub fn natural_complete(&mut self, generation: RunGeneration) -> Option<Completion> {
        let run = self.run.as_ref()?;
        if run.generation != generation || !run.handle_attached {
            debug!(
                target: LOG_TARGET,
                generation,
                "ignoring late natural completion"
            );
            return None;
        }
        self.complete(CompletionPath::Natural)
    }

    /// Foreground regained: finish immediately if the nominal duration already elapsed.
    pub fn on_visible(&mut self, now: EpochMillis) -> Option<Completion> {
        self.force_if_elapsed(now, self.duration_ms, CompletionPath::Visibility)
    }

    /// Watchdog poll: finish if the run overstayed duration plus grace.
    pub fn watchdog(&mut self, now: EpochMillis) -> Option<Completion> {
        self.force_if_elapsed(
            now,
            self.duration_ms.saturating_add(self.grace_ms),
            CompletionPath::Watchdog,
        )
    }

    /// Drops the run without completing it (round abandoned).
    pub fn abort(&mut self) -> Option<AnimationRun> {
        let run = self.run.take();
        if let Some(run) = run.as_ref().filter(|run| !run.completed) {
            debug!(
                target: LOG_TARGET,
                generation = run.generation,
                "reveal aborted"
            );
        }
        run
    }

    fn force_if_elapsed(
        &mut self,
        now: EpochMillis,
        threshold_ms: i64,
        path: CompletionPath,
    ) -> Option<Completion> {
        let run = self.run.as_mut()?;
        if run.completed || run.elapsed_ms(now) < threshold_ms {
            return None;
        }
        // detach first so the animation's own end callback cannot complete it again
        run.handle_attached = false;
        self.complete(path)
    }

    fn complete(&mut self, path: CompletionPath) -> Option<Completion> {
        let run = self.run.as_mut()?;
        if run.completed {
            return None;
        }
        run.completed = true;
        run.handle_attached = false;

        info!(
            target: LOG_TARGET,
            generation = run.generation,
            number = run.target_outcome_number,
            ?path,
            "reveal completed"
        );

        Some(Completion {
            generation: run.generation,
            path,
            target_outcome_number: run.target_outcome_number,
            endpoint: run.endpoint,
        })
    }
}

fn duration_to_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: i64 = 5_000;

    fn guard() -> RevealGuard {
        RevealGuard::new(Duration::from_millis(5_000), Duration::from_millis(500))
    }

    #[test]
    fn natural_completion_fires_once() {
        let mut guard = guard();
        let generation = guard.start(17, 0).unwrap().generation;
        let completion = guard.natural_complete(generation).unwrap();
        assert_eq!(completion.path, CompletionPath::Natural);
        assert_eq!(completion.endpoint, compute_endpoint(17).unwrap());
        assert!(guard.natural_complete(generation).is_none());
        assert!(guard.on_visible(D * 2).is_none());
        assert!(guard.watchdog(D * 2).is_none());
        assert!(!guard.is_in_progress());
    }

    #[test]
    fn visibility_before_duration_waits() {
        let mut guard = guard();
        guard.start(3, 1_000).unwrap();
        assert!(guard.on_visible(1_000 + D - 1).is_none());
        assert!(guard.is_in_progress());
        let completion = guard.on_visible(1_000 + D).unwrap();
        assert_eq!(completion.path, CompletionPath::Visibility);
    }

    #[test]
    fn late_natural_completion_after_forced_is_ignored() {
        let mut guard = guard();
        let generation = guard.start(22, 0).unwrap().generation;

        let forced = guard.on_visible(D);
        assert!(forced.is_some());
        // the animation's own callback lands a millisecond later
        assert!(guard.natural_complete(generation).is_none());
    }

    #[test]
    fn watchdog_respects_grace() {
        let mut guard = guard();
        guard.start(9, 0).unwrap();
        assert!(guard.watchdog(D).is_none());
        assert!(guard.watchdog(D + 499).is_none());
        let completion = guard.watchdog(D + 500).unwrap();
        assert_eq!(completion.path, CompletionPath::Watchdog);
        assert!(completion.path.is_forced());
        assert!(guard.watchdog(D + 1_500).is_none());
    }

    #[test]
    fn stale_generation_cannot_complete_next_run() {
        let mut guard = guard();
        let first = guard.start(1, 0).unwrap().generation;
        guard.on_visible(D).unwrap();
        let second = guard.start(2, D + 10).unwrap().generation;
        assert_ne!(first, second);
        assert!(guard.natural_complete(first).is_none());
        assert!(guard.is_in_progress());
        assert!(guard.natural_complete(second).is_some());
    }

    #[test]
    fn only_one_active_run() {
        let mut guard = guard();
        guard.start(5, 0).unwrap();
        assert!(matches!(
            guard.start(6, 10),
            Err(GuardError::AlreadyRunning(5))
        ));
    }

    #[test]
    fn abort_clears_incomplete_run() {
        let mut guard = guard();
        guard.start(5, 0).unwrap();
        assert!(guard.abort().is_some());
        assert!(!guard.is_in_progress());
        assert!(guard.watchdog(D * 10).is_none());
        assert!(guard.start(6, D * 10).is_ok());
    }
}
