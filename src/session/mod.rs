//! The client's single owner of round state.
//!
//! [`RoundSession`] is a synchronous state machine: every input (a poll result, a clock tick,
//! a reveal timer, a watchdog pass, a command outcome) is applied with an explicit `now`, and
//! the resulting [`SessionEvent`]s are queued for the caller to drain. It never awaits, so the
//! driver decides when the outcome source is contacted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::reveal::{
    Completion, PendingReveal, RevealBuffer, RevealGuard, RevealResult, RunGeneration,
    VisibleRound,
};
use crate::round::{
    total_stake, Bet, ClockTick, DrawTimestamp, EpochMillis, Outcome, Participant, ParticipantId,
    RoundClock, RoundPhase, SessionMode,
};
use crate::source::{RoundRead, SourceError};
use crate::stats::{ParticipantStats, StatsStore};
use crate::sync::{classify, PollContext, PollDecision};

pub mod error;
pub mod events;

pub use error::CommandError;
pub use events::{RevealView, SessionEvent, SessionView};

const LOG_TARGET: &str = "session";

pub struct RoundSession {
    mode: SessionMode,
    local_participant: Option<ParticipantId>,
    betting_window: Duration,
    phase: RoundPhase,
    clock: RoundClock,
    countdown: u32,
    buffer: RevealBuffer,
    guard: RevealGuard,
    last_processed: Option<DrawTimestamp>,
    first_observation: bool,
    cached_bets: Vec<Bet>,
    visible: VisibleRound,
    last_result: Option<RevealResult>,
    error: Option<String>,
    draw_in_flight: bool,
    stats: Option<ParticipantStats>,
    stats_store: Arc<dyn StatsStore>,
    events: Vec<SessionEvent>,
}

impl RoundSession {
    pub fn new(config: &ClientConfig, stats_store: Arc<dyn StatsStore>) -> Self {
        let stats = config.local_participant.as_deref().map(|id| {
            stats_store.load(id).unwrap_or_else(|err| {
                warn!(
                    target: LOG_TARGET,
                    participant = id,
                    error = %err,
                    "failed to load stats, starting from zero"
                );
                ParticipantStats::default()
            })
        });
        Self {
            mode: config.mode,
            local_participant: config.local_participant.clone(),
            betting_window: config.betting_window,
            phase: RoundPhase::Waiting,
            clock: RoundClock::new(),
            countdown: 0,
            buffer: RevealBuffer::new(),
            guard: RevealGuard::new(config.spin_duration, config.reveal_grace),
            last_processed: None,
            first_observation: true,
            cached_bets: Vec::new(),
            visible: VisibleRound::default(),
            last_result: None,
            error: None,
            draw_in_flight: false,
            stats,
            stats_store,
            events: Vec::new(),
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn local_participant(&self) -> Option<&str> {
        self.local_participant.as_deref()
    }

    pub fn is_reveal_in_progress(&self) -> bool {
        self.guard.is_in_progress()
    }

    pub fn draw_in_flight(&self) -> bool {
        self.draw_in_flight
    }

    pub fn last_processed(&self) -> Option<&DrawTimestamp> {
        self.last_processed.as_ref()
    }

    pub fn visible(&self) -> &VisibleRound {
        &self.visible
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn countdown_seconds_remaining(&self, now: EpochMillis) -> u32 {
        self.clock.remaining_seconds(now)
    }

    /// Reads are paused while a reveal is pending or running, and while a draw is awaited.
    pub fn should_poll(&self) -> bool {
        self.phase != RoundPhase::Spinning
            && !self.buffer.is_holding()
            && !self.guard.is_in_progress()
            && !self.draw_in_flight
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn view(&self, now: EpochMillis) -> SessionView {
        SessionView {
            mode: self.mode,
            local_participant: self.local_participant.clone(),
            phase: self.phase,
            countdown_seconds_remaining: self.clock.remaining_seconds(now),
            betting_deadline_epoch_ms: self.clock.window().map(|window| window.end_time_epoch_ms),
            is_reveal_in_progress: self.guard.is_in_progress(),
            draw_in_flight: self.draw_in_flight,
            reveal: self
                .guard
                .run()
                .filter(|run| !run.completed())
                .map(|run| RevealView {
                    generation: run.generation,
                    number: run.target_outcome_number,
                    endpoint: run.endpoint,
                    started_at_epoch_ms: run.start_wall_clock_ms,
                }),
            participants: self.visible.participants.clone(),
            history: self.visible.history.clone(),
            last_outcome: self.visible.last_outcome.clone(),
            last_result: self.last_result.clone(),
            open_bets: self.cached_bets.clone(),
            error: self.error.clone(),
            stats: self.stats,
        }
    }

    /// Applies one successful read of the outcome source.
    pub fn handle_poll(&mut self, read: RoundRead, now: EpochMillis) {
        self.clear_error();
        if !self.should_poll() {
            debug!(target: LOG_TARGET, phase = ?self.phase, "poll result ignored while revealing");
            return;
        }

        let RoundRead {
            snapshot,
            participants,
        } = read;
        if !snapshot.current_bets.is_empty() {
            self.cached_bets = snapshot.current_bets.clone();
        }

        let classification = classify(
            &snapshot,
            PollContext {
                phase: self.phase,
                last_processed: self.last_processed.as_ref(),
                first_observation: self.first_observation,
                now,
            },
        );

        if self.first_observation {
            self.first_observation = false;
            if !matches!(classification.decision, PollDecision::NewOutcome(_)) {
                self.visible.participants = participants.clone();
                self.visible.history = snapshot.history.clone();
                self.visible.last_outcome = snapshot.last_outcome.clone();
                self.push(SessionEvent::ParticipantsUpdated {
                    participants: self.visible.participants.clone(),
                });
            }
        }
        if let Some(seen) = classification.record {
            self.last_processed = Some(seen);
        }

        match classification.decision {
            PollDecision::NewOutcome(outcome) => {
                let drawn_at = outcome.drawn_at.clone();
                if let Err(err) = self.begin_reveal(outcome, participants, snapshot.history, now) {
                    warn!(
                        target: LOG_TARGET,
                        drawn_at = %drawn_at,
                        error = %err,
                        "skipping outcome that cannot be revealed"
                    );
                }
            }
            PollDecision::OpenWindow { end_time_epoch_ms } => {
                let remaining = self.clock.open_until(end_time_epoch_ms, now);
                self.transition(RoundPhase::Betting);
                self.set_countdown(remaining);
            }
            PollDecision::RefreshWindow { end_time_epoch_ms } => {
                let current = self.clock.window().map(|window| window.end_time_epoch_ms);
                if current != Some(end_time_epoch_ms) {
                    let remaining = self.clock.open_until(end_time_epoch_ms, now);
                    self.set_countdown(remaining);
                }
            }
            PollDecision::OpenUnbounded => {
                debug!(target: LOG_TARGET, "open bets without a deadline");
                self.transition(RoundPhase::Betting);
            }
            PollDecision::NoChange => {}
        }
    }

    /// A read failed. The phase is left alone; malformed responses count as an empty poll.
    pub fn handle_poll_error(&mut self, err: &SourceError) {
        if err.is_malformed() {
            warn!(target: LOG_TARGET, error = %err, "ignoring malformed snapshot");
            return;
        }
        warn!(target: LOG_TARGET, error = %err, "failed to fetch round state");
        self.raise_error(format!("Failed to fetch game state: {err}"));
    }

    /// Once-per-second countdown refresh.
    pub fn tick(&mut self, now: EpochMillis) {
        let tick = self.clock.tick(now);
        self.apply_clock_tick(tick);
    }

    /// The client came back to the foreground: catch up on anything its timers missed.
    pub fn on_visible(&mut self, now: EpochMillis) {
        let tick = self.clock.on_visible(now);
        self.apply_clock_tick(tick);
        if let Some(completion) = self.guard.on_visible(now) {
            self.finish_reveal(completion);
        }
    }

    /// The scheduled reveal animation for `generation` ran to its end.
    pub fn natural_complete(&mut self, generation: RunGeneration) {
        if let Some(completion) = self.guard.natural_complete(generation) {
            self.finish_reveal(completion);
        }
    }

    pub fn watchdog(&mut self, now: EpochMillis) {
        if let Some(completion) = self.guard.watchdog(now) {
            self.finish_reveal(completion);
        }
    }

    pub fn check_start_round(&self) -> Result<(), CommandError> {
        if !self.mode.can_start_round() {
            return Err(CommandError::NotHost {
                action: "start a round",
            });
        }
        if self.draw_in_flight {
            return Err(CommandError::DrawInFlight);
        }
        if self.phase != RoundPhase::Waiting {
            return Err(CommandError::PhaseMismatch {
                action: "start a round",
                phase: self.phase,
            });
        }
        Ok(())
    }

    /// The ledger accepted `start_round`; open the local window.
    pub fn round_started(&mut self, now: EpochMillis) {
        if self.phase != RoundPhase::Waiting {
            debug!(target: LOG_TARGET, phase = ?self.phase, "round already underway");
            return;
        }
        let remaining = self.clock.open_window(self.betting_window, now);
        self.transition(RoundPhase::Betting);
        self.set_countdown(remaining);
    }

    /// Validates and marks a draw as in flight. Closes an open window without expiry.
    pub fn begin_draw(&mut self) -> Result<(), CommandError> {
        if !self.mode.can_draw() {
            return Err(CommandError::NotHost { action: "spin" });
        }
        if self.draw_in_flight {
            return Err(CommandError::DrawInFlight);
        }
        if self.guard.is_in_progress() || self.buffer.is_holding() {
            return Err(CommandError::RevealInProgress);
        }
        if self.phase == RoundPhase::Spinning {
            return Err(CommandError::PhaseMismatch {
                action: "spin",
                phase: self.phase,
            });
        }
        self.clock.close_window();
        self.set_countdown(0);
        self.draw_in_flight = true;
        info!(target: LOG_TARGET, mode = ?self.mode, "draw requested");
        Ok(())
    }

    /// The draw mutation succeeded and `read` was fetched right after it.
    pub fn complete_draw(&mut self, read: RoundRead, now: EpochMillis) -> Result<(), CommandError> {
        self.draw_in_flight = false;
        let RoundRead {
            snapshot,
            participants,
        } = read;
        let fresh = snapshot
            .last_outcome
            .filter(|outcome| !outcome.drawn_at.is_empty())
            .filter(|outcome| Some(&outcome.drawn_at) != self.last_processed.as_ref());
        let Some(outcome) = fresh else {
            let err = CommandError::NoNewOutcome;
            self.abort_draw(&err);
            return Err(err);
        };
        self.clear_error();
        self.first_observation = false;
        if let Err(err) = self.begin_reveal(outcome, participants, snapshot.history, now) {
            self.abort_draw(&err);
            return Err(err);
        }
        Ok(())
    }

    /// The draw failed; controls return to their pre-round state.
    pub fn abort_draw(&mut self, err: &CommandError) {
        self.draw_in_flight = false;
        self.clock.close_window();
        self.set_countdown(0);
        warn!(target: LOG_TARGET, error = %err, "draw failed");
        self.transition(RoundPhase::Waiting);
        self.raise_error(format!("Failed to spin: {err}"));
    }

    /// Identity a bet is placed under, if bets are accepted right now.
    pub fn check_bet(&self) -> Result<ParticipantId, CommandError> {
        let id = self
            .local_participant
            .clone()
            .ok_or(CommandError::NoLocalParticipant)?;
        if self.guard.is_in_progress() || self.buffer.is_holding() {
            return Err(CommandError::RevealInProgress);
        }
        if self.draw_in_flight {
            return Err(CommandError::DrawInFlight);
        }
        if !self.phase.accepts_bets() {
            return Err(CommandError::PhaseMismatch {
                action: "place a bet",
                phase: self.phase,
            });
        }
        Ok(id)
    }

    pub fn check_register(&self) -> Result<ParticipantId, CommandError> {
        self.local_participant
            .clone()
            .ok_or(CommandError::NoLocalParticipant)
    }

    /// Read taken right after a bet or registration was accepted.
    ///
    /// Balances are only taken over when the read does not already reflect an outcome this
    /// client has yet to reveal.
    pub fn apply_confirmation(&mut self, read: RoundRead) {
        let RoundRead {
            snapshot,
            participants,
        } = read;
        if !snapshot.current_bets.is_empty() {
            self.cached_bets = snapshot.current_bets;
        }
        let unrevealed = !self.first_observation
            && snapshot
                .last_outcome
                .as_ref()
                .map(|outcome| &outcome.drawn_at)
                .filter(|drawn_at| !drawn_at.is_empty())
                .is_some_and(|drawn_at| Some(drawn_at) != self.last_processed.as_ref());
        if unrevealed || self.buffer.is_holding() {
            debug!(target: LOG_TARGET, "deferring balance update until the next reveal");
            return;
        }
        self.visible.participants = participants;
        self.push(SessionEvent::ParticipantsUpdated {
            participants: self.visible.participants.clone(),
        });
    }

    /// Surfaces a failed mutation through the error indicator.
    pub fn record_command_error(&mut self, err: &CommandError) {
        if let CommandError::Source(source) = err {
            self.raise_error(source.to_string());
        }
    }

    /// Abandons the round: countdown and reveal stop, the pending update is dropped, and the
    /// next poll re-attaches without replaying the dropped outcome.
    pub fn leave(&mut self) {
        self.clock.close_window();
        self.set_countdown(0);
        self.guard.abort();
        self.buffer.discard();
        self.cached_bets.clear();
        self.draw_in_flight = false;
        self.first_observation = true;
        self.last_processed = None;
        info!(target: LOG_TARGET, "left round");
        self.transition(RoundPhase::Waiting);
        self.push(SessionEvent::RoundAbandoned);
    }

    /// Nothing but the processed timestamp changes unless the reveal actually starts.
    fn begin_reveal(
        &mut self,
        outcome: Outcome,
        participants: Vec<Participant>,
        history: Vec<u8>,
        now: EpochMillis,
    ) -> Result<(), CommandError> {
        self.last_processed = Some(outcome.drawn_at.clone());
        let (generation, endpoint) = {
            let run = self.guard.start(outcome.number, now)?;
            (run.generation, run.endpoint)
        };

        let stake = self
            .local_participant
            .as_deref()
            .map(|id| total_stake(&self.cached_bets, id))
            .unwrap_or(0);
        let number = outcome.number;
        if let Err(err) = self.buffer.capture(PendingReveal {
            outcome,
            total_staked_by_local_participant: stake,
            updated_participants: participants,
            updated_history: history,
        }) {
            self.guard.abort();
            return Err(err.into());
        }

        self.cached_bets.clear();
        self.clock.close_window();
        self.set_countdown(0);
        self.transition(RoundPhase::Spinning);
        self.push(SessionEvent::RevealStarted {
            generation,
            number,
            endpoint,
            duration_ms: u64::try_from(self.guard.duration().as_millis()).unwrap_or(u64::MAX),
        });
        Ok(())
    }

    fn finish_reveal(&mut self, completion: Completion) {
        let result = self.buffer.flush(
            &mut self.visible,
            self.local_participant.as_deref(),
            self.stats_store.as_ref(),
        );
        match &result {
            Some(result) => {
                if let Some(stats) = result.stats {
                    self.stats = Some(stats);
                }
                self.last_result = Some(result.clone());
            }
            None => warn!(
                target: LOG_TARGET,
                generation = completion.generation,
                "reveal completed with nothing buffered"
            ),
        }
        self.push(SessionEvent::RevealCompleted {
            generation: completion.generation,
            path: completion.path,
            endpoint: completion.endpoint,
            result,
        });
        self.push(SessionEvent::ParticipantsUpdated {
            participants: self.visible.participants.clone(),
        });
        self.transition(RoundPhase::Waiting);
    }

    fn apply_clock_tick(&mut self, tick: ClockTick) {
        match tick {
            ClockTick::Idle => {}
            ClockTick::Countdown(remaining) => self.set_countdown(remaining),
            ClockTick::Expired => {
                self.set_countdown(0);
                let draw_requested = self.mode.can_draw()
                    && self.phase == RoundPhase::Betting
                    && !self.draw_in_flight;
                info!(target: LOG_TARGET, draw_requested, "betting closed");
                self.push(SessionEvent::BettingClosed { draw_requested });
            }
        }
    }

    fn transition(&mut self, to: RoundPhase) {
        let from = self.phase;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(target: LOG_TARGET, ?from, ?to, "unexpected phase transition");
        }
        info!(target: LOG_TARGET, ?from, ?to, "phase changed");
        self.phase = to;
        self.push(SessionEvent::PhaseChanged { from, to });
    }

    fn set_countdown(&mut self, seconds_remaining: u32) {
        if self.countdown == seconds_remaining {
            return;
        }
        self.countdown = seconds_remaining;
        self.push(SessionEvent::Countdown { seconds_remaining });
    }

    fn raise_error(&mut self, message: String) {
        if self.error.as_deref() == Some(message.as_str()) {
            return;
        }
        self.error = Some(message.clone());
        self.push(SessionEvent::ErrorRaised { message });
    }

    fn clear_error(&mut self) {
        if self.error.take().is_some() {
            self.push(SessionEvent::ErrorCleared);
        }
    }

    fn push(&mut self, event: SessionEvent) {
        self.events.push(event);
    }
}
