use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::EpochMillis;

const LOG_TARGET: &str = "round::clock";

/// Deadline of an open betting window, as absolute wall-clock milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BettingWindow {
    pub end_time_epoch_ms: EpochMillis,
}

impl BettingWindow {
    pub fn remaining_seconds(&self, now: EpochMillis) -> u32 {
        countdown_seconds(self.end_time_epoch_ms, now)
    }
}

/// `ceil((end - now) / 1000)`, clamped at zero.
pub fn countdown_seconds(end_time_epoch_ms: EpochMillis, now: EpochMillis) -> u32 {
    let remaining_ms = end_time_epoch_ms.saturating_sub(now);
    if remaining_ms <= 0 {
        return 0;
    }
    let seconds = (remaining_ms + 999) / 1000;
    u32::try_from(seconds).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTick {
    /// No window is open.
    Idle,
    /// Window still open; whole seconds left.
    Countdown(u32),
    /// The window just closed by reaching its deadline. Reported once per window.
    Expired,
}

/// Betting-window countdown.
///
/// The remaining time is always derived from the absolute deadline so that a runtime which
/// throttles or suspends its timers still lands on the right value the next time it looks.
#[derive(Debug, Default)]
pub struct RoundClock {
    window: Option<BettingWindow>,
}

impl RoundClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(&self) -> Option<BettingWindow> {
        self.window
    }

    pub fn is_open(&self) -> bool {
        self.window.is_some()
    }

    /// Opens a window `duration` from `now` and returns the initial countdown.
    pub fn open_window(&mut self, duration: Duration, now: EpochMillis) -> u32 {
        let duration_ms = EpochMillis::try_from(duration.as_millis()).unwrap_or(EpochMillis::MAX);
        self.open_until(now.saturating_add(duration_ms), now)
    }

    /// Opens (or re-targets) a window that closes at an absolute deadline.
    pub fn open_until(&mut self, end_time_epoch_ms: EpochMillis, now: EpochMillis) -> u32 {
        let window = BettingWindow { end_time_epoch_ms };
        self.window = Some(window);
        let remaining = window.remaining_seconds(now);
        debug!(
            target: LOG_TARGET,
            end_time_epoch_ms,
            remaining_secs = remaining,
            "betting window opened"
        );
        remaining
    }

    /// Clears the window without reporting expiry.
    pub fn close_window(&mut self) -> Option<BettingWindow> {
        let closed = self.window.take();
        if closed.is_some() {
            debug!(target: LOG_TARGET, "betting window closed early");
        }
        closed
    }

    pub fn remaining_seconds(&self, now: EpochMillis) -> u32 {
        self.window
            .map(|window| window.remaining_seconds(now))
            .unwrap_or(0)
    }

    /// Periodic republish of the countdown.
    pub fn tick(&mut self, now: EpochMillis) -> ClockTick {
        let Some(window) = self.window else {
            return ClockTick::Idle;
        };
        match window.remaining_seconds(now) {
            0 => {
                self.window = None;
                debug!(
                    target: LOG_TARGET,
                    end_time_epoch_ms = window.end_time_epoch_ms,
                    now,
                    "betting window expired"
                );
                ClockTick::Expired
            }
            remaining => ClockTick::Countdown(remaining),
        }
    }

    /// Recomputes the countdown after the client regains the foreground.
    ///
    /// Same contract as [`RoundClock::tick`]: a deadline that passed while timers were
    /// suspended expires here instead of waiting for the next tick.
    pub fn on_visible(&mut self, now: EpochMillis) -> ClockTick {
        self.tick(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_rounds_partial_seconds_up() {
        assert_eq!(countdown_seconds(10_000, 0), 10);
        assert_eq!(countdown_seconds(10_000, 1), 10);
        assert_eq!(countdown_seconds(10_000, 9_001), 1);
        assert_eq!(countdown_seconds(10_000, 10_000), 0);
        assert_eq!(countdown_seconds(10_000, 15_000), 0);
    }

    #[test]
    fn open_window_uses_absolute_deadline() {
        let mut clock = RoundClock::new();
        assert_eq!(clock.open_window(Duration::from_secs(30), 1_000), 30);
        assert_eq!(
            clock.window(),
            Some(BettingWindow {
                end_time_epoch_ms: 31_000
            })
        );
        assert_eq!(clock.tick(2_500), ClockTick::Countdown(29));
    }

    #[test]
    fn background_jump_recovers_to_zero_and_expires_once() {
        let end = 100_000;
        let mut clock = RoundClock::new();
        clock.open_until(end, end - 30_000);

        assert_eq!(clock.tick(end - 1_000), ClockTick::Countdown(1));
        // timers were suspended; the next thing the client sees is a visibility change
        assert_eq!(clock.remaining_seconds(end + 5_000), 0);
        assert_eq!(clock.on_visible(end + 5_000), ClockTick::Expired);
        assert_eq!(clock.tick(end + 6_000), ClockTick::Idle);
        assert_eq!(clock.on_visible(end + 7_000), ClockTick::Idle);
        assert_eq!(clock.remaining_seconds(end + 7_000), 0);
    }

    #[test]
    fn close_window_never_reports_expiry() {
        let mut clock = RoundClock::new();
        clock.open_window(Duration::from_secs(5), 0);
        assert!(clock.close_window().is_some());
        assert_eq!(clock.tick(60_000), ClockTick::Idle);
        assert!(clock.close_window().is_none());
    }
}
