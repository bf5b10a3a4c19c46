//! Wall-clock sources. Every deadline in the crate is absolute epoch milliseconds read from a
//! [`Clock`], never accumulated from timer ticks.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::round::EpochMillis;

pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> EpochMillis;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMillis {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: EpochMillis) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn set(&self, now: EpochMillis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by_ms = EpochMillis::try_from(by.as_millis()).unwrap_or(EpochMillis::MAX);
        self.now.fetch_add(by_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMillis {
        self.now.load(Ordering::SeqCst)
    }
}

/// Epoch clock anchored on `tokio::time::Instant`, so it follows paused/advanced test time.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_epoch_ms: EpochMillis,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(origin_epoch_ms: EpochMillis) -> Self {
        Self {
            origin_epoch_ms,
            origin: tokio::time::Instant::now(),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(Utc::now().timestamp_millis())
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> EpochMillis {
        let elapsed = EpochMillis::try_from(self.origin.elapsed().as_millis())
            .unwrap_or(EpochMillis::MAX);
        self.origin_epoch_ms.saturating_add(elapsed)
    }
}
