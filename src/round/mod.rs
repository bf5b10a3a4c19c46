//! Round state shared by every participant: phases, the betting-window clock and the
//! records exchanged with the outcome source.

pub mod clock;
pub mod phase;
pub mod types;

pub use clock::{countdown_seconds, BettingWindow, ClockTick, RoundClock};
pub use phase::RoundPhase;
pub use types::*;
