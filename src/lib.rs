pub mod config;
pub mod driver;
pub mod logging;
pub mod reveal;
pub mod round;
pub mod server;
pub mod session;
pub mod source;
pub mod stats;
pub mod sync;
pub mod time;

#[cfg(test)]
pub mod test_utils;

pub use config::ClientConfig;
pub use driver::{DriverHandle, RoundDriver};
pub use session::{CommandError, RoundSession, SessionEvent, SessionView};
