use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::round::MAX_NUMBER;

/// Pocket order on a single-zero wheel, clockwise starting at zero.
pub const WHEEL_ORDER: [u8; 37] = [
    0, 32, 15, 19, 4, 21, 2, 25, 17, 34, 6, 27, 13, 36, 11, 30, 8, 23, 10, 5, 24, 16, 33, 1, 20,
    14, 31, 9, 22, 18, 29, 7, 28, 12, 35, 3, 26,
];

pub const POCKET_COUNT: usize = WHEEL_ORDER.len();
pub const FULL_SPINS: u32 = 5;
pub const EXTRA_BALL_SPINS: u32 = 2;
/// Multiplier spreading landing spots around the rim. Coprime with 360.
pub const OFFSET_FACTOR: u32 = 47;

static POCKET_INDEX: Lazy<[usize; POCKET_COUNT]> = Lazy::new(|| {
    let mut index = [0usize; POCKET_COUNT];
    for (position, number) in WHEEL_ORDER.iter().enumerate() {
        index[usize::from(*number)] = position;
    }
    index
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapperError {
    #[error("number {0} is not on the wheel")]
    OutOfRange(u8),
}

/// Final rotation of the wheel and the ball for one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RevealEndpoint {
    pub wheel_rotation_degrees: f64,
    pub ball_rotation_degrees: f64,
}

pub fn pocket_index(number: u8) -> Result<usize, MapperError> {
    if number > MAX_NUMBER {
        return Err(MapperError::OutOfRange(number));
    }
    Ok(POCKET_INDEX[usize::from(number)])
}

pub fn visual_offset_degrees(number: u8) -> u32 {
    (u32::from(number) * OFFSET_FACTOR) % 360
}

/// Maps a winning number to the angles the reveal animation must end on.
///
/// Depends on nothing but `number`: every client observing the same outcome lands on the
/// same angles, however late it starts the reveal.
pub fn compute_endpoint(number: u8) -> Result<RevealEndpoint, MapperError> {
    let index = pocket_index(number)?;
    let step = 360.0 / POCKET_COUNT as f64;
    let offset = f64::from(visual_offset_degrees(number));
    let full_turns = f64::from(FULL_SPINS * 360);
    let ball_turns = f64::from((FULL_SPINS + EXTRA_BALL_SPINS) * 360);

    Ok(RevealEndpoint {
        wheel_rotation_degrees: -(full_turns + index as f64 * step + offset),
        ball_rotation_degrees: ball_turns - offset,
    })
}
