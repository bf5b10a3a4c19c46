use serde::{Deserialize, Serialize};

use crate::round::{BetKind, Chips};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaceBetRequest {
    pub bet_kind: BetKind,
    #[serde(default)]
    pub numbers: Vec<u8>,
    pub amount: Chips,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub initial_balance: Chips,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct VisibilityRequest {
    pub visible: bool,
}
