//! Instant-resolution games. Each one only decides the payout multiplier;
//! money movement goes through `bet` and `round`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LedgerError;

/// House edge baked into the multipliers (1%).
const RTP: f64 = 0.99;
const COINFLIP_MULTIPLIER: f64 = 1.96;
const MAX_LIMBO_TARGET: f64 = 1_000_000.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinSide {
    Heads,
    Tails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum GameParams {
    Coinflip { side: CoinSide },
    /// Roll 0.00-99.99, win when the roll reaches the target (or lands under it)
    Dice { target: f64, over: bool },
    /// Win when the crash point reaches the target multiplier
    Limbo { target: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameOutcome {
    /// Payout as a multiple of the stake; 0 on a loss
    pub multiplier: f64,
    /// Human readable result, e.g. the rolled number
    pub detail: String,
}

impl GameParams {
    pub fn name(&self) -> &'static str {
        match self {
            GameParams::Coinflip { .. } => "coinflip",
            GameParams::Dice { .. } => "dice",
            GameParams::Limbo { .. } => "limbo",
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            GameParams::Coinflip { .. } => Duration::from_secs(15),
            GameParams::Dice { .. } | GameParams::Limbo { .. } => Duration::from_secs(30),
        }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        match *self {
            GameParams::Coinflip { .. } => Ok(()),
            GameParams::Dice { target, .. } => {
                if !(2.0..=98.0).contains(&target) {
                    return Err(LedgerError::InvalidAmount(format!(
                        "dice target {target} must be between 2 and 98"
                    )));
                }
                Ok(())
            }
            GameParams::Limbo { target } => {
                if !(1.01..=MAX_LIMBO_TARGET).contains(&target) {
                    return Err(LedgerError::InvalidAmount(format!(
                        "limbo target {target} must be between 1.01 and {MAX_LIMBO_TARGET}"
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn play<R: Rng>(&self, rng: &mut R) -> Result<GameOutcome, LedgerError> {
        self.validate()?;
        let outcome = match *self {
            GameParams::Coinflip { side } => {
                let landed = if rng.gen_bool(0.5) {
                    CoinSide::Heads
                } else {
                    CoinSide::Tails
                };
                GameOutcome {
                    multiplier: if landed == side { COINFLIP_MULTIPLIER } else { 0.0 },
                    detail: format!("{landed:?}").to_lowercase(),
                }
            }
            GameParams::Dice { target, over } => {
                let roll = rng.gen_range(0..10_000) as f64 / 100.0;
                let chance = if over { 100.0 - target } else { target };
                GameOutcome {
                    multiplier: if dice_wins(roll, target, over) {
                        dice_multiplier(chance)
                    } else {
                        0.0
                    },
                    detail: format!("{roll:.2}"),
                }
            }
            GameParams::Limbo { target } => {
                let crash = limbo_crash_point(rng.gen_range(0.0..1.0));
                GameOutcome {
                    multiplier: if crash >= target { target } else { 0.0 },
                    detail: format!("{crash:.2}x"),
                }
            }
        };
        Ok(outcome)
    }
}

/// Over wins on `roll >= target` so that both sides cover exactly the
/// percentage they are priced at.
pub fn dice_wins(roll: f64, target: f64, over: bool) -> bool {
    if over { roll >= target } else { roll < target }
}

/// Multiplier for a win chance given in percent, truncated to 4 decimals.
pub fn dice_multiplier(chance: f64) -> f64 {
    ((RTP * 100.0 / chance) * 10_000.0).floor() / 10_000.0
}

/// Maps a uniform sample in [0, 1) to a crash point, floored to 2 decimals.
pub fn limbo_crash_point(sample: f64) -> f64 {
    let crash = RTP / (1.0 - sample);
    ((crash * 100.0).floor() / 100.0).clamp(1.0, MAX_LIMBO_TARGET)
}
