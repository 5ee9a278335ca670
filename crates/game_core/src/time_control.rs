//! Time control and per-move time allocation.
//!
//! A [`TimeControl`] describes the clock rules of one game as announced in
//! the game record. [`TimeConfig`] holds the tunables of the allocator and
//! [`TimeConfig::allocate`] turns clock state into a move-time budget.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Clock rules for one game.
///
/// At most one of `increment_ms` / `delay_ms` is nonzero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    /// Starting clock per side
    pub base_ms: u64,
    /// Added to the clock after every move (Fischer increment)
    pub increment_ms: u64,
    /// Grace period before the clock starts ticking each move
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseTimeControlError {
    #[error("time control `{0}` has no `+` separator")]
    MissingSeparator(String),
    #[error("invalid number `{0}` in time control")]
    InvalidNumber(String),
}

impl TimeControl {
    /// Creates an increment-based time control.
    pub fn with_increment(base: Duration, increment: Duration) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            increment_ms: increment.as_millis() as u64,
            delay_ms: 0,
        }
    }

    /// Creates a delay-based time control.
    pub fn with_delay(base: Duration, delay: Duration) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            increment_ms: 0,
            delay_ms: delay.as_millis() as u64,
        }
    }
}

/// Parses `"<minutes>+<seconds>"`, where a trailing `D` on the seconds part
/// marks a delay instead of an increment (`"1+5D"`).
impl FromStr for TimeControl {
    type Err = ParseTimeControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mins, extra) = s
            .split_once('+')
            .ok_or_else(|| ParseTimeControlError::MissingSeparator(s.to_string()))?;

        let base_mins = parse_number(mins)?;
        let (extra, is_delay) = match extra.trim().strip_suffix('D') {
            Some(stripped) => (stripped, true),
            None => (extra, false),
        };
        let extra_secs = parse_number(extra)?;

        let base_ms = (base_mins * 60_000.0) as u64;
        let extra_ms = (extra_secs * 1000.0) as u64;

        Ok(if is_delay {
            Self {
                base_ms,
                increment_ms: 0,
                delay_ms: extra_ms,
            }
        } else {
            Self {
                base_ms,
                increment_ms: extra_ms,
                delay_ms: 0,
            }
        })
    }
}

fn parse_number(s: &str) -> Result<f64, ParseTimeControlError> {
    let s = s.trim();
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(ParseTimeControlError::InvalidNumber(s.to_string())),
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mins = self.base_ms as f64 / 60_000.0;
        if self.delay_ms > 0 {
            write!(f, "{}+{}D", mins, self.delay_ms as f64 / 1000.0)
        } else {
            write!(f, "{}+{}", mins, self.increment_ms as f64 / 1000.0)
        }
    }
}

/// Tunables for the move-time allocator.
///
/// Every field can be overridden from the `[time]` section of the config
/// file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Hard ceiling for a single move
    pub max_move_ms: u64,
    /// Ceiling while the game is still in its first plies
    pub early_max_move_ms: u64,
    /// Number of plies that use `early_max_move_ms`
    pub early_ply_count: u32,
    /// Clock that is never eaten into by the surplus term
    pub min_reserve_ms: u64,
    /// Floor for any budget
    pub min_move_ms: u64,
    /// Fraction (1/n) of the clock surplus spent per move
    pub surplus_divisor: u64,
    /// Safety buffer for small increments
    pub small_buffer_ms: u64,
    /// Safety buffer for increments above the threshold
    pub large_buffer_ms: u64,
    /// Increments up to this value use `small_buffer_ms`
    pub buffer_increment_threshold_ms: u64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            max_move_ms: 30_000,
            early_max_move_ms: 5_000,
            early_ply_count: 4,
            min_reserve_ms: 30_000,
            min_move_ms: 100,
            surplus_divisor: 20,
            small_buffer_ms: 250,
            large_buffer_ms: 1_000,
            buffer_increment_threshold_ms: 1_000,
        }
    }
}

impl TimeConfig {
    /// The ceiling that applies at `ply`.
    pub fn cap_for_ply(&self, ply: u32) -> u64 {
        if ply < self.early_ply_count {
            self.early_max_move_ms.min(self.max_move_ms)
        } else {
            self.max_move_ms
        }
    }

    /// Computes the move-time budget in milliseconds.
    ///
    /// # Arguments
    /// * `tc` - Time control of the current game
    /// * `clock_ms` - Time left on our clock
    /// * `ply` - Plies already played in the game
    pub fn allocate(&self, tc: &TimeControl, clock_ms: u64, ply: u32) -> u64 {
        let buffer = if tc.increment_ms <= self.buffer_increment_threshold_ms {
            self.small_buffer_ms
        } else {
            self.large_buffer_ms
        };

        let mut budget = tc.delay_ms as i64 + tc.increment_ms as i64 - buffer as i64;
        if clock_ms > self.min_reserve_ms {
            budget += ((clock_ms - self.min_reserve_ms) / self.surplus_divisor.max(1)) as i64;
        }

        // Floor last: it wins over a cap configured below it.
        let capped = budget.min(self.cap_for_ply(ply) as i64);
        capped.max(self.min_move_ms as i64) as u64
    }
}

#[cfg(test)]
#[path = "time_control_tests.rs"]
mod time_control_tests;
