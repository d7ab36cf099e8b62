//! Simulated trading calls (paper positions).

use crate::{percent_change, PriceSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of a freshly opened call.
pub const FULL_CALL_SIZE: f64 = 100.0;

/// Remaining size below which a call counts as fully closed.
pub const CLOSED_SIZE_EPSILON: f64 = 0.001;

/// Starting balance of a virtual deposit.
pub const DEFAULT_DEPOSIT: f64 = 100.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("Invalid close size {requested}: must be above 0 and at most {remaining}")]
    InvalidCloseSize { requested: f64, remaining: f64 },
    #[error("Call {0} is already closed")]
    AlreadyClosed(String),
    #[error("Entry price must be positive")]
    InvalidEntryPrice,
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "long" => Some(Direction::Long),
            "short" => Some(Direction::Short),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::Long => "Long",
            Direction::Short => "Short",
        }
    }

    /// Realized percent for a move from `entry` to `exit`.
    pub fn pnl_percent(self, entry: f64, exit: f64) -> f64 {
        match self {
            Direction::Long => percent_change(entry, exit),
            Direction::Short => -percent_change(entry, exit),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Open,
    Closed,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Open => "open",
            CallStatus::Closed => "closed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "open" => Some(CallStatus::Open),
            "closed" => Some(CallStatus::Closed),
            _ => None,
        }
    }
}

/// A paper position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: String,
    pub user_id: i64,
    pub username: String,
    /// Chat that receives notifications for this call.
    pub chat_id: i64,
    pub symbol: String,
    pub source: Option<PriceSource>,
    pub direction: Direction,
    pub entry_price: f64,
    /// Remaining size in `[0, FULL_CALL_SIZE]`.
    pub size: f64,
    /// Share of the virtual deposit backing this call (0 = not tracked).
    pub deposit_percent: f64,
    /// Stop-loss price (0 = none).
    pub stop_loss: f64,
    pub status: CallStatus,
    /// Exit price of the last close action.
    pub exit_price: f64,
    /// Realized percent of the last close action.
    pub pnl_percent: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Arithmetic of one (partial) close, computed before anything is written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosePlan {
    pub exit_price: f64,
    pub closed_size: f64,
    pub remaining_size: f64,
    pub pnl_percent: f64,
    /// Deposit percent attributable to the closed part.
    pub closed_deposit_percent: f64,
    pub fully_closed: bool,
}

impl ClosePlan {
    /// New deposit balance after applying this close to `current`.
    pub fn apply_to_deposit(&self, current: f64) -> f64 {
        let change_pct = self.closed_deposit_percent * (self.pnl_percent / 100.0);
        current + change_pct / 100.0 * current
    }
}

impl Call {
    pub fn is_open(&self) -> bool {
        self.status == CallStatus::Open
    }

    pub fn has_stop_loss(&self) -> bool {
        self.stop_loss > 0.0
    }

    /// Long breaches at or below the stop, short at or above.
    pub fn stop_loss_breached(&self, price: f64) -> bool {
        if !self.is_open() || !self.has_stop_loss() {
            return false;
        }
        match self.direction {
            Direction::Long => price <= self.stop_loss,
            Direction::Short => price >= self.stop_loss,
        }
    }

    /// Unrealized percent at `price`.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.direction.pnl_percent(self.entry_price, price)
    }

    /// Deposit percent still backed by the open part of the call.
    pub fn open_deposit_percent(&self) -> f64 {
        self.deposit_percent * (self.size / FULL_CALL_SIZE)
    }

    /// Contribution of the unrealized move to the deposit, in percent.
    pub fn deposit_contribution(&self, price: f64) -> f64 {
        self.open_deposit_percent() * (self.unrealized_pnl(price) / 100.0)
    }

    /// Plan closing `size` units at `exit_price`.
    pub fn plan_close(&self, size: f64, exit_price: f64) -> Result<ClosePlan, CallError> {
        if !self.is_open() {
            return Err(CallError::AlreadyClosed(self.id.clone()));
        }
        if self.entry_price <= 0.0 {
            return Err(CallError::InvalidEntryPrice);
        }
        if !(size > 0.0 && size <= self.size) {
            return Err(CallError::InvalidCloseSize {
                requested: size,
                remaining: self.size,
            });
        }

        let pnl_percent = self.direction.pnl_percent(self.entry_price, exit_price);
        // Shares are taken against the full size so split closes add up to one full close.
        let closed_deposit_percent = if self.deposit_percent > 0.0 {
            self.deposit_percent * (size / FULL_CALL_SIZE)
        } else {
            0.0
        };

        let mut remaining_size = self.size - size;
        let fully_closed = remaining_size < CLOSED_SIZE_EPSILON;
        if fully_closed {
            remaining_size = 0.0;
        }

        Ok(ClosePlan {
            exit_price,
            closed_size: size,
            remaining_size,
            pnl_percent,
            closed_deposit_percent,
            fully_closed,
        })
    }
}

/// Per-user virtual account balance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    pub user_id: i64,
    pub initial: f64,
    pub current: f64,
}

impl Deposit {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            initial: DEFAULT_DEPOSIT,
            current: DEFAULT_DEPOSIT,
        }
    }

    pub fn return_percent(&self) -> f64 {
        percent_change(self.initial, self.current)
    }
}
