//! Domain value types
//!
//! Prices and volumes are `f64`: the terminal quotes in floating point and
//! the wire format carries JSON numbers. Timestamps are nanoseconds since the
//! Unix epoch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use super::errors::ProtocolError;

/// Wall-clock nanoseconds since the Unix epoch
#[inline]
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Order / position side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for long, -1 for short
    #[inline]
    pub fn direction(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// One market update for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    /// Traded volume, zero when the feed does not report it
    pub volume: f64,
    /// Terminal-side time in milliseconds
    pub exchange_time_ms: i64,
    /// Monotonic per-subscriber sequence, assigned on receipt
    pub sequence: u64,
    pub received_at_ns: u64,
}

impl TickEvent {
    pub fn new(symbol: impl Into<String>, bid: f64, ask: f64) -> Self {
        Self {
            symbol: symbol.into(),
            bid,
            ask,
            volume: 0.0,
            exchange_time_ms: 0,
            sequence: 0,
            received_at_ns: now_ns(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Price an open position on `side` is valued at: longs at bid, shorts at ask
    #[inline]
    pub fn mark_for(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.bid,
            Side::Sell => self.ask,
        }
    }

    /// Price a new order on `side` executes at: buys lift the ask, sells hit the bid
    #[inline]
    pub fn entry_for(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        }
    }
}

/// Upstream trading instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    #[serde(default)]
    pub kind: OrderKind,
}

impl Signal {
    pub fn buy(symbol: impl Into<String>, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side: Side::Buy,
            volume,
            kind: OrderKind::Trade,
        }
    }

    pub fn sell(symbol: impl Into<String>, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side: Side::Sell,
            volume,
            kind: OrderKind::Trade,
        }
    }
}

/// Command type understood by the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    /// Market order opening or adding to a position
    #[default]
    Trade,
    /// Execution request against an existing position
    Execution,
}

/// Order request handed to the command channel
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub kind: OrderKind,
    pub symbol: String,
    pub volume: f64,
    pub side: Side,
}

impl OrderIntent {
    /// Validate a signal into an order request
    pub fn from_signal(signal: &Signal) -> Result<Self, ProtocolError> {
        if signal.symbol.is_empty() {
            return Err(ProtocolError::invalid("symbol", "empty"));
        }
        if !signal.volume.is_finite() || signal.volume <= 0.0 {
            return Err(ProtocolError::invalid(
                "volume",
                format!("must be positive, got {}", signal.volume),
            ));
        }
        Ok(Self {
            kind: signal.kind,
            symbol: signal.symbol.clone(),
            volume: signal.volume,
            side: signal.side,
        })
    }
}

/// Terminal's reply to an `OrderIntent`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderResult {
    Filled { ticket: u64, price: Option<f64> },
    Rejected { retcode: i64 },
}

impl OrderResult {
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderResult::Filled { .. })
    }
}
