//! Terminal wire protocol
//!
//! Newline-delimited JSON. Three message families:
//!
//! ```text
//! broadcast   {"type":"TICK","symbol":"EURUSD","bid":1.1,"ask":1.1002,"time":1700000000000}
//! command     {"type":"TRADE","symbol":"EURUSD","volume":0.1,"side":"BUY"}
//! reply       {"status":"FILLED","ticket":123,"price":1.1002} | {"status":"ERROR","retcode":10019}
//! ```
//!
//! Decoding validates field values, not only shape: a tick with a crossed or
//! non-positive quote is rejected here and never reaches a pipeline.

use crate::core::{now_ns, OrderIntent, OrderKind, OrderResult, ProtocolError, Side, TickEvent};
use serde::{Deserialize, Serialize};

/// Market-data payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickMessage {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    /// Terminal time, milliseconds
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// Anything published on the broadcast channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BroadcastMessage {
    #[serde(rename = "TICK")]
    Tick(TickMessage),
}

/// Order request on the command channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCommand {
    #[serde(rename = "type")]
    pub kind: OrderKind,
    pub symbol: String,
    pub volume: f64,
    pub side: Side,
}

/// Reply on the command channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum TradeResult {
    #[serde(rename = "FILLED")]
    Filled {
        ticket: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        price: Option<f64>,
    },
    #[serde(rename = "ERROR")]
    Error { retcode: i64 },
}

/// Turns broadcast lines into sequenced ticks
#[derive(Debug, Default)]
pub struct TickDecoder {
    next_sequence: u64,
}

impl TickDecoder {
    pub fn new() -> Self {
        Self { next_sequence: 1 }
    }

    /// Decode one line. Sequence numbers are only consumed by valid ticks.
    pub fn decode(&mut self, line: &str) -> Result<TickEvent, ProtocolError> {
        let message: BroadcastMessage =
            serde_json::from_str(line.trim()).map_err(ProtocolError::from_json)?;
        let BroadcastMessage::Tick(tick) = message;

        let mut event = tick_from_message(tick)?;
        event.sequence = self.next_sequence.max(1);
        self.next_sequence = event.sequence + 1;
        Ok(event)
    }
}

fn tick_from_message(msg: TickMessage) -> Result<TickEvent, ProtocolError> {
    if msg.symbol.is_empty() {
        return Err(ProtocolError::invalid("symbol", "empty"));
    }
    if !msg.bid.is_finite() || msg.bid <= 0.0 {
        return Err(ProtocolError::invalid("bid", format!("not a positive price: {}", msg.bid)));
    }
    if !msg.ask.is_finite() || msg.ask <= 0.0 {
        return Err(ProtocolError::invalid("ask", format!("not a positive price: {}", msg.ask)));
    }
    if msg.ask < msg.bid {
        return Err(ProtocolError::invalid(
            "ask",
            format!("crossed quote: bid {} > ask {}", msg.bid, msg.ask),
        ));
    }
    let volume = match msg.volume {
        Some(v) if !v.is_finite() || v < 0.0 => {
            return Err(ProtocolError::invalid("volume", format!("negative or non-finite: {}", v)))
        }
        Some(v) => v,
        None => 0.0,
    };

    Ok(TickEvent {
        symbol: msg.symbol,
        bid: msg.bid,
        ask: msg.ask,
        volume,
        exchange_time_ms: msg.time,
        sequence: 0,
        received_at_ns: now_ns(),
    })
}

/// Encode a tick as a broadcast line (paper feeds, replays)
pub fn encode_tick(tick: &TickEvent) -> Result<String, ProtocolError> {
    let message = BroadcastMessage::Tick(TickMessage {
        symbol: tick.symbol.clone(),
        bid: tick.bid,
        ask: tick.ask,
        time: tick.exchange_time_ms,
        volume: (tick.volume != 0.0).then_some(tick.volume),
    });
    serde_json::to_string(&message).map_err(ProtocolError::from_json)
}

fn validate_intent(symbol: &str, volume: f64) -> Result<(), ProtocolError> {
    if symbol.is_empty() {
        return Err(ProtocolError::invalid("symbol", "empty"));
    }
    if !volume.is_finite() || volume <= 0.0 {
        return Err(ProtocolError::invalid("volume", format!("must be positive, got {}", volume)));
    }
    Ok(())
}

pub fn encode_command(intent: &OrderIntent) -> Result<String, ProtocolError> {
    validate_intent(&intent.symbol, intent.volume)?;
    let command = TradeCommand {
        kind: intent.kind,
        symbol: intent.symbol.clone(),
        volume: intent.volume,
        side: intent.side,
    };
    serde_json::to_string(&command).map_err(ProtocolError::from_json)
}

pub fn decode_command(line: &str) -> Result<OrderIntent, ProtocolError> {
    let command: TradeCommand =
        serde_json::from_str(line.trim()).map_err(ProtocolError::from_json)?;
    validate_intent(&command.symbol, command.volume)?;
    Ok(OrderIntent {
        kind: command.kind,
        symbol: command.symbol,
        volume: command.volume,
        side: command.side,
    })
}

pub fn encode_result(result: &OrderResult) -> Result<String, ProtocolError> {
    let reply = match *result {
        OrderResult::Filled { ticket, price } => TradeResult::Filled { ticket, price },
        OrderResult::Rejected { retcode } => TradeResult::Error { retcode },
    };
    serde_json::to_string(&reply).map_err(ProtocolError::from_json)
}

pub fn decode_result(line: &str) -> Result<OrderResult, ProtocolError> {
    let reply: TradeResult = serde_json::from_str(line.trim()).map_err(ProtocolError::from_json)?;
    Ok(match reply {
        TradeResult::Filled { ticket, price } => {
            if let Some(p) = price {
                if !p.is_finite() || p <= 0.0 {
                    return Err(ProtocolError::invalid("price", format!("not a positive price: {}", p)));
                }
            }
            OrderResult::Filled { ticket, price }
        }
        TradeResult::Error { retcode } => OrderResult::Rejected { retcode },
    })
}
