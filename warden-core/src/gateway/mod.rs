//! Gateway Protocol Adapter
//!
//! Everything that crosses the process boundary to the trading terminal:
//! - `protocol`: tagged JSON message types and their codecs
//! - `command`: request/reply order channel with timeout, no retry
//! - `market_data`: broadcast subscription with reconnect
//! - `paper`: in-process terminal for paper runs

pub mod command;
pub mod market_data;
pub mod paper;
pub mod protocol;

pub use command::{CommandClient, CommandTransport, TcpCommandTransport};
pub use market_data::{
    BroadcastSource, ChannelBroadcastSource, Incoming, MarketDataSubscriber, SubscriberStats,
    TcpBroadcastSource, TickSink,
};
pub use paper::PaperTerminal;
pub use protocol::{
    decode_command, decode_result, encode_command, encode_result, encode_tick, BroadcastMessage,
    TickDecoder, TickMessage, TradeCommand, TradeResult,
};
