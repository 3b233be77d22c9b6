//! Market-data subscription
//!
//! Reads broadcast lines, decodes them into ticks and hands each tick to a
//! sink (normally the runtime's per-symbol router). Malformed or unknown
//! messages are dropped and counted; they never stop the subscription.

use super::protocol::TickDecoder;
use crate::core::{GatewayError, TickEvent};
use crate::monitoring::MetricsRegistry;
use crate::resilience::{BackoffConfig, ExponentialBackoff};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::io::{self, BufRead, BufReader, ErrorKind};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest accepted broadcast line. Longer lines are discarded up to the next
/// newline and counted as malformed.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Result of one poll on a broadcast source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Message(String),
    /// A frame that could not be turned into a message line
    Malformed(String),
    /// Nothing yet; lets the caller check for shutdown
    Idle,
    /// Source is finished for good
    Closed,
}

pub trait BroadcastSource {
    fn poll(&mut self) -> Result<Incoming, GatewayError>;
}

/// Receives decoded ticks. Returning false stops the subscriber.
pub trait TickSink {
    fn on_tick(&mut self, tick: TickEvent) -> bool;
}

impl<F: FnMut(TickEvent) -> bool> TickSink for F {
    fn on_tick(&mut self, tick: TickEvent) -> bool {
        self(tick)
    }
}

/// Broadcast lines fed through a channel (replays, paper feeds, tests)
pub struct ChannelBroadcastSource {
    receiver: Receiver<String>,
    idle_timeout: Duration,
}

impl ChannelBroadcastSource {
    pub fn new(receiver: Receiver<String>) -> Self {
        Self {
            receiver,
            idle_timeout: Duration::from_millis(100),
        }
    }
}

impl BroadcastSource for ChannelBroadcastSource {
    fn poll(&mut self) -> Result<Incoming, GatewayError> {
        match self.receiver.recv_timeout(self.idle_timeout) {
            Ok(line) => Ok(Incoming::Message(line)),
            Err(RecvTimeoutError::Timeout) => Ok(Incoming::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(Incoming::Closed),
        }
    }
}

/// Terminal broadcast endpoint over TCP, reconnecting with backoff
pub struct TcpBroadcastSource {
    addr: String,
    read_timeout: Duration,
    backoff: ExponentialBackoff,
    reader: Option<BufReader<TcpStream>>,
    /// Bytes of the line being assembled across timed-out reads
    partial: Vec<u8>,
    /// Bytes dropped so far from an oversized line
    discarded: usize,
}

impl TcpBroadcastSource {
    pub fn new(addr: impl Into<String>, backoff: BackoffConfig) -> Self {
        Self {
            addr: addr.into(),
            read_timeout: Duration::from_millis(250),
            backoff: ExponentialBackoff::new(backoff),
            reader: None,
            partial: Vec::new(),
            discarded: 0,
        }
    }

    fn connect(&mut self) -> Result<(), GatewayError> {
        match TcpStream::connect(&self.addr) {
            Ok(stream) => {
                stream.set_read_timeout(Some(self.read_timeout))?;
                info!(addr = %self.addr, "Market data connected");
                self.backoff.reset();
                self.partial.clear();
                self.discarded = 0;
                self.reader = Some(BufReader::new(stream));
                Ok(())
            }
            Err(e) => match self.backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        addr = %self.addr,
                        error = %e,
                        attempt = self.backoff.attempt_number(),
                        "Market data connect failed, retrying in {:?}",
                        delay
                    );
                    thread::sleep(delay);
                    Ok(())
                }
                None => Err(GatewayError::Transport(e)),
            },
        }
    }
}

impl BroadcastSource for TcpBroadcastSource {
    fn poll(&mut self) -> Result<Incoming, GatewayError> {
        if self.reader.is_none() {
            self.connect()?;
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Incoming::Idle);
        };

        match read_frame(reader, &mut self.partial, &mut self.discarded) {
            Ok(Frame::Line(bytes)) => match String::from_utf8(bytes) {
                Ok(line) => Ok(Incoming::Message(line.trim_end().to_string())),
                Err(e) => Ok(Incoming::Malformed(format!(
                    "invalid UTF-8: {}",
                    e.utf8_error()
                ))),
            },
            Ok(Frame::Oversized(len)) => Ok(Incoming::Malformed(format!(
                "line of {} bytes exceeds {} byte limit",
                len, MAX_LINE_BYTES
            ))),
            Ok(Frame::Eof) => {
                warn!(addr = %self.addr, "Market data connection closed, reconnecting");
                self.reader = None;
                Ok(Incoming::Idle)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(Incoming::Idle)
            }
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "Market data read failed, reconnecting");
                self.reader = None;
                Ok(Incoming::Idle)
            }
        }
    }
}

enum Frame {
    /// One line without its newline
    Line(Vec<u8>),
    /// Total length of a discarded line
    Oversized(usize),
    Eof,
}

/// Read up to the next newline. A timed-out read leaves what it has in
/// `partial`; a line longer than `MAX_LINE_BYTES` stops being buffered and
/// is skipped through its newline.
fn read_frame<R: BufRead>(
    reader: &mut R,
    partial: &mut Vec<u8>,
    discarded: &mut usize,
) -> io::Result<Frame> {
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(Frame::Eof);
        }

        let (chunk, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (&available[..end], true),
            None => (available, false),
        };
        let used = chunk.len() + usize::from(complete);

        if *discarded > 0 || partial.len() + chunk.len() > MAX_LINE_BYTES {
            *discarded += partial.len() + chunk.len();
            partial.clear();
        } else {
            partial.extend_from_slice(chunk);
        }
        reader.consume(used);

        if complete {
            if *discarded > 0 {
                return Ok(Frame::Oversized(std::mem::take(discarded)));
            }
            return Ok(Frame::Line(std::mem::take(partial)));
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    pub messages: u64,
    pub ticks: u64,
    pub malformed: u64,
}

pub struct MarketDataSubscriber<B: BroadcastSource> {
    source: B,
    decoder: TickDecoder,
    shutdown: Arc<AtomicBool>,
    metrics: Option<MetricsRegistry>,
    stats: SubscriberStats,
}

impl<B: BroadcastSource> MarketDataSubscriber<B> {
    pub fn new(source: B, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            source,
            decoder: TickDecoder::new(),
            shutdown,
            metrics: None,
            stats: SubscriberStats::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Pump messages into `sink` until shutdown, source close, or the sink
    /// declines a tick.
    pub fn run<S: TickSink>(&mut self, sink: &mut S) -> Result<SubscriberStats, GatewayError> {
        info!("Market data subscriber started");

        while !self.shutdown.load(Ordering::Acquire) {
            let line = match self.source.poll()? {
                Incoming::Message(line) => line,
                Incoming::Malformed(reason) => {
                    self.stats.messages += 1;
                    self.drop_malformed(&reason);
                    continue;
                }
                Incoming::Idle => continue,
                Incoming::Closed => {
                    info!("Market data source closed");
                    break;
                }
            };

            if !self.handle_line(&line, sink) {
                debug!("Tick sink stopped accepting ticks");
                break;
            }
        }

        info!(
            messages = self.stats.messages,
            ticks = self.stats.ticks,
            malformed = self.stats.malformed,
            "Market data subscriber stopped"
        );
        Ok(self.stats)
    }

    /// Decode and deliver one line; false when the sink wants no more ticks
    pub fn handle_line<S: TickSink>(&mut self, line: &str, sink: &mut S) -> bool {
        self.stats.messages += 1;
        match self.decoder.decode(line) {
            Ok(tick) => {
                self.stats.ticks += 1;
                sink.on_tick(tick)
            }
            Err(e) => {
                self.drop_malformed(&e);
                true
            }
        }
    }

    fn drop_malformed(&mut self, reason: &dyn std::fmt::Display) {
        self.stats.malformed += 1;
        if let Some(metrics) = &self.metrics {
            metrics.gateway().malformed_messages_total.inc();
        }
        warn!(error = %reason, "Dropping market data message");
    }

    pub fn stats(&self) -> SubscriberStats {
        self.stats
    }
}
