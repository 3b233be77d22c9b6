//! In-process paper terminal
//!
//! Speaks the same request/reply protocol as the real terminal, so paper runs
//! exercise the full encode → submit → decode path. Clones share the ticket
//! sequence and order counter.

use super::command::CommandTransport;
use super::protocol::{decode_command, encode_result};
use crate::core::{GatewayError, OrderResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
enum PaperMode {
    Fill,
    Reject(i64),
}

#[derive(Debug, Clone)]
pub struct PaperTerminal {
    next_ticket: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
    fill_price: Option<f64>,
    latency: Duration,
    mode: PaperMode,
}

impl PaperTerminal {
    /// Fills every order. Without a fill price the reply omits `price` and
    /// the pipeline books the fill at the tick's executable price.
    pub fn new(fill_price: Option<f64>) -> Self {
        Self {
            next_ticket: Arc::new(AtomicU64::new(1)),
            received: Arc::new(AtomicU64::new(0)),
            fill_price,
            latency: Duration::ZERO,
            mode: PaperMode::Fill,
        }
    }

    /// Answers every order with an ERROR reply
    pub fn rejecting(retcode: i64) -> Self {
        Self {
            mode: PaperMode::Reject(retcode),
            ..Self::new(None)
        }
    }

    /// Simulated reply latency; longer than the command timeout yields a timeout
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Requests received so far, across clones
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }
}

impl CommandTransport for PaperTerminal {
    fn round_trip(&mut self, request: &str, timeout: Duration) -> Result<String, GatewayError> {
        let intent = decode_command(request)?;
        self.received.fetch_add(1, Ordering::AcqRel);

        if self.latency > timeout {
            thread::sleep(timeout);
            return Err(GatewayError::CommandTimeout(timeout));
        }
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let result = match self.mode {
            PaperMode::Fill => OrderResult::Filled {
                ticket: self.next_ticket.fetch_add(1, Ordering::AcqRel),
                price: self.fill_price,
            },
            PaperMode::Reject(retcode) => OrderResult::Rejected { retcode },
        };
        tracing::debug!(symbol = %intent.symbol, side = %intent.side, volume = intent.volume, ?result, "Paper order");

        Ok(encode_result(&result)?)
    }

    fn name(&self) -> &'static str {
        "PaperTerminal"
    }
}
