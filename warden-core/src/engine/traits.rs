//! Pipeline seams
//!
//! The dispatch pipeline is generic over where signals come from and where
//! orders go, resolved at compile time.

use crate::core::{GatewayError, OrderIntent, OrderResult, Signal, TickEvent};
use crate::risk::AccountState;
use crossbeam::channel::{Receiver, TryRecvError};
use tracing::warn;

/// Produces at most one trading signal per tick
pub trait SignalSource {
    /// Called only after the pre-signal gate passed
    fn next_signal(&mut self, tick: &TickEvent, account: &AccountState) -> Option<Signal>;

    /// Source name for logging
    fn name(&self) -> &'static str;
}

/// Irreversible order submission
pub trait OrderGateway {
    /// Submit once. Failures are reported, never retried.
    fn submit(&mut self, intent: &OrderIntent) -> Result<OrderResult, GatewayError>;

    /// Gateway name for logging
    fn name(&self) -> &'static str;
}

/// Signals pushed by an upstream producer through a channel
///
/// At most one queued signal is taken per tick; the rest wait for later ticks.
pub struct ChannelSignals {
    receiver: Receiver<Signal>,
    disconnected: bool,
}

impl ChannelSignals {
    pub fn new(receiver: Receiver<Signal>) -> Self {
        Self {
            receiver,
            disconnected: false,
        }
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl SignalSource for ChannelSignals {
    fn next_signal(&mut self, _tick: &TickEvent, _account: &AccountState) -> Option<Signal> {
        match self.receiver.try_recv() {
            Ok(signal) => Some(signal),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if !self.disconnected {
                    warn!("Upstream signal channel closed");
                    self.disconnected = true;
                }
                None
            }
        }
    }

    fn name(&self) -> &'static str {
        "ChannelSignals"
    }
}

/// Never signals; pipelines run in pure monitoring mode
pub struct NoSignals;

impl SignalSource for NoSignals {
    fn next_signal(&mut self, _tick: &TickEvent, _account: &AccountState) -> Option<Signal> {
        None
    }

    fn name(&self) -> &'static str {
        "NoSignals"
    }
}
