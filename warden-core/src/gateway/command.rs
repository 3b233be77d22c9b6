//! Command channel (request/reply)
//!
//! Exactly one reply per request. A request that gets no reply within the
//! timeout is reported as `CommandTimeout` and never re-sent: the terminal may
//! still have executed it, and a retry could double the position. The
//! connection is dropped on timeout so a late reply cannot be paired with the
//! next request.

use super::protocol::{decode_result, encode_command};
use crate::core::{GatewayError, OrderIntent, OrderResult};
use crate::engine::OrderGateway;
use crate::monitoring::MetricsRegistry;
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One request line out, one reply line back
pub trait CommandTransport {
    fn round_trip(&mut self, request: &str, timeout: Duration) -> Result<String, GatewayError>;

    fn name(&self) -> &'static str;
}

/// Newline-delimited JSON over TCP to the terminal's command endpoint
pub struct TcpCommandTransport {
    addr: String,
    connect_timeout: Duration,
    conn: Option<BufReader<TcpStream>>,
}

impl TcpCommandTransport {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            conn: None,
        }
    }

    fn resolve(&self) -> io::Result<SocketAddr> {
        self.addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                ErrorKind::AddrNotAvailable,
                format!("no address for {}", self.addr),
            )
        })
    }

    fn connection(&mut self) -> Result<&mut BufReader<TcpStream>, GatewayError> {
        if self.conn.is_none() {
            let addr = self.resolve()?;
            let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
            stream.set_nodelay(true)?;
            info!(addr = %self.addr, "Command channel connected");
            self.conn = Some(BufReader::new(stream));
        }
        self.conn.as_mut().ok_or(GatewayError::Disconnected)
    }

    /// Write the request and read one reply line, all within `timeout`.
    /// The read timeout shrinks with each read so a reply trickling in
    /// byte by byte cannot outlast the deadline.
    fn exchange(
        conn: &mut BufReader<TcpStream>,
        request: &str,
        timeout: Duration,
    ) -> Result<String, GatewayError> {
        let deadline = Instant::now() + timeout;
        {
            let stream = conn.get_mut();
            stream.set_write_timeout(Some(timeout))?;
            stream.write_all(request.as_bytes())?;
            stream.write_all(b"\n")?;
            stream.flush()?;
        }

        let mut reply = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(GatewayError::CommandTimeout(timeout));
            }
            conn.get_ref().set_read_timeout(Some(remaining))?;

            let available = match conn.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(GatewayError::CommandTimeout(timeout))
                }
                Err(e) => return Err(GatewayError::Transport(e)),
            };
            if available.is_empty() {
                return Err(GatewayError::Disconnected);
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    reply.extend_from_slice(&available[..end]);
                    conn.consume(end + 1);
                    break;
                }
                None => {
                    let len = available.len();
                    reply.extend_from_slice(available);
                    conn.consume(len);
                }
            }
        }

        Ok(String::from_utf8_lossy(&reply).trim_end().to_string())
    }
}

impl CommandTransport for TcpCommandTransport {
    fn round_trip(&mut self, request: &str, timeout: Duration) -> Result<String, GatewayError> {
        let result = Self::exchange(self.connection()?, request, timeout);
        if let Err(e) = &result {
            warn!(addr = %self.addr, error = %e, "Command channel reset");
            self.conn = None;
        }
        result
    }

    fn name(&self) -> &'static str {
        "TcpCommandTransport"
    }
}

/// Order gateway speaking the terminal protocol over any transport
pub struct CommandClient<T: CommandTransport> {
    transport: T,
    timeout: Duration,
    metrics: Option<MetricsRegistry>,
}

impl<T: CommandTransport> CommandClient<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// One request, exactly one reply. Timeouts surface as
    /// `GatewayError::CommandTimeout` and are never retried.
    pub fn send_order(&mut self, intent: &OrderIntent) -> Result<OrderResult, GatewayError> {
        let request = encode_command(intent)?;
        debug!(request = %request, "Submitting order");

        let outcome = self
            .transport
            .round_trip(&request, self.timeout)
            .and_then(|reply| decode_result(&reply).map_err(GatewayError::from));

        if let Some(metrics) = &self.metrics {
            let label = match &outcome {
                Ok(OrderResult::Filled { .. }) => "filled",
                Ok(OrderResult::Rejected { .. }) => "rejected",
                Err(GatewayError::CommandTimeout(_)) => "timeout",
                Err(_) => "error",
            };
            metrics.gateway().commands_total.with_label_values(&[label]).inc();
        }

        outcome
    }
}

impl<T: CommandTransport> OrderGateway for CommandClient<T> {
    fn submit(&mut self, intent: &OrderIntent) -> Result<OrderResult, GatewayError> {
        self.send_order(intent)
    }

    fn name(&self) -> &'static str {
        self.transport.name()
    }
}
