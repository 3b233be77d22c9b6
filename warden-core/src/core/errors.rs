//! Domain-specific error types for the control plane
//!
//! Every failure a component can report is one of these variants. None of them
//! escapes a pipeline tick: the dispatch pipeline turns each into a BLOCKED or
//! SUBMIT_FAILED forensic record.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration could not be loaded or failed validation.
///
/// Raised at startup only; a process never runs with an invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The loader failed (missing file, unparsable TOML, missing threshold)
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// Explicit path does not exist
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Numeric threshold outside its allowed range
    #[error("invalid value for `{field}`: {value} ({reason})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// Any other semantically invalid setting
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Kill switch transition or marker I/O failure
#[derive(Debug, Error)]
pub enum KillSwitchError {
    /// Disengage requested before the recovery cooldown elapsed
    #[error("recovery cooldown not elapsed ({}s remaining)", .remaining.as_secs_f64())]
    CooldownNotElapsed { remaining: Duration },

    /// Reading, writing or removing the durable marker failed
    #[error("kill switch marker {}: {source}", .path.display())]
    Marker {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Risk evaluation exceeded the per-tick processing budget.
///
/// The evaluation is not cancelled; the elapsed time is measured after it
/// returns and the tick is blocked.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("risk evaluation took {}us, budget {}us", .elapsed.as_micros(), .budget.as_micros())]
pub struct EvaluationTimeout {
    pub elapsed: Duration,
    pub budget: Duration,
}

/// A wire message could not be decoded into a domain type
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not valid JSON, or truncated
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Valid JSON with an unknown tag or missing/mistyped fields
    #[error("unrecognised message shape: {0}")]
    Shape(#[source] serde_json::Error),

    /// Decoded fine but a field value is unusable
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ProtocolError {
    /// Classify a serde_json failure as syntax or shape
    pub fn from_json(err: serde_json::Error) -> Self {
        if err.is_data() {
            ProtocolError::Shape(err)
        } else {
            ProtocolError::Malformed(err)
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Command-channel failure talking to the trading terminal
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No reply within the command timeout. Never retried.
    #[error("no reply from terminal within {}ms", .0.as_millis())]
    CommandTimeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Peer closed the connection
    #[error("terminal connection closed")]
    Disconnected,
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::CommandTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_classification() {
        let syntax = serde_json::from_str::<serde_json::Value>("{\"type\":").unwrap_err();
        assert!(matches!(
            ProtocolError::from_json(syntax),
            ProtocolError::Malformed(_)
        ));

        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            field: u32,
        }
        let shape = serde_json::from_str::<Needs>("{\"other\": 1}").unwrap_err();
        assert!(matches!(ProtocolError::from_json(shape), ProtocolError::Shape(_)));
    }

    #[test]
    fn test_error_messages() {
        let err = KillSwitchError::CooldownNotElapsed {
            remaining: Duration::from_millis(1500),
        };
        assert_eq!(
            err.to_string(),
            "recovery cooldown not elapsed (1.5s remaining)"
        );

        let err = GatewayError::CommandTimeout(Duration::from_millis(250));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "no reply from terminal within 250ms");

        let err = EvaluationTimeout {
            elapsed: Duration::from_micros(12_000),
            budget: Duration::from_millis(10),
        };
        assert_eq!(err.to_string(), "risk evaluation took 12000us, budget 10000us");
    }
}
