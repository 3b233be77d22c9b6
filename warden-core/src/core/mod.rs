//! Core domain types for the control plane
//!
//! - `TickEvent`: one market update, ephemeral beyond the forensic log
//! - `Signal`: upstream instruction turned into an order by the pipeline
//! - `OrderIntent` / `OrderResult`: request/reply pair crossing the gateway
//! - `errors`: the error taxonomy shared by every component

pub mod errors;
pub mod types;

pub use errors::{
    ConfigError, EvaluationTimeout, GatewayError, KillSwitchError, ProtocolError,
};
pub use types::{now_ns, OrderIntent, OrderKind, OrderResult, Side, Signal, TickEvent};
