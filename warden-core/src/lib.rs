//! Warden Core - Risk-Control Plane for Automated Trading
//!
//! Warden sits between an upstream signal producer and the order endpoint of an
//! external trading terminal. It enforces hard account-risk limits through a
//! crash-durable kill switch that is shared by every instrument pipeline in the
//! process and, through an on-disk marker, by every cooperating process on the host.
//!
//! ## Architecture
//!
//! ```text
//!   market tick ──► DispatchPipeline ──► RiskEvaluator ──(hard breach)──► KillSwitch
//!                        │                                                    ▲
//!                        ├── gate 1: is_safe()      ◄──────────────────────────┤
//!                        ├── gate 2: confirm_safe() ◄──────────────────────────┘
//!                        ▼
//!                  CommandClient ──► external terminal (request / reply)
//! ```
//!
//! ## Modules
//! - `core`: Domain types (TickEvent, Signal, OrderIntent, OrderResult) and error taxonomy
//! - `config`: Validated, immutable configuration
//! - `resilience`: Kill switch, marker file, backoff, panic hook
//! - `risk`: Per-tick account evaluator
//! - `engine`: Double-gate dispatch pipeline and per-instrument runtime
//! - `gateway`: Wire protocol, command channel and market-data subscriber
//! - `forensic`: Append-only decision log
//! - `monitoring`: Prometheus metrics
//! - `utils`: Logging setup

pub mod core;
pub mod config;
pub mod resilience;
pub mod risk;
pub mod engine;
pub mod gateway;
pub mod forensic;
pub mod monitoring;
pub mod utils;

// Re-export core types
pub use crate::core::{OrderIntent, OrderKind, OrderResult, Side, Signal, TickEvent};

pub use crate::config::{Config, RiskLimitsConfig, KillSwitchMode};
pub use crate::resilience::{KillSwitch, KillSwitchState, SwitchStatus};
pub use crate::risk::{AccountState, AlertLevel, EvaluationResult, RiskEvaluator, RiskSummary};
pub use crate::engine::{DispatchPipeline, OrderGateway, PipelineContext, SignalSource, TickOutcome};
pub use crate::forensic::{Action, ForensicLog, ForensicRecord};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::core::{OrderIntent, OrderKind, OrderResult, Side, Signal, TickEvent};
    pub use crate::config::{Config, KillSwitchMode, RiskLimitsConfig};
    pub use crate::engine::{DispatchPipeline, OrderGateway, PipelineContext, SignalSource};
    pub use crate::forensic::{Action, ForensicLog};
    pub use crate::monitoring::MetricsRegistry;
    pub use crate::resilience::KillSwitch;
    pub use crate::risk::{AccountState, AlertLevel, RiskEvaluator};
}
