//! Monitoring
//!
//! Prometheus metric families. The registry is process-local; binaries dump
//! the text exposition on shutdown.

pub mod metrics;

pub use metrics::{GatewayMetrics, MetricsRegistry, PipelineMetrics, RiskMetrics};
