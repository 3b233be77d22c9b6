//! Dispatch engine
//!
//! - `dispatch`: the double-gate per-tick pipeline
//! - `runtime`: per-instrument threads, tick routing and the marker watcher
//! - `traits`: signal source and order gateway seams

pub mod dispatch;
pub mod runtime;
pub mod traits;

pub use dispatch::{DispatchPipeline, PipelineContext, PipelineStats, TickOutcome};
pub use runtime::{
    run_pipeline, spawn_marker_watcher, PipelineReport, Runtime, TickRouter, TICK_QUEUE_CAPACITY,
};
pub use traits::{ChannelSignals, NoSignals, OrderGateway, SignalSource};
