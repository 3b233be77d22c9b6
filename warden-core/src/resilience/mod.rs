//! Safety and recovery primitives
//!
//! - Crash-durable kill switch backed by an on-disk marker
//! - Panic hook that engages the switch
//! - Exponential backoff for market-data reconnects

pub mod backoff;
pub mod kill_switch;
pub mod marker;
pub mod panic;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use kill_switch::{KillSwitch, KillSwitchState, SwitchStatus};
pub use marker::{MarkerFile, MarkerRecord};
pub use panic::install_panic_handler;
