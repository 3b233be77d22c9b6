//! Panic hook that engages the kill switch
//!
//! A panic anywhere in the process (a pipeline thread, the subscriber, the
//! forensic writer) means the process can no longer vouch for its own risk
//! checks. The hook engages the kill switch before delegating to the previous
//! hook, so the marker is on disk even when the panic strategy is `abort`.
//!
//! ```no_run
//! use std::time::Duration;
//! use warden_core::resilience::{install_panic_handler, KillSwitch};
//!
//! let kill_switch = KillSwitch::in_memory(Duration::from_secs(300));
//! install_panic_handler(kill_switch.clone());
//! ```

use super::KillSwitch;
use std::panic::{self, PanicInfo};
use tracing::error;

/// Entity recorded in the marker for panic engagements
pub const PANIC_IDENTITY: &str = "panic-hook";

/// Install a global panic hook that engages `kill_switch`, logs the panic and
/// then runs the previously installed hook.
pub fn install_panic_handler(kill_switch: KillSwitch) {
    let previous_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let reason = describe(panic_info);

        error!(reason = %reason, "PANIC: engaging kill switch");
        kill_switch.engage_nonblocking(&reason, PANIC_IDENTITY);

        // Backup in case tracing is misconfigured
        eprintln!("FATAL PANIC: {}", reason);

        previous_hook(panic_info);
    }));

    tracing::info!("Panic handler installed, panics engage the kill switch");
}

fn describe(panic_info: &PanicInfo<'_>) -> String {
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "<unknown location>".to_string());

    let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "<no message>".to_string()
    };

    format!("panic at {}: {}", location, message)
}
