//! Crash-durable kill switch
//!
//! One switch per process, shared by every pipeline through cheap clones. The
//! safety state lives in an atomic so the per-tick gate is a single load;
//! transitions are serialized by one mutex and persisted through the on-disk
//! marker so they survive restarts and are visible to other processes.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use warden_core::resilience::KillSwitch;
//!
//! let kill_switch = KillSwitch::with_marker("./data/kill_switch.lock", Duration::from_secs(300), "warden")?;
//!
//! if kill_switch.is_safe() {
//!     // build the order, then re-check right before submitting
//!     if kill_switch.confirm_safe() {
//!         // submit
//!     }
//! }
//!
//! kill_switch.engage("hard drawdown breach")?;
//! # Ok::<(), warden_core::core::KillSwitchError>(())
//! ```
//!
//! ## Invariants
//!
//! - ENGAGED → SAFE only through `disengage` (or an operator removing the
//!   marker, picked up by `refresh`), never before the recovery cooldown.
//! - `engage` is idempotent: the first reason and timestamp are kept.
//! - If the marker cannot be written the in-memory state is still ENGAGED.

use super::marker::{MarkerFile, MarkerRecord};
use crate::core::{now_ns, KillSwitchError};
use crate::forensic::{Action, ForensicLog, ForensicRecord};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Safety state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum SwitchStatus {
    /// Orders may be emitted
    Safe = 0,
    /// No order may be emitted
    Engaged = 1,
}

impl From<u8> for SwitchStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Safe,
            // Anything unexpected is treated as engaged
            _ => Self::Engaged,
        }
    }
}

/// Snapshot of the switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub status: SwitchStatus,
    pub reason: Option<String>,
    pub engaged_at_ns: Option<u64>,
    pub engaged_by: Option<String>,
}

impl KillSwitchState {
    fn safe() -> Self {
        Self {
            status: SwitchStatus::Safe,
            reason: None,
            engaged_at_ns: None,
            engaged_by: None,
        }
    }

    fn engaged(record: MarkerRecord) -> Self {
        Self {
            status: SwitchStatus::Engaged,
            reason: Some(record.reason),
            engaged_at_ns: Some(record.engaged_at_ns),
            engaged_by: Some(record.engaged_by),
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.status == SwitchStatus::Engaged
    }
}

enum Durability {
    Marker(MarkerFile),
    InMemory,
}

struct Guarded {
    state: KillSwitchState,
    /// False when the current engagement never reached disk; an absent marker
    /// then must not be read as an external disengage.
    marker_written: bool,
    /// True when the current engagement was made through this switch, false
    /// when it was restored or adopted from the marker
    local: bool,
}

struct Inner {
    status: AtomicU8,
    guarded: Mutex<Guarded>,
    durability: Durability,
    cooldown: Duration,
    identity: String,
    forensic: Option<ForensicLog>,
}

/// Process-wide kill switch handle
#[derive(Clone)]
pub struct KillSwitch {
    inner: Arc<Inner>,
}

impl KillSwitch {
    /// Marker-backed switch. A marker left by a previous run or another
    /// process starts the switch ENGAGED.
    pub fn with_marker(
        path: impl Into<PathBuf>,
        cooldown: Duration,
        identity: impl Into<String>,
    ) -> Result<Self, KillSwitchError> {
        let marker = MarkerFile::new(path);
        let restored = marker.read()?;

        let (state, marker_written) = match restored {
            Some(record) => {
                warn!(
                    path = %marker.path().display(),
                    reason = %record.reason,
                    engaged_by = %record.engaged_by,
                    "Kill switch marker present at startup, starting ENGAGED"
                );
                (KillSwitchState::engaged(record), true)
            }
            None => (KillSwitchState::safe(), false),
        };

        Ok(Self::build(
            state,
            marker_written,
            Durability::Marker(marker),
            cooldown,
            identity.into(),
        ))
    }

    /// Process-local switch with no durability (paper runs, tests)
    pub fn in_memory(cooldown: Duration) -> Self {
        Self::build(
            KillSwitchState::safe(),
            false,
            Durability::InMemory,
            cooldown,
            "warden".to_string(),
        )
    }

    fn build(
        state: KillSwitchState,
        marker_written: bool,
        durability: Durability,
        cooldown: Duration,
        identity: String,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                status: AtomicU8::new(state.status as u8),
                guarded: Mutex::new(Guarded {
                    state,
                    marker_written,
                    local: false,
                }),
                durability,
                cooldown,
                identity,
                forensic: None,
            }),
        }
    }

    /// Record every transition in `forensic`. Must be called before the
    /// switch is cloned.
    pub fn with_forensic(mut self, forensic: ForensicLog) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.forensic = Some(forensic),
            None => warn!("Kill switch already shared, forensic log not attached"),
        }
        self
    }

    /// Per-tick gate: one atomic load, no I/O
    #[inline(always)]
    pub fn is_safe(&self) -> bool {
        self.inner.status.load(Ordering::Acquire) == SwitchStatus::Safe as u8
    }

    #[inline]
    pub fn status(&self) -> SwitchStatus {
        SwitchStatus::from(self.inner.status.load(Ordering::Acquire))
    }

    /// Pre-submit gate. Re-checks the in-memory flag and, for a marker-backed
    /// switch, whether another process engaged since the last look.
    pub fn confirm_safe(&self) -> bool {
        if !self.is_safe() {
            return false;
        }
        match &self.inner.durability {
            Durability::InMemory => true,
            Durability::Marker(marker) => {
                if !marker.is_present() {
                    return self.is_safe();
                }
                if let Err(e) = self.refresh() {
                    error!(error = %e, "Failed to adopt external kill switch marker");
                }
                false
            }
        }
    }

    /// Engage with this process's identity. Returns true if this call
    /// performed the SAFE → ENGAGED transition.
    pub fn engage(&self, reason: &str) -> Result<bool, KillSwitchError> {
        let identity = self.inner.identity.clone();
        self.engage_by(reason, &identity)
    }

    /// Engage naming a specific entity (evaluator, operator, panic hook)
    pub fn engage_by(&self, reason: &str, engaged_by: &str) -> Result<bool, KillSwitchError> {
        let guard = self.inner.guarded.lock();
        self.engage_locked(guard, reason, engaged_by)
    }

    /// Engage from a context that must not block indefinitely (panic hook).
    /// The flag flips immediately; persistence is attempted only if the
    /// transition lock can be taken quickly.
    pub fn engage_nonblocking(&self, reason: &str, engaged_by: &str) {
        self.inner
            .status
            .store(SwitchStatus::Engaged as u8, Ordering::Release);

        match self.inner.guarded.try_lock_for(Duration::from_millis(50)) {
            Some(guard) => {
                if let Err(e) = self.engage_locked(guard, reason, engaged_by) {
                    error!(error = %e, "Kill switch marker not written");
                }
            }
            None => error!(reason, "Kill switch lock busy, engaged in memory only"),
        }
    }

    fn engage_locked(
        &self,
        mut guard: MutexGuard<'_, Guarded>,
        reason: &str,
        engaged_by: &str,
    ) -> Result<bool, KillSwitchError> {
        if guard.state.is_engaged() {
            debug!(
                reason,
                existing = ?guard.state.reason,
                "Kill switch already engaged, ignoring"
            );
            return Ok(false);
        }

        // Flag first: in-process gates close before the marker is synced
        self.inner
            .status
            .store(SwitchStatus::Engaged as u8, Ordering::Release);

        let record = MarkerRecord {
            reason: reason.to_string(),
            engaged_at_ns: now_ns(),
            engaged_by: engaged_by.to_string(),
        };

        let requested = record.clone();
        let (record, persisted) = match &self.inner.durability {
            Durability::Marker(marker) => match marker.create(&record) {
                Ok(on_disk) => (on_disk, Ok(())),
                Err(e) => (record, Err(e)),
            },
            Durability::InMemory => (record, Ok(())),
        };

        guard.marker_written =
            persisted.is_ok() && matches!(self.inner.durability, Durability::Marker(_));
        // Another process's marker won the create race
        guard.local = record == requested;
        guard.state = KillSwitchState::engaged(record.clone());
        drop(guard);

        error!(
            reason = %record.reason,
            engaged_by = %record.engaged_by,
            "KILL SWITCH ENGAGED"
        );
        if let Err(e) = &persisted {
            error!(error = %e, "Kill switch marker not written, engaged in memory only");
        }
        self.record_transition(
            Action::KillSwitchEngaged,
            format!("{} (by {})", record.reason, record.engaged_by),
        );

        persisted.map(|_| true)
    }

    /// Clear the switch once the recovery cooldown has elapsed since engagement.
    /// Disengaging a SAFE switch is a no-op.
    pub fn disengage(&self) -> Result<(), KillSwitchError> {
        let guard = self.inner.guarded.lock();
        if !guard.state.is_engaged() {
            debug!("Kill switch already safe, ignoring disengage");
            return Ok(());
        }
        self.disengage_locked(guard)
    }

    /// Clear the switch only if `engaged_by` engaged it through this handle.
    /// Engagements by any other entity, or restored/adopted from the marker,
    /// are left alone and `Ok(false)` is returned.
    pub fn disengage_if_engaged_by(&self, engaged_by: &str) -> Result<bool, KillSwitchError> {
        let guard = self.inner.guarded.lock();
        let owned = guard.state.is_engaged()
            && guard.local
            && guard.state.engaged_by.as_deref() == Some(engaged_by);
        if !owned {
            return Ok(false);
        }
        self.disengage_locked(guard).map(|_| true)
    }

    fn disengage_locked(&self, mut guard: MutexGuard<'_, Guarded>) -> Result<(), KillSwitchError> {
        let remaining = self.cooldown_remaining_locked(&guard.state);
        if !remaining.is_zero() {
            return Err(KillSwitchError::CooldownNotElapsed { remaining });
        }

        if let Durability::Marker(marker) = &self.inner.durability {
            marker.remove()?;
        }

        let previous = guard.state.reason.take().unwrap_or_default();
        guard.state = KillSwitchState::safe();
        guard.marker_written = false;
        guard.local = false;
        self.inner
            .status
            .store(SwitchStatus::Safe as u8, Ordering::Release);
        drop(guard);

        info!(previous_reason = %previous, "Kill switch disengaged");
        self.record_transition(
            Action::KillSwitchDisengaged,
            format!("cleared after: {}", previous),
        );
        Ok(())
    }

    /// Time left before `disengage` is allowed; zero when SAFE
    pub fn cooldown_remaining(&self) -> Duration {
        let guard = self.inner.guarded.lock();
        self.cooldown_remaining_locked(&guard.state)
    }

    fn cooldown_remaining_locked(&self, state: &KillSwitchState) -> Duration {
        if !state.is_engaged() {
            return Duration::ZERO;
        }
        let engaged_at = state.engaged_at_ns.unwrap_or(0);
        let elapsed = Duration::from_nanos(now_ns().saturating_sub(engaged_at));
        self.inner.cooldown.saturating_sub(elapsed)
    }

    /// Re-read the marker and reconcile: adopt an engagement made elsewhere,
    /// or accept an operator removing a marker this switch wrote.
    pub fn refresh(&self) -> Result<SwitchStatus, KillSwitchError> {
        let Durability::Marker(marker) = &self.inner.durability else {
            return Ok(self.status());
        };

        // Read under the lock so a concurrent engage cannot be undone
        let mut guard = self.inner.guarded.lock();
        let on_disk = marker.read()?;

        match (guard.state.status, on_disk) {
            (SwitchStatus::Safe, Some(record)) => {
                self.inner
                    .status
                    .store(SwitchStatus::Engaged as u8, Ordering::Release);
                guard.state = KillSwitchState::engaged(record.clone());
                guard.marker_written = true;
                guard.local = false;
                drop(guard);

                error!(
                    reason = %record.reason,
                    engaged_by = %record.engaged_by,
                    "KILL SWITCH ENGAGED by external marker"
                );
                self.record_transition(
                    Action::KillSwitchAdopted,
                    format!("{} (by {})", record.reason, record.engaged_by),
                );
                Ok(SwitchStatus::Engaged)
            }
            (SwitchStatus::Engaged, None) if guard.marker_written => {
                let previous = guard.state.reason.take().unwrap_or_default();
                guard.state = KillSwitchState::safe();
                guard.marker_written = false;
                guard.local = false;
                self.inner
                    .status
                    .store(SwitchStatus::Safe as u8, Ordering::Release);
                drop(guard);

                info!(previous_reason = %previous, "Kill switch marker removed externally, disengaged");
                self.record_transition(
                    Action::KillSwitchDisengaged,
                    format!("marker removed externally after: {}", previous),
                );
                Ok(SwitchStatus::Safe)
            }
            (status, _) => Ok(status),
        }
    }

    /// Full snapshot (takes the transition lock)
    pub fn state(&self) -> KillSwitchState {
        self.inner.guarded.lock().state.clone()
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.guarded.lock().state.reason.clone()
    }

    pub fn cooldown(&self) -> Duration {
        self.inner.cooldown
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn marker_path(&self) -> Option<&Path> {
        match &self.inner.durability {
            Durability::Marker(marker) => Some(marker.path()),
            Durability::InMemory => None,
        }
    }

    fn record_transition(&self, action: Action, reason: String) {
        if let Some(forensic) = &self.inner.forensic {
            forensic.record(ForensicRecord::transition(action, reason));
        }
    }
}
