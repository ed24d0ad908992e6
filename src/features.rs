//! Process-wide enhanced-metrics toggle
//!
//! Interconnect-metric support (hop counts, distances, bandwidth, placement
//! scores on hints) is opt-in and controlled by a single process-wide switch,
//! typically wired to the host's feature-gate system at startup. The core
//! only ever reads the switch; each [`Policy::merge`] call snapshots it once
//! so that flipping it mid-process yields one consistent decision per call
//! rather than a half-classic, half-enhanced merge.
//!
//! [`Policy::merge`]: crate::policy::Policy::merge

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard, PoisonError,
};

/// Whether hints carry and mergers consider interconnect metrics
static ENHANCED_HINTS: AtomicBool = AtomicBool::new(false);

/// Serializes toggle changes, see [`with_enhanced_hints()`]
static TOGGLE_LOCK: Mutex<()> = Mutex::new(());

/// Truth that enhanced interconnect metrics are enabled
///
/// Off by default. Merging code snapshots this once per merge; metric
/// accessors on hints consult it on every read.
pub fn enhanced_hints_enabled() -> bool {
    ENHANCED_HINTS.load(Ordering::Relaxed)
}

/// Enables or disables enhanced interconnect metrics process-wide
///
/// This is the wiring hook for the host's feature-gate system and is meant to
/// be called once at startup. Flipping it while admissions are in flight is
/// safe but changes which fields newly constructed hints populate.
pub fn set_enhanced_hints(enabled: bool) {
    ENHANCED_HINTS.store(enabled, Ordering::Relaxed);
}

/// Runs `f` with the toggle forced to `enabled`, restoring the previous state
/// afterwards
///
/// Toggle changes are serialized through a process-wide lock, so concurrent
/// callers (test harnesses in particular, where tests run on multiple
/// threads) do not observe each other's temporary state.
pub fn with_enhanced_hints<R>(enabled: bool, f: impl FnOnce() -> R) -> R {
    let _guard: MutexGuard<'_, ()> = TOGGLE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let previous = enhanced_hints_enabled();
    set_enhanced_hints(enabled);
    let result = f();
    set_enhanced_hints(previous);
    result
}
