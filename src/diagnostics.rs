//! Dev-mode diagnostics: `on_track`/`on_trigger` payloads and a last-warning
//! sink tests can assert against. The hot path (`Dep::track`, the global
//! version fast path in `refresh_computed`) never logs, even in dev mode;
//! only state transitions (trigger, batch boundaries, dev warnings) do.

use std::cell::RefCell;

use crate::error::ReactiveError;

/// The access kind a track/trigger event is reporting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Get,
    Has,
    Iterate,
    Add,
    Set,
    Delete,
    Clear,
}

/// Debug payload passed to `on_track`/`on_trigger` dev hooks.
#[derive(Debug, Clone)]
pub struct DebugPayload {
    pub access: AccessType,
    pub key: Option<String>,
    pub new_value: Option<String>,
    pub old_value: Option<String>,
}

thread_local! {
    static LAST_WARNING: RefCell<Option<ReactiveError>> = const { RefCell::new(None) };
}

pub(crate) fn record_warning(err: ReactiveError) {
    tracing::warn!(%err, "reactive engine dev warning");
    LAST_WARNING.with(|slot| *slot.borrow_mut() = Some(err));
}

/// Returns (and clears) the last dev-mode warning recorded on this thread.
/// Exists for tests to assert against; not part of the steady-state API.
pub fn last_warning() -> Option<ReactiveError> {
    LAST_WARNING.with(|slot| slot.borrow_mut().take())
}
