//! Signal: a writable cell of type `T`, owning one `Dep`. The raw value
//! lives in an `Rc`-shared inner with its own `RefCell`, kept entirely
//! separate from the engine's own `RefCell` so a signal read or write from
//! inside a running effect never tries to re-borrow the engine while it's
//! already borrowed (see `graph.rs`'s module doc).

use std::cell::RefCell;
use std::rc::Rc;

use crate::computed::reactive_changed;
use crate::diagnostics::record_warning;
use crate::error::ReactiveError;
use crate::runtime::with_engine;

struct SignalInner<T> {
    value: RefCell<T>,
    dep: crate::graph::DepId,
    read_only: bool,
}

/// A writable reactive cell.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Signal<T> {
    pub fn new(initial: T) -> Self {
        let dep = with_engine(|e| e.create_dep());
        Self {
            inner: Rc::new(SignalInner {
                value: RefCell::new(initial),
                dep,
                read_only: false,
            }),
        }
    }

    /// A signal that reports a dev-mode warning (and is a no-op) on every
    /// write attempt, for collaborators that want to expose a read-only
    /// view.
    pub fn new_read_only(initial: T) -> Self {
        let dep = with_engine(|e| e.create_dep());
        Self {
            inner: Rc::new(SignalInner {
                value: RefCell::new(initial),
                dep,
                read_only: true,
            }),
        }
    }

    pub(crate) fn dep_id(&self) -> crate::graph::DepId {
        self.inner.dep
    }

    /// Reads the value, subscribing the active tracking context.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        with_engine(|e| {
            e.dep_track(self.inner.dep);
        });
        self.inner.value.borrow().clone()
    }

    /// Reads the value via a closure, avoiding a clone.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        with_engine(|e| {
            e.dep_track(self.inner.dep);
        });
        f(&self.inner.value.borrow())
    }

    /// Writes a new value. A no-op (per the changed predicate) triggers no
    /// notification.
    pub fn set(&self, new_value: T)
    where
        T: PartialEq + 'static,
    {
        if self.inner.read_only {
            if with_engine(|e| e.config.dev_mode) {
                record_warning(ReactiveError::ReadOnlyWrite);
            }
            return;
        }
        let changed = {
            let current = self.inner.value.borrow();
            reactive_changed(&*current, &new_value)
        };
        if !changed {
            return;
        }
        *self.inner.value.borrow_mut() = new_value;
        self.notify_dev_hooks();
        let needs_drain = with_engine(|e| e.dep_trigger(self.inner.dep));
        if needs_drain {
            crate::batch::drain_effects_loop();
        }
    }

    /// Reads, mutates in place via `f`, and triggers unconditionally (the
    /// caller is assumed to have actually changed something — there is no
    /// value to compare against beforehand).
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        if self.inner.read_only {
            if with_engine(|e| e.config.dev_mode) {
                record_warning(ReactiveError::ReadOnlyWrite);
            }
            return;
        }
        f(&mut self.inner.value.borrow_mut());
        self.notify_dev_hooks();
        let needs_drain = with_engine(|e| e.dep_trigger(self.inner.dep));
        if needs_drain {
            crate::batch::drain_effects_loop();
        }
    }

    fn notify_dev_hooks(&self) {
        if with_engine(|e| e.config.dev_mode) {
            tracing::trace!(dep = ?self.inner.dep, "signal trigger");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_basic() {
        let s = Signal::new(1);
        assert_eq!(s.get(), 1);
        s.set(2);
        assert_eq!(s.get(), 2);
    }

    #[test]
    fn unchanged_write_does_not_bump_version() {
        let s = Signal::new(1);
        let before = with_engine(|e| e.dep_version(s.dep_id()));
        s.set(1);
        let after = with_engine(|e| e.dep_version(s.dep_id()));
        assert_eq!(before, after);
    }

    #[test]
    fn nan_write_twice_does_not_renotify() {
        let s = Signal::new(f64::NAN);
        let before = with_engine(|e| e.dep_version(s.dep_id()));
        s.set(f64::NAN);
        let after = with_engine(|e| e.dep_version(s.dep_id()));
        assert_eq!(before, after);
    }

    #[test]
    fn read_only_write_is_a_warned_no_op() {
        let s = Signal::new_read_only(1);
        s.set(2);
        assert_eq!(s.get(), 1);
        assert_eq!(
            crate::diagnostics::last_warning(),
            Some(crate::error::ReactiveError::ReadOnlyWrite)
        );
    }
}
