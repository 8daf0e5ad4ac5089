//! `watch`: observe one source and run a callback with `(new, old)` whenever
//! it changes, rather than re-running an arbitrary body the way a plain
//! [`crate::effect::Effect`] does. Built on top of this crate's own `Effect`
//! rather than a second copy of the tracking machinery: a tracked getter, a
//! callback fed `(new, prev)`, and an `immediate` flag.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::effect::{Effect, EffectBuilder};

/// Options for [`watch`], mirroring the subset of an effect's own options
/// that make sense for a single-source observer.
#[derive(Default)]
pub struct WatchOptions {
    /// Run the callback once immediately with `(initial, None)` rather than
    /// waiting for the first change. Default `false`.
    pub immediate: bool,
    /// Stop the watch right after its callback fires for the first time.
    pub once: bool,
    pub allow_recurse: bool,
}

/// A running/stoppable watch handle. Stopping it is identical to stopping
/// the underlying effect.
pub struct Watch {
    effect: Effect,
}

impl Watch {
    pub fn stop(&self) {
        self.effect.stop();
    }
}

/// Observes `source` (any tracked read — a `Signal::get`, `Computed::get`,
/// or a closure reading several) and invokes `on_change(new, old)` whenever
/// a subsequent read differs from the previous one.
///
/// The first run happens eagerly to establish tracking, the way any effect's
/// does: it only seeds `old` and does not call `on_change` unless
/// `options.immediate` is set.
pub fn watch<T, F, C>(mut source: F, on_change: C, options: WatchOptions) -> Watch
where
    T: 'static,
    F: FnMut() -> T + 'static,
    C: Fn(&T, Option<&T>) + 'static,
{
    let previous: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
    let first_run = Rc::new(Cell::new(true));
    // Populated right after `build()` returns. The body only reads it once
    // a non-initial run has fired `on_change`, and the only run that can
    // happen before this is populated is the initial synchronous one inside
    // `build()` itself — handled separately below via `fired_immediately`.
    let self_handle: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));

    let immediate = options.immediate;
    let once = options.once;
    let fired_immediately = Rc::new(Cell::new(false));

    let previous2 = previous.clone();
    let first_run2 = first_run.clone();
    let self_handle2 = self_handle.clone();
    let fired_immediately2 = fired_immediately.clone();

    let body = move || {
        let new_value = source();
        let is_first = first_run2.replace(false);

        let fired = if is_first {
            if immediate {
                on_change(&new_value, None);
            }
            immediate
        } else {
            let old = previous2.borrow();
            on_change(&new_value, old.as_ref());
            true
        };

        *previous2.borrow_mut() = Some(new_value);

        if once && fired {
            if is_first {
                // `self_handle2` isn't populated yet; let the caller stop
                // it right after `build()` returns.
                fired_immediately2.set(true);
            } else if let Some(effect) = *self_handle2.borrow() {
                effect.stop();
            }
        }
    };

    let effect = EffectBuilder::new()
        .allow_recurse(options.allow_recurse)
        .build(body);
    *self_handle.borrow_mut() = Some(effect);

    if fired_immediately.get() {
        effect.stop();
    }

    Watch { effect }
}
