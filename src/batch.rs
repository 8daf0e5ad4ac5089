//! Batch queue: `start_batch`/`end_batch`, the two-phase (computeds-then-effects)
//! drain, and a panic-catching rethrow so the first effect panic during a
//! drain doesn't silently swallow the rest.
//!
//! Phase 1 (computeds) is pure bookkeeping and already happens inside
//! `Engine::drain_computeds_phase` under the engine's own borrow — computeds
//! are lazy and are never evaluated here, only unmarked. Phase 2 (effects)
//! must run outside any engine borrow since running an effect means calling
//! back into user code, so it lives here as a loop over
//! `Engine::dequeue_one_effect`.

use std::panic::AssertUnwindSafe;

use crate::runtime::{drive_trigger, with_engine};

/// Opens a batch transaction. Exposed directly so collaborators can coalesce
/// writes across several signal sets.
pub fn start_batch() {
    with_engine(|e| e.start_batch());
}

/// Closes a batch transaction. Drains queued computeds (cleared, not
/// evaluated) then runs queued effects in FIFO order relative to enqueue,
/// repeating until the queue is empty at the top of the loop since an
/// effect's own run may enqueue more effects.
pub fn end_batch() {
    let needs_drain = with_engine(|e| e.end_batch_decrement());
    if needs_drain {
        drain_effects_loop();
    }
}

/// Runs the queued effects to completion. Called directly by `Signal::set`/
/// `update` when a write's own `trigger` brings `batchDepth` back to zero
/// outside of any explicit `start_batch`/`end_batch` pair (an unbatched
/// write is simply a batch of depth one that closes immediately).
pub(crate) fn drain_effects_loop() {
    let mut first_panic = None;
    loop {
        let Some((sub, active)) = with_engine(|e| e.dequeue_one_effect()) else {
            break;
        };
        if !active {
            continue;
        }
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| drive_trigger(sub)));
        if let Err(p) = result {
            tracing::warn!("effect panicked during batch drain, continuing with remaining effects");
            if first_panic.is_none() {
                first_panic = Some(p);
            }
        }
    }
    if let Some(p) = first_panic {
        std::panic::resume_unwind(p);
    }
}

/// Runs `f` inside a batch transaction: all signal writes made by `f` are
/// coalesced so each dependent effect runs at most once, after `f` returns.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    start_batch();
    let result = std::panic::catch_unwind(AssertUnwindSafe(f));
    end_batch();
    match result {
        Ok(r) => r,
        Err(p) => std::panic::resume_unwind(p),
    }
}

/// RAII alternative to [`batch`] for call sites that can't express the
/// transaction as a single closure.
pub struct BatchGuard {
    ended: bool,
}

impl BatchGuard {
    pub fn new() -> Self {
        start_batch();
        Self { ended: false }
    }

    /// Ends the batch early, before the guard drops.
    pub fn end(mut self) {
        end_batch();
        self.ended = true;
    }
}

impl Default for BatchGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if !self.ended {
            end_batch();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Effect;
    use crate::signal::Signal;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn batch_coalesces_multiple_writes_into_one_run() {
        let a = Signal::new(1);
        let b = Signal::new(2);
        let runs = Rc::new(Cell::new(0));
        let runs2 = runs.clone();
        let (a2, b2) = (a.clone(), b.clone());
        let e = Effect::new(move || {
            runs2.set(runs2.get() + 1);
            let _ = a2.get() + b2.get();
        });
        assert_eq!(runs.get(), 1);
        batch(|| {
            a.set(10);
            b.set(20);
        });
        assert_eq!(runs.get(), 2);
        e.stop();
    }

    #[test]
    fn batch_guard_defers_until_drop() {
        let s = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let runs2 = runs.clone();
        let s2 = s.clone();
        let e = Effect::new(move || {
            runs2.set(runs2.get() + 1);
            s2.get();
        });
        assert_eq!(runs.get(), 1);
        {
            let _guard = BatchGuard::new();
            s.set(1);
            s.set(2);
            assert_eq!(runs.get(), 1);
        }
        assert_eq!(runs.get(), 2);
        e.stop();
    }

    #[test]
    fn nested_batches_flush_once_at_outermost() {
        let s = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let runs2 = runs.clone();
        let s2 = s.clone();
        let e = Effect::new(move || {
            runs2.set(runs2.get() + 1);
            s2.get();
        });
        batch(|| {
            s.set(1);
            batch(|| {
                s.set(2);
            });
            s.set(3);
        });
        assert_eq!(runs.get(), 2);
        e.stop();
    }

    #[test]
    fn one_effects_panic_does_not_prevent_others_from_running() {
        let x = Signal::new(0);
        let second_ran = Rc::new(Cell::new(false));
        let second_ran2 = second_ran.clone();
        let x1 = x.clone();
        let e1 = Effect::new(move || {
            if x1.get() == 1 {
                panic!("boom");
            }
        });
        let x2 = x.clone();
        let e2 = Effect::new(move || {
            x2.get();
            second_ran2.set(true);
        });
        second_ran.set(false);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            x.set(1);
        }));
        assert!(result.is_err());
        assert!(second_ran.get());
        e1.stop();
        e2.stop();
    }
}
