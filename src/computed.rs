//! Computed: a cached derived value, lazily re-evaluated on read after any
//! transitive dependency changed. Both a Subscriber (it reads other
//! signals/computeds) and a Dep (effects and other computeds can read it in
//! turn).

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use crate::graph::{DepId, SubId};
use crate::runtime::{with_engine, Driver, RefreshDecision};
use crate::subscriber;
use crate::version::{GlobalVersion, SubscriberFlags};

struct ComputedInner<T> {
    sub: SubId,
    dep: DepId,
    compute: RefCell<Box<dyn FnMut(Option<&T>) -> T>>,
    value: RefCell<Option<T>>,
    /// The engine's `globalVersion` as of this computed's last refresh.
    /// Seeded to `current - 1` at construction (see [`GlobalVersion::pred`])
    /// so the very first refresh can never mistake "nothing has been
    /// computed yet" for "nothing has changed".
    global_version_at_refresh: Cell<GlobalVersion>,
    is_ssr: Cell<bool>,
}

impl<T: PartialEq + 'static> Driver for ComputedInner<T> {
    fn trigger(&self) {
        unreachable!("a Computed is refreshed on demand, never pushed through the effect queue")
    }
    fn refresh(&self) {
        self.refresh_impl();
    }
}

impl<T: PartialEq + 'static> ComputedInner<T> {
    fn refresh_impl(&self) {
        let flags = with_engine(|e| e.flags(self.sub));
        if flags.contains(SubscriberFlags::TRACKING) && !flags.contains(SubscriberFlags::DIRTY) {
            return;
        }

        let is_ssr = self.is_ssr.get();
        let evaluated = flags.contains(SubscriberFlags::EVALUATED);
        let has_deps = with_engine(|e| e.sub_has_deps(self.sub));
        // `is_dirty` may recurse into dependency Computeds' own refresh, so
        // only pay for it when the decision could actually depend on it.
        let currently_dirty = if evaluated && has_deps {
            subscriber::is_dirty(self.sub)
        } else {
            false
        };

        let stored = self.global_version_at_refresh.get();
        let decision =
            with_engine(|e| e.computed_refresh_decision(self.sub, self.dep, stored, is_ssr, currently_dirty));

        match decision {
            RefreshDecision::FreshNoOp => {}
            RefreshDecision::Fresh => {
                self.global_version_at_refresh
                    .set(with_engine(|e| e.computed_global_version_stamp()));
            }
            RefreshDecision::Stale => {
                self.global_version_at_refresh
                    .set(with_engine(|e| e.computed_global_version_stamp()));
                self.evaluate();
            }
        }
    }

    fn evaluate(&self) {
        let prev_active = with_engine(|e| e.computed_begin_eval(self.sub));
        with_engine(|e| e.prepare_deps(self.sub));

        let result = {
            let value_ref = self.value.borrow();
            std::panic::catch_unwind(AssertUnwindSafe(|| {
                (self.compute.borrow_mut())(value_ref.as_ref())
            }))
        };

        with_engine(|e| e.pop_active(prev_active));
        with_engine(|e| e.cleanup_deps(self.sub));
        with_engine(|e| e.remove_flag(self.sub, SubscriberFlags::RUNNING));

        match result {
            Ok(new_value) => {
                let dep_version_zero = with_engine(|e| e.dep_version(self.dep) == 0);
                let changed = match self.value.borrow().as_ref() {
                    Some(old) => reactive_changed(old, &new_value),
                    None => true,
                };
                if dep_version_zero || changed {
                    with_engine(|e| e.computed_mark_evaluated(self.sub, self.dep));
                    *self.value.borrow_mut() = Some(new_value);
                }
            }
            Err(panic) => {
                with_engine(|e| e.computed_bump_version_on_error(self.dep));
                std::panic::resume_unwind(panic);
            }
        }
    }
}

/// The "changed" predicate a refresh uses to decide whether to store the new
/// value: strict inequality, except `NaN` is treated as equal to itself (so a
/// computed producing `NaN` twice in a row is not considered to have
/// changed). Implemented via a runtime type check rather than a trait so
/// ordinary `PartialEq` types need no extra bound. Shared with `Signal::set`/
/// `update` so both reactive sources apply the same notion of "changed".
pub(crate) fn reactive_changed<T: PartialEq + 'static>(old: &T, new: &T) -> bool {
    if let (Some(o), Some(n)) = (
        (old as &dyn Any).downcast_ref::<f64>(),
        (new as &dyn Any).downcast_ref::<f64>(),
    ) {
        return !((o.is_nan() && n.is_nan()) || o == n);
    }
    if let (Some(o), Some(n)) = (
        (old as &dyn Any).downcast_ref::<f32>(),
        (new as &dyn Any).downcast_ref::<f32>(),
    ) {
        return !((o.is_nan() && n.is_nan()) || o == n);
    }
    old != new
}

/// A lazily-evaluated, cached derived value.
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: PartialEq + 'static> Computed<T> {
    /// Creates a lazy computed: the closure is not called until the first
    /// read from a tracking context.
    pub fn new(f: impl FnMut(Option<&T>) -> T + 'static) -> Self {
        Self::build(f, false)
    }

    /// An SSR-mode computed: disables the "no deps changed" fast path so
    /// every read re-evaluates, matching a render-per-request model where
    /// cached state from a previous request must never leak forward.
    pub fn new_ssr(f: impl FnMut(Option<&T>) -> T + 'static) -> Self {
        Self::build(f, true)
    }

    fn build(f: impl FnMut(Option<&T>) -> T + 'static, is_ssr: bool) -> Self {
        let dep = with_engine(|e| e.create_dep());
        let sub = with_engine(|e| e.create_computed_sub(dep));
        let seed = with_engine(|e| e.global_version()).pred();
        let inner = Rc::new(ComputedInner {
            sub,
            dep,
            compute: RefCell::new(Box::new(f)),
            value: RefCell::new(None),
            global_version_at_refresh: Cell::new(seed),
            is_ssr: Cell::new(is_ssr),
        });
        crate::runtime::register_driver(sub, inner.clone() as Rc<dyn Driver>);
        Computed { inner }
    }

    pub(crate) fn dep_id(&self) -> DepId {
        self.inner.dep
    }

    /// Refreshes if needed, subscribes the active tracking context, and
    /// returns a clone of the cached value.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.refresh_impl();
        with_engine(|e| {
            e.dep_track(self.inner.dep);
        });
        self.inner
            .value
            .borrow()
            .clone()
            .expect("computed value is always Some after refresh")
    }

    /// Refreshes if needed, subscribes the active tracking context, then
    /// hands the cached value to `f` by reference (avoids a clone).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.refresh_impl();
        with_engine(|e| {
            e.dep_track(self.inner.dep);
        });
        let value = self.inner.value.borrow();
        f(value.as_ref().expect("computed value is always Some after refresh"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Effect;
    use crate::signal::Signal;
    use std::cell::Cell as StdCell;
    use std::rc::Rc as StdRc;

    #[test]
    fn lazy_computed_never_runs_without_a_reader() {
        let counter = StdRc::new(StdCell::new(0));
        let counter2 = counter.clone();
        let _c: Computed<i32> = Computed::new(move |_| {
            counter2.set(counter2.get() + 1);
            1
        });
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn computed_caches_until_dependency_changes() {
        let count = Signal::new(2);
        let compute_count = StdRc::new(StdCell::new(0));
        let compute_count2 = compute_count.clone();
        let count2 = count.clone();
        let doubled = Computed::new(move |_| {
            compute_count2.set(compute_count2.get() + 1);
            count2.get() * 2
        });

        assert_eq!(doubled.get(), 4);
        assert_eq!(compute_count.get(), 1);

        assert_eq!(doubled.get(), 4);
        assert_eq!(compute_count.get(), 1);

        count.set(3);
        assert_eq!(doubled.get(), 6);
        assert_eq!(compute_count.get(), 2);
    }

    #[test]
    fn global_version_fast_path_skips_recompute_across_many_reads() {
        let calls = StdRc::new(StdCell::new(0));
        let calls2 = calls.clone();
        let c: Computed<i32> = Computed::new(move |_| {
            calls2.set(calls2.get() + 1);
            42
        });
        for _ in 0..1000 {
            assert_eq!(c.get(), 42);
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn diamond_dependency_each_computed_runs_once_per_batch() {
        let a = Signal::new(1);
        let b = Signal::new(2);
        let s_runs = StdRc::new(StdCell::new(0));
        let p_runs = StdRc::new(StdCell::new(0));

        let (s_runs2, a2, b2) = (s_runs.clone(), a.clone(), b.clone());
        let s = Computed::new(move |_| {
            s_runs2.set(s_runs2.get() + 1);
            a2.get() + b2.get()
        });

        let (p_runs2, s2) = (p_runs.clone(), s.clone());
        let p = Computed::new(move |_| {
            p_runs2.set(p_runs2.get() + 1);
            s2.get() * 10
        });

        assert_eq!(p.get(), 30);
        s_runs.set(0);
        p_runs.set(0);

        crate::batch::batch(|| {
            a.set(3);
            b.set(4);
        });

        assert_eq!(p.get(), 70);
        assert_eq!(s_runs.get(), 1);
        assert_eq!(p_runs.get(), 1);
    }

    #[test]
    fn effect_reading_computed_sees_fresh_value_after_batch() {
        let a = Signal::new(1);
        let b = Signal::new(2);
        let (a2, b2) = (a.clone(), b.clone());
        let sum = Computed::new(move |_| a2.get() + b2.get());

        let seen = StdRc::new(StdCell::new(0));
        let seen2 = seen.clone();
        let sum2 = sum.clone();
        let e = Effect::new(move || {
            seen2.set(sum2.get());
        });
        assert_eq!(seen.get(), 3);

        crate::batch::batch(|| {
            a.set(10);
            b.set(20);
        });
        assert_eq!(seen.get(), 30);
        e.stop();
    }

    #[test]
    fn computed_error_bumps_dep_version_and_retries_after_each_dependency_write() {
        // The panic happens *after* reading the dependency, so a Link is
        // established before the unwind; each subsequent write to that
        // dependency re-marks the computed DIRTY via the normal notify path,
        // so it retries on the next read even though it never reaches
        // EVALUATED.
        let trigger = Signal::new(0);
        let attempts = StdRc::new(StdCell::new(0));
        let (attempts2, trigger2) = (attempts.clone(), trigger.clone());
        let c: Computed<i32> = Computed::new(move |_| {
            let _ = trigger2.get();
            attempts2.set(attempts2.get() + 1);
            panic!("computed body always fails");
        });
        for expected in 1..=3 {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| c.get()));
            assert!(result.is_err());
            assert_eq!(attempts.get(), expected);
            trigger.set(expected);
        }
    }
}
