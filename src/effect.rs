//! Effect: a side-effectful closure re-run automatically when any tracked
//! dependency changes. Supports an optional scheduler hook, pause/resume,
//! a single cleanup closure, and dev-mode track/trigger hooks.

use std::cell::{Cell, RefCell};
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use slotmap::SecondaryMap;

use crate::diagnostics::DebugPayload;
use crate::error::ReactiveError;
use crate::graph::SubId;
use crate::runtime::{self, with_engine, Driver};
use crate::subscriber;
use crate::version::SubscriberFlags;

thread_local! {
    static EFFECTS: RefCell<SecondaryMap<SubId, Rc<EffectInner>>> = RefCell::new(SecondaryMap::new());
}

struct EffectInner {
    sub: SubId,
    run: RefCell<Box<dyn FnMut()>>,
    scheduler: Option<Box<dyn Fn(Runner)>>,
    cleanup: RefCell<Option<Box<dyn FnOnce()>>>,
    on_stop: RefCell<Option<Box<dyn FnOnce()>>>,
    on_track: Option<Box<dyn Fn(DebugPayload)>>,
    on_trigger: Option<Box<dyn Fn(DebugPayload)>>,
    pending_while_paused: Cell<bool>,
    /// Nesting depth of `run_body` calls for *this* effect — only ever above
    /// zero while an `allow_recurse` effect's own write triggers another run
    /// of itself synchronously, before the outer call returns. Backstop
    /// against an `allow_recurse` effect whose signal never stabilizes
    /// (see `EngineConfig::max_effect_recursion`).
    recursion_depth: Cell<u32>,
}

impl Driver for EffectInner {
    fn trigger(&self) {
        trigger_impl(self.sub);
    }
    fn refresh(&self) {
        unreachable!("effects are never refreshed, only triggered")
    }
}

/// What a scheduler is handed to decide when (or whether) the effect
/// actually re-runs.
#[derive(Clone, Copy)]
pub struct Runner(SubId);

impl Runner {
    /// Runs the effect now iff it's still dirty.
    pub fn run(&self) {
        run_if_dirty(self.0);
    }
}

/// A running/stoppable effect handle. Just a `SubId` wrapper — all state
/// lives behind the thread-local `EFFECTS` map — so it's cheap to copy and
/// hand out more than one handle to the same effect (e.g. `watch` keeping
/// one for its own scheduler to call `stop()` on).
#[derive(Clone, Copy)]
pub struct Effect {
    sub: SubId,
}

impl Effect {
    /// Creates and immediately runs an effect with no scheduler/cleanup
    /// options.
    pub fn new(f: impl FnMut() + 'static) -> Self {
        EffectBuilder::new().build(f)
    }

    pub fn pause(&self) {
        with_engine(|e| e.insert_flag(self.sub, SubscriberFlags::PAUSED));
    }

    pub fn resume(&self) {
        let was_pending = EFFECTS.with(|r| {
            r.borrow()
                .get(self.sub)
                .map(|inner| inner.pending_while_paused.replace(false))
        });
        with_engine(|e| e.remove_flag(self.sub, SubscriberFlags::PAUSED));
        if was_pending == Some(true) {
            trigger_impl(self.sub);
        }
    }

    /// Disconnects all links, runs cleanup and `on_stop`, clears `ACTIVE`.
    /// Idempotent: calling twice leaves state identical to one call.
    pub fn stop(&self) {
        with_engine(|e| e.effect_stop(self.sub));
        if let Some(inner) = EFFECTS.with(|r| r.borrow().get(self.sub).cloned()) {
            if let Some(cleanup) = inner.cleanup.borrow_mut().take() {
                cleanup();
            }
            if let Some(on_stop) = inner.on_stop.borrow_mut().take() {
                on_stop();
            }
        }
    }

    /// Forces a run right now, bypassing tracking if the effect was
    /// already stopped (once stopped, `run()` just executes the body
    /// without tracking).
    pub fn run(&self) {
        if let Some(inner) = EFFECTS.with(|r| r.borrow().get(self.sub).cloned()) {
            run_body(&inner);
        }
    }
}

/// Builder for an effect's construction options.
#[derive(Default)]
pub struct EffectBuilder {
    scheduler: Option<Box<dyn Fn(Runner)>>,
    allow_recurse: bool,
    on_stop: Option<Box<dyn FnOnce()>>,
    on_track: Option<Box<dyn Fn(DebugPayload)>>,
    on_trigger: Option<Box<dyn Fn(DebugPayload)>>,
    run_immediately: bool,
}

impl EffectBuilder {
    pub fn new() -> Self {
        Self {
            run_immediately: true,
            ..Default::default()
        }
    }

    pub fn scheduler(mut self, f: impl Fn(Runner) + 'static) -> Self {
        self.scheduler = Some(Box::new(f));
        self
    }

    pub fn allow_recurse(mut self, v: bool) -> Self {
        self.allow_recurse = v;
        self
    }

    pub fn on_stop(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_stop = Some(Box::new(f));
        self
    }

    pub fn on_track(mut self, f: impl Fn(DebugPayload) + 'static) -> Self {
        self.on_track = Some(Box::new(f));
        self
    }

    pub fn on_trigger(mut self, f: impl Fn(DebugPayload) + 'static) -> Self {
        self.on_trigger = Some(Box::new(f));
        self
    }

    pub(crate) fn run_immediately(mut self, v: bool) -> Self {
        self.run_immediately = v;
        self
    }

    pub fn build(self, f: impl FnMut() + 'static) -> Effect {
        let sub = with_engine(|e| e.create_effect_sub());
        if self.allow_recurse {
            with_engine(|e| e.insert_flag(sub, SubscriberFlags::ALLOW_RECURSE));
        }
        let inner = Rc::new(EffectInner {
            sub,
            run: RefCell::new(Box::new(f)),
            scheduler: self.scheduler,
            cleanup: RefCell::new(None),
            on_stop: RefCell::new(self.on_stop),
            on_track: self.on_track,
            on_trigger: self.on_trigger,
            pending_while_paused: Cell::new(false),
            recursion_depth: Cell::new(0),
        });
        EFFECTS.with(|r| r.borrow_mut().insert(sub, Rc::clone(&inner)));
        runtime::register_driver(sub, inner.clone() as Rc<dyn Driver>);
        if self.run_immediately {
            run_body(&inner);
        }
        Effect { sub }
    }
}

fn trigger_impl(sub: SubId) {
    let Some(inner) = EFFECTS.with(|r| r.borrow().get(sub).cloned()) else {
        return;
    };
    let paused = with_engine(|e| e.flags(sub).contains(SubscriberFlags::PAUSED));
    if paused {
        inner.pending_while_paused.set(true);
        return;
    }
    if let Some(scheduler) = &inner.scheduler {
        scheduler(Runner(sub));
    } else {
        run_if_dirty(sub);
    }
}

struct RecursionGuard<'a>(&'a EffectInner);

impl Drop for RecursionGuard<'_> {
    fn drop(&mut self) {
        self.0.recursion_depth.set(self.0.recursion_depth.get() - 1);
    }
}

fn run_if_dirty(sub: SubId) {
    if subscriber::is_dirty(sub) {
        if let Some(inner) = EFFECTS.with(|r| r.borrow().get(sub).cloned()) {
            run_body(&inner);
        }
    }
}

fn run_body(inner: &Rc<EffectInner>) {
    let active = with_engine(|e| e.flags(inner.sub).contains(SubscriberFlags::ACTIVE));
    if !active {
        (inner.run.borrow_mut())();
        return;
    }

    let max_depth = with_engine(|e| e.config.max_effect_recursion);
    let depth = inner.recursion_depth.get() + 1;
    if depth > max_depth {
        crate::diagnostics::record_warning(ReactiveError::InternalInvariantViolation {
            detail: format!("allow_recurse effect exceeded max_effect_recursion ({max_depth})"),
        });
        panic!("allow_recurse effect exceeded max_effect_recursion ({max_depth}); its signal never stabilized");
    }
    inner.recursion_depth.set(depth);
    let _guard = RecursionGuard(inner);

    with_engine(|e| e.effect_set_running(inner.sub, true));

    if let Some(cleanup) = inner.cleanup.borrow_mut().take() {
        let prev = with_engine(|e| e.push_active_none());
        let result = std::panic::catch_unwind(AssertUnwindSafe(cleanup));
        with_engine(|e| e.pop_active(prev));
        if let Err(p) = result {
            with_engine(|e| e.effect_set_running(inner.sub, false));
            std::panic::resume_unwind(p);
        }
    }

    with_engine(|e| e.prepare_deps(inner.sub));
    let prev = with_engine(|e| e.push_active(inner.sub, true));
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| (inner.run.borrow_mut())()));
    with_engine(|e| e.pop_active(prev));
    with_engine(|e| e.cleanup_deps(inner.sub));
    with_engine(|e| e.effect_set_running(inner.sub, false));

    if let Err(p) = result {
        std::panic::resume_unwind(p);
    }
}

/// Invokes `sub`'s `on_track` hook, if it has one and dev mode is on.
/// Called by the property-proxy bridge immediately after a successful
/// `Dep::track` for the currently active subscriber.
pub(crate) fn dispatch_on_track(sub: SubId, payload: DebugPayload) {
    if !with_engine(|e| e.config.dev_mode) {
        return;
    }
    if let Some(inner) = EFFECTS.with(|r| r.borrow().get(sub).cloned()) {
        if let Some(hook) = &inner.on_track {
            hook(payload);
        }
    }
}

/// Invokes `sub`'s `on_trigger` hook, if it has one and dev mode is on.
/// Called by the property-proxy bridge for each subscriber currently
/// attached to a Dep right before that Dep's real `trigger()` call.
pub(crate) fn dispatch_on_trigger(sub: SubId, payload: DebugPayload) {
    if !with_engine(|e| e.config.dev_mode) {
        return;
    }
    if let Some(inner) = EFFECTS.with(|r| r.borrow().get(sub).cloned()) {
        if let Some(hook) = &inner.on_trigger {
            hook(payload);
        }
    }
}

/// Registers a cleanup closure on the currently-running effect, overwriting
/// any closure registered earlier this run: only one cleanup closure is
/// stored per effect, never a list. Warns (dev-mode, non-fatal) if no effect
/// is running.
pub fn on_effect_cleanup(f: impl FnOnce() + 'static) {
    let active = with_engine(|e| e.active_subscriber());
    let Some(sub) = active else {
        if with_engine(|e| e.config.dev_mode) {
            crate::diagnostics::record_warning(ReactiveError::MissingActiveEffectCleanup);
        }
        return;
    };
    if let Some(inner) = EFFECTS.with(|r| r.borrow().get(sub).cloned()) {
        *inner.cleanup.borrow_mut() = Some(Box::new(f));
    }
}
