//! The engine: a `thread_local!` singleton holding the arenas plus the
//! global mutable state (`active_sub`, `should_track`, `track_stack`,
//! `batch_depth`, the two batch queues, `global_version`).
//!
//! The `Engine` itself never holds a user closure — see `graph.rs`'s module
//! doc for why. Effects and Computeds instead register a [`Driver`] trait
//! object in [`DRIVERS`], a thread-local map kept separate from the engine's
//! own `RefCell` so that calling into user code never requires holding the
//! engine borrowed.

use std::cell::RefCell;
use std::rc::Rc;

use slotmap::{SecondaryMap, SlotMap};

use crate::config::EngineConfig;
use crate::graph::{DepData, DepId, LinkData, LinkId, SubData, SubId};
use crate::version::{GlobalVersion, SubscriberFlags};

/// Anything the engine needs to call back into user code for, without
/// owning that code itself. Effects implement `trigger`; Computeds
/// implement `refresh`. The unused half of each impl is never reached
/// because the engine only ever calls the half matching the Subscriber's
/// actual kind.
pub(crate) trait Driver {
    fn trigger(&self);
    fn refresh(&self);
}

thread_local! {
    static ENGINE: RefCell<Engine> = RefCell::new(Engine::new(EngineConfig::default()));
    static DRIVERS: RefCell<SecondaryMap<SubId, Rc<dyn Driver>>> = RefCell::new(SecondaryMap::new());
}

/// Result of the engine-owned portion of a computed refresh. `Stale` means
/// the caller must actually invoke the compute closure.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RefreshDecision {
    /// Step 1: still `TRACKING` and not `DIRTY` — nothing else touched.
    FreshNoOp,
    /// Step 3 or step 5 concluded fresh. The caller must still update its
    /// stored `globalVersion` stamp to the engine's current one (step 4
    /// always runs before step 5's check, whichever way step 5 concludes).
    Fresh,
    /// Step 6 must run: invoke the compute closure.
    Stale,
}

pub(crate) struct Engine {
    links: SlotMap<LinkId, LinkData>,
    deps: SlotMap<DepId, DepData>,
    subs: SlotMap<SubId, SubData>,
    active_sub: Option<SubId>,
    should_track: bool,
    track_stack: Vec<bool>,
    batch_depth: u32,
    batched_effects: Option<SubId>,
    batched_computeds: Option<SubId>,
    global_version: GlobalVersion,
    pub config: EngineConfig,
}

/// Runs `f` with exclusive access to the current thread's engine. Kept to a
/// narrow scope at every call site — never held across a call into user
/// code (an effect body, a computed body, a scheduler, a cleanup).
pub(crate) fn with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> R {
    ENGINE.with(|cell| f(&mut cell.borrow_mut()))
}

/// Replaces this thread's engine configuration. Intended to be called once, early (e.g. at process
/// or test-harness startup) — it does not reset any existing graph state,
/// only the tunables future operations consult.
pub fn configure(config: EngineConfig) {
    ENGINE.with(|cell| cell.borrow_mut().config = config);
}

pub(crate) fn register_driver(id: SubId, driver: Rc<dyn Driver>) {
    DRIVERS.with(|d| d.borrow_mut().insert(id, driver));
}

pub(crate) fn unregister_driver(id: SubId) {
    DRIVERS.with(|d| d.borrow_mut().remove(id));
}

fn driver_for(id: SubId) -> Option<Rc<dyn Driver>> {
    DRIVERS.with(|d| d.borrow().get(id).cloned())
}

impl Engine {
    fn new(config: EngineConfig) -> Self {
        Self {
            links: SlotMap::with_key(),
            deps: SlotMap::with_key(),
            subs: SlotMap::with_key(),
            active_sub: None,
            should_track: true,
            track_stack: Vec::new(),
            batch_depth: 0,
            batched_effects: None,
            batched_computeds: None,
            global_version: GlobalVersion::default(),
            config,
        }
    }

    // ---- construction ----

    pub fn create_dep(&mut self) -> DepId {
        self.deps.insert(DepData::new())
    }

    pub fn create_effect_sub(&mut self) -> SubId {
        self.subs.insert(SubData::new_effect())
    }

    /// Creates the Subscriber half of a Computed, wiring it to the Dep the
    /// Computed owns: a Computed is both a Subscriber and a Dep.
    pub fn create_computed_sub(&mut self, dep: DepId) -> SubId {
        let sub = self.subs.insert(SubData::new_computed(dep));
        self.deps[dep].owner_computed = Some(sub);
        sub
    }

    /// Marks `dep` as bridge-owned: on reaching zero subscribers
    /// it's eligible for removal from the bridge's `KeyedDepMap` rather than
    /// being mistaken for an abandoned Signal/Computed Dep.
    pub fn mark_dep_keyed(&mut self, dep: DepId) {
        self.deps[dep].keyed = true;
    }

    pub fn global_version(&self) -> GlobalVersion {
        self.global_version
    }

    pub fn dep_version(&self, dep: DepId) -> u64 {
        self.deps[dep].version
    }

    pub fn dep_sub_count(&self, dep: DepId) -> usize {
        self.deps[dep].sub_count(&self.links)
    }

    pub fn dep_owner_computed(&self, dep: DepId) -> Option<SubId> {
        self.deps[dep].owner_computed
    }

    pub fn sub_has_deps(&self, sub: SubId) -> bool {
        self.subs[sub].deps_head.is_some()
    }

    /// Snapshots `dep`'s current subscriber set, head to tail. Used by the
    /// property-proxy bridge to dispatch `onTrigger` dev hooks immediately
    /// before the real `trigger()` call, since by the time queued effects
    /// actually run the graph may have been reshaped by earlier ones.
    pub fn dep_subscribers(&self, dep: DepId) -> Vec<SubId> {
        let mut v = Vec::new();
        let mut cur = self.deps[dep].subs_head;
        while let Some(link) = cur {
            v.push(self.links[link].sub);
            cur = self.links[link].next_sub;
        }
        v
    }

    /// Collects `(link, dep)` pairs for `sub`'s current dependency list, in
    /// head-to-tail order. Used by `subscriber::is_dirty`, which needs to
    /// walk the list across calls that drop and re-acquire the engine
    /// borrow (to call out to a dependency Computed's own refresh).
    pub fn dep_links_of(&self, sub: SubId) -> Vec<(LinkId, DepId)> {
        let mut v = Vec::new();
        let mut cur = self.subs[sub].deps_head;
        while let Some(link) = cur {
            v.push((link, self.links[link].dep));
            cur = self.links[link].next_dep;
        }
        v
    }

    pub fn link_is_stale(&self, link: LinkId, dep: DepId) -> bool {
        self.links[link].version != self.deps[dep].version as i64
    }

    pub fn flags(&self, sub: SubId) -> SubscriberFlags {
        self.subs[sub].flags
    }

    pub fn set_flags(&mut self, sub: SubId, flags: SubscriberFlags) {
        self.subs[sub].flags = flags;
    }

    pub fn insert_flag(&mut self, sub: SubId, flag: SubscriberFlags) {
        self.subs[sub].flags.insert(flag);
    }

    pub fn remove_flag(&mut self, sub: SubId, flag: SubscriberFlags) {
        self.subs[sub].flags.remove(flag);
    }

    // ---- tracking control ----

    pub fn pause_tracking(&mut self) {
        self.track_stack.push(self.should_track);
        self.should_track = false;
    }

    pub fn enable_tracking(&mut self) {
        self.track_stack.push(self.should_track);
        self.should_track = true;
    }

    pub fn reset_tracking(&mut self) {
        self.should_track = self.track_stack.pop().unwrap_or(true);
    }

    /// Pushes `sub` as the active subscriber for the duration of its run,
    /// returning the previous `(active_sub, should_track)` to restore with
    /// [`Engine::pop_active`].
    pub fn push_active(&mut self, sub: SubId, tracking: bool) -> (Option<SubId>, bool) {
        let prev = (self.active_sub, self.should_track);
        self.active_sub = Some(sub);
        self.should_track = tracking;
        prev
    }

    pub fn pop_active(&mut self, prev: (Option<SubId>, bool)) {
        self.active_sub = prev.0;
        self.should_track = prev.1;
    }

    /// Pushes an empty tracking frame (no active subscriber, tracking
    /// disabled) — used around cleanup closures so they can read signals
    /// without accidentally subscribing anything.
    pub fn push_active_none(&mut self) -> (Option<SubId>, bool) {
        let prev = (self.active_sub, self.should_track);
        self.active_sub = None;
        self.should_track = false;
        prev
    }

    pub fn active_subscriber(&self) -> Option<SubId> {
        self.active_sub
    }

    // ---- Dep: track / trigger / notify ----

    /// `track()`. Returns `Some(link)` if a Link now exists between `dep`
    /// and the active subscriber, `None` if tracking didn't happen.
    pub fn dep_track(&mut self, dep: DepId) -> Option<LinkId> {
        let Some(active) = self.active_sub else {
            return None;
        };
        if !self.should_track {
            return None;
        }
        if self.deps[dep].owner_computed == Some(active) {
            // A Computed never depends on itself.
            return None;
        }

        let existing = self.deps[dep].active_link.filter(|l| self.links[*l].sub == active);

        if let Some(link_id) = existing {
            if self.links[link_id].version == self.deps[dep].version as i64 {
                // Already (re)tracked earlier in this very run.
                return Some(link_id);
            }
            self.links[link_id].version = self.deps[dep].version as i64;
            self.move_dep_link_to_tail(active, link_id);
            return Some(link_id);
        }

        Some(self.create_link(dep, active))
    }

    fn create_link(&mut self, dep: DepId, sub: SubId) -> LinkId {
        let prev_active_link = self.deps[dep].active_link;
        let link = self.links.insert(LinkData {
            dep,
            sub,
            version: self.deps[dep].version as i64,
            prev_sub: None,
            next_sub: None,
            prev_dep: None,
            next_dep: None,
            prev_active_link,
        });

        // append to the tail of the Dep's subscriber list
        let dep_tail = self.deps[dep].subs_tail;
        self.links[link].prev_sub = dep_tail;
        if let Some(t) = dep_tail {
            self.links[t].next_sub = Some(link);
        } else {
            self.deps[dep].subs_head = Some(link);
        }
        self.deps[dep].subs_tail = Some(link);

        // append to the tail of the Sub's dep list
        let sub_tail = self.subs[sub].deps_tail;
        self.links[link].prev_dep = sub_tail;
        if let Some(t) = sub_tail {
            self.links[t].next_dep = Some(link);
        } else {
            self.subs[sub].deps_head = Some(link);
        }
        self.subs[sub].deps_tail = Some(link);

        self.deps[dep].active_link = Some(link);
        link
    }

    /// LRU reorder: splice `link` out of `sub`'s dep list and re-append it
    /// at the tail, unless it's already there.
    fn move_dep_link_to_tail(&mut self, sub: SubId, link: LinkId) {
        if self.subs[sub].deps_tail == Some(link) {
            return;
        }
        let prev = self.links[link].prev_dep;
        let next = self.links[link].next_dep;
        match prev {
            Some(p) => self.links[p].next_dep = next,
            None => self.subs[sub].deps_head = next,
        }
        match next {
            Some(n) => self.links[n].prev_dep = prev,
            None => unreachable!("link was not the tail but has no next_dep"),
        }
        let old_tail = self.subs[sub].deps_tail;
        self.links[link].prev_dep = old_tail;
        self.links[link].next_dep = None;
        if let Some(t) = old_tail {
            self.links[t].next_dep = Some(link);
        }
        self.subs[sub].deps_tail = Some(link);
    }

    /// `trigger()`. Bumps the Dep's version and the global version, then
    /// notifies subscribers. Returns whether the effect batch queue needs
    /// draining *now* (batch depth has returned to zero).
    pub fn dep_trigger(&mut self, dep: DepId) -> bool {
        self.deps[dep].version += 1;
        self.global_version.bump();
        self.dep_notify(dep)
    }

    /// `notify()`. All of this is pure bookkeeping — enqueuing Subscribers
    /// into the batch queues — never invoking user code, so it's always
    /// safe to run under the engine's own borrow. Returns whether the
    /// effect queue now needs draining (batch depth fell back to zero).
    fn dep_notify(&mut self, dep: DepId) -> bool {
        self.batch_depth += 1;

        let mut cur = self.deps[dep].subs_tail;
        while let Some(link) = cur {
            let sub = self.links[link].sub;
            self.sub_notify(sub);
            cur = self.links[link].prev_sub;
        }

        self.batch_depth -= 1;
        if self.batch_depth == 0 {
            self.drain_computeds_phase();
            true
        } else {
            false
        }
    }

    fn sub_notify(&mut self, sub: SubId) {
        if let Some(dep) = self.subs[sub].computed_dep {
            if self.computed_notify(sub) {
                self.dep_notify(dep);
            }
        } else {
            self.effect_notify(sub);
        }
    }

    fn effect_notify(&mut self, sub: SubId) {
        let flags = self.subs[sub].flags;
        if flags.contains(SubscriberFlags::RUNNING) && !flags.contains(SubscriberFlags::ALLOW_RECURSE) {
            return;
        }
        if !flags.contains(SubscriberFlags::NOTIFIED) {
            self.enqueue(sub, false);
        }
    }

    /// Returns true if propagation should continue transitively (the
    /// Computed itself has subscribers that must now hear about this).
    fn computed_notify(&mut self, sub: SubId) -> bool {
        self.subs[sub].flags.insert(SubscriberFlags::DIRTY);
        let flags = self.subs[sub].flags;
        if !flags.contains(SubscriberFlags::NOTIFIED) && self.active_sub != Some(sub) {
            self.enqueue(sub, true);
            true
        } else {
            false
        }
    }

    fn enqueue(&mut self, sub: SubId, is_computed: bool) {
        self.subs[sub].flags.insert(SubscriberFlags::NOTIFIED);
        if is_computed {
            self.subs[sub].next = self.batched_computeds;
            self.batched_computeds = Some(sub);
        } else {
            self.subs[sub].next = self.batched_effects;
            self.batched_effects = Some(sub);
        }
    }

    // ---- batch queue ----

    /// Backstop against runaway `start_batch` nesting (`EngineConfig::
    /// max_batch_depth`): warns in dev mode past three quarters of the
    /// limit, panics at the limit itself rather than growing the depth
    /// counter (and any recursive call stack behind it) without bound.
    pub fn start_batch(&mut self) {
        self.batch_depth += 1;
        let max = self.config.max_batch_depth;
        if self.batch_depth >= max {
            crate::diagnostics::record_warning(crate::error::ReactiveError::InternalInvariantViolation {
                detail: format!("batch nesting depth exceeded max_batch_depth ({max})"),
            });
            panic!("batch nesting depth exceeded max_batch_depth ({max}); likely a recursive batching bug");
        }
        if self.config.dev_mode && self.batch_depth * 4 >= max * 3 {
            tracing::warn!(depth = self.batch_depth, max, "batch nesting approaching max_batch_depth");
        }
    }

    /// Decrements the depth counter; if it reaches zero, runs phase 1
    /// (computeds, pure data) and reports whether phase 2 (effects, which
    /// must run outside any engine borrow) is now needed.
    pub fn end_batch_decrement(&mut self) -> bool {
        self.batch_depth -= 1;
        if self.batch_depth == 0 {
            self.drain_computeds_phase();
            true
        } else {
            false
        }
    }

    fn drain_computeds_phase(&mut self) {
        let mut cur = self.batched_computeds.take();
        while let Some(id) = cur {
            let next = self.subs[id].next.take();
            self.subs[id].flags.remove(SubscriberFlags::NOTIFIED);
            cur = next;
        }
    }

    /// Pops one due effect off the queue, clearing its NOTIFIED flag
    /// regardless of whether it's still ACTIVE (resolved open
    /// question: the ACTIVE check happens after NOTIFIED is cleared, so a
    /// stopped-while-queued effect is silently skipped rather than run).
    pub fn dequeue_one_effect(&mut self) -> Option<(SubId, bool)> {
        let id = self.batched_effects.take()?;
        let next = self.subs[id].next.take();
        self.batched_effects = next;
        self.subs[id].flags.remove(SubscriberFlags::NOTIFIED);
        let active = self.subs[id].flags.contains(SubscriberFlags::ACTIVE);
        Some((id, active))
    }

    // ---- Subscriber: prepareDeps / cleanupDeps ----

    pub fn prepare_deps(&mut self, sub: SubId) {
        let mut cur = self.subs[sub].deps_head;
        while let Some(link) = cur {
            self.links[link].version = -1;
            let dep = self.links[link].dep;
            let prev_active = self.deps[dep].active_link;
            self.links[link].prev_active_link = prev_active;
            self.deps[dep].active_link = Some(link);
            cur = self.links[link].next_dep;
        }
    }

    pub fn cleanup_deps(&mut self, sub: SubId) {
        let mut cur = self.subs[sub].deps_tail;
        // Walked backward from the tail, so this fills up newest-survivor-first.
        let mut survivors_newest_first = Vec::new();
        while let Some(link) = cur {
            let prev = self.links[link].prev_dep;
            let dep = self.links[link].dep;
            if self.links[link].version == -1 {
                self.unlink_from_dep(link);
            } else {
                self.deps[dep].active_link = self.links[link].prev_active_link;
                survivors_newest_first.push(link);
            }
            cur = prev;
        }

        let mut forward = survivors_newest_first;
        forward.reverse(); // oldest-tracked-this-run first, most recent last

        for w in forward.windows(2) {
            let (a, b) = (w[0], w[1]);
            self.links[a].next_dep = Some(b);
            self.links[b].prev_dep = Some(a);
        }
        if let Some(&first) = forward.first() {
            self.links[first].prev_dep = None;
        }
        if let Some(&last) = forward.last() {
            self.links[last].next_dep = None;
        }
        self.subs[sub].deps_head = forward.first().copied();
        self.subs[sub].deps_tail = forward.last().copied();
    }

    /// Removes `link` from its Dep's subscriber list (not from any Sub's
    /// dep list — caller is already walking that list and fixes it up
    /// separately). Soft-unsubscribes an owning Computed with no remaining
    /// subscribers (a "soft unsubscribe" — it stays attached for semantics
    /// but becomes eligible for collection).
    fn unlink_from_dep(&mut self, link: LinkId) {
        let dep = self.links[link].dep;
        let prev_sub = self.links[link].prev_sub;
        let next_sub = self.links[link].next_sub;
        match prev_sub {
            Some(p) => self.links[p].next_sub = next_sub,
            None => self.deps[dep].subs_head = next_sub,
        }
        match next_sub {
            Some(n) => self.links[n].prev_sub = prev_sub,
            None => self.deps[dep].subs_tail = prev_sub,
        }
        if self.deps[dep].active_link == Some(link) {
            self.deps[dep].active_link = None;
        }
        self.links.remove(link);

        if self.deps[dep].sub_count(&self.links) == 0 {
            if self.deps[dep].keyed {
                // Bridge-owned keyed Deps remove themselves from their map;
                // the bridge module observes zero-subs via `dep_sub_count`.
            }
            if let Some(owner) = self.deps[dep].owner_computed {
                self.soft_unsubscribe_computed(owner);
            }
        }
    }

    /// Detaches a Computed from its own dependencies without decrementing
    /// their subscriber counts from this call's perspective a second time —
    /// it just removes the Computed's links the same way `cleanup_deps`
    /// would, letting the Computed itself become collectible while staying
    /// attached to whichever Dep structure still references it.
    fn soft_unsubscribe_computed(&mut self, computed_sub: SubId) {
        let mut cur = self.subs[computed_sub].deps_head;
        while let Some(link) = cur {
            let next = self.links[link].next_dep;
            self.unlink_from_dep(link);
            cur = next;
        }
        self.subs[computed_sub].deps_head = None;
        self.subs[computed_sub].deps_tail = None;
    }

    // ---- Computed refresh bookkeeping ----

    /// Steps 1-5 of `refreshComputed`. `has_deps`/`currently_dirty` are
    /// supplied by the caller (the typed `Computed<T>`) since whether it's
    /// ever been evaluated and whether it has zero deps are facts the
    /// engine's flags/graph already track, but step 5's `isDirty` check may
    /// need to recurse into other Computeds the engine can't call directly
    /// (see `subscriber::is_dirty`), so the caller resolves that part first.
    pub fn computed_refresh_decision(
        &mut self,
        sub: SubId,
        dep: DepId,
        global_version_at_refresh: GlobalVersion,
        is_ssr: bool,
        currently_dirty: bool,
    ) -> RefreshDecision {
        let flags = self.subs[sub].flags;
        if flags.contains(SubscriberFlags::TRACKING) && !flags.contains(SubscriberFlags::DIRTY) {
            return RefreshDecision::FreshNoOp;
        }
        self.subs[sub].flags.remove(SubscriberFlags::DIRTY);

        if global_version_at_refresh == self.global_version {
            return RefreshDecision::Fresh;
        }

        let has_deps = self.subs[sub].deps_head.is_some();
        if !is_ssr
            && flags.contains(SubscriberFlags::EVALUATED)
            && (!has_deps || !currently_dirty)
        {
            let _ = dep;
            return RefreshDecision::Fresh;
        }

        RefreshDecision::Stale
    }

    pub fn computed_begin_eval(&mut self, sub: SubId) -> (Option<SubId>, bool) {
        self.subs[sub].flags.insert(SubscriberFlags::RUNNING);
        self.push_active(sub, true)
    }

    pub fn computed_end_eval(&mut self, sub: SubId, prev: (Option<SubId>, bool)) {
        self.pop_active(prev);
        self.subs[sub].flags.remove(SubscriberFlags::RUNNING);
    }

    pub fn computed_mark_evaluated(&mut self, sub: SubId, dep: DepId) {
        self.subs[sub].flags.insert(SubscriberFlags::EVALUATED);
        self.deps[dep].version += 1;
    }

    pub fn computed_bump_version_on_error(&mut self, dep: DepId) {
        self.deps[dep].version += 1;
    }

    pub fn computed_global_version_stamp(&self) -> GlobalVersion {
        self.global_version
    }

    // ---- Effect lifecycle ----

    pub fn effect_set_running(&mut self, sub: SubId, running: bool) {
        if running {
            self.subs[sub].flags.insert(SubscriberFlags::RUNNING);
        } else {
            self.subs[sub].flags.remove(SubscriberFlags::RUNNING);
        }
    }

    pub fn effect_stop(&mut self, sub: SubId) {
        let mut cur = self.subs[sub].deps_head;
        while let Some(link) = cur {
            let next = self.links[link].next_dep;
            self.unlink_from_dep(link);
            cur = next;
        }
        self.subs[sub].deps_head = None;
        self.subs[sub].deps_tail = None;
        self.subs[sub].flags.remove(SubscriberFlags::ACTIVE);
    }
}

/// Invokes `driver.trigger()`/`.refresh()` for `sub` if one is registered.
/// Used by `subscriber::is_dirty` to force a dependency Computed to refresh
/// before comparing versions, and by the batch drain loop
/// (`batch.rs`) to actually run due effects.
pub(crate) fn drive_refresh(sub: SubId) {
    if let Some(d) = driver_for(sub) {
        d.refresh();
    }
}

pub(crate) fn drive_trigger(sub: SubId) {
    if let Some(d) = driver_for(sub) {
        d.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_dep_and_sub() {
        with_engine(|e| {
            let dep = e.create_dep();
            let sub = e.create_effect_sub();
            assert_eq!(e.dep_version(dep), 0);
            assert!(e.flags(sub).contains(SubscriberFlags::ACTIVE));
        });
    }

    #[test]
    fn track_creates_link_and_trigger_notifies() {
        with_engine(|e| {
            let dep = e.create_dep();
            let sub = e.create_effect_sub();
            let prev = e.push_active(sub, true);
            e.dep_track(dep);
            e.pop_active(prev);
            assert_eq!(e.dep_sub_count(dep), 1);
            e.dep_trigger(dep);
            assert_eq!(e.dep_version(dep), 1);
        });
    }

    #[test]
    fn pause_tracking_round_trip_adds_no_link() {
        with_engine(|e| {
            let dep = e.create_dep();
            let sub = e.create_effect_sub();
            let prev = e.push_active(sub, true);
            e.pause_tracking();
            e.dep_track(dep);
            e.reset_tracking();
            e.pop_active(prev);
            assert_eq!(e.dep_sub_count(dep), 0);
        });
    }
}
