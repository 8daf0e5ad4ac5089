//! Arena-indexed storage for Deps, Subscribers and the Links joining them.
//! Stable slotmap indices sidestep the reference cycle a Dep↔Sub edge would
//! otherwise require, while keeping O(1) traversal.
//!
//! The arena only holds *graph structure* — link pointers, version stamps,
//! flags — never a user closure or cached value. Those live in the typed
//! `Signal<T>`/`Computed<T>`/`Effect` handles, each behind its own `Rc`.
//! Keeping closures out of the arena is what lets an effect's body safely
//! read or write other signals: the engine's `RefCell` is never held across
//! a call into user code.

use slotmap::new_key_type;

use crate::version::SubscriberFlags;

new_key_type! {
    /// Identifies one reactive source's subscriber list (a Signal's own Dep,
    /// or a Computed's own Dep).
    pub struct DepId;
    /// Identifies one Subscriber (an Effect, or a Computed acting as reader).
    pub struct SubId;
    /// Identifies one Dep-Subscriber edge.
    pub struct LinkId;
}

/// The edge joining one Dep and one Subscriber. A Link sits on exactly two
/// doubly-linked lists at once: the Dep's subscriber list and the Sub's
/// dependency list.
pub(crate) struct LinkData {
    pub dep: DepId,
    pub sub: SubId,
    /// `-1` is the "possibly unused, not yet re-tracked this run" sentinel
    /// `prepareDeps` stamps; any non-negative value is a Dep version that
    /// was current the moment this Link was last (re)tracked.
    pub version: i64,
    pub prev_sub: Option<LinkId>,
    pub next_sub: Option<LinkId>,
    pub prev_dep: Option<LinkId>,
    pub next_dep: Option<LinkId>,
    pub prev_active_link: Option<LinkId>,
}

/// One reactive source's subscriber list and version counter.
pub(crate) struct DepData {
    pub subs_head: Option<LinkId>,
    pub subs_tail: Option<LinkId>,
    pub version: u64,
    /// The Link currently being re-evaluated for this Dep during whichever
    /// subscriber is running right now, so `track` can recognize an
    /// already-tracked dependency instead of allocating a new Link.
    pub active_link: Option<LinkId>,
    /// Set iff this Dep is a Computed's own Dep.
    pub owner_computed: Option<SubId>,
    /// True iff this Dep belongs to a keyed map owned by the property-proxy
    /// bridge (`bridge.rs`); reaching a subscriber count of zero then also
    /// removes it from that map.
    pub keyed: bool,
}

impl DepData {
    pub fn new() -> Self {
        Self {
            subs_head: None,
            subs_tail: None,
            version: 0,
            active_link: None,
            owner_computed: None,
            keyed: false,
        }
    }

    pub fn sub_count(&self, links: &slotmap::SlotMap<LinkId, LinkData>) -> usize {
        let mut n = 0;
        let mut cur = self.subs_head;
        while let Some(id) = cur {
            n += 1;
            cur = links[id].next_sub;
        }
        n
    }
}

/// Shared Subscriber fields: dep list head/tail, flags, and the intrusive
/// `next` pointer used by the batch queues. `computed_dep` is `Some` iff
/// this Subscriber is also a Dep in its own right (a Computed); `None` for
/// a plain Effect.
pub(crate) struct SubData {
    pub deps_head: Option<LinkId>,
    pub deps_tail: Option<LinkId>,
    pub flags: SubscriberFlags,
    pub next: Option<SubId>,
    pub computed_dep: Option<DepId>,
}

impl SubData {
    pub fn new_effect() -> Self {
        Self {
            deps_head: None,
            deps_tail: None,
            flags: SubscriberFlags::ACTIVE | SubscriberFlags::TRACKING,
            next: None,
            computed_dep: None,
        }
    }

    /// A freshly-created Computed starts `TRACKING | DIRTY`: `TRACKING` is
    /// permanent (mirrors an Effect's permanent `ACTIVE`) so the first step
    /// of a refresh becomes a pure `!DIRTY` check; `DIRTY` forces the very
    /// first refresh past that check since nothing has been evaluated yet
    /// (a fresh computed starts "evaluated-never", not "clean").
    pub fn new_computed(dep: DepId) -> Self {
        Self {
            deps_head: None,
            deps_tail: None,
            flags: SubscriberFlags::TRACKING | SubscriberFlags::DIRTY,
            next: None,
            computed_dep: Some(dep),
        }
    }
}
