//! Shared Subscriber algorithm that doesn't fit neatly on the engine alone:
//! dirty-checking needs to force a dependency Computed to refresh before
//! comparing versions, and refreshing means calling that Computed's compute
//! closure — code the engine itself never holds a reference to (see
//! `graph.rs`'s module doc). So this walk collects the dependency list with
//! one short engine borrow, then steps through it, borrowing only as needed
//! and calling out to `runtime::drive_refresh` between borrows.

use crate::graph::{DepId, LinkId, SubId};
use crate::runtime::{drive_refresh, with_engine};

/// Dirty iff any dependency Link's stamped version no longer matches its
/// Dep's current version, after giving any dependency that is itself a
/// Computed the chance to refresh first.
pub(crate) fn is_dirty(sub: SubId) -> bool {
    let links: Vec<(LinkId, DepId)> = with_engine(|e| e.dep_links_of(sub));

    for (link, dep) in links {
        let owner = with_engine(|e| e.dep_owner_computed(dep));
        if let Some(owner_sub) = owner {
            drive_refresh(owner_sub);
        }
        let stale = with_engine(|e| e.link_is_stale(link, dep));
        if stale {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use crate::runtime::with_engine;

    #[test]
    fn clean_sub_with_no_deps_is_not_dirty() {
        let sub = with_engine(|e| e.create_effect_sub());
        assert!(!super::is_dirty(sub));
    }

    #[test]
    fn tracked_dep_becomes_dirty_after_trigger() {
        let (dep, sub) = with_engine(|e| {
            let dep = e.create_dep();
            let sub = e.create_effect_sub();
            let prev = e.push_active(sub, true);
            e.dep_track(dep);
            e.pop_active(prev);
            (dep, sub)
        });
        assert!(!super::is_dirty(sub));
        with_engine(|e| {
            e.dep_trigger(dep);
        });
        assert!(super::is_dirty(sub));
    }
}
