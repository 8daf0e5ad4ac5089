//! Global version counter and per-subscriber bitflags.

use bitflags::bitflags;

bitflags! {
    /// Per-subscriber state flags, packed into one integer. `EVALUATED` only
    /// ever applies to a Computed; Effects never set it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubscriberFlags: u32 {
        const ACTIVE        = 1 << 0;
        const RUNNING       = 1 << 1;
        const TRACKING      = 1 << 2;
        const NOTIFIED      = 1 << 3;
        const DIRTY         = 1 << 4;
        const ALLOW_RECURSE = 1 << 5;
        const PAUSED        = 1 << 6;
        const EVALUATED     = 1 << 7;
    }
}

/// Monotonic counter bumped once per `Dep::trigger`. Lets a Computed
/// short-circuit re-evaluation when nothing anywhere has changed since its
/// last refresh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GlobalVersion(pub u64);

impl GlobalVersion {
    pub fn bump(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// One less than `self`, wrapping. Used to seed a freshly-created
    /// Computed's last-refreshed stamp so it never accidentally compares
    /// equal to the engine's current version before its first real refresh
    /// (the fast path would otherwise misfire at version 0).
    pub fn pred(self) -> Self {
        GlobalVersion(self.0.wrapping_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_pack_independently() {
        let f = SubscriberFlags::ACTIVE | SubscriberFlags::TRACKING;
        assert!(f.contains(SubscriberFlags::ACTIVE));
        assert!(f.contains(SubscriberFlags::TRACKING));
        assert!(!f.contains(SubscriberFlags::RUNNING));
    }

    #[test]
    fn running_without_allow_recurse() {
        let f = SubscriberFlags::RUNNING;
        assert!(f.contains(SubscriberFlags::RUNNING) && !f.contains(SubscriberFlags::ALLOW_RECURSE));
    }

    #[test]
    fn global_version_bumps() {
        let mut v = GlobalVersion::default();
        assert_eq!(v.0, 0);
        v.bump();
        v.bump();
        assert_eq!(v.0, 2);
    }
}
