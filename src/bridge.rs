//! Property-proxy bridge: `track`/`trigger` keyed by `(target, key)`, the
//! surface an external object-property proxy layer calls into when it wants
//! a single field, map entry, or sequence index to behave as its own
//! reactive source without the engine needing to know about objects at all.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;

use crate::diagnostics::{AccessType, DebugPayload};
use crate::graph::DepId;
use crate::runtime::with_engine;

/// The access kind a bridged read or write is reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Get,
    Has,
    Iterate,
    Add,
    Set,
    Delete,
    Clear,
}

/// Sentinel keys a keyed map reserves for collection-shape changes, so a
/// property read of (say) `.length` or a `for..in` loop can depend on
/// "the shape changed" without enumerating every real key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ReservedKey {
    Iterate,
    MapKeyIterate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MapKey<K> {
    Real(K),
    Reserved(ReservedKey),
}

/// A by-`(target, key)` map of Deps, one per tracked property, for a
/// collaborator that proxies reads/writes on some object `target` of key
/// type `K` (e.g. a field name, a map key, or a sequence index).
///
/// Each `Dep` is created on first access and removed once its subscriber
/// count reaches zero.
pub struct KeyedDepMap<T, K> {
    deps: RefCell<HashMap<(T, MapKey<K>), DepId>>,
}

impl<T, K> Default for KeyedDepMap<T, K>
where
    T: Eq + Hash + Clone,
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            deps: RefCell::new(HashMap::new()),
        }
    }
}

impl<T, K> KeyedDepMap<T, K>
where
    T: Eq + Hash + Clone,
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn dep_for(&self, target: &T, key: MapKey<K>) -> DepId {
        if let Some(&id) = self.deps.borrow().get(&(target.clone(), key.clone())) {
            return id;
        }
        let id = with_engine(|e| e.create_dep());
        with_engine(|e| e.mark_dep_keyed(id));
        self.deps
            .borrow_mut()
            .insert((target.clone(), key), id);
        id
    }

    fn existing_dep_for(&self, target: &T, key: &MapKey<K>) -> Option<DepId> {
        self.deps.borrow().get(&(target.clone(), key.clone())).copied()
    }

    /// Subscribes the active tracking context to `target`'s `key`, creating
    /// the backing Dep on first access. Dispatches `onTrack` for the active
    /// subscriber, if it has that dev hook registered.
    pub fn track(&self, target: &T, op: OpType, key: Option<K>)
    where
        K: Into<String> + Clone,
    {
        let mapped = match &key {
            Some(k) => MapKey::Real(k.clone()),
            None => MapKey::Reserved(ReservedKey::Iterate),
        };
        let dep = self.dep_for(target, mapped);
        with_engine(|e| {
            e.dep_track(dep);
        });
        if let Some(sub) = with_engine(|e| e.active_subscriber()) {
            crate::effect::dispatch_on_track(
                sub,
                DebugPayload {
                    access: map_access(op),
                    key: key.map(Into::into),
                    new_value: None,
                    old_value: None,
                },
            );
        }
        self.sweep_empty(target);
    }

    /// Triggers `target`'s `key`: `CLEAR` notifies every Dep keyed under
    /// `target`; `ADD`/`DELETE`
    /// additionally notify the iterate key (and the map-key-iterate key for
    /// keyed-map targets); changing an integer key on an ordered sequence
    /// additionally notifies `"length"`; shrinking `length` notifies every
    /// index Dep at or past the new length plus the array-iterate key.
    pub fn trigger(
        &self,
        target: &T,
        op: OpType,
        key: Option<K>,
        is_keyed_map: bool,
        shrunk_indices: &[K],
    ) where
        K: Into<String> + From<&'static str> + Clone + 'static,
    {
        let mut touched: Vec<MapKey<K>> = Vec::new();

        match op {
            OpType::Clear => {
                touched.extend(
                    self.deps
                        .borrow()
                        .keys()
                        .filter(|(t, _)| t == target)
                        .map(|(_, k)| k.clone()),
                );
            }
            OpType::Add | OpType::Delete => {
                if let Some(k) = &key {
                    touched.push(MapKey::Real(k.clone()));
                }
                touched.push(MapKey::Reserved(ReservedKey::Iterate));
                if is_keyed_map {
                    touched.push(MapKey::Reserved(ReservedKey::MapKeyIterate));
                }
                if is_integer_like(&key) {
                    touched.push(MapKey::Real(length_key()));
                }
            }
            OpType::Set => {
                if let Some(k) = &key {
                    touched.push(MapKey::Real(k.clone()));
                }
            }
            _ => {
                if let Some(k) = &key {
                    touched.push(MapKey::Real(k.clone()));
                }
            }
        }

        for idx in shrunk_indices {
            touched.push(MapKey::Real(idx.clone()));
        }
        if !shrunk_indices.is_empty() {
            touched.push(MapKey::Reserved(ReservedKey::Iterate));
        }

        let mut seen = std::collections::HashSet::new();
        touched.retain(|k| seen.insert(k.clone()));

        for mapped in touched {
            let Some(dep) = self.existing_dep_for(target, &mapped) else {
                continue;
            };
            let subs = with_engine(|e| e.dep_subscribers(dep));
            let payload = DebugPayload {
                access: map_access(op),
                key: key.clone().map(Into::into),
                new_value: None,
                old_value: None,
            };
            for sub in subs {
                crate::effect::dispatch_on_trigger(sub, payload.clone());
            }
            let needs_drain = with_engine(|e| e.dep_trigger(dep));
            if needs_drain {
                crate::batch::drain_effects_loop();
            }
        }
    }

    fn sweep_empty(&self, target: &T) {
        let mut map = self.deps.borrow_mut();
        map.retain(|(t, _), &mut dep| t != target || with_engine(|e| e.dep_sub_count(dep) > 0));
    }
}

fn map_access(op: OpType) -> AccessType {
    match op {
        OpType::Get => AccessType::Get,
        OpType::Has => AccessType::Has,
        OpType::Iterate => AccessType::Iterate,
        OpType::Add => AccessType::Add,
        OpType::Set => AccessType::Set,
        OpType::Delete => AccessType::Delete,
        OpType::Clear => AccessType::Clear,
    }
}

fn is_integer_like<K: 'static>(key: &Option<K>) -> bool {
    key.as_ref()
        .is_some_and(|k| (k as &dyn Any).downcast_ref::<usize>().is_some())
}

fn length_key<K: From<&'static str>>() -> K {
    K::from("length")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_creates_dep_and_trigger_notifies_it() {
        let map: KeyedDepMap<u32, String> = KeyedDepMap::new();
        let target = 1u32;
        let sub = with_engine(|e| e.create_effect_sub());
        let prev = with_engine(|e| e.push_active(sub, true));
        map.track(&target, OpType::Get, Some("x".to_string()));
        with_engine(|e| e.pop_active(prev));

        let before = with_engine(|e| {
            let dep = map.existing_dep_for(&target, &MapKey::Real("x".to_string())).unwrap();
            e.dep_version(dep)
        });
        map.trigger(&target, OpType::Set, Some("x".to_string()), false, &[]);
        let after = with_engine(|e| {
            let dep = map.existing_dep_for(&target, &MapKey::Real("x".to_string())).unwrap();
            e.dep_version(dep)
        });
        assert_eq!(after, before + 1);
    }

    #[test]
    fn clear_notifies_every_key_under_target() {
        let map: KeyedDepMap<u32, String> = KeyedDepMap::new();
        let target = 7u32;
        let sub = with_engine(|e| e.create_effect_sub());
        let prev = with_engine(|e| e.push_active(sub, true));
        map.track(&target, OpType::Get, Some("a".to_string()));
        map.track(&target, OpType::Get, Some("b".to_string()));
        with_engine(|e| e.pop_active(prev));

        let dep_a = map.existing_dep_for(&target, &MapKey::Real("a".to_string())).unwrap();
        let dep_b = map.existing_dep_for(&target, &MapKey::Real("b".to_string())).unwrap();
        let (va, vb) = with_engine(|e| (e.dep_version(dep_a), e.dep_version(dep_b)));

        map.trigger(&target, OpType::Clear, None, false, &[]);

        let (va2, vb2) = with_engine(|e| (e.dep_version(dep_a), e.dep_version(dep_b)));
        assert_eq!(va2, va + 1);
        assert_eq!(vb2, vb + 1);
    }
}
