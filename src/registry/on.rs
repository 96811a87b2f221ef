//! C8: user value/child callbacks keyed by path and event type.
//!
//! Grounded on `on_subscription.h`/`on_api.c` (original_source) for the
//! three `off_*` granularities (all, by-type, by-type-and-callback) and on
//! `calimero-network/src/events/gossipsub.rs`'s per-topic subscriber list
//! for the "list of callbacks per key" shape. The spec describes this as a
//! tree mirroring the data tree; since dispatch only ever needs the
//! subscriptions at an *exact* affected path (never a prefix range query),
//! a flat map keyed by `Path` gives the same externally-observable behavior
//! as a real trie with less code.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::cache::Cache;
use crate::path::Path;
use crate::registry::listen::{ListenCommand, ListenRegistry};
use crate::tree::Hash;

pub type SubscriptionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Value,
    ChildAdded,
    ChildChanged,
    ChildRemoved,
}

/// Callback shapes, one variant per event kind (design note in spec §9:
/// "model as a sum type indexed by event kind").
pub enum Callback {
    Value(Box<dyn FnMut(Json) + Send>),
    ChildAdded(Box<dyn FnMut(Json, Option<String>) + Send>),
    ChildChanged(Box<dyn FnMut(Json, String) + Send>),
    ChildRemoved(Box<dyn FnMut(Json, String) + Send>),
}

impl Callback {
    pub(crate) fn kind(&self) -> EventKind {
        match self {
            Callback::Value(_) => EventKind::Value,
            Callback::ChildAdded(_) => EventKind::ChildAdded,
            Callback::ChildChanged(_) => EventKind::ChildChanged,
            Callback::ChildRemoved(_) => EventKind::ChildRemoved,
        }
    }
}

pub(crate) struct Subscription {
    pub id: SubscriptionId,
    pub callback: Callback,
    /// Primes the first `value` dispatch: `None` until the node has been
    /// observed at least once (spec §4.9: "first dispatch ... fires iff the
    /// node exists").
    pub last_seen_hash: Option<Hash>,
    /// Baseline of direct-child name -> hash as of the last dispatch this
    /// subscription actually fired for. Shared representation for
    /// child_added/child_changed/child_removed: added = key present now,
    /// absent from baseline; removed = reverse; changed = present in both
    /// with a differing hash.
    pub last_seen_children: HashMap<String, Hash>,
}

#[derive(Default)]
pub struct OnRegistry {
    by_path: HashMap<Path, Vec<Subscription>>,
    next_id: SubscriptionId,
}

impl OnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `path`, also marking `path` watched on the
    /// listen registry. Priming differs by event kind (spec §4.9): a `value`
    /// callback fires immediately, synchronously, if data already exists at
    /// `path` — mirroring the "initial snapshot" behavior of the original
    /// API — and its baseline is set to the current hash either way, so the
    /// dispatcher doesn't re-fire for state this call already delivered. A
    /// child callback never fires here; its baseline is primed to the
    /// *current* set of children so pre-existing children don't retroactively
    /// look "added" on the next mutation.
    ///
    /// Returns the new subscription's id and, if this was the first interest
    /// in `path`, the `listen` command the caller must send.
    pub fn add(
        &mut self,
        listens: &mut ListenRegistry,
        cache: &Cache,
        path: Path,
        callback: Callback,
    ) -> (SubscriptionId, Option<ListenCommand>) {
        let id = self.next_id;
        self.next_id += 1;
        let kind = callback.kind();

        let mut sub = Subscription {
            id,
            callback,
            last_seen_hash: None,
            last_seen_children: HashMap::new(),
        };

        let node = cache.get(&path);
        match kind {
            EventKind::Value => {
                if !node.is_null() {
                    if let Callback::Value(f) = &mut sub.callback {
                        f(node.to_json());
                    }
                }
                sub.last_seen_hash = Some(node.hash());
            }
            EventKind::ChildAdded | EventKind::ChildChanged | EventKind::ChildRemoved => {
                sub.last_seen_children = node
                    .children()
                    .map(|(k, v)| (k.to_string(), v.hash()))
                    .collect();
            }
        }

        self.by_path.entry(path.clone()).or_default().push(sub);

        let listen_cmd = listens.watch(&path);
        (id, listen_cmd)
    }

    /// Removes subscriptions at `path` matching `event` (if given) and `id`
    /// (if given). `(None, None)` removes every subscription at the path —
    /// `off_path`; `(Some(ev), None)` is `off_path_type`; `(Some(ev),
    /// Some(id))` is `off_path_type_cb`. Returns the count removed, which
    /// the caller feeds to `ListenRegistry::unwatch` by the same amount.
    pub fn remove(
        &mut self,
        listens: &mut ListenRegistry,
        path: &Path,
        event: Option<EventKind>,
        id: Option<SubscriptionId>,
    ) -> (usize, Option<ListenCommand>) {
        let Some(subs) = self.by_path.get_mut(path) else {
            return (0, None);
        };

        let before = subs.len();
        subs.retain(|s| {
            let event_matches = event.map_or(true, |ev| s.callback.kind() == ev);
            let id_matches = id.map_or(true, |want| s.id == want);
            !(event_matches && id_matches)
        });
        let removed = before - subs.len();

        if subs.is_empty() {
            self.by_path.remove(path);
        }

        let unlisten_cmd = if removed > 0 {
            listens.unwatch(path, removed as u32)
        } else {
            None
        };
        (removed, unlisten_cmd)
    }

    pub(crate) fn subscriptions_mut(&mut self, path: &Path) -> Option<&mut Vec<Subscription>> {
        self.by_path.get_mut(path)
    }

    pub fn subscription_count(&self, path: &Path) -> usize {
        self.by_path.get(path).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn add_emits_listen_only_for_first_subscriber_at_a_path() {
        let mut on = OnRegistry::new();
        let mut listens = ListenRegistry::new();
        let cache = Cache::new();
        let (_, cmd1) = on.add(&mut listens, &cache, p("/x"), Callback::Value(Box::new(|_| {})));
        let (_, cmd2) = on.add(&mut listens, &cache, p("/x"), Callback::Value(Box::new(|_| {})));
        assert_eq!(cmd1, Some(ListenCommand::SendListen(p("/x"))));
        assert_eq!(cmd2, None);
    }

    #[test]
    fn off_path_removes_every_subscription_and_unlistens_once() {
        let mut on = OnRegistry::new();
        let mut listens = ListenRegistry::new();
        let cache = Cache::new();
        on.add(&mut listens, &cache, p("/x"), Callback::Value(Box::new(|_| {})));
        on.add(
            &mut listens,
            &cache,
            p("/x"),
            Callback::ChildAdded(Box::new(|_, _| {})),
        );

        let (removed, cmd) = on.remove(&mut listens, &p("/x"), None, None);
        assert_eq!(removed, 2);
        assert_eq!(cmd, Some(ListenCommand::SendUnlisten(p("/x"))));
        assert_eq!(on.subscription_count(&p("/x")), 0);
    }

    #[test]
    fn off_path_type_only_removes_matching_event_kind() {
        let mut on = OnRegistry::new();
        let mut listens = ListenRegistry::new();
        let cache = Cache::new();
        on.add(&mut listens, &cache, p("/x"), Callback::Value(Box::new(|_| {})));
        on.add(
            &mut listens,
            &cache,
            p("/x"),
            Callback::ChildAdded(Box::new(|_, _| {})),
        );

        let (removed, cmd) = on.remove(&mut listens, &p("/x"), Some(EventKind::Value), None);
        assert_eq!(removed, 1);
        assert_eq!(cmd, None); // one subscriber still left, no unlisten yet
        assert_eq!(on.subscription_count(&p("/x")), 1);
    }

    #[test]
    fn off_path_type_cb_removes_exactly_one_subscription() {
        let mut on = OnRegistry::new();
        let mut listens = ListenRegistry::new();
        let cache = Cache::new();
        let (id1, _) = on.add(&mut listens, &cache, p("/x"), Callback::Value(Box::new(|_| {})));
        let (_id2, _) = on.add(&mut listens, &cache, p("/x"), Callback::Value(Box::new(|_| {})));

        let (removed, _) = on.remove(&mut listens, &p("/x"), Some(EventKind::Value), Some(id1));
        assert_eq!(removed, 1);
        assert_eq!(on.subscription_count(&p("/x")), 1);
    }

    #[test]
    fn value_subscription_fires_immediately_when_data_already_exists() {
        let mut on = OnRegistry::new();
        let mut listens = ListenRegistry::new();
        let mut cache = Cache::new();
        cache.set(&p("/x"), crate::tree::Node::number(7.0));

        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        on.add(
            &mut listens,
            &cache,
            p("/x"),
            Callback::Value(Box::new(move |v| *seen2.lock().unwrap() = Some(v))),
        );

        assert_eq!(*seen.lock().unwrap(), Some(serde_json::json!(7.0)));
    }

    #[test]
    fn value_subscription_does_not_fire_when_path_is_empty() {
        let mut on = OnRegistry::new();
        let mut listens = ListenRegistry::new();
        let cache = Cache::new();

        let fired = Arc::new(Mutex::new(false));
        let fired2 = fired.clone();
        on.add(
            &mut listens,
            &cache,
            p("/x"),
            Callback::Value(Box::new(move |_| *fired2.lock().unwrap() = true)),
        );

        assert!(!*fired.lock().unwrap());
    }

    #[test]
    fn child_subscription_primes_baseline_to_current_children_without_firing() {
        let mut on = OnRegistry::new();
        let mut listens = ListenRegistry::new();
        let mut cache = Cache::new();
        cache.set(&p("/r/a"), crate::tree::Node::number(1.0));
        cache.set(&p("/r/b"), crate::tree::Node::number(2.0));

        let fired = Arc::new(Mutex::new(false));
        let fired2 = fired.clone();
        on.add(
            &mut listens,
            &cache,
            p("/r"),
            Callback::ChildAdded(Box::new(move |_, _| *fired2.lock().unwrap() = true)),
        );

        assert!(!*fired.lock().unwrap());
        let subs = on.subscriptions_mut(&p("/r")).unwrap();
        assert_eq!(subs[0].last_seen_children.len(), 2);
    }
}
