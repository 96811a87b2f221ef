//! C9: turns a mutation's affected-path set into ordered user-callback
//! invocations.
//!
//! Grounded on `calimero-network`'s event-bus dispatch (`src/events/mod.rs`),
//! which fans a single swarm event out to every interested handler in
//! registration order; generalized here to also order *across* event
//! categories and path depths per spec §4.9, and to guard against handlers
//! that trigger further mutations (the swarm event bus doesn't need this —
//! its handlers don't feed back into the swarm synchronously — but a
//! `set` called from inside a `value` callback is exactly the reentrant case
//! this module has to handle without recursing).

use std::collections::{HashMap, VecDeque};

use serde_json::Value as Json;

use crate::cache::{Cache, PathMutation};
use crate::path::Path;
use crate::registry::on::{Callback, EventKind, OnRegistry, SubscriptionId};
use crate::tree::Node;

enum EventPayload {
    Value(Json),
    ChildAdded(Json, Option<String>),
    ChildChanged(Json, String),
    ChildRemoved(Json, String),
}

impl EventPayload {
    /// Dispatch-order category rank (spec §4.9): child_removed, then
    /// child_added, then child_changed, then value.
    fn category(&self) -> u8 {
        match self {
            EventPayload::ChildRemoved(..) => 0,
            EventPayload::ChildAdded(..) => 1,
            EventPayload::ChildChanged(..) => 2,
            EventPayload::Value(..) => 3,
        }
    }
}

struct Pending {
    depth: usize,
    reg_order: usize,
    path: Path,
    sub_id: SubscriptionId,
    payload: EventPayload,
}

/// Drains mutation batches into callback invocations, one batch fully at a
/// time, queuing any batch submitted while a drain is already in progress.
#[derive(Default)]
pub struct Dispatcher {
    draining: bool,
    queue: VecDeque<Vec<PathMutation>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatches events for one mutation's affected-path set against the
    /// *post*-mutation cache. If this is called reentrantly — a user
    /// callback invoked from within an in-progress `dispatch` calls `set`
    /// again — the new batch is queued rather than interleaved into the
    /// batch currently being drained (spec §4.9's reentrancy rule).
    pub fn dispatch(&mut self, on: &mut OnRegistry, cache: &Cache, mutations: Vec<PathMutation>) {
        if mutations.is_empty() {
            return;
        }
        self.queue.push_back(mutations);
        if self.draining {
            return;
        }
        self.draining = true;
        while let Some(batch) = self.queue.pop_front() {
            self.run_batch(on, cache, batch);
        }
        self.draining = false;
    }

    fn run_batch(&mut self, on: &mut OnRegistry, cache: &Cache, mutations: Vec<PathMutation>) {
        let mut pending = Vec::new();

        for m in &mutations {
            let depth = m.path.parts().len();
            let current = cache.get(&m.path);

            let sorted_keys: Vec<String> =
                current.children().map(|(k, _)| k.to_string()).collect();
            let new_children: HashMap<String, Node> = current
                .children()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();

            let mut added = Vec::new();
            let mut changed = Vec::new();
            for (k, new_node) in &new_children {
                match m.old_children.get(k) {
                    None => added.push(k.clone()),
                    Some(old_node) if old_node.hash() != new_node.hash() => changed.push(k.clone()),
                    _ => {}
                }
            }
            let mut removed = Vec::new();
            for (k, old_node) in &m.old_children {
                if !new_children.contains_key(k) {
                    removed.push((k.clone(), old_node.clone()));
                }
            }

            let Some(subs) = on.subscriptions_mut(&m.path) else {
                continue;
            };
            for (reg_order, sub) in subs.iter_mut().enumerate() {
                match sub.callback.kind() {
                    EventKind::Value => {
                        let new_hash = current.hash();
                        if sub.last_seen_hash != Some(new_hash) {
                            sub.last_seen_hash = Some(new_hash);
                            pending.push(Pending {
                                depth,
                                reg_order,
                                path: m.path.clone(),
                                sub_id: sub.id,
                                payload: EventPayload::Value(current.to_json()),
                            });
                        }
                    }
                    EventKind::ChildRemoved => {
                        for (k, old_node) in &removed {
                            pending.push(Pending {
                                depth,
                                reg_order,
                                path: m.path.clone(),
                                sub_id: sub.id,
                                payload: EventPayload::ChildRemoved(old_node.to_json(), k.clone()),
                            });
                        }
                        sub.last_seen_children = hash_map_of(&new_children);
                    }
                    EventKind::ChildAdded => {
                        for k in &added {
                            let prev = prev_sibling(&sorted_keys, k);
                            let node = &new_children[k];
                            pending.push(Pending {
                                depth,
                                reg_order,
                                path: m.path.clone(),
                                sub_id: sub.id,
                                payload: EventPayload::ChildAdded(node.to_json(), prev),
                            });
                        }
                        sub.last_seen_children = hash_map_of(&new_children);
                    }
                    EventKind::ChildChanged => {
                        for k in &changed {
                            let node = &new_children[k];
                            pending.push(Pending {
                                depth,
                                reg_order,
                                path: m.path.clone(),
                                sub_id: sub.id,
                                payload: EventPayload::ChildChanged(node.to_json(), k.clone()),
                            });
                        }
                        sub.last_seen_children = hash_map_of(&new_children);
                    }
                }
            }
        }

        pending.sort_by_key(|p| {
            (
                p.payload.category(),
                std::cmp::Reverse(p.depth),
                p.reg_order,
            )
        });

        for p in pending {
            let Some(subs) = on.subscriptions_mut(&p.path) else {
                continue;
            };
            let Some(sub) = subs.iter_mut().find(|s| s.id == p.sub_id) else {
                continue;
            };
            match (&mut sub.callback, p.payload) {
                (Callback::Value(f), EventPayload::Value(v)) => f(v),
                (Callback::ChildAdded(f), EventPayload::ChildAdded(v, prev)) => f(v, prev),
                (Callback::ChildChanged(f), EventPayload::ChildChanged(v, key)) => f(v, key),
                (Callback::ChildRemoved(f), EventPayload::ChildRemoved(v, key)) => f(v, key),
                _ => unreachable!("payload kind always matches the subscription it was built for"),
            }
        }
    }
}

fn hash_map_of(children: &HashMap<String, Node>) -> HashMap<String, crate::tree::Hash> {
    children.iter().map(|(k, v)| (k.clone(), v.hash())).collect()
}

fn prev_sibling(sorted_keys: &[String], key: &str) -> Option<String> {
    let idx = sorted_keys.iter().position(|k| k == key)?;
    if idx == 0 {
        None
    } else {
        Some(sorted_keys[idx - 1].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::listen::ListenRegistry;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn value_subscription_fires_once_per_actual_change() {
        let mut cache = Cache::new();
        let mut on = OnRegistry::new();
        let mut listens = ListenRegistry::new();
        let mut dispatcher = Dispatcher::new();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        on.add(
            &mut listens,
            &cache,
            p("/x"),
            Callback::Value(Box::new(move |v| seen2.borrow_mut().push(v))),
        );

        let muts = cache.set(&p("/x"), Node::number(1.0));
        dispatcher.dispatch(&mut on, &cache, muts);
        // identical value again: hash unchanged, must not re-fire
        let muts = cache.set(&p("/x"), Node::number(1.0));
        dispatcher.dispatch(&mut on, &cache, muts);
        let muts = cache.set(&p("/x"), Node::number(2.0));
        dispatcher.dispatch(&mut on, &cache, muts);

        assert_eq!(
            *seen.borrow(),
            vec![serde_json::json!(1.0), serde_json::json!(2.0)]
        );
    }

    #[test]
    fn child_added_then_removed_reports_correct_payloads() {
        let mut cache = Cache::new();
        let mut on = OnRegistry::new();
        let mut listens = ListenRegistry::new();
        let mut dispatcher = Dispatcher::new();

        let added = Rc::new(RefCell::new(Vec::new()));
        let added2 = added.clone();
        on.add(
            &mut listens,
            &cache,
            p("/r"),
            Callback::ChildAdded(Box::new(move |v, prev| added2.borrow_mut().push((v, prev)))),
        );
        let removed = Rc::new(RefCell::new(Vec::new()));
        let removed2 = removed.clone();
        on.add(
            &mut listens,
            &cache,
            p("/r"),
            Callback::ChildRemoved(Box::new(move |v, key| removed2.borrow_mut().push((v, key)))),
        );

        let muts = cache.set(&p("/r/a"), Node::number(1.0));
        dispatcher.dispatch(&mut on, &cache, muts);
        let muts = cache.set(&p("/r/a"), Node::null());
        dispatcher.dispatch(&mut on, &cache, muts);

        assert_eq!(added.borrow().len(), 1);
        assert_eq!(added.borrow()[0], (serde_json::json!(1.0), None));
        assert_eq!(removed.borrow().len(), 1);
        assert_eq!(removed.borrow()[0], (serde_json::json!(1.0), "a".to_string()));
    }

    #[test]
    fn pre_existing_children_do_not_retroactively_fire_child_added() {
        let mut cache = Cache::new();
        cache.set(&p("/r/a"), Node::number(1.0));

        let mut on = OnRegistry::new();
        let mut listens = ListenRegistry::new();
        let mut dispatcher = Dispatcher::new();

        let added = Rc::new(RefCell::new(Vec::new()));
        let added2 = added.clone();
        on.add(
            &mut listens,
            &cache,
            p("/r"),
            Callback::ChildAdded(Box::new(move |v, prev| added2.borrow_mut().push((v, prev)))),
        );

        // a second, unrelated child arrives; only it should be reported
        let muts = cache.set(&p("/r/b"), Node::number(2.0));
        dispatcher.dispatch(&mut on, &cache, muts);

        assert_eq!(added.borrow().len(), 1);
        assert_eq!(added.borrow()[0].0, serde_json::json!(2.0));
    }

    #[test]
    fn events_at_the_same_path_fire_removed_added_changed_then_value() {
        let mut cache = Cache::new();
        cache.set(&p("/r/a"), Node::number(1.0));

        let mut on = OnRegistry::new();
        let mut listens = ListenRegistry::new();
        let mut dispatcher = Dispatcher::new();

        let order = Rc::new(RefCell::new(Vec::new()));

        let o1 = order.clone();
        on.add(
            &mut listens,
            &cache,
            p("/r"),
            Callback::Value(Box::new(move |_| o1.borrow_mut().push("value"))),
        );
        let o2 = order.clone();
        on.add(
            &mut listens,
            &cache,
            p("/r"),
            Callback::ChildAdded(Box::new(move |_, _| o2.borrow_mut().push("added"))),
        );
        let o3 = order.clone();
        on.add(
            &mut listens,
            &cache,
            p("/r"),
            Callback::ChildRemoved(Box::new(move |_, _| o3.borrow_mut().push("removed"))),
        );
        let o4 = order.clone();
        on.add(
            &mut listens,
            &cache,
            p("/r"),
            Callback::ChildChanged(Box::new(move |_, _| o4.borrow_mut().push("changed"))),
        );

        // one merge that both removes "a" and adds "b": child_removed and
        // child_added both fire at /r, plus value since its hash changed.
        // "changed" never fires here since no surviving key's hash differs.
        let mut payload = std::collections::BTreeMap::new();
        payload.insert("a".to_string(), Node::null());
        payload.insert("b".to_string(), Node::number(2.0));
        let muts = cache.merge(&p("/r"), Node::internal(payload));
        dispatcher.dispatch(&mut on, &cache, muts);

        assert_eq!(*order.borrow(), vec!["removed", "added", "value"]);
    }
}
