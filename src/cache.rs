//! C3: mutate the tree at a path, producing the affected-path set that
//! drives dispatch.
//!
//! Grounded on the mutate-and-diff pattern in
//! `calimero-storage/src/tests/tree_sync.rs` and `merge_dispatch.rs`: a
//! mutation is applied, then the tree is walked to see which ancestors
//! actually changed. Unlike the teacher's mutable entity store, this cache
//! rebuilds the ancestor chain as fresh, persistent `Node`s (see
//! `tree.rs::Node::with_child`) rather than mutating in place plus an
//! explicit "dirty" bit — simpler to reason about for a single-threaded
//! context, at the cost of an O(depth) clone per write, which is the shape
//! of mutation this protocol expects anyway (paths are shallow).

use std::collections::HashMap;

use crate::path::Path;
use crate::tree::Node;

/// One entry of a mutation's affected-path set (spec §4.3). Carries the
/// *old* direct children of `path`, snapshotted just before the mutation,
/// so the event dispatcher (`dispatch.rs`) can tell which specific child
/// was added/removed/changed without needing the pre-mutation tree to
/// still be around.
#[derive(Debug, Clone)]
pub struct PathMutation {
    pub path: Path,
    pub old_children: HashMap<String, Node>,
}

/// Owns exactly one root `Node`. All mutation goes through here so the
/// empty-internal cascade and hash-consistency invariants always hold.
#[derive(Debug, Default)]
pub struct Cache {
    root: Node,
}

impl Cache {
    pub fn new() -> Self {
        Self { root: Node::null() }
    }

    /// Reads the node at `path`. Absent paths and paths explicitly set to
    /// `null` both read back as `Node::null()` (spec invariant 4).
    pub fn get(&self, path: &Path) -> Node {
        Self::node_at(&self.root, path.parts())
            .cloned()
            .unwrap_or_else(Node::null)
    }

    /// Replaces the subtree at `path` with `value`. `value` may be
    /// `Node::null()`, which deletes the subtree. Returns `path` itself
    /// plus every proper ancestor whose hash changed as a result (spec
    /// §4.3); `path` is always included, even if the new value is
    /// identical to the old one — callers that care about "did anything
    /// actually change" compare hashes themselves (this is what the event
    /// dispatcher does).
    pub fn set(&mut self, path: &Path, value: Node) -> Vec<PathMutation> {
        let ancestors: Vec<Path> = path.ancestors().collect();
        let old_hashes: Vec<[u8; 20]> = ancestors.iter().map(|p| self.hash_at(p)).collect();
        let old_children: Vec<HashMap<String, Node>> = ancestors
            .iter()
            .map(|p| self.children_at(p))
            .collect();

        self.root = Self::set_at(&self.root, path.parts(), value);

        let mut affected = Vec::with_capacity(ancestors.len());
        for (i, p) in ancestors.into_iter().enumerate() {
            let new_hash = self.hash_at(&p);
            if i == 0 || new_hash != old_hashes[i] {
                affected.push(PathMutation {
                    path: p,
                    old_children: old_children[i].clone(),
                });
            }
        }
        affected
    }

    /// Applies child replacements from an internal-node payload one at a
    /// time; children not present in the payload are left alone. A
    /// non-internal payload (a bare leaf or `null`) has no "children to
    /// leave alone" so it degrades to a plain `set`.
    pub fn merge(&mut self, path: &Path, payload: Node) -> Vec<PathMutation> {
        if !payload.is_internal() {
            return self.set(path, payload);
        }

        let mut by_path: HashMap<Path, PathMutation> = HashMap::new();
        let mut order = Vec::new();
        for (key, child) in payload.children() {
            for m in self.set(&path.child(key), child.clone()) {
                if !by_path.contains_key(&m.path) {
                    order.push(m.path.clone());
                }
                // First snapshot wins: it reflects state before this merge
                // started, which is what "old" should mean for the whole
                // merge, not just the last child processed.
                by_path.entry(m.path.clone()).or_insert(m);
            }
        }
        order
            .into_iter()
            .map(|p| by_path.remove(&p).expect("path was just inserted"))
            .collect()
    }

    fn hash_at(&self, path: &Path) -> [u8; 20] {
        Self::node_at(&self.root, path.parts())
            .map(Node::hash)
            .unwrap_or_else(|| Node::null().hash())
    }

    fn children_at(&self, path: &Path) -> HashMap<String, Node> {
        Self::node_at(&self.root, path.parts())
            .map(|n| n.children().map(|(k, v)| (k.to_string(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn node_at<'a>(root: &'a Node, parts: &[String]) -> Option<&'a Node> {
        let mut cur = root;
        for part in parts {
            cur = cur.child(part)?;
        }
        Some(cur)
    }

    fn set_at(node: &Node, parts: &[String], value: Node) -> Node {
        match parts.split_first() {
            None => value,
            Some((head, rest)) => {
                let existing = node.child(head).cloned().unwrap_or_else(Node::null);
                let new_child = Self::set_at(&existing, rest, value);
                node.with_child(head, new_child)
            }
        }
    }
}
