//! C2: in-memory tree node with lazily-cached content hash.
//!
//! Grounded on `calimero-dag`'s content-addressed `CausalDelta` (hash-as-id)
//! and the hash-propagation tests in `calimero-storage/src/tests/merkle.rs`.
//! Unlike the teacher's mutable Merkle tree (which recomputes hashes through
//! an `Interface::save` round-trip), mutation here is modeled as persistent
//! replace-on-write: `Cache::set` builds fresh ancestor nodes rather than
//! mutating existing ones in place, so every `Node` either already has a
//! cached hash or has never been hashed — there is no separate "dirty" flag
//! to track.

use std::cell::RefCell;
use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use serde_json::Value as Json;
use sha1::{Digest, Sha1};

pub type Hash = [u8; 20];

#[derive(Debug, Clone)]
enum NodeValue {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Internal(BTreeMap<String, Node>),
}

/// A single node of the shared tree. Absent paths and paths explicitly
/// mapped to `Null` are both represented by `Node::Null` — readers cannot
/// tell them apart (spec invariant 4).
#[derive(Debug, Clone)]
pub struct Node {
    value: NodeValue,
    hash: RefCell<Option<Hash>>,
}

impl Node {
    pub fn null() -> Self {
        Self::from_value(NodeValue::Null)
    }

    pub fn bool(b: bool) -> Self {
        Self::from_value(NodeValue::Bool(b))
    }

    pub fn number(n: f64) -> Self {
        Self::from_value(NodeValue::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::from_value(NodeValue::Str(s.into()))
    }

    pub fn internal(children: BTreeMap<String, Node>) -> Self {
        Self::from_value(NodeValue::Internal(children))
    }

    fn from_value(value: NodeValue) -> Self {
        Self {
            value,
            hash: RefCell::new(None),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, NodeValue::Null)
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.value, NodeValue::Internal(_))
    }

    /// Children of an internal node, in lexicographic key order. Empty for
    /// non-internal nodes.
    pub fn children(&self) -> Box<dyn Iterator<Item = (&str, &Node)> + '_> {
        match &self.value {
            NodeValue::Internal(map) => {
                Box::new(map.iter().map(|(k, v)| (k.as_str(), v)))
            }
            _ => Box::new(std::iter::empty()),
        }
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        match &self.value {
            NodeValue::Internal(map) => map.get(name),
            _ => None,
        }
    }

    pub fn child_count(&self) -> usize {
        match &self.value {
            NodeValue::Internal(map) => map.len(),
            _ => 0,
        }
    }

    /// Returns a copy of `self` with `name` rebound to `child`, or removed if
    /// `child` is `Null`. Collapses to `Node::null()` if that removal leaves
    /// no children — this is the empty-internal cascade of spec invariant 1,
    /// and it composes: rebuilding an ancestor chain one level at a time with
    /// this method makes the cascade propagate for free.
    pub(crate) fn with_child(&self, name: &str, child: Node) -> Node {
        let mut map = match &self.value {
            NodeValue::Internal(m) => m.clone(),
            _ => BTreeMap::new(),
        };
        if child.is_null() {
            map.remove(name);
        } else {
            map.insert(name.to_string(), child);
        }
        if map.is_empty() {
            Node::null()
        } else {
            Node::internal(map)
        }
    }

    /// The canonical 20-byte SHA-1 hash of this subtree (spec §6), computed
    /// bottom-up on first access and cached thereafter.
    pub fn hash(&self) -> Hash {
        if let Some(h) = *self.hash.borrow() {
            return h;
        }
        let bytes = self.canonical_bytes();
        let mut hasher = Sha1::new();
        hasher.update(&bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        *self.hash.borrow_mut() = Some(out);
        out
    }

    fn canonical_bytes(&self) -> Vec<u8> {
        match &self.value {
            NodeValue::Null => Vec::new(),
            NodeValue::Bool(b) => format!("boolean:{b}").into_bytes(),
            NodeValue::Number(n) => format!("number:{}", format_canonical_number(*n)).into_bytes(),
            NodeValue::Str(s) => format!("string:{s}").into_bytes(),
            NodeValue::Internal(map) => {
                let mut buf = Vec::new();
                for (key, child) in map {
                    buf.extend_from_slice(b":");
                    buf.extend_from_slice(key.as_bytes());
                    buf.extend_from_slice(b":");
                    buf.extend_from_slice(STANDARD_NO_PAD.encode(child.hash()).as_bytes());
                }
                buf
            }
        }
    }

    /// Converts a `serde_json::Value` into a tree node. Objects with
    /// non-canonical key order are fine — `BTreeMap` normalizes it.
    pub fn from_json(value: &Json) -> Self {
        match value {
            Json::Null => Node::null(),
            Json::Bool(b) => Node::bool(*b),
            Json::Number(n) => Node::number(n.as_f64().unwrap_or(0.0)),
            Json::String(s) => Node::string(s.clone()),
            Json::Array(items) => {
                let mut map = BTreeMap::new();
                for (i, item) in items.iter().enumerate() {
                    map.insert(i.to_string(), Node::from_json(item));
                }
                Node::internal(map)
            }
            Json::Object(obj) => {
                let mut map = BTreeMap::new();
                for (k, v) in obj {
                    let child = Node::from_json(v);
                    if !child.is_null() {
                        map.insert(k.clone(), child);
                    }
                }
                if map.is_empty() {
                    Node::null()
                } else {
                    Node::internal(map)
                }
            }
        }
    }

    /// Converts this subtree back into a `serde_json::Value` for dispatch to
    /// user callbacks or for wire encoding.
    pub fn to_json(&self) -> Json {
        match &self.value {
            NodeValue::Null => Json::Null,
            NodeValue::Bool(b) => Json::Bool(*b),
            NodeValue::Number(n) => {
                serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number)
            }
            NodeValue::Str(s) => Json::String(s.clone()),
            NodeValue::Internal(map) => {
                let obj = map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                Json::Object(obj)
            }
        }
    }
}

/// Formats an `f64` the way spec §6 requires: shortest round-trip decimal,
/// no trailing zeros, lowercase exponent. Rust's `Display` for `f64` already
/// produces the shortest round-trip decimal and never emits an uppercase
/// exponent marker, so this only has to special-case the one place Rust's
/// formatting diverges from "no trailing zeros": it never adds a trailing
/// ".0" for whole numbers, so there is nothing left to strip.
fn format_canonical_number(n: f64) -> String {
    format!("{n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_hashes_to_sha1_of_empty_string() {
        let empty = Sha1::digest(b"");
        assert_eq!(Node::null().hash().as_slice(), empty.as_slice());
    }

    #[test]
    fn leaf_hash_depends_on_type_and_value() {
        assert_ne!(Node::bool(true).hash(), Node::bool(false).hash());
        assert_ne!(Node::number(1.0).hash(), Node::string("1").hash());
        assert_eq!(Node::number(1.0).hash(), Node::number(1.0).hash());
    }

    #[test]
    fn internal_hash_independent_of_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("a".to_string(), Node::number(1.0));
        a.insert("b".to_string(), Node::number(2.0));

        let mut b = BTreeMap::new();
        b.insert("b".to_string(), Node::number(2.0));
        b.insert("a".to_string(), Node::number(1.0));

        assert_eq!(Node::internal(a).hash(), Node::internal(b).hash());
    }

    #[test]
    fn internal_hash_changes_when_child_changes() {
        let mut before = BTreeMap::new();
        before.insert("a".to_string(), Node::number(1.0));
        let mut after = BTreeMap::new();
        after.insert("a".to_string(), Node::number(2.0));
        assert_ne!(Node::internal(before).hash(), Node::internal(after).hash());
    }

    #[test]
    fn json_round_trip_preserves_shape() {
        let json: Json = serde_json::json!({"a": {"b": 42}, "c": "hi"});
        let node = Node::from_json(&json);
        assert_eq!(node.to_json(), json);
    }

    #[test]
    fn empty_object_collapses_to_null() {
        let json: Json = serde_json::json!({});
        assert!(Node::from_json(&json).is_null());
    }
}
