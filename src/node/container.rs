// Taffy Containers
// Array, hash, list, pair and heap payloads. These back the core container
// classes and scope storage; they are never stored in a scope unwrapped.

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use super::{CompareError, Depth, HashKey, Node, NodeFlags, NodeHeader};

/// A heap payload with its collector header
pub struct Container<T> {
    header: NodeHeader,
    data: Mutex<T>,
}

impl<T> Container<T> {
    pub fn new(data: T) -> Arc<Self> {
        Arc::new(Self {
            header: NodeHeader::new(NodeFlags::empty()),
            data: Mutex::new(data),
        })
    }

    pub fn header(&self) -> &NodeHeader {
        &self.header
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.data.lock()
    }
}

pub type ArrayRef = Arc<Container<Vec<Node>>>;
pub type HeapRef = Arc<Container<Vec<Node>>>;
pub type ListRef = Arc<Container<VecDeque<Node>>>;
pub type PairRef = Arc<Container<(Node, Node)>>;
pub type HashRef = Arc<Container<NodeHash>>;

pub(super) fn copy_sequence(source: &ArrayRef, depth: Depth) -> ArrayRef {
    let items = source
        .lock()
        .iter()
        .map(|node| match depth {
            Depth::Deep => node.copy(Depth::Deep),
            _ => node.clone(),
        })
        .collect();
    Container::new(items)
}

/// Insert keeping the heap ordered smallest-first
pub fn heap_push(heap: &HeapRef, node: Node) {
    let mut items = heap.lock();
    let index = items
        .iter()
        .position(|existing| {
            matches!(existing.compare(&node), Ok(Ordering::Greater) | Err(_))
        })
        .unwrap_or(items.len());
    items.insert(index, node);
}

pub fn heap_pop(heap: &HeapRef) -> Option<Node> {
    let mut items = heap.lock();
    if items.is_empty() {
        None
    } else {
        Some(items.remove(0))
    }
}

/// Node-keyed hash table
#[derive(Clone, Default)]
pub struct NodeHash {
    entries: FxHashMap<HashKey, (Node, Node)>,
}

impl NodeHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails when the key is unhashable
    pub fn insert(&mut self, key: Node, value: Node) -> Result<(), CompareError> {
        let hash_key = key.hash_key().ok_or(CompareError::Failure)?;
        self.entries.insert(hash_key, (key, value));
        Ok(())
    }

    pub fn get(&self, key: &Node) -> Option<Node> {
        let hash_key = key.hash_key()?;
        self.entries.get(&hash_key).map(|(_, value)| value.clone())
    }

    pub fn remove(&mut self, key: &Node) -> Option<Node> {
        let hash_key = key.hash_key()?;
        self.entries.remove(&hash_key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&Node, &Node)> {
        self.entries.values().map(|(key, value)| (key, value))
    }

    pub(super) fn copy(&self, depth: Depth) -> NodeHash {
        let entries = self
            .entries
            .iter()
            .map(|(hash_key, (key, value))| {
                let value = match depth {
                    Depth::Deep => value.copy(Depth::Deep),
                    _ => value.clone(),
                };
                (hash_key.clone(), (key.clone(), value))
            })
            .collect();
        NodeHash { entries }
    }

    pub(super) fn drain_nodes(&mut self) -> impl Iterator<Item = Node> + '_ {
        self.entries
            .drain()
            .flat_map(|(_, (key, value))| [key, value])
    }

    pub(super) fn for_each_node(&self, visit: &mut dyn FnMut(&Node)) {
        for (key, value) in self.entries.values() {
            visit(key);
            visit(value);
        }
    }

    /// Hashes are unordered: equal contents compare Equal, otherwise by size,
    /// and unequal tables of the same size compare Less
    pub(super) fn compare(&self, other: &NodeHash) -> Result<Ordering, CompareError> {
        if self.len() != other.len() {
            return Ok(self.len().cmp(&other.len()));
        }
        for (hash_key, (_, value)) in &self.entries {
            match other.entries.get(hash_key) {
                Some((_, theirs)) => {
                    if value.compare(theirs)? != Ordering::Equal {
                        return Ok(Ordering::Less);
                    }
                }
                None => return Ok(Ordering::Less),
            }
        }
        Ok(Ordering::Equal)
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .pairs()
            .map(|(key, value)| format!("{} => {}", key, value))
            .collect();
        write!(f, "({})", items.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_insert_get_remove() {
        let mut hash = NodeHash::new();
        hash.insert(Node::String("a".into()), Node::Int64(1)).expect("hashable");
        hash.insert(Node::Int64(2), Node::Int64(4)).expect("hashable");
        assert_eq!(hash.len(), 2);
        assert_eq!(hash.get(&Node::Float(2.0)).and_then(|n| n.as_i64()), Some(4));
        assert!(hash.remove(&Node::String("a".into())).is_some());
        assert_eq!(hash.len(), 1);
    }

    #[test]
    fn test_hash_rejects_container_keys() {
        let mut hash = NodeHash::new();
        let key = Node::Array(Container::new(Vec::new()));
        assert_eq!(hash.insert(key, Node::Int64(1)), Err(CompareError::Failure));
    }

    #[test]
    fn test_heap_orders_smallest_first() {
        let heap: HeapRef = Container::new(Vec::new());
        for n in [5, 1, 3] {
            heap_push(&heap, Node::Int64(n));
        }
        let popped: Vec<i64> = std::iter::from_fn(|| heap_pop(&heap))
            .filter_map(|n| n.as_i64())
            .collect();
        assert_eq!(popped, vec![1, 3, 5]);
    }
}
