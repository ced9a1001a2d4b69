// Taffy Scope
// Name -> (object, flags) storage for locals, instance variables, methods
// and class state.

pub mod object_stack;

use bitflags::bitflags;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::node::{Depth, Node};

pub use object_stack::{Binding, ObjectStack, ObjectStackList};

bitflags! {
    /// Flags on a scope entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ScopeFlags: u32 {
        const METHOD = 1 << 0;
        const OBJECT = 1 << 1;
        const INSTANCE = 1 << 2;
        const META = 1 << 3;
        const PROTECTED = 1 << 4;
        const PUBLIC = 1 << 5;
        const CONSTANT = 1 << 6;
        /// Shares its bit with LOCAL in class headers
        const GLOBAL = 1 << 7;
        const READER = 1 << 8;
        const WRITER = 1 << 9;
        /// A method that does not swallow an enclosing `return`
        const BREAKTHROUGH = 1 << 10;
        const SYNCHRONIZED = 1 << 11;
        const SYNCHRONIZED_READ = 1 << 12;
        const SYNCHRONIZED_WRITE = 1 << 13;
        const CONTAINER_LOOP = 1 << 14;
        const MODIFIES_CONTAINER = 1 << 15;
        const CONST = 1 << 16;
        const NO_CAST = 1 << 17;
        const GETTER = 1 << 18;
    }
}

/// One binding in a scope
#[derive(Clone, Debug)]
pub struct ScopeEntry {
    pub object: Node,
    pub flags: ScopeFlags,
}

impl ScopeEntry {
    pub fn new(object: Node, flags: ScopeFlags) -> Self {
        Self { object, flags }
    }

    pub fn is_method(&self) -> bool {
        self.flags.contains(ScopeFlags::METHOD)
    }

    pub fn is_constant(&self) -> bool {
        self.flags.contains(ScopeFlags::CONSTANT)
    }
}

pub type ScopeRef = Arc<Mutex<Scope>>;

#[derive(Clone, Debug, Default)]
pub struct Scope {
    entries: FxHashMap<Arc<str>, ScopeEntry>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_ref(self) -> ScopeRef {
        Arc::new(Mutex::new(self))
    }

    pub fn new_ref() -> ScopeRef {
        Self::new().into_ref()
    }

    /// Update in place or insert
    pub fn set(&mut self, key: &str, object: Node, flags: ScopeFlags) -> &ScopeEntry {
        debug_assert!(
            !object.is_container(),
            "raw container stored in scope under '{}'",
            key
        );
        let entry = self
            .entries
            .entry(Arc::from(key))
            .and_modify(|entry| {
                entry.object = object.clone();
                entry.flags = flags;
            })
            .or_insert_with(|| ScopeEntry::new(object, flags));
        entry
    }

    pub fn set_method(&mut self, key: &str, method: Node, flags: ScopeFlags) -> &ScopeEntry {
        self.set(key, method, flags | ScopeFlags::METHOD)
    }

    pub fn set_object(&mut self, key: &str, object: Node, flags: ScopeFlags) -> &ScopeEntry {
        self.set(key, object, flags | ScopeFlags::OBJECT)
    }

    /// Replace only the object of an existing entry, keeping its flags
    pub fn update_object(&mut self, key: &str, object: Node) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.object = object;
                true
            }
            None => false,
        }
    }

    /// The entry, when `mask` is empty or intersects its flags
    pub fn get(&self, key: &str, mask: ScopeFlags) -> Option<&ScopeEntry> {
        self.entries
            .get(key)
            .filter(|entry| mask.is_empty() || entry.flags.intersects(mask))
    }

    pub fn get_object(&self, key: &str) -> Option<Node> {
        self.get(key, ScopeFlags::OBJECT).map(|e| e.object.clone())
    }

    pub fn get_method(&self, key: &str) -> Option<&ScopeEntry> {
        self.get(key, ScopeFlags::METHOD)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ScopeEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A scope counts as modified once anything was bound in it
    pub fn is_modified(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &ScopeEntry)> {
        self.entries.iter()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (Arc<str>, ScopeEntry)> + '_ {
        self.entries.drain()
    }

    pub fn for_each_object(&self, visit: &mut dyn FnMut(&Node)) {
        self.entries.values().for_each(|entry| visit(&entry.object));
    }

    pub fn copy(&self, depth: Depth) -> Scope {
        let entries = self
            .entries
            .iter()
            .map(|(key, entry)| {
                let object = match depth {
                    Depth::Deep => entry.object.copy(Depth::Deep),
                    _ => entry.object.clone(),
                };
                (key.clone(), ScopeEntry::new(object, entry.flags))
            })
            .collect();
        Scope { entries }
    }

    /// Copy in every method and object entry of `from`, deep-copying values
    pub fn merge(&mut self, from: &Scope) {
        self.merge_matching(from, ScopeFlags::METHOD | ScopeFlags::OBJECT);
    }

    /// Copy in only the object entries of `from`
    pub fn merge_objects(&mut self, from: &Scope) {
        self.merge_matching(from, ScopeFlags::OBJECT);
    }

    fn merge_matching(&mut self, from: &Scope, mask: ScopeFlags) {
        for (key, entry) in from.entries.iter() {
            if entry.flags.intersects(mask) {
                self.entries.insert(
                    key.clone(),
                    ScopeEntry::new(entry.object.copy(Depth::Deep), entry.flags),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_set_then_get_with_matching_mask() {
        let mut scope = Scope::new();
        scope.set_object("a", Node::Int64(3), ScopeFlags::empty());
        let entry = scope.get("a", ScopeFlags::OBJECT).expect("bound");
        assert!(entry.object.is_same(&Node::Int64(3)));
        assert!(scope.get("a", ScopeFlags::empty()).is_some());
    }

    #[test]
    fn test_scope_get_with_disjoint_mask_finds_nothing() {
        let mut scope = Scope::new();
        scope.set_object("a", Node::Int64(3), ScopeFlags::empty());
        assert!(scope.contains("a"));
        assert!(scope.get("a", ScopeFlags::METHOD).is_none());
    }

    #[test]
    fn test_scope_set_updates_in_place() {
        let mut scope = Scope::new();
        scope.set_object("a", Node::Int64(1), ScopeFlags::empty());
        scope.set("a", Node::Int64(2), ScopeFlags::OBJECT | ScopeFlags::CONSTANT);
        assert_eq!(scope.len(), 1);
        let entry = scope.get("a", ScopeFlags::empty()).expect("bound");
        assert!(entry.is_constant());
        assert_eq!(entry.object.as_i64(), Some(2));
    }

    #[test]
    fn test_scope_merge_and_merge_objects() {
        let mut from = Scope::new();
        from.set_object("@x", Node::Int64(1), ScopeFlags::empty());
        from.set_method("run", Node::String("body".into()), ScopeFlags::empty());
        from.set("loose", Node::Int64(9), ScopeFlags::empty());

        let mut objects_only = Scope::new();
        objects_only.merge_objects(&from);
        assert!(objects_only.contains("@x"));
        assert!(!objects_only.contains("run"));

        let mut both = Scope::new();
        both.merge(&from);
        assert!(both.contains("@x"));
        assert!(both.contains("run"));
        assert!(!both.contains("loose"));
    }

    #[test]
    fn test_scope_is_modified() {
        let mut scope = Scope::new();
        assert!(!scope.is_modified());
        scope.set_object("i", Node::Int64(0), ScopeFlags::empty());
        assert!(scope.is_modified());
    }
}
