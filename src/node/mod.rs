// Taffy Object Node
// The universal tagged value: primitives, containers, scope machinery,
// syntax-tree nodes and class instances all travel as a `Node`.
//
// Heap variants share their payload through `Arc`; the collector-facing
// flags (registered, marked, template, trapped) live in a `NodeHeader`
// embedded in the payload so every clone of a handle sees the same flags.

pub mod container;

use bitflags::bitflags;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::class::{ClassRef, ClassTemplate, Method, PackageContents};
use crate::evaluator::CallStackData;
use crate::graph::GraphRef;
use crate::scope::{Scope, ScopeEntry, ScopeRef};

pub use container::{ArrayRef, Container, HashRef, HeapRef, ListRef, NodeHash, PairRef};

bitflags! {
    /// Collector-facing state of a heap node
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u8 {
        /// Owned by the garbage collector; never released by hand
        const REGISTERED = 1 << 0;
        /// Mark in progress, guards recursion on cyclic graphs
        const MARKED = 1 << 1;
        /// Unshared value, copied on first use
        const TEMPLATE = 1 << 2;
        /// Debug trap
        const TRAPPED = 1 << 3;
    }
}

/// Atomic flag word shared by every handle to a heap node
pub struct NodeHeader {
    flags: AtomicU8,
}

impl NodeHeader {
    pub fn new(flags: NodeFlags) -> Self {
        Self {
            flags: AtomicU8::new(flags.bits()),
        }
    }

    pub fn flags(&self) -> NodeFlags {
        NodeFlags::from_bits_truncate(self.flags.load(AtomicOrdering::Acquire))
    }

    pub fn contains(&self, flags: NodeFlags) -> bool {
        self.flags().contains(flags)
    }

    pub fn insert(&self, flags: NodeFlags) {
        self.flags.fetch_or(flags.bits(), AtomicOrdering::AcqRel);
    }

    pub fn remove(&self, flags: NodeFlags) {
        self.flags.fetch_and(!flags.bits(), AtomicOrdering::AcqRel);
    }

    /// Set MARKED; false when a mark of this node is already in progress
    pub fn begin_mark(&self) -> bool {
        let previous = self
            .flags
            .fetch_or(NodeFlags::MARKED.bits(), AtomicOrdering::AcqRel);
        previous & NodeFlags::MARKED.bits() == 0
    }

    pub fn end_mark(&self) {
        self.remove(NodeFlags::MARKED);
    }
}

impl Default for NodeHeader {
    fn default() -> Self {
        Self::new(NodeFlags::empty())
    }
}

impl fmt::Debug for NodeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.flags())
    }
}

/// How far a copy or a release reaches into a node's children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Share the node itself; no ownership changes hands
    Floating,
    /// The container shell only; children are shared or left alone
    Shallow,
    /// The container and, recursively, every unregistered child
    Deep,
}

/// Why two nodes could not be ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareError {
    /// The nodes are not comparable (type mismatch)
    Failure,
    /// A user-defined comparison raised; the evaluator's exception slot is set
    Exception,
}

/// Key under which a node is stored in a `Hash`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Integer(i64),
    Float(u64),
    Text(Arc<str>),
    Symbol(Arc<str>),
    Identity(usize),
}

/// Every runtime datum
#[derive(Clone)]
pub enum Node {
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    Float(f64),
    String(Arc<str>),
    Symbol(Arc<str>),
    Array(ArrayRef),
    Hash(HashRef),
    List(ListRef),
    Pair(PairRef),
    Heap(HeapRef),
    Scope(ScopeRef),
    ScopeData(Arc<ScopeEntry>),
    CallStackData(Arc<CallStackData>),
    Graph(GraphRef),
    Class(ClassRef),
    ClassTemplate(Arc<ClassTemplate>),
    PackageContents(Arc<PackageContents>),
    Method(Arc<Method>),
}

impl Node {
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Int32(_) => "Int32",
            Node::UInt32(_) => "UInt32",
            Node::Int64(_) => "Int64",
            Node::Float(_) => "Float",
            Node::String(_) => "String",
            Node::Symbol(_) => "Symbol",
            Node::Array(_) => "Array",
            Node::Hash(_) => "Hash",
            Node::List(_) => "List",
            Node::Pair(_) => "Pair",
            Node::Heap(_) => "Heap",
            Node::Scope(_) => "Scope",
            Node::ScopeData(_) => "ScopeData",
            Node::CallStackData(_) => "CallStackData",
            Node::Graph(_) => "GraphData",
            Node::Class(_) => "Class",
            Node::ClassTemplate(_) => "ClassTemplate",
            Node::PackageContents(_) => "PackageContents",
            Node::Method(_) => "Method",
        }
    }

    pub fn header(&self) -> Option<&NodeHeader> {
        match self {
            Node::Array(c) | Node::Heap(c) => Some(c.header()),
            Node::Hash(c) => Some(c.header()),
            Node::List(c) => Some(c.header()),
            Node::Pair(c) => Some(c.header()),
            Node::Class(c) => Some(c.header()),
            _ => None,
        }
    }

    /// Raw containers must never be stored directly in a scope
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Node::Array(_) | Node::Hash(_) | Node::List(_) | Node::Pair(_) | Node::Heap(_)
        )
    }

    pub fn is_registered(&self) -> bool {
        self.header()
            .map_or(false, |h| h.contains(NodeFlags::REGISTERED))
    }

    pub fn is_template(&self) -> bool {
        self.header().map_or(false, |h| h.contains(NodeFlags::TEMPLATE))
    }

    pub fn as_class(&self) -> Option<&ClassRef> {
        match self {
            Node::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn as_graph(&self) -> Option<&GraphRef> {
        match self {
            Node::Graph(graph) => Some(graph),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Node::Int32(n) => Some(*n as f64),
            Node::UInt32(n) => Some(*n as f64),
            Node::Int64(n) => Some(*n as f64),
            Node::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Int32(n) => Some(*n as i64),
            Node::UInt32(n) => Some(*n as i64),
            Node::Int64(n) => Some(*n),
            Node::Float(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    /// Address of the shared payload, for heap variants
    pub fn identity(&self) -> Option<usize> {
        let address = match self {
            Node::Array(c) | Node::Heap(c) => Arc::as_ptr(c) as *const () as usize,
            Node::Hash(c) => Arc::as_ptr(c) as *const () as usize,
            Node::List(c) => Arc::as_ptr(c) as *const () as usize,
            Node::Pair(c) => Arc::as_ptr(c) as *const () as usize,
            Node::Scope(s) => Arc::as_ptr(s) as *const () as usize,
            Node::ScopeData(d) => Arc::as_ptr(d) as *const () as usize,
            Node::CallStackData(d) => Arc::as_ptr(d) as *const () as usize,
            Node::Graph(g) => Arc::as_ptr(g) as *const () as usize,
            Node::Class(c) => Arc::as_ptr(c) as *const () as usize,
            Node::ClassTemplate(t) => Arc::as_ptr(t) as *const () as usize,
            Node::PackageContents(p) => Arc::as_ptr(p) as *const () as usize,
            Node::Method(m) => Arc::as_ptr(m) as *const () as usize,
            _ => return None,
        };
        Some(address)
    }

    /// Same object (heap variants) or same value (primitives)
    pub fn is_same(&self, other: &Node) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.compare(other) == Ok(Ordering::Equal),
            _ => false,
        }
    }

    pub fn copy(&self, depth: Depth) -> Node {
        if depth == Depth::Floating {
            return self.clone();
        }

        match self {
            Node::Array(c) => Node::Array(container::copy_sequence(c, depth)),
            Node::Heap(c) => Node::Heap(container::copy_sequence(c, depth)),
            Node::List(c) => {
                let items = c.lock().iter().map(|n| child_copy(n, depth)).collect();
                Node::List(Container::new(items))
            }
            Node::Hash(c) => Node::Hash(Container::new(c.lock().copy(depth))),
            Node::Pair(c) => {
                let (left, right) = &*c.lock();
                Node::Pair(Container::new((
                    child_copy(left, depth),
                    child_copy(right, depth),
                )))
            }
            Node::Scope(scope) => {
                let copied: Scope = scope.lock().copy(depth);
                Node::Scope(copied.into_ref())
            }
            // Collector-owned objects and singletons are shared, never duplicated
            Node::Class(class)
                if class.header().contains(NodeFlags::REGISTERED) || class.template().is_singleton() =>
            {
                self.clone()
            }
            Node::Class(class) => Node::Class(class.copy(depth)),
            other => other.clone(),
        }
    }

    /// Give up this handle's claim on its children.
    ///
    /// Registered nodes belong to the collector and are left untouched.
    pub fn release(&self, depth: Depth) {
        if depth == Depth::Floating || self.is_registered() {
            return;
        }

        let deep = depth == Depth::Deep;
        let mut drained: Vec<Node> = Vec::new();
        match self {
            Node::Array(c) | Node::Heap(c) => drained.extend(c.lock().drain(..)),
            Node::List(c) => drained.extend(c.lock().drain(..)),
            Node::Hash(c) => drained.extend(c.lock().drain_nodes()),
            Node::Pair(c) => {
                let mut pair = c.lock();
                let left = std::mem::replace(&mut pair.0, Node::Int32(0));
                let right = std::mem::replace(&mut pair.1, Node::Int32(0));
                drained.push(left);
                drained.push(right);
            }
            Node::Scope(scope) if deep => {
                drained.extend(scope.lock().drain().map(|(_, entry)| entry.object));
            }
            Node::Class(class) if deep => class.release_contents(),
            _ => {}
        }

        if deep {
            for child in drained {
                child.release(Depth::Deep);
            }
        }
    }

    /// Visit direct children
    pub fn for_each_child(&self, visit: &mut dyn FnMut(&Node)) {
        match self {
            Node::Array(c) | Node::Heap(c) => c.lock().iter().for_each(|n| visit(n)),
            Node::List(c) => c.lock().iter().for_each(|n| visit(n)),
            Node::Hash(c) => c.lock().for_each_node(visit),
            Node::Pair(c) => {
                let pair = c.lock();
                visit(&pair.0);
                visit(&pair.1);
            }
            Node::Scope(scope) => scope.lock().for_each_object(visit),
            Node::ScopeData(entry) => visit(&entry.object),
            Node::Class(class) => class.for_each_child(visit),
            _ => {}
        }
    }

    /// Depth-first mark, guarded against cycles by the MARKED flag
    pub fn mark(&self, visit: &mut dyn FnMut(&Node)) {
        visit(self);
        let header = self.header();
        if let Some(header) = header {
            if !header.begin_mark() {
                return;
            }
        }
        self.for_each_child(&mut |child| child.mark(visit));
        if let Some(header) = header {
            header.end_mark();
        }
    }

    /// Structural ordering; class instances compare through their native payload
    pub fn compare(&self, other: &Node) -> Result<Ordering, CompareError> {
        if let (Some(a), Some(b)) = (self.identity(), other.identity()) {
            if a == b {
                return Ok(Ordering::Equal);
            }
        }

        match (self, other) {
            (Node::Int32(_) | Node::UInt32(_) | Node::Int64(_), Node::Int32(_) | Node::UInt32(_) | Node::Int64(_)) => {
                match (self.as_i64(), other.as_i64()) {
                    (Some(a), Some(b)) => Ok(a.cmp(&b)),
                    _ => Err(CompareError::Failure),
                }
            }
            (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => {
                let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                a.partial_cmp(&b).ok_or(CompareError::Failure)
            }
            (Node::String(a), Node::String(b)) => Ok(a.cmp(b)),
            (Node::Symbol(a), Node::Symbol(b)) => Ok(a.cmp(b)),
            (Node::Array(a), Node::Array(b)) | (Node::Heap(a), Node::Heap(b)) => {
                let (a, b) = (a.lock().clone(), b.lock().clone());
                compare_sequences(a.iter(), b.iter(), a.len(), b.len())
            }
            (Node::List(a), Node::List(b)) => {
                let (a, b) = (a.lock().clone(), b.lock().clone());
                compare_sequences(a.iter(), b.iter(), a.len(), b.len())
            }
            (Node::Pair(a), Node::Pair(b)) => {
                let (a, b) = (a.lock().clone(), b.lock().clone());
                match a.0.compare(&b.0)? {
                    Ordering::Equal => a.1.compare(&b.1),
                    ordering => Ok(ordering),
                }
            }
            (Node::Hash(a), Node::Hash(b)) => {
                let (a, b) = (a.lock().clone(), b.lock().clone());
                a.compare(&b)
            }
            (Node::Class(a), Node::Class(b)) => match (a.aux(), b.aux()) {
                (Some(left), Some(right)) => left.compare(&right),
                _ => Err(CompareError::Failure),
            },
            _ => Err(CompareError::Failure),
        }
    }

    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Node::Int32(_) | Node::UInt32(_) | Node::Int64(_) => self.as_i64().map(HashKey::Integer),
            Node::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(HashKey::Integer(*f as i64)),
            Node::Float(f) => Some(HashKey::Float(f.to_bits())),
            Node::String(s) => Some(HashKey::Text(s.clone())),
            Node::Symbol(s) => Some(HashKey::Symbol(s.clone())),
            Node::Class(class) => match class.aux() {
                Some(aux) => aux.hash_key(),
                None => self.identity().map(HashKey::Identity),
            },
            Node::Array(_) | Node::Hash(_) | Node::List(_) | Node::Pair(_) | Node::Heap(_) => None,
            other => other.identity().map(HashKey::Identity),
        }
    }
}

fn child_copy(node: &Node, depth: Depth) -> Node {
    match depth {
        Depth::Deep => node.copy(Depth::Deep),
        _ => node.clone(),
    }
}

fn compare_sequences<'a>(
    a: impl Iterator<Item = &'a Node>,
    b: impl Iterator<Item = &'a Node>,
    a_len: usize,
    b_len: usize,
) -> Result<Ordering, CompareError> {
    for (left, right) in a.zip(b) {
        match left.compare(right)? {
            Ordering::Equal => continue,
            ordering => return Ok(ordering),
        }
    }
    Ok(a_len.cmp(&b_len))
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Int32(n) => write!(f, "{}", n),
            Node::UInt32(n) => write!(f, "{}", n),
            Node::Int64(n) => write!(f, "{}", n),
            Node::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Node::String(s) => write!(f, "{}", s),
            Node::Symbol(s) => write!(f, "#{}", s),
            Node::Array(c) | Node::Heap(c) => {
                let items: Vec<String> = c.lock().iter().map(|n| n.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Node::List(c) => {
                let items: Vec<String> = c.lock().iter().map(|n| n.to_string()).collect();
                write!(f, "<{}>", items.join(", "))
            }
            Node::Hash(c) => write!(f, "{}", c.lock()),
            Node::Pair(c) => {
                let pair = c.lock();
                write!(f, "({}, {})", pair.0, pair.1)
            }
            Node::Scope(s) => write!(f, "<scope of {}>", s.lock().len()),
            Node::ScopeData(entry) => write!(f, "<scope data {}>", entry.object),
            Node::CallStackData(data) => write!(f, "{}", data),
            Node::Graph(graph) => write!(f, "<graph {}>", graph.kind_name()),
            Node::Class(class) => write!(f, "{}", class),
            Node::ClassTemplate(t) => write!(f, "<template {}>", t.full_name()),
            Node::PackageContents(p) => write!(f, "<package {}>", p.name()),
            Node::Method(m) => write!(f, "<method {}>", m.selector),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(items: Vec<Node>) -> Node {
        Node::Array(Container::new(items))
    }

    #[test]
    fn test_node_header_mark_guard() {
        let header = NodeHeader::default();
        assert!(header.begin_mark());
        assert!(!header.begin_mark());
        header.end_mark();
        assert!(header.begin_mark());
    }

    #[test]
    fn test_node_copy_depths() {
        let inner = array(vec![Node::Int64(1)]);
        let outer = array(vec![inner.clone()]);

        let floating = outer.copy(Depth::Floating);
        assert!(floating.is_same(&outer));

        let shallow = outer.copy(Depth::Shallow);
        assert!(!shallow.is_same(&outer));
        let Node::Array(shallow_items) = &shallow else { panic!("array") };
        assert!(shallow_items.lock()[0].is_same(&inner));

        let deep = outer.copy(Depth::Deep);
        let Node::Array(deep_items) = &deep else { panic!("array") };
        assert!(!deep_items.lock()[0].is_same(&inner));
        assert_eq!(deep.compare(&outer), Ok(Ordering::Equal));
    }

    #[test]
    fn test_node_release_skips_registered() {
        let child = array(vec![Node::Int64(7)]);
        let parent = array(vec![child.clone()]);
        child
            .header()
            .expect("header")
            .insert(NodeFlags::REGISTERED);

        parent.release(Depth::Deep);

        let Node::Array(parent_items) = &parent else { panic!("array") };
        let Node::Array(child_items) = &child else { panic!("array") };
        assert!(parent_items.lock().is_empty());
        assert_eq!(child_items.lock().len(), 1);
    }

    #[test]
    fn test_node_release_floating_is_noop() {
        let node = array(vec![Node::Int64(1), Node::Int64(2)]);
        node.release(Depth::Floating);
        let Node::Array(items) = &node else { panic!("array") };
        assert_eq!(items.lock().len(), 2);
    }

    #[test]
    fn test_node_mark_terminates_on_cycle() {
        let a = Container::new(Vec::new());
        let b = Container::new(vec![Node::Array(a.clone())]);
        a.lock().push(Node::Array(b.clone()));

        let mut visits = 0;
        Node::Array(a.clone()).mark(&mut |_| visits += 1);
        assert_eq!(visits, 3);
        assert!(!a.header().contains(NodeFlags::MARKED));

        // break the cycle so the test doesn't leak
        a.lock().clear();
    }

    #[test]
    fn test_node_compare_mixed_numbers() {
        assert_eq!(Node::Int32(3).compare(&Node::Float(3.0)), Ok(Ordering::Equal));
        assert_eq!(Node::Int64(2).compare(&Node::Int32(5)), Ok(Ordering::Less));
        assert_eq!(
            Node::String("a".into()).compare(&Node::Int64(1)),
            Err(CompareError::Failure)
        );
    }

    #[test]
    fn test_node_hash_key_unifies_integral_floats() {
        assert_eq!(Node::Float(4.0).hash_key(), Node::Int64(4).hash_key());
        assert!(array(vec![]).hash_key().is_none());
    }
}
