// Taffy Garbage Collector
// Cycle collector running alongside Arc reference counting.
//
// Registered class objects are tracked through weak handles. A collection
// counts, for every tracked object, how many of its strong handles come from
// other tracked objects. Handles left over are held by something outside the
// object graph (an evaluator, a scope, the registry) and make the object a
// root. Everything not reachable from a root is part of a dead cycle and has
// its contents released, which lets reference counting free it.
//
// Collection is stop-the-world: evaluators announce themselves with
// `node_evaluator_up` / `node_evaluator_down` and poll `safe_point` between
// statements. A thread about to block steps down through `blocking`.

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::class::{ClassObject, ClassRef};
use crate::evaluator::FatalError;
use crate::node::{Node, NodeFlags};
use crate::runtime::config::GcConfig;

/// Registrations between collections before the first adjustment
pub const INITIAL_THRESHOLD: usize = 10_000;
const HEAP_GROW_FACTOR: f64 = 1.5;

/// GC statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Total objects ever tracked
    pub total_tracked: usize,
    /// Objects released because they were only reachable from dead cycles
    pub cycles_broken: usize,
    /// Objects tracked after the last collection
    pub tracked_count: usize,
    pub collections: usize,
}

struct GcHeap {
    tracked: FxHashMap<usize, Weak<ClassObject>>,
    threshold: usize,
    stats: GcStats,
}

#[derive(Default)]
struct GcState {
    /// Evaluators currently up
    running: usize,
    collecting: bool,
}

pub struct Gc {
    heap: Mutex<GcHeap>,
    state: Mutex<GcState>,
    changed: Condvar,
    collecting: AtomicBool,
    since_collection: AtomicUsize,
    enabled: bool,
    always: bool,
    memory_limit: Option<usize>,
}

impl Gc {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            heap: Mutex::new(GcHeap {
                tracked: FxHashMap::default(),
                threshold: config.threshold.max(1),
                stats: GcStats::default(),
            }),
            state: Mutex::new(GcState::default()),
            changed: Condvar::new(),
            collecting: AtomicBool::new(false),
            since_collection: AtomicUsize::new(0),
            enabled: config.enabled,
            always: config.always,
            memory_limit: config.memory_limit,
        }
    }

    /// Hand a node to the collector. Only class objects are tracked; raw
    /// containers always live inside one.
    pub fn register(&self, node: &Node) {
        if let Node::Class(object) = node {
            self.register_object(object);
        }
    }

    pub fn register_object(&self, object: &ClassRef) {
        if object.header().contains(NodeFlags::REGISTERED) {
            return;
        }
        object.header().insert(NodeFlags::REGISTERED);
        {
            let mut heap = self.heap.lock();
            heap.tracked.insert(object.identity(), Arc::downgrade(object));
            heap.stats.total_tracked += 1;
        }
        self.since_collection.fetch_add(1, Ordering::Relaxed);

        if let Some(register) = object.template().native.and_then(|hooks| hooks.register) {
            register(object, self);
        }
    }

    pub fn stats(&self) -> GcStats {
        let heap = self.heap.lock();
        GcStats {
            tracked_count: heap.tracked.len(),
            ..heap.stats.clone()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn should_collect(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if self.always {
            return true;
        }
        self.since_collection.load(Ordering::Relaxed) > self.heap.lock().threshold
    }

    // ==================== Evaluator cooperation ====================

    pub fn node_evaluator_up(&self) {
        let mut state = self.state.lock();
        while state.collecting {
            self.changed.wait(&mut state);
        }
        state.running += 1;
    }

    pub fn node_evaluator_down(&self) {
        let mut state = self.state.lock();
        state.running = state.running.saturating_sub(1);
        self.changed.notify_all();
    }

    /// Run `f` stepped down, so a collection may proceed while it blocks
    pub fn blocking<T>(&self, f: impl FnOnce() -> T) -> T {
        self.node_evaluator_down();
        let result = f();
        self.node_evaluator_up();
        result
    }

    /// Called by an up evaluator between statements. Waits out a collection
    /// in progress, or runs one when enough objects were registered.
    pub fn safe_point(&self) -> Result<(), FatalError> {
        if self.collecting.load(Ordering::Acquire) {
            self.blocking(|| ());
            return Ok(());
        }
        if self.should_collect() {
            return self.collect_stopped();
        }
        Ok(())
    }

    /// Collect now from an up evaluator, whatever the threshold says
    pub fn request_collection(&self) -> Result<(), FatalError> {
        if !self.enabled {
            return Ok(());
        }
        self.collect_stopped()
    }

    fn collect_stopped(&self) -> Result<(), FatalError> {
        {
            let mut state = self.state.lock();
            state.running = state.running.saturating_sub(1);
            if state.collecting {
                self.changed.notify_all();
                while state.collecting {
                    self.changed.wait(&mut state);
                }
                state.running += 1;
                return Ok(());
            }
            state.collecting = true;
            self.collecting.store(true, Ordering::Release);
            while state.running > 0 {
                self.changed.wait(&mut state);
            }
        }

        self.sweep();

        {
            let mut state = self.state.lock();
            state.collecting = false;
            self.collecting.store(false, Ordering::Release);
            state.running += 1;
            self.changed.notify_all();
        }

        match self.memory_limit {
            Some(limit) => {
                let live = self.heap.lock().tracked.len();
                if live > limit {
                    return Err(FatalError::OutOfMemory { live, limit });
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    // ==================== Collection ====================

    /// Collect from a thread that runs no evaluator: waits until every up
    /// evaluator has stepped down at a safe point, holds them there while
    /// sweeping, then lets them go. Returns the number of objects whose
    /// contents were released.
    pub fn collect(&self) -> usize {
        {
            let mut state = self.state.lock();
            while state.collecting {
                self.changed.wait(&mut state);
            }
            state.collecting = true;
            self.collecting.store(true, Ordering::Release);
            while state.running > 0 {
                self.changed.wait(&mut state);
            }
        }

        let broken = self.sweep();

        let mut state = self.state.lock();
        state.collecting = false;
        self.collecting.store(false, Ordering::Release);
        self.changed.notify_all();
        broken
    }

    /// Every evaluator must be stopped
    fn sweep(&self) -> usize {
        let mut heap = self.heap.lock();
        heap.tracked.retain(|_, object| object.strong_count() > 0);

        let live: Vec<ClassRef> = heap.tracked.values().filter_map(Weak::upgrade).collect();
        let index: FxHashMap<usize, usize> = live
            .iter()
            .enumerate()
            .map(|(i, object)| (object.identity(), i))
            .collect();

        // Phase 1: strong handles, minus the one we hold
        let mut refs: Vec<isize> = live
            .iter()
            .map(|object| Arc::strong_count(object) as isize - 1)
            .collect();

        // Phase 2: subtract handles coming from tracked objects, following
        // exclusively owned untracked nodes in between
        for object in &live {
            let mut worklist = children_of(&Node::Class(object.clone()));
            while let Some(child) = worklist.pop() {
                if let Some(&i) = child_identity(&child).and_then(|id| index.get(&id)) {
                    refs[i] -= 1;
                } else if is_exclusive(&child) {
                    worklist.extend(children_of(&child));
                }
            }
        }

        // Phase 3: mark from the roots
        let mut reachable = vec![false; live.len()];
        let mut visited: FxHashSet<usize> = FxHashSet::default();
        let mut worklist: Vec<Node> = live
            .iter()
            .zip(&refs)
            .filter(|(_, &count)| count > 0)
            .map(|(object, _)| Node::Class(object.clone()))
            .collect();
        while let Some(node) = worklist.pop() {
            if let Some(id) = child_identity(&node) {
                if !visited.insert(id) {
                    continue;
                }
                if let Some(&i) = index.get(&id) {
                    reachable[i] = true;
                }
            }
            worklist.extend(children_of(&node));
        }

        // Phase 4: break dead cycles
        let mut broken = 0;
        for (object, reachable) in live.iter().zip(&reachable) {
            if !reachable {
                object.release_contents();
                broken += 1;
            }
        }
        drop(live);
        heap.tracked.retain(|_, object| object.strong_count() > 0);

        heap.stats.collections += 1;
        heap.stats.cycles_broken += broken;
        heap.stats.tracked_count = heap.tracked.len();
        let grown = (heap.tracked.len() as f64 * HEAP_GROW_FACTOR) as usize;
        heap.threshold = grown.max(INITIAL_THRESHOLD);
        self.since_collection.store(0, Ordering::Relaxed);

        debug!(
            tracked = heap.tracked.len(),
            broken,
            collections = heap.stats.collections,
            "gc collection finished"
        );
        broken
    }
}

fn children_of(node: &Node) -> Vec<Node> {
    let mut children = Vec::new();
    node.for_each_child(&mut |child| children.push(child.clone()));
    children
}

fn child_identity(node: &Node) -> Option<usize> {
    match node {
        Node::Class(object) => Some(object.identity()),
        other => other.identity(),
    }
}

/// Held only by its parent and by the worklist entry being examined
fn is_exclusive(node: &Node) -> bool {
    let count = match node {
        Node::Array(c) | Node::Heap(c) => Arc::strong_count(c),
        Node::Hash(c) => Arc::strong_count(c),
        Node::List(c) => Arc::strong_count(c),
        Node::Pair(c) => Arc::strong_count(c),
        Node::Scope(s) => Arc::strong_count(s),
        Node::ScopeData(d) => Arc::strong_count(d),
        Node::Class(c) => Arc::strong_count(c),
        _ => return false,
    };
    count == 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassFlags, ClassTemplate};
    use crate::scope::ScopeFlags;

    fn template() -> Arc<ClassTemplate> {
        let template = Arc::new(ClassTemplate::new("t", "Cell", None, ClassFlags::empty()));
        template.declare_variable("@next", Node::Int64(0), ScopeFlags::empty());
        template
    }

    fn gc() -> Gc {
        Gc::new(&GcConfig::default())
    }

    #[test]
    fn test_gc_register_marks_and_counts() {
        let gc = gc();
        let object = ClassObject::new_instance(&template());
        gc.register_object(&object);
        gc.register_object(&object);
        assert!(object.header().contains(NodeFlags::REGISTERED));
        assert_eq!(gc.stats().total_tracked, 1);
    }

    #[test]
    fn test_gc_breaks_unreachable_cycle() {
        let gc = gc();
        let template = template();
        let weak_a = {
            let a = ClassObject::new_instance(&template);
            let b = ClassObject::new_instance(&template);
            a.set_variable("@next", Node::Class(b.clone()));
            b.set_variable("@next", Node::Class(a.clone()));
            gc.register_object(&a);
            gc.register_object(&b);
            Arc::downgrade(&a)
        };
        assert!(weak_a.upgrade().is_some());
        assert_eq!(gc.collect(), 2);
        assert!(weak_a.upgrade().is_none());
        assert_eq!(gc.stats().tracked_count, 0);
    }

    #[test]
    fn test_gc_keeps_externally_held_cycle() {
        let gc = gc();
        let template = template();
        let a = ClassObject::new_instance(&template);
        let b = ClassObject::new_instance(&template);
        a.set_variable("@next", Node::Class(b.clone()));
        b.set_variable("@next", Node::Class(a.clone()));
        gc.register_object(&a);
        gc.register_object(&b);
        drop(b);

        assert_eq!(gc.collect(), 0);
        let next = a.get_variable("@next").and_then(|n| n.as_class().cloned());
        assert!(next.is_some());
        assert_eq!(gc.stats().collections, 1);
    }

    #[test]
    fn test_gc_cycle_through_untracked_container() {
        let gc = gc();
        let template = template();
        let weak = {
            let a = ClassObject::new_instance(&template);
            let array = Node::Array(crate::node::Container::new(vec![Node::Class(a.clone())]));
            a.set_variable("@next", array);
            gc.register_object(&a);
            Arc::downgrade(&a)
        };
        assert_eq!(gc.collect(), 1);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_gc_stop_the_world_single_thread() {
        let gc = Gc::new(&GcConfig {
            always: true,
            ..GcConfig::default()
        });
        gc.node_evaluator_up();
        gc.safe_point().unwrap();
        gc.safe_point().unwrap();
        assert_eq!(gc.stats().collections, 2);
        gc.node_evaluator_down();
    }

    #[test]
    fn test_gc_collect_waits_for_running_evaluator() {
        use std::sync::atomic::AtomicBool;
        use std::thread;

        let gc = Arc::new(gc());
        gc.node_evaluator_up();
        let finished = Arc::new(AtomicBool::new(false));
        let collector = {
            let gc = gc.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                gc.collect();
                finished.store(true, Ordering::SeqCst);
            })
        };

        while !gc.collecting.load(Ordering::Acquire) {
            thread::yield_now();
        }
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(gc.stats().collections, 0);

        // steps down until the collection is over
        gc.safe_point().unwrap();
        collector.join().unwrap();
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(gc.stats().collections, 1);
        gc.node_evaluator_down();
    }

    #[test]
    fn test_gc_memory_limit() {
        let gc = Gc::new(&GcConfig {
            memory_limit: Some(0),
            ..GcConfig::default()
        });
        let object = ClassObject::new_instance(&template());
        gc.register_object(&object);
        gc.node_evaluator_up();
        let result = gc.request_collection();
        gc.node_evaluator_down();
        assert!(matches!(result, Err(FatalError::OutOfMemory { live: 1, limit: 0 })));
    }
}
