// Array, Hash, List and Pair built-in classes
// Each wraps a raw container as its native payload. Elements are always class
// objects handed to the collector before they are stored.

use std::collections::VecDeque;

use super::{integer_arg, invalid_cast, CORE_PACKAGE};
use crate::class::{ClassFlags, ClassObject, ClassRef, ClassTemplate, NativeHooks, NativeMethod, OBJECT_CLASS};
use crate::evaluator::{EvalResult, NodeEvaluator, Unwind};
use crate::node::{ArrayRef, Container, HashRef, ListRef, Node, NodeHash, PairRef};
use crate::runtime::Gc;

// ==================== Shared ====================

/// Children of a freshly registered collection become collector-owned too
fn register_elements(object: &ClassObject, gc: &Gc) {
    if let Some(aux) = object.aux() {
        aux.for_each_child(&mut |child| gc.register(child));
    }
}

fn payload_error(evaluator: &mut NodeEvaluator, recv: &ClassRef, to: &str) -> Unwind {
    invalid_cast(evaluator, &Node::Class(recv.clone()), to)
}

fn index_error(evaluator: &mut NodeEvaluator, index: i64) -> Unwind {
    let index = evaluator.new_integer(index);
    evaluator.throw_named("IndexOutOfBoundsException", &[("@index", index)])
}

/// Position of `index` in a sequence of `len` items
fn checked_index(evaluator: &mut NodeEvaluator, index: i64, len: usize) -> EvalResult<usize> {
    match usize::try_from(index) {
        Ok(position) if position < len => Ok(position),
        _ => Err(index_error(evaluator, index)),
    }
}

/// Linear search using the elements' own `==`
fn contains_equal(evaluator: &mut NodeEvaluator, items: &[Node], wanted: &Node) -> EvalResult<bool> {
    for item in items {
        if evaluator.objects_equal(item, wanted)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn display_sequence(evaluator: &mut NodeEvaluator, items: &[Node], open: &str, close: &str) -> EvalResult<String> {
    let mut shown = Vec::with_capacity(items.len());
    for item in items {
        shown.push(evaluator.display_string(item)?);
    }
    Ok(format!("{}{}{}", open, shown.join(", "), close))
}

// ==================== Array ====================

static ARRAY_HOOKS: NativeHooks = NativeHooks {
    allocate: Some(array_allocate),
    register: Some(register_elements),
    methods: &[
        NativeMethod::new("size", array_size),
        NativeMethod::new("isEmpty", array_is_empty),
        NativeMethod::new("objectAtIndex:", array_object_at_index),
        NativeMethod::new("setObject:atIndex:", array_set_object_at_index),
        NativeMethod::new("add:", array_add),
        NativeMethod::new("pop", array_pop),
        NativeMethod::new("contains:", array_contains),
        NativeMethod::new("asString", array_as_string),
    ],
    ..NativeHooks::EMPTY
};

pub fn create_array_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "Array", Some(OBJECT_CLASS), ClassFlags::empty(), &ARRAY_HOOKS)
}

fn array_allocate(_object: &ClassObject) -> Option<Node> {
    Some(Node::Array(Container::new(Vec::new())))
}

fn array_of(evaluator: &mut NodeEvaluator, recv: &ClassRef) -> EvalResult<ArrayRef> {
    match recv.aux() {
        Some(Node::Array(items)) => Ok(items),
        _ => Err(payload_error(evaluator, recv, "Array")),
    }
}

fn array_size(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let items = array_of(evaluator, recv)?;
    let size = items.lock().len();
    Ok(evaluator.new_integer(size as i64))
}

fn array_is_empty(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let items = array_of(evaluator, recv)?;
    let empty = items.lock().is_empty();
    Ok(evaluator.boolean(empty))
}

/// [a objectAtIndex: i] - zero based
fn array_object_at_index(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let items = array_of(evaluator, recv)?;
    let index = integer_arg(evaluator, &args[0])?;
    let item = usize::try_from(index)
        .ok()
        .and_then(|position| items.lock().get(position).cloned());
    item.ok_or_else(|| index_error(evaluator, index))
}

/// [a setObject: x atIndex: i] - replaces, or appends when i is the size
fn array_set_object_at_index(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let items = array_of(evaluator, recv)?;
    let index = integer_arg(evaluator, &args[1])?;
    let len = items.lock().len();
    let position = checked_index(evaluator, index, len + 1)?;
    let value = evaluator.adopt(args[0].clone());
    let mut items = items.lock();
    match items.get_mut(position) {
        Some(slot) => *slot = value.clone(),
        None => items.push(value.clone()),
    }
    Ok(value)
}

fn array_add(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let items = array_of(evaluator, recv)?;
    let value = evaluator.adopt(args[0].clone());
    items.lock().push(value.clone());
    Ok(value)
}

/// [a pop] - removes the last element; nil when empty
fn array_pop(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let items = array_of(evaluator, recv)?;
    let popped = items.lock().pop();
    Ok(popped.unwrap_or_else(|| evaluator.nil()))
}

fn array_contains(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let items = array_of(evaluator, recv)?;
    let snapshot = items.lock().clone();
    let found = contains_equal(evaluator, &snapshot, &args[0])?;
    Ok(evaluator.boolean(found))
}

fn array_as_string(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let items = array_of(evaluator, recv)?;
    let snapshot = items.lock().clone();
    let shown = display_sequence(evaluator, &snapshot, "[", "]")?;
    Ok(evaluator.new_string(&shown))
}

// ==================== Hash ====================

static HASH_HOOKS: NativeHooks = NativeHooks {
    allocate: Some(hash_allocate),
    register: Some(register_elements),
    methods: &[
        NativeMethod::new("objectForKey:", hash_object_for_key),
        NativeMethod::new("setObject:forKey:", hash_set_object_for_key),
        NativeMethod::new("removeObjectForKey:", hash_remove_object_for_key),
        NativeMethod::new("contains:", hash_contains),
        NativeMethod::new("size", hash_size),
        NativeMethod::new("keys", hash_keys),
        NativeMethod::new("asString", hash_as_string),
    ],
    ..NativeHooks::EMPTY
};

pub fn create_hash_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "Hash", Some(OBJECT_CLASS), ClassFlags::empty(), &HASH_HOOKS)
}

fn hash_allocate(_object: &ClassObject) -> Option<Node> {
    Some(Node::Hash(Container::new(NodeHash::new())))
}

fn hash_of(evaluator: &mut NodeEvaluator, recv: &ClassRef) -> EvalResult<HashRef> {
    match recv.aux() {
        Some(Node::Hash(hash)) => Ok(hash),
        _ => Err(payload_error(evaluator, recv, "Hash")),
    }
}

fn unhashable(evaluator: &mut NodeEvaluator, key: &Node) -> Unwind {
    evaluator.throw_named("InvalidHashValueException", &[("@value", key.clone())])
}

/// [h objectForKey: k] - nil when absent
fn hash_object_for_key(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let hash = hash_of(evaluator, recv)?;
    if args[0].hash_key().is_none() {
        return Err(unhashable(evaluator, &args[0]));
    }
    let found = hash.lock().get(&args[0]);
    Ok(found.unwrap_or_else(|| evaluator.nil()))
}

fn hash_set_object_for_key(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let hash = hash_of(evaluator, recv)?;
    if args[1].hash_key().is_none() {
        return Err(unhashable(evaluator, &args[1]));
    }
    let key = evaluator.adopt(args[1].clone());
    let value = evaluator.adopt(args[0].clone());
    if hash.lock().insert(key.clone(), value.clone()).is_err() {
        return Err(unhashable(evaluator, &key));
    }
    Ok(value)
}

/// [h removeObjectForKey: k] - the removed value, or nil
fn hash_remove_object_for_key(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let hash = hash_of(evaluator, recv)?;
    let removed = hash.lock().remove(&args[0]);
    Ok(removed.unwrap_or_else(|| evaluator.nil()))
}

fn hash_contains(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let hash = hash_of(evaluator, recv)?;
    let found = hash.lock().get(&args[0]).is_some();
    Ok(evaluator.boolean(found))
}

fn hash_size(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let hash = hash_of(evaluator, recv)?;
    let size = hash.lock().len();
    Ok(evaluator.new_integer(size as i64))
}

/// [h keys] - a new Array of the keys, in no particular order
fn hash_keys(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let hash = hash_of(evaluator, recv)?;
    let keys: Vec<Node> = hash.lock().pairs().map(|(key, _)| key.clone()).collect();
    Ok(evaluator.new_array(keys))
}

fn hash_as_string(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let hash = hash_of(evaluator, recv)?;
    let pairs: Vec<(Node, Node)> = hash
        .lock()
        .pairs()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let mut shown = Vec::with_capacity(pairs.len());
    for (key, value) in &pairs {
        let key = evaluator.display_string(key)?;
        let value = evaluator.display_string(value)?;
        shown.push(format!("{} => {}", key, value));
    }
    Ok(evaluator.new_string(&format!("({})", shown.join(", "))))
}

// ==================== List ====================

static LIST_HOOKS: NativeHooks = NativeHooks {
    allocate: Some(list_allocate),
    register: Some(register_elements),
    methods: &[
        NativeMethod::new("add:", list_add),
        NativeMethod::new("push:", list_push),
        NativeMethod::new("pop", list_pop),
        NativeMethod::new("shift", list_shift),
        NativeMethod::new("size", list_size),
        NativeMethod::new("objectAtIndex:", list_object_at_index),
        NativeMethod::new("asString", list_as_string),
    ],
    ..NativeHooks::EMPTY
};

pub fn create_list_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "List", Some(OBJECT_CLASS), ClassFlags::empty(), &LIST_HOOKS)
}

fn list_allocate(_object: &ClassObject) -> Option<Node> {
    Some(Node::List(Container::new(VecDeque::new())))
}

fn list_of(evaluator: &mut NodeEvaluator, recv: &ClassRef) -> EvalResult<ListRef> {
    match recv.aux() {
        Some(Node::List(items)) => Ok(items),
        _ => Err(payload_error(evaluator, recv, "List")),
    }
}

/// [l add: x] - appends at the back
fn list_add(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let items = list_of(evaluator, recv)?;
    let value = evaluator.adopt(args[0].clone());
    items.lock().push_back(value.clone());
    Ok(value)
}

/// [l push: x] - prepends at the front
fn list_push(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let items = list_of(evaluator, recv)?;
    let value = evaluator.adopt(args[0].clone());
    items.lock().push_front(value.clone());
    Ok(value)
}

fn empty_list(evaluator: &mut NodeEvaluator) -> Unwind {
    evaluator.throw_named("EmptyListException", &[])
}

/// [l pop] - removes the front element
fn list_pop(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let items = list_of(evaluator, recv)?;
    let popped = items.lock().pop_front();
    popped.ok_or_else(|| empty_list(evaluator))
}

/// [l shift] - removes the back element
fn list_shift(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let items = list_of(evaluator, recv)?;
    let shifted = items.lock().pop_back();
    shifted.ok_or_else(|| empty_list(evaluator))
}

fn list_size(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let items = list_of(evaluator, recv)?;
    let size = items.lock().len();
    Ok(evaluator.new_integer(size as i64))
}

fn list_object_at_index(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let items = list_of(evaluator, recv)?;
    let index = integer_arg(evaluator, &args[0])?;
    let item = usize::try_from(index)
        .ok()
        .and_then(|position| items.lock().get(position).cloned());
    item.ok_or_else(|| index_error(evaluator, index))
}

fn list_as_string(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let items = list_of(evaluator, recv)?;
    let snapshot: Vec<Node> = items.lock().iter().cloned().collect();
    let shown = display_sequence(evaluator, &snapshot, "<", ">")?;
    Ok(evaluator.new_string(&shown))
}

// ==================== Pair ====================

static PAIR_HOOKS: NativeHooks = NativeHooks {
    allocate: Some(pair_allocate),
    register: Some(register_elements),
    methods: &[
        NativeMethod::new("left", pair_left),
        NativeMethod::new("right", pair_right),
        NativeMethod::new("setLeft:", pair_set_left),
        NativeMethod::new("setRight:", pair_set_right),
        NativeMethod::new("asString", pair_as_string),
    ],
    meta_methods: &[NativeMethod::new("left:right:", pair_meta_left_right)],
    ..NativeHooks::EMPTY
};

pub fn create_pair_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "Pair", Some(OBJECT_CLASS), ClassFlags::empty(), &PAIR_HOOKS)
}

/// Both sides start out as integer zero until the evaluator fills them with
/// objects; `left` and `right` answer nil for anything that is not an object
fn pair_allocate(_object: &ClassObject) -> Option<Node> {
    Some(Node::Pair(Container::new((Node::Int64(0), Node::Int64(0)))))
}

fn pair_of(evaluator: &mut NodeEvaluator, recv: &ClassRef) -> EvalResult<PairRef> {
    match recv.aux() {
        Some(Node::Pair(pair)) => Ok(pair),
        _ => Err(payload_error(evaluator, recv, "Pair")),
    }
}

fn object_or_nil(evaluator: &NodeEvaluator, side: Node) -> Node {
    match side {
        Node::Class(_) => side,
        _ => evaluator.nil(),
    }
}

fn pair_left(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let pair = pair_of(evaluator, recv)?;
    let left = pair.lock().0.clone();
    Ok(object_or_nil(evaluator, left))
}

fn pair_right(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let pair = pair_of(evaluator, recv)?;
    let right = pair.lock().1.clone();
    Ok(object_or_nil(evaluator, right))
}

fn pair_set_left(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let pair = pair_of(evaluator, recv)?;
    let value = evaluator.adopt(args[0].clone());
    pair.lock().0 = value.clone();
    Ok(value)
}

fn pair_set_right(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let pair = pair_of(evaluator, recv)?;
    let value = evaluator.adopt(args[0].clone());
    pair.lock().1 = value.clone();
    Ok(value)
}

fn pair_as_string(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let pair = pair_of(evaluator, recv)?;
    let (left, right) = pair.lock().clone();
    let left = object_or_nil(evaluator, left);
    let right = object_or_nil(evaluator, right);
    let shown = display_sequence(evaluator, &[left, right], "(", ")")?;
    Ok(evaluator.new_string(&shown))
}

/// [Pair left: a right: b]
fn pair_meta_left_right(evaluator: &mut NodeEvaluator, _recv: &ClassRef, args: &[Node]) -> EvalResult {
    let left = evaluator.adopt(args[0].clone());
    let right = evaluator.adopt(args[1].clone());
    let template = evaluator.runtime().core().pair.clone();
    let pair = ClassObject::with_aux(&template, Node::Pair(Container::new((left, right))));
    Ok(Node::Class(pair))
}

#[cfg(test)]
mod tests {
    use crate::runtime::{Runtime, RuntimeConfig};

    fn eval(source: &str) -> String {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let value = evaluator.evaluate_source(source, "collections.ty").expect("evaluates");
        evaluator.display_string(&value).expect("displays")
    }

    fn eval_error(source: &str) -> String {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        evaluator
            .evaluate_source(source, "collections.ty")
            .unwrap_err()
            .message
    }

    #[test]
    fn test_array_literal_and_access() {
        assert_eq!(eval("a = [1, 2, 3]\n[a size]"), "3");
        assert_eq!(eval("a = [1, \"two\", 3]\n[a objectAtIndex: 1]"), "two");
        assert_eq!(eval("a = [1, 2]\n[a add: 3]\na"), "[1, 2, 3]");
        assert_eq!(eval("a = [1, 2]\n[a setObject: 9 atIndex: 0]\na"), "[9, 2]");
        assert_eq!(eval("a = []\n[a isEmpty]"), "yes");
    }

    #[test]
    fn test_array_index_out_of_bounds() {
        let message = eval_error("a = [1]\n[a objectAtIndex: 4]");
        assert!(message.contains("IndexOutOfBoundsException"), "{}", message);
    }

    #[test]
    fn test_array_contains_uses_equality() {
        assert_eq!(eval("a = [1, \"x\"]\n[a contains: \"x\"]"), "yes");
        assert_eq!(eval("a = [1, 2]\n[a contains: 3]"), "no");
    }

    #[test]
    fn test_hash_operations() {
        assert_eq!(eval("h = (\"a\" => 1, #b => 2)\n[h objectForKey: \"a\"]"), "1");
        assert_eq!(eval("h = (\"a\" => 1)\n[h setObject: 5 forKey: \"c\"]\n[h size]"), "2");
        assert_eq!(eval("h = (\"a\" => 1)\n[h removeObjectForKey: \"a\"]\n[h size]"), "0");
        assert_eq!(eval("h = (\"a\" => 1)\n[h objectForKey: \"zz\"]"), "nil");
    }

    #[test]
    fn test_hash_rejects_unhashable_keys() {
        let message = eval_error("h = (\"a\" => 1)\n[h setObject: 1 forKey: [1, 2]]");
        assert!(message.contains("InvalidHashValueException"), "{}", message);
    }

    #[test]
    fn test_list_front_and_back() {
        let source = "l = new List\n[l add: 1]\n[l add: 2]\n[l push: 0]\nl";
        assert_eq!(eval(source), "<0, 1, 2>");
        assert_eq!(eval("l = new List\n[l add: 1]\n[l add: 2]\n[l pop]"), "1");
        assert_eq!(eval("l = new List\n[l add: 1]\n[l add: 2]\n[l shift]"), "2");
        let message = eval_error("l = new List\n[l pop]");
        assert!(message.contains("EmptyListException"), "{}", message);
    }

    #[test]
    fn test_pair() {
        assert_eq!(eval("p = [Pair left: 1 right: \"b\"]\n[p right]"), "b");
        assert_eq!(eval("p = new Pair\n[p left]"), "nil");
        assert_eq!(eval("p = [Pair left: 1 right: 2]\n[p setLeft: 7]\np"), "(7, 2)");
    }
}
