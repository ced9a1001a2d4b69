// Taffy Node Evaluator
// Walks syntax-tree nodes for one thread. Exceptions live in the
// evaluator's exception slot and unwind through `Unwind::Exception`;
// `return`, `break` and `exit` are flags checked between statements.

mod assign;
mod block;
pub mod call_stack;
mod classes;
mod control;
mod dispatch;
mod exception;
mod import;

use bitflags::bitflags;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

use crate::class::{ClassObject, ClassRef};
use crate::error::{ErrorKind, Position, Span, TaffyError, TaffyResult};
use crate::graph::{GraphKind, GraphRef, NumberLiteral};
use crate::node::{Container, Node, NodeHash};
use crate::parser::parse_source;
use crate::runtime::file_package::{FilePackageRef, ImportState};
use crate::runtime::Runtime;
use crate::scope::{ObjectStack, ObjectStackList, Scope, ScopeRef};

pub use call_stack::{format_call_stack, CallStackData};
pub use import::{DeferredImport, ImportOutcome, ImportReference};

/// Errors that end evaluation without a language-level exception object
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FatalError {
    #[error("out of memory: {live} objects alive after collection, limit is {limit}")]
    OutOfMemory { live: usize, limit: usize },
    #[error("core class '{0}' is not registered")]
    MissingCoreClass(String),
}

/// Why evaluation stopped early
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Unwind {
    /// The evaluator's exception slot holds the thrown object
    #[error("exception thrown")]
    Exception,
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

pub type EvalResult<T = Node> = Result<T, Unwind>;

/// Remaining native stack below which evaluation moves to a new segment
const STACK_RED_ZONE: usize = 128 * 1024;
/// Size of each segment added by `stacker`
const STACK_GROWTH: usize = 2 * 1024 * 1024;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EvaluatorFlags: u8 {
        const RETURN = 1 << 0;
        const BREAK = 1 << 1;
        const EXIT = 1 << 2;
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortState {
    Not = 0,
    Received = 1,
    Processing = 2,
    Please = 3,
}

impl AbortState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => AbortState::Received,
            2 => AbortState::Processing,
            3 => AbortState::Please,
            _ => AbortState::Not,
        }
    }
}

/// Shared abort flag of one evaluator, settable from any thread
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicU8>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the evaluator to abort at its next node
    pub fn request(&self) {
        let _ = self.0.compare_exchange(
            AbortState::Not as u8,
            AbortState::Received as u8,
            AtomicOrdering::AcqRel,
            AtomicOrdering::Acquire,
        );
    }

    pub fn state(&self) -> AbortState {
        AbortState::from_u8(self.0.load(AtomicOrdering::Acquire))
    }

    pub fn set(&self, state: AbortState) {
        self.0.store(state as u8, AtomicOrdering::Release);
    }

    pub fn is_same(&self, other: &AbortHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Keeps the evaluator counted as running by the collector. Only the
/// outermost guard of an evaluator talks to the collector.
#[must_use]
pub struct EvaluationGuard {
    runtime: Arc<Runtime>,
    count: Arc<AtomicUsize>,
}

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, AtomicOrdering::AcqRel) == 1 {
            self.runtime.gc().node_evaluator_down();
        }
    }
}

pub struct NodeEvaluator {
    runtime: Arc<Runtime>,
    object_stacks: ObjectStackList,
    call_stack: Vec<Arc<CallStackData>>,
    exception: Option<ClassRef>,
    exception_stack: Vec<Arc<CallStackData>>,
    return_value: Option<Node>,
    flags: EvaluatorFlags,
    abort: AbortHandle,
    abort_delay: u32,
    deferred_imports: Vec<DeferredImport>,
    import_references: Vec<ImportReference>,
    marks: Vec<Node>,
    read_locked: Vec<usize>,
    write_locked: Vec<usize>,
    only_evaluate_classes: u32,
    import_depth: u32,
    evaluation_count: Arc<AtomicUsize>,
    position: Position,
    file_package: Option<FilePackageRef>,
    session: Option<ScopeRef>,
    max_stack_depth: usize,
}

impl NodeEvaluator {
    /// Use `Runtime::create_evaluator`, which also registers the evaluator
    pub(crate) fn new(runtime: Arc<Runtime>, abort: AbortHandle) -> Self {
        let global = runtime.globals().clone();
        let max_stack_depth = runtime.config().max_stack_depth;
        Self {
            runtime,
            object_stacks: ObjectStackList::new(global),
            call_stack: Vec::new(),
            exception: None,
            exception_stack: Vec::new(),
            return_value: None,
            flags: EvaluatorFlags::empty(),
            abort,
            abort_delay: 0,
            deferred_imports: Vec::new(),
            import_references: Vec::new(),
            marks: Vec::new(),
            read_locked: Vec::new(),
            write_locked: Vec::new(),
            only_evaluate_classes: 0,
            import_depth: 0,
            evaluation_count: Arc::new(AtomicUsize::new(0)),
            position: Position::default(),
            file_package: None,
            session: None,
            max_stack_depth,
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    pub fn flags(&self) -> EvaluatorFlags {
        self.flags
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn set_max_stack_depth(&mut self, depth: usize) {
        self.max_stack_depth = depth.max(1);
    }

    // ==================== Collector cooperation ====================

    /// Count this evaluator as running until the guard drops
    pub fn bring_up(&self) -> EvaluationGuard {
        if self.evaluation_count.fetch_add(1, AtomicOrdering::AcqRel) == 0 {
            self.runtime.gc().node_evaluator_up();
        }
        EvaluationGuard {
            runtime: self.runtime.clone(),
            count: self.evaluation_count.clone(),
        }
    }

    pub fn is_evaluating(&self) -> bool {
        self.evaluation_count.load(AtomicOrdering::Acquire) > 0
    }

    /// Run `f` stepped down from the collector when it may block
    pub(crate) fn blocking<T>(&self, f: impl FnOnce() -> T) -> T {
        if self.is_evaluating() {
            self.runtime.gc().blocking(f)
        } else {
            f()
        }
    }

    fn safe_point(&self) -> EvalResult<()> {
        if self.is_evaluating() {
            self.runtime.gc().safe_point()?;
        }
        Ok(())
    }

    /// Keep `node` reachable while native code holds it outside any scope
    pub fn push_mark(&mut self, node: Node) {
        self.marks.push(node);
    }

    pub fn pop_marks(&mut self, count: usize) {
        let keep = self.marks.len().saturating_sub(count);
        self.marks.truncate(keep);
    }

    /// Hold off abort processing, e.g. while class state is half built
    pub fn delay_abort(&mut self) {
        self.abort_delay += 1;
    }

    pub fn resume_abort(&mut self) {
        self.abort_delay = self.abort_delay.saturating_sub(1);
    }

    // ==================== Call stack ====================

    pub fn push_call_stack(&mut self, method_name: impl Into<Arc<str>>) {
        let data = CallStackData::new(method_name, self.current_file(), self.position.line);
        self.call_stack.push(Arc::new(data));
    }

    pub fn pop_call_stack(&mut self) {
        self.call_stack.pop();
    }

    pub fn call_stack(&self) -> &[Arc<CallStackData>] {
        &self.call_stack
    }

    pub fn current_file(&self) -> Arc<str> {
        self.runtime.file_name(self.position.file_id)
    }

    /// The full receiver of the running method; natives are handed only
    /// the level of their defining class
    pub fn receiver(&self) -> Option<ClassRef> {
        self.object_stacks.tail_self()
    }

    // ==================== Values ====================

    pub fn nil(&self) -> Node {
        Node::Class(self.runtime.core().nil_object.clone())
    }

    pub fn yes(&self) -> Node {
        Node::Class(self.runtime.core().yes_object.clone())
    }

    pub fn no(&self) -> Node {
        Node::Class(self.runtime.core().no_object.clone())
    }

    pub fn boolean(&self, value: bool) -> Node {
        if value {
            self.yes()
        } else {
            self.no()
        }
    }

    pub fn is_nil(&self, node: &Node) -> bool {
        node.is_same(&Node::Class(self.runtime.core().nil_object.clone()))
    }

    /// Everything except `nil` and `no` is true
    pub fn is_true(&self, node: &Node) -> bool {
        let core = self.runtime.core();
        match node {
            Node::Class(object) => {
                !Arc::ptr_eq(object, &core.nil_object) && !Arc::ptr_eq(object, &core.no_object)
            }
            _ => true,
        }
    }

    pub fn new_string(&self, text: &str) -> Node {
        Node::Class(ClassObject::with_aux(
            &self.runtime.core().string,
            Node::String(Arc::from(text)),
        ))
    }

    pub fn new_symbol(&self, name: &str) -> Node {
        Node::Class(ClassObject::with_aux(
            &self.runtime.core().symbol,
            Node::Symbol(Arc::from(name)),
        ))
    }

    pub fn new_integer(&self, value: i64) -> Node {
        self.new_number(Node::Int64(value))
    }

    pub fn new_float(&self, value: f64) -> Node {
        self.new_number(Node::Float(value))
    }

    /// Wrap a raw numeric node in a Number instance
    pub fn new_number(&self, value: Node) -> Node {
        Node::Class(ClassObject::with_aux(&self.runtime.core().number, value))
    }

    pub fn new_array(&self, items: Vec<Node>) -> Node {
        Node::Class(ClassObject::with_aux(
            &self.runtime.core().array,
            Node::Array(Container::new(items)),
        ))
    }

    pub fn new_hash(&self, hash: NodeHash) -> Node {
        Node::Class(ClassObject::with_aux(
            &self.runtime.core().hash,
            Node::Hash(Container::new(hash)),
        ))
    }

    /// Take ownership of a value about to be stored: unshared templates and
    /// atomic objects are copied, and the result is handed to the collector
    pub fn adopt(&self, value: Node) -> Node {
        match value {
            Node::Class(object) => {
                let owned = object.copy_if_template_or_atomic();
                self.runtime.gc().register_object(&owned);
                Node::Class(owned)
            }
            other => other,
        }
    }

    // ==================== Evaluation ====================

    /// False once an exception is pending, a flag is set, or an abort is due
    pub fn can_continue_evaluating(&self) -> bool {
        self.exception.is_none()
            && self.flags.is_empty()
            && self.abort.state() != AbortState::Please
    }

    /// Evaluate one node. Deep recursion grows the native stack on demand so
    /// the configured call depth is reached before the thread's stack is.
    pub fn evaluate(&mut self, graph: &GraphRef) -> EvalResult {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || self.evaluate_node(graph))
    }

    fn evaluate_node(&mut self, graph: &GraphRef) -> EvalResult {
        if self.abort.state() == AbortState::Received
            && self.exception.is_none()
            && self.abort_delay == 0
        {
            self.abort.set(AbortState::Processing);
            debug!("abort signal received");
            let unwind = self.throw_named("UserGeneratedAbortSignalException", &[]);
            self.abort.set(AbortState::Please);
            return Err(unwind);
        }

        if self.only_evaluate_classes > 0 && !graph.kind.is_class_level() {
            return Ok(self.nil());
        }
        self.position = graph.position;

        match &graph.kind {
            GraphKind::Tree(nodes) => self.evaluate_tree(nodes),
            GraphKind::Nil => Ok(self.nil()),
            GraphKind::True => Ok(self.yes()),
            GraphKind::False => Ok(self.no()),
            GraphKind::SelfRef => Ok(self
                .object_stacks
                .tail_self()
                .map(Node::Class)
                .unwrap_or_else(|| self.nil())),
            GraphKind::UpSelf => Ok(self
                .object_stacks
                .up_self()
                .map(Node::Class)
                .unwrap_or_else(|| self.nil())),
            GraphKind::Super => self.evaluate_super(),
            GraphKind::Number(NumberLiteral::Integer(n)) => Ok(self.new_integer(*n)),
            GraphKind::Number(NumberLiteral::Float(n)) => Ok(self.new_float(*n)),
            GraphKind::String(text) => Ok(self.new_string(text)),
            GraphKind::Symbol(name) => Ok(self.new_symbol(name)),
            GraphKind::Identifier(name) => self.evaluate_identifier(name),
            GraphKind::Assignment {
                identifier,
                value,
                flags,
            } => self.evaluate_assignment(identifier, value, *flags),
            GraphKind::And(left, right) => self.evaluate_and(left, right),
            GraphKind::Or(left, right) => self.evaluate_or(left, right),
            GraphKind::In(item, container) => self.evaluate_in(item, container),
            GraphKind::MethodCall {
                receiver,
                selector,
                arguments,
            } => self.evaluate_method_call(receiver, selector, arguments),
            GraphKind::NotEqualCall { receiver, argument } => {
                let left = self.evaluate(receiver)?;
                let right = self.evaluate(argument)?;
                let equal = self.objects_equal(&left, &right)?;
                Ok(self.boolean(!equal))
            }
            GraphKind::New { class_name } => self.evaluate_new(class_name),
            GraphKind::If {
                condition,
                statement,
                next,
            } => self.evaluate_if(condition.as_ref(), statement, next.as_ref()),
            GraphKind::While {
                condition,
                statement,
            } => self.evaluate_while(condition, statement),
            GraphKind::For {
                initial,
                condition,
                increment,
                statement,
            } => self.evaluate_for(initial, condition.as_ref(), increment, statement),
            GraphKind::Break => self.evaluate_break(),
            GraphKind::Exit => {
                self.flags |= EvaluatorFlags::EXIT;
                Ok(self.nil())
            }
            GraphKind::Return(value) => self.evaluate_return(value.as_ref()),
            GraphKind::Throw(value) => self.evaluate_throw(value),
            GraphKind::TryBlock { statement, catches } => self.evaluate_try(statement, catches),
            GraphKind::Synchronized { object, statement } => {
                self.evaluate_synchronized(object, statement)
            }
            GraphKind::Class(definition) => self.evaluate_class_definition(definition, None),
            GraphKind::Import { path, wildcard } => self.evaluate_import(path, *wildcard),
            GraphKind::Package(path) => self.evaluate_package(path),
            GraphKind::ArrayLiteral(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.evaluate(item)?;
                    values.push(self.adopt(value));
                }
                Ok(self.new_array(values))
            }
            GraphKind::HashLiteral(entries) => self.evaluate_hash_literal(entries),
            GraphKind::Block { .. } => self.evaluate_block_literal(graph),
        }
    }

    /// Evaluate statements in order; the value of the last one is the result
    pub fn evaluate_tree(&mut self, nodes: &[GraphRef]) -> EvalResult {
        let mut result = self.nil();
        for node in nodes {
            self.safe_point()?;
            result = self.evaluate(node)?;
            if !self.can_continue_evaluating() {
                break;
            }
        }
        Ok(result)
    }

    fn evaluate_identifier(&mut self, name: &str) -> EvalResult {
        if let Some((entry, _)) = self.object_stacks.lookup(name) {
            return match entry.object {
                Node::Graph(graph) => self.evaluate(&graph),
                object => Ok(object),
            };
        }

        let package = self.file_package_name();
        let contents = self.contents_list();
        let tail_self = self.object_stacks.tail_self();
        if let Some(meta) = self
            .runtime
            .classes()
            .get_class(name, &package, &contents, tail_self.as_ref())
        {
            return Ok(Node::Class(meta));
        }

        if !name.starts_with('@') {
            let path = if package.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", package, name)
            };
            if let Some(meta) = self.try_import_class(&path) {
                return Ok(Node::Class(meta));
            }
        }

        let object_name = self.new_string(name);
        Err(self.throw_named("UnidentifiedObjectException", &[("@objectName", object_name)]))
    }

    fn evaluate_hash_literal(&mut self, entries: &[(GraphRef, GraphRef)]) -> EvalResult {
        let mut hash = NodeHash::new();
        for (key, value) in entries {
            let key = self.evaluate(key)?;
            let key = self.adopt(key);
            let value = self.evaluate(value)?;
            let value = self.adopt(value);
            if hash.insert(key.clone(), value).is_err() {
                return Err(self.throw_named("InvalidHashValueException", &[("@value", key)]));
            }
        }
        Ok(self.new_hash(hash))
    }

    // ==================== Comparison ====================

    /// `[left == right]`, answered as a truth value
    pub fn objects_equal(&mut self, left: &Node, right: &Node) -> EvalResult<bool> {
        let result = self.call_method_with_arguments(left, "#operator(==):", &[right.clone()], false)?;
        Ok(self.is_true(&result))
    }

    /// Order two objects through their `==`, `<` and `>` methods
    pub fn compare_objects(&mut self, left: &Node, right: &Node) -> EvalResult<Ordering> {
        if self.objects_equal(left, right)? {
            return Ok(Ordering::Equal);
        }
        let less = self.call_method_with_arguments(left, "#operator(<):", &[right.clone()], false)?;
        if self.is_true(&less) {
            return Ok(Ordering::Less);
        }
        Ok(Ordering::Greater)
    }

    /// The text of a String instance, or the result of sending `asString`
    pub fn display_string(&mut self, node: &Node) -> EvalResult<String> {
        if let Node::Class(object) = node {
            if let Some(text) = object.string_value() {
                return Ok(text.to_string());
            }
            let shown = self.call_method_with_arguments(node, "asString", &[], true)?;
            if let Some(text) = shown.as_class().and_then(|o| o.string_value()) {
                return Ok(text.to_string());
            }
        }
        Ok(node.to_string())
    }

    // ==================== Entry points ====================

    /// Parse and run a whole source text as the top-level file `file`
    pub fn evaluate_source(&mut self, source: &str, file: &str) -> TaffyResult<Node> {
        let file_id = self.runtime.register_file(file);
        let graph = parse_source(source, file, file_id)?;
        let package = self.runtime.file_package(Path::new(file));
        package.lock().state = ImportState::Importing;
        let result = self.run_top_level(&graph, package.clone(), Scope::new_ref());
        package.lock().state = ImportState::Imported;
        self.finish(result, file)
    }

    pub fn evaluate_file(&mut self, path: &Path) -> TaffyResult<Node> {
        let file = path.to_string_lossy().to_string();
        let source =
            std::fs::read_to_string(path).map_err(|error| TaffyError::io_error(&error, &file))?;
        self.evaluate_source(&source, &file)
    }

    /// One interactive line; bindings persist between lines
    pub fn evaluate_repl_line(&mut self, line: &str) -> TaffyResult<Node> {
        const REPL_FILE: &str = "<repl>";
        let file_id = self.runtime.register_file(REPL_FILE);
        let graph = parse_source(line, REPL_FILE, file_id)?;
        let package = self.runtime.file_package(Path::new(REPL_FILE));
        let session = self.session.get_or_insert_with(Scope::new_ref).clone();
        let result = self.run_top_level(&graph, package, session);
        self.finish(result, REPL_FILE)
    }

    fn run_top_level(&mut self, graph: &GraphRef, package: FilePackageRef, scope: ScopeRef) -> EvalResult {
        let previous = self.file_package.replace(package);
        self.object_stacks
            .push(ObjectStack::new(None, false, false).with_scope(scope));
        let result = {
            let _guard = self.bring_up();
            self.evaluate(graph)
        };
        self.object_stacks.pop();
        self.file_package = previous;
        result
    }

    /// Clear per-run state and turn an unwind into a host error
    fn finish(&mut self, result: EvalResult, file: &str) -> TaffyResult<Node> {
        self.flags = EvaluatorFlags::empty();
        self.return_value = None;
        self.marks.clear();
        let aborted = self.abort.state() != AbortState::Not;
        self.abort.set(AbortState::Not);
        match result {
            Ok(value) => Ok(value),
            Err(unwind) => {
                if aborted {
                    trace!(file, "evaluation aborted");
                }
                Err(self.unwind_to_error(unwind, file))
            }
        }
    }

    /// Describe an unwind for the host: uncaught exceptions with their call
    /// stack, aborts, and fatal errors
    pub fn unwind_to_error(&mut self, unwind: Unwind, file: &str) -> TaffyError {
        let span = Span::single(self.position);
        match unwind {
            Unwind::Fatal(fatal) => TaffyError::runtime_error(fatal.to_string(), file),
            Unwind::Exception => {
                let stack = std::mem::take(&mut self.exception_stack);
                let Some(exception) = self.take_exception() else {
                    return TaffyError::new(ErrorKind::RuntimeError, "evaluation stopped", span, file);
                };
                let display = self.exception_display(&exception);
                let message = if self.is_abort_kind(&exception) {
                    format!("Execution aborted: {}", display)
                } else {
                    format!("Uncaught Exception: {}", display)
                };
                let frames = stack.iter().rev().map(|data| data.to_frame()).collect();
                TaffyError::new(ErrorKind::RuntimeError, message, span, file).with_stack_trace(frames)
            }
        }
    }

    /// Arguments are evaluated left to right into a small inline buffer
    fn evaluate_arguments(&mut self, arguments: &[GraphRef]) -> EvalResult<SmallVec<[Node; 4]>> {
        let mut values = SmallVec::with_capacity(arguments.len());
        for argument in arguments {
            values.push(self.evaluate(argument)?);
        }
        Ok(values)
    }
}

impl Drop for NodeEvaluator {
    fn drop(&mut self) {
        debug_assert!(!self.is_evaluating(), "evaluator dropped mid-evaluation");
        self.runtime.unregister_evaluator(&self.abort);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::config::RuntimeConfig;

    fn evaluator() -> NodeEvaluator {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        runtime.create_evaluator()
    }

    fn run(evaluator: &mut NodeEvaluator, source: &str) -> Node {
        evaluator.evaluate_source(source, "test.ty").expect("evaluates")
    }

    #[test]
    fn test_abort_handle_request_only_from_not() {
        let handle = AbortHandle::new();
        handle.set(AbortState::Please);
        handle.request();
        assert_eq!(handle.state(), AbortState::Please);
        handle.set(AbortState::Not);
        handle.request();
        assert_eq!(handle.state(), AbortState::Received);
    }

    #[test]
    fn test_truthiness() {
        let evaluator = evaluator();
        assert!(!evaluator.is_true(&evaluator.nil()));
        assert!(!evaluator.is_true(&evaluator.no()));
        assert!(evaluator.is_true(&evaluator.yes()));
        assert!(evaluator.is_true(&evaluator.new_integer(0)));
    }

    #[test]
    fn test_tree_result_is_last_value() {
        let mut evaluator = evaluator();
        let result = run(&mut evaluator, "a = 2\nb = a * 3\nb");
        assert_eq!(result.as_class().and_then(|o| o.aux()).and_then(|n| n.as_i64()), Some(6));
    }

    #[test]
    fn test_adopt_copies_templates_once() {
        let evaluator = evaluator();
        let literal = evaluator.new_integer(5);
        let adopted = evaluator.adopt(literal.clone());
        assert!(!adopted.is_same(&literal));
        assert!(adopted.is_registered());
        let again = evaluator.adopt(adopted.clone());
        assert!(again.is_same(&adopted));
    }

    #[test]
    fn test_guard_nests_without_double_counting() {
        let evaluator = evaluator();
        let outer = evaluator.bring_up();
        let inner = evaluator.bring_up();
        assert!(evaluator.is_evaluating());
        drop(inner);
        assert!(evaluator.is_evaluating());
        drop(outer);
        assert!(!evaluator.is_evaluating());
    }

    #[test]
    fn test_unidentified_object_message() {
        let mut evaluator = evaluator();
        let error = evaluator.evaluate_source("missing", "test.ty").unwrap_err();
        assert_eq!(error.message, "Uncaught Exception: UnidentifiedObjectException: missing");
    }

    const RECURSE: &str = "class Deep {\n  (@) down: n { return [self down: n + 1] }\n}\n[new Deep down: 0]";

    #[test]
    fn test_unbounded_recursion_throws_stack_overflow() {
        let mut evaluator = evaluator();
        let error = evaluator.evaluate_source(RECURSE, "test.ty").unwrap_err();
        assert!(error.message.contains("StackOverflowException"), "{}", error.message);
    }

    #[test]
    fn test_deep_recursion_outgrows_thread_stack() {
        let handle = std::thread::Builder::new()
            .stack_size(512 * 1024)
            .spawn(|| {
                let mut evaluator = evaluator();
                evaluator.set_max_stack_depth(5_000);
                evaluator.evaluate_source(RECURSE, "test.ty").unwrap_err().message
            })
            .expect("spawns");
        let message = handle.join().expect("no native stack overflow");
        assert!(message.contains("StackOverflowException"), "{}", message);
    }

    #[test]
    fn test_pending_abort_stops_evaluation() {
        let mut evaluator = evaluator();
        evaluator.abort_handle().request();
        let error = evaluator.evaluate_source("x = 1", "test.ty").unwrap_err();
        assert!(error.message.starts_with("Execution aborted: UserGeneratedAbortSignalException"));
        assert_eq!(evaluator.abort_handle().state(), AbortState::Not);
    }
}
