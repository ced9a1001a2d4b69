// Taffy Method Dispatch
// Selector lookup, `super` sends, and procedure activation with its
// locking discipline

use parking_lot::{ReentrantMutexGuard, RwLockReadGuard, RwLockWriteGuard};
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

use crate::class::{ClassRef, ClassTemplate, MethodBody};
use crate::graph::{GraphKind, GraphRef};
use crate::node::Node;
use crate::scope::{ObjectStack, Scope, ScopeEntry, ScopeFlags};

use super::{CallStackData, EvalResult, EvaluatorFlags, NodeEvaluator, Unwind};

/// Whichever lock a procedure holds while it runs
enum LockGuard<'a> {
    Unlocked,
    Monitor(ReentrantMutexGuard<'a, ()>),
    Read(RwLockReadGuard<'a, ()>),
    Write(RwLockWriteGuard<'a, ()>),
}

impl NodeEvaluator {
    /// Send `selector` with already evaluated arguments.
    ///
    /// A `forced` send answers nil when the method is missing and skips the
    /// protected check; it is how `init` is delivered.
    pub fn call_method_with_arguments(
        &mut self,
        receiver: &Node,
        selector: &str,
        arguments: &[Node],
        forced: bool,
    ) -> EvalResult {
        let Node::Class(object) = receiver else {
            return Err(self.unidentified_method(receiver.type_name(), selector));
        };

        let Some((entry, defining)) = self.find_method(object, selector) else {
            if forced {
                return Ok(self.nil());
            }
            let class_name = object.template().name.clone();
            return Err(self.unidentified_method(&class_name, selector));
        };

        if !forced && entry.flags.contains(ScopeFlags::PROTECTED) && !self.grants_protected(&defining) {
            let class_name = object.template().name.clone();
            return Err(self.unidentified_method(&class_name, selector));
        }

        self.evaluate_procedure(object, &entry, &defining, arguments)
    }

    /// Public entry for host code: counts the evaluator as running
    pub fn call_method(&mut self, receiver: &Node, selector: &str, arguments: &[Node]) -> EvalResult {
        let _guard = self.bring_up();
        self.call_method_with_arguments(receiver, selector, arguments, false)
    }

    /// Instance methods through the template chain; meta objects search the
    /// meta scopes, then Object's instance methods
    fn find_method(&self, object: &ClassRef, selector: &str) -> Option<(ScopeEntry, Arc<ClassTemplate>)> {
        let template = object.template();
        if object.is_meta() {
            template
                .find_method(selector, true)
                .or_else(|| self.runtime.core().object.find_method(selector, false))
        } else {
            template.find_method(selector, false)
        }
    }

    fn grants_protected(&self, defining: &ClassTemplate) -> bool {
        self.object_stacks
            .tail_self()
            .map_or(false, |caller| caller.is_kind_of(defining))
    }

    fn unidentified_method(&mut self, class_name: &str, selector: &str) -> Unwind {
        let class_name = self.new_string(class_name);
        let method_name = self.new_string(selector);
        self.throw_named(
            "UnidentifiedMethodException",
            &[
                ("@exceptionClassName", class_name),
                ("@exceptionMethodName", method_name),
            ],
        )
    }

    pub(super) fn evaluate_method_call(
        &mut self,
        receiver: &GraphRef,
        selector: &str,
        arguments: &[GraphRef],
    ) -> EvalResult {
        if matches!(receiver.kind, GraphKind::Super) {
            let arguments = self.evaluate_arguments(arguments)?;
            return self.call_super(selector, &arguments);
        }

        let receiver = self.evaluate(receiver)?;
        let arguments = self.evaluate_arguments(arguments)?;
        self.call_method_with_arguments(&receiver, selector, &arguments, false)
    }

    /// `[super selector]`: lookup starts above the class defining the running
    /// method, `self` stays the full receiver
    fn call_super(&mut self, selector: &str, arguments: &[Node]) -> EvalResult {
        let stack = self.object_stacks.tail();
        let receiver = stack.and_then(|stack| stack.self_object()).cloned();
        let defining = stack.and_then(|stack| stack.defining()).cloned();
        let (Some(receiver), Some(defining)) = (receiver, defining) else {
            return Err(self.unidentified_method("super", selector));
        };

        let found = defining
            .super_template()
            .and_then(|parent| parent.find_method(selector, receiver.is_meta()));
        match found {
            Some((entry, found_in)) => self.evaluate_procedure(&receiver, &entry, &found_in, arguments),
            None => {
                let class_name = defining.name.clone();
                Err(self.unidentified_method(&class_name, selector))
            }
        }
    }

    /// `super` as a value: the receiver's next level up
    pub(super) fn evaluate_super(&mut self) -> EvalResult {
        let stack = self.object_stacks.tail();
        let receiver = stack.and_then(|stack| stack.self_object()).cloned();
        let defining = stack.and_then(|stack| stack.defining()).cloned();
        let level = match (receiver, defining) {
            (Some(receiver), Some(defining)) => receiver.cast(&defining).and_then(|level| level.super_node()),
            (Some(receiver), None) => receiver.super_node(),
            _ => None,
        };
        Ok(level.map(Node::Class).unwrap_or_else(|| self.nil()))
    }

    /// Activate a method on `receiver`
    pub(super) fn evaluate_procedure(
        &mut self,
        receiver: &ClassRef,
        entry: &ScopeEntry,
        defining: &Arc<ClassTemplate>,
        arguments: &[Node],
    ) -> EvalResult {
        let Node::Method(method) = &entry.object else {
            return Ok(entry.object.clone());
        };
        let flags = entry.flags;

        if self.object_stacks.is_object_const(receiver)
            && !flags.intersects(ScopeFlags::CONST | ScopeFlags::GETTER)
        {
            let class_name = self.new_string(&defining.name);
            return Err(self.throw_named(
                "NonConstantUseOfConstantException",
                &[("@className", class_name)],
            ));
        }

        if self.call_stack.len() >= self.max_stack_depth {
            return Err(self.throw_named("StackOverflowException", &[]));
        }

        if method.arity() != arguments.len() {
            let expected = self.new_integer(method.arity() as i64);
            let given = self.new_integer(arguments.len() as i64);
            return Err(self.throw_named(
                "InvalidNumberArgumentsException",
                &[("@expected", expected), ("@given", given)],
            ));
        }

        let frame = CallStackData::new(
            format!("{}#{}", defining.name, method.selector),
            self.current_file(),
            self.position.line,
        );
        self.call_stack.push(Arc::new(frame));

        let level = receiver.cast(defining).unwrap_or_else(|| receiver.clone());
        let result = match self.acquire_lock(&level, flags) {
            Ok(guard) => {
                let result = self.run_body(receiver, &level, &method.body, &method.params, flags, defining, arguments);
                self.release_lock(&level, guard);
                result
            }
            Err(unwind) => Err(unwind),
        };

        self.call_stack.pop();
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_body(
        &mut self,
        receiver: &ClassRef,
        level: &ClassRef,
        body: &MethodBody,
        params: &[Arc<str>],
        flags: ScopeFlags,
        defining: &Arc<ClassTemplate>,
        arguments: &[Node],
    ) -> EvalResult {
        match body {
            MethodBody::Reader(variable) => Ok(receiver.get_variable(variable).unwrap_or_else(|| self.nil())),
            MethodBody::Writer(variable) => {
                let value = arguments.first().cloned().unwrap_or_else(|| self.nil());
                let value = self.adopt(value);
                receiver.set_variable(variable, value);
                Ok(self.nil())
            }
            MethodBody::Native(function) => {
                self.object_stacks.push(
                    ObjectStack::new(Some(receiver.clone()), flags.contains(ScopeFlags::CONST), false)
                        .with_defining(defining.clone()),
                );
                let result = function(self, level, arguments);
                self.object_stacks.pop();
                result
            }
            MethodBody::Taffy(graph) => {
                let scope = Scope::new_ref();
                {
                    let mut scope = scope.lock();
                    for (param, argument) in params.iter().zip(arguments) {
                        scope.set_object(param, argument.clone(), ScopeFlags::empty());
                    }
                }
                let breakthrough = flags.contains(ScopeFlags::BREAKTHROUGH);
                // class names in the body resolve against the defining file
                let home = defining
                    .file
                    .as_deref()
                    .map(|file| self.runtime.file_package(Path::new(file)));
                let previous = match home {
                    Some(home) => self.file_package.replace(home),
                    None => self.file_package.clone(),
                };
                self.object_stacks.push(
                    ObjectStack::new(
                        Some(receiver.clone()),
                        flags.contains(ScopeFlags::CONST),
                        breakthrough,
                    )
                    .with_defining(defining.clone())
                    .with_scope(scope),
                );
                let result = self.evaluate(graph);
                self.object_stacks.pop();
                self.file_package = previous;
                let value = result?;

                if !self.flags.contains(EvaluatorFlags::RETURN) {
                    return Ok(self.nil());
                }
                let returned = self.return_value.clone().unwrap_or(value);
                if !breakthrough {
                    self.flags.remove(EvaluatorFlags::RETURN);
                    self.return_value = None;
                }
                Ok(returned)
            }
        }
    }

    /// Take the lock a procedure's flags ask for. Read and write locks detect
    /// a thread re-entering in a way that would deadlock.
    fn acquire_lock<'a>(&mut self, level: &'a ClassRef, flags: ScopeFlags) -> EvalResult<LockGuard<'a>> {
        let identity = level.identity();
        let rw_flags = ScopeFlags::SYNCHRONIZED_READ | ScopeFlags::SYNCHRONIZED_WRITE;

        if let (true, Some(rw_lock)) = (flags.intersects(rw_flags), level.rw_lock()) {
            if flags.contains(ScopeFlags::SYNCHRONIZED_WRITE) {
                if self.read_locked.contains(&identity) || self.write_locked.contains(&identity) {
                    return Err(self.throw_named("DeadlockException", &[]));
                }
                let guard = match rw_lock.try_write() {
                    Some(guard) => guard,
                    None => self.blocking(|| rw_lock.write()),
                };
                self.write_locked.push(identity);
                return Ok(LockGuard::Write(guard));
            }

            if self.write_locked.contains(&identity) {
                return Err(self.throw_named("DeadlockException", &[]));
            }
            let guard = if self.read_locked.contains(&identity) {
                rw_lock.read_recursive()
            } else {
                match rw_lock.try_read() {
                    Some(guard) => guard,
                    None => self.blocking(|| rw_lock.read()),
                }
            };
            self.read_locked.push(identity);
            return Ok(LockGuard::Read(guard));
        }

        if flags.intersects(ScopeFlags::SYNCHRONIZED | rw_flags) {
            let guard = match level.monitor().try_lock() {
                Some(guard) => guard,
                None => self.blocking(|| level.monitor().lock()),
            };
            return Ok(LockGuard::Monitor(guard));
        }
        Ok(LockGuard::Unlocked)
    }

    fn release_lock(&mut self, level: &ClassRef, guard: LockGuard<'_>) {
        let identity = level.identity();
        let list = match &guard {
            LockGuard::Read(_) => Some(&mut self.read_locked),
            LockGuard::Write(_) => Some(&mut self.write_locked),
            _ => None,
        };
        if let Some(list) = list {
            if let Some(index) = list.iter().rposition(|&locked| locked == identity) {
                list.remove(index);
            }
        }
        if !matches!(guard, LockGuard::Unlocked) {
            trace!(object = identity, "lock released");
        }
        drop(guard);
    }
}
