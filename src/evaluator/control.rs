// Taffy Control Flow
// Conditionals, loops, jumps, exceptions and synchronized blocks

use crate::graph::{CatchBlock, GraphRef};
use crate::node::Node;
use crate::scope::{Scope, ScopeFlags, ScopeRef};

use super::{EvalResult, EvaluatorFlags, NodeEvaluator, Unwind};

impl NodeEvaluator {
    /// Branch bodies run in the current scope
    pub(super) fn evaluate_if(
        &mut self,
        condition: Option<&GraphRef>,
        statement: &GraphRef,
        next: Option<&GraphRef>,
    ) -> EvalResult {
        let taken = match condition {
            Some(condition) => {
                let value = self.evaluate(condition)?;
                self.is_true(&value)
            }
            None => true,
        };
        if taken {
            return self.evaluate(statement);
        }
        match next {
            Some(next) => self.evaluate(next),
            None => Ok(self.nil()),
        }
    }

    pub(super) fn evaluate_while(&mut self, condition: &GraphRef, statement: &GraphRef) -> EvalResult {
        self.in_loop(|evaluator| {
            let mut iteration = Scope::new_ref();
            loop {
                let value = evaluator.evaluate(condition)?;
                if !evaluator.is_true(&value) {
                    break;
                }
                if !evaluator.run_iteration(statement, &mut iteration)? {
                    break;
                }
            }
            Ok(evaluator.nil())
        })
    }

    pub(super) fn evaluate_for(
        &mut self,
        initial: &[GraphRef],
        condition: Option<&GraphRef>,
        increment: &[GraphRef],
        statement: &GraphRef,
    ) -> EvalResult {
        self.in_loop(|evaluator| {
            for node in initial {
                evaluator.evaluate(node)?;
            }
            let mut iteration = Scope::new_ref();
            loop {
                if let Some(condition) = condition {
                    let value = evaluator.evaluate(condition)?;
                    if !evaluator.is_true(&value) {
                        break;
                    }
                }
                if !evaluator.run_iteration(statement, &mut iteration)? {
                    break;
                }
                for node in increment {
                    evaluator.evaluate(node)?;
                }
            }
            Ok(evaluator.nil())
        })
    }

    /// Count a loop on the tail object stack and give it an outer scope
    fn in_loop(&mut self, body: impl FnOnce(&mut Self) -> EvalResult) -> EvalResult {
        self.object_stacks.start_loop();
        self.object_stacks.push_new_scope();
        let result = body(self);
        self.object_stacks.pop_scope();
        self.object_stacks.stop_loop();
        result
    }

    /// One pass over a loop body. The iteration scope is only replaced when
    /// the body bound something in it. Returns whether the loop goes on.
    fn run_iteration(&mut self, statement: &GraphRef, iteration: &mut ScopeRef) -> EvalResult<bool> {
        self.object_stacks.push_scope(iteration.clone());
        let result = self.evaluate(statement);
        self.object_stacks.pop_scope();
        result?;

        if self.flags.contains(EvaluatorFlags::BREAK) {
            self.flags.remove(EvaluatorFlags::BREAK);
            return Ok(false);
        }
        if !self.can_continue_evaluating() {
            return Ok(false);
        }
        if iteration.lock().is_modified() {
            *iteration = Scope::new_ref();
        }
        Ok(true)
    }

    pub(super) fn evaluate_break(&mut self) -> EvalResult {
        if !self.object_stacks.has_enclosing_loop() {
            return Err(self.throw_named("BreakWithoutALoopException", &[]));
        }
        self.flags |= EvaluatorFlags::BREAK;
        Ok(self.nil())
    }

    pub(super) fn evaluate_return(&mut self, value: Option<&GraphRef>) -> EvalResult {
        if self.call_stack.is_empty() {
            return Err(self.throw_named("ReturnWithNoCallStackException", &[]));
        }
        let value = match value {
            Some(value) => self.evaluate(value)?,
            None => self.nil(),
        };
        self.return_value = Some(value.clone());
        self.flags |= EvaluatorFlags::RETURN;
        Ok(value)
    }

    pub(super) fn evaluate_throw(&mut self, value: &GraphRef) -> EvalResult {
        let value = self.evaluate(value)?;
        match value.as_class() {
            Some(object) if self.is_exception_kind(object) => {
                let exception = object.clone();
                Err(self.throw_object(exception))
            }
            _ => {
                let from = match value.as_class() {
                    Some(object) => object.template().name.to_string(),
                    None => value.type_name().to_string(),
                };
                let from = self.new_string(&from);
                let to = self.new_string("Exception");
                Err(self.throw_named("InvalidCastException", &[("@from", from), ("@to", to)]))
            }
        }
    }

    /// The first catch whose class the exception is a kind of handles it,
    /// with the exception bound in a fresh scope. Aborts are never caught.
    pub(super) fn evaluate_try(&mut self, statement: &GraphRef, catches: &[CatchBlock]) -> EvalResult {
        let result = self.evaluate(statement);
        if !matches!(result, Err(Unwind::Exception)) {
            return result;
        }
        let Some(exception) = self.exception.clone() else {
            return result;
        };
        if self.is_abort_kind(&exception) {
            return result;
        }

        let saved_stack = std::mem::take(&mut self.exception_stack);
        self.exception = None;

        for catch in catches {
            let matches = match &catch.class_name {
                None => true,
                Some(class_name) => {
                    let package = self.file_package_name();
                    let contents = self.contents_list();
                    let tail_self = self.object_stacks.tail_self();
                    let found = self.runtime.classes().get_class(
                        class_name,
                        &package,
                        &contents,
                        tail_self.as_ref(),
                    );
                    match found {
                        Some(meta) => exception.is_kind_of(meta.template()),
                        None => {
                            let class_name = self.new_string(class_name);
                            return Err(self.throw_named(
                                "UnidentifiedClassException",
                                &[("@className", class_name)],
                            ));
                        }
                    }
                }
            };

            if matches {
                let scope = self.object_stacks.push_new_scope();
                scope
                    .lock()
                    .set_object(&catch.identifier, Node::Class(exception), ScopeFlags::empty());
                let handled = self.evaluate(&catch.statement);
                self.object_stacks.pop_scope();
                return handled;
            }
        }

        self.exception = Some(exception);
        self.exception_stack = saved_stack;
        Err(Unwind::Exception)
    }

    pub(super) fn evaluate_synchronized(&mut self, object: &GraphRef, statement: &GraphRef) -> EvalResult {
        let value = self.evaluate(object)?;
        let Node::Class(target) = value else {
            return self.evaluate(statement);
        };
        let guard = match target.monitor().try_lock() {
            Some(guard) => guard,
            None => self.blocking(|| target.monitor().lock()),
        };
        let result = self.evaluate(statement);
        drop(guard);
        result
    }

    pub(super) fn evaluate_and(&mut self, left: &GraphRef, right: &GraphRef) -> EvalResult {
        let value = self.evaluate(left)?;
        if !self.is_true(&value) {
            return Ok(self.no());
        }
        let value = self.evaluate(right)?;
        Ok(self.boolean(self.is_true(&value)))
    }

    pub(super) fn evaluate_or(&mut self, left: &GraphRef, right: &GraphRef) -> EvalResult {
        let value = self.evaluate(left)?;
        if self.is_true(&value) {
            return Ok(self.yes());
        }
        let value = self.evaluate(right)?;
        Ok(self.boolean(self.is_true(&value)))
    }

    /// `item in container`: each element is asked `==`; objects without a
    /// container payload answer `contains:`
    pub(super) fn evaluate_in(&mut self, item: &GraphRef, container: &GraphRef) -> EvalResult {
        let item = self.evaluate(item)?;
        let container = self.evaluate(container)?;

        let elements: Option<Vec<Node>> = container.as_class().and_then(|object| object.aux()).and_then(|aux| match aux {
            Node::Array(items) | Node::Heap(items) => Some(items.lock().clone()),
            Node::List(items) => Some(items.lock().iter().cloned().collect()),
            Node::Hash(hash) => Some(hash.lock().pairs().map(|(key, _)| key.clone()).collect()),
            Node::Pair(pair) => {
                let pair = pair.lock();
                Some(vec![pair.0.clone(), pair.1.clone()])
            }
            _ => None,
        });

        match elements {
            Some(elements) => {
                for element in &elements {
                    if self.objects_equal(&item, element)? {
                        return Ok(self.yes());
                    }
                }
                Ok(self.no())
            }
            None => self.call_method_with_arguments(&container, "contains:", &[item], false),
        }
    }
}
