// Taffy Block Evaluation
// A block literal captures the scopes of the activation it is written in.
// Calling it pushes a breakthrough activation over those scopes plus one for
// its parameters, so names it binds stay local and `return` leaves the
// enclosing method.

use crate::class::{ClassObject, ClassRef};
use crate::graph::{GraphKind, GraphRef};
use crate::node::{Container, Node};
use crate::scope::{ObjectStack, Scope, ScopeFlags};

use super::{EvalResult, EvaluatorFlags, NodeEvaluator};

impl NodeEvaluator {
    pub(super) fn evaluate_block_literal(&mut self, graph: &GraphRef) -> EvalResult {
        let (receiver, defining, scopes) = match self.object_stacks.tail() {
            Some(stack) => (
                stack.self_object().cloned(),
                stack.defining().cloned(),
                stack.scopes().to_vec(),
            ),
            None => (None, None, Vec::new()),
        };

        let mut parts = Vec::with_capacity(scopes.len() + 3);
        parts.push(Node::Graph(graph.clone()));
        parts.push(receiver.map(Node::Class).unwrap_or_else(|| self.nil()));
        parts.push(defining.map(Node::ClassTemplate).unwrap_or_else(|| self.nil()));
        parts.extend(scopes.into_iter().map(Node::Scope));

        let block = ClassObject::from_parts(
            &self.runtime.core().block,
            true,
            Scope::new(),
            Some(Node::Array(Container::new(parts))),
            None,
        );
        Ok(Node::Class(block))
    }

    /// Run a block's body with `arguments` bound to its parameters
    pub fn call_block(&mut self, block: &ClassRef, arguments: &[Node]) -> EvalResult {
        let parts = match block.aux() {
            Some(Node::Array(parts)) => parts.lock().clone(),
            _ => Vec::new(),
        };
        let [Node::Graph(graph), receiver, defining, scopes @ ..] = parts.as_slice() else {
            let from = self.new_string(&block.template().name);
            let to = self.new_string("Block");
            return Err(self.throw_named("InvalidCastException", &[("@from", from), ("@to", to)]));
        };
        let GraphKind::Block { params, body } = &graph.kind else {
            return Ok(self.nil());
        };

        if params.len() != arguments.len() {
            let expected = self.new_integer(params.len() as i64);
            let given = self.new_integer(arguments.len() as i64);
            return Err(self.throw_named(
                "InvalidNumberArgumentsException",
                &[("@expected", expected), ("@given", given)],
            ));
        }

        let locals = Scope::new_ref();
        {
            let mut locals = locals.lock();
            for (param, argument) in params.iter().zip(arguments) {
                locals.set_object(param, argument.clone(), ScopeFlags::empty());
            }
        }

        let receiver = receiver.as_class().filter(|_| !self.is_nil(receiver)).cloned();
        let mut stack = ObjectStack::new(receiver, false, true);
        if let Node::ClassTemplate(template) = defining {
            stack = stack.with_defining(template.clone());
        }
        for scope in scopes {
            if let Node::Scope(scope) = scope {
                stack.push_scope(scope.clone());
            }
        }
        stack.push_scope(locals);

        self.object_stacks.push(stack);
        let result = self.evaluate(body);
        self.object_stacks.pop();
        let value = result?;

        if self.flags.contains(EvaluatorFlags::RETURN) {
            return Ok(self.return_value.clone().unwrap_or(value));
        }
        Ok(value)
    }
}
