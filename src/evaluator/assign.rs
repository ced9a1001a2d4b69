// Taffy Assignment
// Binding values to locals, globals and class-scoped variables

use crate::graph::GraphRef;
use crate::node::Node;
use crate::scope::{Binding, ScopeFlags};

use super::{EvalResult, NodeEvaluator};

impl NodeEvaluator {
    pub(super) fn evaluate_assignment(
        &mut self,
        identifier: &str,
        value: &GraphRef,
        flags: ScopeFlags,
    ) -> EvalResult {
        let value = self.evaluate(value)?;
        let value = self.adopt(value);

        if identifier.starts_with('@') {
            self.assign_class_variable(identifier, value.clone())?;
            return Ok(value);
        }

        match self.object_stacks.lookup(identifier) {
            Some((entry, binding)) => {
                if entry.is_constant() {
                    return Err(self.constant_redefinition(identifier));
                }
                if flags.contains(ScopeFlags::GLOBAL) && !matches!(binding, Binding::Global(_)) {
                    let object_name = self.new_string(identifier);
                    return Err(self.throw_named(
                        "LocalToGlobalConversionException",
                        &[("@objectName", object_name)],
                    ));
                }
                match binding {
                    Binding::Scope(scope) | Binding::Global(scope) => {
                        scope.lock().update_object(identifier, value.clone());
                    }
                    Binding::Object(level) => {
                        level.set_variable(identifier, value.clone());
                    }
                }
            }
            None => {
                let scope = if flags.contains(ScopeFlags::GLOBAL) {
                    self.object_stacks.global_scope().clone()
                } else {
                    self.object_stacks.tail_scope()
                };
                let kept = flags & (ScopeFlags::CONSTANT | ScopeFlags::GLOBAL);
                scope.lock().set_object(identifier, value.clone(), kept);
            }
        }
        Ok(value)
    }

    /// `@x = value` and `@@x = value`; the variable must be declared by the
    /// receiver's class, and constants take only their first value
    fn assign_class_variable(&mut self, identifier: &str, value: Node) -> EvalResult<()> {
        let found = self
            .object_stacks
            .tail_self()
            .and_then(|receiver| receiver.lookup_object(identifier));
        let Some((entry, level)) = found else {
            let object_name = self.new_string(identifier);
            let reason = self.new_string("class-scoped variables must first be declared in the class header");
            return Err(self.throw_named(
                "UnidentifiedObjectException",
                &[("@objectName", object_name), ("@reason", reason)],
            ));
        };

        if entry.is_constant() && !self.is_nil(&entry.object) {
            return Err(self.constant_redefinition(identifier));
        }
        level.set_variable(identifier, value);
        Ok(())
    }

    fn constant_redefinition(&mut self, identifier: &str) -> super::Unwind {
        let identifier_name = self.new_string(identifier);
        self.throw_named(
            "ConstantRedefinitionException",
            &[("@identifierName", identifier_name)],
        )
    }
}
