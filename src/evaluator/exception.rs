// Taffy Exceptions
// Raising, holding and describing language-level exceptions

use std::sync::Arc;
use tracing::trace;

use crate::builtins::exception::{declared_fields, EXCEPTION_PACKAGE};
use crate::class::{ClassObject, ClassRef, ClassTemplate};
use crate::node::Node;

use super::{format_call_stack, FatalError, NodeEvaluator, Unwind};

impl NodeEvaluator {
    fn exception_template(&self, name: &str) -> Result<Arc<ClassTemplate>, FatalError> {
        self.runtime
            .classes()
            .class_in(EXCEPTION_PACKAGE, name)
            .map(|meta| meta.template().clone())
            .ok_or_else(|| FatalError::MissingCoreClass(format!("{}.{}", EXCEPTION_PACKAGE, name)))
    }

    /// Instantiate a core exception, fill its fields, and throw it
    pub fn throw_named(&mut self, name: &str, fields: &[(&str, Node)]) -> Unwind {
        let template = match self.exception_template(name) {
            Ok(template) => template,
            Err(fatal) => return Unwind::Fatal(fatal),
        };
        let exception = ClassObject::new_instance(&template);
        for (field, value) in fields {
            let value = self.adopt(value.clone());
            exception.set_variable(field, value);
        }
        self.runtime.gc().register_object(&exception);
        self.throw_object(exception)
    }

    /// Make `exception` the pending exception
    pub fn throw_object(&mut self, exception: ClassRef) -> Unwind {
        self.set_exception(exception);
        Unwind::Exception
    }

    /// Store the exception with a snapshot of the call stack; `@callStack`
    /// is filled in the first time the object is thrown
    pub(super) fn set_exception(&mut self, exception: ClassRef) {
        let unset = exception
            .get_variable("@callStack")
            .map_or(true, |value| self.is_nil(&value));
        if unset {
            let rendered = self.new_string(&format_call_stack(&self.call_stack));
            let rendered = self.adopt(rendered);
            exception.set_variable("@callStack", rendered);
        }
        trace!(exception = %exception.template().name, depth = self.call_stack.len(), "exception thrown");
        self.exception_stack = self.call_stack.clone();
        self.exception = Some(exception);
    }

    pub fn exception(&self) -> Option<&ClassRef> {
        self.exception.as_ref()
    }

    pub fn take_exception(&mut self) -> Option<ClassRef> {
        self.exception.take()
    }

    pub fn clear_exception(&mut self) {
        self.exception = None;
        self.exception_stack.clear();
    }

    /// Whether `exception` is an `AbortException`, which no catch may stop
    pub fn is_abort_kind(&self, exception: &ClassRef) -> bool {
        self.exception_template("AbortException")
            .map_or(false, |abort| exception.is_kind_of(&abort))
    }

    pub(super) fn is_exception_kind(&self, object: &ClassRef) -> bool {
        object.is_object()
            && self
                .exception_template("Exception")
                .map_or(false, |base| object.is_kind_of(&base))
    }

    /// `Name: display` when `@display` is a string, otherwise the declared
    /// fields that are set, otherwise just the class name
    pub fn exception_display(&self, exception: &ClassRef) -> String {
        let name = exception.template().name.clone();
        if let Some(text) = exception
            .get_variable("@display")
            .and_then(|value| value.as_class().and_then(|object| object.string_value()))
        {
            return format!("{}: {}", name, text);
        }

        let values: Vec<String> = declared_fields(exception.template())
            .iter()
            .filter_map(|field| exception.get_variable(field))
            .filter(|value| !self.is_nil(value))
            .map(|value| value.to_string())
            .collect();
        if values.is_empty() {
            name.to_string()
        } else {
            format!("{}: {}", name, values.join(", "))
        }
    }
}
