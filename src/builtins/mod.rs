// Taffy Core Classes
// Object, Nil, Yes, No, Number, String, Symbol, the containers, Block,
// Kernel and the exception hierarchy. They are registered through the same registry
// and dispatch machinery as classes written in Taffy.

pub mod block;
pub mod boolean;
pub mod collections;
pub mod exception;
pub mod kernel;
pub mod number;
pub mod object;
pub mod string;

use std::sync::Arc;
use tracing::debug;

use crate::class::{ClassObject, ClassRef, ClassTemplate};
use crate::evaluator::{EvalResult, NodeEvaluator, Unwind};
use crate::node::Node;

pub const CORE_PACKAGE: &str = "org.taffy.core";

/// Handles to the core templates and singleton objects, built before any
/// evaluator exists so that `nil`, `yes` and literals are always available
pub struct CoreClasses {
    pub object: Arc<ClassTemplate>,
    pub nil: Arc<ClassTemplate>,
    pub yes: Arc<ClassTemplate>,
    pub no: Arc<ClassTemplate>,
    pub number: Arc<ClassTemplate>,
    pub string: Arc<ClassTemplate>,
    pub symbol: Arc<ClassTemplate>,
    pub array: Arc<ClassTemplate>,
    pub hash: Arc<ClassTemplate>,
    pub list: Arc<ClassTemplate>,
    pub pair: Arc<ClassTemplate>,
    pub block: Arc<ClassTemplate>,
    pub kernel: Arc<ClassTemplate>,
    /// Exception classes, supers first
    pub exceptions: Vec<Arc<ClassTemplate>>,
    pub nil_object: ClassRef,
    pub yes_object: ClassRef,
    pub no_object: ClassRef,
    pub kernel_object: ClassRef,
}

impl CoreClasses {
    pub fn new() -> Self {
        let object = Arc::new(object::create_object_template());
        let nil = Arc::new(boolean::create_nil_template());
        let nil_object = ClassObject::new_instance(&nil);
        let exceptions = exception::create_exception_templates(&Node::Class(nil_object.clone()));

        let yes = Arc::new(boolean::create_yes_template());
        let no = Arc::new(boolean::create_no_template());
        let kernel = Arc::new(kernel::create_kernel_template());
        Self {
            yes_object: ClassObject::new_instance(&yes),
            no_object: ClassObject::new_instance(&no),
            kernel_object: ClassObject::new_instance(&kernel),
            object,
            nil,
            yes,
            no,
            number: Arc::new(number::create_number_template()),
            string: Arc::new(string::create_string_template()),
            symbol: Arc::new(string::create_symbol_template()),
            array: Arc::new(collections::create_array_template()),
            hash: Arc::new(collections::create_hash_template()),
            list: Arc::new(collections::create_list_template()),
            pair: Arc::new(collections::create_pair_template()),
            block: Arc::new(block::create_block_template()),
            kernel,
            exceptions,
            nil_object,
        }
    }

    /// Every core template, each after its super class
    pub fn templates(&self) -> Vec<Arc<ClassTemplate>> {
        let mut templates = vec![
            self.object.clone(),
            self.nil.clone(),
            self.yes.clone(),
            self.no.clone(),
            self.number.clone(),
            self.string.clone(),
            self.symbol.clone(),
            self.array.clone(),
            self.hash.clone(),
            self.list.clone(),
            self.pair.clone(),
            self.block.clone(),
        ];
        templates.extend(self.exceptions.iter().cloned());
        // Kernel binds its globals when initialized, so it goes last
        templates.push(self.kernel.clone());
        templates
    }
}

impl Default for CoreClasses {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the core classes and their singletons with the runtime
pub fn install(evaluator: &mut NodeEvaluator) -> EvalResult<()> {
    let runtime = evaluator.runtime().clone();
    let core = runtime.core();

    for template in core.templates() {
        let registered = runtime
            .classes()
            .register_class_template(evaluator, template.clone(), &[], true)?;
        if registered.is_none() {
            debug!(class = %template.full_name(), "core class already registered");
        }
    }

    for singleton in [&core.nil_object, &core.yes_object, &core.no_object, &core.kernel_object] {
        runtime.gc().register_object(singleton);
        runtime.classes().register_singleton(singleton);
    }
    debug!(classes = core.templates().len(), "core classes installed");
    Ok(())
}

// ==================== Argument helpers ====================

/// The numeric payload of a Number argument
pub fn number_arg(evaluator: &mut NodeEvaluator, argument: &Node) -> EvalResult<Node> {
    let number = argument
        .as_class()
        .filter(|object| object.is_kind_of(&evaluator.runtime().core().number))
        .and_then(|object| object.aux());
    match number {
        Some(number) => Ok(number),
        None => Err(invalid_cast(evaluator, argument, "Number")),
    }
}

/// A Number argument as an index or count
pub fn integer_arg(evaluator: &mut NodeEvaluator, argument: &Node) -> EvalResult<i64> {
    let number = number_arg(evaluator, argument)?;
    match number.as_i64() {
        Some(value) => Ok(value),
        None => Err(invalid_cast(evaluator, argument, "Integer")),
    }
}

/// The text of a String or Symbol argument
pub fn text_arg(evaluator: &mut NodeEvaluator, argument: &Node) -> EvalResult<Arc<str>> {
    let text = argument.as_class().and_then(|object| match object.aux() {
        Some(Node::String(text)) | Some(Node::Symbol(text)) => Some(text),
        _ => None,
    });
    match text {
        Some(text) => Ok(text),
        None => Err(invalid_cast(evaluator, argument, "String")),
    }
}

/// `InvalidCastException` naming the argument's class and the wanted one
pub fn invalid_cast(evaluator: &mut NodeEvaluator, argument: &Node, to: &str) -> Unwind {
    let from = match argument {
        Node::Class(object) => object.template().name.to_string(),
        other => other.type_name().to_string(),
    };
    let from = evaluator.new_string(&from);
    let to = evaluator.new_string(to);
    evaluator.throw_named("InvalidCastException", &[("@from", from), ("@to", to)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Runtime, RuntimeConfig};

    #[test]
    fn test_core_templates_registered_with_supers() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let classes = runtime.classes();
        for name in ["Object", "Nil", "Number", "String", "Array", "Hash", "Block", "Kernel"] {
            assert!(classes.class_in(CORE_PACKAGE, name).is_some(), "{} missing", name);
        }
        let number = &runtime.core().number;
        assert!(number.is_kind_of(&runtime.core().object));
        let abort = classes
            .class_in(exception::EXCEPTION_PACKAGE, "UserGeneratedAbortSignalException")
            .expect("abort exception");
        let base = classes
            .class_in(exception::EXCEPTION_PACKAGE, "AbortException")
            .expect("abort base");
        assert!(abort.template().is_kind_of(base.template()));
    }

    #[test]
    fn test_singletons_have_ids() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let core = runtime.core();
        let id = core.nil.singleton_id();
        assert_ne!(id, 0);
        let found = runtime.classes().singleton_from_id(id).expect("nil by id");
        assert!(found.is_same(&Node::Class(core.nil_object.clone())));
        assert!(Node::Class(core.nil_object.clone()).is_registered());
    }
}
