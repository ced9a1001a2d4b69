// Taffy Exception Classes
// The org.taffy.core.exception hierarchy thrown by the runtime. Every class
// descends from Exception, which carries @callStack and @display.

use std::sync::Arc;

use crate::class::{ClassFlags, ClassRef, ClassTemplate, NativeHooks, NativeMethod, OBJECT_CLASS};
use crate::evaluator::{EvalResult, NodeEvaluator};
use crate::node::Node;
use crate::scope::ScopeFlags;

pub const EXCEPTION_PACKAGE: &str = "org.taffy.core.exception";
pub const EXCEPTION_CLASS: &str = "Exception";

/// (name, super, fields); supers come before their subclasses
const EXCEPTIONS: &[(&str, &str, &[&str])] = &[
    ("UnidentifiedClassException", EXCEPTION_CLASS, &["@className"]),
    (
        "UnidentifiedMethodException",
        EXCEPTION_CLASS,
        &["@exceptionClassName", "@exceptionMethodName"],
    ),
    ("UnidentifiedObjectException", EXCEPTION_CLASS, &["@objectName", "@reason"]),
    ("ImportFailedException", EXCEPTION_CLASS, &["@path"]),
    ("MoreThanOnePackageException", EXCEPTION_CLASS, &[]),
    ("InvalidSuperClassException", EXCEPTION_CLASS, &["@superName"]),
    ("AbstractClassInstantiationException", EXCEPTION_CLASS, &["@objectName"]),
    ("SingletonInstantiationException", EXCEPTION_CLASS, &["@className"]),
    ("FinalClassUpdateException", EXCEPTION_CLASS, &[]),
    ("InconsistentClassUpdateException", EXCEPTION_CLASS, &[]),
    ("ConstantRedefinitionException", EXCEPTION_CLASS, &["@identifierName"]),
    ("LocalToGlobalConversionException", EXCEPTION_CLASS, &["@objectName"]),
    ("ReturnWithNoCallStackException", EXCEPTION_CLASS, &[]),
    ("BreakWithoutALoopException", EXCEPTION_CLASS, &[]),
    ("InvalidNumberArgumentsException", EXCEPTION_CLASS, &["@expected", "@given"]),
    ("NonConstantUseOfConstantException", EXCEPTION_CLASS, &["@className"]),
    ("StackOverflowException", EXCEPTION_CLASS, &[]),
    ("DeadlockException", EXCEPTION_CLASS, &[]),
    ("InvalidCastException", EXCEPTION_CLASS, &["@from", "@to"]),
    ("AssertFailedException", EXCEPTION_CLASS, &[]),
    ("IndexOutOfBoundsException", EXCEPTION_CLASS, &["@index"]),
    ("InvalidHashValueException", EXCEPTION_CLASS, &["@value"]),
    ("DivideByZeroException", EXCEPTION_CLASS, &[]),
    ("EmptyListException", EXCEPTION_CLASS, &[]),
    ("UnsupportedMathOperationException", EXCEPTION_CLASS, &["@operation"]),
    ("AbortException", EXCEPTION_CLASS, &[]),
    ("UserGeneratedAbortSignalException", "AbortException", &[]),
];

static EXCEPTION_HOOKS: NativeHooks = NativeHooks {
    methods: &[
        NativeMethod::new("asString", exception_as_string),
        NativeMethod::new("callStack", exception_call_stack),
    ],
    ..NativeHooks::EMPTY
};

/// The base class plus the whole table, supers first. Fields start out nil.
pub fn create_exception_templates(nil: &Node) -> Vec<Arc<ClassTemplate>> {
    let base = ClassTemplate::native(
        EXCEPTION_PACKAGE,
        EXCEPTION_CLASS,
        Some(OBJECT_CLASS),
        ClassFlags::empty(),
        &EXCEPTION_HOOKS,
    );
    for field in ["@callStack", "@display"] {
        base.declare_variable(field, nil.clone(), ScopeFlags::empty());
    }
    base.make_reader("@display");
    base.make_writer("@display");

    let mut templates = vec![Arc::new(base)];
    for (name, super_name, fields) in EXCEPTIONS {
        let super_name: Arc<str> = Arc::from(format!("{}.{}", EXCEPTION_PACKAGE, super_name));
        let template = ClassTemplate::new(EXCEPTION_PACKAGE, *name, Some(super_name), ClassFlags::empty());
        for field in fields.iter() {
            template.declare_variable(field, nil.clone(), ScopeFlags::empty());
            template.make_reader(field);
        }
        templates.push(Arc::new(template));
    }
    templates
}

/// Fields describing an exception: those of the nearest core exception
/// class at or above `template`
pub fn declared_fields(template: &ClassTemplate) -> Vec<&'static str> {
    let mut current = Some(template);
    while let Some(level) = current {
        if &*level.package == EXCEPTION_PACKAGE {
            if let Some((_, _, fields)) = EXCEPTIONS.iter().find(|(name, _, _)| *name == &*level.name) {
                return fields.to_vec();
            }
        }
        current = level.super_template().map(|parent| parent.as_ref());
    }
    Vec::new()
}

/// [exception asString] - "Name: fields"
fn exception_as_string(evaluator: &mut NodeEvaluator, _receiver: &ClassRef, _args: &[Node]) -> EvalResult {
    let Some(exception) = evaluator.receiver() else {
        return Ok(evaluator.nil());
    };
    let display = evaluator.exception_display(&exception);
    Ok(evaluator.new_string(&display))
}

/// [exception callStack] - the frames recorded when it was first thrown
fn exception_call_stack(evaluator: &mut NodeEvaluator, receiver: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(receiver
        .get_variable("@callStack")
        .unwrap_or_else(|| evaluator.nil()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_supers_precede_subclasses() {
        let mut seen = vec![EXCEPTION_CLASS];
        for (name, super_name, _) in EXCEPTIONS {
            assert!(seen.contains(super_name), "{} listed before its super", name);
            seen.push(*name);
        }
    }

    #[test]
    fn test_declared_fields_of_table_entry() {
        let nil = Node::Int64(0);
        let templates = create_exception_templates(&nil);
        let invalid_cast = templates
            .iter()
            .find(|t| &*t.name == "InvalidCastException")
            .expect("listed");
        assert_eq!(declared_fields(invalid_cast), vec!["@from", "@to"]);
        assert!(invalid_cast.scope().get_method("from").is_some());
        assert!(declared_fields(&templates[0]).is_empty());
    }

    #[test]
    fn test_declared_fields_inherited_by_subclass() {
        let nil = Node::Int64(0);
        let templates = create_exception_templates(&nil);
        let import_failed = templates
            .iter()
            .find(|t| &*t.name == "ImportFailedException")
            .expect("listed")
            .clone();
        let custom = ClassTemplate::new("app", "MissingPlugin", None, ClassFlags::empty());
        assert!(custom.set_super_template(import_failed));
        assert_eq!(declared_fields(&custom), vec!["@path"]);
    }
}
