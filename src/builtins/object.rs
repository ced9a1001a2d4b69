// Object built-in class
// The root of every hierarchy. Its instance methods also answer for meta
// objects, so `[Foo asString]` and `[Foo respondsTo: #new]` work on classes.

use std::cmp::Ordering;

use super::{invalid_cast, text_arg, CORE_PACKAGE};
use crate::class::{ClassFlags, ClassRef, ClassTemplate, NativeHooks, NativeMethod};
use crate::evaluator::{EvalResult, NodeEvaluator};
use crate::node::{Depth, Node};

static OBJECT_HOOKS: NativeHooks = NativeHooks {
    methods: &[
        NativeMethod::new("init", object_init),
        NativeMethod::new("#operator(==):", object_equals),
        NativeMethod::new("asString", object_as_string),
        NativeMethod::new("className", object_class_name),
        NativeMethod::new("isKindOf:", object_is_kind_of),
        NativeMethod::new("respondsTo:", object_responds_to),
        NativeMethod::new("isNil", object_is_nil),
        NativeMethod::new("copy", object_copy),
    ],
    meta_methods: &[
        NativeMethod::new("name", meta_name),
        NativeMethod::new("instance", meta_instance),
    ],
    ..NativeHooks::EMPTY
};

pub fn create_object_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "Object", None, ClassFlags::empty(), &OBJECT_HOOKS)
}

/// The whole receiver; natives are handed the Object level only
fn whole(evaluator: &NodeEvaluator, level: &ClassRef) -> ClassRef {
    evaluator.receiver().unwrap_or_else(|| level.clone())
}

fn object_init(evaluator: &mut NodeEvaluator, _recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.nil())
}

/// [a == b] - same object, or equal native payloads
fn object_equals(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let receiver = Node::Class(whole(evaluator, recv));
    let equal = receiver.compare(&args[0]) == Ok(Ordering::Equal);
    Ok(evaluator.boolean(equal))
}

fn object_as_string(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let receiver = whole(evaluator, recv);
    Ok(evaluator.new_string(&receiver.to_string()))
}

/// [object className] - the full, dotted class name
fn object_class_name(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let name = whole(evaluator, recv).template().full_name();
    Ok(evaluator.new_string(&name))
}

/// [object isKindOf: SomeClass]
fn object_is_kind_of(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let Some(class) = args[0].as_class().filter(|class| class.is_meta()) else {
        return Err(invalid_cast(evaluator, &args[0], "Class"));
    };
    let kind = whole(evaluator, recv).is_kind_of(class.template());
    Ok(evaluator.boolean(kind))
}

/// [object respondsTo: #selector]
fn object_responds_to(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let selector = text_arg(evaluator, &args[0])?;
    let receiver = whole(evaluator, recv);
    let responds = receiver
        .template()
        .find_method(&selector, receiver.is_meta())
        .is_some()
        || (receiver.is_meta()
            && evaluator
                .runtime()
                .core()
                .object
                .find_method(&selector, false)
                .is_some());
    Ok(evaluator.boolean(responds))
}

fn object_is_nil(evaluator: &mut NodeEvaluator, _recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.no())
}

/// [object copy] - a deep copy handed to the collector
fn object_copy(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let receiver = whole(evaluator, recv);
    let copied = Node::Class(receiver).copy(Depth::Deep);
    Ok(evaluator.adopt(copied))
}

/// [Foo name] - the full class name of a meta object
fn meta_name(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let name = whole(evaluator, recv).template().full_name();
    Ok(evaluator.new_string(&name))
}

/// [Foo instance] - the single instance of a singleton class
fn meta_instance(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let id = whole(evaluator, recv).template().singleton_id();
    let instance = match id {
        0 => None,
        id => evaluator.runtime().classes().singleton_from_id(id),
    };
    Ok(instance.unwrap_or_else(|| evaluator.nil()))
}

#[cfg(test)]
mod tests {
    use crate::runtime::{Runtime, RuntimeConfig};

    fn eval(source: &str) -> String {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let value = evaluator.evaluate_source(source, "object.ty").expect("evaluates");
        evaluator.display_string(&value).expect("displays")
    }

    #[test]
    fn test_class_name_and_kind() {
        assert_eq!(eval("class A {}\nclass B(A) {}\nb = new B\n[b className]"), "B");
        assert_eq!(eval("class A {}\nclass B(A) {}\nb = new B\n[b isKindOf: A]"), "yes");
        assert_eq!(eval("class A {}\nclass C {}\nc = new C\n[c isKindOf: A]"), "no");
    }

    #[test]
    fn test_identity_equality() {
        assert_eq!(eval("class A {}\na = new A\nb = a\na == b"), "yes");
        assert_eq!(eval("class A {}\na = new A\nb = new A\na == b"), "no");
    }

    #[test]
    fn test_responds_to() {
        let source = "class A { (@) greet { return 1 } }\na = new A\n[a respondsTo: #greet]";
        assert_eq!(eval(source), "yes");
        assert_eq!(eval("class A {}\n[A respondsTo: #name]"), "yes");
    }

    #[test]
    fn test_singleton_instance() {
        let source = "singleton class Config { @level, @rw }\nc = [Config instance]\n[c setLevel: 3]\n[[Config instance] level]";
        assert_eq!(eval(source), "3");
    }
}
