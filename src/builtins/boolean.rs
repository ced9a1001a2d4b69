// Nil, Yes and No built-in classes
// Singletons behind the `nil`, `yes` and `no` literals

use super::CORE_PACKAGE;
use crate::class::{ClassFlags, ClassRef, ClassTemplate, NativeHooks, NativeMethod, OBJECT_CLASS};
use crate::evaluator::{EvalResult, NodeEvaluator};
use crate::node::Node;

static NIL_HOOKS: NativeHooks = NativeHooks {
    methods: &[
        NativeMethod::new("isNil", nil_is_nil),
        NativeMethod::new("asString", nil_as_string),
        NativeMethod::new("not", falsy_not),
    ],
    ..NativeHooks::EMPTY
};

static YES_HOOKS: NativeHooks = NativeHooks {
    methods: &[
        NativeMethod::new("asString", yes_as_string),
        NativeMethod::new("not", yes_not),
    ],
    ..NativeHooks::EMPTY
};

static NO_HOOKS: NativeHooks = NativeHooks {
    methods: &[
        NativeMethod::new("asString", no_as_string),
        NativeMethod::new("not", falsy_not),
    ],
    ..NativeHooks::EMPTY
};

pub fn create_nil_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "Nil", Some(OBJECT_CLASS), ClassFlags::SINGLETON, &NIL_HOOKS)
}

pub fn create_yes_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "Yes", Some(OBJECT_CLASS), ClassFlags::SINGLETON, &YES_HOOKS)
}

pub fn create_no_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "No", Some(OBJECT_CLASS), ClassFlags::SINGLETON, &NO_HOOKS)
}

fn nil_is_nil(evaluator: &mut NodeEvaluator, _recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.yes())
}

fn nil_as_string(evaluator: &mut NodeEvaluator, _recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.new_string("nil"))
}

fn yes_as_string(evaluator: &mut NodeEvaluator, _recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.new_string("yes"))
}

fn no_as_string(evaluator: &mut NodeEvaluator, _recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.new_string("no"))
}

fn yes_not(evaluator: &mut NodeEvaluator, _recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.no())
}

/// `nil` and `no` negate to `yes`
fn falsy_not(evaluator: &mut NodeEvaluator, _recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.yes())
}

#[cfg(test)]
mod tests {
    use crate::runtime::{Runtime, RuntimeConfig};

    fn eval(source: &str) -> String {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let value = evaluator.evaluate_source(source, "boolean.ty").expect("evaluates");
        evaluator.display_string(&value).expect("displays")
    }

    #[test]
    fn test_literals_display() {
        assert_eq!(eval("nil"), "nil");
        assert_eq!(eval("yes"), "yes");
        assert_eq!(eval("[yes not]"), "no");
        assert_eq!(eval("[nil not]"), "yes");
    }

    #[test]
    fn test_nil_is_nil() {
        assert_eq!(eval("[nil isNil]"), "yes");
        assert_eq!(eval("[no isNil]"), "no");
    }

    #[test]
    fn test_singletons_cannot_be_instantiated() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let error = evaluator.evaluate_source("x = new Nil", "boolean.ty").unwrap_err();
        assert!(error.message.contains("SingletonInstantiationException"));
    }
}
