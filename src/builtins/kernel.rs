// Kernel built-in class
// The singleton behind the `kernel` and `io` globals: output, assertions
// and collector control.

use std::io::Write;

use super::CORE_PACKAGE;
use crate::class::{ClassFlags, ClassRef, ClassTemplate, NativeHooks, NativeMethod, OBJECT_CLASS};
use crate::evaluator::{EvalResult, NodeEvaluator};
use crate::node::Node;
use crate::scope::ScopeFlags;

/// Global names bound to the kernel instance
pub const KERNEL_GLOBALS: &[&str] = &["kernel", "io"];

static KERNEL_HOOKS: NativeHooks = NativeHooks {
    initialize: Some(kernel_initialize),
    deinitialize: Some(kernel_deinitialize),
    methods: &[
        NativeMethod::new("print:", kernel_print),
        NativeMethod::new("putLine:", kernel_put_line),
        NativeMethod::new("assert:", kernel_assert),
        NativeMethod::new("collectGarbage", kernel_collect_garbage),
        NativeMethod::new("trackedObjects", kernel_tracked_objects),
    ],
    ..NativeHooks::EMPTY
};

pub fn create_kernel_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "Kernel", Some(OBJECT_CLASS), ClassFlags::SINGLETON, &KERNEL_HOOKS)
}

fn kernel_initialize(evaluator: &mut NodeEvaluator, _meta: &ClassRef) -> EvalResult<()> {
    let runtime = evaluator.runtime().clone();
    let kernel = Node::Class(runtime.core().kernel_object.clone());
    let mut globals = runtime.globals().lock();
    for name in KERNEL_GLOBALS {
        globals.set_object(name, kernel.clone(), ScopeFlags::GLOBAL | ScopeFlags::CONSTANT);
    }
    Ok(())
}

fn kernel_deinitialize(_template: &ClassTemplate) {
    let _ = std::io::stdout().flush();
}

/// [io print: x] - display text without a newline
fn kernel_print(evaluator: &mut NodeEvaluator, _recv: &ClassRef, args: &[Node]) -> EvalResult {
    let text = evaluator.display_string(&args[0])?;
    evaluator.runtime().write_output(&text);
    Ok(evaluator.nil())
}

/// [io putLine: x]
fn kernel_put_line(evaluator: &mut NodeEvaluator, _recv: &ClassRef, args: &[Node]) -> EvalResult {
    let mut text = evaluator.display_string(&args[0])?;
    text.push('\n');
    evaluator.runtime().write_output(&text);
    Ok(evaluator.nil())
}

/// [kernel assert: condition] - throws AssertFailedException when false
fn kernel_assert(evaluator: &mut NodeEvaluator, _recv: &ClassRef, args: &[Node]) -> EvalResult {
    if evaluator.is_true(&args[0]) {
        return Ok(evaluator.yes());
    }
    Err(evaluator.throw_named("AssertFailedException", &[]))
}

/// [kernel collectGarbage] - a full collection, now
fn kernel_collect_garbage(evaluator: &mut NodeEvaluator, _recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let runtime = evaluator.runtime().clone();
    runtime.gc().request_collection()?;
    Ok(evaluator.nil())
}

fn kernel_tracked_objects(evaluator: &mut NodeEvaluator, _recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let tracked = evaluator.runtime().gc().stats().tracked_count;
    Ok(evaluator.new_integer(tracked as i64))
}

#[cfg(test)]
mod tests {
    use crate::runtime::{Runtime, RuntimeConfig};

    #[test]
    fn test_put_line_and_print() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        evaluator
            .evaluate_source("[io putLine: \"hello\"]\n[io print: 1 + 1]\n[kernel print: #done]", "kernel.ty")
            .expect("evaluates");
        assert_eq!(runtime.take_captured_output().as_deref(), Some("hello\n2#done"));
    }

    #[test]
    fn test_assert() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        assert!(evaluator.evaluate_source("[kernel assert: 1 == 1]", "kernel.ty").is_ok());
        let error = evaluator
            .evaluate_source("[kernel assert: 1 == 2]", "kernel.ty")
            .unwrap_err();
        assert!(error.message.contains("AssertFailedException"), "{}", error.message);
    }

    #[test]
    fn test_kernel_globals_are_constant() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let error = evaluator.evaluate_source("io = 3", "kernel.ty").unwrap_err();
        assert!(error.message.contains("ConstantRedefinitionException"), "{}", error.message);
    }

    #[test]
    fn test_collect_garbage_keeps_reachable_objects() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let source = "a = [1, 2, 3]\n[kernel collectGarbage]\n[a objectAtIndex: 2]";
        let value = evaluator.evaluate_source(source, "kernel.ty").expect("evaluates");
        assert_eq!(evaluator.display_string(&value).expect("displays"), "3");
    }
}
