// Taffy Block Class
// `^{ <a, b> body }` literals. The payload is an array holding the literal's
// graph, the receiver and defining class it was written under, then the
// scopes it captured, innermost last.

use crate::class::{ClassFlags, ClassObject, ClassRef, ClassTemplate, NativeHooks, NativeMethod, OBJECT_CLASS};
use crate::evaluator::{EvalResult, NodeEvaluator};
use crate::graph::{GraphKind, GraphRef};
use crate::node::Node;

use super::{invalid_cast, CORE_PACKAGE};

static BLOCK_HOOKS: NativeHooks = NativeHooks {
    deallocate: Some(block_deallocate),
    methods: &[
        NativeMethod::new("call", block_call),
        NativeMethod::new("callWith:", block_call_with),
        NativeMethod::new("asString", block_as_string),
    ],
    ..NativeHooks::EMPTY
};

pub fn create_block_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "Block", Some(OBJECT_CLASS), ClassFlags::empty(), &BLOCK_HOOKS)
}

/// Captured scopes may still be in use elsewhere; only let go of them
fn block_deallocate(object: &ClassObject) {
    object.set_aux(None);
}

/// The literal a block was created from
pub fn block_graph(block: &ClassObject) -> Option<GraphRef> {
    let Some(Node::Array(parts)) = block.aux() else {
        return None;
    };
    let parts = parts.lock();
    match parts.first() {
        Some(Node::Graph(graph)) if matches!(graph.kind, GraphKind::Block { .. }) => Some(graph.clone()),
        _ => None,
    }
}

/// [block call]
fn block_call(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    evaluator.call_block(recv, &[])
}

/// [block callWith: [a, b]]
fn block_call_with(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let argument = args.first().cloned().unwrap_or_else(|| evaluator.nil());
    let items = match argument.as_class().and_then(|object| object.aux()) {
        Some(Node::Array(items)) => items.lock().clone(),
        _ => return Err(invalid_cast(evaluator, &argument, "Array")),
    };
    evaluator.call_block(recv, &items)
}

/// "#Block {<a, b> body}"
fn block_as_string(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let shown = match block_graph(recv) {
        Some(graph) => format!("#Block {}", graph.to_string().trim_start_matches('^')),
        None => "#Block".to_string(),
    };
    Ok(evaluator.new_string(&shown))
}

#[cfg(test)]
mod tests {
    use crate::runtime::{Runtime, RuntimeConfig};

    fn run(source: &str) -> String {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let value = evaluator.evaluate_source(source, "block.ty").expect("evaluates");
        evaluator.display_string(&value).expect("displays")
    }

    #[test]
    fn test_block_call_sees_enclosing_locals() {
        assert_eq!(run("base = 10\nadd = ^{ <n> base + n }\n[add callWith: [5]]"), "15");
    }

    #[test]
    fn test_block_writes_captured_variable() {
        assert_eq!(run("count = 0\nbump = ^{ count += 1 }\n[bump call]\n[bump call]\ncount"), "2");
    }

    #[test]
    fn test_block_locals_stay_inside() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let error = evaluator
            .evaluate_source("b = ^{ hidden = 1 }\n[b call]\nhidden", "block.ty")
            .unwrap_err();
        assert!(error.message.contains("UnidentifiedObjectException"), "{}", error.message);
    }

    #[test]
    fn test_block_as_string() {
        assert_eq!(run("b = ^{ <a, b> a + b }\n[b asString]"), "#Block {<a, b> [a #operator(+): b]}");
    }

    #[test]
    fn test_block_argument_count_checked() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let error = evaluator
            .evaluate_source("b = ^{ <a> a }\n[b call]", "block.ty")
            .unwrap_err();
        assert!(error.message.contains("InvalidNumberArgumentsException"), "{}", error.message);
    }
}
