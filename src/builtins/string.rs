// String and Symbol built-in classes
// Immutable text payloads; every operation answers a new object

use std::cmp::Ordering;
use std::sync::Arc;

use super::{invalid_cast, text_arg, CORE_PACKAGE};
use crate::class::{ClassFlags, ClassObject, ClassRef, ClassTemplate, NativeHooks, NativeMethod, OBJECT_CLASS};
use crate::evaluator::{EvalResult, NodeEvaluator};
use crate::node::Node;

static STRING_HOOKS: NativeHooks = NativeHooks {
    allocate: Some(string_allocate),
    methods: &[
        NativeMethod::new("#operator(+):", string_concat),
        NativeMethod::new("#operator(==):", string_equals),
        NativeMethod::new("#operator(<):", string_less),
        NativeMethod::new("#operator(>):", string_greater),
        NativeMethod::new("length", string_length),
        NativeMethod::new("asString", string_as_string),
        NativeMethod::new("asSymbol", string_as_symbol),
        NativeMethod::new("contains:", string_contains),
        NativeMethod::new("uppercase", string_uppercase),
        NativeMethod::new("lowercase", string_lowercase),
    ],
    ..NativeHooks::EMPTY
};

static SYMBOL_HOOKS: NativeHooks = NativeHooks {
    methods: &[NativeMethod::new("asString", symbol_as_string)],
    ..NativeHooks::EMPTY
};

pub fn create_string_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "String", Some(OBJECT_CLASS), ClassFlags::empty(), &STRING_HOOKS)
}

pub fn create_symbol_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "Symbol", Some(OBJECT_CLASS), ClassFlags::empty(), &SYMBOL_HOOKS)
}

fn string_allocate(_object: &ClassObject) -> Option<Node> {
    Some(Node::String(Arc::from("")))
}

fn text_of(recv: &ClassRef) -> Arc<str> {
    recv.string_value().unwrap_or_else(|| Arc::from(""))
}

/// Text of a String argument only; symbols and others yield None
fn string_payload(argument: &Node) -> Option<Arc<str>> {
    argument.as_class().and_then(|object| object.string_value())
}

/// "a" + x - appends the display text of any object
fn string_concat(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let suffix = evaluator.display_string(&args[0])?;
    let mut text = text_of(recv).to_string();
    text.push_str(&suffix);
    Ok(evaluator.new_string(&text))
}

fn string_equals(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let equal = string_payload(&args[0]).map_or(false, |other| other == text_of(recv));
    Ok(evaluator.boolean(equal))
}

fn compare_text(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult<Ordering> {
    match string_payload(&args[0]) {
        Some(other) => Ok(text_of(recv).cmp(&other)),
        None => Err(invalid_cast(evaluator, &args[0], "String")),
    }
}

fn string_less(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let order = compare_text(evaluator, recv, args)?;
    Ok(evaluator.boolean(order == Ordering::Less))
}

fn string_greater(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let order = compare_text(evaluator, recv, args)?;
    Ok(evaluator.boolean(order == Ordering::Greater))
}

/// [s length] - number of characters
fn string_length(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.new_integer(text_of(recv).chars().count() as i64))
}

fn string_as_string(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.new_string(&text_of(recv)))
}

fn string_as_symbol(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.new_symbol(&text_of(recv)))
}

/// [s contains: "sub"]
fn string_contains(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let needle = text_arg(evaluator, &args[0])?;
    Ok(evaluator.boolean(text_of(recv).contains(&*needle)))
}

fn string_uppercase(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.new_string(&text_of(recv).to_uppercase()))
}

fn string_lowercase(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.new_string(&text_of(recv).to_lowercase()))
}

/// [#name asString] - the name without its '#'
fn symbol_as_string(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let name = match recv.aux() {
        Some(Node::Symbol(name)) => name,
        _ => Arc::from(""),
    };
    Ok(evaluator.new_string(&name))
}

#[cfg(test)]
mod tests {
    use crate::runtime::{Runtime, RuntimeConfig};

    fn eval(source: &str) -> String {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let value = evaluator.evaluate_source(source, "string.ty").expect("evaluates");
        evaluator.display_string(&value).expect("displays")
    }

    #[test]
    fn test_concat_displays_argument() {
        assert_eq!(eval("\"a\" + \"b\""), "ab");
        assert_eq!(eval("\"n = \" + 4"), "n = 4");
        assert_eq!(eval("\"is \" + yes"), "is yes");
    }

    #[test]
    fn test_length_counts_characters() {
        assert_eq!(eval("[\"héllo\" length]"), "5");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("\"abc\" == \"abc\""), "yes");
        assert_eq!(eval("\"abc\" == #abc"), "no");
        assert_eq!(eval("\"abc\" < \"abd\""), "yes");
        assert_eq!(eval("[\"abc\" contains: \"bc\"]"), "yes");
    }

    #[test]
    fn test_symbols() {
        assert_eq!(eval("[#abc asString]"), "abc");
        assert_eq!(eval("#abc == #abc"), "yes");
        assert_eq!(eval("[\"abc\" asSymbol] == #abc"), "yes");
    }
}
