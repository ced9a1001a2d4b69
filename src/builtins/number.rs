// Number built-in class
// Integer and floating point arithmetic on the native payload. Integer
// operations stay integral until they overflow or divide unevenly.

use std::cmp::Ordering;

use super::{invalid_cast, number_arg, CORE_PACKAGE};
use crate::class::{ClassFlags, ClassObject, ClassRef, ClassTemplate, NativeHooks, NativeMethod, OBJECT_CLASS};
use crate::evaluator::{EvalResult, NodeEvaluator};
use crate::node::Node;

static NUMBER_HOOKS: NativeHooks = NativeHooks {
    allocate: Some(number_allocate),
    methods: &[
        NativeMethod::new("#operator(+):", number_add),
        NativeMethod::new("#operator(-):", number_subtract),
        NativeMethod::new("#operator(*):", number_multiply),
        NativeMethod::new("#operator(/):", number_divide),
        NativeMethod::new("#operator(%):", number_modulo),
        NativeMethod::new("#operator(^):", number_power),
        NativeMethod::new("#operator(==):", number_equals),
        NativeMethod::new("#operator(<):", number_less),
        NativeMethod::new("#operator(<=):", number_less_equal),
        NativeMethod::new("#operator(>):", number_greater),
        NativeMethod::new("#operator(>=):", number_greater_equal),
        NativeMethod::new("asString", number_as_string),
        NativeMethod::new("abs", number_abs),
        NativeMethod::new("sqrt", number_sqrt),
        NativeMethod::new("isInteger", number_is_integer),
        NativeMethod::new("asInteger", number_as_integer),
    ],
    ..NativeHooks::EMPTY
};

pub fn create_number_template() -> ClassTemplate {
    ClassTemplate::native(CORE_PACKAGE, "Number", Some(OBJECT_CLASS), ClassFlags::ATOMIC, &NUMBER_HOOKS)
}

fn number_allocate(_object: &ClassObject) -> Option<Node> {
    Some(Node::Int64(0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

#[derive(Debug, PartialEq, Eq)]
enum MathError {
    DivideByZero,
}

fn is_integral(node: &Node) -> bool {
    matches!(node, Node::Int32(_) | Node::UInt32(_) | Node::Int64(_))
}

/// Integer arithmetic when both sides are integers and the result fits,
/// floating point otherwise
fn apply(left: &Node, right: &Node, operation: Operation) -> Result<Node, MathError> {
    if let (true, true, Some(a), Some(b)) = (
        is_integral(left),
        is_integral(right),
        left.as_i64(),
        right.as_i64(),
    ) {
        let exact = match operation {
            Operation::Add => a.checked_add(b),
            Operation::Subtract => a.checked_sub(b),
            Operation::Multiply => a.checked_mul(b),
            Operation::Divide if b == 0 => return Err(MathError::DivideByZero),
            Operation::Divide => (a % b == 0).then(|| a / b),
            Operation::Modulo if b == 0 => return Err(MathError::DivideByZero),
            Operation::Modulo => a.checked_rem(b),
            Operation::Power => u32::try_from(b).ok().and_then(|b| a.checked_pow(b)),
        };
        if let Some(value) = exact {
            return Ok(Node::Int64(value));
        }
    }

    let a = left.as_f64().unwrap_or(f64::NAN);
    let b = right.as_f64().unwrap_or(f64::NAN);
    let value = match operation {
        Operation::Add => a + b,
        Operation::Subtract => a - b,
        Operation::Multiply => a * b,
        Operation::Divide | Operation::Modulo if b == 0.0 => return Err(MathError::DivideByZero),
        Operation::Divide => a / b,
        Operation::Modulo => a % b,
        Operation::Power => a.powf(b),
    };
    Ok(Node::Float(value))
}

fn value_of(recv: &ClassRef) -> Node {
    recv.aux().unwrap_or(Node::Int64(0))
}

fn arithmetic(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node], operation: Operation) -> EvalResult {
    let right = number_arg(evaluator, &args[0])?;
    match apply(&value_of(recv), &right, operation) {
        Ok(result) => Ok(evaluator.new_number(result)),
        Err(MathError::DivideByZero) => Err(evaluator.throw_named("DivideByZeroException", &[])),
    }
}

fn number_add(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    arithmetic(evaluator, recv, args, Operation::Add)
}

fn number_subtract(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    arithmetic(evaluator, recv, args, Operation::Subtract)
}

fn number_multiply(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    arithmetic(evaluator, recv, args, Operation::Multiply)
}

fn number_divide(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    arithmetic(evaluator, recv, args, Operation::Divide)
}

fn number_modulo(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    arithmetic(evaluator, recv, args, Operation::Modulo)
}

fn number_power(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    arithmetic(evaluator, recv, args, Operation::Power)
}

/// [a == b] - numeric equality; anything that is not a number is unequal
fn number_equals(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    let other = args[0]
        .as_class()
        .filter(|object| object.is_kind_of(&evaluator.runtime().core().number))
        .and_then(|object| object.aux());
    let equal = match other {
        Some(other) => value_of(recv).compare(&other) == Ok(Ordering::Equal),
        None => false,
    };
    Ok(evaluator.boolean(equal))
}

fn ordering(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node], accept: fn(Ordering) -> bool) -> EvalResult {
    let right = number_arg(evaluator, &args[0])?;
    match value_of(recv).compare(&right) {
        Ok(order) => Ok(evaluator.boolean(accept(order))),
        // NaN on either side
        Err(_) => Ok(evaluator.no()),
    }
}

fn number_less(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    ordering(evaluator, recv, args, Ordering::is_lt)
}

fn number_less_equal(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    ordering(evaluator, recv, args, Ordering::is_le)
}

fn number_greater(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    ordering(evaluator, recv, args, Ordering::is_gt)
}

fn number_greater_equal(evaluator: &mut NodeEvaluator, recv: &ClassRef, args: &[Node]) -> EvalResult {
    ordering(evaluator, recv, args, Ordering::is_ge)
}

fn number_as_string(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.new_string(&value_of(recv).to_string()))
}

fn number_abs(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let value = value_of(recv);
    let result = match value.as_i64().filter(|_| is_integral(&value)) {
        Some(n) => n.checked_abs().map(Node::Int64).unwrap_or(Node::Float((n as f64).abs())),
        None => Node::Float(value.as_f64().unwrap_or(f64::NAN).abs()),
    };
    Ok(evaluator.new_number(result))
}

/// [n sqrt] - negative numbers raise UnsupportedMathOperationException
fn number_sqrt(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    let value = value_of(recv).as_f64().unwrap_or(f64::NAN);
    if value < 0.0 {
        let operation = evaluator.new_string("sqrt");
        return Err(evaluator.throw_named(
            "UnsupportedMathOperationException",
            &[("@operation", operation)],
        ));
    }
    Ok(evaluator.new_float(value.sqrt()))
}

fn number_is_integer(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    Ok(evaluator.boolean(value_of(recv).as_i64().is_some()))
}

/// [n asInteger] - truncates toward zero
fn number_as_integer(evaluator: &mut NodeEvaluator, recv: &ClassRef, _args: &[Node]) -> EvalResult {
    match value_of(recv).as_f64() {
        Some(n) if n.is_finite() => Ok(evaluator.new_integer(n.trunc() as i64)),
        _ => Err(invalid_cast(evaluator, &Node::Class(recv.clone()), "Integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Runtime, RuntimeConfig};

    fn eval(source: &str) -> String {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let value = evaluator.evaluate_source(source, "number.ty").expect("evaluates");
        evaluator.display_string(&value).expect("displays")
    }

    #[test]
    fn test_integer_arithmetic_stays_integral() {
        assert!(matches!(apply(&Node::Int64(7), &Node::Int64(2), Operation::Add), Ok(Node::Int64(9))));
        assert!(matches!(apply(&Node::Int64(3), &Node::Int64(4), Operation::Power), Ok(Node::Int64(81))));
        assert!(matches!(apply(&Node::Int64(-7), &Node::Int64(3), Operation::Modulo), Ok(Node::Int64(-1))));
    }

    #[test]
    fn test_uneven_division_is_float() {
        let result = apply(&Node::Int64(7), &Node::Int64(2), Operation::Divide).expect("divides");
        assert_eq!(result.as_f64(), Some(3.5));
        assert!(matches!(apply(&Node::Int64(8), &Node::Int64(2), Operation::Divide), Ok(Node::Int64(4))));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            apply(&Node::Int64(1), &Node::Int64(0), Operation::Divide).err(),
            Some(MathError::DivideByZero)
        );
        assert_eq!(
            apply(&Node::Float(1.0), &Node::Float(0.0), Operation::Modulo).err(),
            Some(MathError::DivideByZero)
        );
    }

    #[test]
    fn test_overflow_falls_back_to_float() {
        let result = apply(&Node::Int64(i64::MAX), &Node::Int64(1), Operation::Add).expect("adds");
        assert!(matches!(result, Node::Float(_)));
    }

    #[test]
    fn test_operators_from_source() {
        assert_eq!(eval("1 + 2 * 3"), "7");
        assert_eq!(eval("2 ^ 10"), "1024");
        assert_eq!(eval("10 % 4"), "2");
        assert_eq!(eval("3 < 4"), "yes");
        assert_eq!(eval("3 >= 4"), "no");
        assert_eq!(eval("1.5 + 1"), "2.5");
        assert_eq!(eval("[-4 abs]"), "4");
        assert_eq!(eval("[16 sqrt]"), "4");
    }

    #[test]
    fn test_divide_by_zero_from_source() {
        let runtime = Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime");
        let mut evaluator = runtime.create_evaluator();
        let error = evaluator.evaluate_source("1 / 0", "number.ty").unwrap_err();
        assert!(error.message.contains("DivideByZeroException"));
    }

    #[test]
    fn test_number_equality_with_other_types() {
        assert_eq!(eval("1 == 1.0"), "yes");
        assert_eq!(eval("1 == \"1\""), "no");
        assert_eq!(eval("1 != 2"), "yes");
    }
}
