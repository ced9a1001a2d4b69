// Taffy Methods
// A procedure bound under a selector, with either a Taffy body or a
// native function pointer

use std::fmt;
use std::sync::Arc;

use crate::class::ClassRef;
use crate::evaluator::{EvalResult, NodeEvaluator};
use crate::graph::GraphRef;
use crate::node::Node;

/// Native method signature: evaluator, receiver cast to the defining class,
/// evaluated arguments
pub type NativeMethodFn = fn(&mut NodeEvaluator, &ClassRef, &[Node]) -> EvalResult;

#[derive(Clone)]
pub enum MethodBody {
    Taffy(GraphRef),
    Native(NativeMethodFn),
    /// Generated getter for the named variable
    Reader(Arc<str>),
    /// Generated setter for the named variable
    Writer(Arc<str>),
}

#[derive(Clone)]
pub struct Method {
    pub selector: Arc<str>,
    pub params: Vec<Arc<str>>,
    pub body: MethodBody,
}

impl Method {
    pub fn taffy(selector: impl Into<Arc<str>>, params: Vec<Arc<str>>, body: GraphRef) -> Self {
        Self {
            selector: selector.into(),
            params,
            body: MethodBody::Taffy(body),
        }
    }

    pub fn native(selector: impl Into<Arc<str>>, function: NativeMethodFn) -> Self {
        let selector: Arc<str> = selector.into();
        let params = (0..selector_arity(&selector))
            .map(|index| Arc::from(format!("arg{}", index)))
            .collect();
        Self {
            selector,
            params,
            body: MethodBody::Native(function),
        }
    }

    pub fn reader(variable: impl Into<Arc<str>>) -> Self {
        let variable: Arc<str> = variable.into();
        Self {
            selector: Arc::from(variable.trim_start_matches('@')),
            params: Vec::new(),
            body: MethodBody::Reader(variable),
        }
    }

    pub fn writer(variable: impl Into<Arc<str>>) -> Self {
        let variable: Arc<str> = variable.into();
        Self {
            selector: Arc::from(writer_selector(&variable)),
            params: vec![Arc::from("value")],
            body: MethodBody::Writer(variable),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_native(&self) -> bool {
        matches!(self.body, MethodBody::Native(_))
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({})", self.selector)
    }
}

/// Number of arguments a selector takes: one per keyword colon
pub fn selector_arity(selector: &str) -> usize {
    selector.matches(':').count()
}

/// `@x` becomes `setX:`, `@@count` becomes `setCount:`
pub fn writer_selector(variable: &str) -> String {
    let name = variable.trim_start_matches('@');
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("set{}{}:", first.to_uppercase(), chars.as_str()),
        None => "set:".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_arity() {
        assert_eq!(selector_arity("size"), 0);
        assert_eq!(selector_arity("#operator(+):"), 1);
        assert_eq!(selector_arity("setObject:forKey:"), 2);
    }

    #[test]
    fn test_writer_selector() {
        assert_eq!(writer_selector("@x"), "setX:");
        assert_eq!(writer_selector("@@count"), "setCount:");
    }

    #[test]
    fn test_reader_and_writer_methods() {
        let reader = Method::reader("@x");
        assert_eq!(&*reader.selector, "x");
        assert_eq!(reader.arity(), 0);

        let writer = Method::writer("@x");
        assert_eq!(&*writer.selector, "setX:");
        assert_eq!(writer.arity(), 1);
    }
}
