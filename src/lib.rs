// Taffy Programming Language
// A class-based, tree-walking interpreter runtime

pub mod builtins;
pub mod class;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod lexer;
pub mod marshall;
pub mod node;
pub mod parser;
pub mod runtime;
pub mod scope;

pub use error::{TaffyError, TaffyResult};
pub use evaluator::{EvalResult, NodeEvaluator, Unwind};
pub use node::Node;
pub use runtime::{Runtime, RuntimeConfig};
