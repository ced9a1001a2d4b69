// Taffy Syntax Tree
// Graph nodes produced by the parser and walked by the evaluator. Every node
// carries the position it was parsed at for diagnostics and call stacks.

use std::fmt;
use std::sync::Arc;

use crate::class::ClassFlags;
use crate::error::Position;
use crate::scope::ScopeFlags;

pub type GraphRef = Arc<GraphNode>;

#[derive(Debug)]
pub struct GraphNode {
    pub kind: GraphKind,
    pub position: Position,
}

impl GraphNode {
    pub fn new(kind: GraphKind, position: Position) -> GraphRef {
        Arc::new(Self { kind, position })
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberLiteral {
    Integer(i64),
    Float(f64),
}

#[derive(Debug)]
pub struct CatchBlock {
    /// None catches anything
    pub class_name: Option<Arc<str>>,
    pub identifier: Arc<str>,
    pub statement: GraphRef,
}

#[derive(Debug)]
pub enum MemberDefinition {
    Variable {
        name: Arc<str>,
        flags: ScopeFlags,
        reader: bool,
        writer: bool,
    },
    Method {
        selector: Arc<str>,
        params: Vec<Arc<str>>,
        meta: bool,
        flags: ScopeFlags,
        body: GraphRef,
    },
    Class(GraphRef),
}

#[derive(Debug)]
pub struct ClassDefinition {
    pub name: Arc<str>,
    pub super_name: Option<Arc<str>>,
    pub class_flags: ClassFlags,
    pub protected: bool,
    pub members: Vec<MemberDefinition>,
}

#[derive(Debug)]
pub enum GraphKind {
    /// Statement chain
    Tree(Vec<GraphRef>),
    Nil,
    True,
    False,
    SelfRef,
    Super,
    UpSelf,
    Number(NumberLiteral),
    String(Arc<str>),
    Symbol(Arc<str>),
    Identifier(Arc<str>),
    Assignment {
        identifier: Arc<str>,
        value: GraphRef,
        flags: ScopeFlags,
    },
    And(GraphRef, GraphRef),
    Or(GraphRef, GraphRef),
    In(GraphRef, GraphRef),
    MethodCall {
        receiver: GraphRef,
        selector: Arc<str>,
        arguments: Vec<GraphRef>,
    },
    /// `a != b`, evaluated as the inverse of `==`
    NotEqualCall {
        receiver: GraphRef,
        argument: GraphRef,
    },
    New {
        class_name: Arc<str>,
    },
    If {
        condition: Option<GraphRef>,
        statement: GraphRef,
        next: Option<GraphRef>,
    },
    While {
        condition: GraphRef,
        statement: GraphRef,
    },
    For {
        initial: Vec<GraphRef>,
        condition: Option<GraphRef>,
        increment: Vec<GraphRef>,
        statement: GraphRef,
    },
    Break,
    Exit,
    Return(Option<GraphRef>),
    Throw(GraphRef),
    TryBlock {
        statement: GraphRef,
        catches: Vec<CatchBlock>,
    },
    Synchronized {
        object: GraphRef,
        statement: GraphRef,
    },
    Class(Arc<ClassDefinition>),
    Import {
        path: Arc<str>,
        wildcard: bool,
    },
    Package(Arc<str>),
    ArrayLiteral(Vec<GraphRef>),
    HashLiteral(Vec<(GraphRef, GraphRef)>),
    /// `^{ <params> body }`, evaluated to a Block object
    Block {
        params: Vec<Arc<str>>,
        body: GraphRef,
    },
}

impl GraphKind {
    pub fn name(&self) -> &'static str {
        match self {
            GraphKind::Tree(_) => "Tree",
            GraphKind::Nil => "Nil",
            GraphKind::True => "True",
            GraphKind::False => "False",
            GraphKind::SelfRef => "Self",
            GraphKind::Super => "Super",
            GraphKind::UpSelf => "UpSelf",
            GraphKind::Number(_) => "Number",
            GraphKind::String(_) => "String",
            GraphKind::Symbol(_) => "Symbol",
            GraphKind::Identifier(_) => "Identifier",
            GraphKind::Assignment { .. } => "Assignment",
            GraphKind::And(..) => "And",
            GraphKind::Or(..) => "Or",
            GraphKind::In(..) => "In",
            GraphKind::MethodCall { .. } => "MethodCall",
            GraphKind::NotEqualCall { .. } => "NotEqualCall",
            GraphKind::New { .. } => "New",
            GraphKind::If { .. } => "If",
            GraphKind::While { .. } => "While",
            GraphKind::For { .. } => "For",
            GraphKind::Break => "Break",
            GraphKind::Exit => "Exit",
            GraphKind::Return(_) => "Return",
            GraphKind::Throw(_) => "Throw",
            GraphKind::TryBlock { .. } => "TryBlock",
            GraphKind::Synchronized { .. } => "Synchronized",
            GraphKind::Class(_) => "Class",
            GraphKind::Import { .. } => "Import",
            GraphKind::Package(_) => "Package",
            GraphKind::ArrayLiteral(_) => "ArrayLiteral",
            GraphKind::HashLiteral(_) => "HashLiteral",
            GraphKind::Block { .. } => "Block",
        }
    }

    /// Nodes still evaluated while only class definitions are wanted
    pub fn is_class_level(&self) -> bool {
        matches!(
            self,
            GraphKind::Class(_) | GraphKind::Import { .. } | GraphKind::Package(_) | GraphKind::Tree(_)
        )
    }
}

/// Selector for a binary operator
pub fn operator_selector(operator: &str) -> String {
    format!("#operator({}):", operator)
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            GraphKind::Tree(nodes) => {
                let parts: Vec<String> = nodes.iter().map(|n| n.to_string()).collect();
                write!(f, "{}", parts.join("; "))
            }
            GraphKind::Nil => write!(f, "nil"),
            GraphKind::True => write!(f, "yes"),
            GraphKind::False => write!(f, "no"),
            GraphKind::SelfRef => write!(f, "self"),
            GraphKind::Super => write!(f, "super"),
            GraphKind::UpSelf => write!(f, "upSelf"),
            GraphKind::Number(NumberLiteral::Integer(n)) => write!(f, "{}", n),
            GraphKind::Number(NumberLiteral::Float(n)) => write!(f, "{}", n),
            GraphKind::String(s) => write!(f, "{:?}", s),
            GraphKind::Symbol(s) => write!(f, "#{}", s),
            GraphKind::Identifier(name) => write!(f, "{}", name),
            GraphKind::Assignment { identifier, value, .. } => {
                write!(f, "{} = {}", identifier, value)
            }
            GraphKind::And(a, b) => write!(f, "({} and {})", a, b),
            GraphKind::Or(a, b) => write!(f, "({} or {})", a, b),
            GraphKind::In(a, b) => write!(f, "({} in {})", a, b),
            GraphKind::MethodCall {
                receiver,
                selector,
                arguments,
            } => {
                if arguments.is_empty() {
                    return write!(f, "[{} {}]", receiver, selector);
                }
                let keywords: Vec<&str> = selector.split_inclusive(':').collect();
                write!(f, "[{}", receiver)?;
                for (keyword, argument) in keywords.iter().zip(arguments) {
                    write!(f, " {} {}", keyword, argument)?;
                }
                write!(f, "]")
            }
            GraphKind::NotEqualCall { receiver, argument } => {
                write!(f, "({} != {})", receiver, argument)
            }
            GraphKind::New { class_name } => write!(f, "new {}", class_name),
            GraphKind::Class(definition) => write!(f, "class {}", definition.name),
            GraphKind::Import { path, wildcard } => {
                write!(f, "import {}{}", path, if *wildcard { ".*" } else { "" })
            }
            GraphKind::Package(path) => write!(f, "package {}", path),
            GraphKind::Block { params, body } if params.is_empty() => write!(f, "^{{{}}}", body),
            GraphKind::Block { params, body } => write!(f, "^{{<{}> {}}}", params.join(", "), body),
            other => write!(f, "<{}>", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: GraphKind) -> GraphRef {
        GraphNode::new(kind, Position::default())
    }

    #[test]
    fn test_operator_selector() {
        assert_eq!(operator_selector("+"), "#operator(+):");
        assert_eq!(operator_selector("=="), "#operator(==):");
    }

    #[test]
    fn test_display_keyword_call() {
        let call = node(GraphKind::MethodCall {
            receiver: node(GraphKind::Identifier("d".into())),
            selector: "setObject:forKey:".into(),
            arguments: vec![
                node(GraphKind::Number(NumberLiteral::Integer(1))),
                node(GraphKind::String("a".into())),
            ],
        });
        assert_eq!(call.to_string(), "[d setObject: 1 forKey: \"a\"]");
    }

    #[test]
    fn test_class_level_kinds() {
        assert!(GraphKind::Package("a".into()).is_class_level());
        assert!(!GraphKind::Break.is_class_level());
    }
}
