// Taffy Token Definitions

use crate::error::Span;
use std::fmt;

/// All token types in Taffy
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Integer(i64),
    Float(f64),
    String(String),
    Symbol(String),

    /// Plain names, `@instance` and `@@meta` names
    Identifier(String),

    // Keywords
    Package,
    Import,
    Class,
    Abstract,
    Final,
    Singleton,
    Atomic,
    Protected,
    If,
    Else,
    While,
    For,
    Try,
    Catch,
    Throw,
    Return,
    Break,
    Exit,
    Synchronized,
    Global,
    Const,
    New,
    SelfKeyword,
    Super,
    UpSelf,
    Nil,
    True,
    False,
    And,
    Or,
    In,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Equal,
    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    PlusPlus,
    MinusMinus,
    AndAnd,
    OrOr,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Semicolon,
    Colon,
    Arrow,

    Eof,
}

impl TokenKind {
    pub fn keyword(text: &str) -> Option<TokenKind> {
        let kind = match text {
            "package" => TokenKind::Package,
            "import" => TokenKind::Import,
            "class" => TokenKind::Class,
            "abstract" => TokenKind::Abstract,
            "final" => TokenKind::Final,
            "singleton" => TokenKind::Singleton,
            "atomic" => TokenKind::Atomic,
            "protected" => TokenKind::Protected,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "throw" => TokenKind::Throw,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "exit" => TokenKind::Exit,
            "synchronized" => TokenKind::Synchronized,
            "global" => TokenKind::Global,
            "const" => TokenKind::Const,
            "new" => TokenKind::New,
            "self" => TokenKind::SelfKeyword,
            "super" => TokenKind::Super,
            "upSelf" => TokenKind::UpSelf,
            "nil" => TokenKind::Nil,
            "true" | "yes" => TokenKind::True,
            "false" | "no" => TokenKind::False,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "in" => TokenKind::In,
            _ => return None,
        };
        Some(kind)
    }

    /// Selector text of a binary operator token
    pub fn operator(&self) -> Option<&'static str> {
        let text = match self {
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Caret => "^",
            TokenKind::EqualEqual => "==",
            TokenKind::Less => "<",
            TokenKind::LessEqual => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEqual => ">=",
            _ => return None,
        };
        Some(text)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Integer(n) => write!(f, "{}", n),
            TokenKind::Float(n) => write!(f, "{}", n),
            TokenKind::String(s) => write!(f, "\"{}\"", s),
            TokenKind::Symbol(s) => write!(f, "#{}", s),
            TokenKind::Identifier(s) => write!(f, "{}", s),
            TokenKind::Package => write!(f, "package"),
            TokenKind::Import => write!(f, "import"),
            TokenKind::Class => write!(f, "class"),
            TokenKind::Abstract => write!(f, "abstract"),
            TokenKind::Final => write!(f, "final"),
            TokenKind::Singleton => write!(f, "singleton"),
            TokenKind::Atomic => write!(f, "atomic"),
            TokenKind::Protected => write!(f, "protected"),
            TokenKind::If => write!(f, "if"),
            TokenKind::Else => write!(f, "else"),
            TokenKind::While => write!(f, "while"),
            TokenKind::For => write!(f, "for"),
            TokenKind::Try => write!(f, "try"),
            TokenKind::Catch => write!(f, "catch"),
            TokenKind::Throw => write!(f, "throw"),
            TokenKind::Return => write!(f, "return"),
            TokenKind::Break => write!(f, "break"),
            TokenKind::Exit => write!(f, "exit"),
            TokenKind::Synchronized => write!(f, "synchronized"),
            TokenKind::Global => write!(f, "global"),
            TokenKind::Const => write!(f, "const"),
            TokenKind::New => write!(f, "new"),
            TokenKind::SelfKeyword => write!(f, "self"),
            TokenKind::Super => write!(f, "super"),
            TokenKind::UpSelf => write!(f, "upSelf"),
            TokenKind::Nil => write!(f, "nil"),
            TokenKind::True => write!(f, "yes"),
            TokenKind::False => write!(f, "no"),
            TokenKind::And => write!(f, "and"),
            TokenKind::Or => write!(f, "or"),
            TokenKind::In => write!(f, "in"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::Caret => write!(f, "^"),
            TokenKind::Equal => write!(f, "="),
            TokenKind::EqualEqual => write!(f, "=="),
            TokenKind::BangEqual => write!(f, "!="),
            TokenKind::Less => write!(f, "<"),
            TokenKind::LessEqual => write!(f, "<="),
            TokenKind::Greater => write!(f, ">"),
            TokenKind::GreaterEqual => write!(f, ">="),
            TokenKind::PlusEqual => write!(f, "+="),
            TokenKind::MinusEqual => write!(f, "-="),
            TokenKind::StarEqual => write!(f, "*="),
            TokenKind::SlashEqual => write!(f, "/="),
            TokenKind::PlusPlus => write!(f, "++"),
            TokenKind::MinusMinus => write!(f, "--"),
            TokenKind::AndAnd => write!(f, "&&"),
            TokenKind::OrOr => write!(f, "||"),
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::LeftBrace => write!(f, "{{"),
            TokenKind::RightBrace => write!(f, "}}"),
            TokenKind::LeftBracket => write!(f, "["),
            TokenKind::RightBracket => write!(f, "]"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Arrow => write!(f, "=>"),
            TokenKind::Eof => write!(f, "EOF"),
        }
    }
}

/// A token with its kind and position information
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    pub fn line(&self) -> u32 {
        self.span.start.line
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}
