// Taffy Parser
// Recursive descent parser that converts tokens into graph nodes.
// Statements end at a newline or ';'. Messages are sent either in brackets,
// `[receiver selector]` and `[receiver key: a other: b]`, or bare on the
// same line, `receiver selector` and `receiver key: a`.

use std::sync::Arc;

use crate::class::ClassFlags;
use crate::error::{Position, TaffyError, TaffyResult};
use crate::graph::{
    operator_selector, CatchBlock, ClassDefinition, GraphKind, GraphNode, GraphRef,
    MemberDefinition, NumberLiteral,
};
use crate::lexer::{Scanner, Token, TokenKind};
use crate::scope::ScopeFlags;

/// Scan and parse a whole source file into a statement tree
pub fn parse_source(source: &str, file: &str, file_id: u32) -> TaffyResult<GraphRef> {
    let tokens = Scanner::new(source, file, file_id).scan_tokens()?;
    Parser::new(tokens, file, source).parse()
}

/// Recursive descent parser for Taffy
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    file: String,
    source: String,
    /// Whether bare (bracketless) messages may be parsed here
    bare_messages: bool,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, file: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            tokens,
            current: 0,
            file: file.into(),
            source: source.into(),
            bare_messages: true,
        }
    }

    /// Parse the entire program
    pub fn parse(&mut self) -> TaffyResult<GraphRef> {
        let position = self.position();
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.statement()?);
            self.end_statement()?;
        }
        Ok(GraphNode::new(GraphKind::Tree(statements), position))
    }

    // ==================== Statements ====================

    fn statement(&mut self) -> TaffyResult<GraphRef> {
        match self.peek().kind {
            TokenKind::Package => self.package_statement(),
            TokenKind::Import => self.import_statement(),
            TokenKind::Class
            | TokenKind::Abstract
            | TokenKind::Final
            | TokenKind::Singleton
            | TokenKind::Atomic
            | TokenKind::Protected => self.class_definition(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Try => self.try_statement(),
            TokenKind::Throw => {
                let position = self.advance_position();
                let value = self.expression()?;
                Ok(GraphNode::new(GraphKind::Throw(value), position))
            }
            TokenKind::Return => self.return_statement(),
            TokenKind::Break => Ok(GraphNode::new(GraphKind::Break, self.advance_position())),
            TokenKind::Exit => Ok(GraphNode::new(GraphKind::Exit, self.advance_position())),
            TokenKind::Synchronized => self.synchronized_statement(),
            TokenKind::Global => {
                self.advance();
                self.flagged_assignment(ScopeFlags::GLOBAL, "global")
            }
            TokenKind::Const => {
                self.advance();
                self.flagged_assignment(ScopeFlags::CONSTANT, "const")
            }
            _ => self.expression_statement(),
        }
    }

    /// A statement is followed by ';', a newline, a closing brace or the end
    fn end_statement(&mut self) -> TaffyResult<()> {
        if self.match_token(&TokenKind::Semicolon)
            || self.is_at_end()
            || self.check(&TokenKind::RightBrace)
            || !self.same_line()
        {
            return Ok(());
        }
        Err(self
            .error(&format!("Unexpected '{}' after statement", self.peek().lexeme))
            .with_help("Put each statement on its own line or separate them with ';'"))
    }

    fn block(&mut self) -> TaffyResult<GraphRef> {
        let position = self.position();
        self.consume(&TokenKind::LeftBrace, "Expected '{' to open a block")?;
        let statements = self.statements_to_brace()?;
        Ok(GraphNode::new(GraphKind::Tree(statements), position))
    }

    fn statements_to_brace(&mut self) -> TaffyResult<Vec<GraphRef>> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            statements.push(self.statement()?);
            self.end_statement()?;
        }
        self.consume(&TokenKind::RightBrace, "Expected '}' to close the block")?;
        Ok(statements)
    }

    /// `^{ <a, b> statements }`
    fn block_literal(&mut self) -> TaffyResult<GraphRef> {
        let position = self.advance_position();
        let body_position = self.position();
        self.consume(&TokenKind::LeftBrace, "Expected '{' after '^'")?;

        let mut params: Vec<Arc<str>> = Vec::new();
        if self.match_token(&TokenKind::Less) {
            loop {
                let name = self.consume_identifier("Expected a block parameter name")?;
                params.push(Arc::from(name.lexeme.as_str()));
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
            self.consume(&TokenKind::Greater, "Expected '>' after block parameters")?;
        }

        let saved = std::mem::replace(&mut self.bare_messages, true);
        let statements = self.statements_to_brace();
        self.bare_messages = saved;
        let body = GraphNode::new(GraphKind::Tree(statements?), body_position);
        Ok(GraphNode::new(GraphKind::Block { params, body }, position))
    }

    fn package_statement(&mut self) -> TaffyResult<GraphRef> {
        let position = self.advance_position();
        let (path, _) = self.dotted_name(false)?;
        Ok(GraphNode::new(GraphKind::Package(path), position))
    }

    fn import_statement(&mut self) -> TaffyResult<GraphRef> {
        let position = self.advance_position();
        let (path, wildcard) = self.dotted_name(true)?;
        Ok(GraphNode::new(GraphKind::Import { path, wildcard }, position))
    }

    /// `a.b.C`, or `a.b.*` when wildcards are allowed
    fn dotted_name(&mut self, allow_wildcard: bool) -> TaffyResult<(Arc<str>, bool)> {
        let first = self.consume_identifier("Expected a name")?.lexeme.clone();
        let mut path = first;
        while self.match_token(&TokenKind::Dot) {
            if allow_wildcard && self.match_token(&TokenKind::Star) {
                return Ok((Arc::from(path), true));
            }
            let segment = self
                .consume_identifier("Expected a name after '.'")?
                .lexeme
                .clone();
            path.push('.');
            path.push_str(&segment);
        }
        Ok((Arc::from(path), false))
    }

    fn if_statement(&mut self) -> TaffyResult<GraphRef> {
        let position = self.advance_position();
        let condition = self.expression()?;
        let statement = self.block()?;

        let next = if self.match_token(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                Some(self.if_statement()?)
            } else {
                let else_position = self.position();
                let statement = self.block()?;
                Some(GraphNode::new(
                    GraphKind::If {
                        condition: None,
                        statement,
                        next: None,
                    },
                    else_position,
                ))
            }
        } else {
            None
        };

        Ok(GraphNode::new(
            GraphKind::If {
                condition: Some(condition),
                statement,
                next,
            },
            position,
        ))
    }

    fn while_statement(&mut self) -> TaffyResult<GraphRef> {
        let position = self.advance_position();
        let condition = self.expression()?;
        let statement = self.block()?;
        Ok(GraphNode::new(GraphKind::While { condition, statement }, position))
    }

    /// `for (a = 0, b = 1; a < 3; a++) { }`
    fn for_statement(&mut self) -> TaffyResult<GraphRef> {
        let position = self.advance_position();
        self.consume(&TokenKind::LeftParen, "Expected '(' after 'for'")?;

        let initial = self.statement_list(&TokenKind::Semicolon)?;
        self.consume(&TokenKind::Semicolon, "Expected ';' after loop initializer")?;

        let condition = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(&TokenKind::Semicolon, "Expected ';' after loop condition")?;

        let increment = self.statement_list(&TokenKind::RightParen)?;
        self.consume(&TokenKind::RightParen, "Expected ')' after loop increment")?;

        let statement = self.block()?;
        Ok(GraphNode::new(
            GraphKind::For {
                initial,
                condition,
                increment,
                statement,
            },
            position,
        ))
    }

    fn statement_list(&mut self, end: &TokenKind) -> TaffyResult<Vec<GraphRef>> {
        let mut statements = Vec::new();
        if self.check(end) {
            return Ok(statements);
        }
        loop {
            statements.push(self.expression_statement()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        Ok(statements)
    }

    fn try_statement(&mut self) -> TaffyResult<GraphRef> {
        let position = self.advance_position();
        let statement = self.block()?;

        let mut catches = Vec::new();
        while self.match_token(&TokenKind::Catch) {
            self.consume(&TokenKind::LeftParen, "Expected '(' after 'catch'")?;
            let (first, _) = self.dotted_name(false)?;
            let (class_name, identifier) = if self.check_identifier() {
                let identifier: Arc<str> = Arc::from(self.advance().lexeme.as_str());
                (Some(first), identifier)
            } else {
                (None, first)
            };
            self.consume(&TokenKind::RightParen, "Expected ')' after catch clause")?;
            let body = self.block()?;
            catches.push(CatchBlock {
                class_name,
                identifier,
                statement: body,
            });
        }

        if catches.is_empty() {
            return Err(self
                .error("Expected 'catch' after try block")
                .with_help("Add a clause like 'catch (Exception e) { }'"));
        }

        Ok(GraphNode::new(GraphKind::TryBlock { statement, catches }, position))
    }

    fn return_statement(&mut self) -> TaffyResult<GraphRef> {
        let position = self.advance_position();
        let has_value = !self.is_at_end()
            && self.same_line()
            && !self.check(&TokenKind::RightBrace)
            && !self.check(&TokenKind::Semicolon);
        let value = if has_value {
            Some(self.expression()?)
        } else {
            None
        };
        Ok(GraphNode::new(GraphKind::Return(value), position))
    }

    fn synchronized_statement(&mut self) -> TaffyResult<GraphRef> {
        let position = self.advance_position();
        let object = self.expression()?;
        let statement = self.block()?;
        Ok(GraphNode::new(GraphKind::Synchronized { object, statement }, position))
    }

    fn flagged_assignment(&mut self, flags: ScopeFlags, keyword: &str) -> TaffyResult<GraphRef> {
        let statement = self.expression_statement()?;
        match &statement.kind {
            GraphKind::Assignment {
                identifier, value, ..
            } => Ok(GraphNode::new(
                GraphKind::Assignment {
                    identifier: identifier.clone(),
                    value: value.clone(),
                    flags,
                },
                statement.position,
            )),
            _ => Err(self
                .error(&format!("Expected an assignment after '{}'", keyword))
                .with_help(&format!("Write '{} name = value'", keyword))),
        }
    }

    /// An expression, or an assignment to a name (`=`, `+=`, `++` and friends)
    fn expression_statement(&mut self) -> TaffyResult<GraphRef> {
        let target = self.expression()?;

        let compound = match self.peek().kind {
            TokenKind::Equal => None,
            TokenKind::PlusEqual | TokenKind::PlusPlus => Some("+"),
            TokenKind::MinusEqual | TokenKind::MinusMinus => Some("-"),
            TokenKind::StarEqual => Some("*"),
            TokenKind::SlashEqual => Some("/"),
            _ => return Ok(target),
        };
        let operator = self.advance().kind.clone();

        let GraphKind::Identifier(identifier) = &target.kind else {
            return Err(self
                .error(&format!("Cannot assign to '{}'", target))
                .with_help("Only names like 'x', '@x' or '@@x' can be assigned"));
        };
        let position = target.position;

        let value = match operator {
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let one = GraphNode::new(GraphKind::Number(NumberLiteral::Integer(1)), position);
                binary_call(&target, compound.unwrap_or("+"), one)
            }
            TokenKind::Equal => self.expression()?,
            _ => {
                let operand = self.expression()?;
                binary_call(&target, compound.unwrap_or("+"), operand)
            }
        };

        Ok(GraphNode::new(
            GraphKind::Assignment {
                identifier: identifier.clone(),
                value,
                flags: ScopeFlags::empty(),
            },
            position,
        ))
    }

    // ==================== Classes ====================

    fn class_definition(&mut self) -> TaffyResult<GraphRef> {
        let position = self.position();
        let mut class_flags = ClassFlags::empty();
        let mut protected = false;
        loop {
            match self.peek().kind {
                TokenKind::Abstract => class_flags |= ClassFlags::ABSTRACT,
                TokenKind::Final => class_flags |= ClassFlags::FINAL,
                TokenKind::Singleton => class_flags |= ClassFlags::SINGLETON,
                TokenKind::Atomic => class_flags |= ClassFlags::ATOMIC,
                TokenKind::Protected => protected = true,
                _ => break,
            }
            self.advance();
        }
        self.consume(&TokenKind::Class, "Expected 'class'")?;

        let name = self.consume_identifier("Expected class name")?.lexeme.clone();
        if name.starts_with('@') {
            return Err(self.error("Class names cannot start with '@'"));
        }
        let name: Arc<str> = Arc::from(name);

        let super_name = if self.match_token(&TokenKind::LeftParen) {
            let (super_name, _) = self.dotted_name(false)?;
            self.consume(&TokenKind::RightParen, "Expected ')' after super class name")?;
            Some(super_name)
        } else {
            None
        };

        self.consume(&TokenKind::LeftBrace, "Expected '{' before class body")?;
        let mut members = Vec::new();
        let mut protected_section = false;
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            match &self.peek().kind {
                TokenKind::Identifier(text) if text == "@public" || text == "@protected" => {
                    protected_section = text == "@protected";
                    self.advance();
                }
                TokenKind::Identifier(text) if text.starts_with('@') => {
                    members.push(self.variable_declaration(protected_section)?);
                }
                TokenKind::LeftParen => members.push(self.method_definition(protected_section)?),
                TokenKind::Class
                | TokenKind::Abstract
                | TokenKind::Final
                | TokenKind::Singleton
                | TokenKind::Atomic
                | TokenKind::Protected => members.push(MemberDefinition::Class(self.class_definition()?)),
                _ => {
                    return Err(self
                        .error(&format!("Unexpected '{}' in class body", self.peek().lexeme))
                        .with_help("Class bodies hold '@x' declarations, '(@) method { }' definitions and nested classes"));
                }
            }
            self.match_token(&TokenKind::Semicolon);
        }
        self.consume(&TokenKind::RightBrace, "Expected '}' after class body")?;

        let definition = ClassDefinition {
            name,
            super_name,
            class_flags,
            protected,
            members,
        };
        Ok(GraphNode::new(GraphKind::Class(Arc::new(definition)), position))
    }

    /// `@x`, `@x, @rw`, `@@count, @r`
    fn variable_declaration(&mut self, protected_section: bool) -> TaffyResult<MemberDefinition> {
        let name: Arc<str> = Arc::from(self.advance().lexeme.as_str());
        let mut flags = ScopeFlags::empty();
        if protected_section {
            flags |= ScopeFlags::PROTECTED;
        }
        let (mut reader, mut writer) = (false, false);

        while self.match_token(&TokenKind::Comma) {
            let flag = self.consume_identifier("Expected a variable flag like @r or @rw")?;
            match flag.lexeme.as_str() {
                "@r" => reader = true,
                "@w" => writer = true,
                "@rw" => {
                    reader = true;
                    writer = true;
                }
                "@const" => flags |= ScopeFlags::CONSTANT,
                other => {
                    let message = format!("Unknown variable flag '{}'", other);
                    return Err(self.error(&message).with_help("Valid flags are @r, @w, @rw and @const"));
                }
            }
        }

        Ok(MemberDefinition::Variable {
            name,
            flags,
            reader,
            writer,
        })
    }

    /// `(@) name { }`, `(@@) key: a other: b { }`, `(@, @synchronized) + other { }`
    fn method_definition(&mut self, protected_section: bool) -> TaffyResult<MemberDefinition> {
        self.consume(&TokenKind::LeftParen, "Expected '(' to open a method header")?;
        let kind = self.consume_identifier("Expected '@' or '@@' in method header")?;
        let meta = match kind.lexeme.as_str() {
            "@" => false,
            "@@" => true,
            _ => {
                return Err(self
                    .error("Method headers start with '@' (instance) or '@@' (meta)")
                    .with_help("Write '(@) name { }' or '(@@) name { }'"));
            }
        };

        let mut flags = ScopeFlags::empty();
        if protected_section {
            flags |= ScopeFlags::PROTECTED;
        }
        while self.match_token(&TokenKind::Comma) {
            let flag = self.consume_identifier("Expected a method flag")?;
            flags |= match flag.lexeme.as_str() {
                "@synchronized" => ScopeFlags::SYNCHRONIZED,
                "@synchronizedRead" => ScopeFlags::SYNCHRONIZED_READ,
                "@synchronizedWrite" => ScopeFlags::SYNCHRONIZED_WRITE,
                "@const" => ScopeFlags::CONST,
                "@breakthrough" => ScopeFlags::BREAKTHROUGH,
                "@protected" => ScopeFlags::PROTECTED,
                other => {
                    let message = format!("Unknown method flag '{}'", other);
                    return Err(self.error(&message).with_help(
                        "Valid flags are @synchronized, @synchronizedRead, @synchronizedWrite, @const, @breakthrough and @protected",
                    ));
                }
            };
        }
        self.consume(&TokenKind::RightParen, "Expected ')' after method header")?;

        let (selector, params) = if let Some(operator) = self.peek().kind.operator() {
            self.advance();
            let param = self.consume_identifier("Expected parameter name after operator")?;
            let param: Arc<str> = Arc::from(param.lexeme.as_str());
            (operator_selector(operator), vec![param])
        } else if self.check_identifier() && self.check_ahead(1, &TokenKind::Colon) {
            let mut selector = String::new();
            let mut params: Vec<Arc<str>> = Vec::new();
            while self.check_identifier() && self.check_ahead(1, &TokenKind::Colon) {
                selector.push_str(&self.advance().lexeme.clone());
                selector.push(':');
                self.advance();
                let param = self.consume_identifier("Expected parameter name after ':'")?;
                params.push(Arc::from(param.lexeme.as_str()));
            }
            (selector, params)
        } else {
            let name = self.consume_identifier("Expected method name")?;
            (name.lexeme.clone(), Vec::new())
        };

        let body = self.block()?;
        Ok(MemberDefinition::Method {
            selector: Arc::from(selector),
            params,
            meta,
            flags,
            body,
        })
    }

    // ==================== Expressions ====================

    /// A full expression, including a trailing bare keyword message
    fn expression(&mut self) -> TaffyResult<GraphRef> {
        let expression = self.or()?;
        if self.bare_messages && self.bare_keyword_ahead() {
            return self.keyword_message(expression, false);
        }
        Ok(expression)
    }

    fn bare_keyword_ahead(&self) -> bool {
        self.same_line() && self.check_plain_identifier() && self.check_ahead(1, &TokenKind::Colon)
    }

    /// `key: arg other: arg`, closed by ']' when bracketed
    fn keyword_message(&mut self, receiver: GraphRef, bracketed: bool) -> TaffyResult<GraphRef> {
        let position = receiver.position;
        let mut selector = String::new();
        let mut arguments = Vec::new();
        loop {
            let keyword = self.advance().lexeme.clone();
            self.advance();
            selector.push_str(&keyword);
            selector.push(':');
            arguments.push(self.or()?);

            let more = if bracketed {
                self.check_plain_identifier() && self.check_ahead(1, &TokenKind::Colon)
            } else {
                self.bare_keyword_ahead()
            };
            if !more {
                break;
            }
        }
        Ok(GraphNode::new(
            GraphKind::MethodCall {
                receiver,
                selector: Arc::from(selector),
                arguments,
            },
            position,
        ))
    }

    fn or(&mut self) -> TaffyResult<GraphRef> {
        let mut left = self.and()?;
        while self.same_line() && (self.check(&TokenKind::Or) || self.check(&TokenKind::OrOr)) {
            self.advance();
            let right = self.and()?;
            let position = left.position;
            left = GraphNode::new(GraphKind::Or(left, right), position);
        }
        Ok(left)
    }

    fn and(&mut self) -> TaffyResult<GraphRef> {
        let mut left = self.membership()?;
        while self.same_line() && (self.check(&TokenKind::And) || self.check(&TokenKind::AndAnd)) {
            self.advance();
            let right = self.membership()?;
            let position = left.position;
            left = GraphNode::new(GraphKind::And(left, right), position);
        }
        Ok(left)
    }

    fn membership(&mut self) -> TaffyResult<GraphRef> {
        let left = self.equality()?;
        if self.same_line() && self.match_token(&TokenKind::In) {
            let right = self.equality()?;
            let position = left.position;
            return Ok(GraphNode::new(GraphKind::In(left, right), position));
        }
        Ok(left)
    }

    fn equality(&mut self) -> TaffyResult<GraphRef> {
        let mut left = self.comparison()?;
        loop {
            if !self.same_line() {
                break;
            }
            if self.match_token(&TokenKind::EqualEqual) {
                let right = self.comparison()?;
                left = binary_call(&left, "==", right);
            } else if self.match_token(&TokenKind::BangEqual) {
                let right = self.comparison()?;
                let position = left.position;
                left = GraphNode::new(
                    GraphKind::NotEqualCall {
                        receiver: left,
                        argument: right,
                    },
                    position,
                );
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn comparison(&mut self) -> TaffyResult<GraphRef> {
        self.binary_level(
            &[TokenKind::Less, TokenKind::LessEqual, TokenKind::Greater, TokenKind::GreaterEqual],
            Self::term,
        )
    }

    fn term(&mut self) -> TaffyResult<GraphRef> {
        self.binary_level(&[TokenKind::Plus, TokenKind::Minus], Self::factor)
    }

    fn factor(&mut self) -> TaffyResult<GraphRef> {
        self.binary_level(&[TokenKind::Star, TokenKind::Slash, TokenKind::Percent], Self::power)
    }

    fn power(&mut self) -> TaffyResult<GraphRef> {
        self.binary_level(&[TokenKind::Caret], Self::unary)
    }

    fn binary_level(
        &mut self,
        operators: &[TokenKind],
        next: fn(&mut Self) -> TaffyResult<GraphRef>,
    ) -> TaffyResult<GraphRef> {
        let mut left = next(self)?;
        while self.same_line() && operators.iter().any(|op| self.check(op)) {
            let operator = self.advance().kind.operator().unwrap_or("+");
            let right = next(self)?;
            left = binary_call(&left, operator, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> TaffyResult<GraphRef> {
        if self.check(&TokenKind::Minus) {
            let position = self.advance_position();
            let operand = self.unary()?;
            if let GraphKind::Number(literal) = operand.kind {
                let negated = match literal {
                    NumberLiteral::Integer(n) => NumberLiteral::Integer(-n),
                    NumberLiteral::Float(n) => NumberLiteral::Float(-n),
                };
                return Ok(GraphNode::new(GraphKind::Number(negated), position));
            }
            let zero = GraphNode::new(GraphKind::Number(NumberLiteral::Integer(0)), position);
            return Ok(binary_call(&zero, "-", operand));
        }
        self.call()
    }

    /// Primary followed by bare unary messages on the same line
    fn call(&mut self) -> TaffyResult<GraphRef> {
        let mut expression = self.primary()?;
        while self.bare_messages
            && self.same_line()
            && self.check_plain_identifier()
            && !self.check_ahead(1, &TokenKind::Colon)
        {
            let selector: Arc<str> = Arc::from(self.advance().lexeme.as_str());
            let position = expression.position;
            expression = GraphNode::new(
                GraphKind::MethodCall {
                    receiver: expression,
                    selector,
                    arguments: Vec::new(),
                },
                position,
            );
        }
        Ok(expression)
    }

    fn primary(&mut self) -> TaffyResult<GraphRef> {
        let position = self.position();
        let kind = match self.peek().kind.clone() {
            TokenKind::Integer(n) => GraphKind::Number(NumberLiteral::Integer(n)),
            TokenKind::Float(n) => GraphKind::Number(NumberLiteral::Float(n)),
            TokenKind::String(s) => GraphKind::String(Arc::from(s)),
            TokenKind::Symbol(s) => GraphKind::Symbol(Arc::from(s)),
            TokenKind::Nil => GraphKind::Nil,
            TokenKind::True => GraphKind::True,
            TokenKind::False => GraphKind::False,
            TokenKind::SelfKeyword => GraphKind::SelfRef,
            TokenKind::Super => GraphKind::Super,
            TokenKind::UpSelf => GraphKind::UpSelf,
            TokenKind::Identifier(name) => {
                if name == "@" || name == "@@" {
                    return Err(self.error("Expected a name after '@'"));
                }
                GraphKind::Identifier(Arc::from(name))
            }
            TokenKind::New => {
                self.advance();
                let (class_name, _) = self.dotted_name(false)?;
                return Ok(GraphNode::new(GraphKind::New { class_name }, position));
            }
            TokenKind::Caret => return self.block_literal(),
            TokenKind::LeftParen => return self.parenthesized(),
            TokenKind::LeftBracket => return self.bracketed(),
            _ => {
                let message = format!("Expected expression, found '{}'", self.peek().lexeme);
                return Err(self.error(&message));
            }
        };
        self.advance();
        Ok(GraphNode::new(kind, position))
    }

    /// `(expression)` or a hash literal `(k => v, ...)`
    fn parenthesized(&mut self) -> TaffyResult<GraphRef> {
        let position = self.advance_position();
        let saved = std::mem::replace(&mut self.bare_messages, true);
        let first = self.expression();
        let result = first.and_then(|first| {
            if !self.match_token(&TokenKind::Arrow) {
                self.consume(&TokenKind::RightParen, "Expected ')' after expression")?;
                return Ok(first);
            }
            let mut pairs = vec![(first, self.expression()?)];
            while self.match_token(&TokenKind::Comma) {
                let key = self.expression()?;
                self.consume(&TokenKind::Arrow, "Expected '=>' in hash literal")?;
                pairs.push((key, self.expression()?));
            }
            self.consume(&TokenKind::RightParen, "Expected ')' after hash literal")?;
            Ok(GraphNode::new(GraphKind::HashLiteral(pairs), position))
        });
        self.bare_messages = saved;
        result
    }

    /// `[a, b]`, `[receiver selector]` or `[receiver key: a other: b]`
    fn bracketed(&mut self) -> TaffyResult<GraphRef> {
        let position = self.advance_position();
        if self.match_token(&TokenKind::RightBracket) {
            return Ok(GraphNode::new(GraphKind::ArrayLiteral(Vec::new()), position));
        }

        let saved = std::mem::replace(&mut self.bare_messages, false);
        let first = self.or();
        self.bare_messages = saved;
        let first = first?;

        if self.check(&TokenKind::Comma) || self.check(&TokenKind::RightBracket) {
            let mut items = vec![first];
            while self.match_token(&TokenKind::Comma) {
                items.push(self.expression()?);
            }
            self.consume(&TokenKind::RightBracket, "Expected ']' after array items")?;
            return Ok(GraphNode::new(GraphKind::ArrayLiteral(items), position));
        }

        if !self.check_plain_identifier() {
            return Err(self
                .error("Expected a selector or ',' inside brackets")
                .with_help("Send a message with [receiver selector] or write an array as [a, b]"));
        }

        let saved = std::mem::replace(&mut self.bare_messages, true);
        let message = if self.check_ahead(1, &TokenKind::Colon) {
            self.keyword_message(first, true)
        } else {
            let selector: Arc<str> = Arc::from(self.advance().lexeme.as_str());
            Ok(GraphNode::new(
                GraphKind::MethodCall {
                    receiver: first,
                    selector,
                    arguments: Vec::new(),
                },
                position,
            ))
        };
        self.bare_messages = saved;
        let message = message?;
        self.consume(&TokenKind::RightBracket, "Expected ']' after message")?;
        Ok(message)
    }

    // ==================== Helpers ====================

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn position(&self) -> Position {
        self.peek().span.start
    }

    fn advance_position(&mut self) -> Position {
        self.advance().span.start
    }

    /// The next token starts on the line the previous one ended on
    fn same_line(&self) -> bool {
        self.current == 0 || self.peek().line() == self.previous().span.end.line
    }

    fn check(&self, kind: &TokenKind) -> bool {
        if self.is_at_end() {
            return false;
        }
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn check_identifier(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Identifier(_))
    }

    /// An identifier usable as a selector (no '@' prefix)
    fn check_plain_identifier(&self) -> bool {
        matches!(&self.peek().kind, TokenKind::Identifier(name) if !name.starts_with('@'))
    }

    fn check_ahead(&self, n: usize, kind: &TokenKind) -> bool {
        self.tokens
            .get(self.current + n)
            .map_or(false, |token| std::mem::discriminant(&token.kind) == std::mem::discriminant(kind))
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) -> TaffyResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> TaffyResult<&Token> {
        if self.check_identifier() {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: &str) -> TaffyError {
        let token = self.peek();
        TaffyError::syntax_error(message, token.span, &self.file).with_source(&self.source)
    }
}

fn binary_call(left: &GraphRef, operator: &str, right: GraphRef) -> GraphRef {
    GraphNode::new(
        GraphKind::MethodCall {
            receiver: left.clone(),
            selector: Arc::from(operator_selector(operator)),
            arguments: vec![right],
        },
        left.position,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> GraphRef {
        parse_source(source, "test.ty", 0).expect("parse")
    }

    fn statements(tree: &GraphRef) -> &[GraphRef] {
        match &tree.kind {
            GraphKind::Tree(nodes) => nodes,
            other => panic!("expected tree, got {}", other.name()),
        }
    }

    #[test]
    fn test_parse_bracket_and_bare_messages() {
        let tree = parse("[d setObject: 1 forKey: \"a\"]\nx = d size\nkernel print: x + 1");
        let nodes = statements(&tree);
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].to_string(), "[d setObject: 1 forKey: \"a\"]");
        assert_eq!(nodes[1].to_string(), "x = [d size]");
        assert_eq!(nodes[2].to_string(), "[kernel print: [x #operator(+): 1]]");
    }

    #[test]
    fn test_parse_array_versus_message() {
        let tree = parse("a = [1, 2]\nb = [a size]\nc = []");
        let nodes = statements(&tree);
        let GraphKind::Assignment { value, .. } = &nodes[0].kind else { panic!("assignment") };
        assert!(matches!(value.kind, GraphKind::ArrayLiteral(ref items) if items.len() == 2));
        let GraphKind::Assignment { value, .. } = &nodes[1].kind else { panic!("assignment") };
        assert!(matches!(value.kind, GraphKind::MethodCall { .. }));
        let GraphKind::Assignment { value, .. } = &nodes[2].kind else { panic!("assignment") };
        assert!(matches!(value.kind, GraphKind::ArrayLiteral(ref items) if items.is_empty()));
    }

    #[test]
    fn test_parse_compound_assignment_and_increment() {
        let tree = parse("i++; j += 2");
        let nodes = statements(&tree);
        assert_eq!(nodes[0].to_string(), "i = [i #operator(+): 1]");
        assert_eq!(nodes[1].to_string(), "j = [j #operator(+): 2]");
    }

    #[test]
    fn test_parse_not_equal_and_logic() {
        let tree = parse("a != b and c or d");
        assert_eq!(statements(&tree)[0].to_string(), "(((a != b) and c) or d)");
    }

    #[test]
    fn test_parse_class_definition() {
        let source = "\
final class B(a.A) {
    @x, @rw
    @@count, @r
    @protected
    @secret
    (@) set: a and: b { @x = a }
    (@@, @synchronized) make { return new B }
    (@) + other { return 1 }
    class Inner {}
}";
        let tree = parse(source);
        let GraphKind::Class(definition) = &statements(&tree)[0].kind else { panic!("class") };
        assert_eq!(&*definition.name, "B");
        assert_eq!(definition.super_name.as_deref(), Some("a.A"));
        assert!(definition.class_flags.contains(ClassFlags::FINAL));
        assert_eq!(definition.members.len(), 7);

        let MemberDefinition::Variable { reader, writer, .. } = &definition.members[0] else { panic!("var") };
        assert!(*reader && *writer);
        let MemberDefinition::Variable { flags, .. } = &definition.members[2] else { panic!("var") };
        assert!(flags.contains(ScopeFlags::PROTECTED));
        let MemberDefinition::Method { selector, params, .. } = &definition.members[3] else { panic!("method") };
        assert_eq!(&**selector, "set:and:");
        assert_eq!(params.len(), 2);
        let MemberDefinition::Method { meta, flags, .. } = &definition.members[4] else { panic!("method") };
        assert!(*meta && flags.contains(ScopeFlags::SYNCHRONIZED));
        let MemberDefinition::Method { selector, .. } = &definition.members[5] else { panic!("method") };
        assert_eq!(&**selector, "#operator(+):");
        assert!(matches!(definition.members[6], MemberDefinition::Class(_)));
    }

    #[test]
    fn test_parse_control_flow() {
        let source = "\
for (a = 0, b = 0; a < 3; a++, b += 2) { if (a == 1) { break } else if (a == 2) { exit } else { } }
while (yes) { break }
try { throw new Exception } catch (UnidentifiedObjectException e) { } catch (e) { }
synchronized (self) { return (1) }
import org.taffy.core.*
package my.pkg";
        let tree = parse(source);
        let nodes = statements(&tree);
        assert_eq!(nodes.len(), 6);
        let GraphKind::For { initial, increment, condition, .. } = &nodes[0].kind else { panic!("for") };
        assert_eq!((initial.len(), increment.len()), (2, 2));
        assert!(condition.is_some());
        let GraphKind::TryBlock { catches, .. } = &nodes[2].kind else { panic!("try") };
        assert_eq!(catches[0].class_name.as_deref(), Some("UnidentifiedObjectException"));
        assert!(catches[1].class_name.is_none());
        assert!(matches!(nodes[4].kind, GraphKind::Import { wildcard: true, .. }));
        assert!(matches!(nodes[5].kind, GraphKind::Package(ref p) if &**p == "my.pkg"));
    }

    #[test]
    fn test_parse_hash_literal_and_negative_numbers() {
        let tree = parse("h = (\"a\" => 1, #b => -2)");
        let GraphKind::Assignment { value, .. } = &statements(&tree)[0].kind else { panic!("assignment") };
        let GraphKind::HashLiteral(pairs) = &value.kind else { panic!("hash") };
        assert_eq!(pairs.len(), 2);
        assert!(matches!(pairs[1].1.kind, GraphKind::Number(NumberLiteral::Integer(-2))));
    }

    #[test]
    fn test_parse_global_and_const() {
        let tree = parse("global g = 1\nconst c = 2");
        let nodes = statements(&tree);
        assert!(matches!(&nodes[0].kind, GraphKind::Assignment { flags, .. } if flags.contains(ScopeFlags::GLOBAL)));
        assert!(matches!(&nodes[1].kind, GraphKind::Assignment { flags, .. } if flags.contains(ScopeFlags::CONSTANT)));
    }

    #[test]
    fn test_parse_block_literal() {
        let tree = parse("b = ^{ <a, b> c = a + b\n c }\n[list add: ^{ 1 }]");
        let nodes = statements(&tree);
        let GraphKind::Assignment { value, .. } = &nodes[0].kind else { panic!("assignment") };
        let GraphKind::Block { params, body } = &value.kind else { panic!("block") };
        assert_eq!(params.iter().map(|p| &**p).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(statements(body).len(), 2);
        assert_eq!(nodes[1].to_string(), "[list add: ^{1}]");
        assert!(parse_source("^ 1", "bad.ty", 0).is_err());
    }

    #[test]
    fn test_parse_error_has_help_and_source() {
        let error = parse_source("x = 1 2", "bad.ty", 0).unwrap_err();
        assert!(error.message.contains("after statement"));
        assert!(error.help.is_some());
    }
}
