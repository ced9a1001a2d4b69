// Taffy Scanner (Lexer)
// Converts source text into tokens, including `@`/`@@` names and `#symbols`

use crate::error::{Position, Span, TaffyError, TaffyResult};
use crate::lexer::token::{Token, TokenKind};

/// Scanner that tokenizes Taffy source code
pub struct Scanner {
    source: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: u32,
    column: u32,
    start_column: u32,
    file_id: u32,
    file: String,
}

impl Scanner {
    pub fn new(source: &str, file: impl Into<String>, file_id: u32) -> Self {
        Self {
            source: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_column: 1,
            file_id,
            file: file.into(),
        }
    }

    /// Scan all tokens from the source
    pub fn scan_tokens(mut self) -> TaffyResult<Vec<Token>> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_column = self.column;
            self.scan_token()?;
        }

        let end = self.position(self.column);
        self.tokens.push(Token::new(TokenKind::Eof, "", Span::single(end)));
        Ok(self.tokens)
    }

    fn scan_token(&mut self) -> TaffyResult<()> {
        let c = self.advance();

        match c {
            '(' => self.add_token(TokenKind::LeftParen),
            ')' => self.add_token(TokenKind::RightParen),
            '{' => self.add_token(TokenKind::LeftBrace),
            '}' => self.add_token(TokenKind::RightBrace),
            '[' => self.add_token(TokenKind::LeftBracket),
            ']' => self.add_token(TokenKind::RightBracket),
            ',' => self.add_token(TokenKind::Comma),
            '.' => self.add_token(TokenKind::Dot),
            ';' => self.add_token(TokenKind::Semicolon),
            ':' => self.add_token(TokenKind::Colon),
            '^' => self.add_token(TokenKind::Caret),
            '%' => self.add_token(TokenKind::Percent),

            '+' => {
                let kind = if self.match_char('=') {
                    TokenKind::PlusEqual
                } else if self.match_char('+') {
                    TokenKind::PlusPlus
                } else {
                    TokenKind::Plus
                };
                self.add_token(kind);
            }
            '-' => {
                let kind = if self.match_char('=') {
                    TokenKind::MinusEqual
                } else if self.match_char('-') {
                    TokenKind::MinusMinus
                } else {
                    TokenKind::Minus
                };
                self.add_token(kind);
            }
            '*' => {
                let kind = if self.match_char('=') {
                    TokenKind::StarEqual
                } else {
                    TokenKind::Star
                };
                self.add_token(kind);
            }
            '/' => {
                if self.match_char('/') {
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else if self.match_char('*') {
                    self.block_comment()?;
                } else if self.match_char('=') {
                    self.add_token(TokenKind::SlashEqual);
                } else {
                    self.add_token(TokenKind::Slash);
                }
            }
            '!' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::BangEqual);
                } else {
                    return Err(self
                        .error("Unexpected character '!'")
                        .with_help("Use '!=' to compare, or '== no' to negate"));
                }
            }
            '=' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::EqualEqual);
                } else if self.match_char('>') {
                    self.add_token(TokenKind::Arrow);
                } else {
                    self.add_token(TokenKind::Equal);
                }
            }
            '<' => {
                let kind = if self.match_char('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.add_token(kind);
            }
            '>' => {
                let kind = if self.match_char('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.add_token(kind);
            }
            '&' => {
                if self.match_char('&') {
                    self.add_token(TokenKind::AndAnd);
                } else {
                    return Err(self.error("Unexpected character '&'").with_help("Use '&&' or 'and'"));
                }
            }
            '|' => {
                if self.match_char('|') {
                    self.add_token(TokenKind::OrOr);
                } else {
                    return Err(self.error("Unexpected character '|'").with_help("Use '||' or 'or'"));
                }
            }

            ' ' | '\r' | '\t' => {}
            '\n' => {
                self.line += 1;
                self.column = 1;
            }

            '"' => self.string()?,
            '#' => self.symbol()?,
            '@' => self.instance_identifier()?,

            c if c.is_ascii_digit() => self.number()?,
            c if c.is_alphabetic() || c == '_' => self.identifier(),

            _ => {
                return Err(self
                    .error(&format!("Unexpected character '{}'", c))
                    .with_help("Remove this character or check for typos"));
            }
        }

        Ok(())
    }

    fn string(&mut self) -> TaffyResult<()> {
        let start = self.position(self.start_column);

        while self.peek() != '"' && !self.is_at_end() {
            if self.peek() == '\\' {
                self.advance();
                if !self.is_at_end() {
                    self.advance();
                }
            } else if self.peek() == '\n' {
                self.advance();
                self.line += 1;
                self.column = 1;
            } else {
                self.advance();
            }
        }

        if self.is_at_end() {
            return Err(TaffyError::syntax_error(
                "Unterminated string",
                Span::new(start, self.position(self.column)),
                &self.file,
            )
            .with_help("Add a closing double quote to terminate the string"));
        }

        self.advance();
        let value: String = self.source[self.start + 1..self.current - 1].iter().collect();
        let processed = self.process_escapes(&value)?;
        self.add_token(TokenKind::String(processed));
        Ok(())
    }

    fn process_escapes(&self, s: &str) -> TaffyResult<String> {
        let mut result = String::with_capacity(s.len());
        let mut chars = s.chars();

        while let Some(c) = chars.next() {
            if c != '\\' {
                result.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('0') => result.push('\0'),
                Some(other) => {
                    return Err(self
                        .error(&format!("Unknown escape sequence '\\{}'", other))
                        .with_help("Valid escapes are \\n, \\t, \\r, \\\\, \\\" and \\0"));
                }
                None => {
                    return Err(self.error("Incomplete escape sequence at end of string"));
                }
            }
        }

        Ok(result)
    }

    /// `#name`, `#key:word:` or `#operator(+):`
    fn symbol(&mut self) -> TaffyResult<()> {
        if !(self.peek().is_alphabetic() || self.peek() == '_') {
            return Err(self
                .error("Expected a name after '#'")
                .with_help("Symbols look like #name or #key:"));
        }
        while self.peek().is_alphanumeric() || self.peek() == '_' || self.peek() == ':' {
            self.advance();
        }
        let mut name: String = self.source[self.start + 1..self.current].iter().collect();

        if name == "operator" && self.peek() == '(' {
            self.advance();
            while self.peek() != ')' && !self.is_at_end() {
                self.advance();
            }
            if !self.match_char(')') {
                return Err(self.error("Unterminated operator symbol"));
            }
            self.match_char(':');
            name = self.source[self.start + 1..self.current].iter().collect();
        }

        self.add_token(TokenKind::Symbol(name));
        Ok(())
    }

    /// `@name` or `@@name`; a bare `@` or `@@` opens a method header
    fn instance_identifier(&mut self) -> TaffyResult<()> {
        self.match_char('@');
        if self.peek() == '@' {
            return Err(self
                .error("Too many '@' in name")
                .with_help("Instance variables look like @name, class variables like @@name"));
        }
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }
        let text: String = self.source[self.start..self.current].iter().collect();
        self.add_token(TokenKind::Identifier(text));
        Ok(())
    }

    fn number(&mut self) -> TaffyResult<()> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        let mut is_float = false;
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            is_float = true;
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let lexeme: String = self.source[self.start..self.current].iter().collect();
        let kind = if is_float {
            lexeme.parse().map(TokenKind::Float).ok()
        } else {
            lexeme.parse().map(TokenKind::Integer).ok()
        };
        let kind = kind.ok_or_else(|| self.error(&format!("Invalid number '{}'", lexeme)))?;
        self.add_token(kind);
        Ok(())
    }

    fn identifier(&mut self) {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }

        let text: String = self.source[self.start..self.current].iter().collect();
        let kind = TokenKind::keyword(&text).unwrap_or(TokenKind::Identifier(text));
        self.add_token(kind);
    }

    fn block_comment(&mut self) -> TaffyResult<()> {
        let start = self.position(self.start_column);

        while !self.is_at_end() {
            if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                return Ok(());
            }
            if self.peek() == '\n' {
                self.advance();
                self.line += 1;
                self.column = 1;
            } else {
                self.advance();
            }
        }

        Err(TaffyError::syntax_error(
            "Unterminated block comment",
            Span::new(start, self.position(self.column)),
            &self.file,
        )
        .with_help("Add '*/' to close the block comment"))
    }

    // Helper methods
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        self.column += 1;
        c
    }

    fn peek(&self) -> char {
        self.source.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.source.get(self.current + 1).copied().unwrap_or('\0')
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() != expected || self.is_at_end() {
            false
        } else {
            self.current += 1;
            self.column += 1;
            true
        }
    }

    fn position(&self, column: u32) -> Position {
        Position::new(self.file_id, self.line, column)
    }

    fn add_token(&mut self, kind: TokenKind) {
        let lexeme: String = self.source[self.start..self.current].iter().collect();
        let span = Span::new(
            self.position(self.start_column),
            self.position(self.column.saturating_sub(1)),
        );
        self.tokens.push(Token::new(kind, lexeme, span));
    }

    fn error(&self, message: &str) -> TaffyError {
        TaffyError::syntax_error(
            message,
            Span::new(self.position(self.start_column), self.position(self.column)),
            &self.file,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source, "test.ty", 0)
            .scan_tokens()
            .expect("scan")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_scan_instance_and_meta_identifiers() {
        assert_eq!(
            kinds("@x @@count"),
            vec![
                TokenKind::Identifier("@x".into()),
                TokenKind::Identifier("@@count".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_scan_numbers_and_operators() {
        assert_eq!(
            kinds("i += 1.5 != 2"),
            vec![
                TokenKind::Identifier("i".into()),
                TokenKind::PlusEqual,
                TokenKind::Float(1.5),
                TokenKind::BangEqual,
                TokenKind::Integer(2),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_scan_symbols() {
        assert_eq!(
            kinds("#name #at:put: #operator(+):"),
            vec![
                TokenKind::Symbol("name".into()),
                TokenKind::Symbol("at:put:".into()),
                TokenKind::Symbol("operator(+):".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_scan_keywords_and_aliases() {
        assert_eq!(
            kinds("yes no true nil upSelf"),
            vec![
                TokenKind::True,
                TokenKind::False,
                TokenKind::True,
                TokenKind::Nil,
                TokenKind::UpSelf,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_scan_tracks_lines() {
        let tokens = Scanner::new("a\n// note\nb", "t.ty", 3)
            .scan_tokens()
            .expect("scan");
        assert_eq!(tokens[0].line(), 1);
        assert_eq!(tokens[1].line(), 3);
        assert_eq!(tokens[1].span.start.file_id, 3);
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        let error = Scanner::new("\"abc", "t.ty", 0).scan_tokens().unwrap_err();
        assert!(error.message.contains("Unterminated string"));
        assert_eq!(error.help.as_deref(), Some("Add a closing double quote to terminate the string"));
    }
}
