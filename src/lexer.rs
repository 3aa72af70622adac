//! Lexical analysis for embedded Go code
//!
//! Produces tokens with byte offsets into the source so declarations and
//! bodies can be sliced back out verbatim. Semicolons are inserted at line
//! ends following the Go rules.

use crate::error::{Diagnostic, Span, UnitResult};
use crate::utils::is_go_keyword;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Identifier,
    Keyword,
    Number,
    Char,
    String,
    RawString,
    Operator,
    Comment,
    /// Explicit `;` or one inserted at a line end
    Semicolon,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub token_type: TokenType,
    pub text: String,
    /// Byte range in the lexed source
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn is(&self, token_type: TokenType, text: &str) -> bool {
        self.token_type == token_type && self.text == text
    }

    pub fn is_op(&self, text: &str) -> bool {
        self.is(TokenType::Operator, text)
    }

    /// Semicolon inserted at a line break rather than written
    pub fn is_auto_semicolon(&self) -> bool {
        self.token_type == TokenType::Semicolon && self.text != ";"
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Identifier => write!(f, "identifier"),
            TokenType::Keyword => write!(f, "keyword"),
            TokenType::Number => write!(f, "number"),
            TokenType::Char => write!(f, "rune literal"),
            TokenType::String | TokenType::RawString => write!(f, "string literal"),
            TokenType::Operator => write!(f, "operator"),
            TokenType::Comment => write!(f, "comment"),
            TokenType::Semicolon => write!(f, "';'"),
            TokenType::Eof => write!(f, "end of script"),
        }
    }
}

const OPERATORS: &[&str] = &[
    "<<=", ">>=", "&^=", "...", "&&", "||", "<-", "++", "--", "==", "!=", "<=", ">=", ":=", "+=",
    "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<", ">>", "&^", "+", "-", "*", "/", "%", "&", "|",
    "^", "<", ">", "=", "!", "(", ")", "[", "]", "{", "}", ",", ".", ":", "~",
];

pub struct Lexer<'a> {
    source: &'a str,
    input: Vec<(usize, char)>,
    position: usize,
    line: usize,
    column: usize,
    base: Span,
}

impl<'a> Lexer<'a> {
    /// `base` is the file position where `source` starts
    pub fn new(source: &'a str, base: Span) -> Self {
        Self {
            source,
            input: source.char_indices().collect(),
            position: 0,
            line: 1,
            column: 1,
            base,
        }
    }

    pub fn tokenize(&mut self) -> UnitResult<Vec<Token>> {
        let mut tokens: Vec<Token> = Vec::new();

        loop {
            let newline = self.skip_whitespace();
            if newline && needs_semicolon(last_code_token(&tokens)) {
                let (start, line, column) = self.newline_position(&tokens);
                tokens.push(Token {
                    token_type: TokenType::Semicolon,
                    text: "\n".to_string(),
                    start,
                    end: start,
                    line,
                    column,
                });
            }

            if self.is_at_end() {
                break;
            }

            let token = self.next_token()?;
            if token.token_type == TokenType::Comment && token.text.starts_with("/*") && token.text.contains('\n') {
                // A multi-line comment acts like a newline
                if needs_semicolon(last_code_token(&tokens)) {
                    tokens.push(Token {
                        token_type: TokenType::Semicolon,
                        text: "\n".to_string(),
                        start: token.start,
                        end: token.start,
                        line: token.line,
                        column: token.column,
                    });
                }
            }
            tokens.push(token);
        }

        if needs_semicolon(last_code_token(&tokens)) {
            tokens.push(self.make_token(TokenType::Semicolon, "\n".to_string(), self.offset(), self.line, self.column));
        }
        tokens.push(self.make_token(TokenType::Eof, String::new(), self.offset(), self.line, self.column));
        Ok(tokens)
    }

    /// Where an inserted semicolon goes: right after the last code token
    fn newline_position(&self, tokens: &[Token]) -> (usize, usize, usize) {
        match last_code_token(tokens) {
            Some(token) => (token.end, token.line, token.column + token.text.chars().count()),
            None => (self.offset(), self.line, self.column),
        }
    }

    fn make_token(&self, token_type: TokenType, text: String, start: usize, line: usize, column: usize) -> Token {
        Token {
            token_type,
            end: start + text.len(),
            text,
            start,
            line,
            column,
        }
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> Diagnostic {
        Diagnostic::script(self.base.offset_by(line, column), message)
    }

    fn next_token(&mut self) -> UnitResult<Token> {
        let start = self.offset();
        let line = self.line;
        let column = self.column;
        let ch = self.advance();

        let token_type = match ch {
            '/' if self.peek() == Some('/') => {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
                TokenType::Comment
            }
            '/' if self.peek() == Some('*') => {
                self.advance();
                loop {
                    match self.advance_opt() {
                        Some('*') if self.peek() == Some('/') => {
                            self.advance();
                            break;
                        }
                        Some(_) => {}
                        None => return Err(self.error(line, column, "comment not terminated")),
                    }
                }
                TokenType::Comment
            }
            '"' => {
                self.read_quoted('"', line, column)?;
                TokenType::String
            }
            '\'' => {
                self.read_quoted('\'', line, column)?;
                TokenType::Char
            }
            '`' => {
                loop {
                    match self.advance_opt() {
                        Some('`') => break,
                        Some(_) => {}
                        None => return Err(self.error(line, column, "raw string literal not terminated")),
                    }
                }
                TokenType::RawString
            }
            c if c.is_ascii_digit() || (c == '.' && self.peek().map_or(false, |n| n.is_ascii_digit())) => {
                self.read_number(c);
                TokenType::Number
            }
            c if c.is_alphabetic() || c == '_' => {
                while let Some(c) = self.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        self.advance();
                    } else {
                        break;
                    }
                }
                if is_go_keyword(&self.source[start..self.offset()]) {
                    TokenType::Keyword
                } else {
                    TokenType::Identifier
                }
            }
            ';' => TokenType::Semicolon,
            _ => {
                let rest = &self.source[start..];
                match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                    Some(op) => {
                        for _ in 1..op.len() {
                            self.advance();
                        }
                        TokenType::Operator
                    }
                    None => {
                        return Err(self.error(line, column, format!("unexpected character '{}'", ch)));
                    }
                }
            }
        };

        let text = self.source[start..self.offset()].to_string();
        Ok(self.make_token(token_type, text, start, line, column))
    }

    fn read_quoted(&mut self, quote: char, line: usize, column: usize) -> UnitResult<()> {
        let what = if quote == '"' { "string literal" } else { "rune literal" };
        loop {
            match self.peek() {
                None | Some('\n') => return Err(self.error(line, column, format!("{} not terminated", what))),
                Some('\\') => {
                    self.advance();
                    if self.advance_opt().is_none() {
                        return Err(self.error(line, column, format!("{} not terminated", what)));
                    }
                }
                Some(c) if c == quote => {
                    self.advance();
                    return Ok(());
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    fn read_number(&mut self, first: char) {
        let hex = first == '0' && matches!(self.peek(), Some('x') | Some('X'));
        let mut prev = first;
        while let Some(c) = self.peek() {
            let exponent_sign = (c == '+' || c == '-')
                && (matches!(prev, 'p' | 'P') || (!hex && matches!(prev, 'e' | 'E')));
            let decimal_point = c == '.' && self.peek_next() != Some('.');
            if c.is_ascii_alphanumeric() || c == '_' || exponent_sign || decimal_point {
                prev = c;
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Skip blanks, reporting whether a newline was crossed
    fn skip_whitespace(&mut self) -> bool {
        let mut newline = false;
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                newline = true;
            } else if !ch.is_whitespace() {
                break;
            }
            self.advance();
        }
        newline
    }

    fn offset(&self) -> usize {
        self.input.get(self.position).map_or(self.source.len(), |(i, _)| *i)
    }

    fn advance(&mut self) -> char {
        self.advance_opt().unwrap_or('\0')
    }

    fn advance_opt(&mut self) -> Option<char> {
        let (_, ch) = *self.input.get(self.position)?;
        self.position += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).map(|(_, c)| *c)
    }

    fn peek_next(&self) -> Option<char> {
        self.input.get(self.position + 1).map(|(_, c)| *c)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }
}

fn last_code_token(tokens: &[Token]) -> Option<&Token> {
    tokens.iter().rev().find(|t| t.token_type != TokenType::Comment)
}

fn needs_semicolon(last: Option<&Token>) -> bool {
    let Some(token) = last else {
        return false;
    };
    match token.token_type {
        TokenType::Identifier
        | TokenType::Number
        | TokenType::Char
        | TokenType::String
        | TokenType::RawString => true,
        TokenType::Keyword => matches!(
            token.text.as_str(),
            "break" | "continue" | "fallthrough" | "return"
        ),
        TokenType::Operator => matches!(token.text.as_str(), "++" | "--" | ")" | "]" | "}"),
        TokenType::Comment => false,
        TokenType::Semicolon | TokenType::Eof => false,
    }
}

/// Tokenize a snippet, dropping comments and the trailing end marker
pub fn code_tokens(source: &str, base: Span) -> UnitResult<Vec<Token>> {
    let tokens = Lexer::new(source, base).tokenize()?;
    Ok(tokens
        .into_iter()
        .filter(|t| !matches!(t.token_type, TokenType::Comment | TokenType::Eof))
        .collect())
}

/// Identifiers an expression or statement refers to, in order of first
/// appearance. Field and method selectors (`x.name`) are not references.
pub fn referenced_identifiers(tokens: &[Token]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if token.token_type != TokenType::Identifier {
            continue;
        }
        if i > 0 && tokens[i - 1].is_op(".") {
            continue;
        }
        if !names.contains(&token.text) {
            names.push(token.text.clone());
        }
    }
    names
}

/// Identifiers declared on the left of a top-level `:=` in a header such as
/// `i, item := range list` or `v, ok := m[k]; ok`.
pub fn short_var_names(tokens: &[Token]) -> Vec<String> {
    let mut names = Vec::new();
    let mut clause_start = 0;
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        if token.token_type == TokenType::Operator {
            match token.text.as_str() {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => depth = depth.saturating_sub(1),
                ":=" if depth == 0 => {
                    names.extend(
                        tokens[clause_start..i]
                            .iter()
                            .filter(|t| t.token_type == TokenType::Identifier && t.text != "_")
                            .map(|t| t.text.clone()),
                    );
                }
                _ => {}
            }
        } else if token.token_type == TokenType::Semicolon && depth == 0 {
            clause_start = i + 1;
        }
    }
    names
}

/// Index of the first `op` outside any brackets
pub fn top_level_position(tokens: &[Token], op: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        if token.token_type != TokenType::Operator {
            continue;
        }
        match token.text.as_str() {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => depth = depth.saturating_sub(1),
            text if text == op && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// Split at every `op` outside brackets; a trailing empty group is dropped
pub fn split_top_level<'t>(tokens: &'t [Token], op: &str) -> Vec<&'t [Token]> {
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut groups = Vec::new();
    let mut rest = tokens;
    while let Some(pos) = top_level_position(rest, op) {
        groups.push(&rest[..pos]);
        rest = &rest[pos + 1..];
    }
    if !rest.is_empty() {
        groups.push(rest);
    }
    groups
}
