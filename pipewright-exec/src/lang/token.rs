use std::fmt;

use serde_json::{Number, Value};

use crate::lang::diagnostic::{Diagnostic, Pos};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Number(Number),
    LBrace,
    RBrace,
    LParen,
    RParen,
    Colon,
    Semi,
    Comma,
    Dot,
    Eq,
    Arrow,
    Eof,
}

impl TokenKind {
    pub fn literal(&self) -> Option<Value> {
        match self {
            Self::Str(s) => Some(Value::String(s.clone())),
            Self::Number(n) => Some(Value::Number(n.clone())),
            Self::Ident(w) if w == "true" => Some(Value::Bool(true)),
            Self::Ident(w) if w == "false" => Some(Value::Bool(false)),
            Self::Ident(w) if w == "null" => Some(Value::Null),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(w) => write!(f, "`{w}`"),
            Self::Str(s) => write!(f, "string {}", Value::String(s.clone())),
            Self::Number(n) => write!(f, "number {n}"),
            Self::LBrace => f.write_str("`{`"),
            Self::RBrace => f.write_str("`}`"),
            Self::LParen => f.write_str("`(`"),
            Self::RParen => f.write_str("`)`"),
            Self::Colon => f.write_str("`:`"),
            Self::Semi => f.write_str("`;`"),
            Self::Comma => f.write_str("`,`"),
            Self::Dot => f.write_str("`.`"),
            Self::Eq => f.write_str("`=`"),
            Self::Arrow => f.write_str("`->`"),
            Self::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Pos,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, Diagnostic> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    i: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            i: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).map(|(_, c)| *c)
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.i + n).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.i).map(|(o, _)| *o).unwrap_or(self.src.len())
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.i += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn pos(&self) -> Pos {
        Pos::new(self.line, self.column)
    }

    fn run(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let pos = self.pos();
            let Some(c) = self.peek() else {
                out.push(Token { kind: TokenKind::Eof, pos });
                return Ok(out);
            };
            let kind = match c {
                '{' => self.single(TokenKind::LBrace),
                '}' => self.single(TokenKind::RBrace),
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                ':' => self.single(TokenKind::Colon),
                ';' => self.single(TokenKind::Semi),
                ',' => self.single(TokenKind::Comma),
                '.' => self.single(TokenKind::Dot),
                '=' => self.single(TokenKind::Eq),
                '-' if self.peek_at(1) == Some('>') => {
                    self.bump();
                    self.bump();
                    TokenKind::Arrow
                }
                '"' => self.string(pos)?,
                '-' | '0'..='9' => self.number(pos)?,
                c if c.is_ascii_alphabetic() || c == '_' => self.ident(),
                other => return Err(Diagnostic::new(pos, format!("unexpected character `{other}`"))),
            };
            out.push(Token { kind, pos });
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        kind
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '/' && self.peek_at(1) == Some('/') {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn ident(&mut self) -> TokenKind {
        let start = self.offset();
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        TokenKind::Ident(self.src[start..self.offset()].to_string())
    }

    // JSON string syntax; decoding is delegated to serde_json.
    fn string(&mut self, pos: Pos) -> Result<TokenKind, Diagnostic> {
        let start = self.offset();
        self.bump();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(Diagnostic::new(pos, "unterminated string literal")),
                Some('\\') => {
                    self.bump();
                }
                Some('"') => break,
                Some(_) => {}
            }
        }
        let raw = &self.src[start..self.offset()];
        serde_json::from_str::<String>(raw)
            .map(TokenKind::Str)
            .map_err(|e| Diagnostic::new(pos, format!("invalid string literal: {e}")))
    }

    fn number(&mut self, pos: Pos) -> Result<TokenKind, Diagnostic> {
        let start = self.offset();
        if self.peek() == Some('-') {
            self.bump();
        }
        self.digits();
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            self.bump();
            self.digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            self.digits();
        }
        let raw = &self.src[start..self.offset()];
        serde_json::from_str::<Number>(raw)
            .map(TokenKind::Number)
            .map_err(|_| Diagnostic::new(pos, format!("invalid number literal `{raw}`")))
    }

    fn digits(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
    }
}
