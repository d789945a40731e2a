use pipewright_core::synth::is_keyword;
use serde_json::Value;

use crate::lang::ast::{Call, Catch, Expr, FailureDecl, Module, Operand, Param, Routine, Stmt, StmtKind};
use crate::lang::diagnostic::{Diagnostic, Pos};
use crate::lang::token::{Token, TokenKind};

pub fn parse_module(tokens: &[Token]) -> Result<Module, Diagnostic> {
    let mut p = Parser { tokens, i: 0 };
    let module = p.module()?;
    p.expect(&TokenKind::Eof)?;
    Ok(module)
}

struct Parser<'a> {
    tokens: &'a [Token],
    i: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.i.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> &Token {
        let idx = self.i.min(self.tokens.len() - 1);
        if self.i < self.tokens.len() - 1 {
            self.i += 1;
        }
        &self.tokens[idx]
    }

    fn at_word(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(w) if w == word)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.at_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> Diagnostic {
        let t = self.peek();
        Diagnostic::new(t.pos, format!("expected {expected}, found {}", t.kind))
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Pos, Diagnostic> {
        let pos = self.peek().pos;
        if self.eat(kind) {
            Ok(pos)
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<Pos, Diagnostic> {
        let pos = self.peek().pos;
        if self.eat_word(word) {
            Ok(pos)
        } else {
            Err(self.unexpected(&format!("`{word}`")))
        }
    }

    /// Any identifier, keywords included (types and operation segments).
    fn word(&mut self, what: &str) -> Result<(String, Pos), Diagnostic> {
        let t = self.peek().clone();
        match t.kind {
            TokenKind::Ident(w) => {
                self.advance();
                Ok((w, t.pos))
            }
            _ => Err(self.unexpected(what)),
        }
    }

    /// A binding name; keywords are rejected.
    fn name(&mut self, what: &str) -> Result<(String, Pos), Diagnostic> {
        let (w, pos) = self.word(what)?;
        if is_keyword(&w) {
            return Err(Diagnostic::new(pos, format!("expected {what}, found keyword `{w}`")));
        }
        Ok((w, pos))
    }

    fn module(&mut self) -> Result<Module, Diagnostic> {
        self.expect_word("module")?;
        let (name, pos) = self.name("module name")?;
        self.expect(&TokenKind::LBrace)?;
        let mut failures = Vec::new();
        let mut routines = Vec::new();
        loop {
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            let pos = self.peek().pos;
            if self.eat_word("failure") {
                let (category, _) = self.word("failure category")?;
                let parent = if self.eat(&TokenKind::Colon) {
                    Some(self.word("parent category")?.0)
                } else {
                    None
                };
                self.expect(&TokenKind::Semi)?;
                failures.push(FailureDecl {
                    name: category,
                    parent,
                    pos,
                });
            } else if self.eat_word("routine") {
                routines.push(self.routine(pos)?);
            } else {
                return Err(self.unexpected("`failure`, `routine` or `}`"));
            }
        }
        Ok(Module {
            name,
            pos,
            failures,
            routines,
        })
    }

    fn routine(&mut self, pos: Pos) -> Result<Routine, Diagnostic> {
        let (name, _) = self.name("routine name")?;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                let (pname, ppos) = self.name("parameter name")?;
                self.expect(&TokenKind::Colon)?;
                let (ty, _) = self.word("parameter type")?;
                params.push(Param {
                    name: pname,
                    ty,
                    pos: ppos,
                });
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(&TokenKind::Comma)?;
            }
        }
        let returns = if self.eat(&TokenKind::Arrow) {
            Some(self.word("result type")?.0)
        } else {
            None
        };
        let body = self.block()?;
        Ok(Routine {
            name,
            params,
            returns,
            body,
            pos,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.expect(&TokenKind::LBrace)?;
        let mut out = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            if self.peek().kind == TokenKind::Eof {
                return Err(self.unexpected("`}`"));
            }
            out.push(self.stmt()?);
        }
        Ok(out)
    }

    fn stmt(&mut self) -> Result<Stmt, Diagnostic> {
        let pos = self.peek().pos;
        let kind = if self.eat_word("let") {
            let (name, _) = self.name("variable name")?;
            self.expect(&TokenKind::Colon)?;
            let (ty, _) = self.word("variable type")?;
            self.expect(&TokenKind::Eq)?;
            let value = if self.eat_word("call") {
                Expr::Call(self.call()?)
            } else {
                Expr::Operand(self.operand()?)
            };
            self.expect(&TokenKind::Semi)?;
            StmtKind::Let { name, ty, value }
        } else if self.eat_word("call") {
            let call = self.call()?;
            self.expect(&TokenKind::Semi)?;
            StmtKind::Call(call)
        } else if self.eat_word("if") {
            let condition = self.operand()?;
            let then = self.block()?;
            let otherwise = if self.eat_word("else") { self.block()? } else { Vec::new() };
            StmtKind::If {
                condition,
                then,
                otherwise,
            }
        } else if self.eat_word("for") {
            let (item, _) = self.name("loop variable")?;
            self.expect(&TokenKind::Colon)?;
            let (ty, _) = self.word("loop variable type")?;
            self.expect_word("in")?;
            let items = self.operand()?;
            let body = self.block()?;
            StmtKind::For { item, ty, items, body }
        } else if self.eat_word("try") {
            let body = self.block()?;
            let mut catches = Vec::new();
            loop {
                let cpos = self.peek().pos;
                if !self.eat_word("catch") {
                    break;
                }
                let (category, _) = self.word("failure category")?;
                self.expect_word("as")?;
                let (binding, _) = self.name("fault variable")?;
                let body = self.block()?;
                catches.push(Catch {
                    category,
                    binding,
                    body,
                    pos: cpos,
                });
            }
            let finally = if self.eat_word("finally") { Some(self.block()?) } else { None };
            StmtKind::Try { body, catches, finally }
        } else if self.eat_word("return") {
            let value = if self.eat(&TokenKind::Semi) {
                None
            } else {
                let v = self.operand()?;
                self.expect(&TokenKind::Semi)?;
                Some(v)
            };
            StmtKind::Return(value)
        } else {
            return Err(self.unexpected("a statement"));
        };
        Ok(Stmt { kind, pos })
    }

    fn call(&mut self) -> Result<Call, Diagnostic> {
        let (mut operation, _) = self.word("operation name")?;
        while self.eat(&TokenKind::Dot) {
            operation.push('.');
            operation.push_str(&self.word("operation name")?.0);
        }
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                args.push(self.operand()?);
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(&TokenKind::Comma)?;
            }
        }
        Ok(Call { operation, args })
    }

    fn operand(&mut self) -> Result<Operand, Diagnostic> {
        let t = self.peek().clone();
        if let Some(v) = t.kind.literal() {
            self.advance();
            return Ok(Operand::Literal(v));
        }
        if self.eat_word("json") {
            let text = self.peek().clone();
            let TokenKind::Str(raw) = text.kind else {
                return Err(self.unexpected("a string after `json`"));
            };
            self.advance();
            let value: Value = serde_json::from_str(&raw)
                .map_err(|e| Diagnostic::new(text.pos, format!("invalid json literal: {e}")))?;
            return Ok(Operand::Literal(value));
        }
        let (name, pos) = self.name("a variable or literal")?;
        Ok(Operand::Name(name, pos))
    }
}
