//! Lexer and recursive-descent parser for the toy language.
//!
//! ```text
//! x = 0;
//! $t = spawn { lock m; x = x + 1; unlock m; }
//! lock m; $r = x; unlock m;
//! join $t;
//! if ($r == 0) { assert x == 0; } else { nop; }
//! ```
//!
//! `if` is lowered while parsing into a conditional jump over the then-branch
//! followed by an unconditional jump over the else-branch, so every block is a
//! flat statement sequence addressed by a program counter.

use std::sync::Arc;

use crate::ast::{Block, BlockId, Expr, LValue, Program, Stmt, StmtKind, Value};
use crate::error::ParseError;

#[derive(Clone, Debug, PartialEq, Eq)]
enum TokenKind {
    Register(String),
    Ident(String),
    Int(Value),
    Plus,
    EqEq,
    NotEq,
    Assign,
    Semi,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Eof,
}

#[derive(Clone, Debug)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
    line: usize,
    column: usize,
}

const KEYWORDS: &[&str] = &["nop", "join", "lock", "unlock", "assert", "if", "else", "spawn"];

fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut line_start = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let column = i - line_start + 1;

        if c == b'\n' {
            i += 1;
            line += 1;
            line_start = i;
            continue;
        }
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        let start = i;
        let kind = match c {
            b'+' => {
                i += 1;
                TokenKind::Plus
            }
            b';' => {
                i += 1;
                TokenKind::Semi
            }
            b'{' => {
                i += 1;
                TokenKind::LBrace
            }
            b'}' => {
                i += 1;
                TokenKind::RBrace
            }
            b'(' => {
                i += 1;
                TokenKind::LParen
            }
            b')' => {
                i += 1;
                TokenKind::RParen
            }
            b'=' if bytes.get(i + 1) == Some(&b'=') => {
                i += 2;
                TokenKind::EqEq
            }
            b'=' => {
                i += 1;
                TokenKind::Assign
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => {
                i += 2;
                TokenKind::NotEq
            }
            b'0'..=b'9' => {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let value = src[start..i].parse::<Value>().map_err(|_| {
                    ParseError::new(line, column, format!("Integer literal out of range: {}", &src[start..i]))
                })?;
                TokenKind::Int(value)
            }
            b'$' => {
                i += 1;
                let name_start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if i == name_start || bytes[name_start].is_ascii_digit() {
                    return Err(ParseError::new(line, column, "Expected register name after '$'"));
                }
                TokenKind::Register(src[name_start..i].to_string())
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                TokenKind::Ident(src[start..i].to_string())
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(ParseError::new(line, column, format!("Unexpected character '{}'", ch)));
            }
        };

        tokens.push(Token {
            kind,
            start,
            end: i,
            line,
            column,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        start: src.len(),
        end: src.len(),
        line,
        column: src.len() - line_start + 1,
    });
    Ok(tokens)
}

/// Parses program text into a [`Program`].
pub fn parse(src: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        src,
        tokens,
        pos: 0,
        next_block: 0,
    };
    let id = parser.fresh_block_id();
    let stmts = parser.statements(&TokenKind::Eof)?;
    Ok(Program::new(Block::new(id, stmts)))
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    next_block: usize,
}

impl<'a> Parser<'a> {
    fn fresh_block_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == keyword)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError::new(token.line, token.column, message)
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<Token, ParseError> {
        if self.at(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    /// Source text from the start of token `from` to the end of the last consumed token.
    fn text_since(&self, from: usize) -> String {
        let start = self.tokens[from].start;
        let end = self.tokens[self.pos.saturating_sub(1).max(from)].end;
        self.src[start..end].to_string()
    }

    fn statements(&mut self, terminator: &TokenKind) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        while !self.at(terminator) {
            if self.at(&TokenKind::Eof) {
                return Err(self.error("Expected '}'"));
            }
            let (mut parsed, brace_ended) = self.statement()?;
            stmts.append(&mut parsed);
            if brace_ended {
                if self.at(&TokenKind::Semi) {
                    self.advance();
                }
            } else if self.at(&TokenKind::Eof) {
                return Err(self.error("Expected ';' at end of file"));
            } else {
                self.expect(TokenKind::Semi, "Expected ';'")?;
            }
        }
        if stmts.is_empty() {
            return Err(self.error("Expected statement"));
        }
        Ok(stmts)
    }

    /// Parses one statement. Returns the (possibly lowered) statements and
    /// whether the statement ended with a closing brace.
    fn statement(&mut self) -> Result<(Vec<Stmt>, bool), ParseError> {
        let first = self.pos;
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Ident(word) if word == "nop" => {
                self.advance();
                Ok((vec![Stmt::new(StmtKind::Nop, self.text_since(first))], false))
            }
            TokenKind::Ident(word) if word == "join" => {
                self.advance();
                if self.at(&TokenKind::Semi) || self.at(&TokenKind::Eof) {
                    return Err(self.error("Expected thread identifier"));
                }
                let target = self.expression()?;
                if target.is_comparison() {
                    return Err(self.error("Invalid thread identifier"));
                }
                let brace_ended = matches!(target, Expr::Spawn(_));
                Ok((vec![Stmt::new(StmtKind::Join(target), self.text_since(first))], brace_ended))
            }
            TokenKind::Ident(word) if word == "lock" || word == "unlock" => {
                let is_lock = word == "lock";
                self.advance();
                let name = match self.advance().kind {
                    TokenKind::Ident(name) if !KEYWORDS.contains(&name.as_str()) => name,
                    _ => return Err(self.error("Expected lock identifier")),
                };
                let kind = if is_lock { StmtKind::Lock(name) } else { StmtKind::Unlock(name) };
                Ok((vec![Stmt::new(kind, self.text_since(first))], false))
            }
            TokenKind::Ident(word) if word == "assert" => {
                self.advance();
                let condition = self.expression()?;
                if !condition.is_comparison() {
                    return Err(self.error("Invalid assertion"));
                }
                Ok((vec![Stmt::new(StmtKind::Assert(condition), self.text_since(first))], false))
            }
            TokenKind::Ident(word) if word == "if" => self.if_statement().map(|stmts| (stmts, true)),
            TokenKind::Register(_) | TokenKind::Ident(_) => {
                let target = match self.advance().kind {
                    TokenKind::Register(name) => LValue::Register(name),
                    TokenKind::Ident(name) if !KEYWORDS.contains(&name.as_str()) => LValue::Global(name),
                    _ => return Err(self.error("Expected statement")),
                };
                self.expect(TokenKind::Assign, "Expected '='")?;
                if self.at(&TokenKind::Semi) || self.at(&TokenKind::Eof) {
                    return Err(self.error("Expected right-hand side to assignment"));
                }
                let value = self.expression()?;
                if value.is_comparison() {
                    return Err(self.error("Invalid right-hand side to assignment"));
                }
                let brace_ended = matches!(value, Expr::Spawn(_));
                let stmt = Stmt::new(StmtKind::Assign { target, value }, self.text_since(first));
                Ok((vec![stmt], brace_ended))
            }
            _ => Err(self.error("Expected statement")),
        }
    }

    fn if_statement(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.advance();
        let cond_first = self.pos;
        let condition = self.expression()?;
        if !condition.is_comparison() {
            return Err(self.error("Invalid condition"));
        }
        let cond_text = self.text_since(cond_first);

        let then_branch = self.braced()?;
        let else_branch = if self.at_keyword("else") {
            self.advance();
            self.braced()?
        } else {
            vec![Stmt::new(StmtKind::Nop, "nop")]
        };

        let then_offset = then_branch.len() + 2;
        let else_offset = else_branch.len() + 1;
        let cond_text = if cond_text.starts_with('(') {
            format!("if {} jump {}", cond_text, then_offset)
        } else {
            format!("if ({}) jump {}", cond_text, then_offset)
        };

        let mut lowered = Vec::with_capacity(then_branch.len() + else_branch.len() + 2);
        lowered.push(Stmt::new(
            StmtKind::Cond {
                condition,
                offset: then_offset,
            },
            cond_text,
        ));
        lowered.extend(then_branch);
        lowered.push(Stmt::new(StmtKind::Jump(else_offset), format!("jump {}", else_offset)));
        lowered.extend(else_branch);
        Ok(lowered)
    }

    fn braced(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace, "Expected '{'")?;
        let stmts = self.statements(&TokenKind::RBrace)?;
        self.expect(TokenKind::RBrace, "Expected '}'")?;
        Ok(stmts)
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.sum()?;
        if self.at(&TokenKind::EqEq) {
            self.advance();
            let rhs = self.sum()?;
            return Ok(Expr::Eq(Box::new(lhs), Box::new(rhs)));
        }
        if self.at(&TokenKind::NotEq) {
            self.advance();
            let rhs = self.sum()?;
            return Ok(Expr::Neq(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn sum(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.primary()?;
        while self.at(&TokenKind::Plus) {
            self.advance();
            let rhs = self.primary()?;
            lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Register(name) => {
                self.advance();
                Ok(Expr::Register(name))
            }
            TokenKind::Int(value) => {
                self.advance();
                Ok(Expr::Const(value))
            }
            TokenKind::Ident(word) if word == "spawn" => {
                self.advance();
                if !self.at(&TokenKind::LBrace) {
                    return Err(self.error("Expected body of spawn"));
                }
                let id = self.fresh_block_id();
                let stmts = self.braced()?;
                Ok(Expr::Spawn(Arc::new(Block::new(id, stmts))))
            }
            TokenKind::Ident(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.advance();
                Ok(Expr::Global(name))
            }
            TokenKind::LParen => {
                self.advance();
                if self.at(&TokenKind::RParen) {
                    return Err(self.error("Expected expression"));
                }
                let inner = self.expression()?;
                self.expect(TokenKind::RParen, "Expected ')'")?;
                Ok(inner)
            }
            TokenKind::LBrace => Err(self.error("Unexpected block")),
            _ => Err(self.error("Expected expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignments() {
        let program = parse("x = 1; $r = x + 2;").unwrap();
        let body = &program.body;
        assert_eq!(body.id, BlockId(0));
        assert_eq!(body.len(), 2);
        assert_eq!(body.stmts[0].source, "x = 1");
        match &body.stmts[1].kind {
            StmtKind::Assign { target, value } => {
                assert_eq!(target, &LValue::Register("r".into()));
                assert!(matches!(value, Expr::Add(..)));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_spawn_gets_fresh_block() {
        let program = parse("$t = spawn { x = 1; y = 2; } join $t;").unwrap();
        let body = &program.body;
        assert_eq!(body.len(), 2);
        match &body.stmts[0].kind {
            StmtKind::Assign {
                value: Expr::Spawn(block),
                ..
            } => {
                assert_eq!(block.id, BlockId(1));
                assert_eq!(block.len(), 2);
            }
            other => panic!("unexpected statement {:?}", other),
        }
        assert!(matches!(body.stmts[1].kind, StmtKind::Join(_)));
    }

    #[test]
    fn test_semicolon_after_spawn_block_is_optional() {
        let with = parse("$t = spawn { nop; }; join $t;").unwrap();
        let without = parse("$t = spawn { nop; } join $t;").unwrap();
        assert_eq!(with.body.len(), without.body.len());
    }

    #[test]
    fn test_if_is_lowered_to_jumps() {
        let program = parse("$r = 1; if ($r == 1) { x = 1; y = 2; } else { x = 3; }").unwrap();
        let stmts = &program.body.stmts;
        // $r = 1; cond; x = 1; y = 2; jump; x = 3
        assert_eq!(stmts.len(), 6);
        match &stmts[1].kind {
            StmtKind::Cond { offset, .. } => assert_eq!(*offset, 4),
            other => panic!("unexpected statement {:?}", other),
        }
        assert_eq!(stmts[1].source, "if ($r == 1) jump 4");
        assert!(matches!(stmts[4].kind, StmtKind::Jump(2)));
        assert_eq!(stmts[4].source, "jump 2");
    }

    #[test]
    fn test_if_without_else_gets_nop() {
        let program = parse("if (x == 1) { y = 1; }").unwrap();
        let stmts = &program.body.stmts;
        assert_eq!(stmts.len(), 4);
        assert!(matches!(stmts[3].kind, StmtKind::Nop));
    }

    #[test]
    fn test_lock_and_assert() {
        let program = parse("lock m; assert x != 0; unlock m;").unwrap();
        let stmts = &program.body.stmts;
        assert!(matches!(&stmts[0].kind, StmtKind::Lock(name) if name == "m"));
        assert!(matches!(&stmts[1].kind, StmtKind::Assert(Expr::Neq(..))));
        assert!(matches!(&stmts[2].kind, StmtKind::Unlock(name) if name == "m"));
    }

    #[test]
    fn test_comments_are_skipped() {
        let program = parse("// setup\nx = 1; // trailing\n").unwrap();
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn test_missing_final_semicolon() {
        let err = parse("x = 1").unwrap_err();
        assert_eq!(err.message, "Expected ';' at end of file");
    }

    #[test]
    fn test_empty_program_is_rejected() {
        let err = parse("   ").unwrap_err();
        assert_eq!(err.message, "Expected statement");
    }

    #[test]
    fn test_assert_requires_comparison() {
        let err = parse("assert 1;").unwrap_err();
        assert_eq!(err.message, "Invalid assertion");
    }

    #[test]
    fn test_comparison_not_assignable() {
        let err = parse("$r = x == 1;").unwrap_err();
        assert_eq!(err.message, "Invalid right-hand side to assignment");
    }

    #[test]
    fn test_error_position() {
        let err = parse("x = 1;\n  lock ;").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.message, "Expected lock identifier");
    }

    #[test]
    fn test_unexpected_character() {
        let err = parse("x = 1 * 2;").unwrap_err();
        assert_eq!(err.message, "Unexpected character '*'");
        assert_eq!((err.line, err.column), (1, 7));
    }
}
