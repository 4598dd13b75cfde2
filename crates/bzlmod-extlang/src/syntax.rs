//! Lexer and parser for the declarative statement subset of descriptor and
//! exports files.
//!
//! A file is a sequence of statements, one per logical line: either a call
//! expression or an assignment of an expression to a name. Expressions are
//! literals (strings, ints, booleans, `None`), lists, dicts, identifiers,
//! dotted attribute access and calls with positional and keyword
//! arguments. Newlines inside brackets do not terminate a statement.
//! There is no control flow and there are no function definitions; files
//! needing the full language go through an external interpreter.

use crate::{EvalError, SourcePos};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    NoneLit(SourcePos),
    Bool(bool, SourcePos),
    Int(i64, SourcePos),
    Str(String, SourcePos),
    List(Vec<Expr>, SourcePos),
    Dict(Vec<(Expr, Expr)>, SourcePos),
    Ident(String, SourcePos),
    Attr(Box<Expr>, String, SourcePos),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        pos: SourcePos,
    },
}

impl Expr {
    pub fn pos(&self) -> &SourcePos {
        match self {
            Expr::NoneLit(p)
            | Expr::Bool(_, p)
            | Expr::Int(_, p)
            | Expr::Str(_, p)
            | Expr::List(_, p)
            | Expr::Dict(_, p)
            | Expr::Ident(_, p)
            | Expr::Attr(_, _, p)
            | Expr::Call { pos: p, .. } => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// `Some(name)` for `name = expr`, `None` for a bare expression.
    pub target: Option<String>,
    pub expr: Expr,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Int(i64),
    Str(String),
    Punct(char), // ( ) [ ] { } , : = .
    Newline,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    pos: SourcePos,
}

struct Lexer<'a> {
    file: &'a str,
    chars: Vec<char>,
    idx: usize,
    line: u32,
    col: u32,
    depth: u32, // bracket nesting; newlines inside brackets are soft
}

impl<'a> Lexer<'a> {
    fn new(file: &'a str, source: &str) -> Lexer<'a> {
        Lexer {
            file,
            chars: source.chars().collect(),
            idx: 0,
            line: 1,
            col: 1,
            depth: 0,
        }
    }

    fn pos(&self) -> SourcePos {
        SourcePos {
            file: self.file.to_owned(),
            line: self.line,
            col: self.col,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.idx += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::Parse {
            pos: self.pos(),
            message: message.into(),
        }
    }

    fn tokens(mut self) -> Result<Vec<Token>, EvalError> {
        let mut tokens = Vec::new();
        loop {
            // Skip spaces, comments, escaped line breaks, and soft newlines.
            loop {
                match self.peek() {
                    Some(' ') | Some('\t') | Some('\r') => {
                        self.bump();
                    }
                    Some('#') => {
                        while let Some(c) = self.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.bump();
                        }
                    }
                    Some('\\') if self.chars.get(self.idx + 1) == Some(&'\n') => {
                        self.bump();
                        self.bump();
                    }
                    Some('\n') if self.depth > 0 => {
                        self.bump();
                    }
                    _ => break,
                }
            }

            let pos = self.pos();
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    pos,
                });
                return Ok(tokens);
            };

            let kind = match c {
                '\n' => {
                    self.bump();
                    TokenKind::Newline
                }
                '(' | '[' | '{' => {
                    self.depth += 1;
                    self.bump();
                    TokenKind::Punct(c)
                }
                ')' | ']' | '}' => {
                    self.depth = self.depth.saturating_sub(1);
                    self.bump();
                    TokenKind::Punct(c)
                }
                ',' | ':' | '=' | '.' => {
                    self.bump();
                    TokenKind::Punct(c)
                }
                '"' | '\'' => TokenKind::Str(self.string(c)?),
                '-' => {
                    self.bump();
                    match self.peek() {
                        Some(d) if d.is_ascii_digit() => TokenKind::Int(-self.integer()?),
                        _ => return Err(self.error("unexpected '-'")),
                    }
                }
                d if d.is_ascii_digit() => TokenKind::Int(self.integer()?),
                a if a.is_alphabetic() || a == '_' => {
                    let mut ident = String::new();
                    while let Some(c) = self.peek() {
                        if c.is_alphanumeric() || c == '_' {
                            ident.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    TokenKind::Ident(ident)
                }
                other => return Err(self.error(format!("unexpected character {other:?}"))),
            };
            tokens.push(Token { kind, pos });
        }
    }

    fn string(&mut self, quote: char) -> Result<String, EvalError> {
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string literal")),
                Some('\n') => return Err(self.error("newline in string literal")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some('\'') => out.push('\''),
                    Some(other) => {
                        return Err(self.error(format!("unknown escape sequence \\{other}")))
                    }
                    None => return Err(self.error("unterminated string literal")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn integer(&mut self) -> Result<i64, EvalError> {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.bump();
            } else {
                break;
            }
        }
        digits
            .parse::<i64>()
            .map_err(|_| self.error(format!("integer literal {digits} out of range")))
    }
}

struct Parser {
    tokens: Vec<Token>,
    idx: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.idx.min(self.tokens.len() - 1)].clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::Parse {
            pos: self.peek().pos.clone(),
            message: message.into(),
        }
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek().kind == TokenKind::Punct(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), EvalError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected {c:?}")))
        }
    }

    fn file(&mut self) -> Result<Vec<Stmt>, EvalError> {
        let mut stmts = Vec::new();
        loop {
            while matches!(self.peek().kind, TokenKind::Newline) {
                self.bump();
            }
            if matches!(self.peek().kind, TokenKind::Eof) {
                return Ok(stmts);
            }
            stmts.push(self.statement()?);
            match &self.peek().kind {
                TokenKind::Newline => {
                    self.bump();
                }
                TokenKind::Eof => {}
                _ => return Err(self.error("expected end of statement")),
            }
        }
    }

    fn statement(&mut self) -> Result<Stmt, EvalError> {
        let pos = self.peek().pos.clone();
        // Lookahead for "ident = ..." (assignment).
        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            if self.tokens.get(self.idx + 1).map(|t| &t.kind) == Some(&TokenKind::Punct('=')) {
                self.bump();
                self.bump();
                let expr = self.expression()?;
                return Ok(Stmt {
                    target: Some(name),
                    expr,
                    pos,
                });
            }
        }
        let expr = self.expression()?;
        Ok(Stmt {
            target: None,
            expr,
            pos,
        })
    }

    fn expression(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct('.') {
                let pos = self.peek().pos.clone();
                let TokenKind::Ident(name) = self.bump().kind else {
                    return Err(self.error("expected attribute name after '.'"));
                };
                expr = Expr::Attr(Box::new(expr), name, pos);
            } else if self.peek().kind == TokenKind::Punct('(') {
                let pos = self.peek().pos.clone();
                self.bump();
                let (args, kwargs) = self.call_args()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    kwargs,
                    pos,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), EvalError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        loop {
            if self.eat_punct(')') {
                return Ok((args, kwargs));
            }
            // "ident =" starts a keyword argument.
            if let TokenKind::Ident(name) = &self.peek().kind {
                let name = name.clone();
                if self.tokens.get(self.idx + 1).map(|t| &t.kind) == Some(&TokenKind::Punct('=')) {
                    self.bump();
                    self.bump();
                    let value = self.expression()?;
                    if kwargs.iter().any(|(k, _)| *k == name) {
                        return Err(self.error(format!("duplicate keyword argument {name:?}")));
                    }
                    kwargs.push((name, value));
                    if !self.eat_punct(',') {
                        self.expect_punct(')')?;
                        return Ok((args, kwargs));
                    }
                    continue;
                }
            }
            if !kwargs.is_empty() {
                return Err(self.error("positional argument after keyword argument"));
            }
            args.push(self.expression()?);
            if !self.eat_punct(',') {
                self.expect_punct(')')?;
                return Ok((args, kwargs));
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let token = self.bump();
        let pos = token.pos.clone();
        match token.kind {
            TokenKind::Int(i) => Ok(Expr::Int(i, pos)),
            TokenKind::Str(s) => Ok(Expr::Str(s, pos)),
            TokenKind::Ident(name) => Ok(match name.as_str() {
                "True" => Expr::Bool(true, pos),
                "False" => Expr::Bool(false, pos),
                "None" => Expr::NoneLit(pos),
                _ => Expr::Ident(name, pos),
            }),
            TokenKind::Punct('[') => {
                let mut items = Vec::new();
                loop {
                    if self.eat_punct(']') {
                        return Ok(Expr::List(items, pos));
                    }
                    items.push(self.expression()?);
                    if !self.eat_punct(',') {
                        self.expect_punct(']')?;
                        return Ok(Expr::List(items, pos));
                    }
                }
            }
            TokenKind::Punct('{') => {
                let mut pairs = Vec::new();
                loop {
                    if self.eat_punct('}') {
                        return Ok(Expr::Dict(pairs, pos));
                    }
                    let key = self.expression()?;
                    self.expect_punct(':')?;
                    let value = self.expression()?;
                    pairs.push((key, value));
                    if !self.eat_punct(',') {
                        self.expect_punct('}')?;
                        return Ok(Expr::Dict(pairs, pos));
                    }
                }
            }
            TokenKind::Punct('(') => {
                let expr = self.expression()?;
                self.expect_punct(')')?;
                Ok(expr)
            }
            other => Err(EvalError::Parse {
                pos,
                message: format!("unexpected token {other:?}"),
            }),
        }
    }
}

/// Parses a whole file into statements.
pub fn parse(file: &str, source: &str) -> Result<Vec<Stmt>, EvalError> {
    let tokens = Lexer::new(file, source).tokens()?;
    Parser { tokens, idx: 0 }.file()
}
