//! S-expression definition.
//!
//! This is the untyped, already macro-expanded value tree the compiler starts
//! from. Every node keeps the token it was read from so later passes can
//! report errors with a source line.

use std::rc::Rc;

use pretty::{BoxAllocator, DocAllocator, DocBuilder};
use termcolor::{Color, ColorSpec, WriteColor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    LParen,
    RParen,
    LSquare,
    RSquare,
    Quote,
    Symbol,
    String,
    Number,
    True,
    False,
    Nil,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: Rc<str>,
    pub line: u32,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<Rc<str>>, line: u32) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            line,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SexprKind {
    Nil,
    Boolean(bool),
    Number(i64),
    String(Rc<str>),
    Symbol(Rc<str>),
    List(Vec<Sexpr>),
    Vector(Vec<Sexpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sexpr {
    pub kind: SexprKind,
    pub token: Token,
}

impl Sexpr {
    pub fn new(kind: SexprKind, token: Token) -> Self {
        Self { kind, token }
    }

    pub fn nil(line: u32) -> Self {
        // Stands in for the missing else arm of `(if c t)`.
        Self::new(SexprKind::Nil, Token::new(TokenKind::Nil, "nil", line))
    }

    pub fn line(&self) -> u32 {
        self.token.line
    }

    pub fn symbol(&self) -> Option<&Rc<str>> {
        match &self.kind {
            SexprKind::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_symbol_named(&self, name: &str) -> bool {
        self.symbol().map_or(false, |sym| &**sym == name)
    }

    pub fn list(&self) -> Option<&[Sexpr]> {
        match &self.kind {
            SexprKind::List(elems) => Some(elems),
            _ => None,
        }
    }

    pub fn vector(&self) -> Option<&[Sexpr]> {
        match &self.kind {
            SexprKind::Vector(elems) => Some(elems),
            _ => None,
        }
    }
}

fn fg(color: Color) -> ColorSpec {
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(color));
    spec
}

impl Sexpr {
    pub fn pretty<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        match &self.kind {
            SexprKind::Nil => allocator.text("nil").annotate(fg(Color::Magenta)),
            SexprKind::Boolean(b) => allocator
                .text(if *b { "true" } else { "false" })
                .annotate(fg(Color::Magenta)),
            SexprKind::Number(n) => allocator.text(n.to_string()).annotate(fg(Color::Cyan)),
            SexprKind::String(s) => allocator
                .text(format!("{:?}", &**s))
                .annotate(fg(Color::Yellow)),
            SexprKind::Symbol(s) => allocator.text(s.to_string()),
            SexprKind::List(elems) => allocator
                .intersperse(elems.iter().map(|e| e.pretty(allocator)), allocator.line())
                .nest(1)
                .group()
                .parens()
                .align(),
            SexprKind::Vector(elems) => allocator
                .intersperse(elems.iter().map(|e| e.pretty(allocator)), allocator.line())
                .nest(1)
                .group()
                .brackets()
                .align(),
        }
    }

    pub fn pretty_print(&self, out: impl WriteColor) -> std::io::Result<()> {
        let allocator = BoxAllocator;

        self.pretty(&allocator).1.render_colored(70, out)?;

        Ok(())
    }
}

impl std::fmt::Display for Sexpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut vec = Vec::new();
        let out = termcolor::NoColor::new(&mut vec);
        match self.pretty_print(out) {
            Ok(_) => f.write_str(&String::from_utf8_lossy(&vec)),
            Err(_) => Err(std::fmt::Error),
        }
    }
}
