//! Typed expression tree produced by the checker.

use std::rc::Rc;

use indexmap::IndexSet;
use pretty::{BoxAllocator, DocAllocator, DocBuilder};
use termcolor::{Color, ColorSpec, WriteColor};

use super::sexpr::Token;
use super::types::{Type, TypeTable};

/// Names a node references from an enclosing, non-global scope, in order of
/// first reference.
pub type Captures = IndexSet<Rc<str>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Boolean(bool),
    Number(i64),
    String(Rc<str>),
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<Rc<str>>,
    pub params: Vec<Rc<str>>,
    pub rest: Option<Rc<str>>,
    pub body: Expr,
    /// Introduced by `defn` and bound in the global frame.
    pub global: bool,
}

impl Function {
    /// Declared parameters plus the rest parameter, in calling order.
    pub fn all_params(&self) -> impl Iterator<Item = &Rc<str>> {
        self.params.iter().chain(self.rest.iter())
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub callee: Expr,
    pub args: Vec<Expr>,
    /// Set when the callee is known to take a rest parameter: arguments from
    /// this index on are packed into one list.
    pub spread: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Symbol(Rc<str>),
    List(Vec<Expr>),
    Vector(Vec<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    Let(Vec<(Rc<str>, Expr)>, Box<Expr>),
    Fn(Box<Function>),
    Do(Vec<Expr>),
    Call(Box<Call>),
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub captures: Captures,
    pub token: Token,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type, captures: Captures, token: Token) -> Self {
        Self {
            kind,
            ty,
            captures,
            token,
        }
    }

    pub fn line(&self) -> u32 {
        self.token.line
    }

    pub fn function(&self) -> Option<&Function> {
        match &self.kind {
            ExprKind::Fn(func) => Some(func),
            _ => None,
        }
    }
}

fn fg(color: Color) -> ColorSpec {
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(color));
    spec
}

impl Expr {
    /// Pretty printer showing every node annotated with its resolved type.
    pub fn pretty<'a, D>(&self, allocator: &'a D, types: &TypeTable) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        let ty = allocator
            .text(format!(": {}", types.display(&self.ty)))
            .annotate(fg(Color::Blue));

        let node = match &self.kind {
            ExprKind::Literal(lit) => allocator.text(match lit {
                Literal::Nil => "nil".to_string(),
                Literal::Boolean(b) => b.to_string(),
                Literal::Number(n) => n.to_string(),
                Literal::String(s) => format!("{:?}", &**s),
            }),
            ExprKind::Symbol(name) => allocator.text(name.to_string()),
            ExprKind::List(elems) | ExprKind::Vector(elems) => {
                let head = if matches!(self.kind, ExprKind::List(_)) {
                    "list"
                } else {
                    "vector"
                };
                allocator
                    .text(head)
                    .annotate(fg(Color::Green))
                    .append(allocator.line())
                    .append(allocator.intersperse(
                        elems.iter().map(|e| e.pretty(allocator, types)),
                        allocator.line(),
                    ))
                    .nest(1)
                    .group()
                    .parens()
            }
            ExprKind::If(cond, then, else_) => allocator
                .text("if")
                .annotate(fg(Color::Green))
                .append(allocator.space())
                .append(cond.pretty(allocator, types))
                .append(allocator.line())
                .append(then.pretty(allocator, types))
                .append(allocator.line())
                .append(else_.pretty(allocator, types))
                .nest(1)
                .group()
                .parens(),
            ExprKind::Let(bindings, body) => {
                let bindings = allocator
                    .intersperse(
                        bindings.iter().map(|(name, value)| {
                            allocator
                                .text(name.to_string())
                                .append(allocator.space())
                                .append(value.pretty(allocator, types))
                        }),
                        allocator.line(),
                    )
                    .brackets();
                allocator
                    .text("let")
                    .annotate(fg(Color::Green))
                    .append(allocator.space())
                    .append(bindings.align())
                    .append(allocator.line())
                    .append(body.pretty(allocator, types))
                    .nest(1)
                    .group()
                    .parens()
            }
            ExprKind::Fn(func) => {
                let mut params: Vec<String> = func.params.iter().map(|p| p.to_string()).collect();
                if let Some(rest) = &func.rest {
                    params.push("&".to_string());
                    params.push(rest.to_string());
                }
                let mut doc = allocator.text("fn").annotate(fg(Color::Green));
                if let Some(name) = &func.name {
                    doc = doc.append(allocator.space()).append(allocator.text(name.to_string()));
                }
                let captures = self
                    .captures
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                doc.append(allocator.space())
                    .append(allocator.text(format!("[{}]", params.join(" "))))
                    .append(allocator.space())
                    .append(
                        allocator
                            .text(format!("{{{}}}", captures))
                            .annotate(fg(Color::Yellow)),
                    )
                    .append(allocator.line())
                    .append(func.body.pretty(allocator, types))
                    .nest(1)
                    .group()
                    .parens()
            }
            ExprKind::Do(body) => allocator
                .text("do")
                .annotate(fg(Color::Green))
                .append(allocator.line())
                .append(allocator.intersperse(
                    body.iter().map(|e| e.pretty(allocator, types)),
                    allocator.line(),
                ))
                .nest(1)
                .group()
                .parens(),
            ExprKind::Call(call) => allocator
                .intersperse(
                    std::iter::once(call.callee.pretty(allocator, types))
                        .chain(call.args.iter().map(|e| e.pretty(allocator, types))),
                    allocator.line(),
                )
                .nest(1)
                .group()
                .parens(),
        };

        node.append(ty).align()
    }

    pub fn pretty_print(&self, types: &TypeTable, out: impl WriteColor) -> std::io::Result<()> {
        let allocator = BoxAllocator;

        self.pretty(&allocator, types).1.render_colored(80, out)?;

        Ok(())
    }
}
