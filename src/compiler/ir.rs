//! Tree IR and its canonical (flattened) form.
//!
//! [`IrExpr`]/[`IrStmt`] are produced by lowering and may nest arbitrarily.
//! The canonicalizer turns them into [`CBlock`]s, where statement sequences
//! are flat and every call operand is a [`Value`]. The canonical types make
//! the shape invariants unrepresentable rather than checked.

use std::{fmt, rc::Rc};

use pretty::{BoxAllocator, DocAllocator, DocBuilder};
use termcolor::{Color, ColorSpec, WriteColor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Const {
    Int(i64),
    Bool(bool),
    Nil,
    Str(Rc<str>),
    /// Address of a code or data label.
    Label(Rc<str>),
}

/// Virtual register. Named temps carry the source name they were bound from;
/// synthetic ones are introduced by the compiler and are fair game for copy
/// propagation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Temp {
    pub id: u32,
    pub hint: Option<Rc<str>>,
}

impl Temp {
    pub fn is_synthetic(&self) -> bool {
        self.hint.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label(pub Rc<str>);

/// Runtime type tags stored in the low three bits of every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Nil,
    Bool,
    Int,
    Closure,
    List,
    String,
}

impl Tag {
    pub const MASK: i64 = 7;

    pub fn bits(self) -> i64 {
        match self {
            Tag::Nil => 0,
            Tag::Bool => 1,
            Tag::Int => 2,
            Tag::Closure => 3,
            Tag::List => 4,
            Tag::String => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tag::Nil => "nil",
            Tag::Bool => "bool",
            Tag::Int => "int",
            Tag::Closure => "closure",
            Tag::List => "list",
            Tag::String => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrExpr {
    Const(Const),
    Temp(Temp),
    Tag(Tag, Box<IrExpr>),
    Untag(Box<IrExpr>),
    Call(Box<IrExpr>, Vec<IrExpr>),
    Func(Box<IrFunc>),
    /// Run the statement, then evaluate the expression.
    ESeq(Box<IrStmt>, Box<IrExpr>),
}

impl IrExpr {
    pub fn tag(tag: Tag, expr: IrExpr) -> IrExpr {
        IrExpr::Tag(tag, Box::new(expr))
    }

    pub fn untag(expr: IrExpr) -> IrExpr {
        IrExpr::Untag(Box::new(expr))
    }

    pub fn label(name: impl Into<Rc<str>>) -> IrExpr {
        IrExpr::Const(Const::Label(name.into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub name: Rc<str>,
    /// Temp the captured value is known by inside the function.
    pub slot: Temp,
    /// Value of the captured variable at closure creation time.
    pub source: IrExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrFunc {
    pub label: Label,
    /// Positional parameters followed by the rest parameter, if any.
    pub params: Vec<Temp>,
    pub variadic: bool,
    pub body: IrExpr,
    pub captures: Vec<Capture>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrStmt {
    Move(Temp, IrExpr),
    Seq(Vec<IrStmt>),
    Jump(Label),
    /// Jump to the label when the condition is true, fall through otherwise.
    CJump(IrExpr, Label),
    Phi(Temp, Vec<(Label, Temp)>),
    Label(Label),
    Exp(IrExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Const(Const),
    Temp(Temp),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CExpr {
    Value(Value),
    Tag(Tag, Value),
    Untag(Value),
    Call(Value, Vec<Value>),
    Func(Rc<CFunc>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CCapture {
    pub name: Rc<str>,
    pub slot: Temp,
    pub source: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CFunc {
    pub label: Label,
    pub params: Vec<Temp>,
    pub variadic: bool,
    pub body: CBlock,
    pub captures: Vec<CCapture>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CStmt {
    Move(Temp, CExpr),
    Jump(Label),
    CJump(Value, Label),
    Phi(Temp, Vec<(Label, Temp)>),
    Label(Label),
}

/// Flat statement list followed by the block's result.
#[derive(Debug, Clone, PartialEq)]
pub struct CBlock {
    pub stmts: Vec<CStmt>,
    pub value: CExpr,
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(n) => write!(f, "{}", n),
            Const::Bool(b) => write!(f, "{}", b),
            Const::Nil => write!(f, "nil"),
            Const::Str(s) => write!(f, "{:?}", &**s),
            Const::Label(l) => write!(f, "@{}", l),
        }
    }
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{}.{}", hint, self.id),
            None => write!(f, "t{}", self.id),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Const(c) => c.fmt(f),
            Value::Temp(t) => t.fmt(f),
        }
    }
}

fn fg(color: Color) -> ColorSpec {
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(color));
    spec
}

fn kw<'a, D>(allocator: &'a D, name: &'static str) -> DocBuilder<'a, D, ColorSpec>
where
    D: DocAllocator<'a, ColorSpec>,
    D::Doc: Clone,
{
    allocator.text(name).annotate(fg(Color::Green))
}

/// `(head child child ...)`, breaking lines between children when needed.
fn form<'a, D>(
    allocator: &'a D,
    head: DocBuilder<'a, D, ColorSpec>,
    children: impl IntoIterator<Item = DocBuilder<'a, D, ColorSpec>>,
) -> DocBuilder<'a, D, ColorSpec>
where
    D: DocAllocator<'a, ColorSpec>,
    D::Doc: Clone,
{
    let mut doc = head;
    for child in children {
        doc = doc.append(allocator.line()).append(child);
    }
    doc.nest(1).group().parens()
}

fn temp_doc<'a, D>(allocator: &'a D, temp: &Temp) -> DocBuilder<'a, D, ColorSpec>
where
    D: DocAllocator<'a, ColorSpec>,
    D::Doc: Clone,
{
    allocator.text(temp.to_string()).annotate(fg(Color::Cyan))
}

fn label_doc<'a, D>(allocator: &'a D, label: &Label) -> DocBuilder<'a, D, ColorSpec>
where
    D: DocAllocator<'a, ColorSpec>,
    D::Doc: Clone,
{
    allocator.text(label.to_string()).annotate(fg(Color::Yellow))
}

fn phi_doc<'a, D>(
    allocator: &'a D,
    dest: &Temp,
    sources: &[(Label, Temp)],
) -> DocBuilder<'a, D, ColorSpec>
where
    D: DocAllocator<'a, ColorSpec>,
    D::Doc: Clone,
{
    form(
        allocator,
        kw(allocator, "phi"),
        std::iter::once(temp_doc(allocator, dest)).chain(sources.iter().map(|(label, temp)| {
            label_doc(allocator, label)
                .append(allocator.text(": "))
                .append(temp_doc(allocator, temp))
                .brackets()
        })),
    )
}

impl Value {
    pub fn pretty<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        match self {
            Value::Temp(temp) => temp_doc(allocator, temp),
            Value::Const(c) => allocator.text(c.to_string()).annotate(fg(Color::Magenta)),
        }
    }
}

impl IrExpr {
    pub fn pretty<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        match self {
            IrExpr::Const(c) => allocator.text(c.to_string()).annotate(fg(Color::Magenta)),
            IrExpr::Temp(temp) => temp_doc(allocator, temp),
            IrExpr::Tag(tag, inner) => form(
                allocator,
                kw(allocator, "tag").append(allocator.space()).append(tag.name()),
                [inner.pretty(allocator)],
            ),
            IrExpr::Untag(inner) => form(allocator, kw(allocator, "untag"), [inner.pretty(allocator)]),
            IrExpr::Call(func, args) => form(
                allocator,
                kw(allocator, "call"),
                std::iter::once(func.pretty(allocator)).chain(args.iter().map(|a| a.pretty(allocator))),
            ),
            IrExpr::Func(func) => func.pretty(allocator),
            IrExpr::ESeq(stmt, expr) => form(
                allocator,
                kw(allocator, "eseq"),
                [stmt.pretty(allocator), expr.pretty(allocator)],
            ),
        }
    }

    pub fn pretty_print(&self, out: impl WriteColor) -> std::io::Result<()> {
        let allocator = BoxAllocator;
        self.pretty(&allocator).1.render_colored(80, out)?;
        Ok(())
    }
}

impl IrFunc {
    pub fn pretty<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        let params = allocator
            .intersperse(self.params.iter().map(|p| temp_doc(allocator, p)), allocator.space())
            .brackets();
        let captures = self.captures.iter().map(|capture| {
            form(
                allocator,
                kw(allocator, "capture"),
                [temp_doc(allocator, &capture.slot), capture.source.pretty(allocator)],
            )
        });

        form(
            allocator,
            kw(allocator, "func")
                .append(allocator.space())
                .append(label_doc(allocator, &self.label))
                .append(allocator.space())
                .append(params)
                .append(if self.variadic { " &" } else { "" }),
            captures.chain(std::iter::once(self.body.pretty(allocator))),
        )
    }
}

impl IrStmt {
    pub fn pretty<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        match self {
            IrStmt::Move(dest, src) => form(
                allocator,
                kw(allocator, "move"),
                [temp_doc(allocator, dest), src.pretty(allocator)],
            ),
            IrStmt::Seq(stmts) => form(
                allocator,
                kw(allocator, "seq"),
                stmts.iter().map(|s| s.pretty(allocator)),
            ),
            IrStmt::Jump(label) => form(allocator, kw(allocator, "jump"), [label_doc(allocator, label)]),
            IrStmt::CJump(cond, label) => form(
                allocator,
                kw(allocator, "cjump"),
                [cond.pretty(allocator), label_doc(allocator, label)],
            ),
            IrStmt::Phi(dest, sources) => phi_doc(allocator, dest, sources),
            IrStmt::Label(label) => label_doc(allocator, label).append(":"),
            IrStmt::Exp(expr) => form(allocator, kw(allocator, "exp"), [expr.pretty(allocator)]),
        }
    }
}

impl CExpr {
    pub fn pretty<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        match self {
            CExpr::Value(value) => value.pretty(allocator),
            CExpr::Tag(tag, value) => form(
                allocator,
                kw(allocator, "tag").append(allocator.space()).append(tag.name()),
                [value.pretty(allocator)],
            ),
            CExpr::Untag(value) => form(allocator, kw(allocator, "untag"), [value.pretty(allocator)]),
            CExpr::Call(func, args) => form(
                allocator,
                kw(allocator, "call"),
                std::iter::once(func.pretty(allocator)).chain(args.iter().map(|a| a.pretty(allocator))),
            ),
            CExpr::Func(func) => func.pretty(allocator),
        }
    }
}

impl CFunc {
    pub fn pretty<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        let params = allocator
            .intersperse(self.params.iter().map(|p| temp_doc(allocator, p)), allocator.space())
            .brackets();
        let captures = self.captures.iter().map(|capture| {
            form(
                allocator,
                kw(allocator, "capture"),
                [temp_doc(allocator, &capture.slot), capture.source.pretty(allocator)],
            )
        });

        form(
            allocator,
            kw(allocator, "func")
                .append(allocator.space())
                .append(label_doc(allocator, &self.label))
                .append(allocator.space())
                .append(params)
                .append(if self.variadic { " &" } else { "" }),
            captures.chain(std::iter::once(self.body.pretty(allocator))),
        )
    }
}

impl CStmt {
    pub fn pretty<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        match self {
            CStmt::Move(dest, src) => form(
                allocator,
                kw(allocator, "move"),
                [temp_doc(allocator, dest), src.pretty(allocator)],
            ),
            CStmt::Jump(label) => form(allocator, kw(allocator, "jump"), [label_doc(allocator, label)]),
            CStmt::CJump(cond, label) => form(
                allocator,
                kw(allocator, "cjump"),
                [cond.pretty(allocator), label_doc(allocator, label)],
            ),
            CStmt::Phi(dest, sources) => phi_doc(allocator, dest, sources),
            CStmt::Label(label) => label_doc(allocator, label).append(":"),
        }
    }
}

impl CBlock {
    pub fn pretty<'a, D>(&self, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        form(
            allocator,
            kw(allocator, "block"),
            self.stmts
                .iter()
                .map(|s| s.pretty(allocator))
                .chain(std::iter::once(self.value.pretty(allocator))),
        )
    }

    pub fn pretty_print(&self, out: impl WriteColor) -> std::io::Result<()> {
        let allocator = BoxAllocator;
        self.pretty(&allocator).1.render_colored(80, out)?;
        Ok(())
    }
}

impl fmt::Display for CBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = termcolor::NoColor::new(Vec::new());
        self.pretty_print(&mut out).map_err(|_| fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&out.into_inner()))
    }
}

impl fmt::Display for IrExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = termcolor::NoColor::new(Vec::new());
        self.pretty_print(&mut out).map_err(|_| fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&out.into_inner()))
    }
}
