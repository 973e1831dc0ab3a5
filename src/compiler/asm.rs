//! x86-64 NASM code generation from the typed tree.
//!
//! Every value lives in one tagged machine word. Expressions leave their
//! result in `rax`. Calls pass the callee closure in `rdi` and declared
//! arguments in `rsi rdx rcx r8 r9`, the rest on the stack.

use std::rc::Rc;

use crate::error::{CompileError, CompileResult};

use super::env::{ScopeId, Scopes};
use super::expr::{Call, Expr, ExprKind, Function, Literal};
use super::ir::Tag;
use super::lower::function_label;
use super::natives::NATIVES;
use super::IdGen;

pub static REGISTER_PARAMS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

/// Declared parameters passed in registers; `rdi` holds the closure.
const REGISTER_ARGS: usize = 5;

const TRUE: i64 = (1 << 3) | 1;
const FALSE: i64 = 1;

const RUNTIME_EXTERNS: &[&str] = &[
    "__alloc_init",
    "__allocate",
    "__deallocate",
    "__debexit",
    "__error",
    "__toBool",
    "__toInt",
    "__toClosure",
    "__toList",
    "__toString",
    "__isClosure",
    "__make_list",
    "__make_vector",
];

/// Where a variable lives at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// Stack slot at `[rbp-8*depth]`.
    Local(usize),
    /// Declared parameter `i` of the current function.
    Param(usize),
    /// Captured slot `k` of the current closure.
    Closure(usize),
    /// The closure being executed, held in `rdi`.
    Current,
    /// Statically allocated closure object.
    Func(Rc<str>),
}

/// Per-function bookkeeping. Top-level code is a frame with no parameters.
#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    in_function: bool,
    params: usize,
    /// Words pushed below `rbp` so far.
    depth: usize,
}

pub struct Translator<'g> {
    ids: &'g mut IdGen,
    scopes: Scopes<Storage>,
    frame: Frame,
    code: Vec<String>,
    data: Vec<String>,
}

macro_rules! emit {
    ($self:ident, $($arg:tt)*) => {
        $self.code.push(format!($($arg)*))
    };
}

impl<'g> Translator<'g> {
    pub fn new(ids: &'g mut IdGen) -> Self {
        let mut scopes = Scopes::new();
        for native in NATIVES {
            scopes.define_global(
                Rc::from(native.name),
                Storage::Func(native.closure_label().into()),
            );
        }

        Self {
            ids,
            scopes,
            frame: Frame::default(),
            code: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn translate_program(mut self, exprs: &[Expr]) -> CompileResult<String> {
        for expr in exprs {
            self.compile(expr)?;
        }
        Ok(self.finish())
    }

    fn push(&mut self, register: &str) {
        emit!(self, "push {}", register);
        self.frame.depth += 1;
    }

    fn pop(&mut self, register: &str) {
        emit!(self, "pop {}", register);
        self.frame.depth -= 1;
    }

    fn reserve(&mut self, words: usize) {
        if words > 0 {
            emit!(self, "sub rsp, {}", 8 * words);
            self.frame.depth += words;
        }
    }

    fn release(&mut self, words: usize) {
        if words > 0 {
            emit!(self, "add rsp, {}", 8 * words);
            self.frame.depth -= words;
        }
    }

    /// Registers holding the closure pointer and parameters of the current
    /// function. A nested call clobbers them.
    fn live_registers(&self) -> &'static [&'static str] {
        if !self.frame.in_function {
            return &[];
        }
        &REGISTER_PARAMS[..1 + self.frame.params.min(REGISTER_ARGS)]
    }

    fn save_registers(&mut self) -> &'static [&'static str] {
        let live = self.live_registers();
        for register in live {
            self.push(register);
        }
        live
    }

    fn restore_registers(&mut self, saved: &[&str]) {
        for register in saved.iter().rev() {
            self.pop(register);
        }
    }

    fn load(&mut self, storage: &Storage) {
        match storage {
            Storage::Local(depth) => emit!(self, "mov rax, [rbp-{}]", 8 * depth),
            Storage::Param(i) if *i < REGISTER_ARGS => {
                emit!(self, "mov rax, {}", REGISTER_PARAMS[i + 1])
            }
            Storage::Param(i) => emit!(self, "mov rax, [rbp+{}]", 16 + 8 * (i - REGISTER_ARGS)),
            Storage::Closure(k) => {
                emit!(self, "mov rax, rdi");
                emit!(self, "and rax, {}", !Tag::MASK);
                emit!(self, "mov rax, [rax+{}]", 8 * (k + 1));
            }
            Storage::Current => emit!(self, "mov rax, rdi"),
            Storage::Func(label) => {
                emit!(self, "mov rax, {}", label);
                emit!(self, "or rax, {}", Tag::Closure.bits());
            }
        }
    }

    pub fn compile(&mut self, expr: &Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::Literal(lit) => self.compile_literal(lit),
            ExprKind::Symbol(name) => {
                let storage = self.scopes.lookup(name).cloned().ok_or_else(|| {
                    CompileError::UnresolvedSymbol {
                        name: name.to_string(),
                        line: expr.line(),
                    }
                })?;
                self.load(&storage);
            }
            ExprKind::List(elems) => self.compile_aggregate("__make_list", elems)?,
            ExprKind::Vector(elems) => self.compile_aggregate("__make_vector", elems)?,
            ExprKind::If(cond, then, else_) => self.compile_if(cond, then, else_)?,
            ExprKind::Let(bindings, body) => {
                let saved = self.scopes.enter();
                let result = self.compile_let(bindings, body);
                self.scopes.exit(saved);
                result?
            }
            ExprKind::Fn(func) => self.compile_fn(expr, func)?,
            ExprKind::Do(body) => {
                if body.is_empty() {
                    self.compile_literal(&Literal::Nil);
                }
                for expr in body {
                    self.compile(expr)?;
                }
            }
            ExprKind::Call(call) => self.compile_call(call)?,
        }
        Ok(())
    }

    fn compile_literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Nil => emit!(self, "xor rax, rax"),
            Literal::Boolean(true) => emit!(self, "mov rax, {}", TRUE),
            Literal::Boolean(false) => emit!(self, "mov rax, {}", FALSE),
            Literal::Number(n) => emit!(self, "mov rax, {}", (n << 3) | Tag::Int.bits()),
            Literal::String(s) => {
                let label = format!("string_{}", self.ids.next());
                self.data.push(format!("{}:", label));
                self.data.push(format!("dq {}", s.len()));
                if !s.is_empty() {
                    let bytes = s.bytes().map(|b| b.to_string()).collect::<Vec<_>>();
                    self.data.push(format!("db {}", bytes.join(", ")));
                }
                self.data.push("ALIGN 8".to_string());
                emit!(self, "mov rax, {}", label);
                emit!(self, "or rax, {}", Tag::String.bits());
            }
        }
    }

    /// Evaluates `elems` into a contiguous block on the stack and hands it to
    /// a runtime constructor as `rdi = count, rsi = block`.
    fn compile_aggregate(&mut self, routine: &str, elems: &[Expr]) -> CompileResult<()> {
        if elems.is_empty() {
            emit!(self, "mov rax, {}", Tag::List.bits());
            return Ok(());
        }

        self.reserve(elems.len());
        let base = self.frame.depth;
        for (j, elem) in elems.iter().enumerate() {
            self.compile(elem)?;
            emit!(self, "mov [rbp-{}], rax", 8 * (base - j));
        }

        let saved = self.save_registers();
        emit!(self, "mov rdi, {}", elems.len());
        emit!(self, "lea rsi, [rbp-{}]", 8 * base);
        emit!(self, "call {}", routine);
        self.restore_registers(saved);
        self.release(elems.len());
        Ok(())
    }

    fn compile_if(&mut self, cond: &Expr, then: &Expr, else_: &Expr) -> CompileResult<()> {
        let id = self.ids.next();

        self.compile(cond)?;
        emit!(self, "cmp rax, {}", TRUE);
        emit!(self, "je true_{}", id);

        self.compile(else_)?;
        emit!(self, "jmp after_{}", id);

        emit!(self, "true_{}:", id);
        self.compile(then)?;
        emit!(self, "after_{}:", id);
        Ok(())
    }

    fn compile_let(&mut self, bindings: &[(Rc<str>, Expr)], body: &Expr) -> CompileResult<()> {
        for (name, value) in bindings {
            self.compile(value)?;
            self.push("rax");
            self.scopes
                .define(name.clone(), Storage::Local(self.frame.depth));
        }

        self.compile(body)?;
        self.release(bindings.len());
        Ok(())
    }

    fn compile_call(&mut self, call: &Call) -> CompileResult<()> {
        let saved = self.save_registers();

        let (positional, surplus) = match call.spread {
            Some(at) => call.args.split_at(at.min(call.args.len())),
            None => (&call.args[..], &[][..]),
        };
        let count = positional.len() + usize::from(call.spread.is_some());
        let in_registers = count.min(REGISTER_ARGS);
        let on_stack = count - in_registers;

        self.reserve(on_stack);
        let base = self.frame.depth;

        for i in 0..count {
            match positional.get(i) {
                Some(arg) => self.compile(arg)?,
                None => self.compile_aggregate("__make_list", surplus)?,
            }

            if i < REGISTER_ARGS {
                self.push("rax");
            } else {
                emit!(self, "mov [rbp-{}], rax", 8 * (base - (i - REGISTER_ARGS)));
            }
        }

        self.compile(&call.callee)?;
        emit!(self, "mov r11, rax");
        emit!(self, "and r11, {}", Tag::MASK);
        emit!(self, "cmp r11, {}", Tag::Closure.bits());
        emit!(self, "jne __error");

        emit!(self, "mov rdi, rax");
        for i in (0..in_registers).rev() {
            self.pop(REGISTER_PARAMS[i + 1]);
        }

        emit!(self, "mov rax, rdi");
        emit!(self, "and rax, {}", !Tag::MASK);
        emit!(self, "call [rax]");

        self.release(on_stack);
        self.restore_registers(saved);
        Ok(())
    }

    fn compile_fn(&mut self, expr: &Expr, func: &Function) -> CompileResult<()> {
        let id = self.ids.next();
        let label = function_label(func.name.as_deref(), id);
        let closure: Rc<str> = format!("{}_closure", label).into();

        // Resolve capture sources before the body's frame replaces the scope.
        let mut sources = Vec::with_capacity(expr.captures.len());
        for name in &expr.captures {
            let storage = self.scopes.lookup(name).cloned().ok_or_else(|| {
                CompileError::UnresolvedSymbol {
                    name: name.to_string(),
                    line: expr.line(),
                }
            })?;
            sources.push(storage);
        }

        emit!(self, "jmp after_{}", id);
        emit!(self, "{}:", label);
        emit!(self, "push rbp");
        emit!(self, "mov rbp, rsp");

        let outer = std::mem::replace(
            &mut self.frame,
            Frame {
                in_function: true,
                params: func.all_params().count(),
                depth: 0,
            },
        );
        let saved = self.scopes.enter_from(ScopeId::GLOBAL);

        for (k, name) in expr.captures.iter().enumerate() {
            self.scopes.define(name.clone(), Storage::Closure(k));
        }
        for (i, param) in func.all_params().enumerate() {
            self.scopes.define(param.clone(), Storage::Param(i));
        }
        if let Some(name) = &func.name {
            let own = if sources.is_empty() {
                Storage::Func(closure.clone())
            } else {
                Storage::Current
            };
            self.scopes.define(name.clone(), own);
        }

        let body = self.compile(&func.body);
        self.scopes.exit(saved);
        self.frame = outer;
        body?;

        emit!(self, "pop rbp");
        emit!(self, "ret");
        emit!(self, "after_{}:", id);

        if sources.is_empty() {
            self.data.push(format!("{}:", closure));
            self.data.push(format!("dq {}", label));
            self.load(&Storage::Func(closure.clone()));

            if func.global {
                if let Some(name) = &func.name {
                    self.scopes.define_global(name.clone(), Storage::Func(closure));
                }
            }
        } else {
            self.allocate_closure(&label, &sources);
        }

        log::trace!("emitted function {} ({} capture(s))", label, sources.len());
        Ok(())
    }

    /// Builds a fresh closure object `[code, capture...]` on the heap,
    /// snapshotting every capture, and leaves it tagged in `rax`.
    fn allocate_closure(&mut self, label: &str, sources: &[Storage]) {
        let saved = self.save_registers();
        emit!(self, "mov rax, {}", 8 * (1 + sources.len()));
        emit!(self, "call __allocate");
        self.restore_registers(saved);

        emit!(self, "mov r11, {}", label);
        emit!(self, "mov [rax], r11");
        self.push("rax");
        for (k, source) in sources.iter().enumerate() {
            self.load(source);
            emit!(self, "mov r11, [rsp]");
            emit!(self, "mov [r11+{}], rax", 8 * (k + 1));
        }
        self.pop("rax");
        emit!(self, "or rax, {}", Tag::Closure.bits());
    }

    fn finish(self) -> String {
        let mut lines: Vec<String> = RUNTIME_EXTERNS
            .iter()
            .map(|name| format!("extern {}", name))
            .chain(NATIVES.iter().map(|native| format!("extern {}", native.closure_label())))
            .collect();

        lines.push(String::new());
        lines.push("global _start".to_string());
        lines.push("_start:".to_string());
        lines.push("mov rbp, rsp".to_string());
        lines.push("call __alloc_init".to_string());
        lines.extend(self.code);
        lines.push("call __debexit".to_string());
        lines.push(String::new());
        lines.push("section .data".to_string());
        lines.push("ALIGN 8".to_string());
        lines.extend(self.data);

        let mut out = String::new();
        for line in lines {
            if indented(&line) {
                out.push('\t');
            }
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

fn indented(line: &str) -> bool {
    !(line.is_empty()
        || line.ends_with(':')
        || line.starts_with("global")
        || line.starts_with("extern")
        || line.starts_with("section"))
}
