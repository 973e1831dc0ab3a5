//! Compilation pipeline.
//!
//! `read -> check -> lower -> canonicalize -> optimize` for the IR views,
//! and `check -> translate` for machine code. All passes draw temp and label
//! ids from the [`IdGen`] owned by one [`Compiler`].

pub mod asm;
pub mod canon;
pub mod checker;
pub mod env;
pub mod expr;
pub mod ir;
pub mod lower;
pub mod natives;
pub mod optimize;
pub mod reader;
pub mod sexpr;
pub mod types;

use std::rc::Rc;

use crate::error::CompileResult;

use self::{
    asm::Translator,
    canon::Canonicalizer,
    checker::Checker,
    expr::Expr,
    ir::{CBlock, IrExpr, Temp},
    lower::Lowerer,
    sexpr::Sexpr,
    types::TypeTable,
};

/// Monotonic source of ids for temps and labels.
#[derive(Debug, Default)]
pub struct IdGen {
    next: u32,
}

impl IdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Fresh compiler-introduced temp.
    pub fn temp(&mut self) -> Temp {
        Temp {
            id: self.next(),
            hint: None,
        }
    }

    /// Fresh temp standing for the source variable `hint`.
    pub fn named(&mut self, hint: &str) -> Temp {
        Temp {
            id: self.next(),
            hint: Some(Rc::from(hint)),
        }
    }
}

/// Everything one compilation produces.
#[derive(Debug)]
pub struct Compilation {
    pub forms: Vec<Sexpr>,
    pub types: TypeTable,
    pub typed: Vec<Expr>,
    pub ir: Vec<IrExpr>,
    pub canonical: Vec<CBlock>,
    pub asm: String,
}

pub struct Compiler {
    ids: IdGen,
    optimize: bool,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            ids: IdGen::new(),
            optimize: true,
        }
    }

    pub fn with_optimization(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn read(&mut self, source: &str) -> CompileResult<Vec<Sexpr>> {
        let forms = reader::read(source)?;
        log::debug!("read {} top-level form(s)", forms.len());
        Ok(forms)
    }

    pub fn check(&mut self, source: &str) -> CompileResult<(Vec<Expr>, TypeTable)> {
        let forms = self.read(source)?;
        self.check_forms(&forms)
    }

    pub fn check_forms(&mut self, forms: &[Sexpr]) -> CompileResult<(Vec<Expr>, TypeTable)> {
        let mut checker = Checker::new();
        let typed = checker.check_program(forms)?;
        log::debug!("checked {} form(s)", typed.len());
        Ok((typed, checker.into_types()))
    }

    pub fn lower(&mut self, typed: &[Expr]) -> CompileResult<Vec<IrExpr>> {
        let ir = Lowerer::new(&mut self.ids).lower_program(typed)?;
        log::debug!("lowered to {} IR tree(s)", ir.len());
        Ok(ir)
    }

    pub fn canonicalize(&mut self, ir: Vec<IrExpr>) -> Vec<CBlock> {
        let mut canonicalizer = Canonicalizer::new(&mut self.ids);
        let blocks: Vec<CBlock> = ir.into_iter().map(|expr| canonicalizer.block(expr)).collect();
        log::debug!(
            "canonicalized into {} statement(s)",
            blocks.iter().map(|block| block.stmts.len()).sum::<usize>()
        );

        if self.optimize {
            optimize::optimize_program(blocks)
        } else {
            blocks
        }
    }

    pub fn translate(&mut self, typed: &[Expr]) -> CompileResult<String> {
        let asm = Translator::new(&mut self.ids).translate_program(typed)?;
        log::debug!("emitted {} line(s) of assembly", asm.lines().count());
        Ok(asm)
    }

    pub fn compile(&mut self, source: &str) -> CompileResult<Compilation> {
        let forms = self.read(source)?;
        let (typed, types) = self.check_forms(&forms)?;
        let ir = self.lower(&typed)?;
        let canonical = self.canonicalize(ir.clone());
        let asm = self.translate(&typed)?;

        Ok(Compilation {
            forms,
            types,
            typed,
            ir,
            canonical,
            asm,
        })
    }
}

/// Compiles `source` straight to NASM text.
pub fn compile_to_asm(source: &str) -> CompileResult<String> {
    let mut compiler = Compiler::new();
    let (typed, _) = compiler.check(source)?;
    // Lowering reports unresolved symbols; its IR is not needed for NASM.
    let _ir = compiler.lower(&typed)?;
    compiler.translate(&typed)
}
