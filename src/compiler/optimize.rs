//! Copy propagation over canonical IR.
//!
//! A move of a temp into a synthetic temp is deleted and every later read of
//! the synthetic temp is redirected to the source. Temps are unique across
//! the whole program, so one replacement map serves every block and every
//! nested function body.

use std::{collections::HashMap, rc::Rc};

use super::ir::{CBlock, CCapture, CExpr, CFunc, CStmt, Temp, Value};

#[derive(Debug, Default)]
pub struct Optimizer {
    replacements: HashMap<u32, Temp>,
    removed: usize,
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of moves deleted so far.
    pub fn removed(&self) -> usize {
        self.removed
    }

    pub fn block(&mut self, block: CBlock) -> CBlock {
        let mut stmts = Vec::with_capacity(block.stmts.len());
        for stmt in block.stmts {
            match stmt {
                CStmt::Move(dest, src) => {
                    let src = self.cexpr(src);
                    if let CExpr::Value(Value::Temp(source)) = &src {
                        if dest.is_synthetic() {
                            self.replacements.insert(dest.id, source.clone());
                            self.removed += 1;
                            continue;
                        }
                    }
                    stmts.push(CStmt::Move(dest, src));
                }
                CStmt::CJump(cond, label) => stmts.push(CStmt::CJump(self.value(cond), label)),
                CStmt::Phi(dest, sources) => {
                    let sources = sources
                        .into_iter()
                        .map(|(label, temp)| (label, self.temp(temp)))
                        .collect();
                    stmts.push(CStmt::Phi(dest, sources));
                }
                other @ (CStmt::Jump(_) | CStmt::Label(_)) => stmts.push(other),
            }
        }

        let value = self.cexpr(block.value);
        CBlock { stmts, value }
    }

    fn temp(&self, temp: Temp) -> Temp {
        let mut temp = temp;
        while let Some(next) = self.replacements.get(&temp.id) {
            temp = next.clone();
        }
        temp
    }

    fn value(&self, value: Value) -> Value {
        match value {
            Value::Temp(temp) => Value::Temp(self.temp(temp)),
            constant => constant,
        }
    }

    fn cexpr(&mut self, expr: CExpr) -> CExpr {
        match expr {
            CExpr::Value(value) => CExpr::Value(self.value(value)),
            CExpr::Tag(tag, value) => CExpr::Tag(tag, self.value(value)),
            CExpr::Untag(value) => CExpr::Untag(self.value(value)),
            CExpr::Call(func, args) => CExpr::Call(
                self.value(func),
                args.into_iter().map(|arg| self.value(arg)).collect(),
            ),
            CExpr::Func(func) => CExpr::Func(Rc::new(self.func(&func))),
        }
    }

    fn func(&mut self, func: &CFunc) -> CFunc {
        let captures = func
            .captures
            .iter()
            .map(|capture| CCapture {
                name: capture.name.clone(),
                slot: capture.slot.clone(),
                source: self.value(capture.source.clone()),
            })
            .collect();

        CFunc {
            label: func.label.clone(),
            params: func.params.clone(),
            variadic: func.variadic,
            body: self.block(func.body.clone()),
            captures,
        }
    }
}

/// Runs copy propagation over a whole program.
pub fn optimize_program(blocks: Vec<CBlock>) -> Vec<CBlock> {
    let mut optimizer = Optimizer::new();
    let blocks: Vec<CBlock> = blocks.into_iter().map(|block| optimizer.block(block)).collect();
    log::debug!("copy propagation removed {} move(s)", optimizer.removed());
    blocks
}
