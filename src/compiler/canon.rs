//! Canonicalization: flattens tree IR into [`CBlock`]s.
//!
//! Nested expressions are hoisted into moves to fresh synthetic temps so
//! every operand becomes a [`Value`]. Statements are emitted in evaluation
//! order: arguments left to right, then the operator.

use std::rc::Rc;

use super::ir::{CBlock, CCapture, CExpr, CFunc, CStmt, IrExpr, IrFunc, IrStmt, Value};
use super::IdGen;

pub struct Canonicalizer<'g> {
    ids: &'g mut IdGen,
}

impl<'g> Canonicalizer<'g> {
    pub fn new(ids: &'g mut IdGen) -> Self {
        Self { ids }
    }

    pub fn block(&mut self, expr: IrExpr) -> CBlock {
        let mut stmts = Vec::new();
        let value = self.expr(expr, &mut stmts);
        CBlock { stmts, value }
    }

    fn expr(&mut self, expr: IrExpr, out: &mut Vec<CStmt>) -> CExpr {
        match expr {
            IrExpr::Const(c) => CExpr::Value(Value::Const(c)),
            IrExpr::Temp(t) => CExpr::Value(Value::Temp(t)),
            IrExpr::Tag(tag, inner) => CExpr::Tag(tag, self.value(*inner, out)),
            IrExpr::Untag(inner) => CExpr::Untag(self.value(*inner, out)),
            IrExpr::Call(func, args) => {
                let args = args.into_iter().map(|arg| self.value(arg, out)).collect();
                let func = self.value(*func, out);
                let result = self.ids.temp();
                out.push(CStmt::Move(result.clone(), CExpr::Call(func, args)));
                CExpr::Value(Value::Temp(result))
            }
            IrExpr::Func(func) => CExpr::Func(Rc::new(self.func(*func, out))),
            IrExpr::ESeq(stmt, expr) => {
                self.stmt(*stmt, out);
                self.expr(*expr, out)
            }
        }
    }

    /// Constants and temps pass through. Anything else is canonicalized and
    /// its result staged into a fresh synthetic temp.
    fn value(&mut self, expr: IrExpr, out: &mut Vec<CStmt>) -> Value {
        match expr {
            IrExpr::Const(c) => Value::Const(c),
            IrExpr::Temp(t) => Value::Temp(t),
            other => {
                let result = self.expr(other, out);
                let temp = self.ids.temp();
                out.push(CStmt::Move(temp.clone(), result));
                Value::Temp(temp)
            }
        }
    }

    fn func(&mut self, func: IrFunc, out: &mut Vec<CStmt>) -> CFunc {
        let captures = func
            .captures
            .into_iter()
            .map(|capture| CCapture {
                name: capture.name,
                slot: capture.slot,
                source: self.value(capture.source, out),
            })
            .collect();

        CFunc {
            label: func.label,
            params: func.params,
            variadic: func.variadic,
            body: self.block(func.body),
            captures,
        }
    }

    fn stmt(&mut self, stmt: IrStmt, out: &mut Vec<CStmt>) {
        match stmt {
            IrStmt::Move(dest, src) => {
                let src = self.expr(src, out);
                out.push(CStmt::Move(dest, src));
            }
            IrStmt::Seq(stmts) => {
                for stmt in stmts {
                    self.stmt(stmt, out);
                }
            }
            IrStmt::Jump(label) => out.push(CStmt::Jump(label)),
            IrStmt::CJump(cond, label) => {
                let cond = self.value(cond, out);
                out.push(CStmt::CJump(cond, label));
            }
            IrStmt::Phi(dest, sources) => out.push(CStmt::Phi(dest, sources)),
            IrStmt::Label(label) => out.push(CStmt::Label(label)),
            // Only the statements emitted while evaluating survive.
            IrStmt::Exp(expr) => {
                self.expr(expr, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{Const, Tag, Temp};

    fn int(n: i64) -> IrExpr {
        IrExpr::tag(Tag::Int, IrExpr::Const(Const::Int(n)))
    }

    #[test]
    fn nested_calls_are_hoisted_in_order() {
        let mut ids = IdGen::new();
        let inner = IrExpr::Call(Box::new(IrExpr::label("g")), vec![int(1)]);
        let outer = IrExpr::Call(Box::new(IrExpr::label("f")), vec![inner, int(2)]);

        let block = Canonicalizer::new(&mut ids).block(outer);

        // t0 = tag 1, t1 = g(t0), t2 = t1, t3 = tag 2, t4 = f(t2, t3)
        assert_eq!(block.stmts.len(), 5);
        assert!(matches!(&block.stmts[2], CStmt::Move(dest, CExpr::Value(Value::Temp(src)))
            if dest.is_synthetic() && src.is_synthetic()));
        let calls: Vec<&Value> = block
            .stmts
            .iter()
            .filter_map(|stmt| match stmt {
                CStmt::Move(_, CExpr::Call(func, _)) => Some(func),
                _ => None,
            })
            .collect();
        assert_eq!(
            calls,
            [
                &Value::Const(Const::Label("g".into())),
                &Value::Const(Const::Label("f".into()))
            ]
        );
        assert!(matches!(block.value, CExpr::Value(Value::Temp(_))));
    }

    #[test]
    fn arguments_are_evaluated_before_the_operator() {
        let mut ids = IdGen::new();
        let callee = IrExpr::ESeq(
            Box::new(IrStmt::Exp(IrExpr::Call(Box::new(IrExpr::label("h")), vec![]))),
            Box::new(IrExpr::label("f")),
        );
        let arg = IrExpr::Call(Box::new(IrExpr::label("g")), vec![]);
        let call = IrExpr::Call(Box::new(callee), vec![arg]);

        let block = Canonicalizer::new(&mut ids).block(call);
        let order: Vec<&Value> = block
            .stmts
            .iter()
            .filter_map(|stmt| match stmt {
                CStmt::Move(_, CExpr::Call(func, _)) => Some(func),
                _ => None,
            })
            .collect();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], &Value::Const(Const::Label("g".into())));
        assert_eq!(order[1], &Value::Const(Const::Label("h".into())));
        assert!(matches!(order[2], Value::Temp(_)));
    }

    #[test]
    fn simple_operands_are_not_staged() {
        let mut ids = IdGen::new();
        let x = Temp {
            id: 99,
            hint: Some("x".into()),
        };
        let call = IrExpr::Call(
            Box::new(IrExpr::label("f")),
            vec![IrExpr::Temp(x.clone()), IrExpr::Const(Const::Int(3))],
        );

        let block = Canonicalizer::new(&mut ids).block(call);
        assert_eq!(block.stmts.len(), 1);
        assert!(matches!(&block.stmts[0], CStmt::Move(_, CExpr::Call(_, args))
            if args[0] == Value::Temp(x.clone())));
    }

    #[test]
    fn exp_statements_keep_only_their_effects() {
        let mut ids = IdGen::new();
        let call = IrExpr::Call(Box::new(IrExpr::label("f")), vec![]);
        let expr = IrExpr::ESeq(
            Box::new(IrStmt::Seq(vec![
                IrStmt::Exp(int(1)),
                IrStmt::Exp(call),
            ])),
            Box::new(int(2)),
        );

        let block = Canonicalizer::new(&mut ids).block(expr);
        assert_eq!(block.stmts.len(), 1);
        assert_eq!(block.value, CExpr::Tag(Tag::Int, Value::Const(Const::Int(2))));
    }
}
