//! Lowering from the typed tree to [`IrExpr`].
//!
//! Every source variable becomes a temp named after it. Conditionals turn
//! into explicit jumps joined by a phi, and function literals become
//! [`IrFunc`]s whose body only sees globals, its own parameters and the
//! temps its captures were copied into.

use std::rc::Rc;

use crate::error::{CompileError, CompileResult};

use super::env::{ScopeId, Scopes};
use super::expr::{Call, Expr, ExprKind, Function, Literal};
use super::ir::{Capture, Const, IrExpr, IrFunc, IrStmt, Label, Tag};
use super::natives::NATIVES;
use super::IdGen;

pub struct Lowerer<'g> {
    ids: &'g mut IdGen,
    scopes: Scopes<IrExpr>,
}

/// Label-safe rendition of a source name.
pub fn mangle(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

pub fn function_label(name: Option<&str>, id: u32) -> String {
    match name {
        Some(name) => format!("fn{}_{}", id, mangle(name)),
        None => format!("anon_{}", id),
    }
}

impl<'g> Lowerer<'g> {
    pub fn new(ids: &'g mut IdGen) -> Self {
        let mut scopes = Scopes::new();
        for native in NATIVES {
            scopes.define_global(
                Rc::from(native.name),
                IrExpr::tag(Tag::Closure, IrExpr::label(native.closure_label())),
            );
        }
        Self { ids, scopes }
    }

    pub fn lower_program(&mut self, exprs: &[Expr]) -> CompileResult<Vec<IrExpr>> {
        exprs.iter().map(|expr| self.lower(expr)).collect()
    }

    pub fn lower(&mut self, expr: &Expr) -> CompileResult<IrExpr> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(lower_literal(lit)),
            ExprKind::Symbol(name) => self.scopes.lookup(name).cloned().ok_or_else(|| {
                CompileError::UnresolvedSymbol {
                    name: name.to_string(),
                    line: expr.line(),
                }
            }),
            ExprKind::List(elems) => self.lower_aggregate("__make_list", elems),
            ExprKind::Vector(elems) => self.lower_aggregate("__make_vector", elems),
            ExprKind::If(cond, then, else_) => self.lower_if(cond, then, else_),
            ExprKind::Let(bindings, body) => {
                let saved = self.scopes.enter();
                let result = self.lower_let(bindings, body);
                self.scopes.exit(saved);
                result
            }
            ExprKind::Fn(func) => self.lower_fn(expr, func),
            ExprKind::Do(body) => match body.split_last() {
                None => Ok(lower_literal(&Literal::Nil)),
                Some((last, prefix)) => {
                    let mut stmts = Vec::with_capacity(prefix.len());
                    for expr in prefix {
                        stmts.push(IrStmt::Exp(self.lower(expr)?));
                    }
                    let last = self.lower(last)?;
                    Ok(IrExpr::ESeq(Box::new(IrStmt::Seq(stmts)), Box::new(last)))
                }
            },
            ExprKind::Call(call) => self.lower_call(call),
        }
    }

    fn lower_aggregate(&mut self, routine: &str, elems: &[Expr]) -> CompileResult<IrExpr> {
        if elems.is_empty() {
            return Ok(IrExpr::tag(Tag::List, IrExpr::Const(Const::Nil)));
        }

        let elems = elems
            .iter()
            .map(|elem| self.lower(elem))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(IrExpr::Call(Box::new(IrExpr::label(routine)), elems))
    }

    fn lower_if(&mut self, cond: &Expr, then: &Expr, else_: &Expr) -> CompileResult<IrExpr> {
        let id = self.ids.next();
        let true_label = Label(format!("true_{}", id).into());
        let false_label = Label(format!("false_{}", id).into());
        let after_label = Label(format!("after_{}", id).into());

        let true_temp = self.ids.named("if_true");
        let false_temp = self.ids.named("if_false");
        let result = self.ids.named("if_result");

        let cond = self.lower(cond)?;
        let then = self.lower(then)?;
        let else_ = self.lower(else_)?;

        let stmts = vec![
            IrStmt::CJump(IrExpr::untag(cond), true_label.clone()),
            IrStmt::Label(false_label.clone()),
            IrStmt::Move(false_temp.clone(), else_),
            IrStmt::Jump(after_label.clone()),
            IrStmt::Label(true_label.clone()),
            IrStmt::Move(true_temp.clone(), then),
            IrStmt::Label(after_label),
            IrStmt::Phi(
                result.clone(),
                vec![(true_label, true_temp), (false_label, false_temp)],
            ),
        ];

        Ok(IrExpr::ESeq(
            Box::new(IrStmt::Seq(stmts)),
            Box::new(IrExpr::Temp(result)),
        ))
    }

    fn lower_let(&mut self, bindings: &[(Rc<str>, Expr)], body: &Expr) -> CompileResult<IrExpr> {
        let mut stmts = Vec::with_capacity(bindings.len());
        for (name, value) in bindings {
            let value = self.lower(value)?;
            let temp = self.ids.named(name);
            stmts.push(IrStmt::Move(temp.clone(), value));
            self.scopes.define(name.clone(), IrExpr::Temp(temp));
        }

        let body = self.lower(body)?;
        Ok(IrExpr::ESeq(Box::new(IrStmt::Seq(stmts)), Box::new(body)))
    }

    fn lower_call(&mut self, call: &Call) -> CompileResult<IrExpr> {
        let callee = self.lower(&call.callee)?;

        let mut args = Vec::with_capacity(call.args.len());
        let (positional, surplus) = match call.spread {
            Some(at) => call.args.split_at(at.min(call.args.len())),
            None => (&call.args[..], &[][..]),
        };

        for arg in positional {
            args.push(self.lower(arg)?);
        }
        if call.spread.is_some() {
            args.push(self.lower_aggregate("__make_list", surplus)?);
        }

        Ok(IrExpr::Call(Box::new(IrExpr::untag(callee)), args))
    }

    fn lower_fn(&mut self, expr: &Expr, func: &Function) -> CompileResult<IrExpr> {
        let id = self.ids.next();
        let label = function_label(func.name.as_deref(), id);
        let closure_label = format!("{}_closure", label);

        // Resolve capture sources in the defining scope before switching frames.
        let mut captures = Vec::with_capacity(expr.captures.len());
        for name in &expr.captures {
            let source = self.scopes.lookup(name).cloned().ok_or_else(|| {
                CompileError::UnresolvedSymbol {
                    name: name.to_string(),
                    line: expr.line(),
                }
            })?;
            captures.push(Capture {
                name: name.clone(),
                slot: self.ids.named(name),
                source,
            });
        }

        let saved = self.scopes.enter_from(ScopeId::GLOBAL);
        for capture in &captures {
            self.scopes
                .define(capture.name.clone(), IrExpr::Temp(capture.slot.clone()));
        }

        let mut params = Vec::with_capacity(func.params.len() + 1);
        for param in func.all_params() {
            let temp = self.ids.named(param);
            self.scopes.define(param.clone(), IrExpr::Temp(temp.clone()));
            params.push(temp);
        }

        if let Some(name) = &func.name {
            self.scopes.define(
                name.clone(),
                IrExpr::tag(Tag::Closure, IrExpr::label(closure_label.as_str())),
            );
        }

        let body = self.lower(&func.body);
        self.scopes.exit(saved);

        let literal = IrExpr::tag(
            Tag::Closure,
            IrExpr::Func(Box::new(IrFunc {
                label: Label(label.into()),
                params,
                variadic: func.rest.is_some(),
                body: body?,
                captures,
            })),
        );

        if !func.global {
            return Ok(literal);
        }

        // A global function never captures, so its static closure object is
        // valid everywhere once defined.
        let name = func.name.clone().unwrap_or_else(|| "defn".into());
        self.scopes.define_global(
            name.clone(),
            IrExpr::tag(Tag::Closure, IrExpr::label(closure_label.as_str())),
        );
        let temp = self.ids.named(&name);
        Ok(IrExpr::ESeq(
            Box::new(IrStmt::Move(temp.clone(), literal)),
            Box::new(IrExpr::Temp(temp)),
        ))
    }
}

fn lower_literal(lit: &Literal) -> IrExpr {
    match lit {
        Literal::Nil => IrExpr::tag(Tag::Nil, IrExpr::Const(Const::Nil)),
        Literal::Boolean(b) => IrExpr::tag(Tag::Bool, IrExpr::Const(Const::Bool(*b))),
        Literal::Number(n) => IrExpr::tag(Tag::Int, IrExpr::Const(Const::Int(*n))),
        Literal::String(s) => IrExpr::tag(Tag::String, IrExpr::Const(Const::Str(s.clone()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{checker::Checker, expr::Captures, reader::read, sexpr::Token, sexpr::TokenKind, types::Type};

    fn closure(expr: &IrExpr) -> &IrFunc {
        let IrExpr::Tag(Tag::Closure, inner) = expr else {
            panic!("expected a tagged closure, got {}", expr);
        };
        let IrExpr::Func(func) = &**inner else {
            panic!("expected func");
        };
        func
    }

    fn lower_source(source: &str) -> Vec<IrExpr> {
        let mut checker = Checker::new();
        let typed = checker.check_program(&read(source).unwrap()).unwrap();
        let mut ids = IdGen::new();
        Lowerer::new(&mut ids).lower_program(&typed).unwrap()
    }

    #[test]
    fn unresolved_symbol_is_a_hard_error() {
        let ghost = Expr::new(
            ExprKind::Symbol("ghost".into()),
            Type::ANY,
            Captures::new(),
            Token::new(TokenKind::Symbol, "ghost", 7),
        );
        let mut ids = IdGen::new();
        let result = Lowerer::new(&mut ids).lower(&ghost);
        assert_eq!(
            result,
            Err(CompileError::UnresolvedSymbol {
                name: "ghost".to_string(),
                line: 7
            })
        );
    }

    #[test]
    fn literals_lower_to_tagged_constants() {
        let ir = lower_source("5 nil '()");
        assert_eq!(ir[0], IrExpr::tag(Tag::Int, IrExpr::Const(Const::Int(5))));
        assert_eq!(ir[1], IrExpr::tag(Tag::Nil, IrExpr::Const(Const::Nil)));
        assert_eq!(ir[2], IrExpr::tag(Tag::List, IrExpr::Const(Const::Nil)));
    }

    #[test]
    fn natives_lower_to_their_closure_label() {
        let ir = lower_source("+");
        assert_eq!(
            ir[0],
            IrExpr::tag(Tag::Closure, IrExpr::label("__plus_closure"))
        );
    }

    #[test]
    fn if_joins_branches_with_a_phi() {
        let ir = lower_source("(if true 1 2)");
        let IrExpr::ESeq(stmt, result) = &ir[0] else {
            panic!("expected eseq");
        };
        let IrStmt::Seq(stmts) = &**stmt else {
            panic!("expected seq");
        };
        assert!(matches!(stmts[0], IrStmt::CJump(IrExpr::Untag(_), _)));
        let Some(IrStmt::Phi(dest, sources)) = stmts.last() else {
            panic!("expected phi last");
        };
        assert_eq!(**result, IrExpr::Temp(dest.clone()));
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn rest_arguments_are_packed_into_one_list() {
        let ir = lower_source("(+ 1 2 3)");
        let IrExpr::Call(_, args) = &ir[0] else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 1);
        assert!(matches!(&args[0], IrExpr::Call(routine, elems)
            if **routine == IrExpr::label("__make_list") && elems.len() == 3));
    }

    #[test]
    fn captures_copy_the_outer_temp() {
        let ir = lower_source("(let [y 2] (fn [x] (+ x y)))");
        let IrExpr::ESeq(stmt, body) = &ir[0] else {
            panic!("expected eseq");
        };
        let IrStmt::Seq(stmts) = &**stmt else {
            panic!("expected seq");
        };
        let IrStmt::Move(y, _) = &stmts[0] else {
            panic!("expected move");
        };
        let func = closure(body);
        assert_eq!(func.captures.len(), 1);
        assert_eq!(func.captures[0].source, IrExpr::Temp(y.clone()));
        assert_ne!(func.captures[0].slot, *y);
    }

    #[test]
    fn function_literals_are_tagged_closures() {
        let ir = lower_source("(fn [x] x)");
        let func = closure(&ir[0]);
        assert_eq!(func.params.len(), 1);
        assert_eq!(func.body, IrExpr::Temp(func.params[0].clone()));
        assert!(ir[0].to_string().starts_with("(tag closure"));
    }

    #[test]
    fn named_functions_refer_to_their_own_closure() {
        let ir = lower_source("(fn fact [n] (if (= n 0) 1 (* n (fact (- n 1)))))");
        let func = closure(&ir[0]);
        assert!(func.captures.is_empty());
        let printed = ir[0].to_string();
        assert!(printed.contains(&format!("@{}_closure", func.label)));
    }

    #[test]
    fn defn_is_visible_to_later_forms() {
        let ir = lower_source("(defn sq [x] (* x x)) (sq 3)");
        let IrExpr::ESeq(stmt, _) = &ir[0] else {
            panic!("expected eseq");
        };
        let IrStmt::Move(_, literal) = &**stmt else {
            panic!("expected move");
        };
        let func = closure(literal);
        let IrExpr::Call(callee, _) = &ir[1] else {
            panic!("expected call");
        };
        assert_eq!(
            **callee,
            IrExpr::untag(IrExpr::tag(
                Tag::Closure,
                IrExpr::label(format!("{}_closure", func.label))
            ))
        );
    }
}
