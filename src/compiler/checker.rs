//! Static checker: untyped [`Sexpr`] trees to typed [`Expr`] trees.
//!
//! Types flow bottom-up. Function parameters start out as narrowable
//! placeholders and solidify when the body passes them to something with a
//! known signature. A callee whose type is still an open placeholder gets
//! the signature of its first call site.

use std::rc::Rc;

use crate::error::{CompileError, CompileResult};

use super::env::{ScopeId, Scopes};
use super::expr::{Call, Captures, Expr, ExprKind, Function, Literal};
use super::natives::NATIVES;
use super::sexpr::{Sexpr, SexprKind, Token};
use super::types::{BaseType, NarrowError, Type, TypeTable};

/// Largest magnitude that survives the 3-bit tag shift.
const TAGGED_MAX: i64 = (1 << 60) - 1;
const TAGGED_MIN: i64 = -(1 << 60);

pub struct Checker {
    types: TypeTable,
    scopes: Scopes<Type>,
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

fn union(into: &mut Captures, from: &Captures) {
    for name in from {
        if !into.contains(name) {
            into.insert(name.clone());
        }
    }
}

impl Checker {
    pub fn new() -> Self {
        let mut scopes = Scopes::new();
        for native in NATIVES {
            scopes.define_global(Rc::from(native.name), native.ty());
        }

        Self {
            types: TypeTable::new(),
            scopes,
        }
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn into_types(self) -> TypeTable {
        self.types
    }

    pub fn check_program(&mut self, forms: &[Sexpr]) -> CompileResult<Vec<Expr>> {
        forms.iter().map(|form| self.check(form)).collect()
    }

    pub fn check(&mut self, sexpr: &Sexpr) -> CompileResult<Expr> {
        match &sexpr.kind {
            SexprKind::List(elems) if !elems.is_empty() => self.check_form(sexpr, elems),
            _ => self.check_primary(sexpr),
        }
    }

    /// Literals, symbols and aggregates. Inside an aggregate a nested list is
    /// another aggregate, never a call.
    fn check_primary(&mut self, sexpr: &Sexpr) -> CompileResult<Expr> {
        let literal = |lit, ty| {
            Ok(Expr::new(
                ExprKind::Literal(lit),
                ty,
                Captures::new(),
                sexpr.token.clone(),
            ))
        };

        match &sexpr.kind {
            SexprKind::Nil => literal(Literal::Nil, Type::NIL),
            SexprKind::Boolean(b) => literal(Literal::Boolean(*b), Type::BOOLEAN),
            SexprKind::Number(n) => {
                if !(TAGGED_MIN..=TAGGED_MAX).contains(n) {
                    return Err(CompileError::IntegerRange {
                        value: n.to_string(),
                        line: sexpr.line(),
                    });
                }
                literal(Literal::Number(*n), Type::NUMBER)
            }
            SexprKind::String(s) => literal(Literal::String(s.clone()), Type::STRING),
            SexprKind::Symbol(name) => self.check_symbol(name, &sexpr.token),
            SexprKind::List(elems) => {
                let (children, captures) = self.check_elements(elems)?;
                Ok(Expr::new(ExprKind::List(children), Type::LIST, captures, sexpr.token.clone()))
            }
            SexprKind::Vector(elems) => {
                let (children, captures) = self.check_elements(elems)?;
                Ok(Expr::new(
                    ExprKind::Vector(children),
                    Type::VECTOR,
                    captures,
                    sexpr.token.clone(),
                ))
            }
        }
    }

    fn check_elements(&mut self, elems: &[Sexpr]) -> CompileResult<(Vec<Expr>, Captures)> {
        let mut captures = Captures::new();
        let mut children = Vec::with_capacity(elems.len());
        for elem in elems {
            let child = self.check_primary(elem)?;
            union(&mut captures, &child.captures);
            children.push(child);
        }
        Ok((children, captures))
    }

    fn check_symbol(&mut self, name: &Rc<str>, token: &Token) -> CompileResult<Expr> {
        let Some((ty, scope)) = self.scopes.lookup_with_scope(name) else {
            return Err(CompileError::UnresolvedSymbol {
                name: name.to_string(),
                line: token.line,
            });
        };

        let mut captures = Captures::new();
        if scope != ScopeId::GLOBAL {
            captures.insert(name.clone());
        }

        Ok(Expr::new(
            ExprKind::Symbol(name.clone()),
            ty.clone(),
            captures,
            token.clone(),
        ))
    }

    fn check_form(&mut self, sexpr: &Sexpr, elems: &[Sexpr]) -> CompileResult<Expr> {
        let op = &elems[0];
        let args = &elems[1..];

        match op.symbol().map(|s| &**s) {
            Some("quote") => {
                if args.len() != 1 {
                    return Err(wrong_args(op, args));
                }
                self.check_primary(&args[0])
            }
            Some("if") => self.check_if(op, args),
            Some("fn") => self.check_fn(op, args, false),
            Some("defn") => self.check_fn(op, args, true),
            Some("let") => self.check_let(op, args),
            Some("do") => self.check_do(op, args),
            Some(_) => self.check_call(op, args),
            None if op.list().is_some() => self.check_call(op, args),
            None => Err(CompileError::BadOperator { line: sexpr.line() }),
        }
    }

    fn check_if(&mut self, op: &Sexpr, args: &[Sexpr]) -> CompileResult<Expr> {
        if args.len() < 2 || args.len() > 3 {
            return Err(wrong_args(op, args));
        }

        let cond = self.check(&args[0])?;
        let then = self.check(&args[1])?;
        let else_ = match args.get(2) {
            Some(alternative) => self.check(alternative)?,
            None => self.check(&Sexpr::nil(op.line()))?,
        };

        if !self.types.satisfies(&else_.ty, &then.ty) {
            return Err(CompileError::TypeMismatch {
                context: "branches of if".to_string(),
                expected: self.types.display(&then.ty),
                actual: self.types.display(&else_.ty),
                line: op.line(),
            });
        }

        let mut captures = cond.captures.clone();
        union(&mut captures, &then.captures);
        union(&mut captures, &else_.captures);

        let ty = then.ty.clone();
        Ok(Expr::new(
            ExprKind::If(Box::new(cond), Box::new(then), Box::new(else_)),
            ty,
            captures,
            op.token.clone(),
        ))
    }

    fn check_fn(&mut self, op: &Sexpr, args: &[Sexpr], defn: bool) -> CompileResult<Expr> {
        let (name, params, body) = match args {
            [name, params, body] => (Some(name), params, body),
            [params, body] if !defn => (None, params, body),
            _ => return Err(wrong_args(op, args)),
        };

        if defn && !self.scopes.is_global() {
            return Err(CompileError::DefnNotTopLevel { line: op.line() });
        }

        let name = match name {
            Some(name) => Some(name.symbol().cloned().ok_or(CompileError::MalformedParams {
                reason: "function name must be a symbol",
                line: op.line(),
            })?),
            None => None,
        };

        let (params, rest) = parse_params(op, params)?;

        let saved = self.scopes.enter();
        let result = self.check_fn_body(&name, &params, &rest, body);
        self.scopes.exit(saved);
        let (body, param_types) = result?;

        let ty = Type::function(param_types, rest.as_ref().map(|_| Type::ANY), body.ty.clone());

        let mut captures = body.captures.clone();
        for bound in params.iter().chain(rest.iter()).chain(name.iter()) {
            captures.shift_remove(bound);
        }

        if defn {
            if let Some(name) = &name {
                self.scopes.define_global(name.clone(), ty.clone());
            }
        }

        log::trace!(
            "checked fn {}: {}",
            name.as_deref().unwrap_or("anon"),
            self.types.display(&ty)
        );

        Ok(Expr::new(
            ExprKind::Fn(Box::new(Function {
                name,
                params,
                rest,
                body,
                global: defn,
            })),
            ty,
            captures,
            op.token.clone(),
        ))
    }

    fn check_fn_body(
        &mut self,
        name: &Option<Rc<str>>,
        params: &[Rc<str>],
        rest: &Option<Rc<str>>,
        body: &Sexpr,
    ) -> CompileResult<(Expr, Vec<Type>)> {
        let mut param_types = Vec::with_capacity(params.len());
        for param in params {
            let ty = self.types.fresh(param.clone());
            self.scopes.define(param.clone(), ty.clone());
            param_types.push(ty);
        }

        if let Some(rest) = rest {
            self.scopes.define(rest.clone(), Type::LIST);
        }

        if let Some(name) = name {
            let ret = self.types.fresh(format!("{}-ret", name));
            let own = Type::function(param_types.clone(), rest.as_ref().map(|_| Type::ANY), ret);
            self.scopes.define(name.clone(), own);
        }

        let body = self.check(body)?;
        self.types.freeze(&body.ty);

        Ok((body, param_types))
    }

    fn check_let(&mut self, op: &Sexpr, args: &[Sexpr]) -> CompileResult<Expr> {
        if args.len() != 2 {
            return Err(wrong_args(op, args));
        }

        let pairs = match args[0].vector() {
            Some(pairs) if pairs.len() % 2 == 0 => pairs,
            _ => {
                return Err(CompileError::MalformedBindings {
                    reason: "expected an even number of forms in bindings vector",
                    line: op.line(),
                })
            }
        };

        let saved = self.scopes.enter();
        let result = self.check_let_body(op, pairs, &args[1]);
        self.scopes.exit(saved);
        let (bindings, body, captures) = result?;

        let ty = body.ty.clone();
        Ok(Expr::new(
            ExprKind::Let(bindings, Box::new(body)),
            ty,
            captures,
            op.token.clone(),
        ))
    }

    #[allow(clippy::type_complexity)]
    fn check_let_body(
        &mut self,
        op: &Sexpr,
        pairs: &[Sexpr],
        body: &Sexpr,
    ) -> CompileResult<(Vec<(Rc<str>, Expr)>, Expr, Captures)> {
        let mut bindings: Vec<(Rc<str>, Expr)> = Vec::with_capacity(pairs.len() / 2);
        let mut captures = Captures::new();

        for pair in pairs.chunks(2) {
            let name = pair[0].symbol().cloned().ok_or(CompileError::MalformedBindings {
                reason: "expected a symbol in bindings vector",
                line: op.line(),
            })?;

            let value = self.check(&pair[1])?;
            for captured in &value.captures {
                if !bindings.iter().any(|(bound, _)| bound == captured) {
                    captures.insert(captured.clone());
                }
            }

            self.scopes.define(name.clone(), value.ty.clone());
            bindings.push((name, value));
        }

        let body = self.check(body)?;
        for captured in &body.captures {
            if !bindings.iter().any(|(bound, _)| bound == captured) {
                captures.insert(captured.clone());
            }
        }

        Ok((bindings, body, captures))
    }

    fn check_do(&mut self, op: &Sexpr, args: &[Sexpr]) -> CompileResult<Expr> {
        if args.is_empty() {
            return self.check(&Sexpr::nil(op.line()));
        }

        let mut captures = Captures::new();
        let mut body = Vec::with_capacity(args.len());
        for arg in args {
            let expr = self.check(arg)?;
            union(&mut captures, &expr.captures);
            body.push(expr);
        }

        let ty = body[body.len() - 1].ty.clone();
        Ok(Expr::new(ExprKind::Do(body), ty, captures, op.token.clone()))
    }

    fn check_call(&mut self, op: &Sexpr, args: &[Sexpr]) -> CompileResult<Expr> {
        let callee = self.check(op)?;
        let callee_name = match op.symbol() {
            Some(name) => name.to_string(),
            None => "expression".to_string(),
        };

        let args = args
            .iter()
            .map(|arg| self.check(arg))
            .collect::<CompileResult<Vec<_>>>()?;

        let (ty, spread) = match self.types.resolve(&callee.ty) {
            Type::Function(func) => {
                let fixed = func.params.len();
                let arity_ok = match func.rest {
                    Some(_) => args.len() >= fixed,
                    None => args.len() == fixed,
                };
                if !arity_ok {
                    return Err(CompileError::ArityMismatch {
                        callee: callee_name,
                        expected: match func.rest {
                            Some(_) => format!("at least {}", fixed),
                            None => fixed.to_string(),
                        },
                        got: args.len(),
                        line: op.line(),
                    });
                }

                for (i, arg) in args.iter().enumerate() {
                    let expected = match func.params.get(i) {
                        Some(param) => param,
                        None => func.rest.as_ref().unwrap_or(&Type::ANY),
                    };
                    self.constrain_argument(arg, expected, i, &callee_name, op.line())?;
                }

                (func.ret.clone(), func.rest.as_ref().map(|_| fixed))
            }

            Type::Var(var) if self.types.is_narrowable(var) => {
                // First observed call: this call site becomes the signature.
                let ret = self.types.fresh(format!("{}-ret", callee_name));
                let params = args.iter().map(|arg| arg.ty.clone()).collect();
                let signature = Type::function(params, None, ret.clone());
                self.types
                    .narrow(&callee.ty, &signature)
                    .map_err(|err| self.narrow_error(err, &callee.ty, &signature, &callee_name, op.line()))?;
                log::trace!(
                    "inferred {} from first call site: {}",
                    callee_name,
                    self.types.display(&signature)
                );
                (ret, None)
            }

            Type::Var(_) | Type::Base(BaseType::Any) => (Type::ANY, None),

            other => {
                return Err(CompileError::NotAFunction {
                    callee: callee_name,
                    actual: self.types.display(&other),
                    line: op.line(),
                })
            }
        };

        let mut captures = callee.captures.clone();
        for arg in &args {
            union(&mut captures, &arg.captures);
        }

        Ok(Expr::new(
            ExprKind::Call(Box::new(Call {
                callee,
                args,
                spread,
            })),
            ty,
            captures,
            op.token.clone(),
        ))
    }

    /// Checks `arg` against a declared parameter type and, when the argument
    /// is still an open placeholder, narrows it in place.
    fn constrain_argument(
        &mut self,
        arg: &Expr,
        expected: &Type,
        index: usize,
        callee: &str,
        line: u32,
    ) -> CompileResult<()> {
        let context = format!("argument {} to {}", index + 1, callee);
        if !self.types.satisfies(&arg.ty, expected) {
            return Err(CompileError::TypeMismatch {
                context,
                expected: self.types.display(expected),
                actual: self.types.display(&arg.ty),
                line,
            });
        }

        if let Some(var) = self.types.open_var(&arg.ty) {
            if self.types.is_narrowable(var) {
                self.types
                    .narrow(&arg.ty, expected)
                    .map_err(|err| self.narrow_error(err, &arg.ty, expected, &context, line))?;
            }
        }

        Ok(())
    }

    fn narrow_error(
        &self,
        err: NarrowError,
        actual: &Type,
        expected: &Type,
        context: &str,
        line: u32,
    ) -> CompileError {
        let actual = self.types.display(actual);
        let expected = self.types.display(expected);
        match err {
            NarrowError::Incompatible => CompileError::TypeMismatch {
                context: context.to_string(),
                expected,
                actual,
                line,
            },
            NarrowError::Frozen => CompileError::FrozenType {
                actual,
                expected,
                line,
            },
        }
    }
}

fn wrong_args(op: &Sexpr, args: &[Sexpr]) -> CompileError {
    CompileError::WrongArgCount {
        form: op.token.lexeme.to_string(),
        got: args.len(),
        line: op.line(),
    }
}

/// Splits a parameter vector into positional names and the optional
/// `& rest` name.
fn parse_params(op: &Sexpr, params: &Sexpr) -> CompileResult<(Vec<Rc<str>>, Option<Rc<str>>)> {
    let malformed = |reason| CompileError::MalformedParams {
        reason,
        line: op.line(),
    };

    let elems = params
        .vector()
        .ok_or_else(|| malformed("expected a vector of symbols for parameters"))?;

    let mut names = Vec::with_capacity(elems.len());
    for elem in elems {
        names.push(
            elem.symbol()
                .cloned()
                .ok_or_else(|| malformed("expected a vector of symbols for parameters"))?,
        );
    }

    match names.iter().position(|name| &**name == "&") {
        None => Ok((names, None)),
        Some(at) if at + 2 == names.len() && &*names[at + 1] != "&" => {
            let rest = names.pop();
            names.pop();
            Ok((names, rest))
        }
        Some(_) => Err(malformed("& must be followed by exactly one symbol")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::reader::read;

    fn check_one(source: &str) -> (Checker, CompileResult<Expr>) {
        let mut checker = Checker::new();
        let forms = read(source).unwrap();
        let mut result = Err(CompileError::UnexpectedEof { line: 0 });
        for form in &forms {
            result = checker.check(form);
            if result.is_err() {
                break;
            }
        }
        (checker, result)
    }

    fn display(checker: &Checker, expr: &Expr) -> String {
        checker.types().display(&expr.ty)
    }

    #[test]
    fn literals_have_base_types() {
        for (source, expected) in [
            ("1", "Number"),
            ("\"s\"", "String"),
            ("true", "Boolean"),
            ("nil", "Nil"),
            ("'(1 2)", "List"),
            ("[1 2]", "Vector"),
        ] {
            let (checker, expr) = check_one(source);
            assert_eq!(display(&checker, &expr.unwrap()), expected, "{}", source);
        }
    }

    #[test]
    fn unresolved_symbol_reports_its_line() {
        let (_, result) = check_one("\n\n(+ 1 missing)");
        assert_eq!(
            result.unwrap_err(),
            CompileError::UnresolvedSymbol {
                name: "missing".to_string(),
                line: 3
            }
        );
    }

    #[test]
    fn infers_parameter_types_from_usage() {
        let (checker, expr) = check_one("(fn [x] (+ x 1))");
        assert_eq!(display(&checker, &expr.unwrap()), "(fn [Number] Number)");

        let (checker, expr) = check_one("((fn [x] (+ x 1)) 41)");
        assert_eq!(display(&checker, &expr.unwrap()), "Number");
    }

    #[test]
    fn rejects_arguments_of_the_wrong_type() {
        let (_, result) = check_one("((fn [x] (+ x 1)) \"no\")");
        assert!(matches!(result, Err(CompileError::TypeMismatch { .. })));
    }

    #[test]
    fn if_checks_false_branch_against_true_branch() {
        let (checker, expr) = check_one("(if (= 1 1) 2 3)");
        assert_eq!(display(&checker, &expr.unwrap()), "Number");

        let (_, result) = check_one("(if true 1 \"one\")");
        assert!(matches!(result, Err(CompileError::TypeMismatch { .. })));

        let (_, result) = check_one("(if true)");
        assert!(matches!(result, Err(CompileError::WrongArgCount { got: 1, .. })));
    }

    #[test]
    fn fixed_arity_is_enforced() {
        let (_, result) = check_one("((fn [a b] a) 1)");
        assert!(matches!(
            result,
            Err(CompileError::ArityMismatch { got: 1, .. })
        ));
    }

    #[test]
    fn rest_arity_accepts_any_count_past_the_prefix() {
        for source in ["((fn [a & more] a) 1)", "((fn [a & more] a) 1 2 3 4)"] {
            let (_, result) = check_one(source);
            assert!(result.is_ok(), "{}", source);
        }

        let (_, result) = check_one("((fn [a & more] a))");
        assert!(matches!(result, Err(CompileError::ArityMismatch { .. })));
    }

    #[test]
    fn rest_parameter_is_a_list() {
        let (checker, expr) = check_one("(fn [& xs] (count xs))");
        assert_eq!(display(&checker, &expr.unwrap()), "(fn [& Any] Number)");
    }

    #[test]
    fn first_call_site_fixes_an_unknown_callee() {
        let (checker, expr) = check_one("(fn [f] (f 1 \"a\"))");
        let expr = expr.unwrap();
        let func = expr.function().unwrap();
        let ExprKind::Call(call) = &func.body.kind else {
            panic!("expected a call");
        };
        let f_ty = checker.types().display(&call.callee.ty);
        assert_eq!(f_ty, "(fn [Number String] ?f-ret)");
    }

    #[test]
    fn conflicting_second_call_site_is_an_error() {
        let (_, result) = check_one("(fn [f] (do (f 1) (f \"a\")))");
        assert!(matches!(result, Err(CompileError::TypeMismatch { .. })));

        let (_, result) = check_one("(fn [f] (do (f 1) (f 1 2)))");
        assert!(matches!(result, Err(CompileError::ArityMismatch { .. })));
    }

    #[test]
    fn let_binds_sequentially() {
        let (checker, expr) = check_one("(let [a 5 b (+ a 2)] (* a b))");
        let expr = expr.unwrap();
        assert_eq!(display(&checker, &expr), "Number");
        assert!(expr.captures.is_empty());

        let (_, result) = check_one("(let [a b b 1] a)");
        assert!(matches!(result, Err(CompileError::UnresolvedSymbol { .. })));
    }

    #[test]
    fn malformed_bindings_and_params_are_rejected() {
        let (_, result) = check_one("(let [a] a)");
        assert!(matches!(result, Err(CompileError::MalformedBindings { .. })));

        let (_, result) = check_one("(let [1 2] 3)");
        assert!(matches!(result, Err(CompileError::MalformedBindings { .. })));

        let (_, result) = check_one("(fn [1] 1)");
        assert!(matches!(result, Err(CompileError::MalformedParams { .. })));

        let (_, result) = check_one("(fn [a & b c] a)");
        assert!(matches!(result, Err(CompileError::MalformedParams { .. })));
    }

    #[test]
    fn capture_set_is_exactly_the_outer_variable() {
        let (_, expr) = check_one("(let [y 2] (fn [x] (+ x y)))");
        let expr = expr.unwrap();
        let ExprKind::Let(_, body) = &expr.kind else {
            panic!("expected let");
        };
        let captured: Vec<&str> = body.captures.iter().map(|c| &**c).collect();
        assert_eq!(captured, ["y"]);
        assert!(expr.captures.is_empty());
    }

    #[test]
    fn let_values_contribute_outer_references() {
        let (_, expr) = check_one("(fn [y] (fn [] (let [a y b a] b)))");
        let expr = expr.unwrap();
        let inner = &expr.function().unwrap().body;
        let captured: Vec<&str> = inner.captures.iter().map(|c| &**c).collect();
        assert_eq!(captured, ["y"]);
    }

    #[test]
    fn recursive_function_resolves_itself_without_capturing() {
        let (checker, expr) = check_one("(fn fact [n] (if (= n 0) 1 (* n (fact (- n 1)))))");
        let expr = expr.unwrap();
        assert!(expr.captures.is_empty());
        assert_eq!(display(&checker, &expr), "(fn [Number] Number)");
    }

    #[test]
    fn defn_binds_globally_and_only_at_top_level() {
        let (checker, expr) = check_one("(defn inc [x] (+ x 1)) (inc 2)");
        assert_eq!(display(&checker, &expr.unwrap()), "Number");

        let (_, result) = check_one("(let [a 1] (defn f [] a))");
        assert!(matches!(result, Err(CompileError::DefnNotTopLevel { .. })));
    }

    #[test]
    fn globals_never_enter_capture_sets() {
        let (_, expr) = check_one("(defn sq [x] (* x x)) (fn [y] (sq y))");
        assert!(expr.unwrap().captures.is_empty());
    }

    #[test]
    fn calling_a_number_is_an_error() {
        let (_, result) = check_one("(1 2)");
        assert!(matches!(result, Err(CompileError::BadOperator { .. })));

        let (_, result) = check_one("(let [a 1] (a 2))");
        assert!(matches!(result, Err(CompileError::NotAFunction { .. })));
    }

    #[test]
    fn frozen_identity_accepts_any_argument() {
        let (checker, expr) = check_one("(+ ((fn [x] x) 5) 1)");
        assert_eq!(display(&checker, &expr.unwrap()), "Number");
    }

    #[test]
    fn integer_literals_must_fit_a_tagged_word() {
        let (_, result) = check_one("1152921504606846976");
        assert!(matches!(result, Err(CompileError::IntegerRange { .. })));
    }

    #[test]
    fn empty_do_is_nil() {
        let (checker, expr) = check_one("(do)");
        assert_eq!(display(&checker, &expr.unwrap()), "Nil");
    }
}
