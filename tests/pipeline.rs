use std::collections::HashSet;

use lisc::compiler::{
    expr::ExprKind,
    ir::{CBlock, CExpr, CStmt, Const, Tag, Value},
    optimize::optimize_program,
};
use lisc::{compile_to_asm, CompileError, Compiler};

fn asm_lines(source: &str) -> Vec<String> {
    compile_to_asm(source)
        .unwrap()
        .lines()
        .map(|line| line.trim().to_string())
        .collect()
}

fn canonical(source: &str, optimize: bool) -> Vec<CBlock> {
    Compiler::new()
        .with_optimization(optimize)
        .compile(source)
        .unwrap()
        .canonical
}

/// Checks that every temp is assigned once and read only after its
/// definition, with function bodies seeing nothing but their own params,
/// capture slots and locals.
fn check_def_before_use(block: &CBlock, defined: &mut HashSet<u32>, assigned: &mut HashSet<u32>) {
    fn read(value: &Value, defined: &HashSet<u32>) {
        if let Value::Temp(temp) = value {
            assert!(defined.contains(&temp.id), "{} read before definition", temp);
        }
    }

    fn read_expr(expr: &CExpr, defined: &HashSet<u32>, assigned: &mut HashSet<u32>) {
        match expr {
            CExpr::Value(v) | CExpr::Tag(_, v) | CExpr::Untag(v) => read(v, defined),
            CExpr::Call(func, args) => {
                read(func, defined);
                args.iter().for_each(|arg| read(arg, defined));
            }
            CExpr::Func(func) => {
                let mut inner = HashSet::new();
                for capture in &func.captures {
                    read(&capture.source, defined);
                    inner.insert(capture.slot.id);
                }
                inner.extend(func.params.iter().map(|param| param.id));
                check_def_before_use(&func.body, &mut inner, assigned);
            }
        }
    }

    for stmt in &block.stmts {
        match stmt {
            CStmt::Move(dest, src) => {
                read_expr(src, defined, assigned);
                assert!(assigned.insert(dest.id), "{} assigned twice", dest);
                defined.insert(dest.id);
            }
            CStmt::CJump(cond, _) => read(cond, defined),
            CStmt::Phi(dest, sources) => {
                for (_, temp) in sources {
                    assert!(defined.contains(&temp.id));
                }
                assert!(assigned.insert(dest.id));
                defined.insert(dest.id);
            }
            CStmt::Jump(_) | CStmt::Label(_) => {}
        }
    }
    read_expr(&block.value, defined, assigned);
}

const PROGRAM: &str = r#"
(defn sq [x] (* x x))
(let [a 5 b (+ a 2)]
  (do (print (sq a) "s")
      ((fn [y & more] (if (= y 1) (count more) (+ y a))) b 1 2)
      [1 (list a b)]))
"#;

#[test]
fn inferred_function_applied_to_an_integer() {
    let (typed, types) = Compiler::new().check("((fn [x] (+ x 1)) 41)").unwrap();
    assert_eq!(types.display(&typed[0].ty), "Number");

    let ExprKind::Call(call) = &typed[0].kind else {
        panic!("expected a call");
    };
    assert_eq!(types.display(&call.callee.ty), "(fn [Number] Number)");
}

#[test]
fn conditional_branches_are_numbers() {
    let (typed, types) = Compiler::new().check("(if (= 1 1) 2 3)").unwrap();
    let ExprKind::If(_, then, else_) = &typed[0].kind else {
        panic!("expected if");
    };
    assert_eq!(types.display(&then.ty), "Number");
    assert_eq!(types.display(&else_.ty), "Number");

    let lines = asm_lines("(if (= 1 1) 2 3)");
    let je = lines.iter().position(|l| l.starts_with("je true_")).unwrap();
    let label = lines[je].trim_start_matches("je ").to_string();
    let target = lines.iter().position(|l| *l == format!("{}:", label)).unwrap();
    assert_eq!(lines[target + 1], "mov rax, 18");
}

#[test]
fn let_pushes_two_slots_and_frees_two_words() {
    let lines = asm_lines("(let [a 5 b (+ a 2)] (* a b))");
    let exit = lines.iter().position(|l| l == "call __debexit").unwrap();
    assert_eq!(lines[exit - 1], "add rsp, 16");

    let start = lines.iter().position(|l| l == "call __alloc_init").unwrap();
    assert_eq!(lines[start + 1..start + 3], ["mov rax, 42", "push rax"]);
}

#[test]
fn closure_reads_captures_through_rdi() {
    let source = "(let [y 2] (fn [x] (+ x y)))";
    let (typed, _) = Compiler::new().check(source).unwrap();
    let ExprKind::Let(_, body) = &typed[0].kind else {
        panic!("expected let");
    };
    assert_eq!(body.captures.iter().map(|c| &**c).collect::<Vec<_>>(), ["y"]);

    let lines = asm_lines(source);
    assert!(lines
        .windows(3)
        .any(|w| w == ["mov rax, rdi", "and rax, -8", "mov rax, [rax+8]"]));
}

#[test]
fn recursive_function_is_not_its_own_capture() {
    let source = "(fn fact [n] (if (= n 0) 1 (* n (fact (- n 1)))))";
    let (typed, types) = Compiler::new().check(source).unwrap();
    assert!(typed[0].captures.is_empty());
    assert_eq!(types.display(&typed[0].ty), "(fn [Number] Number)");

    let lines = asm_lines(source);
    let closure = lines
        .iter()
        .find(|l| l.starts_with("fn") && l.ends_with("_fact_closure:"))
        .unwrap()
        .trim_end_matches(':')
        .to_string();
    let loads = lines
        .iter()
        .filter(|l| **l == format!("mov rax, {}", closure))
        .count();
    // Once for the recursive call, once for the value of the fn expression.
    assert_eq!(loads, 2);
}

#[test]
fn arity_is_checked() {
    let err = Compiler::new().check("(defn f [a b] a) (f 1)").unwrap_err();
    assert!(matches!(err, CompileError::ArityMismatch { got: 1, .. }));

    let err = Compiler::new().check("(< 1)").unwrap_err();
    assert!(matches!(err, CompileError::ArityMismatch { .. }));

    assert!(Compiler::new().check("(defn g [a & r] a) (g 1) (g 1 2 3)").is_ok());
    assert!(Compiler::new().check("(+)").is_ok());
}

#[test]
fn conflicting_second_call_site_is_rejected() {
    let err = Compiler::new()
        .check("(defn twice [f] (do (f 1) (f true)))")
        .unwrap_err();
    assert!(matches!(err, CompileError::TypeMismatch { .. }));
    assert_eq!(err.line(), 1);
}

#[test]
fn unresolved_symbols_are_errors() {
    let err = Compiler::new().compile("(let [a 1]\n  (+ a b))").unwrap_err();
    assert_eq!(
        err,
        CompileError::UnresolvedSymbol {
            name: "b".to_string(),
            line: 2
        }
    );
    assert_eq!(err.to_string(), "[line 2] unable to resolve symbol b");
}

#[test]
fn canonical_form_defines_before_use() {
    for optimize in [false, true] {
        let blocks = canonical(PROGRAM, optimize);
        let mut defined = HashSet::new();
        let mut assigned = HashSet::new();
        for block in &blocks {
            check_def_before_use(block, &mut defined, &mut assigned);
        }
    }
}

#[test]
fn evaluation_order_follows_the_source() {
    let blocks = canonical(
        r#"(list (print "a") (print "b") (let [p (print "c") q (print "d")] q))"#,
        true,
    );

    let strings: Vec<String> = blocks[0]
        .stmts
        .iter()
        .filter_map(|stmt| match stmt {
            CStmt::Move(_, CExpr::Tag(Tag::String, Value::Const(Const::Str(s)))) => {
                Some(s.to_string())
            }
            _ => None,
        })
        .collect();
    assert_eq!(strings, ["a", "b", "c", "d"]);

    let bound: Vec<String> = blocks[0]
        .stmts
        .iter()
        .filter_map(|stmt| match stmt {
            CStmt::Move(dest, _) => dest.hint.as_ref().map(|h| h.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(bound, ["p", "q"]);
}

#[test]
fn callee_is_evaluated_after_its_arguments() {
    let source = r#"((do (print "callee") (fn [x] x)) (do (print "arg") 1))"#;

    let strings: Vec<String> = canonical(source, true)[0]
        .stmts
        .iter()
        .filter_map(|stmt| match stmt {
            CStmt::Move(_, CExpr::Tag(Tag::String, Value::Const(Const::Str(s)))) => {
                Some(s.to_string())
            }
            _ => None,
        })
        .collect();
    assert_eq!(strings, ["arg", "callee"]);

    let lines = asm_lines(source);
    let arg = lines.iter().position(|l| l == "db 97, 114, 103").unwrap();
    let callee = lines
        .iter()
        .position(|l| l == "db 99, 97, 108, 108, 101, 101")
        .unwrap();
    assert!(arg < callee);
}

#[test]
fn closure_instances_do_not_share_captures() {
    let source = "(defn make-adder [n] (fn [x] (+ x n)))
                  (let [a (make-adder 1) b (make-adder 10)] (a 5))";
    let lines = asm_lines(source);

    let alloc = lines.iter().position(|l| l == "call __allocate").unwrap();
    assert_eq!(lines[alloc - 1], "mov rax, 16");
    // The snapshot goes into the fresh block, never into static data.
    assert!(lines.contains(&"mov [r11+8], rax".to_string()));
    assert!(!lines.iter().any(|l| l.starts_with("mov [anon_")));
    assert!(!lines.iter().any(|l| l.starts_with("anon_") && l.ends_with("_closure:")));
}

#[test]
fn rest_list_spills_past_the_register_arguments() {
    let source = "((fn [a b c d e f & r] r) 1 2 3 4 5 6 7 8)";
    let (typed, _) = Compiler::new().check(source).unwrap();
    let ExprKind::Call(call) = &typed[0].kind else {
        panic!("expected a call");
    };
    assert_eq!(call.spread, Some(6));

    let lines = asm_lines(source);
    let start = lines.iter().position(|l| l == "call __alloc_init").unwrap();
    assert_eq!(lines[start + 1], "sub rsp, 16");
    // Sixth positional argument and the packed rest list sit in the
    // reserved area, in argument order.
    assert!(lines
        .windows(2)
        .any(|w| w == ["mov rax, 50", "mov [rbp-16], rax"]));
    assert!(lines
        .windows(3)
        .any(|w| w == ["call __make_list", "add rsp, 16", "mov [rbp-8], rax"]));
    assert!(lines.contains(&"lea rsi, [rbp-72]".to_string()));

    // Inside the callee the rest list is parameter 6, above the saved rbp.
    assert!(lines.contains(&"mov rax, [rbp+24]".to_string()));
    let exit = lines.iter().position(|l| l == "call __debexit").unwrap();
    assert_eq!(lines[exit - 1], "add rsp, 16");
}

#[test]
fn copy_propagation_is_idempotent() {
    let unoptimized = canonical(PROGRAM, false);
    let once = optimize_program(unoptimized.clone());
    let twice = optimize_program(once.clone());
    assert_eq!(once, twice);
    assert_ne!(once, unoptimized);

    let copies = |blocks: &[CBlock]| {
        blocks
            .iter()
            .flat_map(|block| block.stmts.iter())
            .filter(|stmt| {
                matches!(stmt, CStmt::Move(dest, CExpr::Value(Value::Temp(_))) if dest.is_synthetic())
            })
            .count()
    };
    assert!(copies(&unoptimized) > 0);
    assert_eq!(copies(&once), 0);
}

#[test]
fn program_compiles_to_assembly() {
    let compilation = Compiler::new().compile(PROGRAM).unwrap();
    assert_eq!(compilation.forms.len(), 2);
    assert!(compilation.forms[0].to_string().starts_with("(defn sq [x]"));
    assert_eq!(compilation.typed.len(), 2);
    assert!(compilation.asm.contains("call __make_vector"));
    assert!(compilation.asm.contains("section .data"));

    let ir = compilation.ir[0].to_string();
    assert!(ir.contains("func"));
}
