//! Compiler from the program AST to a linear stack-machine program.
//!
//! Expression lowering leaves exactly one value on the stack; statement
//! lowering leaves the stack as it found it. Control flow becomes jumps to
//! labels from a monotonic allocator (`L0`, `L1`, ...); user functions share
//! the label namespace under an `L` prefix (`Lfact`), which is how the
//! executor tells user calls from builtin calls. Call arguments are always
//! compiled left-to-right so that compiled code preserves the source
//! evaluation order; `BEGIN`/`ENTER` bind popped values back-to-front to
//! compensate.
//!
//! Pattern matching compiles in two phases per branch. The test phase walks
//! the pattern's S-expression nodes in preorder and re-extracts each
//! subvalue from the retained scrutinee by its index path, so every failure
//! jump lands with exactly the scrutinee on the stack no matter how deep
//! the test was. The bind phase extracts each bound variable's value by
//! path, tucks it under the scrutinee with `SWAP`, and finishes with
//! `ENTER`, which installs the pattern frame that the branch body's
//! trailing `LEAVE` pops again.

use crate::ast::{BinOp, Definition, Expr, Pattern, Program, Stmt};
use crate::value::Int;
use crate::vm::{Cond, Insn};
use crate::Error;

/// Lower a program: compiled main body, `END`, then one block per
/// definition (`LABEL Lname; BEGIN; body; END`).
pub fn compile(program: &Program) -> Result<Vec<Insn>, Error> {
    program.check()?;
    let mut compiler = Compiler::default();
    compiler.compile_stmt(&program.main);
    compiler.emit(Insn::End);
    for def in &program.definitions {
        compiler.compile_def(def);
    }
    Ok(compiler.insns)
}

#[derive(Default)]
struct Compiler {
    insns: Vec<Insn>,
    next_label: usize,
}

impl Compiler {
    fn fresh_label(&mut self) -> String {
        let label = format!("L{}", self.next_label);
        self.next_label += 1;
        label
    }

    fn emit(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    fn compile_def(&mut self, def: &Definition) {
        self.emit(Insn::Label(format!("L{}", def.name)));
        self.emit(Insn::Begin {
            name: def.name.clone(),
            args: def.args.clone(),
            locals: def.locals.clone(),
        });
        self.compile_stmt(&def.body);
        self.emit(Insn::End);
    }

    fn compile_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Const(n) => self.emit(Insn::Const(*n)),
            Expr::Str(s) => self.emit(Insn::Str(s.clone())),
            Expr::Var(x) => self.emit(Insn::Ld(x.clone())),
            Expr::Array(items) => {
                for item in items {
                    self.compile_expr(item);
                }
                self.emit(Insn::Call {
                    name: ".array".to_owned(),
                    nargs: items.len(),
                    is_proc: false,
                });
            }
            Expr::Sexp(tag, items) => {
                for item in items {
                    self.compile_expr(item);
                }
                self.emit(Insn::Sexp(tag.clone(), items.len()));
            }
            Expr::Binop(op, l, r) => {
                self.compile_expr(l);
                self.compile_expr(r);
                self.emit(Insn::Binop(*op));
            }
            Expr::Elem(container, index) => {
                self.compile_expr(container);
                self.compile_expr(index);
                self.emit(Insn::Call {
                    name: ".elem".to_owned(),
                    nargs: 2,
                    is_proc: false,
                });
            }
            Expr::Length(e) => {
                self.compile_expr(e);
                self.emit(Insn::Call {
                    name: ".length".to_owned(),
                    nargs: 1,
                    is_proc: false,
                });
            }
            Expr::Call(name, args) => self.compile_call(name, args, false),
        }
    }

    fn compile_call(&mut self, name: &str, args: &[Expr], is_proc: bool) {
        for arg in args {
            self.compile_expr(arg);
        }
        self.emit(Insn::Call {
            name: format!("L{name}"),
            nargs: args.len(),
            is_proc,
        });
    }

    fn compile_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Skip => {}
            Stmt::Seq(s1, s2) => {
                self.compile_stmt(s1);
                self.compile_stmt(s2);
            }
            Stmt::Assign(x, indices, e) => {
                if indices.is_empty() {
                    self.compile_expr(e);
                    self.emit(Insn::St(x.clone()));
                } else {
                    for index in indices {
                        self.compile_expr(index);
                    }
                    self.compile_expr(e);
                    self.emit(Insn::Sta(x.clone(), indices.len()));
                }
            }
            Stmt::If(cond, then, els) => {
                let lelse = self.fresh_label();
                let lfi = self.fresh_label();
                self.compile_expr(cond);
                self.emit(Insn::CJmp(Cond::Zero, lelse.clone()));
                self.compile_stmt(then);
                self.emit(Insn::Jmp(lfi.clone()));
                self.emit(Insn::Label(lelse));
                self.compile_stmt(els);
                self.emit(Insn::Label(lfi));
            }
            Stmt::While(cond, body) => {
                let lcheck = self.fresh_label();
                let lloop = self.fresh_label();
                self.emit(Insn::Jmp(lcheck.clone()));
                self.emit(Insn::Label(lloop.clone()));
                self.compile_stmt(body);
                self.emit(Insn::Label(lcheck));
                self.compile_expr(cond);
                self.emit(Insn::CJmp(Cond::NonZero, lloop));
            }
            Stmt::Repeat(cond, body) => {
                let lloop = self.fresh_label();
                self.emit(Insn::Label(lloop.clone()));
                self.compile_stmt(body);
                self.compile_expr(cond);
                self.emit(Insn::CJmp(Cond::Zero, lloop));
            }
            Stmt::Call(name, args) => self.compile_call(name, args, true),
            Stmt::Return(None) => self.emit(Insn::Ret(false)),
            Stmt::Return(Some(e)) => {
                self.compile_expr(e);
                self.emit(Insn::Ret(true));
            }
            Stmt::Case(scrutinee, branches) => self.compile_case(scrutinee, branches),
            Stmt::Leave => self.emit(Insn::Leave),
        }
    }

    fn compile_case(&mut self, scrutinee: &Expr, branches: &[(Pattern, Stmt)]) {
        self.compile_expr(scrutinee);
        let lend = self.fresh_label();
        for (pattern, body) in branches {
            let lfail = self.fresh_label();
            self.compile_pattern_test(pattern, &mut Vec::new(), &lfail);
            self.compile_bindings(pattern);
            self.compile_stmt(body);
            self.emit(Insn::Leave);
            self.emit(Insn::Jmp(lend.clone()));
            self.emit(Insn::Label(lfail));
        }
        // every branch failed: discard the scrutinee and fall through
        self.emit(Insn::Drop);
        self.emit(Insn::Label(lend));
    }

    /// Test phase. The scrutinee is on top of the stack and stays there on
    /// both outcomes; failure jumps to `lfail`.
    fn compile_pattern_test(&mut self, pattern: &Pattern, path: &mut Vec<Int>, lfail: &str) {
        if let Pattern::Sexp(tag, children) = pattern {
            self.emit(Insn::Dup);
            self.emit_path(path);
            self.emit(Insn::Tag(tag.clone()));
            self.emit(Insn::CJmp(Cond::Zero, lfail.to_owned()));
            self.emit(Insn::Dup);
            self.emit_path(path);
            self.emit(Insn::Call {
                name: ".length".to_owned(),
                nargs: 1,
                is_proc: false,
            });
            self.emit(Insn::Const(children.len() as Int));
            self.emit(Insn::Binop(BinOp::Eq));
            self.emit(Insn::CJmp(Cond::Zero, lfail.to_owned()));
            // children only after tag and arity held, so the extraction
            // below cannot go out of range
            for (i, child) in children.iter().enumerate() {
                path.push(i as Int);
                self.compile_pattern_test(child, path, lfail);
                path.pop();
            }
        }
    }

    /// Bind phase. Consumes the scrutinee, leaves the bound values in
    /// traversal order (last variable on top), and installs the frame.
    fn compile_bindings(&mut self, pattern: &Pattern) {
        let mut paths = Vec::new();
        var_paths(pattern, &mut Vec::new(), &mut paths);
        for path in &paths {
            self.emit(Insn::Dup);
            self.emit_path(path);
            self.emit(Insn::Swap);
        }
        self.emit(Insn::Drop);
        self.emit(Insn::Enter(pattern.vars()));
    }

    /// Navigate a copy of the scrutinee down an index path with `.elem`.
    fn emit_path(&mut self, path: &[Int]) {
        for index in path {
            self.emit(Insn::Const(*index));
            self.emit(Insn::Call {
                name: ".elem".to_owned(),
                nargs: 2,
                is_proc: false,
            });
        }
    }
}

/// Index paths of the pattern's bound variables, in traversal order.
fn var_paths(pattern: &Pattern, prefix: &mut Vec<Int>, out: &mut Vec<Vec<Int>>) {
    match pattern {
        Pattern::Wildcard => {}
        Pattern::Ident(_) => out.push(prefix.clone()),
        Pattern::Sexp(_, children) => {
            for (i, child) in children.iter().enumerate() {
                prefix.push(i as Int);
                var_paths(child, prefix, out);
                prefix.pop();
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::builtins::find_builtin;
    use std::collections::HashSet;

    fn simple_program(main: Stmt) -> Program {
        Program {
            definitions: vec![],
            main,
        }
    }

    /// Every label appears exactly once and every jump/call target resolves
    /// to a label or a builtin.
    fn assert_labels_consistent(insns: &[Insn]) {
        let mut labels = HashSet::new();
        for insn in insns {
            if let Insn::Label(l) = insn {
                assert!(labels.insert(l.clone()), "duplicate label {l}");
            }
        }
        for insn in insns {
            match insn {
                Insn::Jmp(l) | Insn::CJmp(_, l) => {
                    assert!(labels.contains(l), "unresolved jump target {l}");
                }
                Insn::Call { name, .. } => {
                    let is_builtin = find_builtin(name)
                        .or_else(|| name.strip_prefix('L').and_then(find_builtin))
                        .is_some();
                    assert!(
                        labels.contains(name) || is_builtin,
                        "unresolved call target {name}"
                    );
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_expression_lowering_shapes() {
        // write((1 + 2) * x) compiles operands before the operator
        let program = simple_program(Stmt::call(
            "write",
            vec![Expr::bin(
                BinOp::Mul,
                Expr::bin(BinOp::Add, Expr::Const(1), Expr::Const(2)),
                Expr::var("x"),
            )],
        ));
        let insns = compile(&program).unwrap();
        assert_eq!(
            insns,
            vec![
                Insn::Const(1),
                Insn::Const(2),
                Insn::Binop(BinOp::Add),
                Insn::Ld("x".to_owned()),
                Insn::Binop(BinOp::Mul),
                Insn::Call {
                    name: "Lwrite".to_owned(),
                    nargs: 1,
                    is_proc: true
                },
                Insn::End,
            ]
        );
    }

    #[test]
    fn test_while_layout() {
        // while c do skip od: check label first, loop label, body, check, cjmp
        let program = simple_program(Stmt::while_loop(Expr::var("c"), Stmt::Skip));
        let insns = compile(&program).unwrap();
        assert_eq!(
            insns,
            vec![
                Insn::Jmp("L0".to_owned()),
                Insn::Label("L1".to_owned()),
                Insn::Label("L0".to_owned()),
                Insn::Ld("c".to_owned()),
                Insn::CJmp(Cond::NonZero, "L1".to_owned()),
                Insn::End,
            ]
        );
        assert_labels_consistent(&insns);
    }

    #[test]
    fn test_repeat_layout() {
        let program = simple_program(Stmt::repeat_until(Stmt::Skip, Expr::var("c")));
        let insns = compile(&program).unwrap();
        assert_eq!(
            insns,
            vec![
                Insn::Label("L0".to_owned()),
                Insn::Ld("c".to_owned()),
                Insn::CJmp(Cond::Zero, "L0".to_owned()),
                Insn::End,
            ]
        );
    }

    #[test]
    fn test_assignment_lowering() {
        let plain = simple_program(Stmt::assign("x", Expr::Const(5)));
        assert_eq!(
            compile(&plain).unwrap(),
            vec![Insn::Const(5), Insn::St("x".to_owned()), Insn::End]
        );

        let indexed = simple_program(Stmt::assign_at(
            "a",
            vec![Expr::Const(1), Expr::Const(0)],
            Expr::Const(9),
        ));
        assert_eq!(
            compile(&indexed).unwrap(),
            vec![
                Insn::Const(1),
                Insn::Const(0),
                Insn::Const(9),
                Insn::Sta("a".to_owned(), 2),
                Insn::End,
            ]
        );
    }

    #[test]
    fn test_definition_blocks_after_main() {
        let program = Program {
            definitions: vec![Definition {
                name: "f".to_owned(),
                args: vec!["n".to_owned()],
                locals: vec!["t".to_owned()],
                body: Stmt::Return(Some(Expr::var("n"))),
            }],
            main: Stmt::call("write", vec![Expr::call("f", vec![Expr::Const(1)])]),
        };
        let insns = compile(&program).unwrap();

        // main comes first and ends with END before any definition block
        let end_pos = insns.iter().position(|i| *i == Insn::End).unwrap();
        let label_pos = insns
            .iter()
            .position(|i| *i == Insn::Label("Lf".to_owned()))
            .unwrap();
        assert!(end_pos < label_pos);
        assert!(matches!(insns[label_pos + 1], Insn::Begin { .. }));
        assert_eq!(insns.last(), Some(&Insn::End));
        assert_labels_consistent(&insns);
    }

    #[test]
    fn test_case_lowering_is_label_consistent_and_balanced() {
        let program = simple_program(Stmt::Case(
            Expr::var("x"),
            vec![
                (
                    Pattern::Sexp(
                        "Pair".to_owned(),
                        vec![
                            Pattern::Ident("a".to_owned()),
                            Pattern::Sexp(
                                "Pair".to_owned(),
                                vec![Pattern::Wildcard, Pattern::Ident("b".to_owned())],
                            ),
                        ],
                    ),
                    Stmt::call("write", vec![Expr::var("a")]),
                ),
                (Pattern::Wildcard, Stmt::Skip),
            ],
        ));
        let insns = compile(&program).unwrap();
        assert_labels_consistent(&insns);

        // each branch pushes one frame and pops it exactly once
        let enters = insns.iter().filter(|i| matches!(i, Insn::Enter(_))).count();
        let leaves = insns.iter().filter(|i| matches!(i, Insn::Leave)).count();
        assert_eq!(enters, 2);
        assert_eq!(leaves, 2);

        // the nested pattern tests go through .elem and TAG
        assert!(insns
            .iter()
            .any(|i| matches!(i, Insn::Tag(t) if t == "Pair")));
        assert!(insns.iter().any(|i| matches!(
            i,
            Insn::Call { name, .. } if name == ".elem"
        )));
    }

    #[test]
    fn test_label_allocation_is_shared_and_unique_across_constructs() {
        // nested ifs, loops, and cases in one program with a function
        let program = Program {
            definitions: vec![Definition {
                name: "g".to_owned(),
                args: vec![],
                locals: vec![],
                body: Stmt::if_else(
                    Expr::Const(1),
                    Stmt::Return(Some(Expr::Const(1))),
                    Stmt::Return(Some(Expr::Const(2))),
                ),
            }],
            main: Stmt::block(vec![
                Stmt::while_loop(
                    Expr::var("c"),
                    Stmt::if_else(Expr::var("d"), Stmt::Skip, Stmt::Skip),
                ),
                Stmt::Case(
                    Expr::var("x"),
                    vec![(Pattern::Wildcard, Stmt::Skip)],
                ),
                Stmt::repeat_until(Stmt::Skip, Expr::Const(1)),
            ]),
        };
        assert_labels_consistent(&compile(&program).unwrap());
    }

    #[test]
    fn test_compile_rejects_invalid_programs() {
        let shadow = Program {
            definitions: vec![Definition {
                name: "read".to_owned(),
                args: vec![],
                locals: vec![],
                body: Stmt::Skip,
            }],
            main: Stmt::Skip,
        };
        assert!(compile(&shadow).is_err());
    }
}
