//! Direct AST execution engine.
//!
//! Expressions evaluate by plain recursion, strictly left-to-right, with all
//! side effects (I/O, state writes through calls) accumulating in the
//! threaded [`Config`]. Statements run on a different plan: the executor
//! carries its continuation ("what to do after this statement") as a
//! second statement value, and every transition either rewrites the current
//! `(stmt, k)` pair or returns. Because all transitions are tail steps, the
//! executor is a loop: deep `Seq` spines and long-running loops consume no
//! native stack, and an early `return` simply discards the continuation
//! instead of unwinding. Native recursion only tracks dynamic function
//! nesting, bounded by [`MAX_CALL_DEPTH`].

use std::collections::{HashMap, VecDeque};
use std::mem;

use crate::ast::{Definition, Expr, Pattern, Program, Stmt};
use crate::builtins::find_builtin;
use crate::state::{Frame, State};
use crate::value::{self, Value};
use crate::{Error, MAX_CALL_DEPTH};

/// The configuration threaded through every evaluation step: the scoped
/// state, the untouched suffix of the input stream, the append-only output
/// log, and the value recorded by the most recent `return`.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub state: State,
    pub input: VecDeque<i64>,
    pub output: Vec<i64>,
    pub last: Option<Value>,
}

impl Config {
    pub fn new(input: Vec<i64>) -> Self {
        Config {
            state: State::default(),
            input: input.into(),
            output: Vec::new(),
            last: None,
        }
    }
}

/// Run a program over a finite input stream and return its output stream.
pub fn run(program: &Program, input: Vec<i64>) -> Result<Vec<i64>, Error> {
    program.check()?;
    let interp = Interpreter::new(program);
    let mut conf = Config::new(input);
    interp.exec(&mut conf, program.main.clone(), Stmt::Skip, 0)?;
    Ok(conf.output)
}

/// Structural pattern match. Returns the frame extended with the pattern's
/// bindings, or `None` on any shape mismatch. The returned frame's domain
/// is exactly `pattern.vars()`; duplicate names keep the rightmost value.
pub fn match_pattern(
    pattern: &Pattern,
    value: &Value,
    mut frame: HashMap<String, Value>,
) -> Option<HashMap<String, Value>> {
    match (pattern, value) {
        (Pattern::Wildcard, _) => Some(frame),
        (Pattern::Ident(x), v) => {
            frame.insert(x.clone(), v.clone());
            Some(frame)
        }
        (Pattern::Sexp(tag, ps), Value::Sexp(vtag, vs))
            if tag == vtag && ps.len() == vs.len() =>
        {
            ps.iter()
                .zip(vs)
                .try_fold(frame, |frame, (p, v)| match_pattern(p, v, frame))
        }
        _ => None,
    }
}

/// The AST interpreter: the definition table plus the evaluation methods.
struct Interpreter<'p> {
    defs: HashMap<&'p str, &'p Definition>,
}

impl<'p> Interpreter<'p> {
    fn new(program: &'p Program) -> Self {
        Interpreter {
            defs: program
                .definitions
                .iter()
                .map(|d| (d.name.as_str(), d))
                .collect(),
        }
    }

    /// Evaluate an expression to a value. `depth` is the dynamic call depth.
    fn eval_expr(&self, conf: &mut Config, expr: &Expr, depth: usize) -> Result<Value, Error> {
        match expr {
            Expr::Const(n) => Ok(Value::Int(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Var(x) => conf.state.lookup(x),
            Expr::Array(items) => Ok(Value::Array(self.eval_args(conf, items, depth)?)),
            Expr::Sexp(tag, items) => Ok(Value::Sexp(
                tag.clone(),
                self.eval_args(conf, items, depth)?,
            )),
            Expr::Binop(op, l, r) => {
                let l = self.eval_expr(conf, l, depth)?;
                let r = self.eval_expr(conf, r, depth)?;
                Ok(Value::Int(op.apply(l.to_int()?, r.to_int()?)?))
            }
            Expr::Elem(container, index) => {
                let container = self.eval_expr(conf, container, depth)?;
                let index = self.eval_expr(conf, index, depth)?;
                container.elem(index.to_int()?)
            }
            Expr::Length(e) => {
                let v = self.eval_expr(conf, e, depth)?;
                Ok(Value::Int(v.length()?))
            }
            Expr::Call(name, args) => {
                let values = self.eval_args(conf, args, depth)?;
                match self.call(conf, name, values, depth)? {
                    Some(v) => Ok(v),
                    None => Err(Error::EvalError(format!(
                        "call to '{name}' produced no value in expression context"
                    ))),
                }
            }
        }
    }

    /// Evaluate argument expressions left-to-right.
    fn eval_args(
        &self,
        conf: &mut Config,
        args: &[Expr],
        depth: usize,
    ) -> Result<Vec<Value>, Error> {
        args.iter()
            .map(|arg| self.eval_expr(conf, arg, depth))
            .collect()
    }

    /// Dispatch a call to a user definition or a builtin with evaluated
    /// arguments. A user call enters a fresh frame over args and locals
    /// directly atop the global frame, runs the body, and restores the
    /// caller's local chain; its result is whatever `return` recorded.
    fn call(
        &self,
        conf: &mut Config,
        name: &str,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Option<Value>, Error> {
        if let Some(def) = self.defs.get(name) {
            if depth >= MAX_CALL_DEPTH {
                return Err(Error::EvalError(format!(
                    "call depth limit exceeded (max: {MAX_CALL_DEPTH})"
                )));
            }
            if def.args.len() != args.len() {
                return Err(Error::arity_error_named(name, def.args.len(), args.len()));
            }
            let caller = conf.state.clone();
            conf.state = mem::take(&mut conf.state)
                .enter(def.args.iter().chain(&def.locals).cloned());
            for (param, value) in def.args.iter().zip(args) {
                conf.state.update(param, value);
            }
            conf.last = None;
            self.exec(conf, def.body.clone(), Stmt::Skip, depth + 1)?;
            conf.state = State::leave(caller, mem::take(&mut conf.state));
            Ok(conf.last.take())
        } else if let Some(builtin) = find_builtin(name) {
            builtin.invoke(conf, args)
        } else {
            Err(Error::UnknownFunction(name.to_owned()))
        }
    }

    /// Execute `stmt` with continuation `k`. Both are owned: transitions
    /// rewrite the pair in place and loop.
    fn exec(&self, conf: &mut Config, mut stmt: Stmt, mut k: Stmt, depth: usize) -> Result<(), Error> {
        loop {
            match stmt {
                Stmt::Skip => {
                    if matches!(k, Stmt::Skip) {
                        return Ok(());
                    }
                    stmt = k;
                    k = Stmt::Skip;
                }
                Stmt::Seq(s1, s2) => {
                    k = join(*s2, k);
                    stmt = *s1;
                }
                Stmt::Assign(x, indices, e) => {
                    if indices.is_empty() {
                        let v = self.eval_expr(conf, &e, depth)?;
                        conf.state.update(&x, v);
                    } else {
                        let path = self.eval_args(conf, &indices, depth)?;
                        let v = self.eval_expr(conf, &e, depth)?;
                        let current = conf.state.lookup(&x)?;
                        let updated = value::update_path(&current, &path, v)?;
                        conf.state.update(&x, updated);
                    }
                    stmt = Stmt::Skip;
                }
                Stmt::If(cond, then, els) => {
                    let taken = self.eval_expr(conf, &cond, depth)?.to_int()? != 0;
                    stmt = if taken { *then } else { *els };
                }
                Stmt::While(cond, body) => {
                    if self.eval_expr(conf, &cond, depth)?.to_int()? != 0 {
                        let iteration = (*body).clone();
                        k = join(Stmt::While(cond, body), k);
                        stmt = iteration;
                    } else {
                        stmt = Stmt::Skip;
                    }
                }
                Stmt::Repeat(cond, body) => {
                    // run the body once, then loop while the condition is zero
                    let again = Stmt::While(
                        Expr::bin(crate::ast::BinOp::Eq, cond, Expr::Const(0)),
                        body.clone(),
                    );
                    stmt = Stmt::Seq(body, Box::new(again));
                }
                Stmt::Call(name, args) => {
                    let values = self.eval_args(conf, &args, depth)?;
                    self.call(conf, &name, values, depth)?;
                    stmt = Stmt::Skip;
                }
                Stmt::Return(e) => {
                    conf.last = match e {
                        Some(e) => Some(self.eval_expr(conf, &e, depth)?),
                        None => None,
                    };
                    // the continuation is deliberately discarded
                    return Ok(());
                }
                Stmt::Case(scrutinee, branches) => {
                    let value = self.eval_expr(conf, &scrutinee, depth)?;
                    let mut taken = None;
                    for (pattern, body) in branches {
                        if let Some(bindings) = match_pattern(&pattern, &value, HashMap::new()) {
                            taken = Some((bindings, body));
                            break;
                        }
                    }
                    match taken {
                        Some((bindings, body)) => {
                            conf.state = mem::take(&mut conf.state).push(Frame::bound(bindings));
                            stmt = Stmt::seq(body, Stmt::Leave);
                        }
                        // no branch matched: a silent no-op
                        None => stmt = Stmt::Skip,
                    }
                }
                Stmt::Leave => {
                    conf.state = mem::take(&mut conf.state).drop_frame()?;
                    stmt = Stmt::Skip;
                }
            }
        }
    }
}

/// The continuation join `s ⋄ k`: sequencing that keeps `Skip` a unit.
fn join(s: Stmt, k: Stmt) -> Stmt {
    if matches!(k, Stmt::Skip) {
        s
    } else {
        Stmt::seq(s, k)
    }
}
