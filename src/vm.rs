//! Stack-machine executor.
//!
//! A compiled program is a flat instruction list. Before execution the
//! runtime scans it once to build the label map (a jump lands on the
//! instruction after its `LABEL`), then runs a fetch loop over an
//! instruction pointer, a value stack, and a control stack of call records
//! (resume point, caller state, caller stack height, statement/expression
//! position). The I/O streams and the scoped state
//! live in the same [`Config`] the direct evaluator threads, and builtin
//! calls dispatch into the same registry, so the two engines share their
//! leaves.
//!
//! Value-stack underflow, an unresolved label, or a `LEAVE` with no pattern
//! frame are not user errors: they mean the compiler emitted inconsistent
//! code, and the machine aborts with a [`Error::VmError`].

use std::collections::HashMap;
use std::fmt;
use std::mem;

use smallvec::SmallVec;

use crate::ast::BinOp;
use crate::builtins::find_builtin;
use crate::evaluator::Config;
use crate::state::{Frame, State};
use crate::value::{self, Int, Value};
use crate::{Error, MAX_CALL_DEPTH};

/// Condition suffix of a conditional jump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    /// Jump when the popped integer is zero
    Zero,
    /// Jump when the popped integer is nonzero
    NonZero,
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cond::Zero => "z",
            Cond::NonZero => "nz",
        })
    }
}

/// Stack-machine instructions
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// Pop `y` then `x`, push `x op y` (both coerced to integers)
    Binop(BinOp),
    /// Push an integer literal
    Const(Int),
    /// Push a string literal
    Str(Vec<u8>),
    /// Pop `n` children (pushed left-to-right), push the S-expression
    Sexp(String, usize),
    /// Push the value of a name from the state
    Ld(String),
    /// Pop a value and store it under a name
    St(String),
    /// Pop the value, then `n` indices, and store through the index path
    Sta(String, usize),
    /// Jump target; a no-op when executed
    Label(String),
    /// Unconditional jump
    Jmp(String),
    /// Pop an integer and jump on the condition
    CJmp(Cond, String),
    /// Function prologue: enter a fresh frame over args and locals, then
    /// pop and bind the arguments (first popped binds the last argument)
    Begin {
        name: String,
        args: Vec<String>,
        locals: Vec<String>,
    },
    /// Function epilogue and program terminator
    End,
    /// Call a user label or, failing that, a builtin (`L` prefix stripped);
    /// for builtins the result is pushed unless `is_proc`
    Call {
        name: String,
        nargs: usize,
        is_proc: bool,
    },
    /// Return from a function; `true` means the return value is on top of
    /// the stack and stays there for the caller
    Ret(bool),
    /// Pop and discard
    Drop,
    /// Duplicate the top value
    Dup,
    /// Exchange the two top values
    Swap,
    /// Pop a value, push 1 if it is an S-expression with this tag, else 0
    Tag(String),
    /// Pop one value per name and install a pattern frame (first popped
    /// binds the last name)
    Enter(Vec<String>),
    /// Pop one pattern frame
    Leave,
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Binop(op) => write!(f, "BINOP {op}"),
            Insn::Const(n) => write!(f, "CONST {n}"),
            Insn::Str(s) => write!(f, "STRING {}", Value::Str(s.clone())),
            Insn::Sexp(tag, n) => write!(f, "SEXP {tag} {n}"),
            Insn::Ld(x) => write!(f, "LD {x}"),
            Insn::St(x) => write!(f, "ST {x}"),
            Insn::Sta(x, n) => write!(f, "STA {x} {n}"),
            Insn::Label(l) => write!(f, "LABEL {l}"),
            Insn::Jmp(l) => write!(f, "JMP {l}"),
            Insn::CJmp(cond, l) => write!(f, "CJMP {cond} {l}"),
            Insn::Begin { name, args, locals } => write!(
                f,
                "BEGIN {name} ({}) ({})",
                args.join(", "),
                locals.join(", ")
            ),
            Insn::End => f.write_str("END"),
            Insn::Call {
                name,
                nargs,
                is_proc,
            } => {
                write!(f, "CALL {name} {nargs}")?;
                if *is_proc {
                    f.write_str(" proc")?;
                }
                Ok(())
            }
            Insn::Ret(true) => f.write_str("RET value"),
            Insn::Ret(false) => f.write_str("RET"),
            Insn::Drop => f.write_str("DROP"),
            Insn::Dup => f.write_str("DUP"),
            Insn::Swap => f.write_str("SWAP"),
            Insn::Tag(t) => write!(f, "TAG {t}"),
            Insn::Enter(names) => write!(f, "ENTER ({})", names.join(", ")),
            Insn::Leave => f.write_str("LEAVE"),
        }
    }
}

/// Render a program one instruction per line, for dumps and debugging.
pub fn disassemble(insns: &[Insn]) -> String {
    let mut out = String::new();
    for insn in insns {
        out.push_str(&insn.to_string());
        out.push('\n');
    }
    out
}

/// Execute a compiled program over a finite input stream.
pub fn run(insns: &[Insn], input: Vec<i64>) -> Result<Vec<i64>, Error> {
    Machine::new(insns)?.run(Config::new(input))
}

struct Machine<'a> {
    insns: &'a [Insn],
    labels: HashMap<&'a str, usize>,
}

/// One control-stack entry: where to resume, the caller's state, the value
/// stack height after the arguments were consumed, and whether the call was
/// in statement position. The height lets a return normalize the stack, so
/// a statement call leaves nothing behind and an expression call of a
/// function that never returned a value fails instead of picking up stale
/// stack contents.
struct CallRecord {
    resume: usize,
    caller: State,
    base: usize,
    is_proc: bool,
}

impl<'a> Machine<'a> {
    /// Build the label map. Duplicate labels are a codegen bug.
    fn new(insns: &'a [Insn]) -> Result<Self, Error> {
        let mut labels = HashMap::new();
        for (i, insn) in insns.iter().enumerate() {
            if let Insn::Label(l) = insn {
                // a jump lands on the instruction after the label
                if labels.insert(l.as_str(), i + 1).is_some() {
                    return Err(Error::VmError(format!("duplicate label {l}")));
                }
            }
        }
        Ok(Machine { insns, labels })
    }

    fn target(&self, label: &str) -> Result<usize, Error> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::VmError(format!("unresolved label {label}")))
    }

    fn run(&self, mut conf: Config) -> Result<Vec<i64>, Error> {
        let mut stack: Vec<Value> = Vec::new();
        let mut control: Vec<CallRecord> = Vec::new();
        let mut ip = 0usize;

        while let Some(insn) = self.insns.get(ip) {
            ip += 1;
            match insn {
                Insn::Const(n) => stack.push(Value::Int(*n)),
                Insn::Str(s) => stack.push(Value::Str(s.clone())),
                Insn::Binop(op) => {
                    let y = pop(&mut stack)?;
                    let x = pop(&mut stack)?;
                    stack.push(Value::Int(op.apply(x.to_int()?, y.to_int()?)?));
                }
                Insn::Sexp(tag, n) => {
                    let children: Vec<Value> = pop_n(&mut stack, *n)?;
                    stack.push(Value::Sexp(tag.clone(), children));
                }
                Insn::Ld(x) => stack.push(conf.state.lookup(x)?),
                Insn::St(x) => {
                    let v = pop(&mut stack)?;
                    conf.state.update(x, v);
                }
                Insn::Sta(x, n) => {
                    let v = pop(&mut stack)?;
                    let path: SmallVec<[Value; 4]> = pop_n(&mut stack, *n)?;
                    let current = conf.state.lookup(x)?;
                    conf.state.update(x, value::update_path(&current, &path, v)?);
                }
                Insn::Label(_) => {}
                Insn::Jmp(l) => ip = self.target(l)?,
                Insn::CJmp(cond, l) => {
                    let v = pop(&mut stack)?.to_int()?;
                    let jump = match cond {
                        Cond::Zero => v == 0,
                        Cond::NonZero => v != 0,
                    };
                    if jump {
                        ip = self.target(l)?;
                    }
                }
                Insn::Begin { args, locals, .. } => {
                    conf.state = mem::take(&mut conf.state)
                        .enter(args.iter().chain(locals).cloned());
                    let values: SmallVec<[Value; 4]> = pop_n(&mut stack, args.len())?;
                    for (name, v) in args.iter().zip(values) {
                        conf.state.update(name, v);
                    }
                }
                Insn::End | Insn::Ret(_) => match control.pop() {
                    None => break, // end of the main body: halt
                    Some(record) => {
                        conf.state = State::leave(record.caller, mem::take(&mut conf.state));
                        // normalize the value stack to the calling convention:
                        // a procedure call leaves nothing, an expression call
                        // leaves exactly the returned value
                        if record.is_proc {
                            stack.truncate(record.base);
                        } else if stack.len() > record.base {
                            let result = pop(&mut stack)?;
                            stack.truncate(record.base);
                            stack.push(result);
                        } else {
                            return Err(Error::EvalError(
                                "function produced no value in expression context".to_owned(),
                            ));
                        }
                        ip = record.resume;
                    }
                },
                Insn::Call {
                    name,
                    nargs,
                    is_proc,
                } => {
                    if let Some(&entry) = self.labels.get(name.as_str()) {
                        if control.len() >= MAX_CALL_DEPTH {
                            return Err(Error::EvalError(format!(
                                "call depth limit exceeded (max: {MAX_CALL_DEPTH})"
                            )));
                        }
                        let base = stack.len().checked_sub(*nargs).ok_or_else(|| {
                            Error::VmError(format!(
                                "value stack underflow: call to {name} needs {nargs} arguments"
                            ))
                        })?;
                        control.push(CallRecord {
                            resume: ip,
                            caller: conf.state.clone(),
                            base,
                            is_proc: *is_proc,
                        });
                        ip = entry;
                    } else {
                        let builtin = find_builtin(name)
                            .or_else(|| name.strip_prefix('L').and_then(find_builtin))
                            .ok_or_else(|| Error::UnknownFunction(name.clone()))?;
                        let args: Vec<Value> = pop_n(&mut stack, *nargs)?;
                        match builtin.invoke(&mut conf, args)? {
                            Some(v) => {
                                if !is_proc {
                                    stack.push(v);
                                }
                            }
                            None => {
                                if !is_proc {
                                    return Err(Error::EvalError(format!(
                                        "builtin '{}' produced no value in expression context",
                                        builtin.name
                                    )));
                                }
                            }
                        }
                    }
                }
                Insn::Drop => {
                    pop(&mut stack)?;
                }
                Insn::Dup => {
                    let v = peek(&stack)?.clone();
                    stack.push(v);
                }
                Insn::Swap => {
                    let a = pop(&mut stack)?;
                    let b = pop(&mut stack)?;
                    stack.push(a);
                    stack.push(b);
                }
                Insn::Tag(tag) => {
                    let v = pop(&mut stack)?;
                    let hit = matches!(&v, Value::Sexp(t, _) if t == tag);
                    stack.push(Value::Int(hit as Int));
                }
                Insn::Enter(names) => {
                    let values: SmallVec<[Value; 4]> = pop_n(&mut stack, names.len())?;
                    let mut bindings = HashMap::new();
                    for (name, v) in names.iter().zip(values) {
                        bindings.insert(name.clone(), v);
                    }
                    conf.state = mem::take(&mut conf.state).push(Frame::bound(bindings));
                }
                Insn::Leave => {
                    conf.state = mem::take(&mut conf.state).drop_frame()?;
                }
            }
        }
        Ok(conf.output)
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, Error> {
    stack
        .pop()
        .ok_or_else(|| Error::VmError("value stack underflow".to_owned()))
}

fn peek(stack: &[Value]) -> Result<&Value, Error> {
    stack
        .last()
        .ok_or_else(|| Error::VmError("value stack underflow".to_owned()))
}

/// Pop `n` values and return them in source order (deepest first), which
/// undoes the left-to-right push order of arguments and children.
fn pop_n<C: FromIterator<Value>>(stack: &mut Vec<Value>, n: usize) -> Result<C, Error> {
    if stack.len() < n {
        return Err(Error::VmError(format!(
            "value stack underflow: need {n} values, have {}",
            stack.len()
        )));
    }
    let start = stack.len() - n;
    Ok(stack.drain(start..).collect())
}
