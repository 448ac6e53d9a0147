//! Abstract syntax handed over by the external parser: expressions,
//! statements, patterns, function definitions, and whole programs. The
//! shapes here are the contract between the parser and both execution
//! engines; nothing in this module evaluates anything, with the one
//! exception of [`BinOp::apply`], which fixes the arithmetic shared by the
//! direct evaluator and the stack machine.

use crate::builtins::find_builtin;
use crate::value::Int;
use crate::Error;

/// Binary operators, lowest to highest source precedence: `!!`, `&&`,
/// comparisons, additive, multiplicative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    /// C-style conjunction over integers; never short-circuits
    And,
    /// C-style disjunction over integers (written `!!`); never short-circuits
    Or,
}

impl BinOp {
    /// Apply the operator to two integers. `+ - *` wrap (two's complement),
    /// `/` truncates toward zero, `%` keeps the sign of the dividend,
    /// comparisons and logical operators yield 0/1.
    pub fn apply(self, x: Int, y: Int) -> Result<Int, Error> {
        match self {
            BinOp::Add => Ok(x.wrapping_add(y)),
            BinOp::Sub => Ok(x.wrapping_sub(y)),
            BinOp::Mul => Ok(x.wrapping_mul(y)),
            BinOp::Div => {
                if y == 0 {
                    Err(Error::EvalError("division by zero".to_owned()))
                } else {
                    Ok(x.wrapping_div(y))
                }
            }
            BinOp::Rem => {
                if y == 0 {
                    Err(Error::EvalError("remainder by zero".to_owned()))
                } else {
                    Ok(x.wrapping_rem(y))
                }
            }
            BinOp::Lt => Ok((x < y) as Int),
            BinOp::Le => Ok((x <= y) as Int),
            BinOp::Gt => Ok((x > y) as Int),
            BinOp::Ge => Ok((x >= y) as Int),
            BinOp::Eq => Ok((x == y) as Int),
            BinOp::Ne => Ok((x != y) as Int),
            BinOp::And => Ok((x != 0 && y != 0) as Int),
            BinOp::Or => Ok((x != 0 || y != 0) as Int),
        }
    }

    /// The source spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "!!",
        }
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl std::str::FromStr for BinOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let op = match s {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "%" => BinOp::Rem,
            "<" => BinOp::Lt,
            "<=" => BinOp::Le,
            ">" => BinOp::Gt,
            ">=" => BinOp::Ge,
            "==" => BinOp::Eq,
            "!=" => BinOp::Ne,
            "&&" => BinOp::And,
            "!!" => BinOp::Or,
            other => return Err(Error::ParseError(format!("unknown operator '{other}'"))),
        };
        Ok(op)
    }
}

/// Expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal
    Const(Int),
    /// String literal (bytes)
    Str(Vec<u8>),
    /// Array literal; children evaluate left-to-right
    Array(Vec<Expr>),
    /// S-expression literal; children evaluate left-to-right
    Sexp(String, Vec<Expr>),
    /// Variable reference
    Var(String),
    /// Binary operation; both operands always evaluate
    Binop(BinOp, Box<Expr>, Box<Expr>),
    /// Element access `container[index]`
    Elem(Box<Expr>, Box<Expr>),
    /// Postfix `.length`
    Length(Box<Expr>),
    /// Function or builtin call in expression position; must produce a value
    Call(String, Vec<Expr>),
}

impl Expr {
    pub fn bin(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::Binop(op, Box::new(l), Box::new(r))
    }

    pub fn elem(container: Expr, index: Expr) -> Expr {
        Expr::Elem(Box::new(container), Box::new(index))
    }

    pub fn length(e: Expr) -> Expr {
        Expr::Length(Box::new(e))
    }

    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    pub fn string(s: impl AsRef<[u8]>) -> Expr {
        Expr::Str(s.as_ref().to_vec())
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call(name.into(), args)
    }

    pub fn sexp(tag: impl Into<String>, items: Vec<Expr>) -> Expr {
        Expr::Sexp(tag.into(), items)
    }
}

/// Statement AST
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `x := e` (empty index list) or `x[i]...[k] := e`
    Assign(String, Vec<Expr>, Expr),
    Seq(Box<Stmt>, Box<Stmt>),
    Skip,
    If(Expr, Box<Stmt>, Box<Stmt>),
    While(Expr, Box<Stmt>),
    /// Post-test loop: runs the body, then repeats while the condition
    /// evaluates to zero
    Repeat(Expr, Box<Stmt>),
    Case(Expr, Vec<(Pattern, Stmt)>),
    Return(Option<Expr>),
    /// Call in statement position; any result is discarded
    Call(String, Vec<Expr>),
    /// Pops one pattern-match frame. Emitted by case handling, never by the
    /// parser.
    Leave,
}

impl Stmt {
    pub fn seq(s1: Stmt, s2: Stmt) -> Stmt {
        Stmt::Seq(Box::new(s1), Box::new(s2))
    }

    /// Fold a list of statements into a right-nested sequence.
    pub fn block(stmts: Vec<Stmt>) -> Stmt {
        stmts
            .into_iter()
            .rev()
            .reduce(|acc, s| Stmt::seq(s, acc))
            .unwrap_or(Stmt::Skip)
    }

    pub fn assign(name: impl Into<String>, e: Expr) -> Stmt {
        Stmt::Assign(name.into(), vec![], e)
    }

    pub fn assign_at(name: impl Into<String>, indices: Vec<Expr>, e: Expr) -> Stmt {
        Stmt::Assign(name.into(), indices, e)
    }

    pub fn if_else(cond: Expr, then: Stmt, els: Stmt) -> Stmt {
        Stmt::If(cond, Box::new(then), Box::new(els))
    }

    pub fn while_loop(cond: Expr, body: Stmt) -> Stmt {
        Stmt::While(cond, Box::new(body))
    }

    pub fn repeat_until(body: Stmt, cond: Expr) -> Stmt {
        Stmt::Repeat(cond, Box::new(body))
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Stmt {
        Stmt::Call(name.into(), args)
    }
}

/// Pattern AST for `case` branches
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Wildcard,
    Ident(String),
    Sexp(String, Vec<Pattern>),
}

impl Pattern {
    /// Names bound by the pattern, collected by left-to-right traversal.
    /// Duplicates are kept; the later binding wins when the frame is built.
    pub fn vars(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<String>) {
        match self {
            Pattern::Wildcard => {}
            Pattern::Ident(x) => out.push(x.clone()),
            Pattern::Sexp(_, ps) => {
                for p in ps {
                    p.collect_vars(out);
                }
            }
        }
    }
}

/// A function definition. `args` and `locals` are disjoint; their union is
/// the scope of the call frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub name: String,
    pub args: Vec<String>,
    pub locals: Vec<String>,
    pub body: Stmt,
}

/// A whole program: function definitions plus the main body.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub definitions: Vec<Definition>,
    pub main: Stmt,
}

impl Program {
    /// Look up a definition by name.
    pub fn def(&self, name: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Validate the structural invariants both engines rely on: definition
    /// names are unique, do not shadow builtins, and argument/local name
    /// sets are disjoint.
    pub fn check(&self) -> Result<(), Error> {
        let mut seen = std::collections::HashSet::new();
        for def in &self.definitions {
            if !seen.insert(def.name.as_str()) {
                return Err(Error::EvalError(format!(
                    "duplicate definition of '{}'",
                    def.name
                )));
            }
            if find_builtin(&def.name).is_some() {
                return Err(Error::EvalError(format!(
                    "definition '{}' shadows a builtin",
                    def.name
                )));
            }
            for arg in &def.args {
                if def.locals.contains(arg) {
                    return Err(Error::EvalError(format!(
                        "'{}' is both an argument and a local of '{}'",
                        arg, def.name
                    )));
                }
            }
        }
        Ok(())
    }
}
