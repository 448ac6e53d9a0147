//! impstack - dual-engine interpreter for a small imperative language
//!
//! This crate implements the runtime core of a toolchain for a dynamically
//! typed procedural language with first-class arrays, byte strings, and
//! tagged S-expressions. The same program AST can be executed two ways:
//!
//! - **Direct evaluation** ([`evaluator::run`]): a recursive expression
//!   evaluator plus a statement machine that threads its continuation as a
//!   second statement value, so sequencing, loops, early return, and
//!   pattern-matching `case` need no explicit control stack.
//! - **Compiled execution** ([`compiler::compile`] + [`vm::run`]): the AST is
//!   lowered to a linear stack-machine program which a small executor runs
//!   over a value stack and a control stack.
//!
//! The two paths are observationally equivalent: for every well-formed
//! program and input stream they produce identical output streams.
//!
//! ```rust
//! use impstack::ast::{BinOp, Expr, Program, Stmt};
//! use impstack::{compiler, evaluator, vm};
//!
//! // write((2 + 3) * 4)
//! let program = Program {
//!     definitions: vec![],
//!     main: Stmt::call(
//!         "write",
//!         vec![Expr::bin(
//!             BinOp::Mul,
//!             Expr::bin(BinOp::Add, Expr::Const(2), Expr::Const(3)),
//!             Expr::Const(4),
//!         )],
//!     ),
//! };
//!
//! let direct = evaluator::run(&program, vec![]).unwrap();
//! let compiled = vm::run(&compiler::compile(&program).unwrap(), vec![]).unwrap();
//! assert_eq!(direct, vec![20]);
//! assert_eq!(direct, compiled);
//! ```
//!
//! Concrete-syntax parsing is an external collaborator; the hand-off format
//! is a JSON rendering of the AST accepted by the [`json`] module (cargo
//! feature `json`, enabled by default).
//!
//! ## Modules
//!
//! - `value`: runtime value universe and composite update primitives
//! - `state`: scoped name->value environment with a global tail
//! - `builtins`: fixed registry of primitive operations
//! - `ast`: expression/statement/pattern AST handed over by the parser
//! - `evaluator`: direct AST execution
//! - `compiler`: AST -> stack-machine lowering
//! - `vm`: stack-machine executor
//! - `json`: JSON AST interchange (feature `json`)

use std::fmt;

/// Maximum depth of the JSON AST interchange format, to keep the loader's
/// recursion bounded on hostile inputs.
pub const MAX_PARSE_DEPTH: usize = 64;

/// Maximum dynamic call depth. Both engines enforce the same limit (the
/// direct evaluator on its call counter, the stack machine on its control
/// stack), so they fail the same programs.
pub const MAX_CALL_DEPTH: usize = 1024;

/// Error types for the interpreter. All errors are fatal: propagation is a
/// non-local abort with a human-readable message, and source programs have
/// no way to catch them.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Reference to a name not bound in any reachable frame
    Unbound(String),
    /// A value was coerced to a variant it does not inhabit
    TypeError(String),
    /// An index outside container bounds, or an update path through a
    /// value that cannot be indexed
    IndexError(String),
    /// `read` on an exhausted input queue
    InputExhausted,
    /// Call to a name that is neither a definition nor a builtin
    UnknownFunction(String),
    /// A function or builtin called with the wrong number of arguments
    ArityError {
        expected: usize,
        got: usize,
        /// Optional callee name for context
        name: Option<String>,
    },
    /// Evaluation refused: depth limit, division by zero, valueless call in
    /// expression context
    EvalError(String),
    /// Malformed JSON AST interchange document
    ParseError(String),
    /// Internal stack-machine inconsistency (value-stack underflow, LEAVE
    /// without a pattern frame, unresolved label). These signal codegen
    /// bugs, not user errors.
    VmError(String),
}

impl Error {
    /// Create an ArityError without callee context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            name: None,
        }
    }

    /// Create an ArityError naming the callee
    pub fn arity_error_named(name: impl Into<String>, expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            name: Some(name.into()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Unbound(name) => write!(f, "Unbound name: {name}"),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::IndexError(msg) => write!(f, "Index error: {msg}"),
            Error::InputExhausted => write!(f, "Input error: read past the end of the input"),
            Error::UnknownFunction(name) => write!(f, "Unknown function: {name}"),
            Error::ArityError {
                expected,
                got,
                name,
            } => match name {
                Some(name) => write!(
                    f,
                    "ArityError: {name} expected {expected} arguments, got {got}"
                ),
                None => write!(f, "ArityError: expected {expected} arguments, got {got}"),
            },
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::ParseError(msg) => write!(f, "ParseError: {msg}"),
            Error::VmError(msg) => write!(f, "VM inconsistency (compiler bug): {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod evaluator;
pub mod state;
pub mod value;
pub mod vm;

#[cfg(feature = "json")]
pub mod json;
