//! Built-in operations registry.
//!
//! This module provides the closed set of primitive operations shared by
//! both execution engines: the direct AST evaluator dispatches here from
//! call expressions, and the stack machine dispatches here from `CALL`
//! instructions whose target is not a user label. Builtin names are
//! reserved; user programs cannot define functions with these names.
//!
//! Every operation receives the threaded [`Config`] (for the I/O streams)
//! and its already-evaluated argument values, and produces an optional
//! result: `write` deliberately produces nothing, which makes it an error
//! to use in expression position.
//!
//! ## Operations
//!
//! | Name | Arity | Effect / result |
//! |------|-------|-----------------|
//! | `read` | 0 | pops the input front as an integer |
//! | `write` | 1 | appends `to_int(arg)` to the output; no result |
//! | `.elem` | 2 | string byte, array element, or S-expression child |
//! | `.length` | 1 | element count (arrays, S-expressions) or byte length |
//! | `.array` | any | builds an array from all arguments |
//! | `isArray` | 1 | 1 if the argument is an array, else 0 |
//! | `isString` | 1 | 1 if the argument is a string, else 0 |
//!
//! The dotted names are not expressible as identifiers in the source
//! grammar; the compiler emits calls to them for element access, `.length`,
//! and array literals.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::evaluator::Config;
use crate::value::{Int, Value};
use crate::Error;

/// Expected number of arguments for a builtin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    /// Check an actual argument count against this arity.
    pub fn validate(self, got: usize) -> Result<(), Error> {
        match self {
            Arity::Exact(expected) if got != expected => Err(Error::arity_error(expected, got)),
            Arity::AtLeast(expected) if got < expected => Err(Error::arity_error(expected, got)),
            _ => Ok(()),
        }
    }
}

/// Canonical builtin signature: threaded config plus evaluated arguments.
pub type BuiltinFn = fn(&mut Config, Vec<Value>) -> Result<Option<Value>, Error>;

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct Builtin {
    /// The reserved name of this operation
    pub name: &'static str,
    /// Expected number of arguments, validated before dispatch
    pub arity: Arity,
    run: BuiltinFn,
}

impl Builtin {
    /// Validate arity and run the operation.
    pub fn invoke(&self, conf: &mut Config, args: Vec<Value>) -> Result<Option<Value>, Error> {
        self.arity.validate(args.len()).map_err(|_| {
            Error::arity_error_named(
                self.name,
                match self.arity {
                    Arity::Exact(n) | Arity::AtLeast(n) => n,
                    Arity::Any => 0,
                },
                args.len(),
            )
        })?;
        (self.run)(conf, args)
    }
}

//
// Builtin implementations
//

fn builtin_read(conf: &mut Config, _args: Vec<Value>) -> Result<Option<Value>, Error> {
    match conf.input.pop_front() {
        Some(n) => Ok(Some(Value::Int(n))),
        None => Err(Error::InputExhausted),
    }
}

fn builtin_write(conf: &mut Config, args: Vec<Value>) -> Result<Option<Value>, Error> {
    match args.as_slice() {
        [v] => {
            let n = v.to_int()?;
            conf.output.push(n);
            Ok(None)
        }
        _ => Err(Error::arity_error_named("write", 1, args.len())),
    }
}

fn builtin_elem(_conf: &mut Config, args: Vec<Value>) -> Result<Option<Value>, Error> {
    match args.as_slice() {
        [container, index] => Ok(Some(container.elem(index.to_int()?)?)),
        _ => Err(Error::arity_error_named(".elem", 2, args.len())),
    }
}

fn builtin_length(_conf: &mut Config, args: Vec<Value>) -> Result<Option<Value>, Error> {
    match args.as_slice() {
        [v] => Ok(Some(Value::Int(v.length()?))),
        _ => Err(Error::arity_error_named(".length", 1, args.len())),
    }
}

fn builtin_array(_conf: &mut Config, args: Vec<Value>) -> Result<Option<Value>, Error> {
    Ok(Some(Value::Array(args)))
}

fn builtin_is_array(_conf: &mut Config, args: Vec<Value>) -> Result<Option<Value>, Error> {
    match args.as_slice() {
        [v] => Ok(Some(Value::Int(v.is_array() as Int))),
        _ => Err(Error::arity_error_named("isArray", 1, args.len())),
    }
}

fn builtin_is_string(_conf: &mut Config, args: Vec<Value>) -> Result<Option<Value>, Error> {
    match args.as_slice() {
        [v] => Ok(Some(Value::Int(v.is_string() as Int))),
        _ => Err(Error::arity_error_named("isString", 1, args.len())),
    }
}

/// Global registry of all built-in operations, initialized once.
static BUILTINS: LazyLock<Vec<Builtin>> = LazyLock::new(|| {
    vec![
        Builtin {
            name: "read",
            arity: Arity::Exact(0),
            run: builtin_read,
        },
        Builtin {
            name: "write",
            arity: Arity::Exact(1),
            run: builtin_write,
        },
        Builtin {
            name: ".elem",
            arity: Arity::Exact(2),
            run: builtin_elem,
        },
        Builtin {
            name: ".length",
            arity: Arity::Exact(1),
            run: builtin_length,
        },
        Builtin {
            name: ".array",
            arity: Arity::Any,
            run: builtin_array,
        },
        Builtin {
            name: "isArray",
            arity: Arity::Exact(1),
            run: builtin_is_array,
        },
        Builtin {
            name: "isString",
            arity: Arity::Exact(1),
            run: builtin_is_string,
        },
    ]
});

/// Lazy static map from name to Builtin (private - use find_builtin)
static BUILTIN_INDEX: LazyLock<HashMap<&'static str, &'static Builtin>> = LazyLock::new(|| {
    let ops: &'static [Builtin] = BUILTINS.as_slice();
    ops.iter().map(|op| (op.name, op)).collect()
});

/// Find a builtin operation by its reserved name.
pub fn find_builtin(name: &str) -> Option<&'static Builtin> {
    BUILTIN_INDEX.get(name).copied()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::value::{sexp, val};

    fn conf_with_input(input: Vec<i64>) -> Config {
        Config::new(input)
    }

    fn run(name: &str, conf: &mut Config, args: Vec<Value>) -> Result<Option<Value>, Error> {
        find_builtin(name).unwrap().invoke(conf, args)
    }

    #[test]
    fn test_registry_is_closed_and_indexed() {
        for name in ["read", "write", ".elem", ".length", ".array", "isArray", "isString"] {
            assert!(find_builtin(name).is_some(), "missing builtin {name}");
        }
        assert!(find_builtin("cons").is_none());
        assert!(find_builtin("Lwrite").is_none(), "prefix stripping is the vm's job");
    }

    #[test]
    fn test_read_consumes_front() {
        let mut conf = conf_with_input(vec![7, 8]);
        assert_eq!(run("read", &mut conf, vec![]).unwrap(), Some(val(7)));
        assert_eq!(run("read", &mut conf, vec![]).unwrap(), Some(val(8)));
        assert_eq!(
            run("read", &mut conf, vec![]),
            Err(Error::InputExhausted)
        );
    }

    #[test]
    fn test_write_appends_and_produces_nothing() {
        let mut conf = conf_with_input(vec![]);
        assert_eq!(run("write", &mut conf, vec![val(3)]).unwrap(), None);
        assert_eq!(run("write", &mut conf, vec![val(4)]).unwrap(), None);
        assert_eq!(conf.output, vec![3, 4]);
        assert!(run("write", &mut conf, vec![val("x")]).is_err());
    }

    #[test]
    fn test_elem_length_array_predicates() {
        let mut conf = conf_with_input(vec![]);
        assert_eq!(
            run(".elem", &mut conf, vec![val([10, 20]), val(1)]).unwrap(),
            Some(val(20))
        );
        assert_eq!(
            run(".elem", &mut conf, vec![val("ab"), val(0)]).unwrap(),
            Some(val(97))
        );
        assert_eq!(
            run(".elem", &mut conf, vec![sexp("P", vec![val(5)]), val(0)]).unwrap(),
            Some(val(5))
        );
        assert_eq!(
            run(".length", &mut conf, vec![sexp("P", vec![val(5), val(6)])]).unwrap(),
            Some(val(2))
        );
        assert_eq!(
            run(".array", &mut conf, vec![val(1), val(2)]).unwrap(),
            Some(val([1, 2]))
        );
        assert_eq!(run(".array", &mut conf, vec![]).unwrap(), Some(Value::Array(vec![])));
        assert_eq!(
            run("isArray", &mut conf, vec![val([1])]).unwrap(),
            Some(val(1))
        );
        assert_eq!(run("isArray", &mut conf, vec![val(1)]).unwrap(), Some(val(0)));
        assert_eq!(
            run("isString", &mut conf, vec![val("s")]).unwrap(),
            Some(val(1))
        );
        assert_eq!(run("isString", &mut conf, vec![val([1])]).unwrap(), Some(val(0)));
    }

    #[test]
    fn test_arity_validated_before_dispatch() {
        let mut conf = conf_with_input(vec![1]);
        assert!(matches!(
            run("read", &mut conf, vec![val(1)]),
            Err(Error::ArityError { .. })
        ));
        assert_eq!(conf.input.len(), 1, "failed dispatch must not consume input");
        assert!(matches!(
            run(".elem", &mut conf, vec![val(1)]),
            Err(Error::ArityError { .. })
        ));
    }
}
