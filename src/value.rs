//! This module defines the runtime value universe of the language and the
//! primitives that read and rebuild composite values. The main enum,
//! [`Value`], covers all four data types: machine integers, immutable byte
//! strings, arrays, and tagged S-expressions. Values are value-typed: every
//! "update" produces a new Value, and no variant carries aliased mutable
//! state, so [`update_array`], [`update_string`], and [`update_path`] all
//! return fresh composites.
//!
//! Ergonomic helper functions such as [`val`] and [`sexp`] are provided for
//! convenient construction in both code and tests, together with `From`
//! conversions for common Rust types. Coercions back out of a Value
//! (`to_int`, `as_bytes`, `tag`) are partial and failing: asking a variant
//! for a shape it does not inhabit is a hard [`Error`].

use crate::Error;

/// Type alias for machine integers in the language. Arithmetic wraps
/// (two's complement); division truncates toward zero.
pub type Int = i64;

/// A runtime value. All indexing over composites is zero-based.
#[derive(Clone, PartialEq, Eq)]
pub enum Value {
    /// Machine-range integer
    Int(Int),
    /// Immutable byte string; element access yields the byte as `Int`
    Str(Vec<u8>),
    /// Ordered sequence of values of any variant
    Array(Vec<Value>),
    /// Tagged tuple; the tag is a short identifier
    Sexp(String, Vec<Value>),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Str(s) => write!(f, "Str({})", display_bytes(s)),
            Value::Array(items) => {
                write!(f, "Array(")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, ")")
            }
            Value::Sexp(tag, items) => {
                write!(f, "Sexp({tag}")?;
                for v in items {
                    write!(f, ", {v:?}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{}", display_bytes(s)),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Sexp(tag, items) => {
                write!(f, "`{tag}")?;
                if !items.is_empty() {
                    write!(f, " (")?;
                    for (i, v) in items.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{v}")?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
        }
    }
}

/// Render a byte string as a double-quoted source literal, escaping
/// non-printable bytes as `\xNN`.
fn display_bytes(s: &[u8]) -> String {
    let mut out = String::from("\"");
    for &b in s {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push('"');
    out
}

// From trait implementations for Value - enables .into() conversion

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into_bytes())
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Int(n as Int)
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(Int); // Special case - no casting
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::Array(arr.into_iter().map(|x| x.into()).collect())
    }
}

/// Helper function for creating Values - accepts any convertible type
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating S-expression values
pub fn sexp(tag: impl Into<String>, items: Vec<Value>) -> Value {
    Value::Sexp(tag.into(), items)
}

impl Value {
    /// Coerce to an integer; fails on every other variant.
    pub fn to_int(&self) -> Result<Int, Error> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(Error::TypeError(format!("expected an integer, got {other}"))),
        }
    }

    /// Coerce to a byte string; fails on every other variant.
    pub fn as_bytes(&self) -> Result<&[u8], Error> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(Error::TypeError(format!("expected a string, got {other}"))),
        }
    }

    /// The tag of an S-expression; fails on every other variant.
    pub fn tag(&self) -> Result<&str, Error> {
        match self {
            Value::Sexp(tag, _) => Ok(tag),
            other => Err(Error::TypeError(format!(
                "expected an S-expression, got {other}"
            ))),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    /// Element access: string byte as `Int`, array element, or S-expression
    /// child. Out-of-range indices and integer receivers fail.
    pub fn elem(&self, index: Int) -> Result<Value, Error> {
        match self {
            Value::Str(s) => {
                let i = check_index(index, s.len(), "string")?;
                Ok(Value::Int(s[i] as Int))
            }
            Value::Array(items) => {
                let i = check_index(index, items.len(), "array")?;
                Ok(items[i].clone())
            }
            Value::Sexp(_, items) => {
                let i = check_index(index, items.len(), "S-expression")?;
                Ok(items[i].clone())
            }
            Value::Int(_) => Err(Error::TypeError(format!(
                "cannot index into the integer {self}"
            ))),
        }
    }

    /// Element count of an array or S-expression, byte length of a string.
    pub fn length(&self) -> Result<Int, Error> {
        match self {
            Value::Str(s) => Ok(s.len() as Int),
            Value::Array(items) | Value::Sexp(_, items) => Ok(items.len() as Int),
            Value::Int(_) => Err(Error::TypeError(format!(
                "the integer {self} has no length"
            ))),
        }
    }
}

/// Validate a zero-based index against a container length.
fn check_index(index: Int, len: usize, what: &str) -> Result<usize, Error> {
    if (0..len as Int).contains(&index) {
        Ok(index as usize)
    } else {
        Err(Error::IndexError(format!(
            "index {index} out of range for {what} of length {len}"
        )))
    }
}

/// New string identical to `s` except byte `i` replaced by the low byte of
/// `byte`.
pub fn update_string(s: &[u8], index: Int, byte: Int) -> Result<Vec<u8>, Error> {
    let i = check_index(index, s.len(), "string")?;
    let mut out = s.to_vec();
    out[i] = byte as u8;
    Ok(out)
}

/// New array identical to `a` except position `i` replaced by `v`.
pub fn update_array(a: &[Value], index: Int, v: Value) -> Result<Vec<Value>, Error> {
    let i = check_index(index, a.len(), "array")?;
    let mut out = a.to_vec();
    out[i] = v;
    Ok(out)
}

/// Substitute `v` at index path `path` inside `current`, copying the spine.
/// The path recurses through arrays only; a string is legal at the final
/// step, where `v` is coerced to an integer and installed as a byte.
pub fn update_path(current: &Value, path: &[Value], v: Value) -> Result<Value, Error> {
    let Some((index, rest)) = path.split_first() else {
        return Ok(v);
    };
    let index = index.to_int()?;
    match current {
        Value::Array(items) => {
            let i = check_index(index, items.len(), "array")?;
            let inner = update_path(&items[i], rest, v)?;
            Ok(Value::Array(update_array(items, index, inner)?))
        }
        Value::Str(s) if rest.is_empty() => {
            Ok(Value::Str(update_string(s, index, v.to_int()?)?))
        }
        Value::Str(_) => Err(Error::IndexError(
            "cannot index through a string byte".to_owned(),
        )),
        other => Err(Error::IndexError(format!(
            "cannot assign into {other} by index"
        ))),
    }
}
