//! JSON AST interchange.
//!
//! The concrete-syntax parser is an external collaborator; its contract
//! with this crate is a JSON rendering of the program AST, which this
//! module decodes into [`Program`] values. Decoding is depth-limited by
//! [`MAX_PARSE_DEPTH`] so hostile documents cannot overflow the native
//! stack, and every shape error reports the offending fragment.
//!
//! ## Encoding
//!
//! A program is an object: `{"definitions": [...], "main": <stmt>}`, and a
//! definition is `{"name": s, "args": [s...], "locals": [s...], "body":
//! <stmt>}`. Expressions, statements, and patterns are `[kind, ...]`
//! arrays, with one shorthand: a bare JSON number is an integer literal.
//!
//! Expressions:
//! `["const", n]`, `["string", s]`, `["array", e...]`,
//! `["sexp", tag, e...]`, `["var", x]`, `["binop", op, l, r]`,
//! `["elem", c, i]`, `["length", e]`, `["call", f, [e...]]`
//!
//! Statements:
//! `["assign", x, [e...], e]`, `["seq", s...]`, `["skip"]`,
//! `["if", c, t, e?]`, `["while", c, s]`, `["repeat", s, c]`,
//! `["case", e, [[p, s]...]]`, `["return", e?]`, `["call", f, [e...]]`
//!
//! Patterns: `["wildcard"]`, `["ident", x]`, `["sexp", tag, p...]`
//!
//! `repeat` takes the body first, mirroring `repeat s until e` in the
//! source; an `if` without an else branch gets `skip`. `leave` is not part
//! of the interchange grammar: the parser never produces it.

use serde_json::Value as Json;

use crate::ast::{Definition, Expr, Pattern, Program, Stmt};
use crate::{Error, MAX_PARSE_DEPTH};

/// Decode a program from JSON text.
pub fn parse_program(input: &str) -> Result<Program, Error> {
    let json: Json = serde_json::from_str(input)
        .map_err(|e| Error::ParseError(format!("invalid JSON: {e}")))?;
    program_from_json(&json)
}

/// Decode a program from an already-parsed JSON tree.
pub fn program_from_json(json: &Json) -> Result<Program, Error> {
    let Json::Object(fields) = json else {
        return Err(shape_error("a program object", json));
    };
    let definitions = match fields.get("definitions") {
        None => Vec::new(),
        Some(Json::Array(items)) => items
            .iter()
            .map(definition_from_json)
            .collect::<Result<_, _>>()?,
        Some(other) => return Err(shape_error("an array of definitions", other)),
    };
    let main = match fields.get("main") {
        Some(json) => stmt_from_json(json, 0)?,
        None => return Err(Error::ParseError("program has no \"main\" body".to_owned())),
    };
    let program = Program { definitions, main };
    program.check()?;
    Ok(program)
}

fn definition_from_json(json: &Json) -> Result<Definition, Error> {
    let Json::Object(fields) = json else {
        return Err(shape_error("a definition object", json));
    };
    let name = match fields.get("name") {
        Some(Json::String(s)) => s.clone(),
        _ => return Err(shape_error("a definition with a \"name\" string", json)),
    };
    let body = match fields.get("body") {
        Some(json) => stmt_from_json(json, 0)?,
        None => {
            return Err(Error::ParseError(format!(
                "definition '{name}' has no body"
            )));
        }
    };
    Ok(Definition {
        name,
        args: name_list(fields.get("args"), "args")?,
        locals: name_list(fields.get("locals"), "locals")?,
        body,
    })
}

fn name_list(json: Option<&Json>, what: &str) -> Result<Vec<String>, Error> {
    match json {
        None => Ok(Vec::new()),
        Some(Json::Array(items)) => items
            .iter()
            .map(|item| match item {
                Json::String(s) => Ok(s.clone()),
                other => Err(shape_error("a name string", other)),
            })
            .collect(),
        Some(other) => Err(shape_error(&format!("an array of {what} names"), other)),
    }
}

fn expr_from_json(json: &Json, depth: usize) -> Result<Expr, Error> {
    check_depth(depth)?;
    // bare numbers are integer literals, the one shorthand in the format
    if let Json::Number(n) = json {
        let n = n
            .as_i64()
            .ok_or_else(|| shape_error("a machine-range integer", json))?;
        return Ok(Expr::Const(n));
    }
    let (kind, rest) = node(json)?;
    match (kind, rest) {
        ("const", [n @ Json::Number(value)]) => value
            .as_i64()
            .map(Expr::Const)
            .ok_or_else(|| shape_error("a machine-range integer", n)),
        ("string", [Json::String(s)]) => Ok(Expr::Str(s.as_bytes().to_vec())),
        ("array", items) => Ok(Expr::Array(exprs_from_json(items, depth)?)),
        ("sexp", [Json::String(tag), items @ ..]) => {
            Ok(Expr::Sexp(tag.clone(), exprs_from_json(items, depth)?))
        }
        ("var", [Json::String(x)]) => Ok(Expr::Var(x.clone())),
        ("binop", [Json::String(op), l, r]) => Ok(Expr::bin(
            op.parse()?,
            expr_from_json(l, depth + 1)?,
            expr_from_json(r, depth + 1)?,
        )),
        ("elem", [container, index]) => Ok(Expr::elem(
            expr_from_json(container, depth + 1)?,
            expr_from_json(index, depth + 1)?,
        )),
        ("length", [e]) => Ok(Expr::length(expr_from_json(e, depth + 1)?)),
        ("call", [Json::String(f), Json::Array(args)]) => {
            Ok(Expr::Call(f.clone(), exprs_from_json(args, depth)?))
        }
        _ => Err(shape_error("an expression", json)),
    }
}

fn exprs_from_json(items: &[Json], depth: usize) -> Result<Vec<Expr>, Error> {
    items
        .iter()
        .map(|item| expr_from_json(item, depth + 1))
        .collect()
}

fn stmt_from_json(json: &Json, depth: usize) -> Result<Stmt, Error> {
    check_depth(depth)?;
    let (kind, rest) = node(json)?;
    match (kind, rest) {
        ("assign", [Json::String(x), Json::Array(indices), e]) => Ok(Stmt::Assign(
            x.clone(),
            exprs_from_json(indices, depth)?,
            expr_from_json(e, depth + 1)?,
        )),
        ("seq", stmts) => Ok(Stmt::block(
            stmts
                .iter()
                .map(|s| stmt_from_json(s, depth + 1))
                .collect::<Result<_, _>>()?,
        )),
        ("skip", []) => Ok(Stmt::Skip),
        ("if", [cond, then]) => Ok(Stmt::if_else(
            expr_from_json(cond, depth + 1)?,
            stmt_from_json(then, depth + 1)?,
            Stmt::Skip,
        )),
        ("if", [cond, then, els]) => Ok(Stmt::if_else(
            expr_from_json(cond, depth + 1)?,
            stmt_from_json(then, depth + 1)?,
            stmt_from_json(els, depth + 1)?,
        )),
        ("while", [cond, body]) => Ok(Stmt::while_loop(
            expr_from_json(cond, depth + 1)?,
            stmt_from_json(body, depth + 1)?,
        )),
        ("repeat", [body, cond]) => Ok(Stmt::repeat_until(
            stmt_from_json(body, depth + 1)?,
            expr_from_json(cond, depth + 1)?,
        )),
        ("case", [scrutinee, Json::Array(branches)]) => {
            let scrutinee = expr_from_json(scrutinee, depth + 1)?;
            let branches = branches
                .iter()
                .map(|branch| match branch {
                    Json::Array(pair) => match pair.as_slice() {
                        [pattern, body] => Ok((
                            pattern_from_json(pattern, depth + 1)?,
                            stmt_from_json(body, depth + 1)?,
                        )),
                        _ => Err(shape_error("a [pattern, statement] pair", branch)),
                    },
                    other => Err(shape_error("a [pattern, statement] pair", other)),
                })
                .collect::<Result<_, _>>()?;
            Ok(Stmt::Case(scrutinee, branches))
        }
        ("return", []) => Ok(Stmt::Return(None)),
        ("return", [e]) => Ok(Stmt::Return(Some(expr_from_json(e, depth + 1)?))),
        ("call", [Json::String(f), Json::Array(args)]) => {
            Ok(Stmt::Call(f.clone(), exprs_from_json(args, depth)?))
        }
        _ => Err(shape_error("a statement", json)),
    }
}

fn pattern_from_json(json: &Json, depth: usize) -> Result<Pattern, Error> {
    check_depth(depth)?;
    let (kind, rest) = node(json)?;
    match (kind, rest) {
        ("wildcard", []) => Ok(Pattern::Wildcard),
        ("ident", [Json::String(x)]) => Ok(Pattern::Ident(x.clone())),
        ("sexp", [Json::String(tag), children @ ..]) => Ok(Pattern::Sexp(
            tag.clone(),
            children
                .iter()
                .map(|child| pattern_from_json(child, depth + 1))
                .collect::<Result<_, _>>()?,
        )),
        _ => Err(shape_error("a pattern", json)),
    }
}

/// Split a `[kind, ...]` node into its kind string and operands.
fn node(json: &Json) -> Result<(&str, &[Json]), Error> {
    match json {
        Json::Array(items) => match items.split_first() {
            Some((Json::String(kind), rest)) => Ok((kind.as_str(), rest)),
            _ => Err(shape_error("a [kind, ...] node", json)),
        },
        other => Err(shape_error("a [kind, ...] node", other)),
    }
}

fn check_depth(depth: usize) -> Result<(), Error> {
    if depth >= MAX_PARSE_DEPTH {
        Err(Error::ParseError(format!(
            "AST too deeply nested (max depth: {MAX_PARSE_DEPTH})"
        )))
    } else {
        Ok(())
    }
}

/// A shape error showing what was expected and a snippet of what was found.
fn shape_error(expected: &str, found: &Json) -> Error {
    let mut snippet = found.to_string();
    if snippet.len() > 60 {
        snippet.truncate(57);
        snippet.push_str("...");
    }
    Error::ParseError(format!("expected {expected}, found {snippet}"))
}
