//! Scoped name->value environment with a distinguished global tail.
//!
//! A [`State`] is a chain of lexical frames over exactly one global frame at
//! the bottom. Two separate disciplines manipulate the chain:
//!
//! - `enter`/`leave` implement the calling convention: entering a function
//!   pushes a fresh frame **directly onto the global frame**, discarding all
//!   intermediate locals (a callee must not see its caller's locals, nor any
//!   pattern frames pending at the call site); leaving restores the caller's
//!   local chain atop the possibly mutated global frame.
//! - `push`/`drop_frame` are a plain LIFO used for pattern-match frames and
//!   preserve the whole current chain.
//!
//! Reads and writes hit the innermost frame whose scope set contains the
//! name, falling through to the global frame, which is total: writing an
//! unscoped name creates a global binding, reading an undefined one fails.

use std::collections::{HashMap, HashSet};

use crate::value::Value;
use crate::Error;

/// One lexical scope record: the fixed set of visible names and the partial
/// bindings over that set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    scope: HashSet<String>,
    bindings: HashMap<String, Value>,
}

impl Frame {
    /// An empty frame over the given scope.
    pub fn scoped(scope: impl IntoIterator<Item = String>) -> Self {
        Frame {
            scope: scope.into_iter().collect(),
            bindings: HashMap::new(),
        }
    }

    /// A frame whose scope is exactly the domain of `bindings`.
    pub fn bound(bindings: HashMap<String, Value>) -> Self {
        Frame {
            scope: bindings.keys().cloned().collect(),
            bindings,
        }
    }
}

/// A stack of lexical frames with a mandatory global frame at the bottom.
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Global(HashMap<String, Value>),
    Local { frame: Frame, parent: Box<State> },
}

impl Default for State {
    fn default() -> Self {
        State::Global(HashMap::new())
    }
}

impl State {
    /// Read a name from the innermost frame whose scope contains it,
    /// falling through to the global frame.
    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        match self {
            State::Global(bindings) => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Unbound(name.to_owned())),
            State::Local { frame, parent } => {
                if frame.scope.contains(name) {
                    frame
                        .bindings
                        .get(name)
                        .cloned()
                        .ok_or_else(|| Error::Unbound(name.to_owned()))
                } else {
                    parent.lookup(name)
                }
            }
        }
    }

    /// Write a name into the innermost frame whose scope contains it,
    /// falling through to the global frame (which accepts any name).
    pub fn update(&mut self, name: &str, value: Value) {
        match self {
            State::Global(bindings) => {
                bindings.insert(name.to_owned(), value);
            }
            State::Local { frame, parent } => {
                if frame.scope.contains(name) {
                    frame.bindings.insert(name.to_owned(), value);
                } else {
                    parent.update(name, value);
                }
            }
        }
    }

    /// Function entry: a fresh frame over `scope` directly atop the global
    /// frame, discarding every intermediate local frame.
    pub fn enter(self, scope: impl IntoIterator<Item = String>) -> State {
        State::Local {
            frame: Frame::scoped(scope),
            parent: Box::new(State::Global(self.into_global())),
        }
    }

    /// Function exit: the caller's local chain atop the global frame
    /// reached from the callee (which may have mutated it).
    pub fn leave(caller: State, callee: State) -> State {
        caller.with_global(callee.into_global())
    }

    /// Push a pattern-match frame atop the whole current chain.
    pub fn push(self, frame: Frame) -> State {
        State::Local {
            frame,
            parent: Box::new(self),
        }
    }

    /// Pop one pattern-match frame. Popping the global frame is an internal
    /// inconsistency: some LEAVE had no matching push.
    pub fn drop_frame(self) -> Result<State, Error> {
        match self {
            State::Local { parent, .. } => Ok(*parent),
            State::Global(_) => Err(Error::VmError(
                "LEAVE without a matching pattern frame".to_owned(),
            )),
        }
    }

    fn into_global(self) -> HashMap<String, Value> {
        match self {
            State::Global(bindings) => bindings,
            State::Local { parent, .. } => parent.into_global(),
        }
    }

    fn with_global(self, global: HashMap<String, Value>) -> State {
        match self {
            State::Global(_) => State::Global(global),
            State::Local { frame, parent } => State::Local {
                frame,
                parent: Box::new(parent.with_global(global)),
            },
        }
    }
}
