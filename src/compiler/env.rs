//! Lexical scopes shared by the checker, lowering and the translator.
//!
//! Frames live in an arena and point at their parent by index. Frames are
//! pushed on entry to a lexical construct and truncated on exit, so a frame
//! is never retained past the construct that opened it. Frame `0` is the
//! global frame and is never popped.

use std::rc::Rc;

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

impl ScopeId {
    pub const GLOBAL: ScopeId = ScopeId(0);
}

#[derive(Debug)]
struct Frame<T> {
    parent: Option<ScopeId>,
    bindings: IndexMap<Rc<str>, T>,
}

#[derive(Debug)]
pub struct Scopes<T> {
    frames: Vec<Frame<T>>,
    current: ScopeId,
}

impl<T> Default for Scopes<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scopes<T> {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame {
                parent: None,
                bindings: IndexMap::new(),
            }],
            current: ScopeId::GLOBAL,
        }
    }

    pub fn is_global(&self) -> bool {
        self.current == ScopeId::GLOBAL
    }

    /// Opens a frame nested in the current one.
    pub fn enter(&mut self) -> ScopeId {
        self.enter_from(self.current)
    }

    /// Opens a frame whose lookups continue in `parent` instead of the
    /// current frame. Function bodies use this to see only their own
    /// bindings and the globals.
    pub fn enter_from(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.frames.len());
        self.frames.push(Frame {
            parent: Some(parent),
            bindings: IndexMap::new(),
        });
        let saved = self.current;
        self.current = id;
        saved
    }

    /// Discards the innermost frame and returns to `saved`, the value
    /// returned by the matching [`Scopes::enter`].
    pub fn exit(&mut self, saved: ScopeId) {
        debug_assert!(self.frames.len() > 1, "cannot pop the global frame");
        self.frames.truncate(self.current.0);
        self.current = saved;
    }

    pub fn define(&mut self, name: Rc<str>, value: T) {
        self.frames[self.current.0].bindings.insert(name, value);
    }

    pub fn define_global(&mut self, name: Rc<str>, value: T) {
        self.frames[ScopeId::GLOBAL.0].bindings.insert(name, value);
    }

    pub fn lookup(&self, name: &str) -> Option<&T> {
        self.lookup_with_scope(name).map(|(value, _)| value)
    }

    /// Like [`Scopes::lookup`], also reporting the frame the binding lives in.
    pub fn lookup_with_scope(&self, name: &str) -> Option<(&T, ScopeId)> {
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            let frame = &self.frames[id.0];
            if let Some(value) = frame.bindings.get(name) {
                return Some((value, id));
            }
            scope = frame.parent;
        }
        None
    }
}
