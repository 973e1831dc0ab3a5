//! Type model used by the checker.
//!
//! Polymorphic placeholders live in a [`TypeTable`] arena and are referred to
//! by [`TypeVar`] index. Narrowing a placeholder writes its resolved type into
//! the slot, so every expression holding the same `TypeVar` observes the
//! narrowing without sharing a mutable type object.

use std::{fmt, rc::Rc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Any,
    Number,
    String,
    Boolean,
    Nil,
    List,
    Vector,
}

impl BaseType {
    pub fn name(self) -> &'static str {
        match self {
            BaseType::Any => "Any",
            BaseType::Number => "Number",
            BaseType::String => "String",
            BaseType::Boolean => "Boolean",
            BaseType::Nil => "Nil",
            BaseType::List => "List",
            BaseType::Vector => "Vector",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeVar(u32);

impl TypeVar {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnType {
    pub params: Vec<Type>,
    /// Element type of the trailing `& rest` parameter, if any.
    pub rest: Option<Type>,
    pub ret: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Base(BaseType),
    Function(Rc<FnType>),
    Var(TypeVar),
}

impl Type {
    pub const ANY: Type = Type::Base(BaseType::Any);
    pub const NUMBER: Type = Type::Base(BaseType::Number);
    pub const STRING: Type = Type::Base(BaseType::String);
    pub const BOOLEAN: Type = Type::Base(BaseType::Boolean);
    pub const NIL: Type = Type::Base(BaseType::Nil);
    pub const LIST: Type = Type::Base(BaseType::List);
    pub const VECTOR: Type = Type::Base(BaseType::Vector);

    pub fn function(params: Vec<Type>, rest: Option<Type>, ret: Type) -> Type {
        Type::Function(Rc::new(FnType { params, rest, ret }))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Base(BaseType::Any))
    }
}

#[derive(Debug, Clone)]
struct VarSlot {
    name: Rc<str>,
    resolved: Option<Type>,
    narrowable: bool,
}

/// Why a narrowing was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrowError {
    Incompatible,
    Frozen,
}

#[derive(Debug, Default)]
pub struct TypeTable {
    slots: Vec<VarSlot>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh narrowable placeholder. `name` is only used for display.
    pub fn fresh(&mut self, name: impl Into<Rc<str>>) -> Type {
        let var = TypeVar(self.slots.len() as u32);
        self.slots.push(VarSlot {
            name: name.into(),
            resolved: None,
            narrowable: true,
        });
        Type::Var(var)
    }

    /// Follows resolved placeholders until reaching a concrete type or an
    /// unresolved placeholder.
    pub fn resolve(&self, ty: &Type) -> Type {
        let mut ty = ty.clone();
        while let Type::Var(var) = ty {
            match &self.slots[var.index()].resolved {
                Some(resolved) => ty = resolved.clone(),
                None => return Type::Var(var),
            }
        }
        ty
    }

    /// Unresolved placeholder at the end of `ty`'s chain, if any.
    pub fn open_var(&self, ty: &Type) -> Option<TypeVar> {
        match self.resolve(ty) {
            Type::Var(var) => Some(var),
            _ => None,
        }
    }

    pub fn is_narrowable(&self, var: TypeVar) -> bool {
        self.slots[var.index()].narrowable
    }

    /// Clears the narrowable flag of every placeholder on `ty`'s chain.
    pub fn freeze(&mut self, ty: &Type) {
        let mut ty = ty.clone();
        while let Type::Var(var) = ty {
            let slot = &mut self.slots[var.index()];
            slot.narrowable = false;
            match &slot.resolved {
                Some(resolved) => ty = resolved.clone(),
                None => break,
            }
        }
    }

    pub fn satisfies(&self, actual: &Type, expected: &Type) -> bool {
        let actual = self.resolve(actual);
        let expected = self.resolve(expected);

        match (&actual, &expected) {
            (Type::Base(BaseType::Any), _) | (_, Type::Base(BaseType::Any)) => true,
            (Type::Var(_), _) | (_, Type::Var(_)) => true,
            (Type::Base(a), Type::Base(b)) => a == b,
            (Type::Function(a), Type::Function(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                a.params.len() == b.params.len()
                    && a.rest.is_some() == b.rest.is_some()
                    && a.params
                        .iter()
                        .zip(b.params.iter())
                        .all(|(x, y)| self.satisfies(x, y))
                    && match (&a.rest, &b.rest) {
                        (Some(x), Some(y)) => self.satisfies(x, y),
                        _ => true,
                    }
                    && self.satisfies(&a.ret, &b.ret)
            }
            _ => false,
        }
    }

    /// Narrows `actual` towards `constraint`.
    ///
    /// Returns `constraint` unless it is `Any`, in which case `actual` is
    /// returned untouched. An unresolved narrowable placeholder on the
    /// `actual` side gets `constraint` written into its slot.
    pub fn narrow(&mut self, actual: &Type, constraint: &Type) -> Result<Type, NarrowError> {
        if self.resolve(constraint).is_any() {
            return Ok(actual.clone());
        }

        if !self.satisfies(actual, constraint) {
            return Err(NarrowError::Incompatible);
        }

        if let Some(var) = self.open_var(actual) {
            if self.open_var(constraint) == Some(var) {
                return Ok(constraint.clone());
            }

            let slot = &mut self.slots[var.index()];
            if !slot.narrowable {
                return Err(NarrowError::Frozen);
            }
            slot.resolved = Some(constraint.clone());
        }

        Ok(constraint.clone())
    }

    /// Renders `ty` with every resolved placeholder substituted.
    pub fn display(&self, ty: &Type) -> String {
        let mut out = String::new();
        self.write_type(&mut out, ty)
            .expect("formatting into a String cannot fail");
        out
    }

    fn write_type(&self, out: &mut String, ty: &Type) -> fmt::Result {
        use std::fmt::Write;

        match self.resolve(ty) {
            Type::Base(base) => out.write_str(base.name()),
            Type::Var(var) => write!(out, "?{}", self.slots[var.index()].name),
            Type::Function(func) => {
                out.write_str("(fn [")?;
                for (i, param) in func.params.iter().enumerate() {
                    if i > 0 {
                        out.write_char(' ')?;
                    }
                    self.write_type(out, param)?;
                }
                if let Some(rest) = &func.rest {
                    if !func.params.is_empty() {
                        out.write_char(' ')?;
                    }
                    out.write_str("& ")?;
                    self.write_type(out, rest)?;
                }
                out.write_str("] ")?;
                self.write_type(out, &func.ret)?;
                out.write_char(')')
            }
        }
    }
}
