//! Scope chain for nested graphs
//!
//! Each graph being inferred owns a [`Scope`] holding the types and partial values of the
//! names it defines. Subgraphs get a child scope linked to their parent: reads fall through
//! to enclosing scopes, writes always land in the innermost one.

use crate::ir::{TensorData, Type};
use crate::partial_eval::PartialValueEnv;
use indexmap::IndexMap;

#[derive(Debug)]
pub struct Scope<'p> {
    parent: Option<&'p Scope<'p>>,
    /// Side table of this scope: `None` is a defined value whose type is still unknown
    types: IndexMap<String, Option<Type>>,
    values: PartialValueEnv,
}

impl<'p> Scope<'p> {
    /// A scope with no enclosing scope: the main graph or a function body
    pub fn root(values: PartialValueEnv) -> Self {
        Self {
            parent: None,
            types: IndexMap::new(),
            values,
        }
    }

    /// A scope nested in `self` that can read, but never write, the enclosing names
    pub fn child<'c>(&'c self, values: PartialValueEnv) -> Scope<'c> {
        Scope {
            parent: Some(self),
            types: IndexMap::new(),
            values,
        }
    }

    pub fn depth(&self) -> usize {
        self.parent.map_or(0, |parent| parent.depth() + 1)
    }

    /// Whether `name` is defined in this scope or an enclosing one
    pub fn is_defined(&self, name: &str) -> bool {
        self.types.contains_key(name) || self.parent.is_some_and(|parent| parent.is_defined(name))
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Type of `name` from the innermost scope defining it. `None` when the name is not
    /// defined anywhere, `Some(None)` when it is defined with an unknown type.
    pub fn lookup(&self, name: &str) -> Option<Option<&Type>> {
        match self.types.get(name) {
            Some(ty) => Some(ty.as_ref()),
            None => self.parent.and_then(|parent| parent.lookup(name)),
        }
    }

    /// Known partial value of `name`, from the innermost scope defining it
    pub fn value(&self, name: &str) -> Option<&TensorData> {
        if self.types.contains_key(name) {
            return self.values.get(name);
        }
        self.parent.and_then(|parent| parent.value(name))
    }

    pub fn define(&mut self, name: &str, ty: Option<Type>) {
        self.types.insert(name.to_string(), ty);
    }

    pub fn values(&self) -> &PartialValueEnv {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut PartialValueEnv {
        &mut self.values
    }

    /// Names defined in this scope, in definition order
    pub fn local_types(&self) -> impl Iterator<Item = (&str, Option<&Type>)> {
        self.types.iter().map(|(name, ty)| (name.as_str(), ty.as_ref()))
    }

    pub fn into_parts(self) -> (IndexMap<String, Option<Type>>, PartialValueEnv) {
        (self.types, self.values)
    }
}
