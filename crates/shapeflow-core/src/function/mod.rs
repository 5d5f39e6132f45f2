//! User-defined functions: lookup, per-call-site specialization and inlining
//!
//! Two calls to the same function with different attribute bindings are different programs.
//! Expansion results are therefore cached on the full call signature, never on the function
//! identity alone.

mod inline;
mod registry;
mod specialize;

pub use inline::{inline_local_functions, instantiate, NameGenerator};
pub use registry::FunctionRegistry;
pub use specialize::{bind_attributes, check_arity, specialize, substitute_attributes, AttributeBindings, Specialization};

use crate::ir::{FunctionKey, OpsetImports, TensorData, Type};
use std::collections::HashMap;

/// Everything that can change the result of inferring a function call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpansionKey {
    pub function: FunctionKey,
    /// Canonical rendering of the bound attribute values
    pub attributes: String,
    pub input_types: Vec<Option<Type>>,
    /// Canonical rendering of the known input values
    pub input_values: String,
    /// Canonical rendering of the opset imports the body is inferred under
    pub opsets: String,
}

impl ExpansionKey {
    /// `None` when the bindings cannot be rendered canonically; such calls are not cached
    pub fn new(
        function: FunctionKey,
        bindings: &AttributeBindings,
        input_types: Vec<Option<Type>>,
        input_values: &[Option<&TensorData>],
        opsets: &OpsetImports,
    ) -> Option<Self> {
        Some(Self {
            function,
            attributes: serde_json::to_string(bindings).ok()?,
            input_types,
            input_values: serde_json::to_string(input_values).ok()?,
            opsets: serde_json::to_string(opsets).ok()?,
        })
    }
}

/// Output types and values of one inferred call
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub types: Vec<Option<Type>>,
    pub values: Vec<Option<TensorData>>,
}

/// Memo of inferred calls for one inference invocation
#[derive(Debug, Default)]
pub struct ExpansionCache {
    entries: HashMap<ExpansionKey, Expansion>,
    hits: usize,
    misses: usize,
}

impl ExpansionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &ExpansionKey) -> Option<&Expansion> {
        let found = self.entries.get(key);
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    pub fn insert(&mut self, key: ExpansionKey, expansion: Expansion) {
        self.entries.insert(key, expansion);
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Attribute, ElementKind};

    fn key(to: i64) -> ExpansionKey {
        key_under(to, &OpsetImports::new().with("", 18))
    }

    fn key_under(to: i64, opsets: &OpsetImports) -> ExpansionKey {
        let mut bindings = AttributeBindings::new();
        bindings.insert("to".to_string(), Attribute::int("to", to));
        let function = FunctionKey {
            domain: "local".to_string(),
            name: "cast".to_string(),
            version: 1,
        };
        ExpansionKey::new(function, &bindings, vec![Some(Type::scalar(ElementKind::Float))], &[None], opsets).unwrap()
    }

    #[test]
    fn test_attribute_bindings_separate_entries() {
        let mut cache = ExpansionCache::new();
        let expansion = Expansion {
            types: vec![Some(Type::scalar(ElementKind::Int32))],
            values: vec![None],
        };
        cache.insert(key(6), expansion.clone());
        assert!(cache.get(&key(7)).is_none());
        assert_eq!(cache.get(&key(6)), Some(&expansion));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn test_opset_imports_separate_entries() {
        let mut cache = ExpansionCache::new();
        let expansion = Expansion {
            types: vec![Some(Type::scalar(ElementKind::Int32))],
            values: vec![None],
        };
        cache.insert(key_under(6, &OpsetImports::new().with("", 11)), expansion);
        assert!(cache.get(&key_under(6, &OpsetImports::new().with("", 13))).is_none());
        assert!(cache.get(&key_under(6, &OpsetImports::new().with("", 11))).is_some());
    }
}
