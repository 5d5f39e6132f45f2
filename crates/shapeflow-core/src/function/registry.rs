//! Lookup of model-local function definitions

use crate::ir::model::normalize_domain;
use crate::ir::{FunctionDef, FunctionKey, OpsetImports};
use std::collections::{BTreeMap, HashMap};

/// Read-only index over a model's function library.
///
/// A call resolves to the newest definition whose version does not exceed the caller's
/// import of the function's domain, or to the newest definition when the domain is not
/// imported at all.
#[derive(Debug, Default)]
pub struct FunctionRegistry<'m> {
    functions: HashMap<(String, String), BTreeMap<i64, &'m FunctionDef>>,
}

impl<'m> FunctionRegistry<'m> {
    pub fn new(functions: &'m [FunctionDef]) -> Self {
        let mut registry = Self::default();
        for function in functions {
            registry
                .functions
                .entry((normalize_domain(&function.domain).to_string(), function.name.clone()))
                .or_default()
                .insert(function.version, function);
        }
        registry
    }

    pub fn resolve(&self, domain: &str, name: &str, opsets: &OpsetImports) -> Option<&'m FunctionDef> {
        let versions = self
            .functions
            .get(&(normalize_domain(domain).to_string(), name.to_string()))?;
        let entry = match opsets.version(domain) {
            Some(version) => versions.range(..=version).next_back(),
            None => versions.iter().next_back(),
        };
        entry.map(|(_, function)| *function)
    }

    pub fn get(&self, key: &FunctionKey) -> Option<&'m FunctionDef> {
        self.functions
            .get(&(key.domain.clone(), key.name.clone()))
            .and_then(|versions| versions.get(&key.version))
            .copied()
    }

    pub fn contains(&self, domain: &str, name: &str) -> bool {
        self.functions
            .contains_key(&(normalize_domain(domain).to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.functions.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
