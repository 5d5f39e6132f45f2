//! Invocation parameters for an inference pass

use serde::{Deserialize, Serialize};

/// Configuration record for a single inference invocation.
///
/// Every field has a default, so a partial TOML or JSON document deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Fold small constant tensors that feed shape-determining operators
    pub propagate_partial_values: bool,
    /// Report values whose type is still unknown after the pass as failures
    pub strict_mode: bool,
    /// Maximum nesting of function calls and control-flow subgraphs
    pub max_recursion_depth: usize,
    /// Cumulative element/operation cost allowed per partial-value environment
    pub partial_value_budget: usize,
    /// Largest tensor (in elements) tracked as a partial value
    pub max_partial_value_elements: usize,
    /// Fixed-point iteration cap for loop-carried types
    pub max_loop_iterations: usize,
    /// Fail when an inferred type conflicts with a declared one
    pub check_declared_types: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            propagate_partial_values: true,
            strict_mode: false,
            max_recursion_depth: 32,
            partial_value_budget: 65_536,
            max_partial_value_elements: 1_024,
            max_loop_iterations: 8,
            check_declared_types: true,
        }
    }
}

impl InferenceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partial_values(mut self, enabled: bool) -> Self {
        self.propagate_partial_values = enabled;
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict_mode = true;
        self
    }

    pub fn with_max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn with_partial_value_budget(mut self, budget: usize) -> Self {
        self.partial_value_budget = budget;
        self
    }

    pub fn with_max_loop_iterations(mut self, iterations: usize) -> Self {
        self.max_loop_iterations = iterations;
        self
    }

    pub fn with_declared_type_checks(mut self, enabled: bool) -> Self {
        self.check_declared_types = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: InferenceConfig = serde_json::from_str(r#"{"strict_mode": true}"#).unwrap();
        assert!(config.strict_mode);
        assert!(config.propagate_partial_values);
        assert_eq!(config.max_recursion_depth, 32);
    }

    #[test]
    fn test_builder_methods() {
        let config = InferenceConfig::new()
            .strict()
            .with_partial_values(false)
            .with_max_recursion_depth(4);
        assert!(config.strict_mode);
        assert!(!config.propagate_partial_values);
        assert_eq!(config.max_recursion_depth, 4);
    }
}
