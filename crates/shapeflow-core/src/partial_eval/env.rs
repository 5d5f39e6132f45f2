//! Budgeted store of statically known tensor values

use crate::config::InferenceConfig;
use crate::ir::TensorData;
use indexmap::IndexMap;
use tracing::{trace, warn};

/// Value name to concrete small tensor, for one graph inference.
///
/// Every stored element and every evaluated operation is charged against a budget. Once the
/// budget is spent the environment stops accepting values and inference continues without them.
#[derive(Debug, Clone)]
pub struct PartialValueEnv {
    values: IndexMap<String, TensorData>,
    budget: usize,
    spent: usize,
    max_elements: usize,
    exhausted: bool,
    enabled: bool,
}

impl PartialValueEnv {
    pub fn new(budget: usize, max_elements: usize) -> Self {
        Self {
            values: IndexMap::new(),
            budget,
            spent: 0,
            max_elements,
            exhausted: false,
            enabled: true,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        let mut env = Self::new(config.partial_value_budget, config.max_partial_value_elements);
        env.enabled = config.propagate_partial_values;
        env
    }

    /// An environment that never stores anything
    pub fn disabled() -> Self {
        let mut env = Self::new(0, 0);
        env.enabled = false;
        env
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    pub fn get(&self, name: &str) -> Option<&TensorData> {
        self.values.get(name)
    }

    /// Whether new work may still be charged
    pub fn can_evaluate(&self) -> bool {
        self.enabled && !self.exhausted
    }

    /// Charge `cost` against the budget. Returns false (and marks the environment exhausted)
    /// when the budget cannot cover it.
    pub fn charge(&mut self, cost: usize) -> bool {
        if !self.can_evaluate() {
            return false;
        }
        match self.spent.checked_add(cost) {
            Some(total) if total <= self.budget => {
                self.spent = total;
                true
            }
            _ => {
                warn!(
                    budget = self.budget,
                    spent = self.spent,
                    cost,
                    "partial value budget exhausted; further values stay unknown"
                );
                self.exhausted = true;
                false
            }
        }
    }

    /// Store a value if it is small enough and the budget allows it
    pub fn insert(&mut self, name: &str, data: TensorData) -> bool {
        if data.len() > self.max_elements || !self.charge(data.len()) {
            return false;
        }
        trace!(value = name, elements = data.len(), "partial value recorded");
        self.values.insert(name.to_string(), data);
        true
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn spent(&self) -> usize {
        self.spent
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorData)> {
        self.values.iter().map(|(name, data)| (name.as_str(), data))
    }
}
