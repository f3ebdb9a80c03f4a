//! Explicit registry of loss criteria.
//!
//! Criterion identifiers that appear in a configuration are resolved
//! against this registry when the trainer is constructed, so an
//! unknown identifier fails fast with a configuration error instead of
//! surfacing mid-run.

use std::collections::BTreeMap;

use crate::error::{TrainError, TrainResult};
use crate::loss::{Criterion, SumAbsoluteError, SumSquaredError};

/// Constructor for a registered criterion.
pub type CriterionCtor = fn() -> Box<dyn Criterion>;

/// Maps declared criterion identifiers to constructors.
pub struct CriterionRegistry {
    entries: BTreeMap<&'static str, CriterionCtor>,
}

impl CriterionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registry with the built-in criteria: `mse` (sum of squared
    /// errors) and `l1` (sum of absolute errors).
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("mse", || Box::new(SumSquaredError));
        registry.register("l1", || Box::new(SumAbsoluteError));
        registry
    }

    /// Registers (or replaces) a constructor under `id`.
    pub fn register(&mut self, id: &'static str, ctor: CriterionCtor) {
        self.entries.insert(id, ctor);
    }

    /// Whether `id` is known.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Instantiates the criterion registered under `id`.
    pub fn build(&self, id: &str) -> TrainResult<Box<dyn Criterion>> {
        match self.entries.get(id) {
            Some(ctor) => Ok(ctor()),
            None => Err(TrainError::Config {
                detail: format!(
                    "unknown criterion `{id}`; registered: {:?}",
                    self.entries.keys().collect::<Vec<_>>()
                ),
            }),
        }
    }
}

impl Default for CriterionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve() {
        let registry = CriterionRegistry::with_defaults();
        assert!(registry.contains("mse"));
        assert!(registry.contains("l1"));
        assert_eq!(registry.build("mse").unwrap().name(), "mse");
    }

    #[test]
    fn test_unknown_id_fails_fast() {
        let registry = CriterionRegistry::with_defaults();
        let err = registry.build("huber");
        assert!(matches!(err, Err(TrainError::Config { .. })));
        assert!(err.err().unwrap().to_string().contains("huber"));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = CriterionRegistry::new();
        registry.register("sse", || Box::new(SumSquaredError));
        assert!(registry.contains("sse"));
        assert!(!registry.contains("mse"));
    }
}
