use std::collections::BTreeMap;
use std::sync::Arc;

use desceval_core::{EvalError, EvalResult};

use crate::descriptor::{BinaryTests, DescriptorFunction, GradientHistogram, RawIntensity};

/// Descriptor functions selectable by identifier
#[derive(Clone)]
pub struct DescriptorRegistry {
    entries: BTreeMap<String, Arc<dyn DescriptorFunction>>,
}

impl DescriptorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in reference descriptors
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RawIntensity));
        registry.register(Arc::new(GradientHistogram));
        registry.register(Arc::new(BinaryTests::default()));
        registry
    }

    /// Register under the function's own id, replacing any previous entry
    pub fn register(&mut self, function: Arc<dyn DescriptorFunction>) -> Option<Arc<dyn DescriptorFunction>> {
        self.entries.insert(function.id().to_string(), function)
    }

    pub fn get(&self, id: &str) -> EvalResult<Arc<dyn DescriptorFunction>> {
        self.entries
            .get(id)
            .cloned()
            .ok_or_else(|| EvalError::UnknownDescriptor {
                id: id.to_string(),
                available: self.ids(),
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Registered identifiers in sorted order
    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DescriptorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for DescriptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorRegistry").field("ids", &self.ids()).finish()
    }
}
