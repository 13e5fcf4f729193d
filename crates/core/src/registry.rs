use std::collections::HashMap;

use crate::error::{DrudgeError, Result};
use crate::method::WorkMethod;

/// Immutable lookup table from method name to [`WorkMethod`].
#[derive(Debug, Clone, Default)]
pub struct WorkMethods {
    methods: HashMap<String, WorkMethod>,
}

impl WorkMethods {
    /// Build the registry. A later method with the same name replaces an earlier one.
    pub fn of(methods: impl IntoIterator<Item = WorkMethod>) -> Self {
        let methods = methods
            .into_iter()
            .map(|m| (m.name().to_string(), m))
            .collect();
        Self { methods }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Look up a method, failing with [`DrudgeError::UnknownMethod`] when absent.
    pub fn resolve(&self, name: &str) -> Result<&WorkMethod> {
        self.methods
            .get(name)
            .ok_or_else(|| DrudgeError::UnknownMethod(name.to_string()))
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
