//! Declared policy variables.

use std::collections::HashMap;

use crate::types::Type;

/// Object type name of the `variables` identifier.
pub const VARIABLES_TYPE: &str = "dike.Variables";

/// Registry of policy variables addressable as `variables.<name>`.
///
/// Each registered variable receives a stable index; compiled references to
/// `variables.<name>` carry that index so evaluation can look the value up
/// without hashing the name.
///
/// # Examples
///
/// ```
/// use dike_cel::{Type, VariablesProvider};
///
/// let mut provider = VariablesProvider::new();
/// let index = provider.register_field("replicas", Type::Int);
/// assert_eq!(provider.field("replicas"), Some((index, &Type::Int)));
/// assert!(provider.field("missing").is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct VariablesProvider {
    fields: Vec<(String, Type)>,
    index: HashMap<String, usize>,
}

impl VariablesProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a variable and returns its index.
    ///
    /// Registering an existing name replaces its type and keeps its index.
    pub fn register_field(&mut self, name: &str, ty: Type) -> usize {
        if let Some(&index) = self.index.get(name) {
            self.fields[index].1 = ty;
            return index;
        }
        let index = self.fields.len();
        self.fields.push((name.to_string(), ty));
        self.index.insert(name.to_string(), index);
        index
    }

    /// Looks up a variable by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<(usize, &Type)> {
        self.index
            .get(name)
            .map(|&index| (index, &self.fields[index].1))
    }

    /// Number of registered variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no variables are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Variable names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_follow_registration_order() {
        let mut provider = VariablesProvider::new();
        assert_eq!(provider.register_field("a", Type::Int), 0);
        assert_eq!(provider.register_field("b", Type::String), 1);
        assert_eq!(provider.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(provider.len(), 2);
    }

    #[test]
    fn test_reregister_keeps_index() {
        let mut provider = VariablesProvider::new();
        provider.register_field("a", Type::Int);
        assert_eq!(provider.register_field("a", Type::Dyn), 0);
        assert_eq!(provider.field("a"), Some((0, &Type::Dyn)));
        assert_eq!(provider.len(), 1);
    }
}
