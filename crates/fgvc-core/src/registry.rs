use std::collections::BTreeMap;

use crate::error::{FgvcError, Result};

/// Name-to-constructor table for one component category.
///
/// Entries are only ever added. Registering a name twice is an error rather
/// than a silent overwrite, so two modules cannot race for the same key.
pub struct Registry<C> {
    category: &'static str,
    entries: BTreeMap<String, C>,
}

impl<C> Registry<C> {
    pub fn new(category: &'static str) -> Self {
        Self {
            category,
            entries: BTreeMap::new(),
        }
    }

    pub fn category(&self) -> &'static str {
        self.category
    }

    pub fn register(&mut self, name: impl Into<String>, constructor: C) -> Result<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(FgvcError::AlreadyRegistered {
                category: self.category.to_string(),
                name,
            });
        }
        log::debug!("registered {} '{}'", self.category, name);
        self.entries.insert(name, constructor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&C> {
        self.entries.get(name).ok_or_else(|| FgvcError::NotFound {
            category: self.category.to_string(),
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in lexical order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> std::fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("category", &self.category)
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_what_was_registered() {
        let mut registry: Registry<fn() -> &'static str> = Registry::new("backbone");
        registry.register("a", || "first").unwrap();
        registry.register("b", || "second").unwrap();

        assert_eq!((registry.get("a").unwrap())(), "first");
        assert_eq!((registry.get("b").unwrap())(), "second");
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn unknown_name_is_not_found() {
        let registry: Registry<u32> = Registry::new("head");
        match registry.get("missing") {
            Err(FgvcError::NotFound { category, name }) => {
                assert_eq!(category, "head");
                assert_eq!(name, "missing");
            }
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry: Registry<u32> = Registry::new("optimizer");
        registry.register("sgd", 1).unwrap();
        let err = registry.register("sgd", 2).unwrap_err();
        assert!(matches!(err, FgvcError::AlreadyRegistered { .. }));
        assert_eq!(*registry.get("sgd").unwrap(), 1);
        assert_eq!(registry.len(), 1);
    }
}
