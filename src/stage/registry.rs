//! Stage registry: the factory that turns type names into stage instances.

use crate::error::{Error, Result};
use crate::stage::{PropertyMap, StageImpl};
use std::collections::HashMap;

/// Type alias for stage constructor functions.
///
/// Receives the instance name (stages report under it on the bus) and the
/// initial configuration.
pub type StageConstructor = fn(&str, &PropertyMap) -> Result<Box<dyn StageImpl>>;

/// Registry of stage constructors.
///
/// The registry is consulted by [`PipelineGraph::add_stage`] and is the only
/// place stage instances come from.
///
/// [`PipelineGraph::add_stage`]: crate::graph::PipelineGraph::add_stage
pub struct StageRegistry {
    constructors: HashMap<String, StageConstructor>,
}

impl StageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Create a registry with the built-in stage descriptors registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::stages::register_builtins(&mut registry);
        registry
    }

    /// Register a custom stage constructor.
    pub fn register(&mut self, type_name: &str, constructor: StageConstructor) {
        self.constructors.insert(type_name.to_string(), constructor);
    }

    /// Instantiate a stage of the given type.
    ///
    /// Fails with [`Error::UnknownStageType`] if no constructor is
    /// registered, or [`Error::InstantiationFailed`] if the constructor
    /// rejects the configuration.
    pub fn create(
        &self,
        type_name: &str,
        instance_name: &str,
        props: &PropertyMap,
    ) -> Result<Box<dyn StageImpl>> {
        let constructor = self
            .constructors
            .get(type_name)
            .ok_or_else(|| Error::UnknownStageType(type_name.to_string()))?;

        constructor(instance_name, props).map_err(|e| Error::InstantiationFailed {
            type_name: type_name.to_string(),
            name: instance_name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Check if a stage type is registered.
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// List all registered type names, sorted.
    pub fn list_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageType;

    #[test]
    fn test_builtins_registered() {
        let registry = StageRegistry::with_builtins();
        assert!(registry.is_registered("filesrc"));
        assert!(registry.is_registered("qtdemux"));
        assert!(registry.is_registered("udpsink"));
        assert!(!registry.is_registered("flux-capacitor"));
    }

    #[test]
    fn test_unknown_type() {
        let registry = StageRegistry::with_builtins();
        let result = registry.create("flux-capacitor", "fc", &PropertyMap::new());
        assert!(matches!(result, Err(Error::UnknownStageType(_))));
    }

    #[test]
    fn test_create_source() {
        let registry = StageRegistry::with_builtins();
        let props = PropertyMap::new().with("location", "/data/sample.mp4");
        let stage = registry.create("filesrc", "file-source", &props).unwrap();
        assert_eq!(stage.stage_type(), StageType::Source);
    }

    #[test]
    fn test_list_types_sorted() {
        let registry = StageRegistry::with_builtins();
        let types = registry.list_types();
        let mut sorted = types.clone();
        sorted.sort();
        assert_eq!(types, sorted);
        assert!(types.len() >= 10);
    }
}
