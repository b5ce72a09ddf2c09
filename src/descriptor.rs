//! Building a tree from data.
//!
//! A [`NodeDescriptor`] says which generator to instantiate at each node and
//! with what configuration. The [`GeneratorRegistry`] maps generator names to
//! factories producing the node's tasks from that configuration.
//!
//! ```rust
//! use gentree::{GeneratorRegistry, NodeDescriptor, TaskDefinition, TaskRun};
//!
//! let mut registry = GeneratorRegistry::new();
//! registry.register("noop", |_| {
//!     Ok(vec![TaskDefinition::builder("main").run(|_, _| Ok(TaskRun::new()))])
//! });
//!
//! let descriptor = NodeDescriptor::from_json(r#"{ "id": "root", "generator": "noop" }"#).unwrap();
//! let tree = registry.build_tree(&descriptor).unwrap();
//! assert_eq!(tree.len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::Deserialize;

use crate::error::TreeError;
use crate::task::TaskDefinition;
use crate::tree::{GeneratorNode, GeneratorTree};

/// Serialized description of a generator node and its children.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub id: String,
    pub generator: String,
    #[serde(default)]
    pub base_directory: Option<Utf8PathBuf>,
    /// Passed as-is to the generator's factory.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub children: Vec<NodeDescriptor>,
}

impl NodeDescriptor {
    pub fn from_json(json: &str) -> Result<Self, TreeError> {
        Ok(serde_json::from_str(json)?)
    }
}

type Factory = dyn Fn(&serde_json::Value) -> anyhow::Result<Vec<TaskDefinition>> + Send + Sync;

/// Known generators by name.
#[derive(Default, Clone)]
pub struct GeneratorRegistry {
    factories: HashMap<String, Arc<Factory>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a generator. A later registration under the same name
    /// replaces the earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<Vec<TaskDefinition>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn build_tree(&self, descriptor: &NodeDescriptor) -> Result<GeneratorTree, TreeError> {
        GeneratorTree::new(self.instantiate(descriptor)?)
    }

    fn instantiate(&self, descriptor: &NodeDescriptor) -> Result<GeneratorNode, TreeError> {
        let factory =
            self.factories
                .get(&descriptor.generator)
                .ok_or_else(|| TreeError::UnknownGenerator {
                    node: descriptor.id.clone(),
                    generator: descriptor.generator.clone(),
                })?;

        let tasks = factory(&descriptor.config).map_err(|error| TreeError::Factory {
            node: descriptor.id.clone(),
            generator: descriptor.generator.clone(),
            error,
        })?;

        let mut node = GeneratorNode::new(&descriptor.id, &descriptor.generator).tasks(tasks);
        if let Some(directory) = &descriptor.base_directory {
            node = node.base_directory(directory.clone());
        }

        for child in &descriptor.children {
            node = node.child(self.instantiate(child)?);
        }

        Ok(node)
    }
}

impl std::fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("GeneratorRegistry")
            .field("generators", &names)
            .finish()
    }
}
