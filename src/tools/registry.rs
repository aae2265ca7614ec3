//! Immutable tool registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ConductorError, Result};
use crate::types::{PermissionLevel, ToolDefinition};

use super::tool::Tool;

#[derive(Clone)]
struct Entry {
    tool: Arc<dyn Tool>,
    definition: ToolDefinition,
}

/// Tools available to a loop, fixed once built.
///
/// Names are unique and definitions keep registration order, which is the
/// order they are advertised to the model.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: Arc<Vec<Entry>>,
    index: Arc<HashMap<String, usize>>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.entries[i].tool)
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.entries[i].definition)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.definition.name.as_str()).collect()
    }

    /// Effective permission level, after overrides.
    pub fn permission_level(&self, name: &str) -> Option<PermissionLevel> {
        self.definition(name).map(|d| d.permission_level)
    }

    pub fn ends_turn(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.ends_turn())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// A new registry holding only the tools `keep` accepts. Effective
    /// permission levels carry over unchanged.
    pub fn subset(&self, keep: impl Fn(&str) -> bool) -> ToolRegistry {
        let entries: Vec<Entry> = self
            .entries
            .iter()
            .filter(|e| keep(&e.definition.name))
            .cloned()
            .collect();
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.definition.name.clone(), i))
            .collect();
        ToolRegistry {
            entries: Arc::new(entries),
            index: Arc::new(index),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<Arc<dyn Tool>>,
    overrides: HashMap<String, PermissionLevel>,
}

impl ToolRegistryBuilder {
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Per-name permission overrides, typically from `[permissions.overrides]`.
    pub fn overrides(mut self, overrides: HashMap<String, PermissionLevel>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    pub fn build(self) -> Result<ToolRegistry> {
        let mut entries = Vec::with_capacity(self.tools.len());
        let mut index = HashMap::with_capacity(self.tools.len());
        for tool in self.tools {
            let mut definition = tool.definition();
            if index.contains_key(&definition.name) {
                return Err(ConductorError::Configuration(format!(
                    "duplicate tool name: {}",
                    definition.name
                )));
            }
            if let Some(level) = self.overrides.get(&definition.name) {
                tracing::debug!(tool = %definition.name, level = %level, "permission override");
                definition.permission_level = *level;
            }
            index.insert(definition.name.clone(), entries.len());
            entries.push(Entry { tool, definition });
        }
        for name in self.overrides.keys() {
            if !index.contains_key(name) {
                tracing::warn!(tool = %name, "permission override for unknown tool");
            }
        }
        Ok(ToolRegistry {
            entries: Arc::new(entries),
            index: Arc::new(index),
        })
    }
}
