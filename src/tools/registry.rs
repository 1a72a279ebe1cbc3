use std::collections::HashMap;
use std::sync::Arc;

use super::{Tool, ToolDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate tool id '{0}'")]
    DuplicateTool(String),

    #[error("tool id must not be empty")]
    EmptyToolId,
}

/// Lookup from tool id to implementation, in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let id = tool.descriptor().id.clone();
        if id.trim().is_empty() {
            return Err(RegistryError::EmptyToolId);
        }
        if self.index.contains_key(&id) {
            return Err(RegistryError::DuplicateTool(id));
        }
        self.index.insert(id, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(id).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|tool| tool.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FnTool, RiskLevel};
    use futures::FutureExt;

    fn tool(id: &str) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolDescriptor::new(id, "test", RiskLevel::Low),
            |_, _| async { Ok(String::new()) }.boxed(),
        ))
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let result = ToolRegistry::new(vec![tool("grep"), tool("read_file"), tool("grep")]);
        assert_eq!(
            result.err(),
            Some(RegistryError::DuplicateTool("grep".to_string()))
        );
    }

    #[test]
    fn test_lookup_and_descriptor_order() {
        let registry = ToolRegistry::new(vec![tool("b"), tool("a")]).expect("registry");
        assert_eq!(registry.len(), 2);
        assert!(registry.get("a").is_some());
        assert!(registry.get("c").is_none());
        let ids: Vec<_> = registry.descriptors().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_rejects_blank_id() {
        assert_eq!(
            ToolRegistry::new(vec![tool("  ")]).err(),
            Some(RegistryError::EmptyToolId)
        );
    }
}
