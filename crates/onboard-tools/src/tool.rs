use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Definition of a tool as advertised by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// Result of one tool invocation.
///
/// A call that reached the tool but was rejected by it comes back with
/// `is_error` set; transport failures are `Err` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub is_error: bool,
    pub content: Vec<String>,
    pub structured_content: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![text.into()],
            structured_content: None,
        }
    }

    pub fn structured(value: serde_json::Value) -> Self {
        Self {
            is_error: false,
            content: vec![value.to_string()],
            structured_content: Some(value),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![text.into()],
            structured_content: None,
        }
    }

    /// All text content joined with newlines.
    pub fn text(&self) -> String {
        self.content.join("\n")
    }
}

/// Trait for tools hosted behind a remote tool server.
#[async_trait]
pub trait RemoteTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn call(&self, arguments: serde_json::Value) -> onboard_types::Result<ToolOutput>;
}

/// A source of tools that can be resolved by name.
#[async_trait]
pub trait Toolset: Send + Sync {
    /// Resolve a tool by name. `Ok(None)` means the server does not offer it.
    async fn get_tool(&self, name: &str) -> onboard_types::Result<Option<Arc<dyn RemoteTool>>>;

    async fn definitions(&self) -> onboard_types::Result<Vec<ToolDefinition>>;
}

/// Registry that holds named tools in process and provides lookup.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn RemoteTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl RemoteTool + 'static) {
        let def = tool.definition();
        self.tools.insert(def.name, Arc::new(tool));
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RemoteTool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl Toolset for ToolRegistry {
    async fn get_tool(&self, name: &str) -> onboard_types::Result<Option<Arc<dyn RemoteTool>>> {
        Ok(self.get(name))
    }

    async fn definitions(&self) -> onboard_types::Result<Vec<ToolDefinition>> {
        Ok(self.tools.values().map(|t| t.definition()).collect())
    }
}
