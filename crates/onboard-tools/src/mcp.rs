//! Client for MCP tool servers over the streamable HTTP transport.
//!
//! The protocol side (handshake, session header, JSON or event-stream
//! responses) is handled by `rmcp`. This module keeps one running client
//! session per server, bounds every call with a timeout, and maps results
//! onto [`ToolOutput`].

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use onboard_types::{OnboardError, Result};
use rmcp::model::CallToolRequestParam;
use rmcp::service::{Peer, RunningService};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use serde_json::json;
use tokio::sync::Mutex;

use crate::tool::{RemoteTool, ToolDefinition, ToolOutput, Toolset};

type ClientSession = RunningService<RoleClient, ()>;

// ---------------------------------------------------------------------------
// McpToolset
// ---------------------------------------------------------------------------

/// Handle to one MCP server. Cloning shares the underlying session.
#[derive(Clone)]
pub struct McpToolset {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    timeout: Duration,
    session: Mutex<Option<ClientSession>>,
}

impl McpToolset {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, Duration::from_secs(30))
    }

    /// Timeout applied to the handshake and to every request.
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.into(),
                timeout,
                session: Mutex::new(None),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Call a tool by name without resolving it first.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolOutput> {
        let peer = self.peer().await?;
        tracing::debug!(tool = name, endpoint = %self.inner.endpoint, "Calling MCP tool");

        let params: CallToolRequestParam =
            serde_json::from_value(json!({ "name": name, "arguments": arguments }))?;
        let result = self.bounded(name, peer.call_tool(params)).await?;
        Ok(parse_call_result(&serde_json::to_value(&result)?))
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let peer = self.peer().await?;
        let tools = self.bounded("tools/list", peer.list_all_tools()).await?;
        Ok(parse_tool_list(&serde_json::to_value(&tools)?))
    }

    /// The live session's peer, connecting first if there is none.
    async fn peer(&self) -> Result<Peer<RoleClient>> {
        let mut guard = self.inner.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.peer().clone());
        }

        let transport = StreamableHttpClientTransport::from_uri(self.inner.endpoint.clone());
        let session = match tokio::time::timeout(self.inner.timeout, ().serve(transport)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                return Err(OnboardError::ToolError {
                    tool: "initialize".into(),
                    message: e.to_string(),
                })
            }
            Err(_) => return Err(self.timeout_error("initialize")),
        };
        tracing::info!(endpoint = %self.inner.endpoint, "MCP session initialized");

        let peer = session.peer().clone();
        *guard = Some(session);
        Ok(peer)
    }

    /// Drop the current session; the next call performs a fresh handshake.
    async fn reset(&self) {
        if let Some(session) = self.inner.session.lock().await.take() {
            tracing::debug!(endpoint = %self.inner.endpoint, "Discarding MCP session");
            tokio::spawn(async move {
                let _ = session.cancel().await;
            });
        }
    }

    /// Run one request under the timeout. Any failure discards the session,
    /// so an expired or broken session is replaced on the next call.
    async fn bounded<T, E: Display>(
        &self,
        target: &str,
        request: impl Future<Output = std::result::Result<T, E>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.inner.timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.reset().await;
                Err(OnboardError::ToolError {
                    tool: target.to_string(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                self.reset().await;
                Err(self.timeout_error(target))
            }
        }
    }

    fn timeout_error(&self, target: &str) -> OnboardError {
        OnboardError::RequestTimeout {
            target: target.to_string(),
            timeout_ms: self.inner.timeout.as_millis() as u64,
        }
    }
}

#[async_trait]
impl Toolset for McpToolset {
    async fn get_tool(&self, name: &str) -> Result<Option<Arc<dyn RemoteTool>>> {
        let found = self
            .list_tools()
            .await?
            .into_iter()
            .find(|def| def.name == name)
            .map(|definition| {
                Arc::new(McpTool {
                    definition,
                    server: self.clone(),
                }) as Arc<dyn RemoteTool>
            });
        Ok(found)
    }

    async fn definitions(&self) -> Result<Vec<ToolDefinition>> {
        self.list_tools().await
    }
}

// ---------------------------------------------------------------------------
// McpTool
// ---------------------------------------------------------------------------

struct McpTool {
    definition: ToolDefinition,
    server: McpToolset,
}

#[async_trait]
impl RemoteTool for McpTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<ToolOutput> {
        self.server.call_tool(&self.definition.name, arguments).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read a `tools/call` result in its wire shape.
fn parse_call_result(result: &serde_json::Value) -> ToolOutput {
    let content = result["content"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    let structured_content = result
        .get("structuredContent")
        .filter(|v| !v.is_null())
        .cloned();
    ToolOutput {
        is_error: result["isError"].as_bool().unwrap_or(false),
        content,
        structured_content,
    }
}

fn parse_tool_list(tools: &serde_json::Value) -> Vec<ToolDefinition> {
    tools
        .as_array()
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| {
                    Some(ToolDefinition {
                        name: t["name"].as_str()?.to_string(),
                        description: t["description"].as_str().unwrap_or_default().to_string(),
                        input_schema: t["inputSchema"].clone(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
