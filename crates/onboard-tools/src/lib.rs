//! Remote tool plumbing for the onboarding bridges.
//!
//! Provides the `RemoteTool` trait, `ToolOutput`, the `Toolset` lookup trait,
//! an in-process `ToolRegistry`, and `McpToolset`, a client for MCP tool
//! servers speaking JSON-RPC over HTTP.

pub mod mcp;
pub mod tool;

pub use mcp::McpToolset;
pub use tool::{RemoteTool, ToolDefinition, ToolOutput, ToolRegistry, Toolset};
