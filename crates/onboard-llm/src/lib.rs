//! LLM client for the rule interpreter.
//!
//! Provides the `ProviderAdapter` trait, the `GeminiAdapter` implementation,
//! a middleware chain, and `LlmClient` for routing requests by provider.

mod client;
mod gemini;
mod types;

pub use client::*;
pub use gemini::GeminiAdapter;
pub use types::*;
