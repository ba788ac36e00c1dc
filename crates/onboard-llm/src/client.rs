use std::collections::HashMap;

use async_trait::async_trait;
use onboard_types::OnboardError;

use crate::{Request, Response};

/// A model backend the interpreter can send completions to.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, OnboardError>;
    /// Routing key used by [`Request::provider`].
    fn name(&self) -> &str;
    /// Model used when a request leaves `model` empty.
    fn default_model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut Request) {}
    fn after(&self, _request: &Request, _response: &mut Response) {}
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut Request) {
        tracing::info!(
            model = %request.model,
            messages = request.messages.len(),
            format = ?request.response_format,
            "LLM request"
        );
    }

    fn after(&self, _request: &Request, response: &mut Response) {
        tracing::info!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "LLM response"
        );
    }
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

pub struct LlmClient {
    providers: HashMap<String, Box<dyn ProviderAdapter>>,
    default_provider: Option<String>,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmClient {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: None,
            middleware: Vec::new(),
        }
    }

    /// Register a provider. The first one registered becomes the default.
    pub fn register_provider(&mut self, provider: impl ProviderAdapter + 'static) {
        let name = provider.name().to_string();
        if self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        self.providers.insert(name, Box::new(provider));
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, OnboardError> {
        let provider = self.resolve_provider(request)?;
        let mut req = request.clone();
        if req.model.is_empty() {
            req.model = provider.default_model().to_string();
        }

        for m in &self.middleware {
            m.before(&mut req);
        }

        let mut resp = provider.complete(&req).await?;

        for m in &self.middleware {
            m.after(&req, &mut resp);
        }

        Ok(resp)
    }

    fn resolve_provider(&self, request: &Request) -> Result<&dyn ProviderAdapter, OnboardError> {
        let name = match (&request.provider, &self.default_provider) {
            (Some(name), _) | (None, Some(name)) => name,
            (None, None) => {
                return Err(OnboardError::ConfigError("No providers registered".to_string()))
            }
        };
        self.providers
            .get(name)
            .map(|p| p.as_ref())
            .ok_or_else(|| OnboardError::ConfigError(format!("Provider '{name}' not registered")))
    }

    /// Create from environment variables (detect available API keys).
    pub fn from_env() -> Result<Self, OnboardError> {
        let adapter = crate::GeminiAdapter::from_env().map_err(|_| {
            OnboardError::ConfigError(
                "No LLM provider API key found in environment (GOOGLE_API_KEY or GEMINI_API_KEY)"
                    .to_string(),
            )
        })?;
        let mut client = Self::new().with_middleware(LoggingMiddleware);
        client.register_provider(adapter);
        Ok(client)
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
