//! Runtime configuration and service wiring.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, ValueEnum};

use onboard_llm::LlmClient;
use onboard_pipeline::service::{DEFAULT_APP_NAME, DEFAULT_USER_ID};
use onboard_pipeline::{
    InMemorySessionStore, LlmInterpreter, OnboardingService, PipelineController, RuleInterpreter,
    SessionStore, SqliteSessionStore, StaticInterpreter, ToolsetDeployer, ToolsetLookup,
};
use onboard_tools::{McpToolset, Toolset};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InterpreterMode {
    /// Ask Gemini to extract the rule from the request.
    Llm,
    /// Always produce the built-in demo rule.
    Static,
}

/// Settings shared by every subcommand. Each flag falls back to an
/// environment variable.
#[derive(Debug, Clone, Args)]
pub struct OnboardConfig {
    /// MCP tool server endpoint
    #[arg(long, global = true, env = "DQ_MCP_URL", default_value = "http://127.0.0.1:8086/mcp")]
    pub mcp_url: String,

    /// Tool resolving a repository name to its connectivity id
    #[arg(
        long,
        global = true,
        env = "DQ_LOOKUP_TOOL",
        default_value = "get_connectivity_id_by_repository_name"
    )]
    pub lookup_tool: String,

    /// Tool that persists the rule configuration
    #[arg(long, global = true, env = "DQ_DEPLOY_TOOL", default_value = "onboard_rule")]
    pub deploy_tool: String,

    #[arg(long, global = true, env = "DQ_LOOKUP_TIMEOUT_MS", default_value_t = 10_000)]
    pub lookup_timeout_ms: u64,

    #[arg(long, global = true, env = "DQ_DEPLOY_TIMEOUT_MS", default_value_t = 30_000)]
    pub deploy_timeout_ms: u64,

    #[arg(long, global = true, env = "DQ_INTERPRETER", value_enum, default_value_t = InterpreterMode::Llm)]
    pub interpreter: InterpreterMode,

    /// Gemini model used by the llm interpreter
    #[arg(long, global = true, env = "DQ_MODEL", default_value = "gemini-2.5-flash")]
    pub model: String,

    /// SQLite URL for sessions (e.g. sqlite://sessions.db); in-memory when unset
    #[arg(long, global = true, env = "DQ_SESSION_DB")]
    pub session_db: Option<String>,

    #[arg(long, global = true, default_value = DEFAULT_APP_NAME)]
    pub app_name: String,

    #[arg(long, global = true, default_value = DEFAULT_USER_ID)]
    pub user_id: String,

    /// Append a plain-text copy of the log to this file
    #[arg(long, global = true, env = "DQ_AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,
}

impl OnboardConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_millis(self.deploy_timeout_ms)
    }

    fn interpreter(&self) -> anyhow::Result<Arc<dyn RuleInterpreter>> {
        match self.interpreter {
            InterpreterMode::Static => Ok(Arc::new(StaticInterpreter)),
            InterpreterMode::Llm => {
                let client = LlmClient::from_env().context(
                    "the llm interpreter needs GOOGLE_API_KEY or GEMINI_API_KEY (or use --interpreter static)",
                )?;
                Ok(Arc::new(LlmInterpreter::new(Arc::new(client), &self.model)))
            }
        }
    }

    async fn session_store(&self) -> anyhow::Result<Arc<dyn SessionStore>> {
        match &self.session_db {
            Some(url) => {
                let store = SqliteSessionStore::connect(url)
                    .await
                    .with_context(|| format!("opening session database {url}"))?;
                Ok(Arc::new(store))
            }
            None => Ok(Arc::new(InMemorySessionStore::new())),
        }
    }
}

/// Wire the interpreter, tool bridges, and session store into a service.
pub async fn build_service(config: &OnboardConfig) -> anyhow::Result<OnboardingService> {
    let interpreter = config.interpreter()?;

    // Per-request ceiling for the MCP client; the lookup applies its own tighter bound.
    let request_timeout = config.lookup_timeout().max(config.deploy_timeout());
    let toolset: Arc<dyn Toolset> = Arc::new(McpToolset::with_timeout(&config.mcp_url, request_timeout));

    let lookup = ToolsetLookup::new(toolset.clone(), &config.lookup_tool, config.lookup_timeout());
    let deployer = ToolsetDeployer::new(toolset, &config.deploy_tool, config.deploy_timeout());
    let controller = PipelineController::onboarding(interpreter, Arc::new(lookup), Arc::new(deployer));

    let store = config.session_store().await?;
    tracing::info!(
        mcp_url = %config.mcp_url,
        interpreter = ?config.interpreter,
        persistent_sessions = config.session_db.is_some(),
        "Onboarding service configured"
    );

    Ok(OnboardingService::new(Arc::new(controller), store)
        .with_identity(&config.app_name, &config.user_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: OnboardConfig,
    }

    #[test]
    fn defaults_match_documented_values() {
        let cli = TestCli::try_parse_from(["dq-onboard"]).unwrap();
        let c = cli.config;
        assert_eq!(c.lookup_tool, "get_connectivity_id_by_repository_name");
        assert_eq!(c.deploy_tool, "onboard_rule");
        assert_eq!(c.lookup_timeout(), Duration::from_secs(10));
        assert_eq!(c.app_name, "dq_rule_onboarding_app");
        assert!(c.session_db.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "dq-onboard",
            "--interpreter",
            "static",
            "--lookup-timeout-ms",
            "250",
            "--mcp-url",
            "http://tools:9000/mcp",
        ])
        .unwrap();
        assert_eq!(cli.config.interpreter, InterpreterMode::Static);
        assert_eq!(cli.config.lookup_timeout_ms, 250);
        assert_eq!(cli.config.mcp_url, "http://tools:9000/mcp");
    }

    #[tokio::test]
    async fn static_mode_builds_without_api_key() {
        let cli = TestCli::try_parse_from(["dq-onboard", "--interpreter", "static"]).unwrap();
        assert!(build_service(&cli.config).await.is_ok());
    }
}
