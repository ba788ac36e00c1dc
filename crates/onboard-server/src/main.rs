//! dq-onboard: turn data-quality rule requests into deployed rule configurations.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;

use onboard_pipeline::{check_business_rules, check_completeness, parse_descriptor, OnboardRequest};
use onboard_server::{build_service, logging, router, OnboardConfig};
use onboard_types::RawRuleDetails;

#[derive(Parser)]
#[command(name = "dq-onboard", version, about = "Data-quality rule onboarding pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    config: OnboardConfig,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the onboarding API over HTTP
    Serve {
        #[arg(long, env = "DQ_BIND", default_value = "127.0.0.1:8083")]
        bind: SocketAddr,
    },

    /// Run the pipeline once and print its output
    Run {
        /// The rule request in plain language
        #[arg(short, long)]
        message: String,

        /// Session to continue (default: a new one)
        #[arg(short, long)]
        session_id: Option<String>,
    },

    /// Check a rule descriptor file offline (no lookup, no deployment)
    Check {
        /// Path to the descriptor JSON
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.config.audit_log.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => cmd_serve(&cli.config, bind).await?,
        Commands::Run {
            message,
            session_id,
        } => cmd_run(&cli.config, message, session_id, cli.verbose).await?,
        Commands::Check { file } => cmd_check(&file)?,
    }

    Ok(())
}

async fn cmd_serve(config: &OnboardConfig, bind: SocketAddr) -> anyhow::Result<()> {
    let service = build_service(config).await?;
    let app = router(Arc::new(service));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("listening on http://{}", bind);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn cmd_run(
    config: &OnboardConfig,
    message: String,
    session_id: Option<String>,
    verbose: bool,
) -> anyhow::Result<()> {
    let service = build_service(config).await?;
    let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if verbose {
        let mut events = service.events().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                eprintln!("[event] {:?}", event);
            }
        });
    }

    println!("Session: {}", session_id);
    let mut chunks = service
        .stream(OnboardRequest {
            message,
            session_id,
        })
        .await?;
    while let Some(text) = chunks.next().await {
        println!("{}", text);
    }
    Ok(())
}

fn cmd_check(path: &Path) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(path)?;

    let descriptor = match parse_descriptor(&RawRuleDetails::Text(source)) {
        Ok(d) => d,
        Err(msg) => {
            println!("[ERROR] {}", msg);
            std::process::exit(1);
        }
    };

    let mut problems = Vec::new();
    if descriptor.repository().is_none() {
        problems.push("repository_name is missing".to_string());
    }
    if let Err(msg) = check_completeness(&descriptor) {
        problems.push(msg);
    }
    if let Err(msg) = check_business_rules(&descriptor.attributes) {
        problems.push(msg);
    }

    if problems.is_empty() {
        println!(
            "Rule '{}' is valid ({} attribute(s))",
            descriptor.rule_name,
            descriptor.attributes.len()
        );
        return Ok(());
    }
    for p in &problems {
        println!("[ERROR] {}", p);
    }
    std::process::exit(1);
}
