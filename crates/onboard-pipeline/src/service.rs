//! Streaming entry point: one request in, user-visible text chunks out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use onboard_types::{ChunkKind, OnboardError, OutputChunk, Result, RunContext, Turn};

use crate::controller::PipelineController;
use crate::events::EventEmitter;
use crate::session::{get_or_create, SessionStore};

pub const DEFAULT_APP_NAME: &str = "dq_rule_onboarding_app";
pub const DEFAULT_USER_ID: &str = "2323ad05035";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardRequest {
    pub message: String,
    pub session_id: String,
}

/// Rewrite a validation sentinel for display.
fn display_validation_error(text: &str) -> String {
    match text.strip_prefix("VALIDATION_ERROR: ") {
        Some(rest) => format!("❌ {rest}"),
        None => text.to_string(),
    }
}

pub struct OnboardingService {
    controller: Arc<PipelineController>,
    store: Arc<dyn SessionStore>,
    app_name: String,
    user_id: String,
}

impl OnboardingService {
    pub fn new(controller: Arc<PipelineController>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            controller,
            store,
            app_name: DEFAULT_APP_NAME.to_string(),
            user_id: DEFAULT_USER_ID.to_string(),
        }
    }

    pub fn with_identity(mut self, app_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self.user_id = user_id.into();
        self
    }

    pub fn events(&self) -> &EventEmitter {
        self.controller.events()
    }

    /// Start a run and return its user-visible output.
    ///
    /// Progress chunks are dropped. The first validation error is sent with
    /// its code replaced by `❌` and closes the stream; the run itself still
    /// finishes in the background and its session is saved.
    pub async fn stream(&self, request: OnboardRequest) -> Result<UnboundedReceiverStream<String>> {
        if request.message.trim().is_empty() {
            return Err(OnboardError::InvalidRequest("message must not be empty".into()));
        }
        if request.session_id.trim().is_empty() {
            return Err(OnboardError::InvalidRequest(
                "session_id must not be empty".into(),
            ));
        }

        let mut session = get_or_create(
            self.store.as_ref(),
            &self.app_name,
            &self.user_id,
            &request.session_id,
        )
        .await?;

        let (text_tx, text_rx) = mpsc::unbounded_channel::<String>();
        let controller = self.controller.clone();
        let store = self.store.clone();

        tokio::spawn(async move {
            let mut ctx = RunContext::new(&request.session_id, &request.message)
                .with_history(session.history.clone());
            let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<OutputChunk>();

            let run = async {
                let tx = chunk_tx;
                controller.run(&mut ctx, &tx).await
            };
            let forward = async move {
                let mut text_tx = Some(text_tx);
                let mut shown = Vec::new();
                while let Some(chunk) = chunk_rx.recv().await {
                    if !chunk.is_user_visible() {
                        continue;
                    }
                    let Some(tx) = &text_tx else { continue };
                    let text = match chunk.kind {
                        ChunkKind::ValidationError => display_validation_error(&chunk.text),
                        _ => chunk.text,
                    };
                    let _ = tx.send(text.clone());
                    shown.push(text);
                    if chunk.kind == ChunkKind::ValidationError {
                        text_tx = None;
                    }
                }
                (shown, text_tx)
            };

            let (result, (mut shown, text_tx)) = tokio::join!(run, forward);
            if let Err(e) = &result {
                tracing::error!(session_id = %ctx.session_id, error = %e, "Pipeline run aborted");
                let text = format!("❌ Rule onboarding failed: {e}");
                if let Some(tx) = &text_tx {
                    let _ = tx.send(text.clone());
                }
                shown.push(text);
            }
            drop(text_tx);

            // Appending re-reads the stored history, so a concurrent run on
            // the same session does not drop these turns.
            let turns = [
                Turn::user(&request.message),
                Turn::assistant(shown.join("\n")),
            ];
            session.state = ctx.snapshot();
            if let Err(e) = store.append(&session, &turns).await {
                tracing::error!(session_id = %ctx.session_id, error = %e, "Failed to save session");
            }
        });

        Ok(UnboundedReceiverStream::new(text_rx))
    }
}
