//! HTTP surface: `POST /onboard-rule` streams the run's text, `GET /health`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;

use onboard_pipeline::{OnboardRequest, OnboardingService};
use onboard_types::OnboardError;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OnboardingService>,
}

pub fn router(service: Arc<OnboardingService>) -> Router {
    Router::new()
        .route("/onboard-rule", post(onboard_rule))
        .route("/health", get(health))
        .with_state(AppState { service })
}

async fn health() -> &'static str {
    "ok"
}

fn error_status(err: &OnboardError) -> StatusCode {
    err.http_status()
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn onboard_rule(
    State(state): State<AppState>,
    Json(request): Json<OnboardRequest>,
) -> Response {
    tracing::info!(session_id = %request.session_id, "Onboarding request received");

    match state.service.stream(request).await {
        Ok(chunks) => {
            // One line per chunk.
            let body = Body::from_stream(chunks.map(|text| Ok::<_, Infallible>(format!("{text}\n"))));
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                body,
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Onboarding request rejected");
            (error_status(&e), e.to_string()).into_response()
        }
    }
}
