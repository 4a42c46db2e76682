mod live;
mod questions;
mod submissions;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    middleware::from_fn,
    response::IntoResponse,
    routing::{get, post},
};

use crate::{
    auth::TokenVerifier,
    challenge::{correlator::Correlator, intake::SubmissionIntake, store::ChallengeStore},
    metrics::MetricsRegistry,
    middleware::log_requests,
    notify::ConnectionRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<SubmissionIntake>,
    pub correlator: Arc<Correlator>,
    pub store: Arc<dyn ChallengeStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub metrics: Arc<MetricsRegistry>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/interview", get(live::connect))
        .route(
            "/interview/dsa-response",
            post(submissions::submit).get(submissions::fetch),
        )
        .route("/interview/dsa-response/callback", post(submissions::callback))
        .route("/interview/dsa-summary", get(submissions::summary))
        .route("/dsa-questions", post(questions::create))
        .route("/dsa-questions/{id}", get(questions::fetch))
        .layer(from_fn(log_requests))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}
