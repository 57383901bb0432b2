use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::refresh::{RefreshCoordinator, RefreshOutcome, Trigger};
use crate::snapshot::{serialize_ranked, PlayerPoints};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: RefreshCoordinator,
}

/// Build the Axum router: JSON API under /api, static dashboard files elsewhere.
pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/api/players", get(players_handler))
        .route("/api/refresh", get(refresh_handler).post(refresh_handler))
        .route("/api/status", get(status_handler))
        .route("/api/health", get(health_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

const LOADING_MESSAGE: &str = "Loading player data... Please refresh in 30 seconds.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayersResponse {
    success: bool,
    /// Highest points first
    #[serde(serialize_with = "serialize_ranked")]
    data: PlayerPoints,
    cached: bool,
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
    refreshing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

/// GET /api/players
async fn players_handler(State(state): State<Arc<AppState>>) -> Json<PlayersResponse> {
    let snapshot = state.coordinator.current_data();
    let refreshing = state.coordinator.is_refreshing();

    let body = match snapshot {
        Some(snap) => PlayersResponse {
            success: true,
            count: snap.len(),
            data: snap.points.clone(),
            cached: true,
            last_updated: Some(snap.fetched_at),
            version: Some(snap.version),
            refreshing,
            message: None,
        },
        None => PlayersResponse {
            success: true,
            data: PlayerPoints::new(),
            cached: false,
            count: 0,
            last_updated: None,
            version: None,
            refreshing,
            message: Some(LOADING_MESSAGE),
        },
    };
    Json(body)
}

#[derive(Debug, Deserialize)]
struct RefreshParams {
    key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_minutes: Option<u64>,
}

/// GET|POST /api/refresh?key=…
async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RefreshParams>,
) -> Response {
    let outcome = state.coordinator.ensure_fresh(Trigger::Manual {
        credential: params.key,
    });

    let reply = |status: StatusCode, success: bool, message: String| {
        (
            status,
            Json(RefreshResponse {
                success,
                message,
                retry_after_minutes: None,
            }),
        )
            .into_response()
    };

    match outcome {
        RefreshOutcome::Started => reply(StatusCode::ACCEPTED, true, "Refresh started".into()),
        RefreshOutcome::AlreadyInFlight => {
            reply(StatusCode::OK, true, "Refresh already in progress".into())
        }
        RefreshOutcome::Skipped(reason) => {
            reply(StatusCode::OK, true, format!("Refresh skipped: {}", reason))
        }
        RefreshOutcome::Unauthorized => {
            reply(StatusCode::UNAUTHORIZED, false, "Invalid refresh key".into())
        }
        RefreshOutcome::RateLimited { retry_after } => {
            let minutes = retry_after.as_secs() / 60;
            let unit = if minutes == 1 { "minute" } else { "minutes" };
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after.as_secs().to_string())],
                Json(RefreshResponse {
                    success: false,
                    message: format!(
                        "Data was refreshed recently. Please wait {} {} before refreshing again.",
                        minutes, unit
                    ),
                    retry_after_minutes: Some(minutes),
                }),
            )
                .into_response()
        }
    }
}

/// GET /api/status
async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.coordinator.status())
}

/// GET /api/health
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
