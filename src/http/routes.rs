//! HTTP route definitions

use axum::{
    extract::{Extension, Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::{require_admin, AuthenticatedAdmin};
use crate::integrity::ViolationRecord;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // Public routes (no auth required, /ws checks its own token)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    // Admin routes
    let admin_routes = Router::new()
        .route(
            "/admin/violations/:account_id",
            get(violations_handler).delete(clear_violations_handler),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    participants: usize,
    creatures: usize,
    tracked_violators: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        participants: state.world.roster().len(),
        creatures: state.world.creature_count(),
        tracked_violators: state.ledger.tracked_accounts(),
    })
}

// ============================================================================
// Violation admin endpoints
// ============================================================================

#[derive(Serialize)]
struct ViolationsResponse {
    account_id: Uuid,
    records: Vec<ViolationRecord>,
}

#[derive(Serialize)]
struct ClearResponse {
    account_id: Uuid,
    cleared: bool,
}

fn parse_account_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid account id: {}", raw)))
}

async fn violations_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<ViolationsResponse>, AppError> {
    let account_id = parse_account_id(&raw_id)?;

    Ok(Json(ViolationsResponse {
        account_id,
        records: state.ledger.violations_for(account_id),
    }))
}

async fn clear_violations_handler(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthenticatedAdmin>,
    Path(raw_id): Path<String>,
) -> Result<Json<ClearResponse>, AppError> {
    let account_id = parse_account_id(&raw_id)?;

    if !state.ledger.clear(account_id) {
        return Err(AppError::NotFound(format!(
            "No violation history for {}",
            account_id
        )));
    }

    info!(
        account_id = %account_id,
        admin_id = %admin.account_id,
        "Violation history cleared"
    );

    Ok(Json(ClearResponse {
        account_id,
        cleared: true,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
