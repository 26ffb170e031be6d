use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::ws::ws_video;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use smilage_core::{Capability, CapabilitySummary};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/captures", get(list_captures).delete(delete_all_captures))
        .route("/captures/:filename", delete(delete_capture))
        .route("/models", get(list_models))
        .route("/models/:capability/:key", post(switch_model));

    let cors = cors_layer(&state.config.cors_origins);
    let captures = ServeDir::new(state.gallery.dir());

    let mut app = Router::new()
        .nest("/api", api)
        .route("/ws/video", get(ws_video))
        .route("/health", get(health))
        .nest_service("/captures", captures);

    let static_dir = &state.config.static_dir;
    if static_dir.is_dir() {
        tracing::info!(dir = %static_dir.display(), "serving frontend");
        app = app.fallback_service(ServeDir::new(static_dir));
    } else {
        tracing::debug!(dir = %static_dir.display(), "no frontend build, static fallback disabled");
    }

    app.layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];

    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_methods(methods)
            .allow_headers(Any)
            .allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_methods(methods)
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
        .allow_credentials(true)
        .allow_origin(origins)
}

async fn health() -> &'static str {
    "ok"
}

async fn list_captures(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let images = state.gallery.list()?;
    Ok(Json(json!({ "images": images })))
}

async fn delete_capture(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Json<Value>> {
    state.gallery.delete(&filename)?;
    Ok(Json(json!({ "status": "success", "filename": filename })))
}

async fn delete_all_captures(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let deleted = state.gallery.delete_all()?;
    Ok(Json(json!({ "status": "success", "deleted_count": deleted })))
}

async fn list_models(State(state): State<AppState>) -> Json<Vec<CapabilitySummary>> {
    Json(state.models().summary())
}

async fn switch_model(
    State(state): State<AppState>,
    Path((capability, key)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let capability = capability
        .parse::<Capability>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if !state.models().switch_active(capability, &key) {
        return Err(ApiError::NotFound(format!("no {capability} backend named {key}")));
    }
    tracing::info!(%capability, %key, "active backend switched");
    Ok(Json(json!({ "status": "success", "capability": capability, "active": key })))
}
