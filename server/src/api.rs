//! Control-plane HTTP endpoints.
//!
//! JSON over a localhost listener: liveness, statistics, cache control,
//! configuration reload, and live rule edits. Errors carry the core error
//! kind so scripts can branch without parsing messages.

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use shadowfs_core::config::{Config, RuleConfig};
use shadowfs_core::error::FsError;
use shadowfs_core::ops::ShadowFs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::info;

#[derive(Clone)]
pub struct ControlContext {
    pub fs: Arc<ShadowFs>,
    /// Live configuration; rule edits mutate this and recompile.
    pub config: Arc<Mutex<Config>>,
    pub config_path: Option<PathBuf>,
    pub start_time: Instant,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(err: &FsError) -> ApiError {
    let status = match err {
        FsError::NotFound(_) => StatusCode::NOT_FOUND,
        FsError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        FsError::Conflict(_) => StatusCode::CONFLICT,
        FsError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        FsError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string(), "kind": err.kind() })))
}

pub fn router(ctx: ControlContext) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/stats", get(stats))
        .route("/layers", get(layers))
        .route("/cache/clear", post(cache_clear))
        .route("/cache/invalidate", post(cache_invalidate))
        .route("/config/reload", post(config_reload))
        .route("/rules/add", post(rules_add))
        .route("/rules/remove", post(rules_remove))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Liveness plus uptime.
async fn status(State(ctx): State<ControlContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": ctx.start_time.elapsed().as_secs(),
    }))
}

/// Full statistics snapshot from the operations facade.
async fn stats(State(ctx): State<ControlContext>) -> impl IntoResponse {
    Json(ctx.fs.statistics())
}

async fn layers(State(ctx): State<ControlContext>) -> impl IntoResponse {
    Json(ctx.fs.statistics().layers)
}

async fn cache_clear(State(ctx): State<ControlContext>) -> impl IntoResponse {
    ctx.fs.clear_caches();
    info!("caches cleared via control plane");
    Json(serde_json::json!({ "cleared": true }))
}

#[derive(Deserialize)]
struct InvalidateRequest {
    path: String,
}

async fn cache_invalidate(
    State(ctx): State<ControlContext>,
    Json(body): Json<InvalidateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.fs.invalidate(&body.path).map_err(|e| api_error(&e))?;
    Ok(Json(serde_json::json!({ "invalidated": body.path })))
}

async fn config_reload(
    State(ctx): State<ControlContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let path = ctx.config_path.as_ref().ok_or_else(|| {
        api_error(&FsError::InvalidInput("no configuration file to reload".into()))
    })?;
    let next = Config::load(path).map_err(|e| api_error(&e))?;
    ctx.fs.reload(&next).map_err(|e| api_error(&e))?;
    *ctx.config.lock().unwrap_or_else(|p| p.into_inner()) = next;
    info!(config = %path.display(), "configuration reloaded");
    Ok(Json(serde_json::json!({ "reloaded": true })))
}

async fn rules_add(
    State(ctx): State<ControlContext>,
    Json(rule): Json<RuleConfig>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut config = ctx.config.lock().unwrap_or_else(|p| p.into_inner());
    if config.rules.iter().any(|r| r.name == rule.name) {
        return Err(api_error(&FsError::Conflict(format!("rule '{}' exists", rule.name))));
    }
    config.rules.push(rule);
    let compiled = config.build_rules().map_err(|e| {
        config.rules.pop();
        api_error(&e)
    })?;
    let count = compiled.len();
    ctx.fs.resolver().set_rules(compiled);
    info!(rules = count, "rule added via control plane");
    Ok(Json(serde_json::json!({ "rules": count })))
}

#[derive(Deserialize)]
struct RemoveRuleRequest {
    name: String,
}

async fn rules_remove(
    State(ctx): State<ControlContext>,
    Json(body): Json<RemoveRuleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut config = ctx.config.lock().unwrap_or_else(|p| p.into_inner());
    let before = config.rules.len();
    config.rules.retain(|r| r.name != body.name);
    if config.rules.len() == before {
        return Err(api_error(&FsError::NotFound(format!("rule '{}'", body.name))));
    }
    let compiled = config.build_rules().map_err(|e| api_error(&e))?;
    let count = compiled.len();
    ctx.fs.resolver().set_rules(compiled);
    info!(rule = body.name.as_str(), "rule removed via control plane");
    Ok(Json(serde_json::json!({ "rules": count })))
}

/// Serve the control plane until the process exits.
pub async fn serve(listen: &str, ctx: ControlContext) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(listen, "control plane listening");
    axum::serve(listener, router(ctx)).await
}
