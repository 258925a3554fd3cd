use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::data::store::SessionResolver;
use crate::error::{AnalysisError, FieldError};
use crate::models::{AcceptedPlan, AuthenticatedCaller};
use crate::services::AnalysisService;

pub struct AppState {
    pub analysis: AnalysisService,
    pub sessions: Arc<dyn SessionResolver>,
    pub config: AppConfig,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/history", get(history))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn run_server(state: Arc<AppState>) -> std::io::Result<()> {
    let addr = state.config.server.bind_addr.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API Server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("🛑 Shutdown signal received, draining connections...");
}

/// POST /analyze
async fn analyze(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AcceptedPlan>, AnalysisError> {
    let caller = resolve_caller(&state, &headers).await?;
    let plan = state.analysis.submit_analysis(caller.as_ref(), &body).await?;
    Ok(Json(plan))
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

/// GET /history
async fn history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Response {
    let result = match resolve_caller(&state, &headers).await {
        Ok(caller) => match history_limit(&state.config, caller.as_ref(), params) {
            Ok(limit) => state.analysis.history(caller.as_ref(), limit).await,
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(entries) => Json(json!({ "data": entries })).into_response(),
        Err(AnalysisError::PersistenceFailure(e)) => {
            error!("❌ [HISTORY] {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to load history." })),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// A bad `limit` only matters once the caller is known; anonymous
/// requests fall through to the 401.
fn history_limit(
    config: &AppConfig,
    caller: Option<&AuthenticatedCaller>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<usize, AnalysisError> {
    match params {
        Ok(Query(params)) => Ok(config.history_limit(params.limit)),
        Err(rejection) if caller.is_some() => {
            debug!("⚠️ [HISTORY] Bad query: {}", rejection.body_text());
            Err(AnalysisError::InvalidRequest(vec![FieldError::new(
                "limit",
                "Expected a positive integer",
            )]))
        }
        Err(_) => Ok(config.history_limit(None)),
    }
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Resolves the session carried by the request, if any.
///
/// Unknown and expired tokens resolve to `None`; only a store failure is an error.
async fn resolve_caller(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<AuthenticatedCaller>, AnalysisError> {
    let Some(token) = session_token(headers, &state.config.auth.session_cookie) else {
        return Ok(None);
    };
    Ok(state.sessions.resolve_session(token).await?)
}

/// Bearer token first, then the identity provider's session cookie.
pub fn session_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value)
}

fn field_map(fields: &[FieldError]) -> Value {
    let mut map = Map::new();
    for f in fields {
        let messages = map
            .entry(f.field.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = messages {
            list.push(Value::String(f.message.clone()));
        }
    }
    Value::Object(map)
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AnalysisError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, json!({ "error": "Unauthorized" }))
            }
            AnalysisError::InvalidRequest(fields) => {
                (StatusCode::BAD_REQUEST, json!({ "error": field_map(fields) }))
            }
            AnalysisError::MalformedTradePlan(fields) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Malformed trade plan.",
                    "fields": field_map(fields),
                }),
            ),
            AnalysisError::LowConfidence {
                confidence,
                threshold,
            } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Analysis confidence too low.",
                    "reason": self.to_string(),
                    "confidence": confidence,
                    "threshold": threshold,
                }),
            ),
            AnalysisError::AnalysisFailed(_) | AnalysisError::PersistenceFailure(_) => {
                error!("❌ Analysis process failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Failed to analyze chart." }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
