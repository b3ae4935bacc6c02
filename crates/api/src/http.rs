use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use legalese_history::{HistoryRecord, HistoryStore, NewRecord};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use ulid::Ulid;

use crate::bootstrap::{Services, bootstrap};
use crate::config::{ServiceConfig, StartupError};
use crate::intake;
use crate::orchestrator::{self, Capability, OrchestratorError};
use crate::origin::OriginPolicy;

pub const MAX_HISTORY_LIMIT: usize = 50;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    origin_policy: OriginPolicy,
    capability: Capability,
    history: HistoryStore,
}

impl AppState {
    pub fn new(config: ServiceConfig, services: Services) -> Result<Self, StartupError> {
        let origin_policy = OriginPolicy::new(&config.allowed_origins, &config.origin_patterns)
            .map_err(|err| StartupError {
                code: "ERR_INVALID_CONFIG",
                message: format!("invalid origin pattern: {}", err),
            })?;

        Ok(Self {
            config,
            origin_policy,
            capability: services.capability,
            history: services.history,
        })
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: ServiceConfig) -> Result<Router, StartupError> {
    let services = bootstrap(&config).await;
    Ok(app(AppState::new(config, services)?))
}

pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/health", get(health))
        .route("/api/simplify", post(simplify))
        .route("/api/history", get(history))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            apply_origin_policy,
        ));

    Router::new()
        .route("/", get(root))
        .route("/metrics", get(metrics))
        .merge(api)
        .with_state(state)
}

/// Answers preflight requests directly and decorates every other `/api` response with the
/// CORS headers the origin policy grants. Preflights for methods outside the policy get 403.
async fn apply_origin_policy(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let origin = req.headers().get(header::ORIGIN).cloned();

    let request_id = extract_request_id(req.headers());
    let request_id = HeaderValue::from_str(&request_id)
        .unwrap_or_else(|_| HeaderValue::from_static("invalid"));
    req.headers_mut().insert(REQUEST_ID_HEADER, request_id.clone());

    let preflight_denied = req.method() == Method::OPTIONS
        && req
            .headers()
            .get(header::ACCESS_CONTROL_REQUEST_METHOD)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|method| !state.origin_policy.allows_method(method));

    let mut response = if preflight_denied {
        StatusCode::FORBIDDEN.into_response()
    } else if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    if preflight_denied {
        response
            .headers_mut()
            .append(header::VARY, HeaderValue::from_static("Origin"));
    } else {
        state
            .origin_policy
            .apply_headers(response.headers_mut(), origin.as_ref());
    }
    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}

#[derive(Debug, Serialize)]
struct RootResponse {
    message: &'static str,
    status: &'static str,
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Legal Document Simplifier API",
        status: "running",
    })
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
    simplifier_ready: bool,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let request_started = Instant::now();
    let ready = state.capability.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    crate::metrics::observe_http_request(
        "/api/health",
        "GET",
        status.as_u16(),
        request_started.elapsed(),
    );

    (
        status,
        Json(HealthResponse {
            status: if ready { "ok" } else { "error" },
            message: if ready {
                "Service is running."
            } else {
                "AI Simplifier is not available."
            },
            simplifier_ready: ready,
        }),
    )
}

#[derive(Debug, Serialize)]
struct SimplifyResponse {
    success: bool,
    simplified_text: String,
}

async fn simplify(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> Result<Json<SimplifyResponse>, ApiError> {
    let request_started = Instant::now();
    let request_id = extract_request_id(req.headers());
    let user_session = caller_identity(req.headers(), peer, state.config.trust_forwarded_for);

    let span = tracing::info_span!(
        "http.simplify",
        request_id = %request_id,
        user_session = %user_session,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    let result = async {
        let submission = intake::normalize(req).await.map_err(|err| {
            crate::metrics::observe_simplification("invalid");
            tracing::info!(reason = %err, "rejected document submission");
            json_error(StatusCode::BAD_REQUEST, err.to_string())
        })?;

        let simplified_text = orchestrator::simplify(&state.capability, &submission)
            .await
            .map_err(|err| orchestrator_error_response(&err))?;
        crate::metrics::observe_simplification("ok");

        let saved = state
            .history
            .record(NewRecord {
                user_session: &user_session,
                original_text: &submission.text,
                simplified_text: &simplified_text,
                filename: submission.filename.as_deref(),
            })
            .await;
        crate::metrics::observe_history_write(match saved {
            Some(_) => "ok",
            None if !state.history.is_configured() => "skipped",
            None => "error",
        });

        Ok::<_, ApiError>(Json(SimplifyResponse {
            success: true,
            simplified_text,
        }))
    }
    .instrument(span.clone())
    .await;

    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    };
    let latency = request_started.elapsed();
    span.record("latency_ms", latency.as_millis() as u64);
    span.record("outcome", if result.is_ok() { "ok" } else { "error" });
    crate::metrics::observe_http_request("/api/simplify", "POST", status.as_u16(), latency);

    result
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    success: bool,
    history: Vec<HistoryRecord>,
}

async fn history(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Json<HistoryResponse> {
    let request_started = Instant::now();
    let request_id = extract_request_id(&headers);
    let user_session = caller_identity(&headers, peer, state.config.trust_forwarded_for);
    let limit = query
        .ok()
        .and_then(|Query(q)| q.limit)
        .unwrap_or(state.config.history_default_limit)
        .clamp(1, MAX_HISTORY_LIMIT);

    let span = tracing::info_span!(
        "http.history",
        request_id = %request_id,
        user_session = %user_session,
        limit = limit,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    let history = state
        .history
        .fetch_recent(&user_session, limit)
        .instrument(span.clone())
        .await;

    let latency = request_started.elapsed();
    span.record("latency_ms", latency.as_millis() as u64);
    span.record("outcome", "ok");
    crate::metrics::observe_http_request("/api/history", "GET", 200, latency);

    Json(HistoryResponse {
        success: true,
        history,
    })
}

/// History is keyed by the caller's network address; there is no login.
fn caller_identity(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for
        && let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    peer.ip().to_string()
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

fn json_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: error.into(),
        }),
    )
}

fn orchestrator_error_response(err: &OrchestratorError) -> ApiError {
    match err {
        OrchestratorError::CapabilityUnavailable => {
            crate::metrics::observe_simplification("unavailable");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "AI Simplifier not available",
            )
        }
        OrchestratorError::SimplificationFailed(_) => {
            crate::metrics::observe_simplification("failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unexpected error during simplification",
            )
        }
    }
}
