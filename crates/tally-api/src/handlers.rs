//! HTTP handlers.
//!
//! Validation failures map to 400 (404 on lookups), unknown metrics to
//! 404. Persistence problems never reach clients; the synchronizer logs
//! and swallows them.

use askama::Template;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, error, warn};

use tally_state::{Metric, MetricDto, MetricKey, StateError};

use crate::ApiState;

const MALFORMED_REQUEST: &str = "malformed request";
const UNSUPPORTED_MEDIA_TYPE: &str = "unsupported media type";
const METRIC_NOT_FOUND: &str = "metric not found";
const SERVER_ERROR: &str = "problems with server";

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (status, Json(ErrorBody { error: msg })).into_response()
}

fn status_for(e: &StateError) -> StatusCode {
    if e.is_validation() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// `Content-Type: application/json`, parameters such as charset allowed.
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

// ── Updates ────────────────────────────────────────────────────

/// POST /update/{kind}/{name}/{value}
pub async fn update_from_path(
    State(state): State<ApiState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Response {
    if value.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let metric = match Metric::parse(&kind, &name, &value) {
        Ok(metric) => metric,
        Err(e) => {
            debug!(%kind, %name, %value, error = %e, "path update rejected");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    match state.sync.collect(metric).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => status_for(&e).into_response(),
    }
}

/// POST /update/
pub async fn update_json(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    if !is_json(&headers) {
        return error_response(UNSUPPORTED_MEDIA_TYPE, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
    let metric = match serde_json::from_slice::<MetricDto>(&body)
        .map_err(|e| e.to_string())
        .and_then(|dto| dto.into_metric().map_err(|e| e.to_string()))
    {
        Ok(metric) => metric,
        Err(e) => {
            debug!(error = %e, "json update rejected");
            return error_response(MALFORMED_REQUEST, StatusCode::BAD_REQUEST);
        }
    };

    match state.sync.collect(metric).await {
        Ok(stored) => Json(MetricDto::from(&stored)).into_response(),
        Err(e) if e.is_validation() => error_response(MALFORMED_REQUEST, StatusCode::BAD_REQUEST),
        Err(e) => {
            error!(error = %e, "json update failed");
            error_response(SERVER_ERROR, StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /updates/
///
/// Every element is validated before anything is applied; the batch is
/// then aggregated atomically.
pub async fn updates_json(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    if !is_json(&headers) {
        return error_response(UNSUPPORTED_MEDIA_TYPE, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
    let metrics = match serde_json::from_slice::<Vec<MetricDto>>(&body)
        .map_err(|e| e.to_string())
        .and_then(|dtos| {
            dtos.into_iter()
                .map(MetricDto::into_metric)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())
        }) {
        Ok(metrics) => metrics,
        Err(e) => {
            debug!(error = %e, "batch update rejected");
            return error_response(MALFORMED_REQUEST, StatusCode::BAD_REQUEST);
        }
    };

    match state.sync.collect_batch(metrics).await {
        Ok(stored) => Json(stored.iter().map(MetricDto::from).collect::<Vec<_>>()).into_response(),
        Err(e) if e.is_validation() => error_response(MALFORMED_REQUEST, StatusCode::BAD_REQUEST),
        Err(e) => {
            error!(error = %e, "batch update failed");
            error_response(SERVER_ERROR, StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// ── Lookups ────────────────────────────────────────────────────

/// GET /value/{kind}/{name}
pub async fn value_from_path(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    let Ok(key) = MetricKey::parse(&kind, &name) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.sync.get(&key) {
        Some(metric) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            metric.display_value(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// POST /value/
pub async fn value_json(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    if !is_json(&headers) {
        return error_response(UNSUPPORTED_MEDIA_TYPE, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
    let dto = match serde_json::from_slice::<MetricDto>(&body) {
        Ok(dto) => dto,
        Err(e) => {
            debug!(error = %e, "value lookup rejected");
            return error_response(MALFORMED_REQUEST, StatusCode::BAD_REQUEST);
        }
    };

    match dto.key().ok().and_then(|key| state.sync.get(&key)) {
        Some(metric) => Json(MetricDto::from(&metric)).into_response(),
        None => error_response(METRIC_NOT_FOUND, StatusCode::NOT_FOUND),
    }
}

// ── Diagnostics ────────────────────────────────────────────────

/// GET /ping
pub async fn ping(State(state): State<ApiState>) -> StatusCode {
    match state.sync.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(backend = state.sync.backend_name(), error = %e, "ping failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

struct MetricRow {
    id: String,
    kind: &'static str,
    value: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    rows: Vec<MetricRow>,
}

/// GET /
pub async fn index(State(state): State<ApiState>) -> Html<String> {
    let mut metrics = state.sync.get_all();
    if metrics.is_empty() {
        return Html("Empty storage".to_string());
    }
    metrics.sort_by(|a, b| (a.id(), a.kind().as_str()).cmp(&(b.id(), b.kind().as_str())));

    let rows = metrics
        .iter()
        .map(|m| MetricRow {
            id: m.id().to_string(),
            kind: m.kind().as_str(),
            value: m.display_value(),
        })
        .collect();
    Html(IndexTemplate { rows }.render().unwrap_or_else(|e| {
        format!("<pre>Template error: {e}</pre>")
    }))
}
