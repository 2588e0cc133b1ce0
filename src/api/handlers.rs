//! HTTP handlers for the dashboard-facing read API
//!
//! Every handler wraps its store call in the uniform envelope; failures
//! map onto the closed error-code taxonomy.

use super::envelope::{http_status, Envelope, PageMeta, ResponseMeta};
use super::params::{self, EntryQueryParams};
use super::rate_limit::FixedWindowLimiter;
use crate::config::{ApiConfig, RuntimeMode};
use crate::error::CoreError;
use crate::store::EntryStore;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<EntryStore>,
    pub mode: RuntimeMode,
    pub limiter: Option<Arc<FixedWindowLimiter>>,
}

impl ApiState {
    pub fn new(store: Arc<EntryStore>, mode: RuntimeMode, api_config: &ApiConfig) -> Self {
        Self {
            store,
            mode,
            limiter: api_config
                .rate_limit_per_minute
                .map(|limit| Arc::new(FixedWindowLimiter::per_minute(limit))),
        }
    }

    fn check_rate(&self, headers: &HeaderMap) -> Result<(), CoreError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        let client = headers
            .get("x-telemetry-client")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anonymous");
        limiter.check(client)
    }
}

/// Build the router serving the telemetry read API.
pub fn telemetry_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/telemetry/entries",
            get(list_entries).delete(clear_entries),
        )
        .route("/telemetry/entries/updates", get(entry_updates))
        .route("/telemetry/entries/:sequence", get(get_entry))
        .route("/telemetry/entries/:sequence/resolve", post(resolve_entry))
        .route(
            "/telemetry/entries/:sequence/unresolve",
            post(unresolve_entry),
        )
        .route("/telemetry/stats", get(entry_stats))
        .route("/telemetry/sequence", get(latest_sequence))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn ok_response<T: Serialize>(data: T, meta: ResponseMeta) -> Response {
    (StatusCode::OK, Json(Envelope::ok(data, meta))).into_response()
}

fn err_response(err: CoreError, mode: RuntimeMode, started: Instant) -> Response {
    let meta = ResponseMeta::new(started.elapsed().as_millis() as u64);
    (
        http_status(&err),
        Json(Envelope::<serde_json::Value>::failure(&err, mode, meta)),
    )
        .into_response()
}

/// GET /telemetry/entries — cursor-paginated, filtered listing.
async fn list_entries(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<EntryQueryParams>,
) -> Response {
    let started = Instant::now();

    if let Err(err) = state.check_rate(&headers) {
        return err_response(err, state.mode, started);
    }
    let filter = match params::parse_filter(&params) {
        Ok(filter) => filter,
        Err(err) => return err_response(err, state.mode, started),
    };
    let direction = match params::parse_direction(&params) {
        Ok(direction) => direction,
        Err(err) => return err_response(err, state.mode, started),
    };
    let limit = params::clamp_limit(params.limit);

    match state
        .store
        .get_entries_with_cursor(params.cursor, direction, limit, &filter)
        .await
    {
        Ok(page) => {
            let meta = ResponseMeta::new(started.elapsed().as_millis() as u64).with_pagination(
                PageMeta {
                    newest_sequence: page.newest_sequence,
                    oldest_sequence: page.oldest_sequence,
                    has_more: page.has_more,
                },
            );
            ok_response(page.entries, meta)
        }
        Err(err) => err_response(err, state.mode, started),
    }
}

/// GET /telemetry/entries/updates — polling probe for new entries.
async fn entry_updates(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<EntryQueryParams>,
) -> Response {
    let started = Instant::now();

    if let Err(err) = state.check_rate(&headers) {
        return err_response(err, state.mode, started);
    }
    let filter = match params::parse_filter(&params) {
        Ok(filter) => filter,
        Err(err) => return err_response(err, state.mode, started),
    };
    let since = params.since.unwrap_or(0);

    match state.store.check_new_entries(since, &filter).await {
        Ok(probe) => ok_response(
            probe,
            ResponseMeta::new(started.elapsed().as_millis() as u64),
        ),
        Err(err) => err_response(err, state.mode, started),
    }
}

/// GET /telemetry/entries/:sequence
async fn get_entry(State(state): State<ApiState>, Path(sequence): Path<u64>) -> Response {
    let started = Instant::now();

    match state.store.get_by_id(sequence).await {
        Ok(entry) => ok_response(
            entry,
            ResponseMeta::new(started.elapsed().as_millis() as u64),
        ),
        Err(err) => err_response(err, state.mode, started),
    }
}

/// POST /telemetry/entries/:sequence/resolve
async fn resolve_entry(State(state): State<ApiState>, Path(sequence): Path<u64>) -> Response {
    let started = Instant::now();

    match state.store.resolve_entry(sequence).await {
        Ok(()) => ok_response(
            json!({"sequence": sequence, "resolved": true}),
            ResponseMeta::new(started.elapsed().as_millis() as u64),
        ),
        Err(err) => err_response(err, state.mode, started),
    }
}

/// POST /telemetry/entries/:sequence/unresolve
async fn unresolve_entry(State(state): State<ApiState>, Path(sequence): Path<u64>) -> Response {
    let started = Instant::now();

    match state.store.unresolve_entry(sequence).await {
        Ok(()) => ok_response(
            json!({"sequence": sequence, "resolved": false}),
            ResponseMeta::new(started.elapsed().as_millis() as u64),
        ),
        Err(err) => err_response(err, state.mode, started),
    }
}

/// DELETE /telemetry/entries — clear matching entries (all with no filter).
async fn clear_entries(
    State(state): State<ApiState>,
    Query(params): Query<EntryQueryParams>,
) -> Response {
    let started = Instant::now();

    let filter = match params::parse_filter(&params) {
        Ok(filter) => filter,
        Err(err) => return err_response(err, state.mode, started),
    };
    let filter_ref = if filter.is_empty() {
        None
    } else {
        Some(&filter)
    };

    match state.store.clear_entries(filter_ref).await {
        Ok(removed) => ok_response(
            json!({"removed": removed}),
            ResponseMeta::new(started.elapsed().as_millis() as u64),
        ),
        Err(err) => err_response(err, state.mode, started),
    }
}

/// GET /telemetry/stats
async fn entry_stats(
    State(state): State<ApiState>,
    Query(params): Query<EntryQueryParams>,
) -> Response {
    let started = Instant::now();

    let filter = match params::parse_filter(&params) {
        Ok(filter) => filter,
        Err(err) => return err_response(err, state.mode, started),
    };

    match state.store.stats(Some(&filter)).await {
        Ok(stats) => ok_response(
            stats,
            ResponseMeta::new(started.elapsed().as_millis() as u64),
        ),
        Err(err) => err_response(err, state.mode, started),
    }
}

/// GET /telemetry/sequence
async fn latest_sequence(State(state): State<ApiState>) -> Response {
    let started = Instant::now();

    match state.store.latest_sequence().await {
        Ok(sequence) => ok_response(
            json!({"latestSequence": sequence}),
            ResponseMeta::new(started.elapsed().as_millis() as u64),
        ),
        Err(err) => err_response(err, state.mode, started),
    }
}
