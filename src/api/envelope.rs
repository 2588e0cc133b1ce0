//! Uniform result envelope
//!
//! Every operation exposed over the boundary returns
//! `{success, data, error, meta}` with a closed error-code taxonomy, so
//! consumers never have to inspect internals.

use crate::config::RuntimeMode;
use crate::error::CoreError;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PageMeta {
    pub newest_sequence: Option<u64>,
    pub oldest_sequence: Option<u64>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMeta {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PageMeta>,
}

impl ResponseMeta {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            duration_ms,
            pagination: None,
        }
    }

    pub fn with_pagination(mut self, pagination: PageMeta) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
    pub meta: ResponseMeta,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T, meta: ResponseMeta) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta,
        }
    }

    pub fn failure(err: &CoreError, mode: RuntimeMode, meta: ResponseMeta) -> Self {
        let details = match mode {
            RuntimeMode::Development => Some(serde_json::json!({
                "detail": format!("{:?}", err),
            })),
            RuntimeMode::Production => None,
        };

        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: err.code(),
                message: err.to_string(),
                details,
            }),
            meta,
        }
    }
}

/// HTTP status for each error variant.
pub fn http_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::InvalidOperation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::StorageTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CoreError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let envelope = Envelope::ok(serde_json::json!({"n": 1}), ResponseMeta::new(3));
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["success"], serde_json::json!(true));
        assert_eq!(value["data"]["n"], serde_json::json!(1));
        assert_eq!(value["error"], serde_json::Value::Null);
        assert_eq!(value["meta"]["duration_ms"], serde_json::json!(3));
    }

    #[test]
    fn test_production_mode_omits_details() {
        let err = CoreError::NotFound(9);
        let envelope =
            Envelope::<serde_json::Value>::failure(&err, RuntimeMode::Production, ResponseMeta::new(0));

        let error = envelope.error.unwrap();
        assert_eq!(error.code, "NOT_FOUND");
        assert!(error.details.is_none());
    }

    #[test]
    fn test_development_mode_includes_details() {
        let err = CoreError::Validation("limit out of range".to_string());
        let envelope = Envelope::<serde_json::Value>::failure(
            &err,
            RuntimeMode::Development,
            ResponseMeta::new(0),
        );

        assert!(envelope.error.unwrap().details.is_some());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(http_status(&CoreError::NotFound(1)), StatusCode::NOT_FOUND);
        assert_eq!(
            http_status(&CoreError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            http_status(&CoreError::RateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            http_status(&CoreError::StorageTimeout("x".into())),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
