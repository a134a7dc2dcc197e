use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

use crate::models::rate_limit::RateLimitDecision;
use crate::models::response::ApiResponse;
use crate::models::validation::FieldIssue;
use crate::utils::now_ms;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request validation failed")]
    Validation(Vec<FieldIssue>),

    #[error("rate limit exceeded")]
    RateLimited {
        decision: RateLimitDecision,
        retry_after: u64,
    },

    #[error("broker rejected publish")]
    PublishRejected,
}

impl ApiError {
    pub fn rate_limited(decision: RateLimitDecision) -> Self {
        Self::RateLimited {
            retry_after: decision.retry_after_seconds(now_ms()),
            decision,
        }
    }
}

/// Standard quota headers, attached to every admitted or rejected response.
pub fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "X-RateLimit-Reset",
        HeaderValue::from(decision.reset_unix_seconds()),
    );
    headers
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(issues) => {
                let body = ApiResponse::<serde_json::Value>::validation(issues);
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            ApiError::RateLimited {
                decision,
                retry_after,
            } => {
                let body = ApiResponse {
                    success: false,
                    data: Some(serde_json::json!({ "retryAfter": retry_after })),
                    error: Some("rate_limit_exceeded".to_string()),
                    message: "Too many requests, retry after the indicated delay".to_string(),
                    details: None,
                };
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    rate_limit_headers(&decision),
                    Json(body),
                )
                    .into_response()
            }
            ApiError::PublishRejected => {
                let body = ApiResponse::<serde_json::Value>::error(
                    "publish_failed".to_string(),
                    "Failed to enqueue notification".to_string(),
                );
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
