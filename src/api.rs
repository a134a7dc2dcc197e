use std::sync::Arc;

use anyhow::{Error, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clients::rate_limiter::RateLimiter;
use crate::clients::rbmq::RabbitMqClient;
use crate::clients::redis::RedisClient;
use crate::config::Config;
use crate::models::error::{rate_limit_headers, ApiError};
use crate::models::health::{HealthResponse, ReadyResponse};
use crate::models::message::{Channel, QueueMessage};
use crate::models::response::{ApiResponse, NotificationResponse};
use crate::models::status::NotificationStatus;
use crate::models::validation;
use crate::utils::shutdown_signal;

pub struct AppState {
    pub config: Config,
    pub broker: Arc<RabbitMqClient>,
    pub redis: RedisClient,
    pub limiter: RateLimiter,
}

pub async fn run_api_server(state: AppState) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", state.config.port);
    let state = Arc::new(state);
    let broker = Arc::clone(&state.broker);
    let app = create_router(state);

    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Ingress API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    broker.close().await;

    info!("Ingress API server stopped");

    Ok(())
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/notifications/email", post(send_email))
        .route("/api/notifications/sms", post(send_sms))
        .route("/api/notifications/push", post(send_push))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn send_email(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    enqueue(state, Channel::Email, body).await
}

async fn send_sms(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    enqueue(state, Channel::Sms, body).await
}

async fn send_push(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    enqueue(state, Channel::Push, body).await
}

/// The ingress pipeline: schema validation, rate-limit admission,
/// idempotency probe, durable publish, idempotency store, 202.
async fn enqueue(state: Arc<AppState>, channel: Channel, body: Value) -> Response {
    let parsed = match validation::parse_request(channel, &body) {
        Ok(parsed) => parsed,
        Err(issues) => return ApiError::Validation(issues).into_response(),
    };

    let request_id = Uuid::new_v4();

    let decision = state
        .limiter
        .admit(&parsed.user_id, channel, &request_id.to_string())
        .await;

    if !decision.allowed {
        info!(
            user_id = %parsed.user_id,
            channel = %channel,
            "Request rejected by rate limiter"
        );
        return ApiError::rate_limited(decision).into_response();
    }

    let mut redis = state.redis.clone();

    match redis
        .cached_response(&parsed.user_id, &parsed.idempotency_key)
        .await
    {
        Ok(Some(mut cached)) => {
            info!(
                user_id = %parsed.user_id,
                idempotency_key = %parsed.idempotency_key,
                "Duplicate submission, returning cached response"
            );
            cached.status = NotificationStatus::Duplicate;
            let body = ApiResponse::success(cached, "Duplicate request".to_string());
            return (StatusCode::OK, rate_limit_headers(&decision), Json(body)).into_response();
        }
        Ok(None) => {}
        Err(e) => {
            warn!(error = %e, "Idempotency probe failed, treating request as first submission");
        }
    }

    let message = QueueMessage::new(
        request_id,
        channel,
        parsed.user_id.clone(),
        parsed.idempotency_key.clone(),
        parsed.payload,
    );

    match state.broker.publish(&message).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(id = %request_id, "Broker refused publish");
            return (
                rate_limit_headers(&decision),
                ApiError::PublishRejected.into_response(),
            )
                .into_response();
        }
        Err(e) => {
            error!(id = %request_id, error = %e, "Publish failed");
            return (
                rate_limit_headers(&decision),
                ApiError::PublishRejected.into_response(),
            )
                .into_response();
        }
    }

    let response = NotificationResponse {
        id: request_id,
        status: NotificationStatus::Queued,
        message: format!("{channel} notification queued for delivery"),
    };

    // The publish already succeeded; a failed cache write only means one
    // more enqueue on a client retry, which the delivered guard absorbs.
    if let Err(e) = redis
        .store_response(&parsed.user_id, &parsed.idempotency_key, &response)
        .await
    {
        warn!(
            error = %e,
            idempotency_key = %parsed.idempotency_key,
            "Failed to store idempotency entry"
        );
    }

    info!(
        id = %request_id,
        channel = %channel,
        user_id = %parsed.user_id,
        "Notification queued"
    );

    (
        StatusCode::ACCEPTED,
        rate_limit_headers(&decision),
        Json(ApiResponse::success(
            response,
            "Notification accepted".to_string(),
        )),
    )
        .into_response()
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let broker_connected = state.broker.is_connected().await;
    Json(HealthResponse::current(broker_connected))
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    if state.broker.is_connected().await {
        (StatusCode::OK, Json(ReadyResponse { ready: true })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse { ready: false }),
        )
            .into_response()
    }
}
