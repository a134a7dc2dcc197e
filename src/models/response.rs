use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::status::NotificationStatus;
use crate::models::validation::FieldIssue;

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldIssue>>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message,
            details: None,
        }
    }

    pub fn error(error: String, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            message,
            details: None,
        }
    }

    pub fn validation(issues: Vec<FieldIssue>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some("validation_failed".to_string()),
            message: "Request validation failed".to_string(),
            details: Some(issues),
        }
    }
}

/// The response cached under the idempotency key and returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub id: Uuid,
    pub status: NotificationStatus,
    pub message: String,
}
