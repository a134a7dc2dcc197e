use chrono::{SecondsFormat, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatuses {
    pub broker: ConnectionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub services: ServiceStatuses,
}

impl HealthResponse {
    pub fn current(broker_connected: bool) -> Self {
        let (status, broker) = if broker_connected {
            ("ok", ConnectionStatus::Connected)
        } else {
            ("degraded", ConnectionStatus::Disconnected)
        };

        Self {
            status,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            services: ServiceStatuses { broker },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
}
