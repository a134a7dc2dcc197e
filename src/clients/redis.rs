use anyhow::{anyhow, Error, Result};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use crate::config::Config;
use crate::models::response::NotificationResponse;
use crate::models::retry::RetryConfig;
use crate::utils::retry_with_backoff;

/// Upper bound on any single shared-store RPC.
const STORE_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the shared KV store: the idempotency response cache on the
/// ingress side and the delivered guard on the worker side.
#[derive(Clone)]
pub struct RedisClient {
    connection: MultiplexedConnection,
    idempotency_ttl_seconds: u64,
}

impl RedisClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to shared store");

        let client = Client::open(config.store_url.as_str())
            .map_err(|e| anyhow!("Failed to create store client: {e}"))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to shared store: {e}"))?;

        info!("Shared store connection established");

        Ok(Self {
            connection,
            idempotency_ttl_seconds: config.idempotency_ttl,
        })
    }

    /// A second connection handle for collaborators sharing this store.
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    fn idempotency_key(user_id: &str, idempotency_key: &str) -> String {
        format!("idempotency:{user_id}:{idempotency_key}")
    }

    fn delivered_key(user_id: &str, idempotency_key: &str) -> String {
        format!("delivered:{user_id}:{idempotency_key}")
    }

    /// Pre-publish probe: the response previously stored for this
    /// idempotency key, if any.
    pub async fn cached_response(
        &mut self,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<NotificationResponse>, Error> {
        let key = Self::idempotency_key(user_id, idempotency_key);

        let value: Option<String> = timeout(STORE_OP_TIMEOUT, self.connection.get(&key))
            .await
            .map_err(|_| anyhow!("Idempotency probe timed out"))?
            .map_err(|e| anyhow!("Failed to read idempotency entry: {e}"))?;

        debug!(key = %key, hit = value.is_some(), "Checked idempotency cache");

        match value {
            None => Ok(None),
            Some(raw) => {
                let response = serde_json::from_str(&raw)
                    .map_err(|e| anyhow!("Corrupt idempotency entry: {e}"))?;
                Ok(Some(response))
            }
        }
    }

    /// Post-publish store; written once and read-only until TTL expiry.
    pub async fn store_response(
        &mut self,
        user_id: &str,
        idempotency_key: &str,
        response: &NotificationResponse,
    ) -> Result<(), Error> {
        let key = Self::idempotency_key(user_id, idempotency_key);
        let raw = serde_json::to_string(response)?;

        timeout(
            STORE_OP_TIMEOUT,
            self.connection
                .set_ex::<_, _, ()>(&key, raw, self.idempotency_ttl_seconds),
        )
        .await
        .map_err(|_| anyhow!("Idempotency store timed out"))?
        .map_err(|e| anyhow!("Failed to store idempotency entry: {e}"))?;

        debug!(key = %key, "Stored idempotency entry");

        Ok(())
    }

    /// Delivery-side guard: has a sender already succeeded for this key?
    pub async fn is_delivered(
        &mut self,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<bool, Error> {
        let key = Self::delivered_key(user_id, idempotency_key);

        let delivered: bool = timeout(STORE_OP_TIMEOUT, self.connection.exists(&key))
            .await
            .map_err(|_| anyhow!("Delivered guard lookup timed out"))?
            .map_err(|e| anyhow!("Failed to check delivered guard: {e}"))?;

        Ok(delivered)
    }

    pub async fn mark_delivered(
        &mut self,
        user_id: &str,
        idempotency_key: &str,
    ) -> Result<(), Error> {
        let key = Self::delivered_key(user_id, idempotency_key);

        retry_with_backoff(&RetryConfig::store_writes(), || {
            let key = key.clone();
            let mut conn = self.connection.clone();
            let ttl = self.idempotency_ttl_seconds;

            async move {
                conn.set_ex::<_, _, ()>(&key, "1", ttl)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to record delivery: {e}"))?;

        debug!(key = %key, "Marked as delivered");

        Ok(())
    }
}
