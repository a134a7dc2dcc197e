use std::sync::Arc;

use redis::{aio::MultiplexedConnection, Script};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::message::Channel;
use crate::models::rate_limit::RateLimitDecision;
use crate::utils::now_ms;

const ADMIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Sliding-window admission, executed server-side so that concurrent
/// ingress nodes cannot interleave between prune and insert. Members are
/// request ids scored by admission time in epoch milliseconds; entries
/// older than the window are pruned on every touch.
///
/// KEYS[1] bucket key, ARGV: now_ms, window_ms, limit, request_id.
/// Returns {allowed, remaining, reset_ms}.
const ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)

local count = redis.call('ZCARD', key)
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local reset
if #oldest > 0 then
  reset = tonumber(oldest[2]) + window
else
  reset = now + window
end

if count < limit then
  redis.call('ZADD', key, now, member)
  redis.call('PEXPIRE', key, window)
  return {1, limit - count - 1, reset}
end

return {0, 0, reset}
"#;

#[derive(Clone)]
pub struct RateLimiter {
    connection: MultiplexedConnection,
    script: Arc<Script>,
    limit: u32,
    window_ms: u64,
}

impl RateLimiter {
    pub fn new(connection: MultiplexedConnection, config: &Config) -> Self {
        Self {
            connection,
            script: Arc::new(Script::new(ADMIT_SCRIPT)),
            limit: config.rate_limit_quota,
            window_ms: config.window_ms(),
        }
    }

    /// Admit or reject one request for `(user_id, channel)`.
    ///
    /// The store is a soft safeguard: if it is unreachable, errors, or
    /// times out, the request is admitted and the failure logged.
    pub async fn admit(
        &self,
        user_id: &str,
        channel: Channel,
        request_id: &str,
    ) -> RateLimitDecision {
        let key = format!("ratelimit:{user_id}:{}", channel.routing_key());
        let now = now_ms();
        let mut connection = self.connection.clone();

        let call = async {
            let reply: (i64, i64, i64) = self
                .script
                .key(&key)
                .arg(now)
                .arg(self.window_ms)
                .arg(self.limit)
                .arg(request_id)
                .invoke_async(&mut connection)
                .await?;
            Ok::<_, redis::RedisError>(reply)
        };

        match timeout(ADMIT_TIMEOUT, call).await {
            Ok(Ok((allowed, remaining, reset_ms))) => {
                let decision = RateLimitDecision {
                    allowed: allowed == 1,
                    limit: self.limit,
                    remaining: remaining.max(0) as u32,
                    reset_ms: reset_ms.max(0) as u64,
                };

                debug!(
                    key = %key,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "Rate limit admission"
                );

                decision
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Rate limiter store call failed, failing open");
                self.fail_open(now)
            }
            Err(_) => {
                warn!(key = %key, "Rate limiter store call timed out, failing open");
                self.fail_open(now)
            }
        }
    }

    fn fail_open(&self, now: u64) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            limit: self.limit,
            remaining: self.limit,
            reset_ms: now + self.window_ms,
        }
    }
}
