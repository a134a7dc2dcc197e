pub mod rate_limiter;
pub mod rbmq;
pub mod redis;
