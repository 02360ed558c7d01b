use std::time::Duration;

use redis::AsyncCommands;
use serde::Serialize;

/// Durable FIFO consumed by OCR workers.
pub const INPUT_QUEUE: &str = "jarvis.ocr.jobs";

/// Redis-backed job queue. Producers push to the tail with `LPUSH`; workers
/// consume from the head with a blocking `BRPOP`, so retries re-pushed with
/// `push` land behind everything already waiting.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Push a JSON message to the tail of `queue`.
    pub async fn push<T: Serialize>(&self, queue: &str, message: &T) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(message).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(queue, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Blocking pop from the head of `queue`. Returns `None` when the
    /// timeout elapses without a message.
    pub async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let popped: Option<(String, String)> = conn
            .brpop(queue, timeout.as_secs_f64())
            .await
            .map_err(QueueError::Redis)?;
        Ok(popped.map(|(_, payload)| payload))
    }

    /// Current number of waiting messages (for metrics).
    pub async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(queue).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
