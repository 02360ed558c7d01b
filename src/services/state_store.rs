use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::envelope::{ImageResult, JobEnvelope};
use crate::models::tier::Tier;

const KEY_PREFIX: &str = "ocr:pending:";
const DEADLINES_KEY: &str = "ocr:pending:deadlines";

/// Execution cursor persisted while a job waits for a validator callback.
///
/// Any worker that receives the callback (or the sweeper, on timeout) can
/// claim the state and resume the job; image bytes are re-resolved on
/// resumption rather than persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingValidation {
    pub correlation_id: String,
    pub job: JobEnvelope,
    pub image_index: usize,
    pub tier: Tier,
    pub remaining_tiers: Vec<Tier>,
    /// Candidate exactly as it would be emitted (normalized, truncated).
    pub candidate_text: String,
    /// Byte length of the un-truncated candidate.
    pub text_len: usize,
    pub truncated: bool,
    pub native_confidence: Option<f64>,
    /// Finalized results for images before `image_index`.
    pub results: Vec<ImageResult>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

/// Pending-state persistence in the queue's backing Redis.
///
/// Single-writer discipline: resumption must go through [`StateStore::take`],
/// which only yields the state to the caller that actually deleted the key.
pub struct StateStore {
    client: redis::Client,
    ttl: Duration,
}

impl StateStore {
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, StateStoreError> {
        let client = redis::Client::open(redis_url).map_err(StateStoreError::Redis)?;
        Ok(Self { client, ttl })
    }

    fn key(correlation_id: &str) -> String {
        format!("{KEY_PREFIX}{correlation_id}")
    }

    /// Persist a pending state and register its timeout deadline.
    ///
    /// The key itself lives for twice the TTL so a sweep that runs late can
    /// still claim it; Redis expiry bounds the worst-case leak.
    pub async fn save(&self, state: &PendingValidation) -> Result<(), StateStoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(StateStoreError::Redis)?;

        let payload = serde_json::to_string(state).map_err(StateStoreError::Serialize)?;
        conn.set_ex::<_, _, ()>(Self::key(&state.correlation_id), payload, self.ttl.as_secs() * 2)
            .await
            .map_err(StateStoreError::Redis)?;

        let deadline = (Utc::now() + self.ttl).timestamp();
        conn.zadd::<_, _, _, ()>(DEADLINES_KEY, &state.correlation_id, deadline)
            .await
            .map_err(StateStoreError::Redis)?;
        Ok(())
    }

    pub async fn load(
        &self,
        correlation_id: &str,
    ) -> Result<Option<PendingValidation>, StateStoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(StateStoreError::Redis)?;
        let payload: Option<String> = conn
            .get(Self::key(correlation_id))
            .await
            .map_err(StateStoreError::Redis)?;

        match payload {
            Some(payload) => {
                let state = serde_json::from_str(&payload).map_err(StateStoreError::Serialize)?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Delete a pending state. Returns false when the key was already gone,
    /// meaning another worker owns the resumption.
    pub async fn delete(&self, correlation_id: &str) -> Result<bool, StateStoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(StateStoreError::Redis)?;
        let removed: i64 = conn
            .del(Self::key(correlation_id))
            .await
            .map_err(StateStoreError::Redis)?;
        conn.zrem::<_, _, ()>(DEADLINES_KEY, correlation_id)
            .await
            .map_err(StateStoreError::Redis)?;
        Ok(removed > 0)
    }

    /// Load-then-delete claim. Yields the state only to the single caller
    /// whose delete removed the key.
    pub async fn take(
        &self,
        correlation_id: &str,
    ) -> Result<Option<PendingValidation>, StateStoreError> {
        let state = match self.load(correlation_id).await? {
            Some(state) => state,
            None => return Ok(None),
        };
        if self.delete(correlation_id).await? {
            Ok(Some(state))
        } else {
            Ok(None)
        }
    }

    /// Claim correlation ids whose validation deadline has passed. Each id
    /// is removed from the deadline index as it is claimed, so concurrent
    /// sweepers never hand out the same id twice.
    pub async fn due_deadlines(&self, now: DateTime<Utc>) -> Result<Vec<String>, StateStoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(StateStoreError::Redis)?;

        let due: Vec<String> = conn
            .zrangebyscore(DEADLINES_KEY, i64::MIN, now.timestamp())
            .await
            .map_err(StateStoreError::Redis)?;

        let mut claimed = Vec::new();
        for correlation_id in due {
            let removed: i64 = conn
                .zrem(DEADLINES_KEY, &correlation_id)
                .await
                .map_err(StateStoreError::Redis)?;
            if removed > 0 {
                claimed.push(correlation_id);
            }
        }
        Ok(claimed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
