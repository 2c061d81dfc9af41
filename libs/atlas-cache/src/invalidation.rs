//! Cache invalidation broadcast over Redis pub/sub
//!
//! A gateway instance that invalidates a key family publishes the pattern on
//! a shared channel; every instance (including the publisher) drops matching
//! local and shared entries on receipt. Delivery is best-effort eventual
//! consistency; TTLs bound the staleness window when a message is lost.

use crate::error::CacheResult;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Redis channel carrying invalidation broadcasts
pub const INVALIDATION_CHANNEL: &str = "cache:invalidate";

/// Pattern invalidation broadcast to all gateway instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub message_id: String,
    /// Glob pattern of cache keys to drop, e.g. `source:*`
    pub pattern: String,
    /// Instance that originated the invalidation
    pub source_instance: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl InvalidationMessage {
    pub fn new(pattern: impl Into<String>, source_instance: impl Into<String>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            pattern: pattern.into(),
            source_instance: source_instance.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Publishes invalidation messages
#[derive(Clone)]
pub struct InvalidationPublisher {
    redis: ConnectionManager,
    channel: String,
    instance_id: String,
}

impl InvalidationPublisher {
    pub fn new(redis: ConnectionManager, instance_id: String) -> Self {
        Self {
            redis,
            channel: INVALIDATION_CHANNEL.to_string(),
            instance_id,
        }
    }

    pub fn with_channel(redis: ConnectionManager, instance_id: String, channel: String) -> Self {
        Self {
            redis,
            channel,
            instance_id,
        }
    }

    /// Broadcast a pattern invalidation. Returns the subscriber count that
    /// received it.
    pub async fn publish(&self, pattern: &str) -> CacheResult<usize> {
        let msg = InvalidationMessage::new(pattern, self.instance_id.clone());
        let payload = serde_json::to_string(&msg)?;

        let mut conn = self.redis.clone();
        let subscribers: usize = conn.publish(&self.channel, payload).await?;

        debug!(
            message_id = %msg.message_id,
            pattern = %pattern,
            subscribers,
            "invalidation broadcast"
        );

        Ok(subscribers)
    }
}

/// Subscribes to invalidation messages and applies them via a callback
pub struct InvalidationSubscriber {
    client: Client,
    channel: String,
}

impl InvalidationSubscriber {
    pub fn new(redis_url: &str) -> CacheResult<Self> {
        Ok(Self {
            client: Client::open(redis_url)?,
            channel: INVALIDATION_CHANNEL.to_string(),
        })
    }

    pub fn with_channel(redis_url: &str, channel: String) -> CacheResult<Self> {
        Ok(Self {
            client: Client::open(redis_url)?,
            channel,
        })
    }

    /// Spawn the subscription loop. Each received message is handed to the
    /// callback; a failing callback is logged and never tears the loop down.
    pub async fn subscribe<F, Fut>(&self, callback: F) -> CacheResult<JoinHandle<()>>
    where
        F: Fn(InvalidationMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CacheResult<()>> + Send + 'static,
    {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;

        info!(channel = %self.channel, "subscribed to cache invalidation events");

        let callback = Arc::new(callback);

        let handle = tokio::spawn(async move {
            let mut stream = pubsub.on_message();

            while let Some(msg) = stream.next().await {
                let payload = match msg.get_payload::<String>() {
                    Ok(p) => p,
                    Err(e) => {
                        error!(error = ?e, "failed to read invalidation payload");
                        continue;
                    }
                };

                let invalidation: InvalidationMessage = match serde_json::from_str(&payload) {
                    Ok(m) => m,
                    Err(e) => {
                        error!(error = ?e, payload = %payload, "malformed invalidation message");
                        continue;
                    }
                };

                debug!(
                    message_id = %invalidation.message_id,
                    pattern = %invalidation.pattern,
                    source = %invalidation.source_instance,
                    "invalidation received"
                );

                let callback = Arc::clone(&callback);
                if let Err(e) = callback(invalidation.clone()).await {
                    error!(
                        error = ?e,
                        message_id = %invalidation.message_id,
                        "invalidation callback failed"
                    );
                }
            }

            warn!("invalidation subscription ended");
        });

        Ok(handle)
    }
}

impl std::fmt::Debug for InvalidationSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationSubscriber")
            .field("channel", &self.channel)
            .finish()
    }
}
