//! Cache error types

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid invalidation message: {0}")]
    InvalidMessage(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
