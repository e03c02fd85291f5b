//! Cache error types
//!
//! Every variant is a store-side or codec failure. None of them is ever
//! read as a miss by the engines above.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Backend selection or connection settings are unusable
    #[error("Invalid cache configuration: {0}")]
    Config(String),

    /// A coalescer whose lock would outlive the followers' patience
    #[error("Lock ttl {lock_ttl:?} must be shorter than the polling budget {budget:?}")]
    LockOutlivesPolling { lock_ttl: Duration, budget: Duration },

    #[error("Cache store unreachable: {0}")]
    Connection(String),

    #[error("Failed to encode cache value: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Stored bytes do not match the type the caller asked for
    #[error("Failed to decode cached value at {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: rmp_serde::decode::Error,
    },

    /// The store answered, but not in the shape the command promises
    #[error("Unexpected store reply: {0}")]
    Operation(String),

    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_names_the_key() {
        let bytes = rmp_serde::to_vec(&"not a report").unwrap();
        let source = rmp_serde::from_slice::<Vec<u32>>(&bytes).unwrap_err();
        let err = CacheError::Decode {
            key: "v1:pop:psa:base1-4".to_string(),
            source,
        };
        let message = err.to_string();
        assert!(message.starts_with("Failed to decode cached value at v1:pop:psa:base1-4: "));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_lock_outlives_polling_display() {
        let err = CacheError::LockOutlivesPolling {
            lock_ttl: Duration::from_secs(60),
            budget: Duration::from_secs(37),
        };
        assert_eq!(
            err.to_string(),
            "Lock ttl 60s must be shorter than the polling budget 37s"
        );
    }

    #[test]
    fn test_store_failures_convert() {
        let redis_err = deadpool_redis::redis::RedisError::from((
            deadpool_redis::redis::ErrorKind::IoError,
            "broken pipe",
        ));
        let err: CacheError = redis_err.into();
        assert!(matches!(err, CacheError::Redis(_)));

        let err = CacheError::Connection("connection refused".to_string());
        assert_eq!(err.to_string(), "Cache store unreachable: connection refused");
    }
}
