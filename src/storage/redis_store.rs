//! Redis implementation of [`QueueStore`].

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::retry::retry_with_backoff;
use super::QueueStore;
use crate::config::{ProbeConfig, RetryPolicy};
use crate::error::StoreError;

/// Retrying, timeout-bounded Redis client used for every queue read.
#[derive(Clone)]
pub struct RedisStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Applied to connect and to every command response.
    timeout: Duration,
    retry: RetryPolicy,
}

impl RedisStore {
    /// Connects to the store described by `config`.
    ///
    /// Connection attempts are retried like any other call, so an unreachable
    /// server costs `retry.max_attempts` attempts before the error surfaces.
    pub async fn connect(config: &ProbeConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.redis_url())
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        let timeout = config.timeout;

        let redis = retry_with_backoff(&config.retry, "connect", StoreError::is_transient, || {
            let client = client.clone();
            async move {
                match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
                    Ok(result) => result.map_err(StoreError::from),
                    Err(_) => Err(StoreError::Timeout(timeout)),
                }
            }
        })
        .await?;

        tracing::debug!(url = %config.redis_url(), "Connected to store");

        Ok(Self {
            redis,
            timeout,
            retry: config.retry,
        })
    }

    /// Returns a handle on the underlying connection, for components that
    /// speak to the same server outside the read-only queue API.
    pub fn connection(&self) -> ConnectionManager {
        self.redis.clone()
    }

    /// Runs one command with the response timeout and retry policy applied.
    async fn run<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, StoreError>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let timeout = self.timeout;
        retry_with_backoff(&self.retry, operation, StoreError::is_transient, || {
            let pending = op(self.redis.clone());
            async move {
                match tokio::time::timeout(timeout, pending).await {
                    Ok(result) => result.map_err(StoreError::from),
                    Err(_) => Err(StoreError::Timeout(timeout)),
                }
            }
        })
        .await
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.run("keys", |mut conn| async move {
            conn.keys::<_, Vec<String>>("*").await
        })
        .await
    }

    async fn key_type(&self, key: &str) -> Result<String, StoreError> {
        self.run("type", |mut conn| async move {
            redis::cmd("TYPE")
                .arg(key)
                .query_async::<_, String>(&mut conn)
                .await
        })
        .await
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        self.run("llen", |mut conn| async move {
            conn.llen::<_, usize>(key).await
        })
        .await
    }

    async fn lindex(&self, key: &str, index: usize) -> Result<Option<Vec<u8>>, StoreError> {
        let index = isize::try_from(index).unwrap_or(isize::MAX);
        self.run("lindex", |mut conn| async move {
            conn.lindex::<_, Option<Vec<u8>>>(key, index).await
        })
        .await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.run("hgetall", |mut conn| async move {
            conn.hgetall::<_, HashMap<String, String>>(key).await
        })
        .await
    }
}
