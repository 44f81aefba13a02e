//! Shared remote cache tier backed by Redis.
//!
//! Expiry is delegated to the server (`SETEX`). Every command is bounded by a
//! timeout so an unreachable server degrades into an error the fallback chain
//! can step over instead of stalling the request.

use super::backend::CacheBackend;
use super::key::CacheKey;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;

const SCAN_BATCH: usize = 200;

pub struct RedisCache {
    client: Client,
    conn: OnceCell<MultiplexedConnection>,
    timeout: Duration,
}

impl RedisCache {
    /// Open a client and verify the server answers `PING` within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(url).map_err(|e| redis_error("open", e))?;
        let cache = Self {
            client,
            conn: OnceCell::new(),
            timeout,
        };
        let mut conn = cache.connection().await?;
        let _: String = cache
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(cache)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        // A failed connect leaves the cell empty so the next call retries.
        let conn = self
            .conn
            .get_or_try_init(|| async {
                match tokio::time::timeout(
                    self.timeout,
                    self.client.get_multiplexed_async_connection(),
                )
                .await
                {
                    Ok(res) => res.map_err(|e| redis_error("connect", e)),
                    Err(_) => Err(timeout_error("connect")),
                }
            })
            .await?;
        Ok(conn.clone())
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.map_err(|e| redis_error(op, e)),
            Err(_) => Err(timeout_error(op)),
        }
    }

    async fn scan_namespace(&self, namespace: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}:*", namespace);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        self.bounded(
            "GET",
            redis::cmd("GET").arg(key.as_str()).query_async(&mut conn),
        )
        .await
    }

    async fn set(&self, key: &CacheKey, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let seconds = ttl.as_secs().max(1);
        self.bounded(
            "SETEX",
            redis::cmd("SETEX")
                .arg(key.as_str())
                .arg(seconds)
                .arg(value)
                .query_async(&mut conn),
        )
        .await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: usize = self
            .bounded(
                "DEL",
                redis::cmd("DEL").arg(key.as_str()).query_async(&mut conn),
            )
            .await?;
        Ok(removed > 0)
    }

    async fn flush_namespace(&self, namespace: &str) -> Result<usize> {
        let keys = self.scan_namespace(namespace).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let mut removed = 0usize;
        for chunk in keys.chunks(SCAN_BATCH) {
            let n: usize = self
                .bounded("DEL", redis::cmd("DEL").arg(chunk.to_vec()).query_async(&mut conn))
                .await?;
            removed += n;
        }
        Ok(removed)
    }

    async fn len(&self, namespace: &str) -> Result<usize> {
        Ok(self.scan_namespace(namespace).await?.len())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

fn redis_error(op: &str, e: redis::RedisError) -> Error {
    Error::cache_with_context(
        e.to_string(),
        ErrorContext::new()
            .with_details(format!("command: {op}"))
            .with_source("redis_cache"),
    )
}

fn timeout_error(op: &str) -> Error {
    Error::cache_with_context(
        "redis command timed out",
        ErrorContext::new()
            .with_details(format!("command: {op}"))
            .with_source("redis_cache"),
    )
}
