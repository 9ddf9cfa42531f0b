use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::RwLock;

use super::{CredentialStore, StoreError};
use crate::config::StoreConfig;

/// Redis-backed store sharing one multiplexed connection across all tasks.
///
/// The connection slot starts empty. Until `connect` (or the background retry
/// loop) fills it, every operation fails fast with `Unavailable`. Once filled,
/// the `ConnectionManager` reconnects on its own after dropped connections.
#[derive(Clone)]
pub struct RedisStore {
    inner: Arc<RedisInner>,
}

struct RedisInner {
    client: redis::Client,
    connection: RwLock<Option<ConnectionManager>>,
    reconnecting: AtomicBool,
    closed: AtomicBool,
    connect_timeout: Duration,
    reconnect_interval: Duration,
}

impl RedisStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| StoreError::Config(format!("invalid REDIS_URL: {e}")))?;
        Ok(Self {
            inner: Arc::new(RedisInner {
                client,
                connection: RwLock::new(None),
                reconnecting: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                connect_timeout: config.op_timeout,
                reconnect_interval: config.reconnect_interval,
            }),
        })
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.connection.read().await.is_some()
    }

    async fn handle(&self) -> Result<ConnectionManager, StoreError> {
        if let Some(conn) = self.inner.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }
        self.schedule_reconnect();
        Err(StoreError::Unavailable(
            "not connected to redis".to_string(),
        ))
    }

    /// Start the background retry loop unless one is already running or the
    /// store is closed. Returns whether a new loop was started.
    fn schedule_reconnect(&self) -> bool {
        if self.inner.closed.load(Ordering::Acquire) {
            return false;
        }
        if self.inner.reconnecting.swap(true, Ordering::AcqRel) {
            return false;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut attempt: u64 = 0;
            loop {
                tokio::time::sleep(inner.reconnect_interval).await;
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }
                attempt += 1;
                match inner.establish().await {
                    Ok(conn) => {
                        if !inner.closed.load(Ordering::Acquire) {
                            *inner.connection.write().await = Some(conn);
                            tracing::info!(
                                event = "credential_store_reconnected",
                                backend = "redis",
                                attempt,
                                "redis connection re-established"
                            );
                        }
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(
                            event = "credential_store_reconnect_failed",
                            backend = "redis",
                            attempt,
                            error = %err,
                            "redis still unreachable"
                        );
                    }
                }
            }
            inner.reconnecting.store(false, Ordering::Release);
        });
        true
    }
}

impl RedisInner {
    async fn establish(&self) -> Result<ConnectionManager, StoreError> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(self.connect_timeout)
            .set_response_timeout(self.connect_timeout);
        match tokio::time::timeout(
            self.connect_timeout,
            ConnectionManager::new_with_config(self.client.clone(), config),
        )
        .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(err)) => Err(StoreError::Unavailable(format!(
                "redis connect failed: {err}"
            ))),
            Err(_) => Err(StoreError::TimedOut(self.connect_timeout)),
        }
    }
}

// Dropped connections are repaired by the ConnectionManager itself; the caller
// only needs to know this round trip did not happen.
fn command_error(op: &'static str, err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(format!("redis {op} failed: {err}"))
}

#[async_trait]
impl CredentialStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> Result<(), StoreError> {
        self.inner.closed.store(false, Ordering::Release);
        if self.is_connected().await {
            return Ok(());
        }

        match self.inner.establish().await {
            Ok(conn) => {
                let mut slot = self.inner.connection.write().await;
                // A concurrent connect or the retry loop may have won the race.
                if slot.is_none() {
                    *slot = Some(conn);
                }
                Ok(())
            }
            Err(err) => {
                self.schedule_reconnect();
                Err(err)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.handle().await?;
        let value: Option<String> = conn.get(key).await.map_err(|e| command_error("GET", e))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.handle().await?;
        match ttl {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, value, ttl.as_secs().max(1))
                    .await
                    .map_err(|e| command_error("SETEX", e))?;
            }
            None => {
                let _: () = conn
                    .set(key, value)
                    .await
                    .map_err(|e| command_error("SET", e))?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.handle().await?;
        let _: i64 = conn.del(key).await.map_err(|e| command_error("DEL", e))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.handle().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("PING", e))?;
        Ok(())
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if self.inner.connection.write().await.take().is_some() {
            tracing::info!(
                event = "credential_store_closed",
                backend = "redis",
                "redis connection released"
            );
        }
    }
}
