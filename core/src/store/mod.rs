//! Durable key-value persistence for session bindings.
//!
//! Every server instance talks to the same backing service, so a session routed
//! to any instance resolves the same credential. Callers only see [`StoreError`],
//! never backend-specific error types.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{StoreBackend, StoreConfig};

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connection down, not yet established, or the backend rejected the command.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("credential store did not answer within {0:?}")]
    TimedOut(Duration),
    /// Bad connection string or similar; not retryable.
    #[error("invalid credential store configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Config(_))
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Short backend label for logs and health output ("redis", "memory").
    fn backend(&self) -> &'static str;

    /// Establish the shared connection. Calling it while connected is a no-op.
    async fn connect(&self) -> Result<(), StoreError>;

    /// `Ok(None)` means "no binding", which is not an error.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Overwrites any existing value. `ttl = None` keeps the value until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Cheap round trip used by health checks.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release the shared connection. Further operations report `Unavailable`
    /// until `connect` is called again.
    async fn close(&self);
}

/// Build the configured backend and try to connect it.
///
/// A backend that is unreachable at startup is not fatal: the store keeps
/// retrying in the background and reports `Unavailable` meanwhile. Only a
/// malformed configuration is returned as an error.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn CredentialStore>, StoreError> {
    let store: Arc<dyn CredentialStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Redis => Arc::new(RedisStore::new(config)?),
    };

    match store.connect().await {
        Ok(()) => tracing::info!(
            event = "credential_store_connected",
            backend = store.backend(),
            "credential store ready"
        ),
        Err(err) => tracing::error!(
            event = "credential_store_connect_failed",
            backend = store.backend(),
            error = %err,
            "credential store not reachable at startup, retrying in background"
        ),
    }

    Ok(store)
}
