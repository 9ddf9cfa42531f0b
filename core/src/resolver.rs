use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::session::{Credential, SessionId};
use crate::store::{CredentialStore, StoreError};

/// Outcome of looking up the credential bound to a session.
///
/// "No binding" and "could not check" are separate variants so a backend
/// outage is never mistaken for an unauthenticated caller.
#[derive(Debug)]
pub enum Resolution {
    Bound(Credential),
    Unauthenticated,
    BackendUnavailable(StoreError),
}

impl Resolution {
    /// Yes/no view for callers that do not care why a credential is missing.
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            Resolution::Bound(credential) => Some(credential),
            _ => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&StoreError> {
        match self {
            Resolution::BackendUnavailable(err) => Some(err),
            _ => None,
        }
    }
}

/// The only way the rest of the system goes from a session to a credential.
///
/// Owns every binding record in the store. Each store round trip is bounded
/// by `op_timeout`; a timeout surfaces as `StoreError::TimedOut`.
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn CredentialStore>,
    key_prefix: String,
    session_ttl: Option<Duration>,
    op_timeout: Duration,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn CredentialStore>, config: &StoreConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            session_ttl: config.session_ttl,
            op_timeout: config.op_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    fn key(&self, session: &SessionId) -> String {
        format!("{}{}", self.key_prefix, session.as_str())
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .unwrap_or(Err(StoreError::TimedOut(self.op_timeout)))
    }

    pub async fn resolve(&self, session: &SessionId) -> Resolution {
        let key = self.key(session);
        match self.bounded(self.store.get(&key)).await {
            Ok(Some(raw)) => match Credential::new(raw) {
                Ok(credential) => Resolution::Bound(credential),
                Err(_) => {
                    tracing::warn!(
                        event = "session_binding_blank",
                        session = %session.fingerprint(),
                        "stored credential is blank, treating session as unauthenticated"
                    );
                    Resolution::Unauthenticated
                }
            },
            Ok(None) => {
                tracing::debug!(
                    event = "session_unbound",
                    session = %session.fingerprint(),
                    "no credential bound to session"
                );
                Resolution::Unauthenticated
            }
            Err(err) => {
                tracing::error!(
                    event = "session_resolve_failed",
                    session = %session.fingerprint(),
                    backend = self.store.backend(),
                    error = %err,
                    "credential store unavailable during lookup"
                );
                Resolution::BackendUnavailable(err)
            }
        }
    }

    /// Bind (or rebind) a credential; the previous one is replaced.
    pub async fn bind(
        &self,
        session: &SessionId,
        credential: &Credential,
    ) -> Result<(), StoreError> {
        let key = self.key(session);
        let result = self
            .bounded(self.store.set(&key, credential.expose(), self.session_ttl))
            .await;
        match &result {
            Ok(()) => tracing::info!(
                event = "session_bound",
                session = %session.fingerprint(),
                ttl_secs = ?self.session_ttl.map(|ttl| ttl.as_secs()),
                "credential bound to session"
            ),
            Err(err) => tracing::error!(
                event = "session_bind_failed",
                session = %session.fingerprint(),
                backend = self.store.backend(),
                error = %err,
                "could not persist session binding"
            ),
        }
        result
    }

    pub async fn unbind(&self, session: &SessionId) -> Result<(), StoreError> {
        let key = self.key(session);
        let result = self.bounded(self.store.delete(&key)).await;
        match &result {
            Ok(()) => tracing::info!(
                event = "session_unbound_explicit",
                session = %session.fingerprint(),
                "session binding removed"
            ),
            Err(err) => tracing::error!(
                event = "session_unbind_failed",
                session = %session.fingerprint(),
                backend = self.store.backend(),
                error = %err,
                "could not remove session binding"
            ),
        }
        result
    }

    /// Health check round trip, bounded like every other one.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(self.store.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::store::MemoryStore;

    fn sid(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    fn cred(raw: &str) -> Credential {
        Credential::new(raw).unwrap()
    }

    fn resolver_over(store: Arc<MemoryStore>) -> SessionResolver {
        SessionResolver::new(store, &StoreConfig::default())
    }

    fn bound_value(resolution: &Resolution) -> Option<&str> {
        resolution.credential().map(Credential::expose)
    }

    #[tokio::test]
    async fn bound_credential_resolves_until_unbound() {
        let resolver = resolver_over(Arc::new(MemoryStore::new()));
        let s1 = sid("s1");
        resolver.bind(&s1, &cred("key-123")).await.unwrap();

        assert_eq!(bound_value(&resolver.resolve(&s1).await), Some("key-123"));
        assert_eq!(bound_value(&resolver.resolve(&s1).await), Some("key-123"));

        resolver.unbind(&s1).await.unwrap();
        assert!(matches!(
            resolver.resolve(&s1).await,
            Resolution::Unauthenticated
        ));
    }

    #[tokio::test]
    async fn never_bound_session_is_unauthenticated_not_an_error() {
        let resolver = resolver_over(Arc::new(MemoryStore::new()));
        let resolution = resolver.resolve(&sid("never-seen")).await;
        assert!(matches!(resolution, Resolution::Unauthenticated));
        assert!(resolution.diagnostic().is_none());
    }

    #[tokio::test]
    async fn rebind_replaces_previous_credential() {
        let resolver = resolver_over(Arc::new(MemoryStore::new()));
        let id = sid("s1");
        resolver.bind(&id, &cred("c1")).await.unwrap();
        resolver.bind(&id, &cred("c2")).await.unwrap();
        assert_eq!(bound_value(&resolver.resolve(&id).await), Some("c2"));
    }

    #[tokio::test]
    async fn bindings_are_isolated_per_session() {
        let resolver = resolver_over(Arc::new(MemoryStore::new()));
        let (a, b) = (sid("session-a"), sid("session-b"));
        resolver.bind(&a, &cred("cX")).await.unwrap();
        resolver.bind(&b, &cred("cY")).await.unwrap();

        assert_eq!(bound_value(&resolver.resolve(&a).await), Some("cX"));
        assert_eq!(bound_value(&resolver.resolve(&b).await), Some("cY"));

        resolver.unbind(&a).await.unwrap();
        assert!(resolver.resolve(&a).await.credential().is_none());
        assert_eq!(bound_value(&resolver.resolve(&b).await), Some("cY"));
    }

    #[tokio::test]
    async fn unbind_of_unknown_session_succeeds() {
        let resolver = resolver_over(Arc::new(MemoryStore::new()));
        assert!(resolver.unbind(&sid("ghost")).await.is_ok());
    }

    #[tokio::test]
    async fn severed_store_reports_backend_unavailable() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver_over(Arc::clone(&store));
        let id = sid("s1");
        resolver.bind(&id, &cred("key-123")).await.unwrap();

        store.set_available(false);
        let resolution = resolver.resolve(&id).await;
        assert!(matches!(
            resolution,
            Resolution::BackendUnavailable(StoreError::Unavailable(_))
        ));
        assert!(resolution.credential().is_none());
        assert!(resolution.diagnostic().is_some());
        assert!(resolver.bind(&id, &cred("other")).await.is_err());
        assert!(resolver.unbind(&id).await.is_err());

        store.set_available(true);
        assert_eq!(bound_value(&resolver.resolve(&id).await), Some("key-123"));
    }

    #[tokio::test]
    async fn keys_are_namespaced_by_prefix() {
        let store = Arc::new(MemoryStore::new());
        let config = StoreConfig {
            key_prefix: "tenant-a:".to_string(),
            ..StoreConfig::default()
        };
        let resolver = SessionResolver::new(Arc::clone(&store) as Arc<dyn CredentialStore>, &config);
        resolver.bind(&sid("s1"), &cred("k")).await.unwrap();

        assert_eq!(store.get("tenant-a:s1").await.unwrap().as_deref(), Some("k"));
        assert_eq!(store.get("s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn binding_expires_after_ttl() {
        let store = Arc::new(MemoryStore::new());
        let config = StoreConfig {
            session_ttl: Some(Duration::from_millis(30)),
            ..StoreConfig::default()
        };
        let resolver = SessionResolver::new(store, &config);
        let id = sid("short-lived");
        resolver.bind(&id, &cred("k")).await.unwrap();
        assert!(resolver.resolve(&id).await.credential().is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(matches!(
            resolver.resolve(&id).await,
            Resolution::Unauthenticated
        ));
    }

    #[tokio::test]
    async fn blank_stored_value_is_treated_as_unbound() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver_over(Arc::clone(&store));
        store
            .set("vision:mcp:session:s1", "  ", None)
            .await
            .unwrap();
        assert!(matches!(
            resolver.resolve(&sid("s1")).await,
            Resolution::Unauthenticated
        ));
    }

    #[tokio::test]
    async fn concurrent_sessions_never_see_each_others_credentials() {
        let resolver = resolver_over(Arc::new(MemoryStore::new()));
        let mut tasks = Vec::new();
        for i in 0..64 {
            let resolver = resolver.clone();
            tasks.push(tokio::spawn(async move {
                let id = sid(&format!("session-{i}"));
                let key = cred(&format!("key-{i}"));
                resolver.bind(&id, &key).await.unwrap();
                tokio::task::yield_now().await;
                let resolved = resolver.resolve(&id).await;
                resolved.credential().map(|c| c.expose().to_string())
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), Some(format!("key-{i}")));
        }
    }

    /// Store whose every round trip hangs forever.
    struct HangingStore;

    #[async_trait]
    impl CredentialStore for HangingStore {
        fn backend(&self) -> &'static str {
            "hanging"
        }

        async fn connect(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            std::future::pending().await
        }

        async fn set(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Option<Duration>,
        ) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn hung_store_times_out_as_unavailable_not_absent() {
        let config = StoreConfig {
            op_timeout: Duration::from_millis(50),
            ..StoreConfig::default()
        };
        let resolver = SessionResolver::new(Arc::new(HangingStore), &config);
        let id = sid("s1");

        let resolution = resolver.resolve(&id).await;
        assert!(matches!(
            resolution,
            Resolution::BackendUnavailable(StoreError::TimedOut(_))
        ));
        assert!(matches!(
            resolver.bind(&id, &cred("k")).await,
            Err(StoreError::TimedOut(_))
        ));
        assert!(matches!(
            resolver.unbind(&id).await,
            Err(StoreError::TimedOut(_))
        ));
        assert!(matches!(resolver.ping().await, Err(StoreError::TimedOut(_))));
    }

    #[tokio::test]
    async fn ping_follows_store_availability() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver_over(Arc::clone(&store));
        assert!(resolver.ping().await.is_ok());
        store.set_available(false);
        assert!(resolver.ping().await.is_err());
    }
}
