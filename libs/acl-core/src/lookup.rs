//! Narrow interfaces to the engine's external collaborators, plus a caching
//! single-flight wrapper for cluster metadata.
//!
//! Rules never talk to the cluster or to authentication back-ends directly;
//! they go through these traits so the engine stays a pure function of
//! `(config, request, collaborators)`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use acl_names::{
    IndexWithAliases, RemoteIndexWithAliases, RepositoryName, SnapshotName, StringName,
    TemplatesInventory,
};
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("external lookup timed out")]
    Timeout,
    #[error("external lookup failed: {0}")]
    Failed(String),
}

/// The cluster-metadata source.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn local_indices(&self) -> Result<Vec<IndexWithAliases>, LookupError>;

    async fn remote_indices(
        &self,
        cluster_pattern: &StringName,
    ) -> Result<Vec<RemoteIndexWithAliases>, LookupError>;

    async fn templates(&self) -> Result<TemplatesInventory, LookupError>;

    async fn snapshots(
        &self,
        repository: &RepositoryName,
    ) -> Result<BTreeSet<SnapshotName>, LookupError>;

    async fn repositories(&self) -> Result<BTreeSet<RepositoryName>, LookupError>;
}

/// Credentials extracted from the request, handed to an authentication
/// back-end. Signature verification, LDAP binds and similar I/O happen on
/// the other side of this interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    Basic { user: String, password: String },
    Jwt { token: String },
    ApiKey { key: String },
}

/// A successfully authenticated caller as reported by a back-end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
    pub groups: Vec<String>,
    /// Decoded claims payload, when the credential was a JWT.
    pub jwt_payload: Option<serde_json::Value>,
}

#[async_trait]
pub trait AuthenticationService: Send + Sync {
    /// `Ok(None)` means the back-end understood the credential and rejected
    /// it; errors mean the back-end itself failed.
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticatedUser>, LookupError>;
}

/// Process-environment access, injected so evaluation stays deterministic
/// under test.
pub trait EnvVarProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEnv;

impl EnvVarProvider for OsEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed environment for tests and for hosts that sandbox configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticEnv {
    values: HashMap<String, String>,
}

impl<const N: usize> From<[(&str, &str); N]> for StaticEnv {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        }
    }
}

impl EnvVarProvider for StaticEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Source of unique identifiers, injected for the delete-template sentinel
/// rewrite.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    LocalIndices,
    RemoteIndices(String),
    Templates,
    Snapshots(String),
    Repositories,
}

#[derive(Clone)]
enum CachedValue {
    Local(Arc<Vec<IndexWithAliases>>),
    Remote(Arc<Vec<RemoteIndexWithAliases>>),
    Templates(Arc<TemplatesInventory>),
    Snapshots(Arc<BTreeSet<SnapshotName>>),
    Repositories(Arc<BTreeSet<RepositoryName>>),
}

struct CacheEntry {
    at: Instant,
    value: CachedValue,
}

/// Caching, deadline-enforcing wrapper around a [`MetadataSource`].
///
/// Reads within the TTL are served from the cache; concurrent misses for
/// the same key collapse into a single upstream call. The cache's own
/// synchronisation is never held across a suspension; single-flight uses a
/// per-key async mutex instead.
pub struct CachedMetadataSource {
    inner: Arc<dyn MetadataSource>,
    ttl: Duration,
    call_timeout: Duration,
    cache: DashMap<CacheKey, CacheEntry>,
    flights: DashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>,
}

impl CachedMetadataSource {
    #[must_use]
    pub fn new(inner: Arc<dyn MetadataSource>, ttl: Duration, call_timeout: Duration) -> Self {
        Self {
            inner,
            ttl,
            call_timeout,
            cache: DashMap::new(),
            flights: DashMap::new(),
        }
    }

    fn fresh(&self, key: &CacheKey) -> Option<CachedValue> {
        let entry = self.cache.get(key)?;
        (entry.at.elapsed() < self.ttl).then(|| entry.value.clone())
    }

    fn store(&self, key: CacheKey, value: CachedValue) {
        self.cache.insert(
            key,
            CacheEntry {
                at: Instant::now(),
                value,
            },
        );
    }

    fn flight_lock(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        self.flights
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn timed<T>(
        &self,
        fut: impl Future<Output = Result<T, LookupError>>,
    ) -> Result<T, LookupError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout),
        }
    }
}

macro_rules! cached_fetch {
    ($self:ident, $key:expr, $variant:ident, $fetch:expr) => {{
        let key = $key;
        if let Some(CachedValue::$variant(value)) = $self.fresh(&key) {
            return Ok(value);
        }
        let lock = $self.flight_lock(&key);
        let _guard = lock.lock().await;
        if let Some(CachedValue::$variant(value)) = $self.fresh(&key) {
            return Ok(value);
        }
        let value = Arc::new($self.timed($fetch).await?);
        $self.store(key, CachedValue::$variant(value.clone()));
        Ok(value)
    }};
}

impl CachedMetadataSource {
    /// # Errors
    /// Propagates upstream failures; a deadline overrun becomes
    /// [`LookupError::Timeout`].
    pub async fn local_indices(&self) -> Result<Arc<Vec<IndexWithAliases>>, LookupError> {
        cached_fetch!(self, CacheKey::LocalIndices, Local, self.inner.local_indices())
    }

    /// # Errors
    /// Propagates upstream failures; a deadline overrun becomes
    /// [`LookupError::Timeout`].
    pub async fn remote_indices(
        &self,
        cluster_pattern: &StringName,
    ) -> Result<Arc<Vec<RemoteIndexWithAliases>>, LookupError> {
        cached_fetch!(
            self,
            CacheKey::RemoteIndices(cluster_pattern.as_str().to_owned()),
            Remote,
            self.inner.remote_indices(cluster_pattern)
        )
    }

    /// # Errors
    /// Propagates upstream failures; a deadline overrun becomes
    /// [`LookupError::Timeout`].
    pub async fn templates(&self) -> Result<Arc<TemplatesInventory>, LookupError> {
        cached_fetch!(self, CacheKey::Templates, Templates, self.inner.templates())
    }

    /// # Errors
    /// Propagates upstream failures; a deadline overrun becomes
    /// [`LookupError::Timeout`].
    pub async fn snapshots(
        &self,
        repository: &RepositoryName,
    ) -> Result<Arc<BTreeSet<SnapshotName>>, LookupError> {
        cached_fetch!(
            self,
            CacheKey::Snapshots(repository.as_str().to_owned()),
            Snapshots,
            self.inner.snapshots(repository)
        )
    }

    /// # Errors
    /// Propagates upstream failures; a deadline overrun becomes
    /// [`LookupError::Timeout`].
    pub async fn repositories(&self) -> Result<Arc<BTreeSet<RepositoryName>>, LookupError> {
        cached_fetch!(self, CacheKey::Repositories, Repositories, self.inner.repositories())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataSource for CountingSource {
        async fn local_indices(&self) -> Result<Vec<IndexWithAliases>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn remote_indices(
            &self,
            _cluster_pattern: &StringName,
        ) -> Result<Vec<RemoteIndexWithAliases>, LookupError> {
            Ok(Vec::new())
        }

        async fn templates(&self) -> Result<TemplatesInventory, LookupError> {
            Ok(TemplatesInventory::default())
        }

        async fn snapshots(
            &self,
            _repository: &RepositoryName,
        ) -> Result<BTreeSet<SnapshotName>, LookupError> {
            Ok(BTreeSet::new())
        }

        async fn repositories(&self) -> Result<BTreeSet<RepositoryName>, LookupError> {
            Ok(BTreeSet::new())
        }
    }

    #[tokio::test]
    async fn second_read_within_ttl_hits_the_cache() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedMetadataSource::new(
            source.clone(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );

        cached.local_indices().await.unwrap();
        cached.local_indices().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_always_refetches() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedMetadataSource::new(
            source.clone(),
            Duration::ZERO,
            Duration::from_secs(1),
        );

        cached.local_indices().await.unwrap();
        cached.local_indices().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    struct HangingSource;

    #[async_trait]
    impl MetadataSource for HangingSource {
        async fn local_indices(&self) -> Result<Vec<IndexWithAliases>, LookupError> {
            futures::future::pending().await
        }

        async fn remote_indices(
            &self,
            _cluster_pattern: &StringName,
        ) -> Result<Vec<RemoteIndexWithAliases>, LookupError> {
            futures::future::pending().await
        }

        async fn templates(&self) -> Result<TemplatesInventory, LookupError> {
            futures::future::pending().await
        }

        async fn snapshots(
            &self,
            _repository: &RepositoryName,
        ) -> Result<BTreeSet<SnapshotName>, LookupError> {
            futures::future::pending().await
        }

        async fn repositories(&self) -> Result<BTreeSet<RepositoryName>, LookupError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn deadline_overrun_becomes_timeout() {
        let cached = CachedMetadataSource::new(
            Arc::new(HangingSource),
            Duration::from_secs(60),
            Duration::from_millis(5),
        );
        assert_eq!(
            cached.local_indices().await.unwrap_err(),
            LookupError::Timeout
        );
    }
}
