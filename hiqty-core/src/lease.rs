//! Playback leases
//!
//! A lease is a TTL-bearing key whose value is a token unique to one
//! acquisition (`{node_id}:{nanoid}`). Only the holder of the token can extend
//! or release it; a crashed holder's lease simply expires.

use std::sync::Arc;
use std::time::Duration;

use crate::models::lease_token;
use crate::store::Store;
use crate::Result;

/// A held lease. Dropping it does not release the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    key: String,
    token: String,
    ttl: Duration,
}

impl Lease {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Lease service
///
/// Acquire is a single attempt; retrying with backoff is up to the caller.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn Store>,
    node_id: String,
    ttl: Duration,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn Store>, node_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            node_id: node_id.into(),
            ttl,
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try once to take the lease at `key` (SET NX PX).
    ///
    /// Returns `None` when another holder has it.
    pub async fn acquire(&self, key: &str) -> Result<Option<Lease>> {
        let token = lease_token(&self.node_id);
        if self.store.lease_acquire(key, &token, self.ttl).await? {
            tracing::debug!(
                lease_key = %key,
                ttl_ms = %self.ttl.as_millis(),
                "Lease acquired"
            );
            Ok(Some(Lease {
                key: key.to_string(),
                token,
                ttl: self.ttl,
            }))
        } else {
            tracing::debug!(lease_key = %key, "Lease held by another process");
            Ok(None)
        }
    }

    /// Push the lease expiry out by its TTL from now.
    ///
    /// Single shot. `false` means ownership can no longer be proven, either
    /// because another holder took over or the store could not be reached.
    pub async fn extend(&self, lease: &Lease) -> bool {
        match self
            .store
            .lease_extend(&lease.key, &lease.token, lease.ttl)
            .await
        {
            Ok(true) => {
                tracing::trace!(lease_key = %lease.key, "Lease extended");
                true
            }
            Ok(false) => {
                tracing::warn!(lease_key = %lease.key, "Lease extend failed: no longer owned");
                false
            }
            Err(e) => {
                tracing::warn!(lease_key = %lease.key, error = %e, "Lease extend failed");
                false
            }
        }
    }

    /// Best-effort release; errors are logged.
    pub async fn release(&self, lease: Lease) -> bool {
        match self.store.lease_release(&lease.key, &lease.token).await {
            Ok(true) => {
                tracing::debug!(lease_key = %lease.key, "Lease released");
                true
            }
            Ok(false) => {
                tracing::warn!(
                    lease_key = %lease.key,
                    "Lease release failed: value mismatch or already expired"
                );
                false
            }
            Err(e) => {
                tracing::error!(lease_key = %lease.key, error = %e, "Failed to release lease");
                false
            }
        }
    }

    /// Token of whoever currently holds `key`
    pub async fn holder(&self, key: &str) -> Result<Option<String>> {
        self.store.get(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn managers(store: &MemoryStore) -> (LeaseManager, LeaseManager) {
        let ttl = Duration::from_secs(15);
        (
            LeaseManager::new(Arc::new(store.clone()), "node-a", ttl),
            LeaseManager::new(Arc::new(store.clone()), "node-b", ttl),
        )
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let store = MemoryStore::new();
        let (a, b) = managers(&store);

        let lease = a.acquire("lock").await.unwrap().unwrap();
        assert!(lease.token().starts_with("node-a:"));
        assert!(b.acquire("lock").await.unwrap().is_none());

        assert!(a.release(lease).await);
        assert!(b.acquire("lock").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_foreign_release_and_extend_are_refused() {
        let store = MemoryStore::new();
        let (a, b) = managers(&store);

        let lease = a.acquire("lock").await.unwrap().unwrap();
        let forged = Lease {
            key: "lock".to_string(),
            token: "node-b:forged".to_string(),
            ttl: Duration::from_secs(15),
        };
        assert!(!b.extend(&forged).await);
        assert!(!b.release(forged).await);
        assert_eq!(a.holder("lock").await.unwrap().as_deref(), Some(lease.token()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_pushes_expiry() {
        let store = MemoryStore::new();
        let (a, b) = managers(&store);
        let lease = a.acquire("lock").await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(a.extend(&lease).await);
        assert_eq!(store.ttl("lock"), Some(Duration::from_secs(15)));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(b.acquire("lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extend_reports_store_failure() {
        let store = MemoryStore::new();
        let (a, _) = managers(&store);
        let lease = a.acquire("lock").await.unwrap().unwrap();
        store.fail_lease_extends(true);
        assert!(!a.extend(&lease).await);
    }
}
