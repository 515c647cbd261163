//! Platform identity -> account id cache
//!
//! Only hits are cached, so a chat that registers after its first message is
//! resolved on the next event without waiting for an entry to expire.

use crate::storage::{StorageError, StorageProvider};
use moka::future::Cache;
use std::time::Duration;
use tracing::debug;

/// Cache of resolved platform identities
#[derive(Clone)]
pub struct IdentityCache {
    cache: Cache<i64, i64>,
}

impl IdentityCache {
    /// Creates a new `IdentityCache`
    ///
    /// # Examples
    ///
    /// ```
    /// use vitte_assistant::engine::IdentityCache;
    ///
    /// let cache = IdentityCache::new(
    ///     600,    // 10 minutes TTL
    ///     10_000  // max 10k entries
    /// );
    /// ```
    #[must_use]
    pub fn new(ttl_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        Self { cache }
    }

    /// Resolve a platform identity, consulting storage on a miss
    ///
    /// # Errors
    ///
    /// Returns the storage error of the lookup.
    pub async fn resolve(
        &self,
        storage: &dyn StorageProvider,
        external_id: i64,
    ) -> Result<Option<i64>, StorageError> {
        if let Some(account_id) = self.cache.get(&external_id).await {
            return Ok(Some(account_id));
        }

        let account = storage.find_account_by_external(external_id).await?;
        if let Some(account) = &account {
            self.cache.insert(external_id, account.id).await;
            debug!(external_id, account_id = account.id, "Identity resolved");
        }
        Ok(account.map(|a| a.id))
    }

    /// Forget a mapping after the identity was linked elsewhere
    pub async fn invalidate(&self, external_id: i64) {
        self.cache.invalidate(&external_id).await;
    }

    /// Returns the current number of entries in the cache
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Account, MockStorageProvider, Role};

    fn account(id: i64) -> Account {
        Account {
            id,
            external_id: Some(42),
            username: "alice".to_string(),
            role: Role::Client,
            registered_at: String::new(),
        }
    }

    #[tokio::test]
    async fn test_hits_are_cached() -> Result<(), StorageError> {
        let mut storage = MockStorageProvider::new();
        storage
            .expect_find_account_by_external()
            .times(1)
            .returning(|_| Ok(Some(account(5))));

        let cache = IdentityCache::new(60, 100);
        assert_eq!(cache.resolve(&storage, 42).await?, Some(5));
        assert_eq!(cache.resolve(&storage, 42).await?, Some(5));
        Ok(())
    }

    #[tokio::test]
    async fn test_misses_are_not_cached() -> Result<(), StorageError> {
        let mut storage = MockStorageProvider::new();
        let mut seq = mockall::Sequence::new();
        storage
            .expect_find_account_by_external()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        storage
            .expect_find_account_by_external()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(account(9))));

        let cache = IdentityCache::new(60, 100);
        assert_eq!(cache.resolve(&storage, 42).await?, None);
        assert_eq!(cache.resolve(&storage, 42).await?, Some(9));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalidate_forces_lookup() -> Result<(), StorageError> {
        let mut storage = MockStorageProvider::new();
        storage
            .expect_find_account_by_external()
            .times(2)
            .returning(|_| Ok(Some(account(3))));

        let cache = IdentityCache::new(60, 100);
        cache.resolve(&storage, 42).await?;
        cache.invalidate(42).await;
        cache.resolve(&storage, 42).await?;
        Ok(())
    }
}
