//! Connection registry.
//!
//! The registry is a thin façade over connection identity storage. The
//! storage itself is an external collaborator expressed as the
//! [`ConnectionStore`] trait; [`MemoryStore`] is the in-process default.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Unique identifier for a connection.
///
/// Assigned by the transport at connect time and immutable for the
/// connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        Self(format!("conn_{timestamp:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the operation.
    #[error("store operation failed: {0}")]
    Operation(String),
}

/// One page of a registry scan.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Connection IDs in this page.
    pub ids: Vec<ConnectionId>,
    /// Continuation cursor; `None` when the scan is exhausted.
    pub cursor: Option<String>,
}

/// Key-value storage for connection identities.
///
/// Implementations must deduplicate by connection ID. Individual operations
/// are atomic; a scan is not transactionally isolated from concurrent puts
/// and deletes.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Idempotent upsert of a connection ID.
    async fn put(&self, id: &ConnectionId) -> Result<(), StoreError>;

    /// Fetch one page of connection IDs, resuming from `cursor`.
    async fn scan(&self, cursor: Option<String>) -> Result<ScanPage, StoreError>;

    /// Idempotent delete; removing an absent ID is not an error.
    async fn delete(&self, id: &ConnectionId) -> Result<(), StoreError>;
}

/// CRUD façade over a [`ConnectionStore`].
#[derive(Clone)]
pub struct ConnectionRegistry {
    store: Arc<dyn ConnectionStore>,
}

impl ConnectionRegistry {
    /// Create a registry over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ConnectionStore>) -> Self {
        Self { store }
    }

    /// Register a connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable; fatal for the
    /// enclosing request.
    pub async fn register(&self, id: &ConnectionId) -> Result<(), StoreError> {
        self.store.put(id).await?;
        debug!(connection = %id, "Connection registered");
        Ok(())
    }

    /// Enumerate every registered connection.
    ///
    /// Follows continuation cursors until the scan is exhausted; registry
    /// size is unbounded, so a single page is never assumed to be complete.
    ///
    /// # Errors
    ///
    /// Returns an error if any page read fails.
    pub async fn list_all(&self) -> Result<Vec<ConnectionId>, StoreError> {
        let mut ids = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.store.scan(cursor).await?;
            ids.extend(page.ids);
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(ids)
    }

    /// Remove a connection. Removing an absent ID is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub async fn remove(&self, id: &ConnectionId) -> Result<(), StoreError> {
        self.store.delete(id).await?;
        debug!(connection = %id, "Connection removed");
        Ok(())
    }
}

/// In-memory connection store.
///
/// Scans page over a sorted snapshot of the keys, using the last ID of the
/// previous page as the cursor, so interleaved deletes cannot skip or
/// duplicate entries.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, ()>,
    page_size: usize,
}

/// Default scan page size for [`MemoryStore`].
pub const DEFAULT_PAGE_SIZE: usize = 128;

impl MemoryStore {
    /// Create a store with the default page size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create a store with a specific scan page size.
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            page_size: page_size.max(1),
        }
    }

    /// Number of stored connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn put(&self, id: &ConnectionId) -> Result<(), StoreError> {
        self.entries.insert(id.as_str().to_string(), ());
        Ok(())
    }

    async fn scan(&self, cursor: Option<String>) -> Result<ScanPage, StoreError> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort_unstable();

        let remaining: Vec<String> = match cursor {
            Some(after) => keys.into_iter().filter(|k| k.as_str() > after.as_str()).collect(),
            None => keys,
        };

        let page: Vec<String> = remaining.iter().take(self.page_size).cloned().collect();
        let cursor = if remaining.len() > page.len() {
            page.last().cloned()
        } else {
            None
        };

        Ok(ScanPage {
            ids: page.into_iter().map(ConnectionId::from).collect(),
            cursor,
        })
    }

    async fn delete(&self, id: &ConnectionId) -> Result<(), StoreError> {
        self.entries.remove(id.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(page_size: usize) -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(MemoryStore::with_page_size(page_size)))
    }

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = registry(16);
        let id = ConnectionId::from("c1");

        registry.register(&id).await.unwrap();
        registry.register(&id).await.unwrap();

        let all = registry.list_all().await.unwrap();
        assert_eq!(all, vec![id]);
    }

    #[tokio::test]
    async fn test_list_all_follows_cursors() {
        let registry = registry(2);
        for name in ["c1", "c2", "c3", "c4", "c5"] {
            registry.register(&ConnectionId::from(name)).await.unwrap();
        }

        let mut all = registry.list_all().await.unwrap();
        all.sort();
        let names: Vec<&str> = all.iter().map(ConnectionId::as_str).collect();
        assert_eq!(names, vec!["c1", "c2", "c3", "c4", "c5"]);
    }

    #[tokio::test]
    async fn test_scan_pages_are_bounded() {
        let store = MemoryStore::with_page_size(2);
        for name in ["a", "b", "c"] {
            store.put(&ConnectionId::from(name)).await.unwrap();
        }

        let first = store.scan(None).await.unwrap();
        assert_eq!(first.ids.len(), 2);
        assert!(first.cursor.is_some());

        let second = store.scan(first.cursor).await.unwrap();
        assert_eq!(second.ids.len(), 1);
        assert!(second.cursor.is_none());
    }

    #[tokio::test]
    async fn test_remove_absent_is_not_an_error() {
        let registry = registry(16);
        registry.remove(&ConnectionId::from("ghost")).await.unwrap();
        assert!(registry.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_deletes_entry() {
        let registry = registry(16);
        registry.register(&ConnectionId::from("c1")).await.unwrap();
        registry.register(&ConnectionId::from("c2")).await.unwrap();

        registry.remove(&ConnectionId::from("c1")).await.unwrap();

        let all = registry.list_all().await.unwrap();
        assert_eq!(all, vec![ConnectionId::from("c2")]);
    }
}
