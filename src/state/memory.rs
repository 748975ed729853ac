use super::{QueryResults, WorldState, store::check_key};
use crate::{StoreResult, query::Selector};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-memory world state for tests and embedding
///
/// Cloning shares the same underlying map. Query results come back in key
/// order.
#[derive(Clone, Default)]
pub struct InMemoryWorldState {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    open_queries: Arc<AtomicUsize>,
}

impl InMemoryWorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Number of query cursors not yet closed
    pub fn open_queries(&self) -> usize {
        self.open_queries.load(Ordering::SeqCst)
    }
}

impl WorldState for InMemoryWorldState {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        check_key(key)?;
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        check_key(key)?;
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
    ) -> StoreResult<bool> {
        check_key(key)?;
        let mut entries = self.entries.write().await;
        if entries.get(key).map(Vec::as_slice) != expected {
            return Ok(false);
        }
        entries.insert(key.to_string(), value);
        Ok(true)
    }

    async fn query(&self, selector: &Selector) -> StoreResult<QueryResults> {
        // Snapshot under the read lock, then match lazily as the cursor advances
        let snapshot: Vec<(String, Vec<u8>)> = {
            let entries = self.entries.read().await;
            entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let selector = selector.clone();
        let matches = snapshot
            .into_iter()
            .filter(move |(_, value)| selector.matches_bytes(value))
            .map(Ok);

        self.open_queries.fetch_add(1, Ordering::SeqCst);
        let open_queries = self.open_queries.clone();
        Ok(QueryResults::new(matches).on_close(move || {
            open_queries.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}

impl std::fmt::Debug for InMemoryWorldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryWorldState")
            .field("open_queries", &self.open_queries())
            .finish()
    }
}
