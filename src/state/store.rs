//! World State Store Interface
//!
//! The registry never talks to a ledger runtime directly. Everything it needs
//! from the host is expressed by the [`WorldState`] trait: point reads and
//! writes keyed by record ID, a compare-and-put for optimistic concurrency,
//! and a selector query returning a lazy result cursor.

use crate::{StoreError, StoreResult, query::Selector};
use std::future::Future;
use tracing::debug;

/// Key-value world state with a rich-query capability
///
/// Keys are opaque non-empty strings and values opaque bytes; the store
/// never interprets values except when evaluating a query selector. An empty
/// key fails with `StoreError::EmptyKey`.
pub trait WorldState: Clone + Send + Sync + 'static {
    /// Read the value stored under `key`, `None` if absent
    fn get(&self, key: &str) -> impl Future<Output = StoreResult<Option<Vec<u8>>>> + Send;

    /// Write `value` under `key`, replacing any previous value
    fn put(&self, key: &str, value: Vec<u8>) -> impl Future<Output = StoreResult<()>> + Send;

    /// Write `value` only if the current value equals `expected`
    ///
    /// `expected = None` means the key must be absent. Returns `false`
    /// without writing when the current value differs.
    fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Run a selector query, returning a cursor over matching `(key, value)` pairs
    fn query(&self, selector: &Selector) -> impl Future<Output = StoreResult<QueryResults>> + Send;
}

/// Reject keys no world state accepts
pub(crate) fn check_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::EmptyKey);
    }
    Ok(())
}

type ResultIter = Box<dyn Iterator<Item = StoreResult<(String, Vec<u8>)>> + Send>;
type CloseHook = Box<dyn FnOnce() + Send>;

/// Lazy cursor over query results
///
/// The underlying cursor is released when the value is dropped, whether the
/// caller exhausted it, stopped early, or bailed out on an error.
pub struct QueryResults {
    inner: ResultIter,
    on_close: Option<CloseHook>,
    yielded: usize,
}

impl QueryResults {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = StoreResult<(String, Vec<u8>)>> + Send + 'static,
    {
        Self {
            inner: Box::new(iter),
            on_close: None,
            yielded: 0,
        }
    }

    /// Attach a hook that runs exactly once when the cursor is closed
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Close the cursor explicitly
    pub fn close(self) {
        drop(self);
    }
}

impl Iterator for QueryResults {
    type Item = StoreResult<(String, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next();
        if item.is_some() {
            self.yielded += 1;
        }
        item
    }
}

impl Drop for QueryResults {
    fn drop(&mut self) {
        debug!("Closing query cursor after {} results", self.yielded);
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for QueryResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResults")
            .field("yielded", &self.yielded)
            .finish()
    }
}
