//! SQLite World State
//!
//! Durable world state backed by a single `world_state` table. Rich queries
//! scan the table in key order and apply the selector in process.

use super::{QueryResults, WorldState, store::check_key};
use crate::{StoreResult, query::Selector};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// World state stored in SQLite
#[derive(Clone, Debug)]
pub struct SqliteWorldState {
    pool: SqlitePool,
}

impl SqliteWorldState {
    /// Open (creating if needed) the database at `url` and prepare the schema
    ///
    /// # Arguments
    /// * `url` - SQLite connection URL, e.g. "sqlite://registry.db" or "sqlite::memory:"
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every connection to ":memory:" is a separate database, so pin the pool to one
        let in_memory = url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        info!("Opened SQLite world state at {}", url);
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the table if it is missing
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS world_state (
                key   TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

impl WorldState for SqliteWorldState {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        check_key(key)?;
        let row = sqlx::query("SELECT value FROM world_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get::<Vec<u8>, _>("value")?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        check_key(key)?;
        sqlx::query(
            "INSERT INTO world_state (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
    ) -> StoreResult<bool> {
        check_key(key)?;
        let result = match expected {
            None => {
                sqlx::query("INSERT INTO world_state (key, value) VALUES (?, ?) ON CONFLICT(key) DO NOTHING")
                    .bind(key)
                    .bind(value)
                    .execute(&self.pool)
                    .await?
            }
            Some(current) => {
                sqlx::query("UPDATE world_state SET value = ? WHERE key = ? AND value = ?")
                    .bind(value)
                    .bind(key)
                    .bind(current.to_vec())
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    async fn query(&self, selector: &Selector) -> StoreResult<QueryResults> {
        let rows = sqlx::query("SELECT key, value FROM world_state ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        let selector = selector.clone();
        let matches = rows
            .into_iter()
            .map(|row| -> StoreResult<(String, Vec<u8>)> {
                Ok((row.try_get("key")?, row.try_get("value")?))
            })
            .filter(move |item| match item {
                Ok((_, value)) => selector.matches_bytes(value),
                Err(_) => true,
            });

        Ok(QueryResults::new(matches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StoreError, query::BatchField};

    async fn open() -> SqliteWorldState {
        SqliteWorldState::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_and_put() {
        let state = open().await;
        assert_eq!(state.get("batch1").await.unwrap(), None);

        state.put("batch1", b"first".to_vec()).await.unwrap();
        state.put("batch1", b"second".to_vec()).await.unwrap();
        assert_eq!(state.get("batch1").await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let state = open().await;
        assert!(matches!(state.put("", b"v".to_vec()).await, Err(StoreError::EmptyKey)));
        assert!(matches!(
            state.compare_and_put("", None, b"v".to_vec()).await,
            Err(StoreError::EmptyKey)
        ));
        assert!(matches!(state.get("").await, Err(StoreError::EmptyKey)));
    }

    #[tokio::test]
    async fn test_compare_and_put() {
        let state = open().await;

        assert!(state.compare_and_put("k", None, b"v1".to_vec()).await.unwrap());
        assert!(!state.compare_and_put("k", None, b"v2".to_vec()).await.unwrap());
        assert!(!state.compare_and_put("k", Some(b"stale".as_slice()), b"v2".to_vec()).await.unwrap());
        assert!(state.compare_and_put("k", Some(b"v1".as_slice()), b"v2".to_vec()).await.unwrap());
        assert_eq!(state.get("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_query_matches_selector_in_key_order() {
        let state = open().await;
        state.put("b2", br#"{"productCategory":"Malvasia"}"#.to_vec()).await.unwrap();
        state.put("b1", br#"{"productCategory":"Malvasia"}"#.to_vec()).await.unwrap();
        state.put("b3", br#"{"productCategory":"Refosco"}"#.to_vec()).await.unwrap();

        let keys: Vec<String> = state
            .query(&Selector::field_eq(BatchField::ProductCategory, "Malvasia"))
            .await
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec!["b1".to_string(), "b2".to_string()]);
    }
}
