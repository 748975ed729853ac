//! Batch Registry
//!
//! Data-access and validation layer for `BatchResource` records. The
//! registry holds no state of its own: every operation re-reads world state,
//! and every failure is returned to the caller without retry.

use crate::{
    BatchResource, NewBatch, RegistryError, RegistryResult, StoreError,
    query::{BatchField, Selector},
    state::WorldState,
};
use tracing::{debug, info, warn};

/// Key of the record written by [`BatchRegistry::init_ledger`]
pub const SEED_BATCH_ID: &str = "batch1";

/// Batch provenance registry over a world state store
#[derive(Clone, Debug)]
pub struct BatchRegistry<S> {
    state: S,
}

impl<S: WorldState> BatchRegistry<S> {
    /// Creates a registry reading and writing through `state`
    pub fn new(state: S) -> Self {
        Self { state }
    }

    /// Access the underlying world state
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Seed the ledger with the example barrel record
    ///
    /// Overwrites `batch1` unconditionally; running it twice leaves the same
    /// record (with a fresh timestamp).
    pub async fn init_ledger(&self) -> RegistryResult<()> {
        let seed = BatchResource {
            id: SEED_BATCH_ID.to_string(),
            batch_id: "BARREL0001".to_string(),
            actor_id: "WINEPRODUCER01".to_string(),
            step: "WINEPRODUCTION001".to_string(),
            product_name: "Malvasia DOC".to_string(),
            product_category: "Malvasia".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            parent_batches: vec!["GRAPEGROWER01_GRAPES0001".to_string()],
            attachment_refs: vec![
                "QmZ1234567890abcdef1234567890abcdef1234567890abcd".to_string(),
                "QmZ0987654321fedcba0987654321fedcba0987654321fedc".to_string(),
            ],
        };

        self.state.put(&seed.id, seed.to_bytes()?).await?;
        info!("Seeded ledger with batch {}", seed.id);
        Ok(())
    }

    /// Create a new batch record
    ///
    /// # Errors
    /// * `AlreadyExists` if a record with the same ID is stored
    /// * `Serialization` if the record cannot be encoded
    /// * `Storage` if world state cannot be read or written
    pub async fn create_batch(&self, new_batch: NewBatch) -> RegistryResult<()> {
        let id = new_batch.id.clone();
        if self.batch_exists(&id).await? {
            return Err(RegistryError::AlreadyExists(id));
        }

        debug!(
            "Creating batch {} (parents supplied: {}, attachments supplied: {})",
            id,
            new_batch.parent_batches.is_present(),
            new_batch.attachment_refs.is_present()
        );
        let batch = new_batch.into_resource();
        let bytes = batch.to_bytes()?;

        // Another invocation may have created the key since the existence check
        if !self.state.compare_and_put(&id, None, bytes).await? {
            warn!("Batch {} was created concurrently", id);
            return Err(RegistryError::AlreadyExists(id));
        }

        info!("Created batch {} for actor {}", id, batch.actor_id);
        Ok(())
    }

    /// Whether a record is stored under `id`
    pub async fn batch_exists(&self, id: &str) -> RegistryResult<bool> {
        Ok(self.state.get(id).await?.is_some())
    }

    /// Read the record stored under `id`
    pub async fn read_batch(&self, id: &str) -> RegistryResult<BatchResource> {
        self.read_with_bytes(id).await.map(|(batch, _)| batch)
    }

    /// Append an attachment reference to an existing record
    ///
    /// The write is conditional on the record being unchanged since it was
    /// read; a concurrent update fails with `Storage` instead of being lost.
    pub async fn add_attachment_ref(&self, id: &str, attachment_ref: &str) -> RegistryResult<()> {
        let (mut batch, current) = self.read_with_bytes(id).await?;
        batch.attachment_refs.push(attachment_ref.to_string());

        let updated = batch.to_bytes()?;
        if !self.state.compare_and_put(id, Some(&current), updated).await? {
            warn!("Lost update appending attachment to batch {}", id);
            return Err(StoreError::Conflict { key: id.to_string() }.into());
        }

        info!(
            "Appended attachment {} to batch {} ({} total)",
            attachment_ref,
            id,
            batch.attachment_refs.len()
        );
        Ok(())
    }

    /// All records recorded by `actor_id`
    pub async fn query_batches_by_actor(&self, actor_id: &str) -> RegistryResult<Vec<BatchResource>> {
        self.query_batches_with(&Selector::field_eq(BatchField::ActorId, actor_id))
            .await
    }

    /// All records in `product_category`
    pub async fn query_batches_by_product_category(
        &self,
        product_category: &str,
    ) -> RegistryResult<Vec<BatchResource>> {
        self.query_batches_with(&Selector::field_eq(BatchField::ProductCategory, product_category))
            .await
    }

    /// Run a selector given as text
    ///
    /// # Errors
    /// * `Query` if the selector is malformed or the query cannot run
    /// * `Serialization` if any matched record cannot be decoded
    pub async fn query_batches(&self, selector: &str) -> RegistryResult<Vec<BatchResource>> {
        let selector = Selector::parse(selector).map_err(|e| RegistryError::Query(e.to_string()))?;
        self.query_batches_with(&selector).await
    }

    /// Run a structured selector, decoding every match
    ///
    /// Either every match decodes or the whole query fails.
    pub async fn query_batches_with(&self, selector: &Selector) -> RegistryResult<Vec<BatchResource>> {
        debug!("Running query {}", selector);
        let results = self
            .state
            .query(selector)
            .await
            .map_err(|e| RegistryError::Query(e.to_string()))?;

        let mut batches = Vec::new();
        for item in results {
            let (key, value) = item.map_err(|e| RegistryError::Query(e.to_string()))?;
            let batch = BatchResource::from_bytes(&value).map_err(|e| {
                warn!("Undecodable record under key {}: {}", key, e);
                e
            })?;
            batches.push(batch);
        }

        debug!("Query returned {} batches", batches.len());
        Ok(batches)
    }

    async fn read_with_bytes(&self, id: &str) -> RegistryResult<(BatchResource, Vec<u8>)> {
        let bytes = self
            .state
            .get(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let batch = BatchResource::from_bytes(&bytes)?;
        Ok((batch, bytes))
    }
}
