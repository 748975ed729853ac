//! This crate implements a batch provenance registry: a thin data-access layer
//! recording which actor processed which production batch, at which step,
//! derived from which parent batches, with which off-ledger attachments.
//! It includes modules for the data model, the world state adapter, selector
//! queries, the registry operations, the JSON-RPC API, and configuration.

pub mod types; // Record layout, creation inputs and error types.
pub mod query; // Structured selector expressions for rich queries.
pub mod state; // World state adapter trait and its in-memory and SQLite stores.
pub mod registry; // The batch registry operations.
pub mod api; // JSON-RPC invocation surface.
pub mod config; // Defines and loads service configuration.

// Re-export commonly used types and configurations for easier access.
pub use types::*;
pub use config::Config;
pub use registry::BatchRegistry;
