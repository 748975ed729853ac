//! World State Module
//!
//! This module defines the adapter between the registry and the key-value
//! world state it reads and writes, plus two implementations:
//! - `InMemoryWorldState`: shared in-process map, used by tests and embedding
//! - `SqliteWorldState`: durable SQLite-backed store

mod store;
mod memory;
mod sqlite;

pub use store::{QueryResults, WorldState};
pub use memory::InMemoryWorldState;
pub use sqlite::SqliteWorldState;
