//! Query Module
//!
//! Structured selector expressions for rich queries over world state.
//! Selectors are built as data and evaluated against JSON documents.

mod selector;
pub use selector::{BatchField, Selector, SelectorError};
