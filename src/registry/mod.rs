//! Batch Registry Module
//!
//! This module implements the provenance operations over `BatchResource`
//! records: seeding, creation, existence checks, reads, attachment appends
//! and selector queries.

mod registry;


pub use registry::{BatchRegistry, SEED_BATCH_ID};
