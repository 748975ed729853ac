//! API Module
//!
//! This module exposes the batch registry over JSON-RPC so clients can
//! submit ledger transactions and run queries over HTTP.

mod server;


pub use server::{AppState, Server};
