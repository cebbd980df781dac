//! Protoform Store - SQLite persistence for generation records
//!
//! A single `generations` table holds every record; metadata (edit history,
//! tags, asset hashes) is stored as JSON text. The store is the only writer:
//! all access goes through one mutex-guarded connection, so concurrent
//! callers are serialized per call and every call is atomic for its record.

mod schema;
mod search;
mod store;

pub use search::keywords;
pub use store::{GenerationStore, StoreStats};
