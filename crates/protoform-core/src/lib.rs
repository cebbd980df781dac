//! Protoform Core - Foundational types for the Protoform pipeline
//!
//! This crate provides the types every other Protoform crate depends on:
//! - `RecordId` - Stable generation record identifiers
//! - `GenerationRecord` and its metadata / edit history
//! - `ContentHash` - SHA-256 based content hashing for stored assets
//! - Error types and Result alias

mod error;
mod hash;
mod id;
mod record;

pub use error::{ProtoformError, Result};
pub use hash::ContentHash;
pub use id::RecordId;
pub use record::{
    now_utc, EditEntry, FieldChange, GenerationRecord, NewRecord, RecordMetadata, RecordStatus,
};
