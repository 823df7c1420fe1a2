//! Artifact store abstraction
//!
//! The store is the only shared mutable resource between invocations and
//! workers. Backends must provide:
//! - Conditional writes (create-if-absent, compare-and-swap on version)
//! - Listing by key prefix
//! - Idempotent deletes
//!
//! A failed precondition is a normal `WriteResult`, never an error. Backend
//! failures surface as `VendError::StoreUnavailable`.

pub mod fs;
pub mod layout;
pub mod memory;
pub mod scoped;

pub use fs::FsStore;
pub use layout::StoreLayout;
pub use memory::MemoryStore;
pub use scoped::ScopedStore;

use crate::error::{VendError, VendResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Precondition for conditional writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write unconditionally
    None,
    /// Write only if no object exists at the key
    DoesNotExist,
    /// Write only if the current object has this version
    MatchesVersion(String),
}

/// Result of a conditional write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Write succeeded
    Success { version: String },
    /// Precondition failed; `current_version` is empty when nothing exists
    PreconditionFailed { current_version: String },
}

impl WriteResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Metadata about a stored object
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Opaque version token for compare-and-swap
    pub version: String,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
}

/// Durable key/value object storage
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Read an object, `None` if absent
    async fn get(&self, key: &str) -> VendResult<Option<Bytes>>;

    /// Write an object subject to a precondition
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> VendResult<WriteResult>;

    /// Delete an object (succeeds if it does not exist)
    async fn delete(&self, key: &str) -> VendResult<()>;

    /// List objects whose key starts with `prefix`, sorted by key
    async fn list(&self, prefix: &str) -> VendResult<Vec<ObjectMeta>>;

    /// Object metadata, `None` if absent
    async fn head(&self, key: &str) -> VendResult<Option<ObjectMeta>>;

    /// Client-facing location of a key (URL or path)
    fn location(&self, key: &str) -> String;

    /// Human-readable backend name
    fn backend_name(&self) -> &'static str;
}

/// Reject keys that could escape a store's namespace
pub fn validate_key(key: &str) -> VendResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|part| part == ".." || part == ".");
    if bad {
        return Err(VendError::store(format!("invalid object key '{key}'")));
    }
    Ok(())
}

/// Read and decode a JSON object.
///
/// Returns `Err(VendError::Json)` when the object exists but is malformed,
/// so callers can tell "absent" from "corrupt".
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    key: &str,
) -> VendResult<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON object
pub async fn write_json<T: Serialize>(
    store: &dyn ArtifactStore,
    key: &str,
    value: &T,
    precondition: WritePrecondition,
) -> VendResult<WriteResult> {
    let data = Bytes::from(serde_json::to_vec_pretty(value)?);
    store.put(key, data, precondition).await
}
