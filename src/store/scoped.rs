//! Scoped store access for build workers
//!
//! A worker may read its build input and write only under its own
//! destination prefix. `ScopedStore` wraps a backend and rejects any key
//! outside those bounds with `VendError::StoreScope`.
//!
//! # Security
//!
//! - Keys are validated before the prefix check, so `..` cannot escape
//! - Reads are limited to the source base and the destination prefix
//! - Writes and deletes are limited to the destination prefix

use crate::error::{VendError, VendResult};
use crate::store::{validate_key, ArtifactStore, ObjectMeta, WritePrecondition, WriteResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Store wrapper limited to one build's prefixes
#[derive(Clone)]
pub struct ScopedStore {
    backend: Arc<dyn ArtifactStore>,
    read_prefix: String,
    write_prefix: String,
}

impl ScopedStore {
    /// Scope `backend` to read `read_prefix` and read/write `write_prefix`
    pub fn new(
        backend: Arc<dyn ArtifactStore>,
        read_prefix: impl Into<String>,
        write_prefix: impl Into<String>,
    ) -> VendResult<Self> {
        let read_prefix = Self::validate_prefix(read_prefix.into())?;
        let write_prefix = Self::validate_prefix(write_prefix.into())?;
        Ok(Self {
            backend,
            read_prefix,
            write_prefix,
        })
    }

    fn validate_prefix(prefix: String) -> VendResult<String> {
        validate_key(prefix.trim_end_matches('/'))?;
        if prefix.ends_with('/') {
            Ok(prefix)
        } else {
            Ok(format!("{prefix}/"))
        }
    }

    pub fn write_prefix(&self) -> &str {
        &self.write_prefix
    }

    fn check_read(&self, key: &str) -> VendResult<()> {
        validate_key(key)?;
        if key.starts_with(&self.read_prefix) || key.starts_with(&self.write_prefix) {
            Ok(())
        } else {
            Err(VendError::StoreScope {
                key: key.to_string(),
            })
        }
    }

    fn check_write(&self, key: &str) -> VendResult<()> {
        validate_key(key)?;
        if key.starts_with(&self.write_prefix) {
            Ok(())
        } else {
            Err(VendError::StoreScope {
                key: key.to_string(),
            })
        }
    }
}

#[async_trait]
impl ArtifactStore for ScopedStore {
    async fn get(&self, key: &str) -> VendResult<Option<Bytes>> {
        self.check_read(key)?;
        self.backend.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> VendResult<WriteResult> {
        self.check_write(key)?;
        self.backend.put(key, data, precondition).await
    }

    async fn delete(&self, key: &str) -> VendResult<()> {
        self.check_write(key)?;
        self.backend.delete(key).await
    }

    async fn list(&self, prefix: &str) -> VendResult<Vec<ObjectMeta>> {
        let allowed =
            prefix.starts_with(&self.read_prefix) || prefix.starts_with(&self.write_prefix);
        if !allowed {
            return Err(VendError::StoreScope {
                key: prefix.to_string(),
            });
        }
        self.backend.list(prefix).await
    }

    async fn head(&self, key: &str) -> VendResult<Option<ObjectMeta>> {
        self.check_read(key)?;
        self.backend.head(key).await
    }

    fn location(&self, key: &str) -> String {
        self.backend.location(key)
    }

    fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }
}
