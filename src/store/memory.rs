//! In-memory artifact store
//!
//! Thread-safe via `RwLock`. Used by the test suite and for embedding;
//! contents vanish with the process. Numeric versions stand in for the
//! generation numbers of a real object store.

use crate::error::{VendError, VendResult};
use crate::store::{validate_key, ArtifactStore, ObjectMeta, WritePrecondition, WriteResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: u64,
    last_modified: DateTime<Utc>,
}

/// In-memory store with optional fault injection
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    next_version: AtomicUsize,
    unavailable: AtomicBool,
    failing_puts: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the store were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `n` writes fail
    pub fn fail_next_puts(&self, n: usize) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// Backdate an object's modification time (tests of staleness)
    pub fn set_last_modified(&self, key: &str, at: DateTime<Utc>) {
        if let Ok(mut objects) = self.objects.write() {
            if let Some(obj) = objects.get_mut(key) {
                obj.last_modified = at;
            }
        }
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> VendResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(VendError::store("memory store marked unavailable"));
        }
        Ok(())
    }

    fn meta(key: &str, obj: &StoredObject) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: obj.data.len() as u64,
            version: obj.version.to_string(),
            last_modified: obj.last_modified,
        }
    }
}

fn poisoned() -> VendError {
    VendError::Internal("memory store lock poisoned".to_string())
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn get(&self, key: &str) -> VendResult<Option<Bytes>> {
        self.check_available()?;
        validate_key(key)?;
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects.get(key).map(|o| o.data.clone()))
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> VendResult<WriteResult> {
        self.check_available()?;
        validate_key(key)?;

        let injected = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(VendError::store(format!("injected write failure for {key}")));
        }

        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        let current = objects.get(key);

        match precondition {
            WritePrecondition::None => {}
            WritePrecondition::DoesNotExist => {
                if let Some(obj) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: obj.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => match current {
                Some(obj) if obj.version.to_string() == expected => {}
                Some(obj) => {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: obj.version.to_string(),
                    })
                }
                None => {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: String::new(),
                    })
                }
            },
        }

        let version = self.next_version.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                version,
                last_modified: Utc::now(),
            },
        );

        Ok(WriteResult::Success {
            version: version.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> VendResult<()> {
        self.check_available()?;
        validate_key(key)?;
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> VendResult<Vec<ObjectMeta>> {
        self.check_available()?;
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| Self::meta(k, o))
            .collect())
    }

    async fn head(&self, key: &str) -> VendResult<Option<ObjectMeta>> {
        self.check_available()?;
        validate_key(key)?;
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects.get(key).map(|o| Self::meta(key, o)))
    }

    fn location(&self, key: &str) -> String {
        format!("memory://{}", key)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
