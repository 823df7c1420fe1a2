//! Filesystem artifact store
//!
//! Objects are plain files under a root directory; keys map to relative
//! paths. Writes go to a temp file in the same directory and are renamed
//! into place, so readers never see partial objects. Conditional writes
//! hold an exclusive `fs2` lock on `<root>/.store.lock` for the
//! check-then-write, which makes them safe across processes sharing the
//! root (including workers with the root bind-mounted).

use crate::error::{VendError, VendResult};
use crate::store::{validate_key, ArtifactStore, ObjectMeta, WritePrecondition, WriteResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

const LOCK_FILE: &str = ".store.lock";
const TMP_DIR: &str = ".tmp";

/// Store rooted at a local (or mounted) directory
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    public_url: String,
}

impl FsStore {
    /// Create a store rooted at `root`.
    ///
    /// `public_url` is the base clients use to fetch objects; it defaults
    /// to the `file://` URL of the root.
    pub fn new(root: impl Into<PathBuf>, public_url: Option<String>) -> Self {
        let root = root.into();
        let public_url = public_url
            .unwrap_or_else(|| format!("file://{}", root.display()))
            .trim_end_matches('/')
            .to_string();
        Self { root, public_url }
    }

    /// Create the store and its root directory
    pub async fn open(root: impl Into<PathBuf>, public_url: Option<String>) -> VendResult<Self> {
        let store = Self::new(root, public_url);
        tokio::fs::create_dir_all(store.root.join(TMP_DIR))
            .await
            .map_err(|e| VendError::store(format!("create {}: {e}", store.root.display())))?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> VendResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn store_err(action: &str, path: &Path, e: std::io::Error) -> VendError {
    VendError::store(format!("{action} {}: {e}", path.display()))
}

/// Version token: modification time plus length
fn version_of(meta: &fs::Metadata) -> String {
    let nanos = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos());
    format!("{:x}-{:x}", nanos, meta.len())
}

fn object_meta(key: String, meta: &fs::Metadata) -> ObjectMeta {
    let last_modified: DateTime<Utc> = meta.modified().map(DateTime::from).unwrap_or_default();
    ObjectMeta {
        key,
        size: meta.len(),
        version: version_of(meta),
        last_modified,
    }
}

fn current_version(path: &Path) -> VendResult<Option<String>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(version_of(&meta))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(store_err("stat", path, e)),
    }
}

fn write_atomic(root: &Path, path: &Path, data: &[u8]) -> VendResult<String> {
    let parent = path
        .parent()
        .ok_or_else(|| VendError::store(format!("no parent for {}", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| store_err("create", parent, e))?;

    let tmp_dir = root.join(TMP_DIR);
    fs::create_dir_all(&tmp_dir).map_err(|e| store_err("create", &tmp_dir, e))?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(&tmp_dir).map_err(|e| store_err("create temp in", &tmp_dir, e))?;
    tmp.write_all(data)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| store_err("write", tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| store_err("rename into", path, e.error))?;

    let meta = fs::metadata(path).map_err(|e| store_err("stat", path, e))?;
    Ok(version_of(&meta))
}

fn lock_store(root: &Path) -> VendResult<File> {
    fs::create_dir_all(root).map_err(|e| store_err("create", root, e))?;
    let path = root.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| store_err("open lock", &path, e))?;
    file.lock_exclusive()
        .map_err(|e| store_err("lock", &path, e))?;
    Ok(file)
}

fn put_blocking(
    root: &Path,
    path: &Path,
    data: &[u8],
    precondition: WritePrecondition,
) -> VendResult<WriteResult> {
    if precondition == WritePrecondition::None {
        let version = write_atomic(root, path, data)?;
        return Ok(WriteResult::Success { version });
    }

    let lock = lock_store(root)?;
    let current = current_version(path)?;

    let allowed = match (&precondition, &current) {
        (WritePrecondition::DoesNotExist, None) => true,
        (WritePrecondition::MatchesVersion(expected), Some(actual)) => expected == actual,
        _ => false,
    };

    let result = if allowed {
        write_atomic(root, path, data).map(|version| WriteResult::Success { version })
    } else {
        Ok(WriteResult::PreconditionFailed {
            current_version: current.unwrap_or_default(),
        })
    };

    // Closing the file releases the lock as well
    let _ = FileExt::unlock(&lock);
    result
}

fn is_internal(rel: &Path) -> bool {
    rel.components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .is_some_and(|first| first == TMP_DIR || first == LOCK_FILE)
}

fn list_blocking(root: &Path, prefix: &str) -> VendResult<Vec<ObjectMeta>> {
    // Start from the deepest directory fully named by the prefix
    let base = match prefix.rfind('/') {
        Some(idx) => root.join(&prefix[..idx]),
        None => root.to_path_buf(),
    };

    let mut out = Vec::new();
    let mut pending = vec![base];
    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(store_err("read", &dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| store_err("read", &dir, e))?;
            let path = entry.path();
            let meta = entry.metadata().map_err(|e| store_err("stat", &path, e))?;
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            if is_internal(rel) {
                continue;
            }
            if meta.is_dir() {
                pending.push(path);
                continue;
            }
            let key = rel
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                out.push(object_meta(key, &meta));
            }
        }
    }

    out.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(out)
}

async fn blocking<T, F>(f: F) -> VendResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> VendResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VendError::Internal(format!("store task failed: {e}")))?
}

#[async_trait]
impl ArtifactStore for FsStore {
    async fn get(&self, key: &str) -> VendResult<Option<Bytes>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_err("read", &path, e)),
        }
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> VendResult<WriteResult> {
        let path = self.path_for(key)?;
        let root = self.root.clone();
        blocking(move || put_blocking(&root, &path, &data, precondition)).await
    }

    async fn delete(&self, key: &str) -> VendResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_err("delete", &path, e)),
        }
    }

    async fn list(&self, prefix: &str) -> VendResult<Vec<ObjectMeta>> {
        if !prefix.is_empty() {
            validate_key(prefix.trim_end_matches('/'))?;
        }
        let root = self.root.clone();
        let prefix = prefix.to_string();
        blocking(move || list_blocking(&root, &prefix)).await
    }

    async fn head(&self, key: &str) -> VendResult<Option<ObjectMeta>> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(object_meta(key.to_string(), &meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_err("stat", &path, e)),
        }
    }

    fn location(&self, key: &str) -> String {
        format!("{}/{}", self.public_url, key)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, FsStore) {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path(), None).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let (_dir, store) = store().await;
        store
            .put("builds/x/a.whl", Bytes::from_static(b"wheel"), WritePrecondition::None)
            .await
            .unwrap();
        let data = store.get("builds/x/a.whl").await.unwrap().unwrap();
        assert_eq!(&data[..], b"wheel");
        assert!(store.get("builds/x/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_if_absent_only_once() {
        let (_dir, store) = store().await;
        let first = store
            .put("k/.reservation", Bytes::from_static(b"a"), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        let second = store
            .put("k/.reservation", Bytes::from_static(b"b"), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        assert!(first.is_success());
        assert!(!second.is_success());
        assert_eq!(&store.get("k/.reservation").await.unwrap().unwrap()[..], b"a");
    }

    #[tokio::test]
    async fn concurrent_create_has_one_winner() {
        let (_dir, store) = store().await;
        let store = std::sync::Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put("k/.reservation", Bytes::from(vec![i]), WritePrecondition::DoesNotExist)
                    .await
                    .unwrap()
                    .is_success()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn compare_and_swap_uses_head_version() {
        let (_dir, store) = store().await;
        store
            .put("k", Bytes::from_static(b"one"), WritePrecondition::None)
            .await
            .unwrap();
        let meta = store.head("k").await.unwrap().unwrap();

        let swapped = store
            .put("k", Bytes::from_static(b"two!"), WritePrecondition::MatchesVersion(meta.version.clone()))
            .await
            .unwrap();
        assert!(swapped.is_success());

        let stale = store
            .put("k", Bytes::from_static(b"three"), WritePrecondition::MatchesVersion(meta.version))
            .await
            .unwrap();
        assert!(!stale.is_success());
    }

    #[tokio::test]
    async fn list_hides_internal_files() {
        let (_dir, store) = store().await;
        for key in ["builds/a/x.whl", "builds/a/manifest.json", "builds/b/y.whl", "sources/a/r.txt"] {
            store
                .put(key, Bytes::from_static(b"."), WritePrecondition::DoesNotExist)
                .await
                .unwrap();
        }

        let keys: Vec<String> = store.list("builds/").await.unwrap().into_iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["builds/a/manifest.json", "builds/a/x.whl", "builds/b/y.whl"]);

        let all = store.list("").await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|m| !m.key.starts_with('.')));
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let (_dir, store) = store().await;
        assert!(store.get("../outside").await.is_err());
        assert!(store
            .put("/etc/passwd", Bytes::new(), WritePrecondition::None)
            .await
            .is_err());
    }

    #[test]
    fn location_uses_public_url() {
        let store = FsStore::new("/srv/store", Some("https://wheels.example/".to_string()));
        assert_eq!(
            store.location("builds/f/a.whl"),
            "https://wheels.example/builds/f/a.whl"
        );
        let local = FsStore::new("/srv/store", None);
        assert_eq!(local.location("k"), "file:///srv/store/k");
    }
}
