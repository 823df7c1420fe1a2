//! Cache listing and garbage collection
//!
//! Walks the `builds/` and `sources/` trees of the store and groups objects
//! by fingerprint. Collection removes:
//! - build inputs of fingerprints that are already Ready
//! - stale reservations and failure markers next to a valid manifest
//! - everything of abandoned builds (no manifest, no live reservation,
//!   nothing written for longer than `maxLifetime + grace`)

use crate::cache::{BuildState, CacheCoordinator, Fingerprint};
use crate::error::VendResult;
use crate::store::layout::{FAILURE_NAME, RESERVATION_NAME};
use crate::store::ObjectMeta;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Format bytes as human-readable size (e.g., "1.5 MB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Coarse state shown by `cache list`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Ready,
    Building,
    Stale,
    Incomplete,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Building => write!(f, "building"),
            Self::Stale => write!(f, "stale"),
            Self::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// One fingerprint's footprint in the store
#[derive(Debug, Clone)]
pub struct CacheEntrySummary {
    pub fingerprint: Fingerprint,
    pub state: EntryState,
    /// Number of wheels
    pub artifacts: usize,
    /// Bytes under the build prefix
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// What a collection pass removed (or would remove)
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub deleted_keys: Vec<String>,
    pub reclaimed_bytes: u64,
    pub abandoned_builds: usize,
}

fn group_by_fingerprint(
    coord: &CacheCoordinator,
    objects: Vec<ObjectMeta>,
) -> BTreeMap<Fingerprint, Vec<ObjectMeta>> {
    let mut groups: BTreeMap<Fingerprint, Vec<ObjectMeta>> = BTreeMap::new();
    for meta in objects {
        if let Some(fp) = coord.layout().fingerprint_of(&meta.key) {
            groups.entry(fp).or_default().push(meta);
        }
    }
    groups
}

fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

impl CacheCoordinator {
    /// Summaries of every fingerprint present under `builds/`
    pub async fn list_entries(&self) -> VendResult<Vec<CacheEntrySummary>> {
        let objects = self.store().list(&self.layout().builds_root()).await?;
        let now = Utc::now();

        let mut entries = Vec::new();
        for (fp, metas) in group_by_fingerprint(self, objects) {
            let state = match self.inspect(&fp).await? {
                BuildState::Ready(_) => EntryState::Ready,
                BuildState::Reserved(r) if r.is_stale(now, self.grace()) => EntryState::Stale,
                BuildState::Reserved(_) => EntryState::Building,
                BuildState::Absent => EntryState::Incomplete,
            };
            let artifacts = metas
                .iter()
                .filter(|m| m.key.ends_with(".whl"))
                .count();
            entries.push(CacheEntrySummary {
                fingerprint: fp,
                state,
                artifacts,
                size: metas.iter().map(|m| m.size).sum(),
                last_modified: metas
                    .iter()
                    .map(|m| m.last_modified)
                    .max()
                    .unwrap_or(now),
            });
        }
        Ok(entries)
    }

    /// Remove objects no longer needed. With `dry_run` nothing is deleted.
    pub async fn collect_garbage(&self, dry_run: bool) -> VendResult<GcReport> {
        let plan = self.plan_garbage().await?;
        let report = self.sweep(plan, dry_run).await?;

        info!(
            "Cache gc {}: {} objects, {}",
            if dry_run { "(dry run)" } else { "done" },
            report.deleted_keys.len(),
            format_bytes(report.reclaimed_bytes)
        );
        Ok(report)
    }

    /// Select removable objects from a listing of the store
    async fn plan_garbage(&self) -> VendResult<Vec<DoomedGroup>> {
        let layout = self.layout().clone();
        let now = Utc::now();
        let mut plan = Vec::new();

        let builds = group_by_fingerprint(self, self.store().list(&layout.builds_root()).await?);
        let sources_root = format!("{}sources/", layout.prefix());
        let mut sources: BTreeMap<Fingerprint, Vec<ObjectMeta>> = BTreeMap::new();
        for meta in self.store().list(&sources_root).await? {
            let fp = meta
                .key
                .strip_prefix(&sources_root)
                .and_then(|rest| rest.split_once('/'))
                .and_then(|(fp, _)| fp.parse::<Fingerprint>().ok());
            if let Some(fp) = fp {
                sources.entry(fp).or_default().push(meta);
            }
        }

        let mut fingerprints: Vec<Fingerprint> =
            builds.keys().chain(sources.keys()).cloned().collect();
        fingerprints.sort();
        fingerprints.dedup();

        for fp in fingerprints {
            let build_objects = builds.get(&fp).cloned().unwrap_or_default();
            let source_objects = sources.get(&fp).cloned().unwrap_or_default();

            match self.inspect(&fp).await? {
                BuildState::Ready(_) => {
                    debug!("{} is ready, dropping its input and leftovers", fp.short());
                    let mut objects = source_objects;
                    objects.extend(build_objects.into_iter().filter(|m| {
                        let name = file_name(&m.key);
                        name == FAILURE_NAME || name == RESERVATION_NAME
                    }));
                    if !objects.is_empty() {
                        plan.push(DoomedGroup {
                            fingerprint: fp,
                            abandoned: false,
                            objects,
                        });
                    }
                }
                BuildState::Reserved(r) if !r.is_stale(now, self.grace()) => {}
                _ => {
                    let newest = build_objects
                        .iter()
                        .chain(source_objects.iter())
                        .map(|m| m.last_modified)
                        .max();
                    let idle = newest
                        .map(|t| (now - t).to_std().unwrap_or(Duration::ZERO))
                        .unwrap_or(Duration::ZERO);
                    let ttl = self.max_lifetime() + self.grace();
                    if idle > ttl {
                        debug!("{} abandoned for {}s", fp.short(), idle.as_secs());
                        let mut objects = build_objects;
                        objects.extend(source_objects);
                        plan.push(DoomedGroup {
                            fingerprint: fp,
                            abandoned: true,
                            objects,
                        });
                    }
                }
            }
        }

        Ok(plan)
    }

    /// Delete planned objects that are still exactly as listed. An abandoned
    /// fingerprint that was reserved or published since the listing is left
    /// alone.
    async fn sweep(&self, plan: Vec<DoomedGroup>, dry_run: bool) -> VendResult<GcReport> {
        let mut report = GcReport::default();

        for group in plan {
            if group.abandoned && !dry_run {
                let revived = match self.inspect(&group.fingerprint).await? {
                    BuildState::Ready(_) => true,
                    BuildState::Reserved(r) => !r.is_stale(Utc::now(), self.grace()),
                    BuildState::Absent => false,
                };
                if revived {
                    info!(
                        "{} was picked up again during gc, keeping it",
                        group.fingerprint.short()
                    );
                    continue;
                }
            }
            if group.abandoned {
                report.abandoned_builds += 1;
            }

            for meta in group.objects {
                if !dry_run {
                    if !self.unchanged(&meta).await? {
                        debug!("{} changed since listing, keeping it", meta.key);
                        continue;
                    }
                    self.store().delete(&meta.key).await?;
                }
                report.reclaimed_bytes += meta.size;
                report.deleted_keys.push(meta.key);
            }
        }

        Ok(report)
    }

    /// Whether an object still has the version it was listed with
    async fn unchanged(&self, meta: &ObjectMeta) -> VendResult<bool> {
        Ok(matches!(
            self.store().head(&meta.key).await?,
            Some(current) if current.version == meta.version
        ))
    }
}

/// Objects of one fingerprint selected for removal
struct DoomedGroup {
    fingerprint: Fingerprint,
    /// No manifest and idle past `maxLifetime + grace`
    abandoned: bool,
    objects: Vec<ObjectMeta>,
}
