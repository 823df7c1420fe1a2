//! Single-flight build coordination over the artifact store
//!
//! The cache state of a fingerprint is derived purely from store objects:
//!
//! | State | Objects present |
//! |-------|-----------------|
//! | Absent | no valid manifest, no reservation |
//! | Reserved | reservation, no valid manifest |
//! | Ready | valid manifest |
//!
//! Transitions happen only through conditional writes, so any number of
//! stateless invocations can race on the same fingerprint and at most one
//! of them becomes the owner.

use crate::cache::{FailureMarker, Fingerprint, Manifest, Reservation};
use crate::error::{VendError, VendResult};
use crate::store::{
    read_json, write_json, ArtifactStore, StoreLayout, WritePrecondition, WriteResult,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Create attempts before giving up on a contended reservation
const RESERVE_ATTEMPTS: usize = 3;

/// Observed cache state of a fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildState {
    Absent,
    Reserved(Reservation),
    Ready(Manifest),
}

/// Outcome of `CacheCoordinator::resolve`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A complete build exists
    Hit(Manifest),
    /// The caller now owns the reservation and must launch a worker
    Acquired {
        reservation: Reservation,
        /// A stale reservation was taken over
        reclaimed: bool,
    },
    /// Another owner's build is in flight
    InFlight(Reservation),
}

/// Reservation read together with its store version
struct Observed {
    reservation: Option<Reservation>,
    version: String,
}

/// Drives the Absent / Reserved / Ready state machine of fingerprints
#[derive(Clone)]
pub struct CacheCoordinator {
    store: Arc<dyn ArtifactStore>,
    layout: StoreLayout,
    max_lifetime: Duration,
    grace: Duration,
}

impl CacheCoordinator {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        layout: StoreLayout,
        max_lifetime: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            layout,
            max_lifetime,
            grace,
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Current state of a fingerprint
    pub async fn inspect(&self, fp: &Fingerprint) -> VendResult<BuildState> {
        if let Some(manifest) = self.read_manifest(fp).await? {
            return Ok(BuildState::Ready(manifest));
        }
        match self.observe_reservation(fp).await? {
            Some(Observed {
                reservation: Some(reservation),
                ..
            }) => Ok(BuildState::Reserved(reservation)),
            _ => Ok(BuildState::Absent),
        }
    }

    /// Return a cache hit, or acquire or join the fingerprint's build
    pub async fn resolve(&self, fp: &Fingerprint) -> VendResult<Resolution> {
        if let Some(manifest) = self.read_manifest(fp).await? {
            debug!("Cache hit for {}", fp);
            return Ok(Resolution::Hit(manifest));
        }

        let key = self.layout.reservation_key(fp);
        for attempt in 1..=RESERVE_ATTEMPTS {
            let candidate = Reservation::new(fp.clone(), self.max_lifetime);
            match write_json(self.store.as_ref(), &key, &candidate, WritePrecondition::DoesNotExist)
                .await?
            {
                WriteResult::Success { .. } => {
                    info!("Reserved build {} (owner {})", fp.short(), candidate.owner);
                    return Ok(Resolution::Acquired {
                        reservation: candidate,
                        reclaimed: false,
                    });
                }
                WriteResult::PreconditionFailed { .. } => {}
            }

            let Some(observed) = self.observe_reservation(fp).await? else {
                // Released between our create and read; try again
                debug!("Reservation for {} vanished, retrying ({})", fp.short(), attempt);
                continue;
            };

            match observed.reservation {
                Some(existing) if !existing.is_stale(Utc::now(), self.grace) => {
                    debug!("Joining in-flight build {} (owner {})", fp.short(), existing.owner);
                    return Ok(Resolution::InFlight(existing));
                }
                stale => {
                    if let Some(ref old) = stale {
                        warn!(
                            "Reclaiming stale reservation for {} (owner {}, age {}s)",
                            fp.short(),
                            old.owner,
                            old.age(Utc::now()).as_secs()
                        );
                    } else {
                        warn!("Reclaiming unreadable reservation for {}", fp.short());
                    }

                    // A manifest may have landed while the old owner finished late
                    if let Some(manifest) = self.read_manifest(fp).await? {
                        return Ok(Resolution::Hit(manifest));
                    }

                    let takeover = write_json(
                        self.store.as_ref(),
                        &key,
                        &candidate,
                        WritePrecondition::MatchesVersion(observed.version),
                    )
                    .await?;
                    if takeover.is_success() {
                        info!("Reclaimed build {} (owner {})", fp.short(), candidate.owner);
                        return Ok(Resolution::Acquired {
                            reservation: candidate,
                            reclaimed: true,
                        });
                    }
                    // Another invocation won the takeover; join it on the next pass
                }
            }
        }

        Err(VendError::store(format!(
            "could not settle reservation for {} after {} attempts",
            fp, RESERVE_ATTEMPTS
        )))
    }

    /// Delete the reservation if `reservation.owner` still holds it
    pub async fn release(&self, reservation: &Reservation) -> VendResult<()> {
        let fp = &reservation.fingerprint;
        match self.observe_reservation(fp).await? {
            Some(Observed {
                reservation: Some(current),
                ..
            }) if current.owner == reservation.owner => {
                self.store.delete(&self.layout.reservation_key(fp)).await?;
                debug!("Released reservation for {}", fp.short());
            }
            Some(_) => debug!(
                "Reservation for {} no longer owned by {}, leaving it",
                fp.short(),
                reservation.owner
            ),
            None => {}
        }
        Ok(())
    }

    /// Valid manifest of a fingerprint. Malformed manifests count as absent.
    pub async fn read_manifest(&self, fp: &Fingerprint) -> VendResult<Option<Manifest>> {
        let key = self.layout.manifest_key(fp);
        match read_json::<Manifest>(self.store.as_ref(), &key).await {
            Ok(Some(manifest)) => match manifest.validate(fp, &self.layout.build_prefix(fp)) {
                Ok(()) => Ok(Some(manifest)),
                Err(e) => {
                    warn!("Ignoring {}: {}", key, e);
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(VendError::Json(e)) => {
                warn!("Ignoring unparseable {}: {}", key, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Publish a manifest exactly once.
    ///
    /// An existing valid manifest means another worker already committed the
    /// same fingerprint, which counts as success. A malformed one is replaced.
    pub async fn publish_manifest(&self, manifest: &Manifest) -> VendResult<()> {
        let fp = &manifest.fingerprint;
        let key = self.layout.manifest_key(fp);
        let current_version =
            match write_json(self.store.as_ref(), &key, manifest, WritePrecondition::DoesNotExist)
                .await?
            {
                WriteResult::Success { .. } => {
                    info!("Published manifest for {}", fp.short());
                    return Ok(());
                }
                WriteResult::PreconditionFailed { current_version } => current_version,
            };

        if self.read_manifest(fp).await?.is_some() {
            info!("Manifest for {} already published", fp.short());
            return Ok(());
        }

        warn!("Replacing malformed manifest for {}", fp.short());
        match write_json(
            self.store.as_ref(),
            &key,
            manifest,
            WritePrecondition::MatchesVersion(current_version),
        )
        .await?
        {
            WriteResult::Success { .. } => Ok(()),
            WriteResult::PreconditionFailed { .. } => {
                // Lost to a concurrent writer; accept only if it left a valid manifest
                if self.read_manifest(fp).await?.is_some() {
                    Ok(())
                } else {
                    Err(VendError::store(format!("manifest for {} keeps changing", fp)))
                }
            }
        }
    }

    /// Failure marker of a fingerprint, if a readable one exists
    pub async fn read_failure(&self, fp: &Fingerprint) -> VendResult<Option<FailureMarker>> {
        match read_json(self.store.as_ref(), &self.layout.failure_key(fp)).await {
            Ok(marker) => Ok(marker),
            Err(VendError::Json(e)) => {
                debug!("Ignoring unreadable failure marker for {}: {}", fp.short(), e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Record a failed build for the reservation's owner
    pub async fn record_failure(
        &self,
        reservation: &Reservation,
        summary: &str,
        diagnostic: &str,
    ) -> VendResult<()> {
        let marker = FailureMarker::new(reservation.owner, summary, diagnostic);
        write_json(
            self.store.as_ref(),
            &self.layout.failure_key(&reservation.fingerprint),
            &marker,
            WritePrecondition::None,
        )
        .await?;
        Ok(())
    }

    /// Current reservation of a fingerprint, re-read from the store
    pub async fn current_reservation(&self, fp: &Fingerprint) -> VendResult<Option<Reservation>> {
        Ok(self
            .observe_reservation(fp)
            .await?
            .and_then(|observed| observed.reservation))
    }

    /// `None` if no reservation object exists; `reservation: None` if it is unreadable
    async fn observe_reservation(&self, fp: &Fingerprint) -> VendResult<Option<Observed>> {
        let key = self.layout.reservation_key(fp);
        let Some(meta) = self.store.head(&key).await? else {
            return Ok(None);
        };
        let reservation = match read_json::<Reservation>(self.store.as_ref(), &key).await {
            Ok(Some(r)) if &r.fingerprint == fp => Some(r),
            Ok(Some(_)) | Err(VendError::Json(_)) => None,
            Ok(None) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(Observed {
            reservation,
            version: meta.version,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{checksum, ArtifactRecord};
    use crate::request::Runtime;
    use crate::store::MemoryStore;
    use bytes::Bytes;

    fn fp() -> Fingerprint {
        "00112233445566778899aabbccddeeff".parse().unwrap()
    }

    fn coordinator(store: Arc<MemoryStore>) -> CacheCoordinator {
        CacheCoordinator::new(
            store,
            StoreLayout::new(""),
            Duration::from_secs(900),
            Duration::from_secs(120),
        )
    }

    fn manifest(owner: uuid::Uuid) -> Manifest {
        let layout = StoreLayout::new("");
        Manifest::new(
            fp(),
            Runtime::Py36,
            vec!["six".into()],
            owner,
            vec![ArtifactRecord {
                package_name: "six".into(),
                resolved_version: "1.11.0".into(),
                object_key: layout.artifact_key(&fp(), "six-1.11.0-py2.py3-none-any.whl"),
                checksum: checksum(b"wheel"),
                size: 5,
            }],
        )
    }

    #[tokio::test]
    async fn cold_cache_acquires() {
        let store = Arc::new(MemoryStore::new());
        let coord = coordinator(store);
        assert_eq!(coord.inspect(&fp()).await.unwrap(), BuildState::Absent);

        let resolution = coord.resolve(&fp()).await.unwrap();
        let Resolution::Acquired { reservation, reclaimed } = resolution else {
            panic!("expected acquisition");
        };
        assert!(!reclaimed);
        assert_eq!(
            coord.inspect(&fp()).await.unwrap(),
            BuildState::Reserved(reservation)
        );
    }

    #[tokio::test]
    async fn second_resolver_joins() {
        let coord = coordinator(Arc::new(MemoryStore::new()));
        let Resolution::Acquired { reservation, .. } = coord.resolve(&fp()).await.unwrap() else {
            panic!("expected acquisition");
        };
        match coord.resolve(&fp()).await.unwrap() {
            Resolution::InFlight(joined) => assert_eq!(joined.owner, reservation.owner),
            other => panic!("expected join, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_resolvers_have_one_owner() {
        let coord = coordinator(Arc::new(MemoryStore::new()));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let coord = coord.clone();
            handles.push(tokio::spawn(async move { coord.resolve(&fp()).await.unwrap() }));
        }
        let mut owners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Resolution::Acquired { .. }) {
                owners += 1;
            }
        }
        assert_eq!(owners, 1);
    }

    #[tokio::test]
    async fn published_manifest_is_a_hit() {
        let coord = coordinator(Arc::new(MemoryStore::new()));
        let Resolution::Acquired { reservation, .. } = coord.resolve(&fp()).await.unwrap() else {
            panic!("expected acquisition");
        };
        coord.publish_manifest(&manifest(reservation.owner)).await.unwrap();
        coord.release(&reservation).await.unwrap();

        assert!(matches!(coord.resolve(&fp()).await.unwrap(), Resolution::Hit(_)));
        assert!(matches!(coord.inspect(&fp()).await.unwrap(), BuildState::Ready(_)));
    }

    #[tokio::test]
    async fn stale_reservation_is_reclaimed() {
        let store = Arc::new(MemoryStore::new());
        let coord = coordinator(store.clone());

        let mut old = Reservation::new(fp(), Duration::from_secs(900));
        old.created_at = Utc::now() - chrono::Duration::hours(2);
        write_json(
            store.as_ref(),
            &coord.layout().reservation_key(&fp()),
            &old,
            WritePrecondition::None,
        )
        .await
        .unwrap();

        match coord.resolve(&fp()).await.unwrap() {
            Resolution::Acquired { reservation, reclaimed } => {
                assert!(reclaimed);
                assert_ne!(reservation.owner, old.owner);
            }
            other => panic!("expected reclaim, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreadable_reservation_is_reclaimed() {
        let store = Arc::new(MemoryStore::new());
        let coord = coordinator(store.clone());
        store
            .put(
                &coord.layout().reservation_key(&fp()),
                Bytes::from_static(b"garbage"),
                WritePrecondition::None,
            )
            .await
            .unwrap();
        assert!(matches!(
            coord.resolve(&fp()).await.unwrap(),
            Resolution::Acquired { reclaimed: true, .. }
        ));
    }

    #[tokio::test]
    async fn release_only_by_owner() {
        let coord = coordinator(Arc::new(MemoryStore::new()));
        let Resolution::Acquired { reservation, .. } = coord.resolve(&fp()).await.unwrap() else {
            panic!("expected acquisition");
        };

        let impostor = Reservation::new(fp(), Duration::from_secs(900));
        coord.release(&impostor).await.unwrap();
        assert!(matches!(coord.inspect(&fp()).await.unwrap(), BuildState::Reserved(_)));

        coord.release(&reservation).await.unwrap();
        assert_eq!(coord.inspect(&fp()).await.unwrap(), BuildState::Absent);
    }

    #[tokio::test]
    async fn malformed_manifest_treated_as_absent_and_replaced() {
        let store = Arc::new(MemoryStore::new());
        let coord = coordinator(store.clone());
        store
            .put(
                &coord.layout().manifest_key(&fp()),
                Bytes::from_static(b"{\"partial\":"),
                WritePrecondition::None,
            )
            .await
            .unwrap();

        assert_eq!(coord.inspect(&fp()).await.unwrap(), BuildState::Absent);

        let Resolution::Acquired { reservation, .. } = coord.resolve(&fp()).await.unwrap() else {
            panic!("expected acquisition");
        };
        coord.publish_manifest(&manifest(reservation.owner)).await.unwrap();
        assert!(matches!(coord.inspect(&fp()).await.unwrap(), BuildState::Ready(_)));
    }

    #[tokio::test]
    async fn second_publish_keeps_first_manifest() {
        let coord = coordinator(Arc::new(MemoryStore::new()));
        let first = manifest(uuid::Uuid::new_v4());
        coord.publish_manifest(&first).await.unwrap();
        coord.publish_manifest(&manifest(uuid::Uuid::new_v4())).await.unwrap();

        let stored = coord.read_manifest(&fp()).await.unwrap().unwrap();
        assert_eq!(stored.worker_id, first.worker_id);
    }

    #[tokio::test]
    async fn failure_marker_roundtrip() {
        let coord = coordinator(Arc::new(MemoryStore::new()));
        let reservation = Reservation::new(fp(), Duration::from_secs(900));
        coord
            .record_failure(&reservation, "pip wheel failed", "error: no gcc")
            .await
            .unwrap();
        let marker = coord.read_failure(&fp()).await.unwrap().unwrap();
        assert_eq!(marker.owner, reservation.owner);
        assert_eq!(marker.summary, "pip wheel failed");
    }

    #[tokio::test]
    async fn store_outage_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let coord = coordinator(store.clone());
        store.set_unavailable(true);
        assert!(matches!(
            coord.resolve(&fp()).await,
            Err(VendError::StoreUnavailable { .. })
        ));
    }
}
