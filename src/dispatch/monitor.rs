//! Completion monitor
//!
//! Polls the store for the terminal state of a watched build with
//! exponential backoff. The poll loop is bounded by the invocation
//! deadline and never cancels the worker.

use crate::cache::{CacheCoordinator, Manifest, Reservation};
use crate::error::VendResult;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Summary reported when a worker vanished without a manifest or a marker
pub const VANISHED_WORKER: &str = "build worker exited without publishing a result";

/// Terminal outcome of waiting on a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Ready(Manifest),
    Failed { summary: String, diagnostic: String },
    TimedOut,
}

/// Poll interval bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl PollPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Interval following `current`
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Waits for the build owned by one reservation
pub struct CompletionMonitor<'a> {
    coordinator: &'a CacheCoordinator,
    policy: PollPolicy,
}

impl<'a> CompletionMonitor<'a> {
    pub fn new(coordinator: &'a CacheCoordinator, policy: PollPolicy) -> Self {
        Self {
            coordinator,
            policy,
        }
    }

    /// Wait for `reservation`'s build until `deadline`.
    ///
    /// A failure marker counts only when written by the watched owner. When
    /// a reclaimer replaces the reservation, the new owner is watched instead.
    pub async fn await_completion(
        &self,
        reservation: &Reservation,
        deadline: Instant,
    ) -> VendResult<Completion> {
        let fp = &reservation.fingerprint;
        let mut owner = reservation.owner;
        let mut interval = self.policy.initial;
        let mut polls = 0usize;

        loop {
            polls += 1;
            if let Some(manifest) = self.coordinator.read_manifest(fp).await? {
                debug!("Build {} ready after {} poll(s)", fp.short(), polls);
                return Ok(Completion::Ready(manifest));
            }
            if let Some(completion) = self.failure_of(reservation, owner).await? {
                return Ok(completion);
            }

            match self.coordinator.current_reservation(fp).await? {
                Some(current) if current.owner == owner => {}
                Some(current) => {
                    debug!(
                        "Build {} taken over by {}, following it",
                        fp.short(),
                        current.owner
                    );
                    owner = current.owner;
                }
                None => {
                    // Released: the worker either published or failed just now
                    if let Some(manifest) = self.coordinator.read_manifest(fp).await? {
                        return Ok(Completion::Ready(manifest));
                    }
                    if let Some(completion) = self.failure_of(reservation, owner).await? {
                        return Ok(completion);
                    }
                    return Ok(Completion::Failed {
                        summary: VANISHED_WORKER.to_string(),
                        diagnostic: String::new(),
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("Build {} still running at deadline", fp.short());
                return Ok(Completion::TimedOut);
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
            interval = self.policy.next(interval);
        }
    }

    async fn failure_of(
        &self,
        reservation: &Reservation,
        owner: uuid::Uuid,
    ) -> VendResult<Option<Completion>> {
        Ok(self
            .coordinator
            .read_failure(&reservation.fingerprint)
            .await?
            .filter(|marker| marker.owner == owner)
            .map(|marker| Completion::Failed {
                summary: marker.summary,
                diagnostic: marker.diagnostic,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{checksum, ArtifactRecord, Fingerprint, Resolution};
    use crate::request::Runtime;
    use crate::store::{MemoryStore, StoreLayout};
    use std::sync::Arc;
    use uuid::Uuid;

    fn coordinator() -> CacheCoordinator {
        CacheCoordinator::new(
            Arc::new(MemoryStore::new()),
            StoreLayout::new(""),
            Duration::from_secs(60),
            Duration::from_secs(10),
        )
    }

    fn fp() -> Fingerprint {
        "00112233445566778899aabbccddeeff".parse().unwrap()
    }

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(5), Duration::from_millis(20))
    }

    async fn acquire(coord: &CacheCoordinator) -> Reservation {
        match coord.resolve(&fp()).await.unwrap() {
            Resolution::Acquired { reservation, .. } => reservation,
            other => panic!("expected acquisition, got {other:?}"),
        }
    }

    fn manifest(coord: &CacheCoordinator, owner: Uuid) -> Manifest {
        let key = coord.layout().artifact_key(&fp(), "six-1.11.0-py2.py3-none-any.whl");
        Manifest::new(
            fp(),
            Runtime::Py36,
            vec!["six".to_string()],
            owner,
            vec![ArtifactRecord {
                package_name: "six".to_string(),
                resolved_version: "1.11.0".to_string(),
                object_key: key,
                checksum: checksum(b"six"),
                size: 3,
            }],
        )
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let policy = PollPolicy::new(Duration::from_millis(250), Duration::from_millis(1000));
        assert_eq!(policy.next(Duration::from_millis(250)), Duration::from_millis(500));
        assert_eq!(policy.next(Duration::from_millis(500)), Duration::from_millis(1000));
        assert_eq!(policy.next(Duration::from_millis(1000)), Duration::from_millis(1000));
    }

    #[test]
    fn policy_max_never_below_initial() {
        let policy = PollPolicy::new(Duration::from_millis(500), Duration::from_millis(10));
        assert_eq!(policy.max, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn ready_when_manifest_lands() {
        let coord = coordinator();
        let reservation = acquire(&coord).await;

        let publisher = coord.clone();
        let owner = reservation.owner;
        let m = manifest(&coord, owner);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            publisher.publish_manifest(&m).await.unwrap();
        });

        let monitor = CompletionMonitor::new(&coord, policy());
        let deadline = Instant::now() + Duration::from_secs(5);
        match monitor.await_completion(&reservation, deadline).await.unwrap() {
            Completion::Ready(m) => assert_eq!(m.worker_id, owner),
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn times_out_and_keeps_reservation() {
        let coord = coordinator();
        let reservation = acquire(&coord).await;

        let monitor = CompletionMonitor::new(&coord, policy());
        let started = Instant::now();
        let deadline = started + Duration::from_millis(60);
        let completion = monitor.await_completion(&reservation, deadline).await.unwrap();

        assert_eq!(completion, Completion::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            coord.current_reservation(&fp()).await.unwrap().map(|r| r.owner),
            Some(reservation.owner)
        );
    }

    #[tokio::test]
    async fn failure_marker_of_owner_fails() {
        let coord = coordinator();
        let reservation = acquire(&coord).await;
        coord
            .record_failure(&reservation, "pip wheel failed", "error: gcc missing")
            .await
            .unwrap();

        let monitor = CompletionMonitor::new(&coord, policy());
        let deadline = Instant::now() + Duration::from_secs(5);
        assert_eq!(
            monitor.await_completion(&reservation, deadline).await.unwrap(),
            Completion::Failed {
                summary: "pip wheel failed".to_string(),
                diagnostic: "error: gcc missing".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn marker_of_earlier_attempt_is_ignored() {
        let coord = coordinator();
        let reservation = acquire(&coord).await;
        let earlier = Reservation::new(fp(), Duration::from_secs(60));
        coord
            .record_failure(&earlier, "old failure", "")
            .await
            .unwrap();

        let monitor = CompletionMonitor::new(&coord, policy());
        let deadline = Instant::now() + Duration::from_millis(40);
        assert_eq!(
            monitor.await_completion(&reservation, deadline).await.unwrap(),
            Completion::TimedOut
        );
    }

    #[tokio::test]
    async fn released_without_result_fails() {
        let coord = coordinator();
        let reservation = acquire(&coord).await;
        coord.release(&reservation).await.unwrap();

        let monitor = CompletionMonitor::new(&coord, policy());
        let deadline = Instant::now() + Duration::from_secs(5);
        match monitor.await_completion(&reservation, deadline).await.unwrap() {
            Completion::Failed { summary, .. } => assert_eq!(summary, VANISHED_WORKER),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn store_outage_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let coord = CacheCoordinator::new(
            store.clone(),
            StoreLayout::new(""),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );
        let reservation = acquire(&coord).await;
        store.set_unavailable(true);

        let monitor = CompletionMonitor::new(&coord, policy());
        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(monitor.await_completion(&reservation, deadline).await.is_err());
    }
}
