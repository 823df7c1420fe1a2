//! Content-addressed build cache
//!
//! Builds are keyed by a fingerprint of the canonical request. A build is
//! committed by publishing its manifest, which is immutable once written.
//!
//! # Coordination Model
//!
//! - Fingerprint = SHA-256 of the canonical request (runtime, sorted
//!   requirements, sorted extra system packages)
//! - At most one worker per fingerprint, enforced by a create-if-absent
//!   reservation object
//! - Reservations older than `maxLifetime + grace` are reclaimable
//! - Failed builds leave a failure marker and no manifest, so a retry
//!   starts clean
//!
//! # Cache States
//!
//! | State | Visible objects | Next step for a caller |
//! |-------|-----------------|------------------------|
//! | Absent | none | reserve and launch a worker |
//! | Reserved | `.reservation` | wait for the owner's worker |
//! | Ready | `manifest.json` + wheels | return the manifest |

pub mod coordinator;
pub mod fingerprint;
pub mod gc;
pub mod manifest;
pub mod reservation;

pub use coordinator::{BuildState, CacheCoordinator, Resolution};
pub use fingerprint::{fingerprint, parse_fingerprint, Fingerprint};
pub use gc::{format_bytes, CacheEntrySummary, EntryState, GcReport};
pub use manifest::{checksum, ArtifactRecord, Manifest};
pub use reservation::{FailureMarker, Reservation};
