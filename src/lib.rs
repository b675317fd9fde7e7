//! Pageprobe, a per-page introspection library for Linux process memory.
//!
//! A [`Snapshot`] captures one virtual memory area of a target process
//! together with the physical state of every page it covers, correlated from
//! `/proc/<pid>/smaps`, `/proc/<pid>/pagemap`, `/proc/kpageflags` and
//! `/proc/kpagecount`. Two snapshots of the same mapping can be diffed to
//! show only what changed.
//!
//! Reads from the global frame tables usually require elevated privileges;
//! when they fail the affected per-frame values are reported as unavailable
//! and the snapshot build still succeeds.

pub type ProbeResult<T> = Result<T, error::ProbeError>;

pub mod error;

/// Snapshot data model and construction from the kernel tables.
pub mod snapshot;

/// Process handles: entry points for snapshotting self or a remote PID.
pub mod target;

/// Human-readable rendering of snapshots.
pub mod render;

/// Differences between two snapshots of the same mapping.
pub mod diff;

pub use error::ProbeError;
pub use snapshot::{Snapshot, SnapshotSet};
pub use target::ProcessTarget;

/// Memory page size of the running system, in bytes.
pub fn page_size() -> u64 {
    *snapshot::PAGE_SIZE
}
