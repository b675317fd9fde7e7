//! Process handles and snapshot construction.

use std::fs::File;
use std::io::BufReader;

use nix::unistd::{getpid, Pid};

use crate::error::ProbeError;
use crate::snapshot::{self, smaps::RegionCursor, tables::Tables, Snapshot, SnapshotSet};
use crate::ProbeResult;

/// End of the canonical userspace range on 64-bit Linux. Mappings above it
/// (the vsyscall page) are kernel-owned and have no pagemap entries.
const USERSPACE_END: u64 = 0xffff_8000_0000_0000;

/// A process whose memory can be snapshotted.
///
/// Holds only the PID; every snapshot call opens and closes its own handles
/// to the kernel tables, so concurrent or repeated calls do not share state.
/// Reading another user's process requires the usual ptrace-style privilege.
pub struct ProcessTarget {
    pid: Pid,
}

impl ProcessTarget {
    /// Uses the current process as the target.
    pub fn me() -> ProcessTarget {
        ProcessTarget { pid: getpid() }
    }

    /// Targets a remote process by PID.
    pub fn new(pid: Pid) -> ProcessTarget {
        ProcessTarget { pid }
    }

    /// Provides the PID of the target process.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn smaps(&self) -> ProbeResult<RegionCursor<BufReader<File>>> {
        let file = File::open(format!("/proc/{}/smaps", self.pid))?;
        Ok(RegionCursor::new(BufReader::new(file)))
    }

    /// Snapshot the VMA containing `vaddr`, or `Ok(None)` if no mapping
    /// covers that address.
    pub fn snapshot_at(&self, vaddr: u64) -> ProbeResult<Option<Snapshot>> {
        let mut cursor = self.smaps()?;
        let region = match cursor.find(vaddr)? {
            Some(region) => region,
            None => return Ok(None),
        };

        let tables = Tables::for_pid(self.pid);
        snapshot::materialize(region, &tables).map(Some)
    }

    /// Snapshot every mapping of the target process.
    pub fn snapshot_all(&self) -> ProbeResult<SnapshotSet> {
        let mut cursor = self.smaps()?;
        let tables = Tables::for_pid(self.pid);
        let mut set = SnapshotSet::new();

        while let Some(region) = cursor.next_region()? {
            if region.start >= USERSPACE_END {
                log::debug!("skipping kernel-owned mapping at {:#x}", region.start);
                continue;
            }
            if set.len() == snapshot::MAX_REGIONS {
                return Err(ProbeError::CapacityExceeded(snapshot::MAX_REGIONS));
            }
            set.push(snapshot::materialize(region, &tables)?);
        }

        Ok(set)
    }
}
