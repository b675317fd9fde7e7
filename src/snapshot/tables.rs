//! Fixed-width record access to the pagemap and frame tables.
//!
//! All three tables hold native-endian u64 records; record `i` lives at byte
//! offset `i * 8`. Pagemap reads are mandatory for a snapshot build, the two
//! global frame tables are best effort: without enough privilege they cannot
//! even be opened, and that must degrade to per-frame "unavailable" values
//! rather than failing the build.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use byteorder::{ByteOrder, NativeEndian};
use nix::unistd::Pid;

use crate::error::ProbeError;
use crate::ProbeResult;

const KPAGEFLAGS_PATH: &str = "/proc/kpageflags";
const KPAGECOUNT_PATH: &str = "/proc/kpagecount";

/// Read `count` records starting at record `index` from a seekable source.
fn read_records<R: Read + Seek>(src: &mut R, index: u64, count: usize) -> io::Result<Vec<u64>> {
    src.seek(SeekFrom::Start(index * 8))?;

    let mut raw = vec![0u8; count * 8];
    src.read_exact(&mut raw)?;

    let mut records = vec![0u64; count];
    NativeEndian::read_u64_into(&raw, &mut records);
    Ok(records)
}

enum FrameTableState {
    Unopened,
    Open(File),
    Failed,
}

/// One of the global per-frame tables, opened lazily on first use.
struct FrameTable {
    path: PathBuf,
    state: RefCell<FrameTableState>,
}

impl FrameTable {
    fn new(path: PathBuf) -> FrameTable {
        FrameTable {
            path,
            state: RefCell::new(FrameTableState::Unopened),
        }
    }

    /// Best-effort read of the record for physical frame `pfn`.
    ///
    /// `None` here always means "read attempted and failed"; callers that
    /// never attempt a read (no resolvable frame) store `None` themselves.
    fn read(&self, pfn: u64) -> Option<u64> {
        let mut state = self.state.borrow_mut();

        if let FrameTableState::Unopened = *state {
            *state = match File::open(&self.path) {
                Ok(file) => FrameTableState::Open(file),
                Err(err) => {
                    log::debug!("cannot open {}: {}", self.path.display(), err);
                    FrameTableState::Failed
                }
            };
        }

        match *state {
            FrameTableState::Open(ref mut file) => match read_records(file, pfn, 1) {
                Ok(records) => Some(records[0]),
                Err(err) => {
                    log::debug!(
                        "{} read failed for frame {:#x}: {}",
                        self.path.display(),
                        pfn,
                        err
                    );
                    None
                }
            },
            FrameTableState::Failed => None,
            FrameTableState::Unopened => unreachable!(),
        }
    }
}

/// The three kernel tables consulted while building snapshots. Constructed
/// fresh for each snapshot operation; handles are not shared across calls.
pub(crate) struct Tables {
    pagemap: PathBuf,
    frame_flags: FrameTable,
    frame_counts: FrameTable,
}

impl Tables {
    pub(crate) fn for_pid(pid: Pid) -> Tables {
        Tables {
            pagemap: PathBuf::from(format!("/proc/{}/pagemap", pid)),
            frame_flags: FrameTable::new(PathBuf::from(KPAGEFLAGS_PATH)),
            frame_counts: FrameTable::new(PathBuf::from(KPAGECOUNT_PATH)),
        }
    }

    /// Read `count` pagemap entries starting at virtual page `first_page`.
    /// Any failure, including a short read, is fatal for the enclosing build.
    pub(crate) fn read_pagemap(&self, first_page: u64, count: usize) -> ProbeResult<Vec<u64>> {
        let mut file = File::open(&self.pagemap).map_err(ProbeError::TableRead)?;
        read_records(&mut file, first_page, count).map_err(ProbeError::TableRead)
    }

    pub(crate) fn frame_flags(&self, pfn: u64) -> Option<u64> {
        self.frame_flags.read(pfn)
    }

    pub(crate) fn frame_mapcount(&self, pfn: u64) -> Option<u64> {
        self.frame_counts.read(pfn)
    }
}
