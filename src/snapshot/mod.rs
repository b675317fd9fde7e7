//! The snapshot data model: one [`Snapshot`] per virtual memory area, with
//! the physical state of every page the area covers.

pub(crate) mod smaps;
pub(crate) mod tables;

pub mod pagemap;

pub use pagemap::PagemapEntry;

use crate::ProbeResult;

/// Upper bound on the number of mappings a single process is expected to
/// have. The kernel does not promise this, so it is enforced rather than
/// assumed.
pub const MAX_REGIONS: usize = 8192;

lazy_static::lazy_static! {
    /// Memory page size from system configuration.
    pub(crate) static ref PAGE_SIZE: u64 = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 };
}

/// Point-in-time state of one VMA and of every physical page behind it.
///
/// Built by [`ProcessTarget`](crate::ProcessTarget) and never mutated
/// afterwards; diffing produces rendered text, not a changed snapshot. The
/// three per-page vectors are index-parallel, ordered by ascending virtual
/// address, and `frame_flags`/`frame_mapcount` hold `None` where the frame
/// state is unavailable (page not resident, or the global tables were not
/// readable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub vma_start: u64,
    pub vma_end: u64,
    pub perms: String,
    /// File offset in bytes; 0 for anonymous mappings.
    pub offset: u64,
    /// Backing path or pseudo-name such as `[heap]`; `None` for anonymous.
    pub name: Option<String>,

    pub size_bytes: u64,
    pub resident_bytes: u64,
    /// Set when `resident_bytes` was recounted from the page tables instead
    /// of trusting the (often stale) kernel summary.
    pub resident_recomputed: bool,
    pub referenced_bytes: u64,
    pub anon_bytes: u64,
    pub anon_huge_bytes: u64,
    pub swap_bytes: u64,
    pub locked_bytes: u64,
    pub vm_flags: String,

    pub page_table_entries: Vec<PagemapEntry>,
    pub frame_flags: Vec<Option<u64>>,
    pub frame_mapcount: Vec<Option<u64>>,
}

impl Snapshot {
    /// Number of virtual pages covered by this snapshot.
    pub fn num_pages(&self) -> usize {
        self.page_table_entries.len()
    }

    /// Whether `addr` falls inside this snapshot's `[vma_start, vma_end)`.
    pub fn contains(&self, addr: u64) -> bool {
        self.vma_start <= addr && addr < self.vma_end
    }

    /// Virtual address of the page at `index`.
    pub fn page_address(&self, index: usize) -> u64 {
        self.vma_start + index as u64 * *PAGE_SIZE
    }
}

/// All snapshots of a process, one per VMA, in kernel enumeration order.
#[derive(Debug, Default)]
pub struct SnapshotSet {
    snapshots: Vec<Snapshot>,
}

impl SnapshotSet {
    pub(crate) fn new() -> SnapshotSet {
        SnapshotSet::default()
    }

    pub(crate) fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Snapshot> {
        self.snapshots.iter()
    }
}

impl<'a> IntoIterator for &'a SnapshotSet {
    type Item = &'a Snapshot;
    type IntoIter = std::slice::Iter<'a, Snapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Recount the resident set from the per-page entries and override the
/// kernel-reported value when they disagree.
///
/// The summary counters in smaps update asynchronously relative to the page
/// tables and can lag right after a write; the per-page data is the ground
/// truth. Only the resident size is reconciled.
pub fn reconcile(mut snapshot: Snapshot) -> Snapshot {
    let resident_pages = snapshot
        .page_table_entries
        .iter()
        .filter(|entry| entry.pfn().is_some())
        .count() as u64;
    let resident_bytes = resident_pages * *PAGE_SIZE;

    if resident_bytes != snapshot.resident_bytes {
        snapshot.resident_bytes = resident_bytes;
        snapshot.resident_recomputed = true;
    }
    snapshot
}

/// Correlate one parsed smaps region with the pagemap and frame tables.
pub(crate) fn materialize(region: smaps::Region, tables: &tables::Tables) -> ProbeResult<Snapshot> {
    let page_size = *PAGE_SIZE;
    let num_pages = ((region.size_bytes + page_size - 1) / page_size) as usize;
    let first_page = region.start / page_size;

    let page_table_entries: Vec<PagemapEntry> = tables
        .read_pagemap(first_page, num_pages)?
        .into_iter()
        .map(PagemapEntry)
        .collect();

    let mut frame_flags = Vec::with_capacity(num_pages);
    let mut frame_mapcount = Vec::with_capacity(num_pages);
    for entry in &page_table_entries {
        match entry.pfn() {
            Some(pfn) => {
                frame_flags.push(tables.frame_flags(pfn));
                frame_mapcount.push(tables.frame_mapcount(pfn));
            }
            // No resolvable frame; nothing to look up.
            None => {
                frame_flags.push(None);
                frame_mapcount.push(None);
            }
        }
    }

    let snapshot = Snapshot {
        vma_start: region.start,
        vma_end: region.end,
        perms: region.perms,
        offset: region.offset,
        name: region.name,
        size_bytes: region.size_bytes,
        resident_bytes: region.rss_bytes,
        resident_recomputed: false,
        referenced_bytes: region.referenced_bytes,
        anon_bytes: region.anon_bytes,
        anon_huge_bytes: region.anon_huge_bytes,
        swap_bytes: region.swap_bytes,
        locked_bytes: region.locked_bytes,
        vm_flags: region.vm_flags,
        page_table_entries,
        frame_flags,
        frame_mapcount,
    };

    debug_assert_eq!(snapshot.frame_flags.len(), snapshot.num_pages());
    debug_assert_eq!(snapshot.frame_mapcount.len(), snapshot.num_pages());

    Ok(reconcile(snapshot))
}
