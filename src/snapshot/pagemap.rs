//! Bit-level decoding of `/proc/<pid>/pagemap` entries.
//!
//! Layout per `Documentation/admin-guide/mm/pagemap.rst`:
//! bit 63 present, bit 62 swapped, bit 61 file-page/shared-anon,
//! bit 57 uffd-wp write-protected, bit 56 exclusively mapped,
//! bit 55 soft-dirty; bits 0-54 are the page frame number when present and
//! not swapped, otherwise bits 0-4 are the swap type and bits 5-54 the swap
//! offset.

const SOFT_DIRTY_BIT: u64 = 55;
const EXCLUSIVE_BIT: u64 = 56;
const UFFD_WP_BIT: u64 = 57;
const FILE_BIT: u64 = 61;
const SWAPPED_BIT: u64 = 62;
const PRESENT_BIT: u64 = 63;

const PFN_MASK: u64 = (1 << 55) - 1;
const SWAP_TYPE_BITS: u64 = 5;
const SWAP_TYPE_MASK: u64 = (1 << SWAP_TYPE_BITS) - 1;
const SWAP_OFFSET_MASK: u64 = (1 << 50) - 1;

fn check_bit(value: u64, bit: u64) -> bool {
    value & (1 << bit) != 0
}

/// One raw 64-bit pagemap record for a single virtual page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagemapEntry(pub u64);

impl PagemapEntry {
    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn present(self) -> bool {
        check_bit(self.0, PRESENT_BIT)
    }

    pub fn swapped(self) -> bool {
        check_bit(self.0, SWAPPED_BIT)
    }

    pub fn soft_dirty(self) -> bool {
        check_bit(self.0, SOFT_DIRTY_BIT)
    }

    pub fn exclusive_mapped(self) -> bool {
        check_bit(self.0, EXCLUSIVE_BIT)
    }

    pub fn uffd_wp(self) -> bool {
        check_bit(self.0, UFFD_WP_BIT)
    }

    pub fn file_backed(self) -> bool {
        check_bit(self.0, FILE_BIT)
    }

    /// Physical frame number, if this page has a resolvable frame.
    ///
    /// Without `CAP_SYS_ADMIN` the kernel zeroes the PFN field but still
    /// reports the present bit, so `Some(0)` is a legitimate value.
    pub fn pfn(self) -> Option<u64> {
        if self.present() && !self.swapped() {
            Some(self.0 & PFN_MASK)
        } else {
            None
        }
    }

    /// Swap device type; only meaningful when [`swapped`](Self::swapped).
    pub fn swap_type(self) -> u64 {
        self.0 & SWAP_TYPE_MASK
    }

    /// Offset into the swap device; only meaningful when swapped.
    pub fn swap_offset(self) -> u64 {
        (self.0 >> SWAP_TYPE_BITS) & SWAP_OFFSET_MASK
    }

    /// The entry with the PFN field masked out. For pages with a resolvable
    /// frame, equal map bits mean the rows differ at most in which frame
    /// backs them; swapped and absent entries keep payload in the masked
    /// bits, so they must be compared whole.
    pub(crate) fn map_bits(self) -> u64 {
        self.0 & !PFN_MASK
    }
}

/// `/proc/kpageflags` bit numbers.
///
/// Bits 0-26 come from the uapi `linux/kernel-page-flags.h`; 32 and up are
/// kernel-internal but exposed through kpageflags anyway.
pub mod kpf {
    pub const LOCKED: u64 = 0;
    pub const ERROR: u64 = 1;
    pub const REFERENCED: u64 = 2;
    pub const UPTODATE: u64 = 3;
    pub const DIRTY: u64 = 4;
    pub const LRU: u64 = 5;
    pub const ACTIVE: u64 = 6;
    pub const SLAB: u64 = 7;
    pub const WRITEBACK: u64 = 8;
    pub const RECLAIM: u64 = 9;
    pub const BUDDY: u64 = 10;
    pub const MMAP: u64 = 11;
    pub const ANON: u64 = 12;
    pub const SWAPCACHE: u64 = 13;
    pub const SWAPBACKED: u64 = 14;
    pub const COMPOUND_HEAD: u64 = 15;
    pub const COMPOUND_TAIL: u64 = 16;
    pub const HUGE: u64 = 17;
    pub const UNEVICTABLE: u64 = 18;
    pub const HWPOISON: u64 = 19;
    pub const NOPAGE: u64 = 20;
    pub const KSM: u64 = 21;
    pub const THP: u64 = 22;
    pub const OFFLINE: u64 = 23;
    pub const ZERO_PAGE: u64 = 24;
    pub const IDLE: u64 = 25;
    pub const PGTABLE: u64 = 26;
    pub const RESERVED: u64 = 32;
    pub const MLOCKED: u64 = 33;
    pub const MAPPEDTODISK: u64 = 34;
    pub const PRIVATE: u64 = 35;
    pub const PRIVATE_2: u64 = 36;
    pub const OWNER_PRIVATE: u64 = 37;
    pub const ARCH: u64 = 38;
    pub const UNCACHED: u64 = 39;
    pub const SOFTDIRTY: u64 = 40;
    pub const ARCH_2: u64 = 41;

    /// Whether `bit` is set in a kpageflags value.
    pub fn is_set(flags: u64, bit: u64) -> bool {
        flags & (1 << bit) != 0
    }
}
