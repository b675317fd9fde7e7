//! Text rendering of snapshots: a per-VMA header followed by one row per
//! page, with long runs of equivalent rows collapsed.

use crate::snapshot::pagemap::{kpf, PagemapEntry};
use crate::snapshot::Snapshot;

/// Display-layer denylist for bulk output.
///
/// Mappings whose name matches exactly, or starts with one of the prefixes,
/// are suppressed by [`render_filtered`]. This is caller-supplied
/// configuration, not engine behavior; the default list covers the usual
/// pseudo-mappings and system paths that drown out the interesting regions.
#[derive(Debug, Clone)]
pub struct RegionFilter {
    exact: Vec<String>,
    prefixes: Vec<String>,
}

impl RegionFilter {
    pub fn new(exact: Vec<String>, prefixes: Vec<String>) -> RegionFilter {
        RegionFilter { exact, prefixes }
    }

    /// A filter that suppresses nothing.
    pub fn none() -> RegionFilter {
        RegionFilter {
            exact: Vec::new(),
            prefixes: Vec::new(),
        }
    }

    /// Whether `snapshot` should be skipped in bulk display. Anonymous
    /// mappings are never filtered.
    pub fn is_ignored(&self, snapshot: &Snapshot) -> bool {
        match &snapshot.name {
            Some(name) => {
                self.exact.iter().any(|entry| entry == name)
                    || self.prefixes.iter().any(|prefix| name.starts_with(prefix))
            }
            None => false,
        }
    }
}

impl Default for RegionFilter {
    fn default() -> RegionFilter {
        let exact = ["[vvar]", "[vdso]", "[vsyscall]", "[heap]", "[stack]"];
        let prefixes = ["/usr/bin", "/usr/lib", "/var/cache", "/usr/share"];
        RegionFilter {
            exact: exact.iter().map(|s| s.to_string()).collect(),
            prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn kib(bytes: u64) -> u64 {
    bytes / 1024
}

fn render_header(snapshot: &Snapshot, out: &mut String) {
    let name = snapshot.name.as_deref().unwrap_or("(anon)");
    out.push_str(&format!("----==== {} ====----\n\n", name));
    out.push_str(&format!(
        "{:#x} [vma_start]\n{:#x} [vma_end]\n\n",
        snapshot.vma_start, snapshot.vma_end
    ));
    out.push_str(&format!(
        "vm_size=[{}] rss=[{}{}] ref=[{}] anon=[{}] anon_huge=[{}] swap=[{}] locked=[{}]\n",
        kib(snapshot.size_bytes),
        kib(snapshot.resident_bytes),
        if snapshot.resident_recomputed { "*" } else { "" },
        kib(snapshot.referenced_bytes),
        kib(snapshot.anon_bytes),
        kib(snapshot.anon_huge_bytes),
        kib(snapshot.swap_bytes),
        kib(snapshot.locked_bytes),
    ));
    out.push_str(&format!(
        "vm_flags=[{}] perms=[{}] offset=[{}]\n\n",
        snapshot.vm_flags, snapshot.perms, snapshot.offset
    ));
}

/// Append the three-letter mnemonic of every set kpageflags bit.
///
/// MAPPEDTODISK is overloaded: on an anonymous page it actually means
/// "anon exclusive" (`AnE`), on a file page it keeps its disk meaning
/// (`Mdk`). Active/referenced are rendered separately as a tri-state.
fn push_frame_flag_tags(flags: u64, out: &mut String) {
    let anon = kpf::is_set(flags, kpf::ANON);
    let mapped_to_disk = kpf::is_set(flags, kpf::MAPPEDTODISK);

    let mut tag = |set: bool, name: &str| {
        if set {
            out.push_str(name);
            out.push(' ');
        }
    };

    tag(anon, "Ano");
    tag(mapped_to_disk && anon, "AnE");
    tag(kpf::is_set(flags, kpf::BUDDY), "Bud");
    tag(kpf::is_set(flags, kpf::COMPOUND_HEAD), "CmH");
    tag(kpf::is_set(flags, kpf::COMPOUND_TAIL), "CmT");
    tag(kpf::is_set(flags, kpf::DIRTY), "Drt");
    tag(kpf::is_set(flags, kpf::ERROR), "Err");
    tag(kpf::is_set(flags, kpf::HUGE), "Hug");
    tag(kpf::is_set(flags, kpf::HWPOISON), "xxH");
    tag(kpf::is_set(flags, kpf::IDLE), "Idl");
    tag(kpf::is_set(flags, kpf::KSM), "KSM");
    tag(kpf::is_set(flags, kpf::LOCKED), "Lok");
    tag(kpf::is_set(flags, kpf::LRU), "LRU");
    tag(mapped_to_disk && !anon, "Mdk");
    tag(kpf::is_set(flags, kpf::MMAP), "MMp");
    tag(kpf::is_set(flags, kpf::NOPAGE), "NoP");
    tag(kpf::is_set(flags, kpf::OFFLINE), "Off");
    tag(kpf::is_set(flags, kpf::PGTABLE), "Tbl");
    tag(kpf::is_set(flags, kpf::RECLAIM), "Rcm");
    tag(kpf::is_set(flags, kpf::SLAB), "Slb");
    tag(kpf::is_set(flags, kpf::SWAPBACKED), "SwB");
    tag(kpf::is_set(flags, kpf::SWAPCACHE), "SwC");
    tag(kpf::is_set(flags, kpf::THP), "THP");
    tag(kpf::is_set(flags, kpf::UNEVICTABLE), "Une");
    tag(kpf::is_set(flags, kpf::UPTODATE), "Upd");
    tag(kpf::is_set(flags, kpf::WRITEBACK), "WrB");
    tag(kpf::is_set(flags, kpf::ZERO_PAGE), "Zpg");
    tag(kpf::is_set(flags, kpf::RESERVED), "Rsv");
    tag(kpf::is_set(flags, kpf::MLOCKED), "Mlk");
    tag(kpf::is_set(flags, kpf::PRIVATE), "Prv");
    tag(kpf::is_set(flags, kpf::PRIVATE_2), "Pv2");
    tag(kpf::is_set(flags, kpf::OWNER_PRIVATE), "OwP");
    tag(kpf::is_set(flags, kpf::ARCH), "Ach");
    tag(kpf::is_set(flags, kpf::UNCACHED), "Unc");
    tag(kpf::is_set(flags, kpf::SOFTDIRTY), "DtS");
    tag(kpf::is_set(flags, kpf::ARCH_2), "Ar2");
}

fn push_lru_state(flags: u64, out: &mut String) {
    out.push_str(if kpf::is_set(flags, kpf::LRU) {
        "LRU "
    } else {
        "NON-LRU "
    });
    out.push_str(if kpf::is_set(flags, kpf::ACTIVE) {
        "ACTIVE "
    } else {
        "INACTIVE "
    });
    if kpf::is_set(flags, kpf::REFERENCED) {
        out.push_str("REF ");
    }
}

/// Render a single page row without abbreviation.
///
/// `addr` is omitted from the output when `None` (used for the right-hand
/// side of a diff). Unavailable frame data renders as explicit `?` markers so
/// it cannot be mistaken for a page with no flags set.
pub fn render_page_row(
    addr: Option<u64>,
    entry: PagemapEntry,
    frame_flags: Option<u64>,
    frame_mapcount: Option<u64>,
) -> String {
    let mut row = String::new();

    if let Some(addr) = addr {
        row.push_str(&format!("{:016x}: ", addr));
    }

    let indicators = [
        (entry.soft_dirty(), "Ds "),
        (entry.exclusive_mapped(), "Xm "),
        (entry.uffd_wp(), "Uw "),
        (entry.file_backed(), "Fl "),
        (entry.swapped(), "Sw "),
        (entry.present(), "Pr "),
    ];
    for &(set, tag) in &indicators {
        row.push_str(if set { tag } else { "   " });
    }

    let pfn = entry.pfn();
    if entry.swapped() || pfn.is_some() {
        row.push_str("/ ");
    }

    if entry.swapped() {
        row.push_str(&format!(
            "swap_type=[{:x}] swap_offset=[{:x}]",
            entry.swap_type(),
            entry.swap_offset()
        ));
    } else if let Some(pfn) = pfn {
        match frame_flags {
            Some(flags) => push_frame_flag_tags(flags, &mut row),
            None => row.push_str("? "),
        }

        row.push_str(&format!("/ {:x} ", pfn));

        row.push_str("/ ");
        match frame_flags {
            Some(flags) => push_lru_state(flags, &mut row),
            None => row.push_str("? "),
        }

        match frame_mapcount {
            Some(count) => row.push_str(&format!("/ {}", count)),
            None => row.push_str("/ ?"),
        }
    }

    row.trim_end().to_string()
}

struct Run {
    entry: PagemapEntry,
    addr: u64,
    index: usize,
}

/// Run-length abbreviation of page rows.
///
/// A row with a resolvable frame continues the current run when its non-PFN
/// bits match the previous row and its frame is the same or physically
/// contiguous with it, which is the common case for a freshly populated
/// linear mapping. Rows without a frame (swapped or absent pages) carry
/// payload in the low bits, so they continue a run only on exact equality.
/// The state is explicit and owned by the caller, so interleaved renders
/// cannot corrupt each other; call [`finish`](Abbreviator::finish) after the
/// last row or a trailing run is lost.
#[derive(Default)]
pub struct Abbreviator {
    run: Option<Run>,
    run_len: u64,
}

impl Abbreviator {
    pub fn new() -> Abbreviator {
        Abbreviator::default()
    }

    /// Feed the page at `index`; rows must be fed in ascending address order
    /// and `index` must be within the snapshot's page count.
    pub fn push(&mut self, out: &mut String, snapshot: &Snapshot, index: usize) {
        debug_assert!(index < snapshot.num_pages());
        let entry = snapshot.page_table_entries[index];
        let addr = snapshot.page_address(index);
        let pfn = entry.pfn();

        let continues = match &self.run {
            Some(run) => {
                let prev_pfn = run.entry.pfn();
                if pfn.is_some() && prev_pfn.is_some() {
                    entry.map_bits() == run.entry.map_bits()
                        && (pfn == prev_pfn || pfn == prev_pfn.map(|p| p + 1))
                } else {
                    entry == run.entry
                }
            }
            None => false,
        };

        if !continues {
            self.flush(out, snapshot);
            self.run_len = 0;
        }

        self.run = Some(Run { entry, addr, index });
        self.run_len += 1;

        if continues {
            return;
        }

        out.push_str(&render_page_row(
            Some(addr),
            entry,
            snapshot.frame_flags[index],
            snapshot.frame_mapcount[index],
        ));
        out.push('\n');
    }

    /// Flush any trailing run. Must be called once after the last page.
    pub fn finish(&mut self, out: &mut String, snapshot: &Snapshot) {
        self.flush(out, snapshot);
        self.run = None;
        self.run_len = 0;
    }

    fn flush(&mut self, out: &mut String, snapshot: &Snapshot) {
        let run = match &self.run {
            Some(run) => run,
            None => return,
        };

        if self.run_len > 2 {
            out.push_str(&format!(
                "{:016x}: ({} more repetitions of above)\n",
                run.addr,
                self.run_len - 1
            ));
        } else if self.run_len == 2 {
            // Only one row was suppressed; print it rather than eliding a
            // single line. The run holds the suppressed entry itself, so swap
            // payload and frame both come out exact.
            out.push_str(&render_page_row(
                Some(run.addr),
                run.entry,
                snapshot.frame_flags[run.index],
                snapshot.frame_mapcount[run.index],
            ));
            out.push('\n');
        }
    }
}

/// Render a full snapshot: header plus abbreviated page rows.
pub fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    render_header(snapshot, &mut out);

    let mut abbrev = Abbreviator::new();
    for index in 0..snapshot.num_pages() {
        abbrev.push(&mut out, snapshot, index);
    }
    abbrev.finish(&mut out, snapshot);

    out
}

/// Render a snapshot unless the filter suppresses it; `None` means nothing
/// was rendered.
pub fn render_filtered(snapshot: &Snapshot, filter: &RegionFilter) -> Option<String> {
    if filter.is_ignored(snapshot) {
        return None;
    }
    Some(render(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::test_support::{present, synthetic};

    fn page_rows(text: &str) -> Vec<&str> {
        // Page rows and elisions all start with a 16-digit address.
        text.lines()
            .filter(|line| line.len() > 16 && line.as_bytes()[16] == b':')
            .collect()
    }

    #[test]
    fn identical_rows_collapse_to_one_elision() {
        // Five equal rows then a different one: one literal row, one elision
        // reading "4 more", then the differing row.
        let mut entries = vec![PagemapEntry(0); 5];
        entries.push(present(0x1234));
        let snapshot = synthetic(0x10000, entries);

        let text = render(&snapshot);
        let rows = page_rows(&text);
        assert_eq!(rows.len(), 3);
        assert!(rows[1].contains("(4 more repetitions of above)"));
        assert!(rows[2].contains("Pr"));
    }

    #[test]
    fn contiguous_frames_form_one_run() {
        let entries = vec![present(0x100), present(0x101), present(0x102), present(0x103)];
        let snapshot = synthetic(0x10000, entries);

        let text = render(&snapshot);
        let rows = page_rows(&text);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].contains("/ 100 /"));
        assert!(rows[1].contains("(3 more repetitions of above)"));
    }

    #[test]
    fn noncontiguous_frames_break_the_run() {
        let entries = vec![present(0x100), present(0x200), present(0x300)];
        let snapshot = synthetic(0x10000, entries);

        let text = render(&snapshot);
        let rows = page_rows(&text);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn run_of_two_prints_both_rows() {
        let entries = vec![present(0x100), present(0x101), PagemapEntry(0)];
        let snapshot = synthetic(0x10000, entries);

        let text = render(&snapshot);
        let rows = page_rows(&text);
        assert_eq!(rows.len(), 3);
        // The suppressed second row is reconstructed with its own frame.
        assert!(rows[1].contains("/ 101 /"));
        assert!(rows[1].starts_with(&format!("{:016x}:", snapshot.page_address(1))));
    }

    #[test]
    fn trailing_run_is_flushed() {
        let entries = vec![PagemapEntry(0); 4];
        let snapshot = synthetic(0x10000, entries);

        let text = render(&snapshot);
        let rows = page_rows(&text);
        assert_eq!(rows.len(), 2);
        assert!(rows[1].contains("(3 more repetitions of above)"));
    }

    #[test]
    fn swapped_rows_with_different_offsets_do_not_collapse() {
        let entries = vec![
            PagemapEntry((1 << 62) | (0x10 << 5) | 1),
            PagemapEntry((1 << 62) | (0x20 << 5) | 1),
        ];
        let snapshot = synthetic(0x10000, entries);

        let text = render(&snapshot);
        assert!(text.contains("swap_offset=[10]"));
        assert!(text.contains("swap_offset=[20]"));
    }

    #[test]
    fn reconstructed_swapped_row_keeps_its_swap_fields() {
        let entries = vec![PagemapEntry((1 << 62) | (0x10 << 5) | 2); 2];
        let snapshot = synthetic(0x10000, entries);

        let text = render(&snapshot);
        let rows = page_rows(&text);
        assert_eq!(rows.len(), 2);
        assert!(rows[1].contains("swap_type=[2]"));
        assert!(rows[1].contains("swap_offset=[10]"));
    }

    #[test]
    #[should_panic]
    fn feeding_a_page_past_the_mapping_panics() {
        let snapshot = synthetic(0x10000, vec![PagemapEntry(0)]);
        let mut abbrev = Abbreviator::new();
        let mut out = String::new();
        abbrev.push(&mut out, &snapshot, 1);
    }

    /// Expanding elisions and 2-runs reproduces every logical row value.
    #[test]
    fn abbreviation_expands_losslessly() {
        let entries = vec![
            present(0x10),
            present(0x11),
            present(0x12),
            present(0x12), // same frame still continues a run
            PagemapEntry(0),
            PagemapEntry(0),
            present(0x40),
        ];
        let snapshot = synthetic(0x20000, entries.clone());
        let text = render(&snapshot);

        let mut expanded = 0usize;
        let mut last_count = 0u64;
        for row in page_rows(&text) {
            if let Some(idx) = row.find(" more repetitions of above)") {
                let n: u64 = row[row.find('(').unwrap() + 1..idx].parse().unwrap();
                expanded += n as usize;
                last_count += n;
            } else {
                expanded += 1;
            }
        }
        assert_eq!(expanded, entries.len());
        assert!(last_count > 0);
    }

    #[test]
    fn swapped_row_shows_swap_fields() {
        let entry = PagemapEntry((1 << 62) | (0x2a << 5) | 0x3);
        let row = render_page_row(Some(0x1000), entry, None, None);
        assert!(row.contains("Sw"));
        assert!(row.contains("swap_type=[3]"));
        assert!(row.contains("swap_offset=[2a]"));
    }

    #[test]
    fn unavailable_frame_data_is_marked() {
        let row = render_page_row(Some(0x1000), present(0x99), None, None);
        assert!(row.contains("? / 99 / ? / ?"));
    }

    #[test]
    fn frame_flag_mnemonics_render() {
        let flags = (1 << kpf::ANON) | (1 << kpf::LRU) | (1 << kpf::ACTIVE);
        let row = render_page_row(Some(0), present(0x5), Some(flags), Some(1));
        assert!(row.contains("Ano "));
        assert!(row.contains("LRU ACTIVE"));
        assert!(row.ends_with("/ 1"));
    }

    #[test]
    fn mapped_to_disk_overload_resolves_per_anon_bit() {
        let anon_exclusive = (1 << kpf::ANON) | (1 << kpf::MAPPEDTODISK);
        let row = render_page_row(None, present(1), Some(anon_exclusive), Some(1));
        assert!(row.contains("AnE "));
        assert!(!row.contains("Mdk "));

        let file_disk = 1 << kpf::MAPPEDTODISK;
        let row = render_page_row(None, present(1), Some(file_disk), Some(1));
        assert!(row.contains("Mdk "));
        assert!(!row.contains("AnE "));
    }

    #[test]
    fn header_shows_counters_and_recompute_marker() {
        let mut snapshot = synthetic(0x10000, vec![present(1)]);
        snapshot.name = Some("[heap]".to_string());
        let text = render(&snapshot);
        assert!(text.contains("----==== [heap] ====----"));
        assert!(text.contains("rss=[4*]") || text.contains("rss=["));
        assert!(text.contains("perms=[rw-p]"));
    }

    #[test]
    fn anonymous_mapping_gets_placeholder_name() {
        let snapshot = synthetic(0x10000, vec![PagemapEntry(0)]);
        assert!(render(&snapshot).contains("----==== (anon) ====----"));
    }

    #[test]
    fn default_filter_suppresses_system_mappings() {
        let filter = RegionFilter::default();

        let mut snapshot = synthetic(0x10000, vec![PagemapEntry(0)]);
        snapshot.name = Some("[vdso]".to_string());
        assert!(render_filtered(&snapshot, &filter).is_none());

        snapshot.name = Some("/usr/lib/libc.so.6".to_string());
        assert!(render_filtered(&snapshot, &filter).is_none());

        snapshot.name = Some("/home/me/a.out".to_string());
        assert!(render_filtered(&snapshot, &filter).is_some());

        snapshot.name = None;
        assert!(render_filtered(&snapshot, &filter).is_some());
    }

    #[test]
    fn none_filter_suppresses_nothing() {
        let filter = RegionFilter::none();
        let mut snapshot = synthetic(0x10000, vec![PagemapEntry(0)]);
        snapshot.name = Some("[vdso]".to_string());
        assert!(render_filtered(&snapshot, &filter).is_some());
    }
}
