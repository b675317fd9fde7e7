//! Snapshot tests against the live /proc of the test process itself.
//!
//! These avoid asserting anything that depends on privilege (frame flags and
//! mapcounts are unavailable without CAP_SYS_ADMIN) or on racy kernel
//! counters; they check the structural invariants instead.

#![cfg(target_os = "linux")]

use pageprobe::render::{render, RegionFilter};
use pageprobe::{diff, page_size, ProcessTarget};

#[test]
fn snapshot_at_finds_a_live_allocation() {
    // Touch every page so the mapping is fully instantiated.
    let mut buf = vec![0u8; 4 * page_size() as usize];
    for page in buf.chunks_mut(page_size() as usize) {
        page[0] = 1;
    }
    let addr = buf.as_ptr() as u64;

    let target = ProcessTarget::me();
    let snapshot = target
        .snapshot_at(addr)
        .expect("snapshot build failed")
        .expect("no mapping covers a live allocation");

    assert!(snapshot.contains(addr));
    assert!(snapshot.vma_start < snapshot.vma_end);
    assert_eq!(snapshot.vma_start % page_size(), 0);

    let num_pages = snapshot.num_pages();
    assert_eq!(num_pages as u64, snapshot.size_bytes / page_size());
    assert_eq!(snapshot.frame_flags.len(), num_pages);
    assert_eq!(snapshot.frame_mapcount.len(), num_pages);

    drop(buf);
}

#[test]
fn snapshot_at_unmapped_address_is_not_found() {
    let target = ProcessTarget::me();
    // Nothing maps the first page on any sane mmap_min_addr configuration.
    let missing = target.snapshot_at(0x1).expect("snapshot build failed");
    assert!(missing.is_none());
}

#[test]
fn snapshot_all_enumerates_every_mapping_in_order() {
    let target = ProcessTarget::me();
    let set = target.snapshot_all().expect("snapshot_all failed");

    assert!(!set.is_empty());

    let mut previous_end = 0u64;
    for snapshot in &set {
        assert!(snapshot.vma_start < snapshot.vma_end);
        assert!(previous_end <= snapshot.vma_start);
        previous_end = snapshot.vma_end;

        let num_pages = snapshot.num_pages();
        assert_eq!(snapshot.frame_flags.len(), num_pages);
        assert_eq!(snapshot.frame_mapcount.len(), num_pages);
    }
}

#[test]
fn remote_target_on_own_pid_works() {
    let pid = nix::unistd::Pid::from_raw(std::process::id() as i32);
    let set = ProcessTarget::new(pid)
        .snapshot_all()
        .expect("remote snapshot_all failed");
    assert!(!set.is_empty());
}

#[test]
fn self_diff_is_quiet() {
    let mut buf = vec![0u8; page_size() as usize];
    buf[0] = 1;
    let target = ProcessTarget::me();
    let snapshot = target
        .snapshot_at(buf.as_ptr() as u64)
        .expect("snapshot build failed")
        .expect("mapping not found");

    let (text, changed) = diff::diff(Some(&snapshot), Some(&snapshot), &RegionFilter::none());
    assert!(!changed);
    assert!(text.is_empty());
}

#[test]
fn rendering_a_real_snapshot_never_panics() {
    let target = ProcessTarget::me();
    let set = target.snapshot_all().expect("snapshot_all failed");
    for snapshot in &set {
        let text = render(snapshot);
        assert!(text.contains("[vma_start]"));
    }
}
