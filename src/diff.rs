//! Compact diffs between two snapshots of the same mapping, or two
//! whole-process snapshot sets taken consecutively.

use crate::render::{render_filtered, render_page_row, RegionFilter};
use crate::snapshot::{Snapshot, SnapshotSet};

const ARROW_INDENT: &str = "               -> ";

fn kib(bytes: u64) -> u64 {
    bytes / 1024
}

/// Diff two snapshots of the same mapping.
///
/// Returns the rendered diff and whether anything changed. A `None` side is
/// treated as the mapping appearing or disappearing and delegates to the
/// renderer on the other side; the filter then decides whether that counts as
/// a change worth showing.
pub fn diff(
    a: Option<&Snapshot>,
    b: Option<&Snapshot>,
    filter: &RegionFilter,
) -> (String, bool) {
    match (a, b) {
        (None, None) => (String::new(), false),
        (Some(only), None) | (None, Some(only)) => match render_filtered(only, filter) {
            Some(text) => (text, true),
            None => (String::new(), false),
        },
        (Some(a), Some(b)) => diff_pair(a, b, filter),
    }
}

fn diff_pair(a: &Snapshot, b: &Snapshot, filter: &RegionFilter) -> (String, bool) {
    // A moved or resized VMA cannot be compared page by page; show both.
    if a.vma_start != b.vma_start || a.vma_end != b.vma_end {
        let mut out = match render_filtered(a, filter) {
            Some(text) => text,
            None => return (String::new(), false),
        };
        out.push_str("^^^^---- VMA range changed; rendering both in full ----vvvv\n");
        if let Some(text) = render_filtered(b, filter) {
            out.push_str(&text);
        }
        return (out, true);
    }

    let mut out = String::new();
    let mut counters_changed = false;

    {
        let mut line = String::new();
        if a.resident_bytes != b.resident_bytes {
            line.push_str(&format!(
                "rss=[{}{}]->[{}{}] ",
                kib(a.resident_bytes),
                if a.resident_recomputed { "*" } else { "" },
                kib(b.resident_bytes),
                if b.resident_recomputed { "*" } else { "" },
            ));
        }
        let numeric = [
            ("ref", a.referenced_bytes, b.referenced_bytes),
            ("anon", a.anon_bytes, b.anon_bytes),
            ("anon_huge", a.anon_huge_bytes, b.anon_huge_bytes),
            ("swap", a.swap_bytes, b.swap_bytes),
            ("locked", a.locked_bytes, b.locked_bytes),
        ];
        for &(label, old, new) in &numeric {
            if old != new {
                line.push_str(&format!("{}=[{}]->[{}] ", label, kib(old), kib(new)));
            }
        }
        if !line.is_empty() {
            out.push_str(line.trim_end());
            out.push('\n');
            counters_changed = true;
        }
    }

    {
        let mut line = String::new();
        if a.vm_flags != b.vm_flags {
            line.push_str(&format!("vm_flags=[{}]->[{}] ", a.vm_flags, b.vm_flags));
        }
        if a.perms != b.perms {
            line.push_str(&format!("perms=[{}]->[{}] ", a.perms, b.perms));
        }
        if a.offset != b.offset {
            line.push_str(&format!("offset=[{}]->[{}] ", a.offset, b.offset));
        }
        if a.name != b.name {
            line.push_str(&format!(
                "name=[{}]->[{}] ",
                a.name.as_deref().unwrap_or(""),
                b.name.as_deref().unwrap_or("")
            ));
        }
        if !line.is_empty() {
            out.push_str(line.trim_end());
            out.push('\n');
            counters_changed = true;
        }
    }

    // Identical ranges mean identical page counts, but stay defensive.
    let num_pages = a.num_pages().min(b.num_pages());
    let mut pages_changed = false;
    for index in 0..num_pages {
        if a.page_table_entries[index] == b.page_table_entries[index]
            && a.frame_flags[index] == b.frame_flags[index]
            && a.frame_mapcount[index] == b.frame_mapcount[index]
        {
            continue;
        }

        if !pages_changed {
            out.push('\n');
            pages_changed = true;
        }

        out.push_str(&render_page_row(
            Some(a.page_address(index)),
            a.page_table_entries[index],
            a.frame_flags[index],
            a.frame_mapcount[index],
        ));
        out.push('\n');
        out.push_str(ARROW_INDENT);
        out.push_str(&render_page_row(
            None,
            b.page_table_entries[index],
            b.frame_flags[index],
            b.frame_mapcount[index],
        ));
        out.push('\n');
    }

    (out, counters_changed || pages_changed)
}

/// Diff two snapshot sets pairwise by index, emitting a separator between
/// changed entries only.
pub fn diff_all(a: &SnapshotSet, b: &SnapshotSet, filter: &RegionFilter) -> (String, bool) {
    let mut out = String::new();
    let mut any_changed = false;

    let count = a.len().max(b.len());
    for index in 0..count {
        let (text, changed) = diff(a.get(index), b.get(index), filter);
        if !changed {
            continue;
        }
        if any_changed {
            out.push('\n');
        }
        out.push_str(&text);
        any_changed = true;
    }

    (out, any_changed)
}
