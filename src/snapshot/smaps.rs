//! Parser for the per-VMA blocks of `/proc/<pid>/smaps`.
//!
//! Each block is one header line followed by indented `Key: value kB` lines
//! up to the next header or EOF. The set of field keys grows with kernel
//! versions, so anything unrecognized is skipped rather than rejected.

use std::io::BufRead;

use crate::error::ProbeError;
use crate::ProbeResult;

/// Raw per-VMA record accumulated from one smaps block. Sizes are converted
/// from the kernel's kB units to bytes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Region {
    pub start: u64,
    pub end: u64,
    pub perms: String,
    pub offset: u64,
    // Kept for header round-trips even though snapshots do not carry them.
    #[allow(dead_code)]
    pub dev: String,
    #[allow(dead_code)]
    pub inode: u64,
    pub name: Option<String>,

    pub size_bytes: u64,
    pub rss_bytes: u64,
    pub referenced_bytes: u64,
    pub anon_bytes: u64,
    pub anon_huge_bytes: u64,
    pub swap_bytes: u64,
    pub locked_bytes: u64,
    pub vm_flags: String,
}

/// Forward-only cursor over an smaps stream.
///
/// Holds a one-line pushback buffer so that consuming a block leaves the next
/// block's header in place for the following call.
pub(crate) struct RegionCursor<R: BufRead> {
    reader: R,
    pending: Option<String>,
}

impl<R: BufRead> RegionCursor<R> {
    pub(crate) fn new(reader: R) -> RegionCursor<R> {
        RegionCursor {
            reader,
            pending: None,
        }
    }

    fn next_line(&mut self) -> ProbeResult<Option<String>> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    /// Consume and return the next region block, `Ok(None)` at EOF.
    pub(crate) fn next_region(&mut self) -> ProbeResult<Option<Region>> {
        self.scan(None)
    }

    /// Skip forward to the region whose `[start, end)` range contains
    /// `vaddr`. `Ok(None)` if no such region exists before EOF.
    pub(crate) fn find(&mut self, vaddr: u64) -> ProbeResult<Option<Region>> {
        self.scan(Some(vaddr))
    }

    fn scan(&mut self, vaddr: Option<u64>) -> ProbeResult<Option<Region>> {
        let header = loop {
            let line = match self.next_line()? {
                Some(line) => line,
                None => return Ok(None),
            };

            if !is_header(&line) {
                continue;
            }

            match vaddr {
                None => break line,
                Some(addr) => {
                    let (start, end) = parse_range(first_token(&line))?;
                    if start <= addr && addr < end {
                        break line;
                    }
                }
            }
        };

        let mut region = parse_header(&header)?;

        while let Some(line) = self.next_line()? {
            if is_header(&line) {
                self.pending = Some(line);
                break;
            }
            parse_field(&mut region, &line)?;
        }

        Ok(Some(region))
    }
}

/// Header lines start with an address range; field lines start with a key
/// ending in `:`.
fn is_header(line: &str) -> bool {
    let token = first_token(line);
    !token.is_empty() && !token.ends_with(':')
}

fn first_token(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

fn parse_hex(token: &str, what: &str) -> ProbeResult<u64> {
    u64::from_str_radix(token, 16)
        .map_err(|_| ProbeError::Parse(format!("bad hex {} [{}]", what, token)))
}

fn parse_range(token: &str) -> ProbeResult<(u64, u64)> {
    let mut parts = token.splitn(2, '-');
    let start = parts.next().unwrap_or("");
    let end = match parts.next() {
        Some(end) => end,
        None => {
            return Err(ProbeError::Parse(format!(
                "address range missing '-' separator [{}]",
                token
            )))
        }
    };

    Ok((parse_hex(start, "range start")?, parse_hex(end, "range end")?))
}

fn header_token<'a>(line: &'a str, pos: &mut usize, what: &str) -> ProbeResult<&'a str> {
    next_token(line, pos)
        .ok_or_else(|| ProbeError::Parse(format!("smaps header missing {} [{}]", what, line)))
}

fn parse_header(line: &str) -> ProbeResult<Region> {
    let mut pos = 0;

    let (start, end) = parse_range(header_token(line, &mut pos, "address range")?)?;
    let perms = header_token(line, &mut pos, "permissions")?.to_string();
    let offset = parse_hex(header_token(line, &mut pos, "offset")?, "offset")?;
    let dev = header_token(line, &mut pos, "device")?.to_string();
    let inode = header_token(line, &mut pos, "inode")?
        .parse::<u64>()
        .map_err(|_| ProbeError::Parse(format!("bad inode [{}]", line.trim_end())))?;

    // Name is the rest of the line; pseudo-names and paths may contain spaces.
    let name = match line[pos..].trim() {
        "" => None,
        rest => Some(rest.to_string()),
    };

    Ok(Region {
        start,
        end,
        perms,
        offset,
        dev,
        inode,
        name,
        ..Region::default()
    })
}

fn parse_field(region: &mut Region, line: &str) -> ProbeResult<()> {
    let mut pos = 0;
    let key = match next_token(line, &mut pos) {
        Some(key) => key,
        None => return Ok(()), // blank line
    };

    if key == "VmFlags:" {
        region.vm_flags = line[pos..].trim().to_string();
        return Ok(());
    }

    let field = match key {
        "Size:" => &mut region.size_bytes,
        "Rss:" => &mut region.rss_bytes,
        "Referenced:" => &mut region.referenced_bytes,
        "Anonymous:" => &mut region.anon_bytes,
        "AnonHugePages:" => &mut region.anon_huge_bytes,
        "Swap:" => &mut region.swap_bytes,
        "Locked:" => &mut region.locked_bytes,
        _ => return Ok(()),
    };

    let value = next_token(line, &mut pos)
        .ok_or_else(|| ProbeError::Parse(format!("smaps field missing value [{}]", line)))?;
    let unit = next_token(line, &mut pos).unwrap_or("");
    if unit != "kB" {
        return Err(ProbeError::Parse(format!(
            "unrecognized unit '{}' for {} [{}]",
            unit,
            key,
            line.trim_end()
        )));
    }

    *field = value.parse::<u64>().map_err(|_| {
        ProbeError::Parse(format!("bad value for {} [{}]", key, line.trim_end()))
    })? * 1024;
    Ok(())
}

/// Advance past leading whitespace and return the next token, updating `pos`
/// to just past it.
fn next_token<'a>(line: &'a str, pos: &mut usize) -> Option<&'a str> {
    let bytes = line.as_bytes();
    let mut i = *pos;

    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let start = i;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    *pos = i;

    if start == i {
        None
    } else {
        Some(&line[start..i])
    }
}
