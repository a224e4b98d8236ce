//! Entry tables and the sorted lookup index built over them.
//!
//! Raw-data entries cover un-partitioned disc regions (the whole payload of a
//! GameCube disc, the management areas of a Wii disc).  Partition entries
//! cover encrypted Wii partitions, split in two data entries.  Both refer to
//! contiguous runs of [`GroupEntry`] records.

use byteorder::{BigEndian, ByteOrder};

use crate::geometry::{PARTITION_HEADER_SIZE, SECTOR_SIZE};

pub const RAW_DATA_ENTRY_SIZE: usize = 0x18;
pub const PARTITION_ENTRY_SIZE: usize = 0x30;
pub const RVZ_GROUP_ENTRY_SIZE: usize = 12;
pub const WIA_GROUP_ENTRY_SIZE: usize = 8;

const SECTOR: u64 = SECTOR_SIZE as u64;

// ── SizeField ────────────────────────────────────────────────────────────────

/// A 32-bit size whose top bit is a flag (compressed for group sizes, junk
/// for framed block sizes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeField {
    pub length: u32,
    pub flag:   bool,
}

impl From<u32> for SizeField {
    #[inline]
    fn from(raw: u32) -> Self {
        Self { length: raw & 0x7FFF_FFFF, flag: raw & 0x8000_0000 != 0 }
    }
}

// ── RawDataEntry ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDataEntry {
    pub data_offset:       u64,
    pub data_size:         u64,
    pub first_group_index: u32,
    pub group_count:       u32,
}

impl RawDataEntry {
    pub fn parse(b: &[u8]) -> Self {
        Self {
            data_offset:       BigEndian::read_u64(&b[0x00..]),
            data_size:         BigEndian::read_u64(&b[0x08..]),
            first_group_index: BigEndian::read_u32(&b[0x10..]),
            group_count:       BigEndian::read_u32(&b[0x14..]),
        }
    }

    /// Groups start on a sector boundary even when `data_offset` does not;
    /// the skipped bytes are stored as padding in the first group.
    #[inline]
    pub fn aligned_start(&self) -> u64 { self.data_offset - self.data_offset % SECTOR }

    #[inline]
    pub fn end(&self) -> u64 { self.data_offset + self.data_size }

    #[inline]
    pub fn contains_group(&self, group: u32) -> bool {
        group >= self.first_group_index && group - self.first_group_index < self.group_count
    }
}

// ── Partition entries ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEntry {
    pub first_sector:      u32,
    pub sector_count:      u32,
    pub first_group_index: u32,
    pub group_count:       u32,
    /// Derived once at open from the chunk size, never stored on disk.
    pub exception_list_count: u32,
}

impl DataEntry {
    fn parse(b: &[u8]) -> Self {
        Self {
            first_sector:         BigEndian::read_u32(&b[0x0..]),
            sector_count:         BigEndian::read_u32(&b[0x4..]),
            first_group_index:    BigEndian::read_u32(&b[0x8..]),
            group_count:          BigEndian::read_u32(&b[0xC..]),
            exception_list_count: 0,
        }
    }

    #[inline]
    pub fn start(&self) -> u64 { self.first_sector as u64 * SECTOR }

    #[inline]
    pub fn end(&self) -> u64 { (self.first_sector as u64 + self.sector_count as u64) * SECTOR }

    #[inline]
    pub fn contains_sector(&self, sector: u64) -> bool {
        sector >= self.first_sector as u64 && sector < self.first_sector as u64 + self.sector_count as u64
    }

    #[inline]
    pub fn contains_group(&self, group: u32) -> bool {
        group >= self.first_group_index && group - self.first_group_index < self.group_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub partition_key: [u8; 16],
    /// `[0]` covers boot data through the FST, `[1]` the rest.
    pub data_entries:  [DataEntry; 2],
}

impl PartitionEntry {
    /// `b` is exactly [`PARTITION_ENTRY_SIZE`] bytes.
    pub fn parse(b: &[u8]) -> Self {
        let mut partition_key = [0u8; 16];
        partition_key.copy_from_slice(&b[..16]);
        Self {
            partition_key,
            data_entries: [DataEntry::parse(&b[0x10..0x20]), DataEntry::parse(&b[0x20..0x30])],
        }
    }

    /// ISO offset of the partition's first encrypted sector.
    #[inline]
    pub fn data_start(&self) -> u64 { self.data_entries[0].start() }

    /// Start of the virtual header region in front of the data.
    #[inline]
    pub fn header_start(&self) -> u64 { self.data_start().saturating_sub(PARTITION_HEADER_SIZE) }

    /// ISO offset one past the last stored sector.
    #[inline]
    pub fn data_end(&self) -> u64 {
        self.data_entries.iter().map(DataEntry::end).max().unwrap_or(0)
    }

    pub fn contains_group(&self, group: u32) -> bool {
        self.data_entries.iter().any(|e| e.contains_group(group))
    }
}

// ── GroupEntry ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupEntry {
    /// File offset divided by 4.
    pub physical_offset: u32,
    /// `flag` = compressed with Header2's algorithm.
    pub data_size:       SizeField,
    /// Size after entropy decoding, before de-framing.  0 = not framed.
    pub framed_size:     u32,
}

impl GroupEntry {
    pub fn parse_rvz(b: &[u8]) -> Self {
        Self {
            physical_offset: BigEndian::read_u32(&b[0..]),
            data_size:       SizeField::from(BigEndian::read_u32(&b[4..])),
            framed_size:     BigEndian::read_u32(&b[8..]),
        }
    }

    /// WIA groups are always passed through the container's codec and are
    /// never framed.
    pub fn parse_wia(b: &[u8]) -> Self {
        Self {
            physical_offset: BigEndian::read_u32(&b[0..]),
            data_size:       SizeField { length: BigEndian::read_u32(&b[4..]), flag: true },
            framed_size:     0,
        }
    }

    #[inline]
    pub fn file_offset(&self) -> u64 { self.physical_offset as u64 * 4 }

    #[inline]
    pub fn is_compressed(&self) -> bool { self.data_size.flag }

    #[inline]
    pub fn is_framed(&self) -> bool { self.framed_size != 0 }
}

// ── EntryDescriptor / EntryIndex ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Raw { index: usize },
    Partition { index: usize, data_entry: usize },
}

/// One region of ISO space, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryDescriptor {
    pub start: u64,
    pub end:   u64,
    pub kind:  EntryKind,
}

impl EntryDescriptor {
    #[inline]
    pub fn contains(&self, offset: u64) -> bool { offset >= self.start && offset < self.end }

    #[inline]
    pub fn is_partition(&self) -> bool { matches!(self.kind, EntryKind::Partition { .. }) }
}

/// Result of [`EntryIndex::find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    Covered(&'a EntryDescriptor),
    /// Nothing covers the offset; the next region starts at `next.start`.
    Gap { next: &'a EntryDescriptor },
    End,
}

/// Regions checked behind the last one starting at or before an offset.
/// Only a partition's header area overlaps another region.
const TIE_SCAN: usize = 4;

/// Raw and partition regions sorted by end offset.  Ties go to partitions.
#[derive(Debug, Clone, Default)]
pub struct EntryIndex {
    entries:  Vec<EntryDescriptor>,
    /// Non-empty regions, as positions in `entries`, sorted by start.
    by_start: Vec<usize>,
}

impl EntryIndex {
    pub fn build(raw: &[RawDataEntry], partitions: &[PartitionEntry]) -> Self {
        let mut entries = Vec::with_capacity(raw.len() + partitions.len() * 2);
        for (index, r) in raw.iter().enumerate() {
            entries.push(EntryDescriptor { start: r.data_offset, end: r.end(), kind: EntryKind::Raw { index } });
        }
        for (index, p) in partitions.iter().enumerate() {
            // The management entry also owns the header region in front of it.
            entries.push(EntryDescriptor {
                start: p.header_start(),
                end:   p.data_entries[0].end(),
                kind:  EntryKind::Partition { index, data_entry: 0 },
            });
            entries.push(EntryDescriptor {
                start: p.data_entries[1].start(),
                end:   p.data_entries[1].end(),
                kind:  EntryKind::Partition { index, data_entry: 1 },
            });
        }
        entries.sort_by_key(|e| (e.end, !e.is_partition()));

        let mut by_start: Vec<usize> = (0..entries.len()).filter(|&i| entries[i].end > entries[i].start).collect();
        by_start.sort_by_key(|&i| (entries[i].start, entries[i].is_partition()));
        Self { entries, by_start }
    }

    pub fn entries(&self) -> &[EntryDescriptor] { &self.entries }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Number of non-empty regions starting at or before `offset`.
    fn split(&self, offset: u64) -> usize {
        self.by_start.partition_point(|&i| self.entries[i].start <= offset)
    }

    /// Regions that may contain `offset`, nearest start first.
    fn candidates(&self, split: usize) -> impl Iterator<Item = &EntryDescriptor> {
        self.by_start[..split].iter().rev().take(TIE_SCAN).map(|&i| &self.entries[i])
    }

    /// Region covering `offset`, preferring partitions where a raw region
    /// overlaps a partition's header area.
    pub fn find(&self, offset: u64) -> Lookup<'_> {
        let split = self.split(offset);
        let mut raw_hit = None;
        for e in self.candidates(split) {
            if e.contains(offset) {
                if e.is_partition() {
                    return Lookup::Covered(e);
                }
                raw_hit.get_or_insert(e);
            }
        }
        if let Some(e) = raw_hit {
            return Lookup::Covered(e);
        }
        match self.by_start.get(split) {
            Some(&i) => Lookup::Gap { next: &self.entries[i] },
            None     => Lookup::End,
        }
    }

    /// Raw region covering `offset`, ignoring partitions.
    pub fn find_raw(&self, offset: u64) -> Option<&EntryDescriptor> {
        self.candidates(self.split(offset)).find(|e| !e.is_partition() && e.contains(offset))
    }

    /// Start of the first raw region beginning after `offset`.
    pub fn next_raw_start(&self, offset: u64) -> Option<u64> {
        self.by_start[self.split(offset)..]
            .iter()
            .map(|&i| &self.entries[i])
            .find(|e| !e.is_partition())
            .map(|e| e.start)
    }
}
