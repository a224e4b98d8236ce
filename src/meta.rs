//! Open-time metadata parsing.
//!
//! Everything the reader needs that does not change after open: both
//! headers, the three entry tables, the sorted region index and the
//! partition-header fields that are re-derived instead of read.

use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::codec::get_codec;
use crate::crypto::sha1_digest;
use crate::geometry::effective_group_size;
use crate::header::{DiscInfo, FileHeader, FormatError, Variant};
use crate::index::{
    EntryIndex, GroupEntry, PartitionEntry, RawDataEntry, PARTITION_ENTRY_SIZE, RAW_DATA_ENTRY_SIZE,
    RVZ_GROUP_ENTRY_SIZE, WIA_GROUP_ENTRY_SIZE,
};

/// Payload bytes covered by one exception list.
const EXCEPTION_LIST_SPAN: u64 = 0x1F_B400;

/// Partition header word holding the data offset, `>> 2`.
pub const PARTITION_DATA_OFFSET_FIELD: u64 = 0x2B8;
/// Partition header word holding the data size, `>> 2`.
pub const PARTITION_DATA_SIZE_FIELD:   u64 = 0x2BC;

/// A 4-byte big-endian value overlaid on the reconstructed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPatch {
    pub offset: u64,
    pub value:  [u8; 4],
}

impl FieldPatch {
    fn new(offset: u64, value: u32) -> Self {
        Self { offset, value: value.to_be_bytes() }
    }

    /// Copy the part of this patch that overlaps `[start, start + buf.len())`.
    pub fn apply(&self, start: u64, buf: &mut [u8]) {
        let end = start + buf.len() as u64;
        let patch_end = self.offset + 4;
        if patch_end <= start || self.offset >= end {
            return;
        }
        let from = self.offset.max(start);
        let to = patch_end.min(end);
        let src = (from - self.offset) as usize..(to - self.offset) as usize;
        let dst = (from - start) as usize..(to - start) as usize;
        buf[dst].copy_from_slice(&self.value[src]);
    }
}

#[derive(Debug)]
pub struct ContainerMeta {
    pub header:     FileHeader,
    pub disc:       DiscInfo,
    pub partitions: Vec<PartitionEntry>,
    pub raw_data:   Vec<RawDataEntry>,
    pub groups:     Vec<GroupEntry>,
    pub index:      EntryIndex,
    pub patches:    Vec<FieldPatch>,
}

impl ContainerMeta {
    pub fn read<R: Read + Seek>(reader: &mut R, verify: bool) -> Result<Self, FormatError> {
        reader.seek(SeekFrom::Start(0))?;
        let header = FileHeader::read(&mut *reader, verify)?;
        let disc = DiscInfo::read(&mut *reader, &header, verify)?;
        debug!(
            variant = header.variant.name(),
            compression = disc.compression.name(),
            chunk_size = disc.chunk_size,
            iso_size = header.iso_file_size,
            "parsed headers"
        );

        let mut partitions = read_partition_table(reader, &disc, verify)?;
        let list_count = exception_list_count(disc.chunk_size);
        for p in &mut partitions {
            for e in &mut p.data_entries {
                e.exception_list_count = list_count;
            }
        }

        let raw_table = read_compressed_table(
            reader,
            &disc,
            "raw data",
            disc.raw_data_offset,
            disc.raw_data_size,
            disc.num_raw_data as usize * RAW_DATA_ENTRY_SIZE,
        )?;
        let raw_data: Vec<RawDataEntry> =
            raw_table.chunks_exact(RAW_DATA_ENTRY_SIZE).map(RawDataEntry::parse).collect();

        let (group_entry_size, parse_group): (usize, fn(&[u8]) -> GroupEntry) = match header.variant {
            Variant::Rvz => (RVZ_GROUP_ENTRY_SIZE, GroupEntry::parse_rvz),
            Variant::Wia => (WIA_GROUP_ENTRY_SIZE, GroupEntry::parse_wia),
        };
        let group_table = read_compressed_table(
            reader,
            &disc,
            "group",
            disc.group_offset,
            disc.group_size,
            disc.num_groups as usize * group_entry_size,
        )?;
        let groups: Vec<GroupEntry> = group_table.chunks_exact(group_entry_size).map(parse_group).collect();

        debug!(
            partitions = partitions.len(),
            raw_entries = raw_data.len(),
            groups = groups.len(),
            exception_lists = list_count,
            "parsed entry tables"
        );

        let index = EntryIndex::build(&raw_data, &partitions);
        let patches = partition_patches(&partitions);

        Ok(Self { header, disc, partitions, raw_data, groups, index, patches })
    }

    #[inline]
    pub fn iso_size(&self) -> u64 { self.header.iso_file_size }

    #[inline]
    pub fn chunk_size(&self) -> u32 { self.disc.chunk_size }

    #[inline]
    pub fn partition_group_size(&self) -> u64 { effective_group_size(self.disc.chunk_size) }
}

/// Exception lists per partition group.
pub fn exception_list_count(chunk_size: u32) -> u32 {
    ((effective_group_size(chunk_size) / EXCEPTION_LIST_SPAN) as u32).max(1)
}

fn alloc_table(len: usize) -> Result<Vec<u8>, FormatError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| FormatError::Allocation(len))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// The partition table is stored uncompressed.  Entries shorter than
/// [`PARTITION_ENTRY_SIZE`] are zero-extended.
fn read_partition_table<R: Read + Seek>(
    reader: &mut R,
    disc:   &DiscInfo,
    verify: bool,
) -> Result<Vec<PartitionEntry>, FormatError> {
    if disc.num_partitions == 0 {
        return Ok(Vec::new());
    }
    let entry_size = disc.partition_entry_size as usize;
    let mut raw = alloc_table(disc.num_partitions as usize * entry_size)?;
    reader.seek(SeekFrom::Start(disc.partition_entries_offset))?;
    reader.read_exact(&mut raw)?;

    if verify && sha1_digest(&raw) != disc.partition_entries_hash {
        return Err(FormatError::HashMismatch("partition table"));
    }

    let mut padded = [0u8; PARTITION_ENTRY_SIZE];
    Ok(raw
        .chunks_exact(entry_size)
        .map(|b| {
            padded.fill(0);
            padded[..entry_size].copy_from_slice(b);
            PartitionEntry::parse(&padded)
        })
        .collect())
}

fn read_compressed_table<R: Read + Seek>(
    reader:  &mut R,
    disc:    &DiscInfo,
    table:   &'static str,
    offset:  u64,
    size:    u32,
    need:    usize,
) -> Result<Vec<u8>, FormatError> {
    if need == 0 {
        return Ok(Vec::new());
    }
    let mut packed = alloc_table(size as usize)?;
    reader.seek(SeekFrom::Start(offset))?;
    reader.read_exact(&mut packed)?;

    let codec = get_codec(disc.compression)?;
    // Stored tables may carry padding past `need`.
    let mut table_bytes = codec.decompress(&packed, need.max(packed.len()))?;
    if table_bytes.len() < need {
        return Err(FormatError::TruncatedTable { table, need, have: table_bytes.len() });
    }
    table_bytes.truncate(need);
    Ok(table_bytes)
}

/// Data offset and size words of every partition header, derived from the
/// partition's data entries.
fn partition_patches(partitions: &[PartitionEntry]) -> Vec<FieldPatch> {
    let mut patches = Vec::with_capacity(partitions.len() * 2);
    for p in partitions {
        let header_start = p.header_start();
        let data_start = p.data_start();
        let data_end = p.data_end();
        patches.push(FieldPatch::new(
            header_start + PARTITION_DATA_OFFSET_FIELD,
            ((data_start - header_start) >> 2) as u32,
        ));
        patches.push(FieldPatch::new(
            header_start + PARTITION_DATA_SIZE_FIELD,
            (data_end.saturating_sub(data_start) >> 2) as u32,
        ));
    }
    patches
}
