//! Coordinate spaces.
//!
//! * ISO space: the original image, 0x8000-byte sectors that (inside a
//!   partition) start with a 0x400-byte hash header.
//! * Decrypted space: partition payload with every hash header removed,
//!   0x7C00 bytes per sector.  This is what the container stores.
//! * Chunk-local space: a decrypted offset modulo the effective group size.

use crate::index::{DataEntry, PartitionEntry};

pub const SECTOR_SIZE:      usize = 0x8000;
pub const SECTOR_DATA_SIZE: usize = 0x7C00;
pub const HASHES_SIZE:      usize = 0x400;

/// Unencrypted area in front of every partition's data (ticket, TMD, certs, H3).
pub const PARTITION_HEADER_SIZE: u64 = 0x2_0000;

const SECTOR:      u64 = SECTOR_SIZE as u64;
const SECTOR_DATA: u64 = SECTOR_DATA_SIZE as u64;
const HASHES:      u64 = HASHES_SIZE as u64;

/// Size of one group's partition payload for a given ISO-space chunk size.
#[inline]
pub fn effective_group_size(chunk_size: u32) -> u64 {
    chunk_size as u64 * SECTOR_DATA / SECTOR
}

/// ISO offset (relative to a partition's data start) to decrypted offset.
///
/// Offsets inside a hash header collapse onto the first payload byte of
/// their sector, so this is not injective.
#[inline]
pub fn iso_to_decrypted(iso: u64) -> u64 {
    let block = iso / SECTOR;
    let intra = iso % SECTOR;
    if intra < HASHES {
        block * SECTOR_DATA
    } else {
        block * SECTOR_DATA + (intra - HASHES)
    }
}

/// Decrypted offset to the ISO offset of the same payload byte.
#[inline]
pub fn decrypted_to_iso(decrypted: u64) -> u64 {
    let block = decrypted / SECTOR_DATA;
    let intra = decrypted % SECTOR_DATA;
    block * SECTOR + HASHES + intra
}

/// Where a decrypted partition offset lives in the group tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    /// 0 for the management area, 1 for the remaining payload.
    pub data_entry:  usize,
    pub group_index: u32,
    /// Offset inside the decoded group.
    pub chunk_offset: u64,
    /// Decrypted offset of the group's first byte, relative to the
    /// partition's data start.  Seeds junk generation.
    pub group_offset: u64,
}

/// Translate a decrypted offset (relative to `data_entries[0]`'s first
/// sector) into a group.  `None` means the offset is beyond the stored data
/// and reads as zero.
pub fn locate(partition: &PartitionEntry, chunk_size: u32, decrypted: u64) -> Option<ChunkLocation> {
    let first = &partition.data_entries[0];
    let sector = first.first_sector as u64 + decrypted / SECTOR_DATA;
    let intra  = decrypted % SECTOR_DATA;

    let (data_entry, entry) = partition
        .data_entries
        .iter()
        .enumerate()
        .find(|(_, e)| e.contains_sector(sector))?;

    let local = (sector - entry.first_sector as u64) * SECTOR_DATA + intra;
    let group_size = effective_group_size(chunk_size);
    let rel_group = local / group_size;
    if rel_group >= entry.group_count as u64 {
        return None;
    }
    Some(ChunkLocation {
        data_entry,
        group_index:  entry.first_group_index + rel_group as u32,
        chunk_offset: local % group_size,
        group_offset: entry_base(first, entry) + rel_group * group_size,
    })
}

/// Decrypted offset of `entry`'s first byte relative to `first`'s.
#[inline]
fn entry_base(first: &DataEntry, entry: &DataEntry) -> u64 {
    (entry.first_sector as u64).saturating_sub(first.first_sector as u64) * SECTOR_DATA
}
