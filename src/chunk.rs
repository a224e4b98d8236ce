//! Group decoding.
//!
//! A group's physical bytes go through up to three stages before they are
//! usable: entropy decoding, exception-list stripping (partition groups
//! only) and de-framing.  Which stages run depends on the group entry:
//!
//! | compressed | framed | pipeline                                          |
//! |------------|--------|---------------------------------------------------|
//! | yes        | yes    | decompress → strip (unaligned) → de-frame         |
//! | yes        | no     | decompress → strip (aligned) → fit                |
//! | no         | yes    | strip (aligned) → de-frame                        |
//! | no         | no     | strip (aligned) → fit                             |
//!
//! Every result is exactly `ChunkRequest::size` bytes: short data is
//! zero-padded and excess is truncated.

use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;
use tracing::debug;

use crate::block::{self, PackError};
use crate::codec::{Codec, CodecError};
use crate::crypto::CryptoError;
use crate::index::GroupEntry;

/// One hash exception: a 2-byte offset and a 20-byte SHA-1.
pub const EXCEPTION_SIZE: usize = 22;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Group {0} is out of range")]
    GroupOutOfRange(u32),
    #[error("Exception list {list} truncated at byte {offset}")]
    TruncatedExceptionList { list: u32, offset: usize },
    #[error("Allocation of {0} bytes failed")]
    Allocation(usize),
    #[error("Read made no progress at offset {0:#x}")]
    Stalled(u64),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Framing error: {0}")]
    Pack(#[from] PackError),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// What the caller wants out of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    pub group_index:          u32,
    /// Target size of the decoded group.
    pub size:                 usize,
    /// 0 for raw-data groups.
    pub exception_list_count: u32,
    /// Disc offset of the group's first decoded byte (junk seeding).
    pub disc_offset:          u64,
}

/// Zeroed buffer of `len` bytes, reporting allocation failure instead of
/// aborting.
pub fn alloc_zeroed(len: usize) -> Result<Vec<u8>, DecodeError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| DecodeError::Allocation(len))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Largest front matter `count` exception lists can occupy, alignment
/// included.
pub fn max_exception_bytes(count: u32) -> usize {
    if count == 0 {
        return 0;
    }
    (count as usize).saturating_mul(2 + u16::MAX as usize * EXCEPTION_SIZE).saturating_add(3)
}

/// Skip `count` exception lists at the front of `data`.  Returns the offset
/// of the first payload byte.
pub fn strip_exception_lists(data: &[u8], count: u32, align: bool) -> Result<usize, DecodeError> {
    if count == 0 {
        return Ok(0);
    }
    let mut pos = 0usize;
    for list in 0..count {
        let header = data
            .get(pos..pos + 2)
            .ok_or(DecodeError::TruncatedExceptionList { list, offset: pos })?;
        let entries = BigEndian::read_u16(header) as usize;
        let end = pos + 2 + entries * EXCEPTION_SIZE;
        if end > data.len() {
            return Err(DecodeError::TruncatedExceptionList { list, offset: pos });
        }
        pos = end;
    }
    if align {
        pos = (pos + 3) & !3;
        if pos > data.len() {
            return Err(DecodeError::TruncatedExceptionList { list: count - 1, offset: pos });
        }
    }
    Ok(pos)
}

/// Decode a group from its physical bytes.
pub fn decode_physical(
    entry:    &GroupEntry,
    physical: &[u8],
    codec:    &dyn Codec,
    req:      &ChunkRequest,
) -> Result<Vec<u8>, DecodeError> {
    if entry.data_size.length == 0 {
        return alloc_zeroed(req.size);
    }

    let compressed = entry.is_compressed();
    let framed     = entry.is_framed();
    debug!(group = req.group_index, compressed, framed, "decoding group");

    let inflated;
    let stage: &[u8] = if compressed {
        let limit = if framed {
            entry.framed_size as usize
        } else {
            req.size.saturating_add(max_exception_bytes(req.exception_list_count))
        };
        inflated = codec.decompress(physical, limit)?;
        &inflated
    } else {
        physical
    };

    let align = !(compressed && framed);
    let start = strip_exception_lists(stage, req.exception_list_count, align)?;
    let payload = &stage[start..];

    let mut out = alloc_zeroed(req.size)?;
    if framed {
        block::unpack_into(payload, &mut out, req.disc_offset)?;
    } else {
        let n = payload.len().min(req.size);
        out[..n].copy_from_slice(&payload[..n]);
    }
    Ok(out)
}

/// Read a group's physical bytes from the container file.
pub fn read_physical<R: Read + Seek>(reader: &mut R, entry: &GroupEntry) -> Result<Vec<u8>, DecodeError> {
    let len = entry.data_size.length as usize;
    let mut buf = alloc_zeroed(len)?;
    reader.seek(SeekFrom::Start(entry.file_offset()))?;
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Resolve, read and decode one group.
pub fn decode<R: Read + Seek>(
    reader: &mut R,
    groups: &[GroupEntry],
    codec:  &dyn Codec,
    req:    &ChunkRequest,
) -> Result<Vec<u8>, DecodeError> {
    let entry = groups
        .get(req.group_index as usize)
        .ok_or(DecodeError::GroupOutOfRange(req.group_index))?;
    if entry.data_size.length == 0 {
        return alloc_zeroed(req.size);
    }
    let physical = read_physical(reader, entry)?;
    decode_physical(entry, &physical, codec, req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{get_codec, CompressionKind};
    use crate::index::SizeField;
    use std::io::Cursor;

    /// One exception list with `n` entries filled with 0xEE.
    fn exception_list(n: u16) -> Vec<u8> {
        let mut v = n.to_be_bytes().to_vec();
        v.resize(2 + n as usize * EXCEPTION_SIZE, 0xEE);
        v
    }

    fn real_block(data: &[u8]) -> Vec<u8> {
        let mut v = (data.len() as u32).to_be_bytes().to_vec();
        v.extend_from_slice(data);
        v
    }

    fn entry(len: usize, compressed: bool, framed_size: u32) -> GroupEntry {
        GroupEntry {
            physical_offset: 0,
            data_size:       SizeField { length: len as u32, flag: compressed },
            framed_size,
        }
    }

    fn request(size: usize, exception_list_count: u32) -> ChunkRequest {
        ChunkRequest { group_index: 0, size, exception_list_count, disc_offset: 0 }
    }

    fn payload() -> Vec<u8> {
        (0..300u32).map(|i| (i % 200) as u8 + 1).collect()
    }

    #[test]
    fn strip_walks_every_list() {
        let data = [exception_list(2), exception_list(0), vec![1, 2, 3]].concat();
        assert_eq!(strip_exception_lists(&data, 2, false).unwrap(), 2 + 44 + 2);
        assert_eq!(strip_exception_lists(&data, 2, true).unwrap(), 48);
        assert_eq!(strip_exception_lists(&data, 0, true).unwrap(), 0);
    }

    #[test]
    fn strip_rejects_truncated_list() {
        let mut data = exception_list(3);
        data.truncate(30);
        assert!(matches!(
            strip_exception_lists(&data, 1, false),
            Err(DecodeError::TruncatedExceptionList { list: 0, offset: 0 })
        ));
        assert!(matches!(
            strip_exception_lists(&[0, 0], 2, false),
            Err(DecodeError::TruncatedExceptionList { list: 1, offset: 2 })
        ));
    }

    #[test]
    fn compressed_and_framed_strips_unaligned() {
        let zstd = get_codec(CompressionKind::Zstd).unwrap();
        let framed = real_block(&payload());
        // 2 + 22 = 24 bytes, then 2 + 22 * 2 = 46 bytes: 70 total, not padded.
        let stream = [exception_list(1), exception_list(2), framed.clone()].concat();
        let packed = zstd::encode_all(&stream[..], 1).unwrap();

        let e = entry(packed.len(), true, stream.len() as u32);
        let out = decode_physical(&e, &packed, zstd.as_ref(), &request(300, 2)).unwrap();
        assert_eq!(out, payload());
        assert_eq!(stream.len() - framed.len(), 2 + 22 + 2 + 22 * 2);
        assert!(!out.contains(&0xEE));
    }

    #[test]
    fn compressed_only_strips_aligned() {
        let zstd = get_codec(CompressionKind::Zstd).unwrap();
        // 2 + 22 = 24 is already aligned; one extra entry makes 46 → 48.
        let stream = [exception_list(2), vec![0xEE, 0xEE], payload()].concat();
        let packed = zstd::encode_all(&stream[..], 1).unwrap();

        let e = entry(packed.len(), true, 0);
        let out = decode_physical(&e, &packed, zstd.as_ref(), &request(300, 1)).unwrap();
        assert_eq!(out, payload());
    }

    #[test]
    fn uncompressed_framed_strips_aligned() {
        let none = get_codec(CompressionKind::None).unwrap();
        let physical = [exception_list(2), vec![0xEE, 0xEE], real_block(&payload())].concat();
        let e = entry(physical.len(), false, 1);
        let out = decode_physical(&e, &physical, none.as_ref(), &request(300, 1)).unwrap();
        assert_eq!(out, payload());
    }

    #[test]
    fn uncompressed_unframed_pads_and_truncates() {
        let none = get_codec(CompressionKind::None).unwrap();
        let physical = [exception_list(0), vec![0xEE, 0xEE], payload()].concat();
        let e = entry(physical.len(), false, 0);

        let padded = decode_physical(&e, &physical, none.as_ref(), &request(400, 1)).unwrap();
        assert_eq!(&padded[..300], &payload()[..]);
        assert!(padded[300..].iter().all(|&b| b == 0));

        let cut = decode_physical(&e, &physical, none.as_ref(), &request(100, 1)).unwrap();
        assert_eq!(&cut[..], &payload()[..100]);
    }

    #[test]
    fn raw_groups_have_no_exception_lists() {
        let none = get_codec(CompressionKind::None).unwrap();
        let physical = payload();
        let e = entry(physical.len(), false, 0);
        let out = decode_physical(&e, &physical, none.as_ref(), &request(300, 0)).unwrap();
        assert_eq!(out, physical);
    }

    #[test]
    fn zero_sized_group_is_all_zero() {
        let none = get_codec(CompressionKind::None).unwrap();
        let groups = [entry(0, true, 0)];
        let mut file = Cursor::new(Vec::new());
        let out = decode(&mut file, &groups, none.as_ref(), &request(0x1000, 1)).unwrap();
        assert_eq!(out, vec![0u8; 0x1000]);
    }

    #[test]
    fn reads_physical_bytes_from_file() {
        let none = get_codec(CompressionKind::None).unwrap();
        let mut bytes = vec![0xAAu8; 8];
        bytes.extend_from_slice(&payload());
        let groups = [GroupEntry {
            physical_offset: 2,
            data_size:       SizeField { length: 300, flag: false },
            framed_size:     0,
        }];
        let mut file = Cursor::new(bytes);
        let out = decode(&mut file, &groups, none.as_ref(), &request(300, 0)).unwrap();
        assert_eq!(out, payload());

        assert!(matches!(
            decode(&mut file, &groups, none.as_ref(), &ChunkRequest { group_index: 1, ..request(300, 0) }),
            Err(DecodeError::GroupOutOfRange(1))
        ));
    }

    #[test]
    fn decompression_failure_is_an_error() {
        let zstd = get_codec(CompressionKind::Zstd).unwrap();
        let garbage = [0x12u8; 40];
        let e = entry(garbage.len(), true, 0);
        assert!(matches!(
            decode_physical(&e, &garbage, zstd.as_ref(), &request(64, 0)),
            Err(DecodeError::Codec(_))
        ));
    }

    #[test]
    fn inflation_past_the_group_is_rejected() {
        let zstd = get_codec(CompressionKind::Zstd).unwrap();
        let bomb = zstd::encode_all(&vec![0u8; 8 << 20][..], 3).unwrap();

        let e = entry(bomb.len(), true, 0);
        assert!(matches!(
            decode_physical(&e, &bomb, zstd.as_ref(), &request(0x8000, 0)),
            Err(DecodeError::Codec(CodecError::LimitExceeded(0x8000)))
        ));

        // The declared framed size bounds framed groups.
        let e = entry(bomb.len(), true, 0x1000);
        assert!(matches!(
            decode_physical(&e, &bomb, zstd.as_ref(), &request(0x8000, 1)),
            Err(DecodeError::Codec(CodecError::LimitExceeded(0x1000)))
        ));
    }

    #[test]
    fn exception_bound_covers_full_lists() {
        assert_eq!(max_exception_bytes(0), 0);
        let full = [exception_list(u16::MAX), vec![1]].concat();
        assert!(strip_exception_lists(&full, 1, true).unwrap() <= max_exception_bytes(1));
    }
}
