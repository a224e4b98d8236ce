//! Fixed-size container headers.
//!
//! Header1 ([`FileHeader`]) lives at offset 0 and is always 0x48 bytes.
//! Header2 ([`DiscInfo`]) follows immediately and is 0xDC bytes.  Every
//! integer is big-endian; there is no runtime negotiation.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::{self, Read};
use thiserror::Error;

use crate::codec::{CodecError, CompressionKind};
use crate::crypto::sha1_digest;

pub const WIA_MAGIC: [u8; 4] = *b"WIA\x01";
pub const RVZ_MAGIC: [u8; 4] = *b"RVZ\x01";

pub const FILE_HEADER_SIZE: usize = 0x48;
pub const DISC_INFO_SIZE:   usize = 0xDC;
pub const DISC_HEAD_SIZE:   usize = 0x80;

const WIA_VERSION:              u32 = 0x0100_0000;
const WIA_VERSION_READ_COMPAT:  u32 = 0x0008_0000;
const RVZ_VERSION:              u32 = 0x0100_0000;
const RVZ_VERSION_READ_COMPAT:  u32 = 0x0003_0000;

/// Groups of a WIA file must be a multiple of this.
pub const WIA_CHUNK_ALIGN: u32 = 0x20_0000;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid magic number: {0:02x?}")]
    InvalidMagic([u8; 4]),
    #[error("Unsupported container version: {version:#010x} (compatible {compatible:#010x})")]
    UnsupportedVersion { version: u32, compatible: u32 },
    #[error("SHA-1 mismatch in {0}")]
    HashMismatch(&'static str),
    #[error("Unsupported compression type: {0}")]
    UnsupportedCompression(u32),
    #[error("Invalid disc type: {0}")]
    InvalidDiscType(u32),
    #[error("Invalid chunk size: {0:#x}")]
    InvalidChunkSize(u32),
    #[error("Invalid partition entry size: {0}")]
    InvalidPartitionEntrySize(u32),
    #[error("{table} table truncated: need {need} bytes, have {have}")]
    TruncatedTable { table: &'static str, need: usize, have: usize },
    #[error("Allocation of {0} bytes failed")]
    Allocation(usize),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Container variant ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Wia,
    Rvz,
}

impl Variant {
    pub fn name(self) -> &'static str {
        match self {
            Variant::Wia => "WIA",
            Variant::Rvz => "RVZ",
        }
    }
}

// ── Disc kind ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscKind {
    GameCube,
    Wii,
}

impl TryFrom<u32> for DiscKind {
    type Error = FormatError;

    fn try_from(value: u32) -> Result<Self, FormatError> {
        match value {
            1 => Ok(DiscKind::GameCube),
            2 => Ok(DiscKind::Wii),
            v => Err(FormatError::InvalidDiscType(v)),
        }
    }
}

// ── Header1 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileHeader {
    pub variant:            Variant,
    pub version:            u32,
    pub version_compatible: u32,
    /// Byte count covered by `disc_hash`.
    pub disc_size:          u32,
    pub disc_hash:          [u8; 20],
    /// Size of the reconstructed image.
    pub iso_file_size:      u64,
    /// Size of the container file itself.
    pub wia_file_size:      u64,
    pub file_head_hash:     [u8; 20],
}

impl FileHeader {
    pub fn read<R: Read>(mut reader: R, verify: bool) -> Result<Self, FormatError> {
        let mut raw = [0u8; FILE_HEADER_SIZE];
        reader.read_exact(&mut raw)?;
        Self::parse(&raw, verify)
    }

    pub fn parse(raw: &[u8; FILE_HEADER_SIZE], verify: bool) -> Result<Self, FormatError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&raw[..4]);
        let variant = match magic {
            WIA_MAGIC => Variant::Wia,
            RVZ_MAGIC => Variant::Rvz,
            other     => return Err(FormatError::InvalidMagic(other)),
        };

        let mut cur = &raw[4..];
        let version            = cur.read_u32::<BigEndian>()?;
        let version_compatible = cur.read_u32::<BigEndian>()?;
        let disc_size          = cur.read_u32::<BigEndian>()?;
        let mut disc_hash = [0u8; 20];
        cur.read_exact(&mut disc_hash)?;
        let iso_file_size = cur.read_u64::<BigEndian>()?;
        let wia_file_size = cur.read_u64::<BigEndian>()?;
        let mut file_head_hash = [0u8; 20];
        cur.read_exact(&mut file_head_hash)?;

        let (implemented, read_compat) = match variant {
            Variant::Wia => (WIA_VERSION, WIA_VERSION_READ_COMPAT),
            Variant::Rvz => (RVZ_VERSION, RVZ_VERSION_READ_COMPAT),
        };
        if implemented < version_compatible || read_compat > version {
            return Err(FormatError::UnsupportedVersion { version, compatible: version_compatible });
        }

        if verify && sha1_digest(&raw[..FILE_HEADER_SIZE - 20]) != file_head_hash {
            return Err(FormatError::HashMismatch("file header"));
        }

        Ok(Self {
            variant,
            version,
            version_compatible,
            disc_size,
            disc_hash,
            iso_file_size,
            wia_file_size,
            file_head_hash,
        })
    }

    pub fn is_rvz(&self) -> bool { self.variant == Variant::Rvz }
}

// ── Header2 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DiscInfo {
    pub disc_kind:                DiscKind,
    pub compression:              CompressionKind,
    pub compression_level:        i32,
    /// Group size in ISO-space bytes.
    pub chunk_size:               u32,
    /// First 0x80 bytes of the original image.
    pub disc_head:                [u8; DISC_HEAD_SIZE],
    pub num_partitions:           u32,
    pub partition_entry_size:     u32,
    pub partition_entries_offset: u64,
    pub partition_entries_hash:   [u8; 20],
    pub num_raw_data:             u32,
    pub raw_data_offset:          u64,
    pub raw_data_size:            u32,
    pub num_groups:               u32,
    pub group_offset:             u64,
    pub group_size:               u32,
    pub compressor_data_len:      u8,
    pub compressor_data:          [u8; 7],
}

impl DiscInfo {
    /// Reads the fixed 0xDC-byte block.  `header` supplies the hash and the
    /// variant-specific chunk-size rule.
    pub fn read<R: Read>(mut reader: R, header: &FileHeader, verify: bool) -> Result<Self, FormatError> {
        let mut raw = [0u8; DISC_INFO_SIZE];
        reader.read_exact(&mut raw)?;
        if verify {
            let hashed = (header.disc_size as usize).min(DISC_INFO_SIZE);
            if sha1_digest(&raw[..hashed]) != header.disc_hash {
                return Err(FormatError::HashMismatch("disc header"));
            }
        }
        Self::parse(&raw, header.variant)
    }

    pub fn parse(raw: &[u8; DISC_INFO_SIZE], variant: Variant) -> Result<Self, FormatError> {
        let disc_kind = DiscKind::try_from(BigEndian::read_u32(&raw[0x00..]))?;

        let compression_tag = BigEndian::read_u32(&raw[0x04..]);
        let compression = CompressionKind::try_from(compression_tag)
            .map_err(|_| FormatError::UnsupportedCompression(compression_tag))?;
        if !compression.is_supported() {
            return Err(FormatError::UnsupportedCompression(compression_tag));
        }

        let chunk_size = BigEndian::read_u32(&raw[0x0C..]);
        let chunk_ok = match variant {
            Variant::Rvz => chunk_size >= 0x8000
                && (chunk_size.is_power_of_two() || chunk_size % WIA_CHUNK_ALIGN == 0),
            Variant::Wia => chunk_size >= WIA_CHUNK_ALIGN && chunk_size % WIA_CHUNK_ALIGN == 0,
        };
        if !chunk_ok {
            return Err(FormatError::InvalidChunkSize(chunk_size));
        }

        let partition_entry_size = BigEndian::read_u32(&raw[0x94..]);
        let num_partitions       = BigEndian::read_u32(&raw[0x90..]);
        if num_partitions > 0
            && (partition_entry_size == 0 || partition_entry_size as usize > crate::index::PARTITION_ENTRY_SIZE)
        {
            return Err(FormatError::InvalidPartitionEntrySize(partition_entry_size));
        }

        let mut disc_head = [0u8; DISC_HEAD_SIZE];
        disc_head.copy_from_slice(&raw[0x10..0x90]);
        let mut partition_entries_hash = [0u8; 20];
        partition_entries_hash.copy_from_slice(&raw[0xA0..0xB4]);
        let mut compressor_data = [0u8; 7];
        compressor_data.copy_from_slice(&raw[0xD5..0xDC]);

        Ok(Self {
            disc_kind,
            compression,
            compression_level:        BigEndian::read_i32(&raw[0x08..]),
            chunk_size,
            disc_head,
            num_partitions,
            partition_entry_size,
            partition_entries_offset: BigEndian::read_u64(&raw[0x98..]),
            partition_entries_hash,
            num_raw_data:             BigEndian::read_u32(&raw[0xB4..]),
            raw_data_offset:          BigEndian::read_u64(&raw[0xB8..]),
            raw_data_size:            BigEndian::read_u32(&raw[0xC0..]),
            num_groups:               BigEndian::read_u32(&raw[0xC4..]),
            group_offset:             BigEndian::read_u64(&raw[0xC8..]),
            group_size:               BigEndian::read_u32(&raw[0xD0..]),
            compressor_data_len:      raw[0xD4],
            compressor_data,
        })
    }

    /// Wii partitions are stored decrypted; byte 0x61 of the disc header is
    /// zero when the original disc encrypted them.
    pub fn partitions_encrypted(&self) -> bool { self.disc_head[0x61] == 0 }
}
