//! Builds small WIA/RVZ containers for tests and benches.

#![allow(dead_code)]

use byteorder::{BigEndian, WriteBytesExt};
use sha1::{Digest, Sha1};
use std::io::Write;
use tempfile::NamedTempFile;

pub const RVZ: [u8; 4] = *b"RVZ\x01";
pub const WIA: [u8; 4] = *b"WIA\x01";

pub const GAMECUBE: u32 = 1;
pub const WII:      u32 = 2;

pub const COMPRESSION_NONE: u32 = 0;
pub const COMPRESSION_LZMA: u32 = 3;
pub const COMPRESSION_ZSTD: u32 = 5;

pub const GC_MAGIC:  [u8; 4] = [0xC2, 0x33, 0x9F, 0x3D];
pub const WII_MAGIC: [u8; 4] = [0x5D, 0x1C, 0x9E, 0xA3];

const HEADER_END: usize = 0x48 + 0xDC;

fn sha1(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Sha1::digest(data));
    out
}

/// Group contents before they are written.
#[derive(Clone)]
pub enum Group {
    /// Size 0: reads as all zero.
    Zero,
    /// Passed through the container codec; `framed` marks the bytes as a
    /// block stream.
    Compressed { bytes: Vec<u8>, framed: bool },
    /// Written as is.
    Stored { bytes: Vec<u8>, framed: bool },
    /// Flagged compressed but written verbatim (corrupt on purpose).
    Garbage(Vec<u8>),
}

pub struct Partition {
    pub key:  [u8; 16],
    /// (first_sector, sector_count, first_group_index, group_count)
    pub data: [(u32, u32, u32, u32); 2],
}

pub struct ContainerBuilder {
    pub magic:       [u8; 4],
    pub disc_type:   u32,
    pub compression: u32,
    pub chunk_size:  u32,
    pub disc_head:   [u8; 0x80],
    pub iso_size:    u64,
    /// (data_offset, data_size, first_group_index, group_count)
    pub raw:         Vec<(u64, u64, u32, u32)>,
    pub partitions:  Vec<Partition>,
    pub groups:      Vec<Group>,
}

impl ContainerBuilder {
    pub fn new(magic: [u8; 4], disc_type: u32, chunk_size: u32, iso_size: u64) -> Self {
        let mut disc_head = [0u8; 0x80];
        disc_head[..6].copy_from_slice(b"RTEST1");
        if disc_type == WII {
            disc_head[0x18..0x1C].copy_from_slice(&WII_MAGIC);
        } else {
            disc_head[0x1C..0x20].copy_from_slice(&GC_MAGIC);
        }
        Self {
            magic,
            disc_type,
            compression: COMPRESSION_ZSTD,
            chunk_size,
            disc_head,
            iso_size,
            raw: Vec::new(),
            partitions: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn group(&mut self, group: Group) -> u32 {
        self.groups.push(group);
        (self.groups.len() - 1) as u32
    }

    fn physical(&self, group: &Group) -> (Vec<u8>, bool, u32) {
        match group {
            Group::Zero => (Vec::new(), true, 0),
            Group::Compressed { bytes, framed } => {
                let data = if self.compression == COMPRESSION_ZSTD {
                    zstd::encode_all(&bytes[..], 3).unwrap()
                } else {
                    bytes.clone()
                };
                (data, true, if *framed { bytes.len() as u32 } else { 0 })
            }
            Group::Stored { bytes, framed } => {
                (bytes.clone(), false, if *framed { bytes.len() as u32 } else { 0 })
            }
            Group::Garbage(bytes) => (bytes.clone(), true, 0),
        }
    }

    fn compress_table(&self, table: &[u8]) -> Vec<u8> {
        if self.compression == COMPRESSION_ZSTD {
            zstd::encode_all(table, 3).unwrap()
        } else {
            table.to_vec()
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let is_rvz = self.magic == RVZ;
        let mut file = vec![0u8; HEADER_END];

        // Group payloads first, so their offsets are known for the table.
        let mut group_table = Vec::new();
        for g in &self.groups {
            while file.len() % 4 != 0 {
                file.push(0);
            }
            let (data, compressed, framed_size) = self.physical(g);
            let offset = if data.is_empty() { 0 } else { (file.len() / 4) as u32 };
            file.extend_from_slice(&data);

            group_table.write_u32::<BigEndian>(offset).unwrap();
            if is_rvz {
                let flag = if compressed { 0x8000_0000 } else { 0 };
                group_table.write_u32::<BigEndian>(data.len() as u32 | flag).unwrap();
                group_table.write_u32::<BigEndian>(framed_size).unwrap();
            } else {
                group_table.write_u32::<BigEndian>(data.len() as u32).unwrap();
            }
        }

        let mut partition_table = Vec::new();
        for p in &self.partitions {
            partition_table.extend_from_slice(&p.key);
            for (first_sector, count, first_group, groups) in p.data {
                partition_table.write_u32::<BigEndian>(first_sector).unwrap();
                partition_table.write_u32::<BigEndian>(count).unwrap();
                partition_table.write_u32::<BigEndian>(first_group).unwrap();
                partition_table.write_u32::<BigEndian>(groups).unwrap();
            }
        }
        let partition_offset = file.len() as u64;
        file.extend_from_slice(&partition_table);

        let mut raw_table = Vec::new();
        for (offset, size, first_group, groups) in &self.raw {
            raw_table.write_u64::<BigEndian>(*offset).unwrap();
            raw_table.write_u64::<BigEndian>(*size).unwrap();
            raw_table.write_u32::<BigEndian>(*first_group).unwrap();
            raw_table.write_u32::<BigEndian>(*groups).unwrap();
        }
        let raw_packed = self.compress_table(&raw_table);
        let raw_offset = file.len() as u64;
        file.extend_from_slice(&raw_packed);

        let group_packed = self.compress_table(&group_table);
        let group_offset = file.len() as u64;
        file.extend_from_slice(&group_packed);

        // Header2
        let mut disc = Vec::with_capacity(0xDC);
        disc.write_u32::<BigEndian>(self.disc_type).unwrap();
        disc.write_u32::<BigEndian>(self.compression).unwrap();
        disc.write_i32::<BigEndian>(3).unwrap();
        disc.write_u32::<BigEndian>(self.chunk_size).unwrap();
        disc.extend_from_slice(&self.disc_head);
        disc.write_u32::<BigEndian>(self.partitions.len() as u32).unwrap();
        disc.write_u32::<BigEndian>(0x30).unwrap();
        disc.write_u64::<BigEndian>(partition_offset).unwrap();
        disc.extend_from_slice(&sha1(&partition_table));
        disc.write_u32::<BigEndian>(self.raw.len() as u32).unwrap();
        disc.write_u64::<BigEndian>(raw_offset).unwrap();
        disc.write_u32::<BigEndian>(raw_packed.len() as u32).unwrap();
        disc.write_u32::<BigEndian>(self.groups.len() as u32).unwrap();
        disc.write_u64::<BigEndian>(group_offset).unwrap();
        disc.write_u32::<BigEndian>(group_packed.len() as u32).unwrap();
        disc.resize(0xDC, 0);
        assert_eq!(disc.len(), 0xDC);

        // Header1
        let mut head = Vec::with_capacity(0x48);
        head.extend_from_slice(&self.magic);
        head.write_u32::<BigEndian>(0x0100_0000).unwrap();
        head.write_u32::<BigEndian>(if is_rvz { 0x0003_0000 } else { 0x0008_0000 }).unwrap();
        head.write_u32::<BigEndian>(0xDC).unwrap();
        head.extend_from_slice(&sha1(&disc));
        head.write_u64::<BigEndian>(self.iso_size).unwrap();
        head.write_u64::<BigEndian>(file.len() as u64).unwrap();
        let self_hash = sha1(&head);
        head.extend_from_slice(&self_hash);
        assert_eq!(head.len(), 0x48);

        file[..0x48].copy_from_slice(&head);
        file[0x48..HEADER_END].copy_from_slice(&disc);
        file
    }

    pub fn write_temp(&self) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&self.build()).unwrap();
        tmp.flush().unwrap();
        tmp
    }
}

/// Framed block holding `data` verbatim.
pub fn real_block(data: &[u8]) -> Vec<u8> {
    let mut v = (data.len() as u32).to_be_bytes().to_vec();
    v.extend_from_slice(data);
    v
}

/// Framed junk block of `len` bytes generated from `seed`.
pub fn junk_block(len: u32, seed: &[u8; 68]) -> Vec<u8> {
    let mut v = (len | 0x8000_0000).to_be_bytes().to_vec();
    v.extend_from_slice(seed);
    v
}

/// Deterministic, poorly compressible-looking test payload.
pub fn pattern(len: usize, salt: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(2_654_435_761).rotate_left(salt as u32 % 32) as u8 ^ salt)
        .collect()
}
