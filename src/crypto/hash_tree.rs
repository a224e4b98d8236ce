//! Hash-tree rebuild and re-encryption of one 64-sector partition group.
//!
//! Each ISO sector is a 0x400-byte hash header followed by 0x7C00 bytes of
//! payload.  Header layout:
//!
//! | Offset | Size  | Contents                                   |
//! |--------|-------|--------------------------------------------|
//! | 0x000  | 0x26C | H0: SHA-1 of each 0x400-byte payload slice |
//! | 0x280  | 0x0A0 | H1: SHA-1 of each H0 table in the subgroup |
//! | 0x340  | 0x0A0 | H2: SHA-1 of each H1 table in the group    |
//!
//! Everything else in the header is zero.  The header is encrypted with a
//! zero IV; the payload IV is bytes 0x3D0..0x3E0 of the encrypted header.

use super::{aes_cbc_encrypt, sha1_digest, CryptoError, HASH_LEN, KEY_LEN};
use crate::geometry::{HASHES_SIZE, SECTOR_DATA_SIZE, SECTOR_SIZE};

pub const GROUP_SECTORS:    usize = 64;
pub const SUBGROUP_SECTORS: usize = 8;
pub const GROUP_DATA_SIZE:  usize = GROUP_SECTORS * SECTOR_DATA_SIZE;
pub const GROUP_ISO_SIZE:   usize = GROUP_SECTORS * SECTOR_SIZE;

const H0_COUNT:  usize = SECTOR_DATA_SIZE / 0x400;
const H0_OFFSET: usize = 0x000;
const H1_OFFSET: usize = 0x280;
const H2_OFFSET: usize = 0x340;
const H1_SIZE:   usize = SUBGROUP_SECTORS * HASH_LEN;
const H2_SIZE:   usize = (GROUP_SECTORS / SUBGROUP_SECTORS) * HASH_LEN;
const DATA_IV_OFFSET: usize = 0x3D0;

/// Lay out `plain` (64 × 0x7C00 bytes) as 64 ISO sectors in `out`
/// (64 × 0x8000 bytes) with a complete H0/H1/H2 hash tree.
pub fn build_hashed_group(plain: &[u8], out: &mut [u8]) {
    debug_assert_eq!(plain.len(), GROUP_DATA_SIZE);
    debug_assert_eq!(out.len(), GROUP_ISO_SIZE);

    out.fill(0);

    // H0 per sector, payload copied behind its header.
    for sector in 0..GROUP_SECTORS {
        let data = &plain[sector * SECTOR_DATA_SIZE..(sector + 1) * SECTOR_DATA_SIZE];
        let base = sector * SECTOR_SIZE;
        for (i, slice) in data.chunks_exact(0x400).enumerate() {
            let at = base + H0_OFFSET + i * HASH_LEN;
            out[at..at + HASH_LEN].copy_from_slice(&sha1_digest(slice));
        }
        out[base + HASHES_SIZE..base + SECTOR_SIZE].copy_from_slice(data);
    }

    // H1 is collected on the subgroup's first sector, then replicated.
    for sector in 0..GROUP_SECTORS {
        let base = sector * SECTOR_SIZE;
        let h1 = sha1_digest(&out[base + H0_OFFSET..base + H0_OFFSET + H0_COUNT * HASH_LEN]);
        let owner = (sector / SUBGROUP_SECTORS) * SUBGROUP_SECTORS * SECTOR_SIZE;
        let at = owner + H1_OFFSET + (sector % SUBGROUP_SECTORS) * HASH_LEN;
        out[at..at + HASH_LEN].copy_from_slice(&h1);
    }
    for subgroup in 0..GROUP_SECTORS / SUBGROUP_SECTORS {
        let owner = subgroup * SUBGROUP_SECTORS * SECTOR_SIZE;
        let mut table = [0u8; H1_SIZE];
        table.copy_from_slice(&out[owner + H1_OFFSET..owner + H1_OFFSET + H1_SIZE]);
        for i in 1..SUBGROUP_SECTORS {
            let base = owner + i * SECTOR_SIZE;
            out[base + H1_OFFSET..base + H1_OFFSET + H1_SIZE].copy_from_slice(&table);
        }
    }

    // H2 is collected on sector 0, then replicated to the whole group.
    for subgroup in 0..GROUP_SECTORS / SUBGROUP_SECTORS {
        let owner = subgroup * SUBGROUP_SECTORS * SECTOR_SIZE;
        let h2 = sha1_digest(&out[owner + H1_OFFSET..owner + H1_OFFSET + H1_SIZE]);
        let at = H2_OFFSET + subgroup * HASH_LEN;
        out[at..at + HASH_LEN].copy_from_slice(&h2);
    }
    let mut table = [0u8; H2_SIZE];
    table.copy_from_slice(&out[H2_OFFSET..H2_OFFSET + H2_SIZE]);
    for sector in 1..GROUP_SECTORS {
        let base = sector * SECTOR_SIZE;
        out[base + H2_OFFSET..base + H2_OFFSET + H2_SIZE].copy_from_slice(&table);
    }
}

/// Encrypt every sector of a hashed group in place with the partition key.
pub fn encrypt_group(key: &[u8; KEY_LEN], group: &mut [u8]) -> Result<(), CryptoError> {
    for sector in group.chunks_exact_mut(SECTOR_SIZE) {
        let (header, data) = sector.split_at_mut(HASHES_SIZE);
        let mut iv = [0u8; 16];
        aes_cbc_encrypt(key, &mut iv, header)?;
        let mut data_iv = [0u8; 16];
        data_iv.copy_from_slice(&header[DATA_IV_OFFSET..DATA_IV_OFFSET + 16]);
        aes_cbc_encrypt(key, &mut data_iv, data)?;
    }
    Ok(())
}
