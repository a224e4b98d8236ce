//! SHA-1 and AES-128-CBC primitives used to rebuild partition sectors.
//!
//! Only encryption is needed: the container stores partitions decrypted and
//! this crate re-creates the original ciphertext.

pub mod hash_tree;

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use sha1::{Digest, Sha1};
use thiserror::Error;

pub const KEY_LEN:  usize = 16;
pub const HASH_LEN: usize = 20;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("AES-CBC input of {0} bytes is not a multiple of the block size")]
    Unaligned(usize),
}

/// SHA-1 of `data`.
pub fn sha1_digest(data: &[u8]) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&Sha1::digest(data));
    out
}

/// AES-128-CBC encrypt `data` in place.  On return `iv` holds the last
/// ciphertext block, so consecutive calls chain.
pub fn aes_cbc_encrypt(key: &[u8; KEY_LEN], iv: &mut [u8; 16], data: &mut [u8]) -> Result<(), CryptoError> {
    let len = data.len();
    if len % 16 != 0 {
        return Err(CryptoError::Unaligned(len));
    }
    if len == 0 {
        return Ok(());
    }
    Aes128CbcEnc::new(key.into(), (&*iv).into())
        .encrypt_padded_mut::<NoPadding>(data, len)
        .map_err(|_| CryptoError::Unaligned(len))?;
    iv.copy_from_slice(&data[len - 16..]);
    Ok(())
}
