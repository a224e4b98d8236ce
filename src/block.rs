//! Secondary framing ("packed" groups).
//!
//! After entropy decoding, a framed group is a sequence of blocks, each led
//! by a 4-byte big-endian size:
//!
//! ```text
//! [size | 0x80000000][68-byte LFG seed]   junk block: `size` generated bytes
//! [size]             [size bytes]         real block: copied verbatim
//! [0]                                     empty marker, skipped
//! ```
//!
//! Junk generation depends on the absolute position of the output in the
//! disc, so the decoder tracks a running disc offset.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;
use tracing::{debug, warn};

use crate::geometry::SECTOR_SIZE;
use crate::index::SizeField;
use crate::lfg::{LaggedFibonacci, SEED_SIZE};

/// No framed block may claim more than this.
pub const MAX_BLOCK_SIZE: u32 = 0x100_0000;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("Framed block size {0:#x} exceeds {MAX_BLOCK_SIZE:#x}")]
    BlockTooLarge(u32),
    #[error("Junk block seed truncated at input offset {0}")]
    TruncatedSeed(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    AwaitingBlockHeader,
    CopyingReal { remaining: u32 },
    EmittingJunk { remaining: u32 },
    Exhausted,
}

/// Streaming decoder over one framed group.
#[derive(Debug)]
pub struct PackedReader<'a> {
    input:       &'a [u8],
    pos:         usize,
    disc_offset: u64,
    state:       FrameState,
    lfg:         LaggedFibonacci,
}

impl<'a> PackedReader<'a> {
    /// `disc_offset` is the position of the group's first output byte.
    pub fn new(input: &'a [u8], disc_offset: u64) -> Self {
        Self {
            input,
            pos: 0,
            disc_offset,
            state: FrameState::AwaitingBlockHeader,
            lfg: LaggedFibonacci::default(),
        }
    }

    pub fn is_exhausted(&self) -> bool { self.state == FrameState::Exhausted }

    /// Input bytes consumed so far.
    pub fn consumed(&self) -> usize { self.pos }

    /// Decode into `out`.  Returns the number of bytes produced, which is
    /// short only when the input runs out.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize, PackError> {
        let mut written = 0;
        while written < out.len() {
            match self.state {
                FrameState::Exhausted => break,
                FrameState::AwaitingBlockHeader => self.next_block()?,
                FrameState::EmittingJunk { remaining } => {
                    let n = (remaining as usize).min(out.len() - written);
                    self.lfg.emit(&mut out[written..written + n]);
                    self.produced(n, remaining);
                    written += n;
                }
                FrameState::CopyingReal { remaining } => {
                    let available = self.input.len() - self.pos;
                    let n = (remaining as usize).min(out.len() - written).min(available);
                    if n == 0 {
                        debug!(remaining, "framed input ended inside a real block");
                        self.state = FrameState::Exhausted;
                        break;
                    }
                    out[written..written + n].copy_from_slice(&self.input[self.pos..self.pos + n]);
                    self.pos += n;
                    self.produced(n, remaining);
                    written += n;
                }
            }
        }
        Ok(written)
    }

    fn next_block(&mut self) -> Result<(), PackError> {
        loop {
            if self.input.len() - self.pos < 4 {
                self.state = FrameState::Exhausted;
                return Ok(());
            }
            let header = SizeField::from(BigEndian::read_u32(&self.input[self.pos..]));
            self.pos += 4;
            if header.length == 0 {
                continue;
            }
            if header.length > MAX_BLOCK_SIZE {
                warn!(size = header.length, offset = self.pos - 4, "oversized framed block");
                return Err(PackError::BlockTooLarge(header.length));
            }

            if header.flag {
                let seed: &[u8; SEED_SIZE] = self
                    .input
                    .get(self.pos..self.pos + SEED_SIZE)
                    .and_then(|s| s.try_into().ok())
                    .ok_or(PackError::TruncatedSeed(self.pos))?;
                self.pos += SEED_SIZE;
                self.lfg.seed(seed);
                self.lfg.advance((self.disc_offset % SECTOR_SIZE as u64) as usize);
                self.state = FrameState::EmittingJunk { remaining: header.length };
            } else {
                self.state = FrameState::CopyingReal { remaining: header.length };
            }
            return Ok(());
        }
    }

    #[inline]
    fn produced(&mut self, n: usize, remaining: u32) {
        self.disc_offset += n as u64;
        let left = remaining - n as u32;
        self.state = match (left, self.state) {
            (0, _) => FrameState::AwaitingBlockHeader,
            (r, FrameState::EmittingJunk { .. }) => FrameState::EmittingJunk { remaining: r },
            (r, _) => FrameState::CopyingReal { remaining: r },
        };
    }
}

/// Decode a framed group into `out`.  Bytes past the end of the input are
/// left untouched, so callers pass a zeroed buffer.
pub fn unpack_into(input: &[u8], out: &mut [u8], disc_offset: u64) -> Result<usize, PackError> {
    let mut reader = PackedReader::new(input, disc_offset);
    let produced = reader.read(out)?;
    if produced < out.len() {
        debug!(produced, target = out.len(), "framed group shorter than its target size");
    }
    Ok(produced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real(data: &[u8]) -> Vec<u8> {
        let mut v = (data.len() as u32).to_be_bytes().to_vec();
        v.extend_from_slice(data);
        v
    }

    fn junk(len: u32, seed: &[u8; SEED_SIZE]) -> Vec<u8> {
        let mut v = (len | 0x8000_0000).to_be_bytes().to_vec();
        v.extend_from_slice(seed);
        v
    }

    fn seed() -> [u8; SEED_SIZE] {
        let mut s = [0u8; SEED_SIZE];
        for (i, b) in s.iter_mut().enumerate() {
            *b = 0x5A ^ i as u8;
        }
        s
    }

    fn unpack(input: &[u8], out_len: usize, disc_offset: u64) -> Result<Vec<u8>, PackError> {
        let mut out = vec![0u8; out_len];
        unpack_into(input, &mut out, disc_offset)?;
        Ok(out)
    }

    #[test]
    fn copies_real_blocks_and_skips_empty_markers() {
        let mut input = real(b"hello ");
        input.extend_from_slice(&0u32.to_be_bytes());
        input.extend(real(b"world"));
        let out = unpack(&input, 11, 0).unwrap();
        assert_eq!(&out, b"hello world");
    }

    #[test]
    fn junk_depends_on_disc_position() {
        let s = seed();
        let input = [real(&[1, 2, 3, 4]), junk(100, &s)].concat();
        let out = unpack(&input, 104, 0x8000 - 4).unwrap();
        assert_eq!(&out[..4], &[1, 2, 3, 4]);

        // The junk block starts at disc offset 0x8000, a sector boundary.
        let mut expected = vec![0u8; 100];
        LaggedFibonacci::new(&s).emit(&mut expected);
        assert_eq!(&out[4..], &expected[..]);

        // Same block one byte further into the sector.
        let shifted = unpack(&junk(100, &s), 100, 0x8001).unwrap();
        let mut lfg = LaggedFibonacci::new(&s);
        lfg.advance(1);
        let mut expected = vec![0u8; 100];
        lfg.emit(&mut expected);
        assert_eq!(shifted, expected);
    }

    #[test]
    fn truncated_real_block_is_partial_not_error() {
        let mut input = 16u32.to_be_bytes().to_vec();
        input.extend_from_slice(&[9u8; 6]);
        let mut reader = PackedReader::new(&input, 0);
        let mut out = [0u8; 16];
        assert_eq!(reader.read(&mut out).unwrap(), 6);
        assert!(reader.is_exhausted());
        assert_eq!(&out[..6], &[9u8; 6]);
        assert_eq!(&out[6..], &[0u8; 10]);
    }

    #[test]
    fn output_stops_at_requested_length() {
        let input = real(&[7u8; 64]);
        let mut reader = PackedReader::new(&input, 0);
        let mut out = [0u8; 10];
        assert_eq!(reader.read(&mut out).unwrap(), 10);
        assert!(!reader.is_exhausted());
        assert_eq!(reader.consumed(), 14);
        assert_eq!(reader.read(&mut out).unwrap(), 10);
    }

    #[test]
    fn malformed_blocks_are_errors() {
        let too_big = (MAX_BLOCK_SIZE + 1).to_be_bytes();
        assert!(matches!(unpack(&too_big, 16, 0), Err(PackError::BlockTooLarge(_))));

        let mut short_seed = (8u32 | 0x8000_0000).to_be_bytes().to_vec();
        short_seed.extend_from_slice(&[0u8; 10]);
        assert!(matches!(unpack(&short_seed, 16, 0), Err(PackError::TruncatedSeed(4))));
    }
}
