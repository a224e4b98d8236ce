//! Lagged Fibonacci generator that reproduces the filler ("junk") data
//! mastering tools write into unused disc space.
//!
//! The state is 521 32-bit words.  Output bytes are the words in big-endian
//! order, consumed sequentially; after every 2084 bytes the generator steps
//! once.

use byteorder::{BigEndian, ByteOrder};

pub const LFG_K: usize = 521;
pub const LFG_J: usize = 32;
pub const SEED_WORDS: usize = 17;
pub const SEED_SIZE: usize = SEED_WORDS * 4;

const STATE_BYTES: usize = LFG_K * 4;

#[derive(Clone)]
pub struct LaggedFibonacci {
    words:    [u32; LFG_K],
    bytes:    [u8; STATE_BYTES],
    /// Read cursor into `bytes`.
    position: usize,
}

impl Default for LaggedFibonacci {
    fn default() -> Self {
        Self { words: [0; LFG_K], bytes: [0; STATE_BYTES], position: 0 }
    }
}

impl std::fmt::Debug for LaggedFibonacci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaggedFibonacci").field("position", &self.position).finish_non_exhaustive()
    }
}

impl LaggedFibonacci {
    pub fn new(seed: &[u8; SEED_SIZE]) -> Self {
        let mut lfg = Self::default();
        lfg.seed(seed);
        lfg
    }

    /// Reset the state from a 68-byte seed.
    pub fn seed(&mut self, seed: &[u8; SEED_SIZE]) {
        self.position = 0;
        BigEndian::read_u32_into(seed, &mut self.words[..SEED_WORDS]);

        for i in SEED_WORDS..LFG_K {
            self.words[i] =
                (self.words[i - 17] << 23) ^ (self.words[i - 16] >> 9) ^ self.words[i - 1];
        }
        for w in self.words.iter_mut() {
            *w = (*w & 0xFF00_FFFF) | ((*w >> 2) & 0x00FF_0000);
        }
        for _ in 0..4 {
            self.step();
        }
        self.sync_bytes();
    }

    /// Skip `count` bytes of output.
    pub fn advance(&mut self, count: usize) {
        self.position += count;
        let mut stepped = false;
        while self.position >= STATE_BYTES {
            self.step();
            self.position -= STATE_BYTES;
            stepped = true;
        }
        if stepped {
            self.sync_bytes();
        }
    }

    /// Fill `out` with the next `out.len()` bytes of output.
    pub fn emit(&mut self, out: &mut [u8]) {
        let mut written = 0;
        while written < out.len() {
            let take = (out.len() - written).min(STATE_BYTES - self.position);
            out[written..written + take]
                .copy_from_slice(&self.bytes[self.position..self.position + take]);
            written += take;
            self.position += take;
            if self.position == STATE_BYTES {
                self.step();
                self.sync_bytes();
                self.position = 0;
            }
        }
    }

    fn step(&mut self) {
        for i in 0..LFG_J {
            self.words[i] ^= self.words[i + LFG_K - LFG_J];
        }
        for i in LFG_J..LFG_K {
            self.words[i] ^= self.words[i - LFG_J];
        }
    }

    #[inline]
    fn sync_bytes(&mut self) {
        BigEndian::write_u32_into(&self.words, &mut self.bytes);
    }
}
