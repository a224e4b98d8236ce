//! Fixed-capacity buffer cache with round-robin eviction.
//!
//! Used twice by the reader: decoded groups keyed by group index (8 slots)
//! and re-encrypted partition groups keyed by partition and group number
//! (2 slots).  Slots own their buffers; lookups hand out borrows that end
//! at the next mutating call.

use tracing::trace;

pub const CHUNK_CACHE_SLOTS:   usize = 8;
pub const ENCRYPT_CACHE_SLOTS: usize = 2;

#[derive(Debug)]
pub struct SlotCache<K, const N: usize> {
    slots: [Option<(K, Vec<u8>)>; N],
    next:  usize,
}

impl<K: Copy + PartialEq + std::fmt::Debug, const N: usize> Default for SlotCache<K, N> {
    fn default() -> Self { Self::new() }
}

impl<K: Copy + PartialEq + std::fmt::Debug, const N: usize> SlotCache<K, N> {
    pub fn new() -> Self {
        Self { slots: std::array::from_fn(|_| None), next: 0 }
    }

    fn position(&self, key: K) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some((k, _)) if *k == key))
    }

    pub fn contains(&self, key: K) -> bool { self.position(key).is_some() }

    pub fn get(&self, key: K) -> Option<&[u8]> {
        self.position(key)
            .and_then(|i| self.slots[i].as_ref())
            .map(|(_, buf)| buf.as_slice())
    }

    /// Return the cached buffer for `key`, decoding it into the next slot on
    /// a miss.  The victim slot is emptied before `decode` runs, so a failed
    /// decode leaves it empty and the cursor where it was.
    pub fn get_or_decode<E, F>(&mut self, key: K, decode: F) -> Result<&[u8], E>
    where
        F: FnOnce() -> Result<Vec<u8>, E>,
    {
        if let Some(i) = self.position(key) {
            return Ok(self.slots[i].as_ref().map_or(&[][..], |(_, buf)| buf.as_slice()));
        }

        let victim = self.next;
        trace!(?key, victim, "cache miss");
        self.slots[victim] = None;
        let buf = decode()?;
        Ok(self.insert(key, buf))
    }

    /// Store `buf` in the next slot, evicting whatever was there.
    pub fn insert(&mut self, key: K, buf: Vec<u8>) -> &[u8] {
        let victim = self.next;
        self.next = (victim + 1) % N;
        let (_, buf) = self.slots[victim].insert((key, buf));
        buf.as_slice()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.next = 0;
    }
}
