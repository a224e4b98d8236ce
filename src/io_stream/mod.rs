//! Random-access reconstruction of the original disc image.
//!
//! # Reader
//! [`DiscReader::read_at`] is stateless with respect to position: every
//! call names its own offset and nothing remembers where the last one
//! ended.  The hash-tree emulator relies on that, since it re-enters
//! `read_at` for the plaintext of the group it is building while an outer
//! read is still in progress.  A single `in_emulator` flag makes those
//! inner reads return plaintext instead of recursing into the emulator
//! again.
//!
//! # Stream
//! [`DiscStream`] owns the one shared cursor and implements `Read` and
//! `Seek` on top of `read_at`.
//!
//! # Errors
//! Read-time failures are local to the read that hit them: they are logged
//! and reported as a short count.  A read that cannot make any progress
//! returns 0.

use std::io::{self, Read, Seek, SeekFrom};

use tracing::{debug, warn};

use crate::cache::{SlotCache, CHUNK_CACHE_SLOTS, ENCRYPT_CACHE_SLOTS};
use crate::chunk::{self, alloc_zeroed, ChunkRequest, DecodeError};
use crate::codec::{get_codec, Codec};
use crate::crypto::hash_tree::{build_hashed_group, encrypt_group, GROUP_DATA_SIZE, GROUP_ISO_SIZE, GROUP_SECTORS};
use crate::geometry::{iso_to_decrypted, locate, HASHES_SIZE, SECTOR_DATA_SIZE, SECTOR_SIZE};
use crate::header::{FormatError, DISC_HEAD_SIZE};
use crate::index::{EntryKind, Lookup, PartitionEntry};
use crate::meta::ContainerMeta;

const SECTOR:    u64 = SECTOR_SIZE as u64;
const HASHES:    u64 = HASHES_SIZE as u64;
const GROUP_ISO: u64 = GROUP_ISO_SIZE as u64;

/// Where one step of the read loop gets its bytes.
#[derive(Debug, Clone, Copy)]
enum Source {
    Zero { len: u64 },
    Raw { index: usize, len: u64 },
    Partition { index: usize, len: u64 },
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct DiscReader<R: Read + Seek> {
    file:               R,
    meta:               ContainerMeta,
    codec:              Box<dyn Codec>,
    chunks:             SlotCache<u32, CHUNK_CACHE_SLOTS>,
    /// Keyed by (partition index, 2 MiB group number from the data start).
    encrypted:          SlotCache<(usize, u64), ENCRYPT_CACHE_SLOTS>,
    in_emulator:        bool,
    emulate_encryption: bool,
}

impl<R: Read + Seek> DiscReader<R> {
    pub fn new(file: R, meta: ContainerMeta, emulate_encryption: bool) -> Result<Self, FormatError> {
        let codec = get_codec(meta.disc.compression)?;
        Ok(Self {
            file,
            meta,
            codec,
            chunks:      SlotCache::new(),
            encrypted:   SlotCache::new(),
            in_emulator: false,
            emulate_encryption,
        })
    }

    pub fn meta(&self) -> &ContainerMeta { &self.meta }

    /// Size of the reconstructed image.
    pub fn size(&self) -> u64 { self.meta.iso_size() }

    /// Drop every cached group.
    pub fn clear_caches(&mut self) {
        self.chunks.clear();
        self.encrypted.clear();
    }

    pub fn into_inner(self) -> R { self.file }

    /// Fill `buf` with image bytes starting at `offset`.  Returns the number
    /// of bytes produced: short at the end of the image or when a group
    /// fails to decode, 0 when nothing could be read.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> usize {
        let (done, status) = self.read_loop(offset, buf);
        if let Err(e) = status {
            warn!(offset = offset + done as u64, returned = done, error = %e, "read failed");
        }
        done
    }

    /// Like [`read_at`](Self::read_at) but a decode failure is returned
    /// instead of being turned into a short count.
    pub fn try_read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, DecodeError> {
        let (done, status) = self.read_loop(offset, buf);
        status.map(|_| done)
    }

    fn read_loop(&mut self, offset: u64, buf: &mut [u8]) -> (usize, Result<(), DecodeError>) {
        let size = self.meta.iso_size();
        if offset >= size || buf.is_empty() {
            return (0, Ok(()));
        }
        let len = (size - offset).min(buf.len() as u64) as usize;
        let buf = &mut buf[..len];

        let mut done = 0usize;
        let mut status = Ok(());
        while done < len {
            let pos = offset + done as u64;
            let out = &mut buf[done..];
            let step = if pos < DISC_HEAD_SIZE as u64 {
                let n = out.len().min(DISC_HEAD_SIZE - pos as usize);
                out[..n].copy_from_slice(&self.meta.disc.disc_head[pos as usize..pos as usize + n]);
                Ok(n)
            } else {
                self.fill_from(pos, out)
            };
            match step {
                Ok(0) => {
                    status = Err(DecodeError::Stalled(pos));
                    break;
                }
                Ok(n) => done += n,
                Err(e) => {
                    status = Err(e);
                    break;
                }
            }
        }

        for patch in &self.meta.patches {
            patch.apply(offset, &mut buf[..done]);
        }
        (done, status)
    }

    fn source(&self, pos: u64) -> Source {
        match self.meta.index.find(pos) {
            Lookup::End           => Source::Zero { len: u64::MAX },
            Lookup::Gap { next }  => Source::Zero { len: next.start - pos },
            Lookup::Covered(d)    => match d.kind {
                EntryKind::Raw { index }          => Source::Raw { index, len: d.end - pos },
                EntryKind::Partition { index, .. } => Source::Partition { index, len: d.end - pos },
            },
        }
    }

    /// One step of the read loop.  Never crosses a region boundary.
    fn fill_from(&mut self, pos: u64, out: &mut [u8]) -> Result<usize, DecodeError> {
        let cap = out.len() as u64;
        match self.source(pos) {
            Source::Zero { len } => {
                let n = len.min(cap) as usize;
                out[..n].fill(0);
                Ok(n)
            }
            Source::Raw { index, len } => {
                let n = len.min(cap) as usize;
                self.read_raw(index, pos, &mut out[..n])
            }
            Source::Partition { index, len } => {
                let n = len.min(cap) as usize;
                self.read_partition(index, pos, &mut out[..n])
            }
        }
    }

    // ── Raw regions ─────────────────────────────────────────────────────────

    fn read_raw(&mut self, index: usize, pos: u64, out: &mut [u8]) -> Result<usize, DecodeError> {
        let raw = &self.meta.raw_data[index];
        let chunk = self.meta.chunk_size() as u64;
        let base = raw.aligned_start();
        let rel_group = (pos - base) / chunk;
        let within = ((pos - base) % chunk) as usize;
        let first_group_index = raw.first_group_index;
        let group_count = raw.group_count;

        let avail = out.len().min(chunk as usize - within);
        if rel_group >= group_count as u64 {
            // Past the stored groups: defined to read as zero.
            out[..avail].fill(0);
            return Ok(avail);
        }

        let req = ChunkRequest {
            group_index:          first_group_index + rel_group as u32,
            size:                 chunk as usize,
            exception_list_count: 0,
            disc_offset:          base + rel_group * chunk,
        };
        let data = self.chunk(&req)?;
        out[..avail].copy_from_slice(&data[within..within + avail]);
        Ok(avail)
    }

    fn chunk(&mut self, req: &ChunkRequest) -> Result<&[u8], DecodeError> {
        let Self { chunks, file, meta, codec, .. } = self;
        chunks.get_or_decode(req.group_index, || chunk::decode(file, &meta.groups, &**codec, req))
    }

    // ── Partition regions ───────────────────────────────────────────────────

    fn read_partition(&mut self, index: usize, pos: u64, out: &mut [u8]) -> Result<usize, DecodeError> {
        let partition = self.meta.partitions[index].clone();
        let data_start = partition.data_start();
        if pos < data_start {
            let n = out.len().min((data_start - pos) as usize);
            return self.read_partition_header(pos, &mut out[..n]);
        }

        let rel = pos - data_start;
        if self.in_emulator || !self.emulate_encryption {
            self.read_partition_plain(&partition, rel, out)
        } else {
            self.read_partition_encrypted(index, rel, out)
        }
    }

    /// The 0x20000 bytes in front of a partition's data are stored by
    /// whichever raw region covers them, if any.
    fn read_partition_header(&mut self, pos: u64, out: &mut [u8]) -> Result<usize, DecodeError> {
        let raw = self.meta.index.find_raw(pos).copied();
        if let Some(d) = raw {
            if let EntryKind::Raw { index } = d.kind {
                let n = out.len().min((d.end - pos) as usize);
                return self.read_raw(index, pos, &mut out[..n]);
            }
        }
        let n = match self.meta.index.next_raw_start(pos) {
            Some(start) => out.len().min((start - pos) as usize),
            None        => out.len(),
        };
        out[..n].fill(0);
        Ok(n)
    }

    /// Decrypted payload laid out in ISO space, hash headers zeroed.
    fn read_partition_plain(
        &mut self,
        partition: &PartitionEntry,
        rel:       u64,
        out:       &mut [u8],
    ) -> Result<usize, DecodeError> {
        let intra = rel % SECTOR;
        if intra < HASHES {
            let n = out.len().min((HASHES - intra) as usize);
            out[..n].fill(0);
            return Ok(n);
        }

        let sector_left = (SECTOR - intra) as usize;
        let decrypted = iso_to_decrypted(rel);
        let Some(loc) = locate(partition, self.meta.chunk_size(), decrypted) else {
            let n = out.len().min(sector_left);
            out[..n].fill(0);
            return Ok(n);
        };

        let group_size = self.meta.partition_group_size();
        let req = ChunkRequest {
            group_index:          loc.group_index,
            size:                 group_size as usize,
            exception_list_count: partition.data_entries[loc.data_entry].exception_list_count,
            disc_offset:          loc.group_offset,
        };
        let within = loc.chunk_offset as usize;
        let n = out.len().min(sector_left).min(group_size as usize - within);
        let data = self.chunk(&req)?;
        out[..n].copy_from_slice(&data[within..within + n]);
        Ok(n)
    }

    fn read_partition_encrypted(&mut self, index: usize, rel: u64, out: &mut [u8]) -> Result<usize, DecodeError> {
        let group = rel / GROUP_ISO;
        let within = (rel % GROUP_ISO) as usize;
        let data = self.encrypted_group(index, group)?;
        let n = out.len().min(data.len() - within);
        out[..n].copy_from_slice(&data[within..within + n]);
        Ok(n)
    }

    fn encrypted_group(&mut self, index: usize, group: u64) -> Result<&[u8], DecodeError> {
        let key = (index, group);
        if self.encrypted.contains(key) {
            return Ok(self.encrypted.get(key).unwrap_or_default());
        }
        let buf = self.emulate_group(index, group)?;
        Ok(self.encrypted.insert(key, buf))
    }

    /// Rebuild the hash tree of one 64-sector group and, unless the disc
    /// is stored unencrypted, encrypt it with the partition key.
    fn emulate_group(&mut self, index: usize, group: u64) -> Result<Vec<u8>, DecodeError> {
        let partition = self.meta.partitions[index].clone();
        debug!(partition = index, group, "emulating hash tree");

        let mut plain = alloc_zeroed(GROUP_DATA_SIZE)?;
        let previous = std::mem::replace(&mut self.in_emulator, true);
        let filled = self.read_group_plain(&partition, group, &mut plain);
        self.in_emulator = previous;
        filled?;

        let mut out = alloc_zeroed(GROUP_ISO_SIZE)?;
        build_hashed_group(&plain, &mut out);
        if self.meta.disc.partitions_encrypted() {
            encrypt_group(&partition.partition_key, &mut out)?;
        }
        Ok(out)
    }

    fn read_group_plain(&mut self, partition: &PartitionEntry, group: u64, plain: &mut [u8]) -> Result<(), DecodeError> {
        let data_end = partition.data_end();
        let group_start = partition.data_start() + group * GROUP_ISO;
        for (sector, dst) in plain.chunks_exact_mut(SECTOR_DATA_SIZE).enumerate().take(GROUP_SECTORS) {
            let iso = group_start + sector as u64 * SECTOR;
            if iso >= data_end {
                break;
            }
            self.try_read_at(iso + HASHES, dst)?;
        }
        Ok(())
    }
}

// ── Stream ───────────────────────────────────────────────────────────────────

/// Seekable stream over the reconstructed image.
pub struct DiscStream<R: Read + Seek> {
    reader: DiscReader<R>,
    pos:    u64,
}

impl<R: Read + Seek> DiscStream<R> {
    pub fn new(reader: DiscReader<R>) -> Self {
        Self { reader, pos: 0 }
    }

    pub fn tell(&self) -> u64 { self.pos }

    pub fn size(&self) -> u64 { self.reader.size() }

    pub fn reader(&self) -> &DiscReader<R> { &self.reader }

    pub fn reader_mut(&mut self) -> &mut DiscReader<R> { &mut self.reader }

    /// Positional read that leaves the cursor alone.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> usize {
        self.reader.read_at(offset, buf)
    }

    /// Release the container file.
    pub fn close(self) -> R { self.reader.into_inner() }
}

impl<R: Read + Seek> Read for DiscStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read_at(self.pos, buf);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for DiscStream<R> {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let size = self.reader.size();
        let target = match from {
            SeekFrom::Start(p)   => Some(p),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d)     => size.checked_add_signed(d),
        };
        match target {
            Some(p) if p <= size => {
                self.pos = p;
                Ok(p)
            }
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "seek outside the disc image")),
        }
    }
}
