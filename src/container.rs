//! High-level [`Container`] API: the primary embedding surface.
//!
//! ```no_run
//! use std::io::{Read, Seek, SeekFrom};
//! use rvzstream::container::{Container, OpenOptions};
//!
//! let mut disc = Container::open("game.rvz")?;
//! let mut id = [0u8; 6];
//! disc.read_exact(&mut id)?;
//!
//! // Plaintext partitions with zeroed hash headers.
//! let mut plain = Container::open_with("game.rvz", &OpenOptions::default().emulate_encryption(false))?;
//! plain.seek(SeekFrom::Start(0x5_0000))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::header::{DiscKind, FormatError};
use crate::io_stream::{DiscReader, DiscStream};
use crate::meta::ContainerMeta;

const WII_MAGIC_OFFSET: usize = 0x18;
const GC_MAGIC_OFFSET:  usize = 0x1C;
const WII_MAGIC: [u8; 4] = [0x5D, 0x1C, 0x9E, 0xA3];
const GC_MAGIC:  [u8; 4] = [0xC2, 0x33, 0x9F, 0x3D];

// ── OpenOptions ──────────────────────────────────────────────────────────────

/// Configuration for [`Container::open_with`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Check the SHA-1 of both headers and of the partition table.
    pub verify_hashes:      bool,
    /// Rebuild hash trees and re-encrypt Wii partitions.  When off,
    /// partition sectors read as plaintext with zeroed hash headers.
    pub emulate_encryption: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self { verify_hashes: true, emulate_encryption: true }
    }
}

impl OpenOptions {
    pub fn verify_hashes(mut self, on: bool) -> Self {
        self.verify_hashes = on;
        self
    }

    pub fn emulate_encryption(mut self, on: bool) -> Self {
        self.emulate_encryption = on;
        self
    }
}

// ── ConsoleKind ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConsoleKind {
    Wii,
    GameCube,
    Unknown,
}

impl ConsoleKind {
    /// Classify a disc by the magic words in its first 0x20 bytes.
    pub fn from_disc_header(head: &[u8]) -> Self {
        let word = |at: usize| head.get(at..at + 4);
        if word(WII_MAGIC_OFFSET) == Some(&WII_MAGIC[..]) {
            ConsoleKind::Wii
        } else if word(GC_MAGIC_OFFSET) == Some(&GC_MAGIC[..]) {
            ConsoleKind::GameCube
        } else {
            ConsoleKind::Unknown
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ConsoleKind::Wii      => "Wii",
            ConsoleKind::GameCube => "GameCube",
            ConsoleKind::Unknown  => "unknown",
        }
    }
}

/// Open `path` just long enough to read the console magic words of the
/// image it contains.
pub fn sniff_kind<P: AsRef<Path>>(path: P) -> Result<ConsoleKind, FormatError> {
    let mut container = Container::open_with(path, &OpenOptions::default().emulate_encryption(false))?;
    let mut head = [0u8; 0x20];
    let n = container.read_at(0, &mut head);
    Ok(ConsoleKind::from_disc_header(&head[..n]))
}

// ── ContainerInfo ────────────────────────────────────────────────────────────

/// Summary of an open container, as printed by `rvz info`.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    pub format:            &'static str,
    pub version:           String,
    pub disc_kind:         &'static str,
    pub compression:       &'static str,
    pub compression_level: i32,
    pub chunk_size:        u32,
    pub iso_size:          u64,
    pub file_size:         u64,
    pub partitions:        usize,
    pub raw_entries:       usize,
    pub groups:            usize,
    pub encrypted:         bool,
}

impl From<&ContainerMeta> for ContainerInfo {
    fn from(meta: &ContainerMeta) -> Self {
        let v = meta.header.version.to_be_bytes();
        ContainerInfo {
            format:            meta.header.variant.name(),
            version:           format!("{}.{:02}.{:02}.{:02}", v[0], v[1], v[2], v[3]),
            disc_kind:         match meta.disc.disc_kind {
                DiscKind::GameCube => "GameCube",
                DiscKind::Wii      => "Wii",
            },
            compression:       meta.disc.compression.name(),
            compression_level: meta.disc.compression_level,
            chunk_size:        meta.disc.chunk_size,
            iso_size:          meta.header.iso_file_size,
            file_size:         meta.header.wia_file_size,
            partitions:        meta.partitions.len(),
            raw_entries:       meta.raw_data.len(),
            groups:            meta.groups.len(),
            encrypted:         meta.disc.disc_kind == DiscKind::Wii && meta.disc.partitions_encrypted(),
        }
    }
}

// ── Container ────────────────────────────────────────────────────────────────

/// An open WIA/RVZ file presented as its original disc image.
pub struct Container<R: Read + Seek = BufReader<File>> {
    path:   Option<PathBuf>,
    stream: DiscStream<R>,
}

impl Container {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        Self::open_with(path, &OpenOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, opts: &OpenOptions) -> Result<Self, FormatError> {
        let path = path.as_ref().to_owned();
        let file = BufReader::new(File::open(&path)?);
        let mut container = Container::from_reader(file, opts)?;
        container.path = Some(path);
        Ok(container)
    }
}

impl<R: Read + Seek> Container<R> {
    /// Open a container from any seekable source.  Any parse failure aborts
    /// the open; nothing is kept.
    pub fn from_reader(mut reader: R, opts: &OpenOptions) -> Result<Self, FormatError> {
        let meta = ContainerMeta::read(&mut reader, opts.verify_hashes)?;
        info!(
            format = meta.header.variant.name(),
            iso_size = meta.iso_size(),
            partitions = meta.partitions.len(),
            groups = meta.groups.len(),
            "opened container"
        );
        let reader = DiscReader::new(reader, meta, opts.emulate_encryption)?;
        Ok(Self { path: None, stream: DiscStream::new(reader) })
    }

    pub fn path(&self) -> Option<&Path> { self.path.as_deref() }

    pub fn info(&self) -> ContainerInfo { ContainerInfo::from(self.stream.reader().meta()) }

    pub fn console_kind(&mut self) -> ConsoleKind {
        let mut head = [0u8; 0x20];
        let n = self.stream.read_at(0, &mut head);
        ConsoleKind::from_disc_header(&head[..n])
    }

    /// Size of the reconstructed image.
    pub fn size(&self) -> u64 { self.stream.size() }

    pub fn tell(&self) -> u64 { self.stream.tell() }

    /// Positional read; the cursor is not moved.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> usize {
        self.stream.read_at(offset, buf)
    }

    pub fn reader_mut(&mut self) -> &mut DiscReader<R> { self.stream.reader_mut() }

    /// Release the underlying file.
    pub fn close(self) -> R { self.stream.close() }
}

impl<R: Read + Seek> Read for Container<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.stream.read(buf) }
}

impl<R: Read + Seek> Seek for Container<R> {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> { self.stream.seek(from) }
}
