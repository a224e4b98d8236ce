//! Compression registry.
//!
//! Header2 names one algorithm for the whole container.  The tag values are
//! fixed by the format; only [`CompressionKind::None`] and
//! [`CompressionKind::Zstd`] are decodable by this build.  Every other tag is
//! rejected at open time, there is no fallback.

use std::io::{self, Read};
use thiserror::Error;
use tracing::debug;

/// Read size while inflating into a bounded buffer.
const INFLATE_STEP: usize = 0x8000;

// ── CompressionKind ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    None,
    /// WIA only.
    Purge,
    Bzip2,
    Lzma,
    Lzma2,
    /// RVZ only.
    Zstd,
}

impl TryFrom<u32> for CompressionKind {
    type Error = CodecError;

    fn try_from(tag: u32) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(CompressionKind::None),
            1 => Ok(CompressionKind::Purge),
            2 => Ok(CompressionKind::Bzip2),
            3 => Ok(CompressionKind::Lzma),
            4 => Ok(CompressionKind::Lzma2),
            5 => Ok(CompressionKind::Zstd),
            t => Err(CodecError::UnsupportedCompression(t)),
        }
    }
}

impl From<CompressionKind> for u32 {
    fn from(kind: CompressionKind) -> u32 {
        match kind {
            CompressionKind::None  => 0,
            CompressionKind::Purge => 1,
            CompressionKind::Bzip2 => 2,
            CompressionKind::Lzma  => 3,
            CompressionKind::Lzma2 => 4,
            CompressionKind::Zstd  => 5,
        }
    }
}

impl CompressionKind {
    /// Human-readable name (diagnostics only).
    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::None  => "none",
            CompressionKind::Purge => "purge",
            CompressionKind::Bzip2 => "bzip2",
            CompressionKind::Lzma  => "lzma",
            CompressionKind::Lzma2 => "lzma2",
            CompressionKind::Zstd  => "zstd",
        }
    }

    #[inline]
    pub fn is_supported(self) -> bool {
        matches!(self, CompressionKind::None | CompressionKind::Zstd)
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Unsupported compression type: {0}")]
    UnsupportedCompression(u32),
    #[error("Decompressed data exceeds {0} bytes")]
    LimitExceeded(usize),
    #[error("Allocation of {0} bytes failed")]
    Allocation(usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

/// Whole-buffer decompressor.
///
/// `max_len` is a hard ceiling on the output.  Fewer bytes may come back;
/// callers pad as they need.  Output that would grow past `max_len` is an
/// error, never a truncation.
pub trait Codec: Send + Sync {
    fn kind(&self) -> CompressionKind;
    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::None }
    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>, CodecError> {
        if data.len() > max_len {
            return Err(CodecError::LimitExceeded(max_len));
        }
        let mut out = Vec::new();
        out.try_reserve_exact(data.len()).map_err(|_| CodecError::Allocation(data.len()))?;
        out.extend_from_slice(data);
        Ok(out)
    }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn kind(&self) -> CompressionKind { CompressionKind::Zstd }
    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>, CodecError> {
        let decoder = zstd::stream::read::Decoder::with_buffer(data)?;
        let out = inflate_bounded(decoder, max_len)?;
        if out.len() != max_len {
            debug!(limit = max_len, actual = out.len(), "zstd output shorter than limit");
        }
        Ok(out)
    }
}

/// Drain `src` into a buffer of at most `max_len` bytes.  Growth is
/// fallible so a hostile stream surfaces as an error instead of an abort.
fn inflate_bounded<R: Read>(mut src: R, max_len: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    let mut step = [0u8; INFLATE_STEP];
    loop {
        let n = match src.read(&mut step) {
            Ok(0) => return Ok(out),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CodecError::Decompression(e.to_string())),
        };
        let len = out.len() + n;
        if len > max_len {
            return Err(CodecError::LimitExceeded(max_len));
        }
        out.try_reserve(n).map_err(|_| CodecError::Allocation(len))?;
        out.extend_from_slice(&step[..n]);
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a compression kind to a built-in codec.
pub fn get_codec(kind: CompressionKind) -> Result<Box<dyn Codec>, CodecError> {
    match kind {
        CompressionKind::None => Ok(Box::new(NoneCodec)),
        CompressionKind::Zstd => Ok(Box::new(ZstdCodec)),
        other                 => Err(CodecError::UnsupportedCompression(other.into())),
    }
}
