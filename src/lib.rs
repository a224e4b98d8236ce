pub mod header;
pub mod codec;
pub mod index;
pub mod meta;
pub mod lfg;
pub mod block;
pub mod chunk;
pub mod cache;
pub mod geometry;
pub mod crypto;
pub mod io_stream;
pub mod container;

pub use header::{DiscKind, FileHeader, DiscInfo, FormatError, Variant};
pub use codec::{CompressionKind, get_codec};
pub use chunk::DecodeError;
pub use io_stream::{DiscReader, DiscStream};
pub use container::{Container, ContainerInfo, ConsoleKind, OpenOptions, sniff_kind};
