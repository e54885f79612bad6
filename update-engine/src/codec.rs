//! Block compression of build files.
//!
//! Files stored compressed on a mirror are decompressed by the verifier
//! before hashing. The codec is pluggable; [`ZstdCodec`] is the default.

use std::io;
use std::path::Path;

/// A whole-buffer compressor/decompressor.
pub trait Codec: Send + Sync {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>>;
}

/// zstd codec.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(zstd::DEFAULT_COMPRESSION_LEVEL)
    }
}

impl Codec for ZstdCodec {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        zstd::stream::encode_all(data, self.level)
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        zstd::stream::decode_all(data)
    }
}

/// Decompress `source` into `destination`, replacing it.
pub fn decompress_file(codec: &dyn Codec, source: &Path, destination: &Path) -> io::Result<()> {
    let compressed = std::fs::read(source)?;
    let data = codec.decompress(&compressed)?;
    std::fs::write(destination, data)
}
