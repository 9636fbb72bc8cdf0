//! Compression pools.
//!
//! A pool compresses and decompresses whole buffers for one named encoding.
//! The client uses the same pool for unary bodies and for individual stream
//! envelopes. Built-in pools are feature gated:
//! - [`GzipPool`] (`compression-gzip`)
//! - [`DeflatePool`] (`compression-deflate`)
//! - [`BrotliPool`] (`compression-br`)
//! - [`ZstdPool`] (`compression-zstd`)

use std::sync::Arc;

use bytes::Bytes;

use crate::error::EnvelopeError;

#[cfg(any(
    feature = "compression-gzip",
    feature = "compression-deflate",
    feature = "compression-zstd"
))]
use std::io::{Read, Write};

/// A named compression algorithm.
///
/// # Example
///
/// ```ignore
/// use bytes::Bytes;
/// use connectrpc_client_core::{CompressionPool, EnvelopeError};
///
/// struct Lz4Pool;
///
/// impl CompressionPool for Lz4Pool {
///     fn name(&self) -> &'static str { "lz4" }
///
///     fn compress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
///         // ...
///     }
///
///     fn decompress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
///         // ...
///     }
/// }
/// ```
pub trait CompressionPool: Send + Sync + 'static {
    /// Encoding token used in `content-encoding` style headers.
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError>;

    fn decompress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError>;
}

/// Shared, type-erased pool. `Option<BoxedPool>` with `None` means identity.
#[derive(Clone)]
pub struct BoxedPool(Arc<dyn CompressionPool>);

impl BoxedPool {
    pub fn new<P: CompressionPool>(pool: P) -> Self {
        BoxedPool(Arc::new(pool))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn compress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        self.0.compress(data)
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        self.0.decompress(data)
    }
}

impl std::fmt::Debug for BoxedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoxedPool").field(&self.name()).finish()
    }
}

#[cfg(any(
    feature = "compression-gzip",
    feature = "compression-deflate",
    feature = "compression-zstd"
))]
fn read_all<R: Read>(mut reader: R) -> Result<Bytes, EnvelopeError> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|e| EnvelopeError::Decompression(e.to_string()))?;
    Ok(Bytes::from(out))
}

#[cfg(any(feature = "compression-gzip", feature = "compression-deflate"))]
fn finish_encoder<W, F>(mut encoder: W, data: &[u8], finish: F) -> Result<Bytes, EnvelopeError>
where
    W: Write,
    F: FnOnce(W) -> std::io::Result<Vec<u8>>,
{
    encoder
        .write_all(data)
        .map_err(|e| EnvelopeError::Compression(e.to_string()))?;
    finish(encoder)
        .map(Bytes::from)
        .map_err(|e| EnvelopeError::Compression(e.to_string()))
}

/// Gzip via flate2. Level 0-9, default 6.
#[cfg(feature = "compression-gzip")]
#[derive(Debug, Clone, Copy)]
pub struct GzipPool {
    pub level: u32,
}

#[cfg(feature = "compression-gzip")]
impl Default for GzipPool {
    fn default() -> Self {
        Self { level: 6 }
    }
}

#[cfg(feature = "compression-gzip")]
impl GzipPool {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

#[cfg(feature = "compression-gzip")]
impl CompressionPool for GzipPool {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        let encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        finish_encoder(encoder, data, |e| e.finish())
    }

    fn decompress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        read_all(flate2::read::GzDecoder::new(data))
    }
}

/// HTTP `deflate`, which is the zlib container (RFC 1950), not raw DEFLATE.
#[cfg(feature = "compression-deflate")]
#[derive(Debug, Clone, Copy)]
pub struct DeflatePool {
    pub level: u32,
}

#[cfg(feature = "compression-deflate")]
impl Default for DeflatePool {
    fn default() -> Self {
        Self { level: 6 }
    }
}

#[cfg(feature = "compression-deflate")]
impl DeflatePool {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

#[cfg(feature = "compression-deflate")]
impl CompressionPool for DeflatePool {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        let encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        finish_encoder(encoder, data, |e| e.finish())
    }

    fn decompress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        read_all(flate2::read::ZlibDecoder::new(data))
    }
}

/// Brotli. Quality 0-11, default 4.
#[cfg(feature = "compression-br")]
#[derive(Debug, Clone, Copy)]
pub struct BrotliPool {
    pub quality: u32,
}

#[cfg(feature = "compression-br")]
impl Default for BrotliPool {
    fn default() -> Self {
        Self { quality: 4 }
    }
}

#[cfg(feature = "compression-br")]
impl BrotliPool {
    pub fn with_quality(quality: u32) -> Self {
        Self {
            quality: quality.min(11),
        }
    }
}

#[cfg(feature = "compression-br")]
impl CompressionPool for BrotliPool {
    fn name(&self) -> &'static str {
        "br"
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        let params = brotli::enc::BrotliEncoderParams {
            quality: self.quality as i32,
            ..Default::default()
        };
        let mut out = Vec::new();
        brotli::enc::BrotliCompress(&mut std::io::Cursor::new(data), &mut out, &params)
            .map_err(|e| EnvelopeError::Compression(e.to_string()))?;
        Ok(Bytes::from(out))
    }

    fn decompress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        let mut out = Vec::new();
        brotli::BrotliDecompress(&mut std::io::Cursor::new(data), &mut out)
            .map_err(|e| EnvelopeError::Decompression(e.to_string()))?;
        Ok(Bytes::from(out))
    }
}

/// Zstandard. Level 1-22, default 3.
#[cfg(feature = "compression-zstd")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdPool {
    pub level: i32,
}

#[cfg(feature = "compression-zstd")]
impl Default for ZstdPool {
    fn default() -> Self {
        Self { level: 3 }
    }
}

#[cfg(feature = "compression-zstd")]
impl ZstdPool {
    pub fn with_level(level: i32) -> Self {
        Self {
            level: level.clamp(1, 22),
        }
    }
}

#[cfg(feature = "compression-zstd")]
impl CompressionPool for ZstdPool {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        zstd::bulk::compress(data, self.level)
            .map(Bytes::from)
            .map_err(|e| EnvelopeError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        let decoder =
            zstd::Decoder::new(data).map_err(|e| EnvelopeError::Decompression(e.to_string()))?;
        read_all(decoder)
    }
}
