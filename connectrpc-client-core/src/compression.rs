//! Compression negotiation.
//!
//! - [`CompressionRegistry`]: pools the client can decompress, advertised in
//!   `accept-encoding` style headers and looked up by response encoding
//! - [`RequestCompression`]: the pool and size threshold applied to outbound
//!   payloads

use crate::pool::BoxedPool;

#[cfg(feature = "compression-gzip")]
use crate::pool::GzipPool;

#[cfg(feature = "compression-deflate")]
use crate::pool::DeflatePool;

#[cfg(feature = "compression-br")]
use crate::pool::BrotliPool;

#[cfg(feature = "compression-zstd")]
use crate::pool::ZstdPool;

/// Encoding token meaning "no compression".
pub const IDENTITY: &str = "identity";

/// Ordered set of decompression pools keyed by encoding name.
///
/// Registration order is preserved and is the order advertised to servers.
/// Registering a name twice replaces the earlier pool in place.
#[derive(Debug, Clone, Default)]
pub struct CompressionRegistry {
    pools: Vec<BoxedPool>,
}

impl CompressionRegistry {
    /// An empty registry; nothing is advertised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pool compiled in through `compression-*` features.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "compression-gzip")]
        {
            registry = registry.register(BoxedPool::new(GzipPool::default()));
        }
        #[cfg(feature = "compression-br")]
        {
            registry = registry.register(BoxedPool::new(BrotliPool::default()));
        }
        #[cfg(feature = "compression-zstd")]
        {
            registry = registry.register(BoxedPool::new(ZstdPool::default()));
        }
        #[cfg(feature = "compression-deflate")]
        {
            registry = registry.register(BoxedPool::new(DeflatePool::default()));
        }
        registry
    }

    pub fn register(mut self, pool: BoxedPool) -> Self {
        match self.pools.iter_mut().find(|p| p.name() == pool.name()) {
            Some(existing) => *existing = pool,
            None => self.pools.push(pool),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&BoxedPool> {
        self.pools.iter().find(|p| p.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.pools.iter().map(|p| p.name())
    }

    /// Comma-separated pool names, or `None` when nothing is registered.
    pub fn accept_header_value(&self) -> Option<String> {
        if self.pools.is_empty() {
            return None;
        }
        Some(self.names().collect::<Vec<_>>().join(","))
    }

    /// Resolve a response `content-encoding` value.
    ///
    /// Absent, empty and `identity` resolve to `Ok(None)`. An encoding
    /// that is not registered is returned as `Err` with the offending name.
    pub fn resolve<'a>(&self, encoding: Option<&'a str>) -> Result<Option<BoxedPool>, &'a str> {
        match encoding.map(str::trim) {
            None | Some("") | Some(IDENTITY) => Ok(None),
            Some(name) => self.get(name).cloned().map(Some).ok_or(name),
        }
    }
}

/// Compression applied to outbound request payloads.
///
/// Payloads shorter than `min_bytes` are sent uncompressed.
#[derive(Debug, Clone)]
pub struct RequestCompression {
    pub pool: BoxedPool,
    pub min_bytes: usize,
}

impl RequestCompression {
    pub fn new(pool: BoxedPool, min_bytes: usize) -> Self {
        Self { pool, min_bytes }
    }

    /// Whether a payload of `len` bytes clears the threshold.
    pub fn should_compress(&self, len: usize) -> bool {
        len >= self.min_bytes
    }
}
