// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Transport compression selection and the zstd codec-level registry.
//!
//! [`CompressionMethod`] abstracts tonic's transport compression the same way
//! the exporter and receiver configs expect it. The [`zstd_registry`] module
//! holds the process-wide table of zstd contexts keyed by compression level
//! (`zstdarrow1`..`zstdarrow10`), each level backed by an MRU free-list.

use serde::{Deserialize, Serialize};
use tonic::codec::CompressionEncoding;

/// Enum to represent various compression methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMethod {
    /// Fastest compression.
    Zstd,
    /// Most compatible compression method.
    Gzip,
    /// Used for legacy systems.
    Deflate,
}

impl CompressionMethod {
    /// Map the compression method to the proper tonic compression encoding
    /// equivalent.
    #[must_use]
    pub const fn map_to_compression_encoding(&self) -> CompressionEncoding {
        match *self {
            CompressionMethod::Gzip => CompressionEncoding::Gzip,
            CompressionMethod::Zstd => CompressionEncoding::Zstd,
            CompressionMethod::Deflate => CompressionEncoding::Deflate,
        }
    }
}

/// Process-wide zstd encoder/decoder pools, one per compression level.
///
/// The gRPC compressor names are `zstdarrow<level>`; both ends of a stream
/// must agree on the level out of band (it is part of the registered codec
/// name, not negotiated per message). Contexts are pooled because creating a
/// zstd context is far more expensive than resetting one.
pub mod zstd_registry {
    use parking_lot::Mutex;
    use std::io;
    use std::sync::OnceLock;
    use std::time::{Duration, Instant};
    use zstd::bulk::{Compressor, Decompressor};

    /// Lowest registered compression level.
    pub const MIN_LEVEL: i32 = 1;
    /// Highest registered compression level.
    pub const MAX_LEVEL: i32 = 10;

    /// How long an unused pooled context survives at the bottom of the
    /// free-list before it is evicted.
    pub const DEFAULT_POOL_TTL: Duration = Duration::from_secs(60);

    const ENCODING_NAMES: [&str; 10] = [
        "zstdarrow1",
        "zstdarrow2",
        "zstdarrow3",
        "zstdarrow4",
        "zstdarrow5",
        "zstdarrow6",
        "zstdarrow7",
        "zstdarrow8",
        "zstdarrow9",
        "zstdarrow10",
    ];

    /// Errors surfaced by the registry.
    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        /// The level is outside `[MIN_LEVEL, MAX_LEVEL]`.
        #[error("unsupported zstd compression level {0}")]
        UnsupportedLevel(i32),
        /// The underlying zstd context failed.
        #[error("zstd codec error: {0}")]
        Codec(#[from] io::Error),
    }

    /// Tuning for one compression level, applied live via [`configure`].
    #[derive(Debug, Clone)]
    pub struct LevelSettings {
        /// TTL for idle pooled contexts at this level.
        pub pool_ttl: Duration,
    }

    impl Default for LevelSettings {
        fn default() -> Self {
            Self {
                pool_ttl: DEFAULT_POOL_TTL,
            }
        }
    }

    /// The gRPC encoding name registered for a level.
    #[must_use]
    pub fn encoding_name(level: i32) -> Option<&'static str> {
        if (MIN_LEVEL..=MAX_LEVEL).contains(&level) {
            Some(ENCODING_NAMES[(level - MIN_LEVEL) as usize])
        } else {
            None
        }
    }

    /// The compression level encoded in a `zstdarrow<level>` name.
    #[must_use]
    pub fn level_of(name: &str) -> Option<i32> {
        let idx = ENCODING_NAMES.iter().position(|n| *n == name)?;
        Some(idx as i32 + MIN_LEVEL)
    }

    struct PoolEntry<T> {
        ctx: T,
        returned_at: Instant,
        generation: u64,
    }

    /// MRU free-list: most-recently-returned entries sit at the top of the
    /// stack and are reused first; idle entries age out from the bottom.
    struct MruPool<T> {
        stack: Vec<PoolEntry<T>>,
    }

    impl<T> MruPool<T> {
        const fn new() -> Self {
            Self { stack: Vec::new() }
        }

        fn get(&mut self, generation: u64) -> Option<T> {
            while let Some(entry) = self.stack.pop() {
                if entry.generation == generation {
                    return Some(entry.ctx);
                }
                // Stale generation: the level was reconfigured while this
                // context was checked out or pooled.
            }
            None
        }

        fn put(&mut self, ctx: T, generation: u64, ttl: Duration) {
            let now = Instant::now();
            self.stack.push(PoolEntry {
                ctx,
                returned_at: now,
                generation,
            });
            self.evict(now, ttl);
        }

        fn evict(&mut self, now: Instant, ttl: Duration) {
            let expired = self
                .stack
                .iter()
                .take_while(|e| now.duration_since(e.returned_at) > ttl)
                .count();
            if expired > 0 {
                _ = self.stack.drain(..expired);
            }
        }

        fn len(&self) -> usize {
            self.stack.len()
        }
    }

    struct LevelPool {
        level: i32,
        generation: u64,
        settings: LevelSettings,
        encoders: MruPool<Compressor<'static>>,
        decoders: MruPool<Decompressor<'static>>,
    }

    impl LevelPool {
        fn new(level: i32) -> Self {
            Self {
                level,
                generation: 0,
                settings: LevelSettings::default(),
                encoders: MruPool::new(),
                decoders: MruPool::new(),
            }
        }
    }

    struct Registry {
        levels: [Mutex<LevelPool>; (MAX_LEVEL - MIN_LEVEL + 1) as usize],
    }

    fn registry() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(|| Registry {
            levels: std::array::from_fn(|i| Mutex::new(LevelPool::new(i as i32 + MIN_LEVEL))),
        })
    }

    fn level_pool(level: i32) -> Result<&'static Mutex<LevelPool>, Error> {
        if !(MIN_LEVEL..=MAX_LEVEL).contains(&level) {
            return Err(Error::UnsupportedLevel(level));
        }
        Ok(&registry().levels[(level - MIN_LEVEL) as usize])
    }

    /// Reconfigure one level. Contexts checked out or pooled under the old
    /// configuration are dropped on return instead of being pooled again.
    pub fn configure(level: i32, settings: LevelSettings) -> Result<(), Error> {
        let mut pool = level_pool(level)?.lock();
        pool.generation += 1;
        pool.settings = settings;
        Ok(())
    }

    /// Compress `data` with a pooled encoder for `level`.
    pub fn compress(level: i32, data: &[u8]) -> Result<Vec<u8>, Error> {
        let (mut ctx, generation) = {
            let mut pool = level_pool(level)?.lock();
            let generation = pool.generation;
            match pool.encoders.get(generation) {
                Some(ctx) => (ctx, generation),
                None => (Compressor::new(pool.level)?, generation),
            }
        };
        let out = ctx.compress(data)?;
        {
            let mut pool = level_pool(level)?.lock();
            if pool.generation == generation {
                let ttl = pool.settings.pool_ttl;
                pool.encoders.put(ctx, generation, ttl);
            }
        }
        Ok(out)
    }

    /// Decompress `data` with a pooled decoder for `level`. `capacity` bounds
    /// the decompressed size, protecting against decompression bombs.
    pub fn decompress(level: i32, data: &[u8], capacity: usize) -> Result<Vec<u8>, Error> {
        let (mut ctx, generation) = {
            let mut pool = level_pool(level)?.lock();
            let generation = pool.generation;
            match pool.decoders.get(generation) {
                Some(ctx) => (ctx, generation),
                None => (Decompressor::new()?, generation),
            }
        };
        let out = ctx.decompress(data, capacity)?;
        {
            let mut pool = level_pool(level)?.lock();
            if pool.generation == generation {
                let ttl = pool.settings.pool_ttl;
                pool.decoders.put(ctx, generation, ttl);
            }
        }
        Ok(out)
    }

    /// Number of pooled encoder contexts for `level`, for tests and gauges.
    pub fn pooled_encoders(level: i32) -> Result<usize, Error> {
        Ok(level_pool(level)?.lock().encoders.len())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn encoding_names_cover_all_levels() {
            for level in MIN_LEVEL..=MAX_LEVEL {
                let name = encoding_name(level).expect("name for registered level");
                assert_eq!(name, format!("zstdarrow{level}"));
                assert_eq!(level_of(name), Some(level));
            }
            assert!(encoding_name(0).is_none());
            assert!(encoding_name(11).is_none());
            assert_eq!(level_of("zstd"), None);
        }

        #[test]
        fn roundtrip_and_pooling() {
            let input = b"a compressible body a compressible body a compressible body";
            let compressed = compress(3, input).expect("compress");
            let restored = decompress(3, &compressed, input.len() * 4).expect("decompress");
            assert_eq!(restored, input);
            assert!(pooled_encoders(3).expect("count") >= 1);

            // The same context is reused: pool size stays flat across calls.
            let before = pooled_encoders(3).expect("count");
            _ = compress(3, input).expect("compress again");
            assert_eq!(pooled_encoders(3).expect("count"), before);
        }

        #[test]
        fn mru_pool_reuses_most_recently_returned() {
            let mut pool: MruPool<u32> = MruPool::new();
            pool.put(1, 0, Duration::from_secs(60));
            pool.put(2, 0, Duration::from_secs(60));
            assert_eq!(pool.get(0), Some(2));
            assert_eq!(pool.get(0), Some(1));
            assert_eq!(pool.get(0), None);
        }

        #[test]
        fn stale_generation_is_dropped() {
            let mut pool: MruPool<u32> = MruPool::new();
            pool.put(7, 0, Duration::from_secs(60));
            // Generation bumped between return and reuse.
            assert_eq!(pool.get(1), None);
            assert_eq!(pool.len(), 0);
        }

        #[test]
        fn ttl_evicts_from_the_bottom() {
            let mut pool: MruPool<u32> = MruPool::new();
            pool.put(1, 0, Duration::ZERO);
            std::thread::sleep(Duration::from_millis(5));
            // The next put evicts the expired bottom entry but keeps itself.
            pool.put(2, 0, Duration::ZERO);
            assert_eq!(pool.len(), 1);
            assert_eq!(pool.get(0), Some(2));
        }

        #[test]
        fn unsupported_level_is_rejected() {
            assert!(matches!(
                compress(42, b"x"),
                Err(Error::UnsupportedLevel(42))
            ));
        }

        #[test]
        fn compression_method_accepts_snake_case_only() {
            use super::super::CompressionMethod;
            let zstd: CompressionMethod = serde_json::from_str("\"zstd\"").expect("zstd");
            assert!(matches!(zstd, CompressionMethod::Zstd));
            assert!(serde_json::from_str::<CompressionMethod>("\"Gzip\"").is_err());
        }
    }
}
