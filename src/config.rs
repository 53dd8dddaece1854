//! Centralized configuration and builder for ndstore.
//!
//! - `NdConfig` collects the tunables instead of scattering env lookups.
//! - `NdConfig::from_env()` reads the `ND_*` variables.
//! - `NdVersions` describes the on-disk format range an `Nd` accepts.
//! - `NdBuilder` assembles everything an `Nd` needs and opens it.
//!
//! Defaults:
//! - chunk_cache_bytes = 64 MiB (sizes the process-wide shared cache)
//! - data_fsync = false (flush writes chunks, fsync is opt-in)
//! - flush_on_release = true (release of the write lock flushes dirty chunks)

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::consts::{CANCELLATION_CHECK_INTERVAL_MS, DEFAULT_CHUNK_CACHE_BYTES};
use crate::db::ChunkCache;
use crate::error::Result;
use crate::nd::observer::{LockObserver, LoggingLockObserver};
use crate::nd::registry::NodeTypeRegistry;
use crate::nd::Nd;

/// Top-level configuration of a database instance.
#[derive(Clone, Debug)]
pub struct NdConfig {
    /// Capacity of the shared chunk cache, in bytes. Read once, by the
    /// first database that uses the shared cache.
    /// Env: ND_CHUNK_CACHE_BYTES (default 64 MiB)
    pub chunk_cache_bytes: usize,

    /// fsync the backing file after flushing dirty chunks.
    /// Env: ND_DATA_FSYNC (default false; "1|true|on|yes" => true)
    pub data_fsync: bool,

    /// How often a blocked lock acquisition re-checks its cancellation signal.
    /// Env: ND_CANCEL_CHECK_MS (default 500)
    pub cancel_check_ms: u64,

    /// Install a `LoggingLockObserver` when no observer is given explicitly.
    /// Env: ND_DEBUG_LOCKS (default false)
    pub debug_locks: bool,

    /// Flush dirty chunks when the write lock is released.
    /// Env: ND_FLUSH_ON_RELEASE (default true)
    pub flush_on_release: bool,
}

impl Default for NdConfig {
    fn default() -> Self {
        Self {
            chunk_cache_bytes: DEFAULT_CHUNK_CACHE_BYTES,
            data_fsync: false,
            cancel_check_ms: CANCELLATION_CHECK_INTERVAL_MS,
            debug_locks: false,
            flush_on_release: true,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        let s = v.trim().to_ascii_lowercase();
        s == "1" || s == "true" || s == "on" || s == "yes"
    })
}

fn env_num<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl NdConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(n) = env_num::<usize>("ND_CHUNK_CACHE_BYTES") {
            cfg.chunk_cache_bytes = n;
        }
        if let Some(on) = env_flag("ND_DATA_FSYNC") {
            cfg.data_fsync = on;
        }
        if let Some(ms) = env_num::<u64>("ND_CANCEL_CHECK_MS") {
            // zero would turn the cancellation wait into a spin
            cfg.cancel_check_ms = ms.max(1);
        }
        if let Some(on) = env_flag("ND_DEBUG_LOCKS") {
            cfg.debug_locks = on;
        }
        if let Some(on) = env_flag("ND_FLUSH_ON_RELEASE") {
            cfg.flush_on_release = on;
        }

        cfg
    }

    pub fn with_chunk_cache_bytes(mut self, bytes: usize) -> Self {
        self.chunk_cache_bytes = bytes;
        self
    }

    pub fn with_data_fsync(mut self, on: bool) -> Self {
        self.data_fsync = on;
        self
    }

    pub fn with_cancel_check_ms(mut self, ms: u64) -> Self {
        self.cancel_check_ms = ms.max(1);
        self
    }

    pub fn with_debug_locks(mut self, on: bool) -> Self {
        self.debug_locks = on;
        self
    }

    pub fn with_flush_on_release(mut self, on: bool) -> Self {
        self.flush_on_release = on;
        self
    }
}

impl fmt::Display for NdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NdConfig {{ \
             chunk_cache_bytes: {}, \
             data_fsync: {}, \
             cancel_check_ms: {}, \
             debug_locks: {}, \
             flush_on_release: {} \
             }}",
            self.chunk_cache_bytes,
            self.data_fsync,
            self.cancel_check_ms,
            self.debug_locks,
            self.flush_on_release,
        )
    }
}

/// Range of format versions a database accepts, plus the one it writes.
///
/// Versions pack `major << 16 | minor`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NdVersions {
    pub min: i32,
    pub max: i32,
    pub current: i32,
}

impl NdVersions {
    pub fn new(min: i32, max: i32, current: i32) -> Self {
        Self { min, max, current }
    }

    /// Accept exactly one version.
    pub fn single(version: i32) -> Self {
        Self::new(version, version, version)
    }

    pub fn is_supported(&self, version: i32) -> bool {
        version >= self.min && version <= self.max
    }
}

impl Default for NdVersions {
    fn default() -> Self {
        Self::single(version(1, 0))
    }
}

pub fn version(major: u16, minor: u16) -> i32 {
    ((major as i32) << 16) | minor as i32
}

pub fn version_string(version: i32) -> String {
    let major = (version as u32) >> 16;
    let minor = version & 0xffff;
    format!("{}.{}", major, minor)
}

/// Builder that opens an `Nd`.
///
/// Starts from `NdConfig::from_env()`; everything else is optional.
pub struct NdBuilder {
    path: PathBuf,
    cfg: NdConfig,
    versions: NdVersions,
    registry: NodeTypeRegistry,
    cache: Option<Arc<ChunkCache>>,
    observer: Option<Arc<dyn LockObserver>>,
    read_only: bool,
}

impl NdBuilder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cfg: NdConfig::from_env(),
            versions: NdVersions::default(),
            registry: NodeTypeRegistry::new(),
            cache: None,
            observer: None,
            read_only: false,
        }
    }

    pub fn config(mut self, cfg: NdConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn versions(mut self, versions: NdVersions) -> Self {
        self.versions = versions;
        self
    }

    pub fn registry(mut self, registry: NodeTypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Share an existing chunk cache (e.g. across several databases).
    pub fn cache(mut self, cache: Arc<ChunkCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LockObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn read_only(mut self, on: bool) -> Self {
        self.read_only = on;
        self
    }

    pub fn open(self) -> Result<Nd> {
        let cache = match self.cache {
            Some(c) => c,
            None => ChunkCache::shared(),
        };
        let observer: Option<Arc<dyn LockObserver>> = match self.observer {
            Some(o) => Some(o),
            None if self.cfg.debug_locks => Some(Arc::new(LoggingLockObserver::default())),
            None => None,
        };
        Nd::open_with(
            &self.path,
            cache,
            self.registry,
            self.versions,
            self.cfg,
            observer,
            self.read_only,
        )
    }
}
