//! A database plus its lifecycle: locking, node types, deferred
//! deletion, write generation and the result cache.
//!
//! Submodules:
//! - lock.rs    : reader/writer lock, cancellation, guards
//! - observer.rs: lock tracing hooks
//! - registry.rs: node type codes and their factories

pub mod lock;
pub mod observer;
pub mod registry;

use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use crate::config::{version_string, NdBuilder, NdConfig, NdVersions};
use crate::consts::{NODE_HEADER_SIZE, NODE_TYPE_OFFSET};
use crate::db::{ChunkCache, Database, PoolTag};
use crate::error::{IoContext, NdError, Result};
use crate::metrics::{
    record_deletion_duplicate, record_deletion_processed, record_deletion_skipped,
};

use self::lock::NdLock;
use self::observer::{LockObserver, NoopLockObserver};
use self::registry::{NodeRef, NodeTypeRegistry, TypeFactory};

pub type CachedResult = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct PendingDeletions {
    queue: VecDeque<u64>,
    origins: HashMap<u64, Backtrace>,
}

pub struct Nd {
    path: PathBuf,
    db: Database,
    registry: NodeTypeRegistry,
    versions: NdVersions,
    pub(crate) cfg: NdConfig,
    pub(crate) read_only: bool,
    pub(crate) lock: NdLock,
    pub(crate) observer: Arc<dyn LockObserver>,
    pending: Mutex<PendingDeletions>,
    result_cache: Mutex<HashMap<String, CachedResult>>,
}

impl Nd {
    /// Open with the shared cache and configuration from the environment.
    pub fn open(path: impl AsRef<Path>, registry: NodeTypeRegistry, versions: NdVersions) -> Result<Nd> {
        NdBuilder::new(path)
            .registry(registry)
            .versions(versions)
            .open()
    }

    pub fn builder(path: impl AsRef<Path>) -> NdBuilder {
        NdBuilder::new(path)
    }

    pub(crate) fn open_with(
        path: &Path,
        cache: Arc<ChunkCache>,
        registry: NodeTypeRegistry,
        versions: NdVersions,
        cfg: NdConfig,
        observer: Option<Arc<dyn LockObserver>>,
        read_only: bool,
    ) -> Result<Nd> {
        let mut db = Database::open_with_config(path, cache.clone(), versions.current, read_only, &cfg)?;

        if !versions.is_supported(db.version()) {
            let found = db.version();
            if read_only {
                return Err(NdError::UnsupportedVersion {
                    found: version_string(found),
                    min: version_string(versions.min),
                    max: version_string(versions.max),
                });
            }
            warn!(
                "database {} uses unsupported version {}, deleting and recreating",
                path.display(),
                version_string(found)
            );
            db.close()?;
            drop(db);
            std::fs::remove_file(path).io_context(|| format!("remove {}", path.display()))?;
            db = Database::open_with_config(path, cache, versions.current, read_only, &cfg)?;
        }

        info!(
            "nd {} ready (version {}, write number {})",
            path.display(),
            version_string(db.version()),
            db.write_number()
        );
        Ok(Nd {
            path: path.to_path_buf(),
            db,
            registry,
            versions,
            cfg,
            read_only,
            lock: NdLock::default(),
            observer: observer.unwrap_or_else(|| Arc::new(NoopLockObserver)),
            pending: Mutex::new(PendingDeletions::default()),
            result_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    pub fn versions(&self) -> NdVersions {
        self.versions
    }

    pub fn config(&self) -> &NdConfig {
        &self.cfg
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of completed write transactions, persisted in the header.
    pub fn write_number(&self) -> i64 {
        self.db.write_number()
    }

    pub fn close(&self) -> Result<()> {
        self.clear_result_cache();
        self.db.close()
    }

    // ----- nodes -----

    /// Allocate a zeroed node of type `code` and stamp its type.
    pub fn create_node(&self, code: u16) -> Result<NodeRef> {
        let size = self.registry.factory(code)?.record_size().max(NODE_HEADER_SIZE);
        let address = self.db.malloc(size, PoolTag::node(code))?;
        self.db.put_char(address + NODE_TYPE_OFFSET, code)?;
        self.registry.create_node(address, code)
    }

    /// Handle for the node at `address`, typed from its stored code.
    pub fn node(&self, address: u64) -> Result<NodeRef> {
        let code = self.node_type(address)?;
        self.registry.create_node(address, code)
    }

    pub fn node_type(&self, address: u64) -> Result<u16> {
        self.db.get_char(address + NODE_TYPE_OFFSET)
    }

    pub fn type_factory(&self, code: u16) -> Result<&Arc<dyn TypeFactory>> {
        self.registry.factory(code)
    }

    // ----- deletion -----

    /// Queue a node for destruction at the end of the write transaction.
    /// Returns `false` (and logs both origins) if it is already queued.
    pub fn schedule_deletion(&self, address: u64) -> bool {
        self.assert_write_locked();
        let mut p = self.pending.lock();
        if let Some(first) = p.origins.get(&address) {
            warn!(
                "node {} queued for deletion twice\nfirst queued at:\n{}\nqueued again at:\n{}",
                address,
                first,
                Backtrace::capture()
            );
            record_deletion_duplicate();
            return false;
        }
        p.origins.insert(address, Backtrace::capture());
        p.queue.push_back(address);
        true
    }

    pub fn pending_deletions(&self) -> usize {
        self.pending.lock().queue.len()
    }

    pub fn is_scheduled_for_deletion(&self, address: u64) -> bool {
        self.pending.lock().origins.contains_key(&address)
    }

    /// Destroy queued nodes, oldest first, until the queue is empty.
    /// Destructors may queue more nodes.
    pub fn process_deletions(&self) -> Result<()> {
        loop {
            let next = self.pending.lock().queue.front().copied();
            let Some(address) = next else {
                return Ok(());
            };
            let res = self.delete_if_unreferenced(address);
            {
                let mut p = self.pending.lock();
                p.queue.pop_front();
                p.origins.remove(&address);
            }
            res?;
        }
    }

    fn delete_if_unreferenced(&self, address: u64) -> Result<()> {
        if address == 0 {
            return Ok(());
        }
        let code = self.node_type(address)?;
        let factory = self.registry.factory(code)?.clone();
        if factory.is_ready_for_deletion(self, address)? {
            factory.destruct(self, address)?;
            self.db.free(address, PoolTag::node(code))?;
            record_deletion_processed();
        } else {
            record_deletion_skipped();
        }
        Ok(())
    }

    /// Destroy a node right away, whatever still points at it. A pending
    /// deletion of the same address is dropped, so the sweep cannot hit a
    /// record reallocated in the meantime.
    pub fn delete(&self, address: u64) -> Result<()> {
        if address == 0 {
            return Ok(());
        }
        {
            let mut p = self.pending.lock();
            if p.origins.remove(&address).is_some() {
                p.queue.retain(|&a| a != address);
            }
        }
        let code = self.node_type(address)?;
        let factory = self.registry.factory(code)?.clone();
        factory.destruct(self, address)?;
        self.db.free(address, PoolTag::node(code))
    }

    // ----- result cache -----

    pub fn get_cached_result(&self, key: &str) -> Option<CachedResult> {
        self.result_cache.lock().get(key).cloned()
    }

    pub fn get_cached_result_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get_cached_result(key)
            .and_then(|v| v.downcast::<T>().ok())
    }

    /// Store `value` under `key`. Without `replace`, an existing entry wins
    /// and is returned.
    pub fn put_cached_result(&self, key: impl Into<String>, value: CachedResult, replace: bool) -> CachedResult {
        let mut cache = self.result_cache.lock();
        let key = key.into();
        if !replace {
            if let Some(old) = cache.get(&key) {
                return old.clone();
            }
        }
        cache.insert(key, value.clone());
        value
    }

    pub fn remove_cached_result(&self, key: &str) {
        self.result_cache.lock().remove(key);
    }

    pub fn clear_result_cache(&self) {
        self.result_cache.lock().clear();
    }

    pub fn cached_result_count(&self) -> usize {
        self.result_cache.lock().len()
    }
}

impl std::fmt::Debug for Nd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nd")
            .field("path", &self.path)
            .field("versions", &self.versions)
            .field("read_only", &self.read_only)
            .field("lock_count", &self.lock_count())
            .finish()
    }
}
