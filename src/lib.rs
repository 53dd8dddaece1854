// Layout, errors, configuration
pub mod consts;
pub mod error;
pub mod config;
pub mod metrics;

// Storage: file, chunk cache, allocator
pub mod db;     // src/db/{mod,file,chunk,cache,core,header,alloc,doctor}.rs

// Records built on the allocator
pub mod string; // src/string/{mod,compare,short,long}.rs
pub mod btree;  // src/btree/mod.rs
pub mod field;

// Locking, node types, deferred deletion
pub mod nd;     // src/nd/{mod,lock,observer,registry}.rs

pub use btree::{BTree, BTreeComparator, BTreeVisitor};
pub use config::{version, version_string, NdBuilder, NdConfig, NdVersions};
pub use db::{ChunkCache, Database, DoctorReport, PoolTag};
pub use error::{NdError, Result};
pub use field::StructLayout;
pub use metrics::{metrics_snapshot, MetricsSnapshot};
pub use nd::lock::{CancelFlag, CancelSignal, ReadGuard, WriteGuard};
pub use nd::observer::{LockObserver, LoggingLockObserver, TrackingLockObserver};
pub use nd::registry::{NodeRef, NodeTypeRegistry, TypeFactory};
pub use nd::Nd;
pub use string::DbString;
