use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use ndstore::{version, ChunkCache, Database, Nd, NdConfig, NdVersions, PoolTag};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_path(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("ndstore-builder-{prefix}-{pid}-{t}-{id}.db"))
}

#[test]
fn config_from_env_overrides_defaults() {
    std::env::set_var("ND_CANCEL_CHECK_MS", "0");
    std::env::set_var("ND_DATA_FSYNC", "on");
    std::env::set_var("ND_FLUSH_ON_RELEASE", "no");
    let cfg = NdConfig::from_env();
    std::env::remove_var("ND_CANCEL_CHECK_MS");
    std::env::remove_var("ND_DATA_FSYNC");
    std::env::remove_var("ND_FLUSH_ON_RELEASE");

    assert_eq!(cfg.cancel_check_ms, 1);
    assert!(cfg.data_fsync);
    assert!(!cfg.flush_on_release);
    assert!(cfg.to_string().contains("flush_on_release: false"));
}

#[test]
fn builder_without_flush_on_release_leaves_the_file_untouched() -> Result<()> {
    let path = unique_path("no-flush");
    let cfg = NdConfig::default()
        .with_flush_on_release(false)
        .with_data_fsync(true);
    let nd = Nd::builder(&path)
        .config(cfg)
        .cache(Arc::new(ChunkCache::new(1 << 20)))
        .open()?;

    let len_before = fs::metadata(&path)?.len();
    let w = nd.write(None)?;
    let r = w.db().malloc(64, PoolTag::MISC)?;
    w.db().put_int(r, 5)?;
    w.finish()?;
    assert_eq!(nd.write_number(), 1);
    assert_eq!(fs::metadata(&path)?.len(), len_before);

    // an explicit flush writes it out; an explicit release with flush too
    nd.db().flush()?;
    assert!(fs::metadata(&path)?.len() > len_before);
    nd.acquire_write_lock(0, None)?;
    nd.release_write_lock_with(0, true)?;
    drop(nd);

    let db = Database::open(&path, Arc::new(ChunkCache::new(1 << 20)), 0, true)?;
    assert_eq!(db.write_number(), 2);
    assert_eq!(db.get_int(r)?, 5);
    drop(db);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn builder_writes_the_current_version() -> Result<()> {
    let path = unique_path("version");
    let versions = NdVersions::new(version(3, 0), version(3, 9), version(3, 2));
    {
        let nd = Nd::builder(&path)
            .versions(versions)
            .cache(Arc::new(ChunkCache::new(1 << 20)))
            .config(NdConfig::default().with_debug_locks(true))
            .open()?;
        assert_eq!(nd.db().version(), version(3, 2));
        assert_eq!(nd.versions(), versions);
        assert!(nd.config().debug_locks);
        nd.write(None)?.finish()?;
    }
    let nd = Nd::open(&path, Default::default(), versions)?;
    assert_eq!(ndstore::version_string(nd.db().version()), "3.2");
    assert_eq!(nd.write_number(), 1);
    nd.close()?;
    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}
