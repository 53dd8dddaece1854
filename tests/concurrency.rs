use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use ndstore::{
    CancelFlag, ChunkCache, Nd, NdConfig, NdError, NodeTypeRegistry, PoolTag, TrackingLockObserver,
};

fn open_nd(path: &PathBuf) -> Result<Nd> {
    Ok(Nd::builder(path)
        .config(NdConfig::default().with_cancel_check_ms(10))
        .cache(Arc::new(ChunkCache::new(4 << 20)))
        .registry(NodeTypeRegistry::new())
        .open()?)
}

#[test]
fn readers_do_not_exclude_each_other() -> Result<()> {
    let path = unique_path("readers");
    let nd = open_nd(&path)?;
    let barrier = Barrier::new(3);

    thread::scope(|s| {
        for _ in 0..3 {
            s.spawn(|| {
                let _r = nd.read();
                // every reader must be inside at the same time to pass
                barrier.wait();
            });
        }
    });
    assert_eq!(nd.lock_count(), 0);

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn writer_waits_for_readers_to_leave() -> Result<()> {
    let path = unique_path("writer-waits");
    let nd = open_nd(&path)?;
    let acquired = AtomicBool::new(false);

    nd.acquire_read_lock();
    thread::scope(|s| -> Result<()> {
        let writer = s.spawn(|| -> ndstore::Result<()> {
            nd.acquire_write_lock(0, None)?;
            acquired.store(true, Ordering::SeqCst);
            nd.release_write_lock(0)
        });
        thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));
        nd.release_read_lock();
        writer.join().expect("writer thread")?;
        Ok(())
    })?;
    assert!(acquired.load(Ordering::SeqCst));
    assert_eq!(nd.lock_count(), 0);

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn readers_wait_for_the_writer() -> Result<()> {
    let path = unique_path("readers-wait");
    let nd = open_nd(&path)?;
    let done = AtomicBool::new(false);

    nd.acquire_write_lock(0, None)?;
    thread::scope(|s| -> Result<()> {
        let reader = s.spawn(|| {
            let _r = nd.read();
            done.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(100));
        assert!(!done.load(Ordering::SeqCst));
        assert!(nd.has_waiting_readers());
        nd.release_write_lock(0)?;
        reader.join().expect("reader thread");
        Ok(())
    })?;
    assert!(done.load(Ordering::SeqCst));

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn blocked_writer_can_be_cancelled() -> Result<()> {
    let path = unique_path("cancel-writer");
    let nd = open_nd(&path)?;
    let cancel = CancelFlag::new();

    nd.acquire_read_lock();
    let res = thread::scope(|s| {
        let writer = s.spawn(|| nd.acquire_write_lock(0, Some(&cancel)));
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        writer.join().expect("writer thread")
    });
    assert!(matches!(res, Err(NdError::Cancelled)));
    assert_eq!(nd.lock_count(), 1);
    nd.release_read_lock();

    // the lock is usable afterwards
    cancel.reset();
    nd.acquire_write_lock(0, Some(&cancel))?;
    nd.release_write_lock(0)?;

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn blocked_reader_can_be_cancelled() -> Result<()> {
    let path = unique_path("cancel-reader");
    let nd = open_nd(&path)?;
    let cancel = CancelFlag::new();

    nd.acquire_write_lock(0, None)?;
    let res = thread::scope(|s| {
        let reader = s.spawn(|| nd.acquire_read_lock_cancellable(&cancel));
        thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        reader.join().expect("reader thread")
    });
    assert!(res.as_ref().is_err_and(|e| e.is_cancelled()));
    assert!(!nd.has_waiting_readers());
    nd.release_write_lock(0)?;
    assert_eq!(nd.lock_count(), 0);

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn write_lock_converts_held_read_locks() -> Result<()> {
    let path = unique_path("convert");
    let tracker = Arc::new(TrackingLockObserver::new());
    let nd = Nd::builder(&path)
        .cache(Arc::new(ChunkCache::new(1 << 20)))
        .observer(tracker.clone())
        .open()?;

    nd.acquire_read_lock();
    nd.acquire_read_lock();
    assert_eq!(tracker.current().reads, 2);

    nd.acquire_write_lock(2, None)?;
    assert_eq!(nd.lock_count(), -1);
    assert!(nd.is_write_locked_by_current_thread());
    assert_eq!(tracker.current().writes, 1);
    nd.db().malloc(10, PoolTag::MISC)?;

    nd.release_write_lock(2)?;
    assert_eq!(nd.lock_count(), 2);
    assert_eq!(tracker.current().reads, 2);
    nd.release_read_lock();
    nd.release_read_lock();
    assert_eq!(tracker.holders(), 0);

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn write_number_counts_completed_writes() -> Result<()> {
    let path = unique_path("write-number");
    {
        let nd = open_nd(&path)?;
        assert_eq!(nd.write_number(), 0);
        for _ in 0..3 {
            let w = nd.write(None)?;
            w.db().malloc(16, PoolTag::MISC)?;
            w.finish()?;
        }
        assert_eq!(nd.write_number(), 3);
        // dropping the guard releases too
        {
            let _w = nd.write(None)?;
        }
        assert_eq!(nd.write_number(), 4);
        assert_eq!(nd.lock_count(), 0);
    }
    {
        let nd = open_nd(&path)?;
        assert_eq!(nd.write_number(), 4);
    }
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn readers_share_one_write_number_while_a_writer_waits() -> Result<()> {
    let path = unique_path("stable-write-number");
    let nd = open_nd(&path)?;
    nd.write(None)?.finish()?;
    let before = nd.write_number();
    let readers = 4;
    let inside = Barrier::new(readers + 1);
    let observe = Barrier::new(readers + 1);
    let written = AtomicBool::new(false);

    let seen = thread::scope(|s| -> Result<Vec<i64>> {
        let handles: Vec<_> = (0..readers)
            .map(|_| {
                s.spawn(|| {
                    let r = nd.read();
                    inside.wait();
                    observe.wait();
                    let n = r.write_number();
                    thread::sleep(Duration::from_millis(20));
                    let m = r.write_number();
                    drop(r);
                    (n, m)
                })
            })
            .collect();

        inside.wait();
        let writer = s.spawn(|| -> ndstore::Result<()> {
            let w = nd.write(None)?;
            w.db().malloc(16, PoolTag::MISC)?;
            written.store(true, Ordering::SeqCst);
            w.finish()
        });
        thread::sleep(Duration::from_millis(100));
        assert!(!written.load(Ordering::SeqCst));
        observe.wait();

        let mut seen = Vec::new();
        for h in handles {
            let (n, m) = h.join().expect("reader thread");
            seen.push(n);
            seen.push(m);
        }
        writer.join().expect("writer thread")?;
        Ok(seen)
    })?;

    assert_eq!(seen.len(), readers * 2);
    assert!(seen.iter().all(|&n| n == before), "{:?}", seen);
    assert!(written.load(Ordering::SeqCst));
    assert_eq!(nd.write_number(), before + 1);

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn result_cache_is_cleared_at_lock_boundaries() -> Result<()> {
    let path = unique_path("result-cache");
    let nd = open_nd(&path)?;

    nd.acquire_read_lock();
    let first = nd.put_cached_result("answer", Arc::new(42u32), true);
    let kept = nd.put_cached_result("answer", Arc::new(7u32), false);
    assert!(Arc::ptr_eq(&first, &kept));
    assert_eq!(nd.get_cached_result_as::<u32>("answer").as_deref(), Some(&42));
    assert!(nd.get_cached_result_as::<String>("answer").is_none());
    nd.release_read_lock();
    assert!(nd.get_cached_result("answer").is_none());

    nd.put_cached_result("answer", Arc::new(1u32), true);
    nd.acquire_write_lock(0, None)?;
    assert_eq!(nd.cached_result_count(), 0);
    nd.put_cached_result("answer", Arc::new(2u32), true);
    nd.release_write_lock(0)?;
    assert_eq!(nd.cached_result_count(), 0);

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn read_only_nd_refuses_the_write_lock() -> Result<()> {
    let path = unique_path("ro-nd");
    {
        let nd = open_nd(&path)?;
        nd.write(None)?.finish()?;
    }
    let nd = Nd::builder(&path)
        .cache(Arc::new(ChunkCache::new(1 << 20)))
        .read_only(true)
        .open()?;
    assert!(nd.is_read_only());
    assert!(matches!(nd.acquire_write_lock(0, None), Err(NdError::ReadOnlyDatabase)));
    let r = nd.read();
    assert_eq!(r.write_number(), 1);
    drop(r);

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn concurrent_writers_take_turns() -> Result<()> {
    let path = unique_path("writers");
    let nd = open_nd(&path)?;
    let root = ndstore::consts::DATA_AREA_OFFSET;

    thread::scope(|s| -> Result<()> {
        let writers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| -> ndstore::Result<()> {
                    for _ in 0..25 {
                        let w = nd.write(None)?;
                        let v = w.db().get_long(root)?;
                        w.db().put_long(root, v + 1)?;
                        w.finish()?;
                        let r = nd.read();
                        assert!(r.db().get_long(root)? >= 1);
                    }
                    Ok(())
                })
            })
            .collect();
        for w in writers {
            w.join().expect("writer thread")?;
        }
        Ok(())
    })?;
    assert_eq!(nd.db().get_long(root)?, 100);
    assert_eq!(nd.write_number(), 100);

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

fn unique_path(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("ndstore-lock-{}-{}-{}.db", prefix, pid, t))
}
