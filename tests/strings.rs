use anyhow::Result;
use oorandom::Rand32;
use std::cmp::Ordering;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use ndstore::string::{string_hash, MAX_BYTE_LENGTH};
use ndstore::{ChunkCache, Database, NdError, PoolTag};

const TRIALS: usize = 200;

#[test]
fn short_strings_compare_like_their_chars() -> Result<()> {
    comparison_trials("short", 1, 60, 0x5107)
}

#[test]
fn long_strings_compare_like_their_chars() -> Result<()> {
    comparison_trials("long", MAX_BYTE_LENGTH + 1, MAX_BYTE_LENGTH * 3, 0x1096)
}

fn comparison_trials(name: &str, min_len: usize, max_len: usize, seed: u64) -> Result<()> {
    let path = unique_path(name);
    let db = open_writable(&path)?;
    let mut rng = Rand32::new(seed);

    for _ in 0..TRIALS {
        let a = random_chars(&mut rng, min_len, max_len);
        let b = similar_chars(&mut rng, &a, min_len);
        let sa = db.new_string_from_chars(&a)?;
        let sb = db.new_string_from_chars(&b)?;
        assert_eq!(sa.is_long(), a.len() > MAX_BYTE_LENGTH);

        assert_eq!(sa.compare(&sb, true)?, a.cmp(&b));
        assert_eq!(sa.compare(&sb, false)?, folded(&a).cmp(&folded(&b)));
        assert_eq!(sa.compare_chars(&b, false)?, folded(&a).cmp(&folded(&b)));

        let compatible = sa.compare_compatible_with_ignore_case(&sb)?;
        let insensitive = sa.compare(&sb, false)?;
        if insensitive != Ordering::Equal {
            assert_eq!(compatible, insensitive);
        } else {
            assert_eq!(compatible, a.cmp(&b));
        }

        assert_eq!(sa.hash_code()?, java_hash(&a));
        assert!(sa.eq_chars(&a)?);
        assert_eq!(sa.eq_chars(&b)?, a == b);

        // reopen through the record address
        let again = db.get_string(sa.record())?;
        assert_eq!(again.len(), a.len());
        assert_eq!(again.chars()?, a);

        sa.delete()?;
        sb.delete()?;
    }

    assert!(db.doctor()?.is_clean());
    drop(db);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn prefix_comparison() -> Result<()> {
    let path = unique_path("prefix");
    let db = open_writable(&path)?;

    let s = db.new_string("HelloWorld")?;
    assert_eq!(s.compare_prefix_str("Hello", true)?, Ordering::Equal);
    assert_eq!(s.compare_prefix_str("hello", true)?, Ordering::Less);
    assert_eq!(s.compare_prefix_str("hello", false)?, Ordering::Equal);
    assert_eq!(s.compare_prefix_str("Help", true)?, Ordering::Less);
    assert_eq!(s.compare_prefix_str("HelloWorld", true)?, Ordering::Equal);
    assert_eq!(s.compare_prefix_str("HelloWorld!", true)?, Ordering::Less);
    assert_eq!(s.compare_prefix_str("", true)?, Ordering::Equal);
    assert_eq!(s.compare_prefix_str("Hellm", true)?, Ordering::Greater);

    drop(db);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn wide_and_narrow_contents_round_trip() -> Result<()> {
    let path = unique_path("wide");
    let db = open_writable(&path)?;

    let narrow = "caf\u{e9} au lait";
    let wide = "\u{3b1}\u{3b2}\u{3b3} mixed \u{1F600}";
    let long_wide: String = std::iter::repeat('\u{416}').take(MAX_BYTE_LENGTH).collect();

    for text in [narrow, wide, long_wide.as_str(), ""] {
        let s = db.new_string(text)?;
        let back = db.get_string(s.record())?;
        assert_eq!(back.to_string_lossy()?, text);
        assert!(back.eq_str(text)?);
        let units: Vec<u16> = text.encode_utf16().collect();
        assert_eq!(back.hash_code()?, string_hash(&units));
        assert_eq!(back.is_empty(), text.is_empty());
    }
    assert!(db.new_string(&long_wide)?.is_long());

    assert_eq!(db.new_string("hello")?.hash_code()?, 99162322);
    assert_eq!(
        db.new_string("\u{3a3}IGMA")?.compare_str("\u{3c3}igma", false)?,
        Ordering::Equal
    );

    drop(db);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn deleting_a_long_string_frees_every_record() -> Result<()> {
    let path = unique_path("delete-long");
    let db = open_writable(&path)?;

    let text: String = "x".repeat(MAX_BYTE_LENGTH * 4);
    let s = db.new_string(&text)?;
    assert!(s.is_long());
    let used = db.doctor()?.blocks_used;
    assert!(used >= 5);
    s.delete()?;
    let report = db.doctor()?;
    assert!(report.is_clean(), "{:?}", report.issues);
    assert_eq!(report.blocks_used, 0);

    drop(db);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn damaged_string_records_are_rejected() -> Result<()> {
    let path = unique_path("damaged");
    let db = open_writable(&path)?;

    // length claims more than the record holds
    let small = db.malloc(8, PoolTag::MISC)?;
    db.put_int(small, -100)?;
    assert!(matches!(db.get_string(small), Err(NdError::CorruptBlock { .. })));
    db.put_int(small, i32::MIN)?;
    assert!(matches!(db.get_string(small), Err(NdError::CorruptBlock { .. })));

    // freed records and addresses that are not records
    let gone = db.new_string("gone")?.record();
    db.free(gone, PoolTag::STRING_SHORT)?;
    assert!(matches!(db.get_string(gone), Err(NdError::CorruptBlock { .. })));
    assert!(matches!(db.get_string(4096), Err(NdError::CorruptBlock { .. })));

    // a long string whose chain points at a tiny record
    let wide: Vec<u16> = (0..3000).map(|i| 0x100 + (i % 50) as u16).collect();
    let long = db.new_string_from_chars(&wide)?;
    assert!(long.is_long());
    db.put_rec_ptr(long.record() + 4, small)?;
    let reopened = db.get_string(long.record())?;
    assert!(matches!(reopened.chars(), Err(NdError::CorruptBlock { .. })));

    drop(db);
    fs::remove_file(&path)?;
    Ok(())
}

fn random_chars(rng: &mut Rand32, min_len: usize, max_len: usize) -> Vec<u16> {
    let len = rng.rand_range(min_len as u32..max_len as u32 + 1) as usize;
    (0..len).map(|_| rng.rand_range(32..72) as u16).collect()
}

/// Copy of `a` with a few edits, so that comparisons reach deep into the
/// strings and hit case-only differences.
fn similar_chars(rng: &mut Rand32, a: &[u16], min_len: usize) -> Vec<u16> {
    let mut b = a.to_vec();
    match rng.rand_range(0..5) {
        0 => {}
        1 => {
            let i = rng.rand_range(0..b.len() as u32) as usize;
            b[i] = rng.rand_range(32..72) as u16;
        }
        2 => {
            // flip the case of every letter
            for c in b.iter_mut() {
                if (65..=72).contains(c) {
                    *c += 32;
                }
            }
        }
        3 => {
            let cut = rng.rand_range(min_len as u32..b.len() as u32 + 1) as usize;
            b.truncate(cut);
        }
        _ => b.push(rng.rand_range(32..72) as u16),
    }
    b
}

fn folded(s: &[u16]) -> Vec<u16> {
    s.iter()
        .map(|&c| if (65..=90).contains(&c) { c + 32 } else { c })
        .collect()
}

fn java_hash(s: &[u16]) -> i32 {
    let mut h: i32 = 0;
    for &c in s {
        h = h.wrapping_mul(31).wrapping_add(c as i32);
    }
    h
}

fn open_writable(path: &PathBuf) -> Result<Database> {
    let db = Database::open(path, Arc::new(ChunkCache::new(8 << 20)), 1, false)?;
    db.set_exclusive_lock()?;
    Ok(db)
}

fn unique_path(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("ndstore-str-{}-{}-{}.db", prefix, pid, t))
}
