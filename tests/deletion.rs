use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use ndstore::field::{OwnedPointerField, RefCountField, ReferenceField, StringField, NODE_TYPE};
use ndstore::{
    metrics_snapshot, version, ChunkCache, Nd, NdError, NdVersions, NodeTypeRegistry, PoolTag,
    StructLayout, TypeFactory,
};

const ITEM: u16 = 1;
const HOLDER: u16 = 2;
const RETIRED: u16 = 3;
const BROKEN: u16 = 4;

/// Reference-counted node with an owned child and a name.
struct Item {
    refs: RefCountField,
    child: OwnedPointerField,
    name: StringField,
    size: usize,
}

impl Item {
    fn new() -> Self {
        let mut layout = StructLayout::node();
        let refs = layout.add_ref_count();
        let child = layout.add_owned_pointer();
        let name = layout.add_string();
        Item { refs, child, name, size: layout.size() }
    }
}

impl TypeFactory for Item {
    fn type_name(&self) -> &str {
        "item"
    }

    fn record_size(&self) -> usize {
        self.size
    }

    fn destruct(&self, nd: &Nd, address: u64) -> ndstore::Result<()> {
        self.name.destruct(nd.db(), address)?;
        self.child.destruct(nd, address)
    }

    fn is_ready_for_deletion(&self, nd: &Nd, address: u64) -> ndstore::Result<bool> {
        Ok(self.refs.get(nd.db(), address)? == 0)
    }
}

/// Node holding one counted reference to an item.
struct Holder {
    target: ReferenceField,
    size: usize,
}

impl Holder {
    fn new() -> Self {
        let mut layout = StructLayout::node();
        let target = layout.add_reference(Item::new().refs);
        Holder { target, size: layout.size() }
    }
}

impl TypeFactory for Holder {
    fn type_name(&self) -> &str {
        "holder"
    }

    fn record_size(&self) -> usize {
        self.size
    }

    fn destruct(&self, nd: &Nd, address: u64) -> ndstore::Result<()> {
        self.target.destruct(nd, address)
    }

    fn is_ready_for_deletion(&self, _nd: &Nd, _address: u64) -> ndstore::Result<bool> {
        Ok(true)
    }
}

/// Node whose destructor always fails.
struct Broken;

impl TypeFactory for Broken {
    fn type_name(&self) -> &str {
        "broken"
    }

    fn record_size(&self) -> usize {
        8
    }

    fn destruct(&self, _nd: &Nd, address: u64) -> ndstore::Result<()> {
        Err(NdError::CorruptBlock {
            address,
            reason: "cannot destruct".into(),
        })
    }

    fn is_ready_for_deletion(&self, _nd: &Nd, _address: u64) -> ndstore::Result<bool> {
        Ok(true)
    }
}

fn registry() -> Result<NodeTypeRegistry> {
    let mut r = NodeTypeRegistry::new();
    r.register(ITEM, Item::new())?;
    r.register(HOLDER, Holder::new())?;
    r.register(BROKEN, Broken)?;
    r.reserve(RETIRED)?;
    Ok(r)
}

fn open_nd(path: &PathBuf, versions: NdVersions) -> Result<Nd> {
    Ok(Nd::builder(path)
        .cache(Arc::new(ChunkCache::new(4 << 20)))
        .registry(registry()?)
        .versions(versions)
        .open()?)
}

fn is_allocated(nd: &Nd, address: u64) -> Result<bool> {
    Ok(nd.db().block_info(address)? < 0)
}

#[test]
fn nodes_carry_their_type() -> Result<()> {
    let path = unique_path("types");
    let nd = open_nd(&path, NdVersions::default())?;

    let w = nd.write(None)?;
    let item = w.create_node(ITEM)?;
    assert_eq!(item.type_code(), ITEM);
    assert_eq!(item.type_name(), "item");
    assert_eq!(NODE_TYPE.get(w.db(), item.address())?, ITEM);
    assert_eq!(w.node(item.address())?.type_name(), "item");

    assert!(matches!(w.create_node(RETIRED), Err(NdError::UnknownNodeType(RETIRED))));
    let raw = w.db().malloc(8, PoolTag::MISC)?;
    w.db().put_char(raw, 77)?;
    assert!(matches!(w.node(raw), Err(NdError::UnknownNodeType(77))));
    w.finish()?;

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn duplicate_scheduling_is_reported_once() -> Result<()> {
    let path = unique_path("dup");
    let nd = open_nd(&path, NdVersions::default())?;
    let before = metrics_snapshot().deletions_duplicate;

    nd.acquire_write_lock(0, None)?;
    let item = nd.create_node(ITEM)?.address();
    assert!(nd.schedule_deletion(item));
    assert!(!nd.schedule_deletion(item));
    assert_eq!(nd.pending_deletions(), 1);
    assert!(nd.is_scheduled_for_deletion(item));
    assert!(is_allocated(&nd, item)?);
    nd.release_write_lock(0)?;

    assert_eq!(nd.pending_deletions(), 0);
    assert!(!is_allocated(&nd, item)?);
    assert!(metrics_snapshot().deletions_duplicate > before);

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn last_reference_triggers_the_sweep() -> Result<()> {
    let path = unique_path("refcount");
    let nd = open_nd(&path, NdVersions::default())?;
    let fields = Item::new();
    let holder_fields = Holder::new();

    let (item, child, h1, h2) = {
        let w = nd.write(None)?;
        let item = w.create_node(ITEM)?.address();
        let child = w.create_node(ITEM)?.address();
        fields.child.put(&w, item, child)?;
        fields.name.put(w.db(), item, Some("shared item"))?;
        let h1 = w.create_node(HOLDER)?.address();
        let h2 = w.create_node(HOLDER)?.address();
        holder_fields.target.put(&w, h1, item)?;
        holder_fields.target.put(&w, h2, item)?;
        assert_eq!(fields.refs.get(w.db(), item)?, 2);
        w.finish()?;
        (item, child, h1, h2)
    };

    {
        let w = nd.write(None)?;
        // still referenced by h2: scheduled but skipped
        assert!(w.schedule_deletion(item));
        holder_fields.target.put(&w, h1, 0)?;
        assert_eq!(fields.refs.get(w.db(), item)?, 1);
        w.finish()?;
    }
    assert!(is_allocated(&nd, item)?);
    let name = fields
        .name
        .get(nd.db(), item)?
        .map(|s| s.to_string_lossy())
        .transpose()?;
    assert_eq!(name.as_deref(), Some("shared item"));

    {
        let w = nd.write(None)?;
        w.delete(h2)?;
        assert_eq!(fields.refs.get(w.db(), item)?, 0);
        assert!(w.is_scheduled_for_deletion(item));
        w.finish()?;
    }
    assert!(!is_allocated(&nd, item)?);
    assert!(!is_allocated(&nd, child)?);
    assert!(!is_allocated(&nd, h2)?);
    assert!(is_allocated(&nd, h1)?);

    let report = nd.db().doctor()?;
    assert!(report.is_clean(), "{:?}", report.issues);
    // only h1 is left
    assert_eq!(report.blocks_used, 1);

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn replacing_an_owned_child_deletes_the_old_one() -> Result<()> {
    let path = unique_path("owned");
    let nd = open_nd(&path, NdVersions::default())?;
    let fields = Item::new();

    let w = nd.write(None)?;
    let parent = w.create_node(ITEM)?.address();
    let first = w.create_node(ITEM)?.address();
    let second = w.create_node(ITEM)?.address();
    fields.child.put(&w, parent, first)?;
    fields.child.put(&w, parent, second)?;
    assert_eq!(fields.child.get(w.db(), parent)?, second);
    assert!(w.is_scheduled_for_deletion(first));
    w.finish()?;

    assert!(!is_allocated(&nd, first)?);
    assert!(is_allocated(&nd, second)?);

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn failed_sweep_still_advances_the_write_number() -> Result<()> {
    let path = unique_path("failed-sweep");
    let root = ndstore::consts::DATA_AREA_OFFSET;
    {
        let nd = open_nd(&path, NdVersions::default())?;
        nd.acquire_write_lock(0, None)?;
        nd.db().put_long(root, 1234)?;
        let broken = nd.create_node(BROKEN)?.address();
        assert!(nd.schedule_deletion(broken));
        let before = nd.write_number();

        let res = nd.release_write_lock(0);
        assert!(matches!(res, Err(NdError::CorruptBlock { .. })));
        assert_eq!(nd.write_number(), before + 1);
        assert_eq!(nd.pending_deletions(), 0);
        assert_eq!(nd.lock_count(), 0);
        assert!(!nd.is_write_locked_by_current_thread());
    }
    {
        let nd = open_nd(&path, NdVersions::default())?;
        assert_eq!(nd.write_number(), 1);
        assert_eq!(nd.db().get_long(root)?, 1234);
    }
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn immediate_delete_cancels_a_pending_deletion() -> Result<()> {
    let path = unique_path("delete-pending");
    let nd = open_nd(&path, NdVersions::default())?;

    let w = nd.write(None)?;
    let first = w.create_node(ITEM)?.address();
    assert!(w.schedule_deletion(first));
    w.delete(first)?;
    assert!(!w.is_scheduled_for_deletion(first));
    assert_eq!(w.pending_deletions(), 0);

    // the freed block is handed out again
    let again = w.create_node(ITEM)?.address();
    assert_eq!(again, first);
    w.finish()?;

    assert!(is_allocated(&nd, again)?);
    assert_eq!(nd.node(again)?.type_name(), "item");

    drop(nd);
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn unsupported_version_recreates_the_file() -> Result<()> {
    let path = unique_path("version");
    let v1 = NdVersions::single(version(1, 0));
    let v2 = NdVersions::single(version(2, 0));
    {
        let nd = open_nd(&path, v1)?;
        let w = nd.write(None)?;
        w.create_node(ITEM)?;
        w.finish()?;
        assert_eq!(nd.db().version(), version(1, 0));
        assert_eq!(nd.write_number(), 1);
    }

    // read-only opens refuse to touch it
    let ro = Nd::builder(&path)
        .cache(Arc::new(ChunkCache::new(1 << 20)))
        .versions(v2)
        .read_only(true)
        .open();
    assert!(matches!(ro, Err(NdError::UnsupportedVersion { .. })));

    {
        let nd = open_nd(&path, v2)?;
        assert_eq!(nd.db().version(), version(2, 0));
        assert_eq!(nd.write_number(), 0);
        assert_eq!(nd.db().chunk_count(), 1);
    }
    {
        // a range accepts older files as they are
        let nd = open_nd(&path, NdVersions::new(version(1, 0), version(2, 5), version(2, 5)))?;
        assert_eq!(nd.db().version(), version(2, 0));
    }
    fs::remove_file(&path)?;
    Ok(())
}

fn unique_path(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("ndstore-nd-{}-{}-{}.db", prefix, pid, t))
}
