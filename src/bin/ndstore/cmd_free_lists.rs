use anyhow::Result;
use std::path::PathBuf;

use crate::util::{open_ro, print_json};

pub fn exec(path: PathBuf, min_size: usize, json: bool) -> Result<()> {
    let db = open_ro(&path)?;
    let mut lists = db.free_list_summary()?;
    db.close()?;
    lists.retain(|l| l.block_size >= min_size);

    if json {
        return print_json(&lists);
    }
    println!("{:>6} {:>6} {:>8}", "deltas", "bytes", "blocks");
    for l in &lists {
        println!("{:>6} {:>6} {:>8}", l.deltas, l.block_size, l.blocks);
    }
    Ok(())
}
