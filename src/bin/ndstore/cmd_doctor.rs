use anyhow::Result;
use std::path::PathBuf;

use crate::util::{open_ro, print_json};

pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let db = open_ro(&path)?;
    let report = db.doctor()?;
    db.close()?;

    if json {
        print_json(&report)?;
    } else {
        println!("chunks      = {}", report.chunks_total);
        println!("blocks used = {} ({} bytes)", report.blocks_used, report.bytes_used);
        println!("blocks free = {} ({} bytes)", report.blocks_free, report.bytes_free);
        println!("on lists    = {}", report.free_list_blocks);
        if report.is_clean() {
            println!("OK");
        } else {
            println!("{} issue(s):", report.issues.len());
            for issue in &report.issues {
                println!("  - {}", issue);
            }
        }
    }
    if !report.is_clean() {
        anyhow::bail!("{} inconsistencies found", report.issues.len());
    }
    Ok(())
}
