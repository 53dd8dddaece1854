use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use crate::util::{open_ro, print_json};

#[derive(Serialize)]
struct ChunkCrc {
    chunk: u64,
    crc32: u32,
}

pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let db = open_ro(&path)?;
    let sums: Vec<ChunkCrc> = db
        .chunk_checksums()?
        .into_iter()
        .map(|(chunk, crc32)| ChunkCrc { chunk, crc32 })
        .collect();
    db.close()?;

    if json {
        return print_json(&sums);
    }
    for s in &sums {
        println!("{:>8}  {:08x}", s.chunk, s.crc32);
    }
    Ok(())
}
