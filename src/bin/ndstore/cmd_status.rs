use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use ndstore::consts::{CHUNK_SIZE_U64, DATA_AREA_OFFSET};
use ndstore::version_string;

use crate::util::{open_ro, print_json};

#[derive(Serialize)]
struct Status {
    path: String,
    version: String,
    version_raw: i32,
    write_number: i64,
    chunks: u64,
    file_bytes: u64,
    data_area_offset: u64,
}

pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let db = open_ro(&path)?;
    let s = Status {
        path: path.display().to_string(),
        version: version_string(db.version()),
        version_raw: db.version(),
        write_number: db.write_number(),
        chunks: db.chunk_count(),
        file_bytes: db.chunk_count() * CHUNK_SIZE_U64,
        data_area_offset: DATA_AREA_OFFSET,
    };
    db.close()?;

    if json {
        return print_json(&s);
    }
    println!("path          = {}", s.path);
    println!("version       = {} ({})", s.version, s.version_raw);
    println!("write_number  = {}", s.write_number);
    println!("chunks        = {}", s.chunks);
    println!("file_bytes    = {}", s.file_bytes);
    Ok(())
}
