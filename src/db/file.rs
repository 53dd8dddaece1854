//! db/file: the single backing file.
//!
//! - Writable opens take an exclusive advisory lock (fs2); it is released on Drop.
//! - A file without write permission is rejected before anything is written.
//! - Reads past the end of the file yield zeroes (chunks that were never flushed).

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::debug;
use parking_lot::Mutex;

use crate::consts::CHUNK_SIZE_U64;
use crate::error::{IoContext, NdError, Result};

pub(crate) struct BackingFile {
    path: PathBuf,
    file: Mutex<File>,
    read_only: bool,
    data_fsync: bool,
}

impl BackingFile {
    pub(crate) fn open(path: &Path, read_only: bool, data_fsync: bool) -> Result<Self> {
        let file = if read_only {
            File::open(path).io_context(|| format!("open {} read-only", path.display()))?
        } else {
            open_writable(path)?
        };
        debug!("opened {} (read_only={})", path.display(), read_only);
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            read_only,
            data_fsync,
        })
    }

    pub(crate) fn len(&self) -> Result<u64> {
        let f = self.file.lock();
        let md = f
            .metadata()
            .io_context(|| format!("stat {}", self.path.display()))?;
        Ok(md.len())
    }

    /// Fill `buf` with the chunk at `index`; bytes beyond EOF read as zero.
    pub(crate) fn read_chunk(&self, index: u64, buf: &mut [u8]) -> Result<()> {
        let mut f = self.file.lock();
        let off = index * CHUNK_SIZE_U64;
        f.seek(SeekFrom::Start(off))
            .io_context(|| format!("seek {} to chunk {}", self.path.display(), index))?;
        let mut filled = 0usize;
        while filled < buf.len() {
            match f.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(NdError::io(
                        format!("read chunk {} of {}", index, self.path.display()),
                        e,
                    ))
                }
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    pub(crate) fn write_chunk(&self, index: u64, buf: &[u8]) -> Result<()> {
        let mut f = self.file.lock();
        let off = index * CHUNK_SIZE_U64;
        f.seek(SeekFrom::Start(off))
            .io_context(|| format!("seek {} to chunk {}", self.path.display(), index))?;
        f.write_all(buf)
            .io_context(|| format!("write chunk {} of {}", index, self.path.display()))?;
        Ok(())
    }

    /// fsync data if the database was opened with `data_fsync`.
    pub(crate) fn sync(&self) -> Result<()> {
        if self.read_only || !self.data_fsync {
            return Ok(());
        }
        let f = self.file.lock();
        f.sync_data()
            .io_context(|| format!("fsync {}", self.path.display()))
    }
}

impl Drop for BackingFile {
    fn drop(&mut self) {
        if !self.read_only {
            let _ = FileExt::unlock(&*self.file.lock());
        }
    }
}

fn open_writable(path: &Path) -> Result<File> {
    // refused even for users allowed to write anyway
    if let Ok(md) = std::fs::metadata(path) {
        if md.permissions().readonly() {
            return Err(NdError::ReadOnlyFile { path: path.to_path_buf() });
        }
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => NdError::ReadOnlyFile { path: path.to_path_buf() },
            _ => NdError::io(format!("open {}", path.display()), e),
        })?;
    FileExt::try_lock_exclusive(&file).map_err(|_| NdError::FileLocked { path: path.to_path_buf() })?;
    Ok(file)
}
