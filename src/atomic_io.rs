//! Crash-safe file writes.
//!
//! 1. Write to a temporary file in the same directory
//! 2. `sync_all()` the temporary file
//! 3. Rename it over the final path
//! 4. Fsync the parent directory (Unix only)
//!
//! After a crash the target holds either the old or the new content.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

fn temp_path(path: &Path, parent: &Path) -> PathBuf {
    let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("file");
    parent.join(format!(".{}.tmp.{}", file_name, Uuid::new_v4()))
}

#[cfg(unix)]
fn fsync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_with_mode(path: &Path, mode: u32) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
}

#[cfg(not(unix))]
fn create_with_mode(path: &Path, _mode: u32) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Atomically writes `data` to `path`, creating the file with permission
/// bits `mode` on Unix. Parent directories are created as needed.
pub(crate) fn atomic_write(path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no parent directory: {}", path.display()),
        )
    })?;
    fs::create_dir_all(parent)?;

    let temp = temp_path(path, parent);
    let written = (|| {
        let mut file = create_with_mode(&temp, mode)?;
        file.write_all(data)?;
        file.sync_all()
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&temp);
        return Err(err);
    }

    fs::rename(&temp, path)?;
    fsync_dir(parent)
}
