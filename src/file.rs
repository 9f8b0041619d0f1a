// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{fs::File, io::Write, path::Path};

/// Name of the persisted bucket index
pub const BUCKET_INDEX_FILE: &str = "bucket_index";

/// Folder that holds the data files
pub const DATA_FOLDER: &str = "data";

/// Atomically rewrites a file
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // NOTE: Nothing we can do
    #[allow(clippy::expect_used)]
    let folder = path.parent().expect("should have a parent");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path)?;

    // TODO: not sure why it fails on Windows...
    #[cfg(not(target_os = "windows"))]
    {
        let file = File::open(path)?;
        file.sync_all()?;
    }

    fsync_directory(folder)?;

    Ok(())
}

#[cfg(not(target_os = "windows"))]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    let file = File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    // Cannot fsync directory on Windows
    let _ = path;
    Ok(())
}

/// Reads exactly `len` bytes at `offset`, without moving a shared cursor.
#[cfg(unix)]
pub fn read_exact(file: &File, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    use std::os::unix::fs::FileExt;

    let mut buf = vec![0; len];
    file.read_exact_at(&mut buf, offset)?;
    Ok(buf)
}

/// Reads exactly `len` bytes at `offset`, without moving a shared cursor.
#[cfg(windows)]
pub fn read_exact(file: &File, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    use std::os::windows::fs::FileExt;

    let mut buf = vec![0; len];
    let mut pos = 0;

    while pos < len {
        #[allow(clippy::indexing_slicing)]
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;

        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        pos += n;
    }

    Ok(buf)
}

/// Hard links `src` to `dst`, copying instead if linking is not possible
/// (e.g. the target is on another filesystem).
pub fn link_or_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Err(e) = std::fs::hard_link(src, dst) {
        log::trace!(
            "Could not hard link {} -> {}, copying instead: {e:?}",
            src.display(),
            dst.display(),
        );
        std::fs::copy(src, dst)?;

        let file = File::open(dst)?;
        file.sync_all()?;
    }

    Ok(())
}
