//! Post-order, mount-boundary-respecting, symlink-non-following directory
//! removal. Hand-rolled rather than pulling in `walkdir`, since `walkdir`
//! follows mounts and symlinks by default and has no direct knob for
//! `nftw`'s `FTW_PHYS` semantics: visit children before their parent,
//! never cross onto a different filesystem, never follow a symlink.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::error::NsError;

pub fn remove_tree(root: &Path) -> Result<(), NsError> {
    let root_meta = match fs::symlink_metadata(root) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_err(root, e)),
    };
    remove_recursive(root, root_meta.dev())
}

fn remove_recursive(path: &Path, root_dev: u64) -> Result<(), NsError> {
    let meta = fs::symlink_metadata(path).map_err(|e| io_err(path, e))?;

    if meta.file_type().is_symlink() {
        return fs::remove_file(path).map_err(|e| io_err(path, e));
    }

    if !meta.is_dir() {
        return fs::remove_file(path).map_err(|e| io_err(path, e));
    }

    if meta.dev() != root_dev {
        tracing::warn!(path = %path.display(), "skipping directory on a different filesystem");
        return Ok(());
    }

    let entries = fs::read_dir(path).map_err(|e| io_err(path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(path, e))?;
        remove_recursive(&entry.path(), root_dev)?;
    }

    fs::remove_dir(path).map_err(|e| io_err(path, e))
}

fn io_err(path: &Path, source: std::io::Error) -> NsError {
    NsError::Io { path: path.to_path_buf(), source }
}
