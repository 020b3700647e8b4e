//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Enumerating the regular files of a directory tree
//! - Copying files with metadata preservation
//! - Creating directories recursively

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, FileError};

/// Resolve the source root to its canonical absolute form.
///
/// Logged paths are built from this form, so a later run finds them under
/// the same root even when it is spelled differently on the command line.
///
/// # Errors
/// Returns `SourceNotFound` if the root is missing, `InvalidPath` if it is
/// not a directory, and `EnumerationFailed` if it cannot be accessed.
pub fn resolve_source_root(source: &Path) -> Result<PathBuf, EngineError> {
    let root = fs::canonicalize(source).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => EngineError::SourceNotFound {
            path: source.to_path_buf(),
        },
        _ => EngineError::EnumerationFailed {
            path: source.to_path_buf(),
            source: e,
        },
    })?;

    if !root.is_dir() {
        return Err(EngineError::InvalidPath {
            path: source.to_path_buf(),
            reason: "Source must be a directory".to_string(),
        });
    }
    Ok(root)
}

/// Enumerate every regular file below `source`.
///
/// The traversal is depth-first and the entries of each directory are
/// visited in file-name order, so a static tree always yields the same
/// sequence. Symbolic links are never followed and, like sockets, FIFOs and
/// device nodes, are left out of the result.
///
/// # Errors
/// Returns `EnumerationFailed` if the root or any directory below it cannot
/// be read.
pub fn enumerate_files(source: &Path) -> Result<Vec<PathBuf>, EngineError> {
    fn recurse(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), EngineError> {
        let enumeration_failed = |source| EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source,
        };

        let mut entries = fs::read_dir(dir)
            .map_err(enumeration_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(enumeration_failed)?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let file_type = entry.file_type().map_err(enumeration_failed)?;
            let entry_path = entry.path();

            if file_type.is_dir() {
                recurse(&entry_path, files)?;
            } else if file_type.is_file() {
                files.push(entry_path);
            } else {
                tracing::debug!(path = %entry_path.display(), "skipping symlink or special file");
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    recurse(source, &mut files)?;
    Ok(files)
}

/// Copy a file from source to destination with metadata preservation.
///
/// Copies the content, flushes it to disk, then carries over permissions
/// and access/modification times. The parent of `dst` must already exist
/// (see [`ensure_parent_dir_exists`]).
///
/// # Returns
/// Number of bytes copied
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, FileError> {
    let read_failed = |source| FileError::ReadFailed {
        path: src.to_path_buf(),
        source,
    };
    let write_failed = |source| FileError::WriteFailed {
        path: dst.to_path_buf(),
        source,
    };

    ensure_distinct_files(src, dst)?;

    let mut src_file = fs::File::open(src).map_err(read_failed)?;
    let src_metadata = src_file.metadata().map_err(read_failed)?;

    let mut dst_file = create_destination(dst).map_err(write_failed)?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        // io::copy does not say which side failed; a denied or full target is the usual cause
        match e.kind() {
            io::ErrorKind::PermissionDenied | io::ErrorKind::WriteZero => write_failed(e),
            _ => read_failed(e),
        }
    })?;
    dst_file.sync_all().map_err(write_failed)?;
    drop(dst_file);

    fs::set_permissions(dst, src_metadata.permissions()).map_err(write_failed)?;

    let atime = filetime::FileTime::from_last_access_time(&src_metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&src_metadata);
    filetime::set_file_times(dst, atime, mtime).map_err(write_failed)?;

    Ok(bytes_copied)
}

/// Refuse a copy whose destination is the source itself.
///
/// Opening the destination truncates it, so copying a file onto itself
/// (same path, a symlinked directory, or a hard link) would erase it.
pub fn ensure_distinct_files(src: &Path, dst: &Path) -> Result<(), FileError> {
    let dst_metadata = match fs::metadata(dst) {
        Ok(metadata) => metadata,
        // Nothing there yet; opening it reports any other problem
        Err(_) => return Ok(()),
    };
    let src_metadata = fs::metadata(src).map_err(|source| FileError::ReadFailed {
        path: src.to_path_buf(),
        source,
    })?;

    if same_file(src, &src_metadata, dst, &dst_metadata) {
        return Err(FileError::SameFile {
            path: src.to_path_buf(),
            destination: dst.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn same_file(_: &Path, a: &fs::Metadata, _: &Path, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(a: &Path, _: &fs::Metadata, b: &Path, _: &fs::Metadata) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Open `dst` for writing, clearing a read-only flag left by an earlier copy.
fn create_destination(dst: &Path) -> io::Result<fs::File> {
    match fs::File::create(dst) {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            let mut permissions = match fs::metadata(dst) {
                Ok(metadata) => metadata.permissions(),
                Err(_) => return Err(e),
            };
            if !permissions.readonly() {
                return Err(e);
            }
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(dst, permissions)?;
            fs::File::create(dst)
        }
        other => other,
    }
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), FileError> {
    let parent = match path.parent() {
        // Skip if parent is empty path (relative root)
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(()),
    };

    let creation_failed = |source| FileError::DirectoryCreationFailed {
        path: parent.to_path_buf(),
        source,
    };

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(creation_failed(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "parent path exists but is not a directory",
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(creation_failed)
        }
        Err(e) => Err(creation_failed(e)),
    }
}
