use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::error::{IoContext, Result, UnifyError};

/// Modification signal for a source file: mtime plus length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileStamp {
    pub modified_nanos: u128,
    pub len: u64,
}

pub trait ResourceReader: Send + Sync {
    /// `Ok(None)` when the path does not exist.
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    /// Every file below `dir`, sorted.
    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    fn exists(&self, path: &Path) -> bool;

    fn stamp(&self, path: &Path) -> Result<Option<FileStamp>>;

    fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        Ok(self
            .read(path)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsResources;

impl ResourceReader for FsResources {
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == IoErrorKind::NotFound => Ok(None),
            Err(error) if path.is_dir() => Err(UnifyError::FileSystem {
                operation: "reading (is a directory)".to_string(),
                path: path.to_path_buf(),
                source: error,
            }),
            Err(error) => Err(UnifyError::FileSystem {
                operation: "reading".to_string(),
                path: path.to_path_buf(),
                source: error,
            }),
        }
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).io_context("creating directory", parent)?;
        }
        fs::write(path, bytes).io_context("writing", path)
    }

    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !dir.exists() {
            return Ok(files);
        }

        for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|error| UnifyError::WalkDir {
                path: dir.to_path_buf(),
                message: error.to_string(),
            })?;
            if entry.file_type().is_file() {
                files.push(entry.path().to_path_buf());
            }
        }

        Ok(files)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn stamp(&self, path: &Path) -> Result<Option<FileStamp>> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(UnifyError::FileSystem {
                    operation: "reading metadata of".to_string(),
                    path: path.to_path_buf(),
                    source: error,
                });
            }
        };

        let modified_nanos = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);

        Ok(Some(FileStamp {
            modified_nanos,
            len: metadata.len(),
        }))
    }
}

/// Lexically resolves `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

pub fn is_within(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
}

/// Resolves an author-written reference. Leading `/` anchors at `root`,
/// anything else at `base_dir`. `None` when the result escapes `root`.
pub fn resolve_reference(root: &Path, base_dir: &Path, reference: &str) -> Option<PathBuf> {
    let resolved = if let Some(absolute) = reference.strip_prefix('/') {
        normalize_path(&root.join(absolute))
    } else {
        normalize_path(&base_dir.join(reference))
    };

    if is_within(root, &resolved) {
        Some(resolved)
    } else {
        None
    }
}
