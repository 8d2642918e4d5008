//! Working directory and fixed-size file set

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{MeterError, Result};
use crate::payload::fresh_payload;

/// Handle to the benchmark's working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Create the directory if absent; an existing directory is reused
    pub fn prepare(path: &Path) -> Result<Self> {
        match DirBuilder::new().mode(0o775).create(path) {
            Ok(()) => info!("Created directory {}", path.display()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let meta = fs::metadata(path).map_err(|source| MeterError::WorkDir {
                    path: path.to_path_buf(),
                    source,
                })?;
                if !meta.is_dir() {
                    return Err(MeterError::NotADirectory(path.to_path_buf()));
                }
                warn!("Found old directory {}", path.display());
            }
            Err(source) => {
                return Err(MeterError::WorkDir {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of working file `index` (`file_<index>`)
    pub fn file_path(&self, index: u64) -> PathBuf {
        self.path.join(format!("file_{}", index))
    }

    /// Path of an arbitrary entry inside the directory
    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Create `count` files of `size` bytes each, filled with one payload
    pub fn make_files(&self, count: u64, size: u64) -> Result<()> {
        let (payload, seed) = fresh_payload(size as usize);
        tracing::debug!("payload seed {}", seed);

        for index in 0..count {
            let path = self.file_path(index);
            write_file(&path, &payload)?;
        }
        info!("Created {} files of {} bytes", count, size);
        Ok(())
    }
}

/// Create or truncate `path` and write `contents` fully
pub fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    let to_err = |source| MeterError::FileCreate {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(to_err)?;
    file.write_all(contents).map_err(to_err)?;
    Ok(())
}
