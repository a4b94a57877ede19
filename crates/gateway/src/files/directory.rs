//! Directory listing, creation, sizing and renaming.

use std::fs;
use std::time::SystemTime;

use protocol::messages::{DirEntry, DirListing, DirSize, EntryKind, PathOutcome, Renamed};
use protocol::GatewayError;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::common::{rename_in_place, unix_seconds};
use crate::sandbox::PathGuard;

/// Directory operations confined to the session root.
#[derive(Debug, Clone)]
pub struct DirectoryOps {
    guard: PathGuard,
}

impl DirectoryOps {
    /// Create directory operations bound to a guard.
    pub fn new(guard: PathGuard) -> Self {
        Self { guard }
    }

    /// List the immediate children of a directory.
    ///
    /// Directories come first, then everything else, each group ordered by
    /// case-insensitive name. Entries that cannot be stat'ed (for example
    /// dangling symlinks) are left out.
    pub fn list_dir(&self, path: &str) -> Result<DirListing, GatewayError> {
        info!(path, "listing directory");

        let dir = self.guard.resolve(path)?;
        if !dir.is_dir() {
            return Err(GatewayError::NotDir(path.to_string()));
        }

        let mut items = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };

            let entry_path = entry.path();
            let metadata = match fs::metadata(&entry_path) {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %entry_path.display(), error = %e, "skipping entry");
                    continue;
                }
            };

            let is_dir = metadata.is_dir();
            items.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: self.guard.relative(&entry_path),
                is_dir,
                size: if metadata.is_file() {
                    Some(metadata.len())
                } else {
                    None
                },
                modified: unix_seconds(metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
            });
        }

        items.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });

        info!(path, count = items.len(), "directory listed");
        Ok(DirListing {
            path: self.guard.relative(&dir),
            items,
        })
    }

    /// Create a directory and all missing ancestors. Succeeds if it already
    /// exists.
    pub fn create_dir(&self, path: &str) -> Result<PathOutcome, GatewayError> {
        let dir = self.guard.resolve(path)?;

        if dir.exists() && !dir.is_dir() {
            return Err(GatewayError::AlreadyExists(path.to_string()));
        }

        fs::create_dir_all(&dir)?;
        info!(path, "directory created or already present");

        Ok(PathOutcome {
            path: self.guard.relative(&dir),
        })
    }

    /// Sum the sizes of every regular file below a directory.
    ///
    /// Symlinks are not followed, so link cycles cannot make the walk
    /// unbounded and linked files are not counted.
    pub fn get_dir_size(&self, path: &str) -> Result<DirSize, GatewayError> {
        info!(path, "calculating directory size");

        let dir = self.guard.resolve(path)?;
        if !dir.is_dir() {
            return Err(GatewayError::NotDir(path.to_string()));
        }

        let mut total: u64 = 0;
        for entry in WalkDir::new(&dir).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() {
                if let Ok(metadata) = entry.metadata() {
                    total += metadata.len();
                }
            }
        }

        info!(path, total_size_bytes = total, "directory size calculated");
        Ok(DirSize {
            path: self.guard.relative(&dir),
            total_size_bytes: total,
        })
    }

    /// Rename a directory within its parent.
    pub fn rename_dir(&self, src_path: &str, new_name: &str) -> Result<Renamed, GatewayError> {
        let destination = rename_in_place(&self.guard, src_path, new_name, EntryKind::Directory)?;
        let new_path = self.guard.relative(&destination);

        info!(from = src_path, to = %new_path, "directory renamed");
        Ok(Renamed { new_path })
    }
}
