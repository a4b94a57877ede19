//! Zip archive creation and extraction.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path};

use protocol::messages::{ArchiveCreated, ArchiveExtracted};
use protocol::GatewayError;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::common::ensure_parent;
use crate::sandbox::PathGuard;

/// Archive operations confined to the session root.
#[derive(Debug, Clone)]
pub struct ArchiveOps {
    guard: PathGuard,
}

impl ArchiveOps {
    /// Create archive operations bound to a guard.
    pub fn new(guard: PathGuard) -> Self {
        Self { guard }
    }

    /// Write a deflate-compressed archive of the given files and directories.
    ///
    /// Entry names are relative to `base_dir`. Items that do not exist or do
    /// not lie under `base_dir` are skipped with a warning. The archive never
    /// contains itself.
    pub fn zip_files(
        &self,
        archive_path: &str,
        files_to_add: &[String],
        base_dir: &str,
    ) -> Result<ArchiveCreated, GatewayError> {
        let archive = self.guard.resolve(archive_path)?;
        let base = self.guard.resolve(base_dir)?;

        if archive.is_dir() {
            return Err(GatewayError::NotFile(archive_path.to_string()));
        }
        ensure_parent(&archive)?;

        let mut writer = ZipWriter::new(File::create(&archive)?);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut files_added: u64 = 0;

        for item in files_to_add {
            let full = match self.guard.resolve_from(&base, item) {
                Ok(path) => path,
                Err(e) => {
                    warn!(item = %item, error = %e, "skipping archive item");
                    continue;
                }
            };

            if fs::symlink_metadata(&full).is_err() {
                warn!(item = %item, "skipping missing archive item");
                continue;
            }
            if !full.starts_with(&base) {
                warn!(item = %item, base_dir, "skipping item outside the archive base");
                continue;
            }

            if full.is_file() {
                if full.as_path() == archive.as_path() {
                    continue;
                }
                add_file(&mut writer, &full, &entry_name(&base, &full), options)?;
                files_added += 1;
                continue;
            }

            for entry in WalkDir::new(&full).follow_links(false).sort_by_file_name() {
                let entry = entry.map_err(|e| GatewayError::Internal(e.to_string()))?;
                let path = entry.path();

                if path == archive.as_path() {
                    continue;
                }

                let name = entry_name(&base, path);
                let file_type = entry.file_type();
                if file_type.is_dir() {
                    if !name.is_empty() {
                        writer
                            .add_directory(name, options)
                            .map_err(|e| zip_error(archive_path, e))?;
                    }
                } else if file_type.is_file() {
                    add_file(&mut writer, path, &name, options)?;
                    files_added += 1;
                } else {
                    debug!(path = %path.display(), "skipping non-regular entry");
                }
            }
        }

        writer.finish().map_err(|e| zip_error(archive_path, e))?;

        info!(archive_path, files_added, "archive created");
        Ok(ArchiveCreated {
            archive_path: self.guard.relative(&archive),
            files_added,
        })
    }

    /// Extract every entry of an archive into a directory, creating it if
    /// needed.
    ///
    /// Entries whose names would escape the target directory, and symlink
    /// entries, make the archive invalid. Every entry is checked before
    /// anything is written.
    pub fn unzip_file(
        &self,
        archive_path: &str,
        extract_to_dir: &str,
    ) -> Result<ArchiveExtracted, GatewayError> {
        let archive = self.guard.resolve(archive_path)?;
        let target = self.guard.resolve(extract_to_dir)?;

        if !archive.is_file() {
            return Err(GatewayError::NotFile(archive_path.to_string()));
        }

        let mut zip =
            ZipArchive::new(File::open(&archive)?).map_err(|e| zip_error(archive_path, e))?;
        let entries = zip.len() as u64;

        for index in 0..zip.len() {
            let entry = zip
                .by_index_raw(index)
                .map_err(|e| zip_error(archive_path, e))?;
            if entry.enclosed_name().is_none() {
                warn!(archive_path, entry = entry.name(), "archive entry escapes target");
                return Err(GatewayError::BadZipFile(format!(
                    "{archive_path}: entry {:?} escapes the extraction directory",
                    entry.name()
                )));
            }
            if entry.is_symlink() {
                warn!(archive_path, entry = entry.name(), "archive holds a symlink entry");
                return Err(GatewayError::BadZipFile(format!(
                    "{archive_path}: entry {:?} is a symbolic link",
                    entry.name()
                )));
            }
        }

        fs::create_dir_all(&target)?;
        zip.extract(&target).map_err(|e| zip_error(archive_path, e))?;

        info!(archive_path, extract_to_dir, entries, "archive extracted");
        Ok(ArchiveExtracted {
            extract_dir: self.guard.relative(&target),
            entries,
        })
    }
}

fn add_file(
    writer: &mut ZipWriter<File>,
    path: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> Result<(), GatewayError> {
    writer
        .start_file(name, options)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    let mut file = File::open(path)?;
    io::copy(&mut file, writer)?;
    Ok(())
}

/// Archive entry name for `path`: its components below `base`, joined by
/// `/`.
fn entry_name(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn zip_error(archive_path: &str, err: ZipError) -> GatewayError {
    match &err {
        ZipError::InvalidArchive(_) | ZipError::UnsupportedArchive(_) => {
            GatewayError::BadZipFile(format!("{archive_path}: {err}"))
        }
        _ => GatewayError::Internal(format!("{archive_path}: {err}")),
    }
}
