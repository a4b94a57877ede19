//! Copying, moving and deleting files and directory trees.

use std::fs::{self, File, FileTimes};
use std::io;
use std::path::Path;

use protocol::messages::{Deleted, EntryKind, Transferred};
use protocol::GatewayError;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::common::ensure_parent;
use crate::sandbox::{PathGuard, ResolvedPath};

/// Transfer operations confined to the session root.
#[derive(Debug, Clone)]
pub struct TransferOps {
    guard: PathGuard,
}

impl TransferOps {
    /// Create transfer operations bound to a guard.
    pub fn new(guard: PathGuard) -> Self {
        Self { guard }
    }

    /// Copy a file or a directory tree.
    ///
    /// A file copied onto an existing directory lands inside it under its own
    /// name. Copying a file onto itself, directly or through a link, fails
    /// with `ALREADY_EXISTS` and leaves it untouched. A directory copy
    /// requires a destination that does not exist yet. Modification times are
    /// preserved.
    pub fn copy_path(&self, src: &str, dst: &str) -> Result<Transferred, GatewayError> {
        let source = self.guard.resolve(src)?;
        let destination = self.guard.resolve(dst)?;

        let kind = self.entry_kind(src, &source)?;
        let target = match kind {
            EntryKind::File => {
                let target = self.landing_path(&source, destination)?;
                if is_same_file(&source, &target) {
                    return Err(GatewayError::AlreadyExists(format!(
                        "{dst} (source and destination are the same file)"
                    )));
                }
                ensure_parent(&target)?;
                copy_file_preserving_times(&source, &target)?;
                target
            }
            EntryKind::Directory => {
                if fs::symlink_metadata(&destination).is_ok() {
                    return Err(GatewayError::AlreadyExists(dst.to_string()));
                }
                if destination.starts_with(&source) {
                    return Err(GatewayError::InvalidName(format!(
                        "{dst} (cannot copy a directory into itself)"
                    )));
                }
                ensure_parent(&destination)?;
                copy_tree(&source, &destination)?;
                destination
            }
        };

        let destination = self.guard.relative(&target);
        info!(src, destination = %destination, ?kind, "copied");
        Ok(Transferred { kind, destination })
    }

    /// Move a file or directory.
    ///
    /// An existing destination directory receives the source under its own
    /// name. Falls back to copy and delete when a plain rename crosses
    /// filesystems.
    pub fn move_path(&self, src: &str, dst: &str) -> Result<Transferred, GatewayError> {
        let source = self.guard.resolve(src)?;
        let destination = self.guard.resolve(dst)?;

        if self.guard.is_root(&source) {
            warn!(src, "refused to move the session root");
            return Err(GatewayError::CannotDeleteRoot);
        }

        let kind = self.entry_kind(src, &source)?;
        let target = self.landing_path(&source, destination)?;

        if is_same_file(&source, &target) {
            return Ok(Transferred {
                kind,
                destination: self.guard.relative(&target),
            });
        }
        if kind == EntryKind::Directory && target.starts_with(&source) {
            return Err(GatewayError::InvalidName(format!(
                "{dst} (cannot move a directory into itself)"
            )));
        }
        if kind == EntryKind::Directory && fs::symlink_metadata(&target).is_ok() {
            return Err(GatewayError::AlreadyExists(self.guard.relative(&target)));
        }

        ensure_parent(&target)?;
        match fs::rename(&source, &target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                match kind {
                    EntryKind::File => {
                        copy_file_preserving_times(&source, &target)?;
                        fs::remove_file(&source)?;
                    }
                    EntryKind::Directory => {
                        copy_tree(&source, &target)?;
                        fs::remove_dir_all(&source)?;
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }

        let destination = self.guard.relative(&target);
        info!(src, destination = %destination, ?kind, "moved");
        Ok(Transferred { kind, destination })
    }

    /// Delete a file or a directory tree. The session root is never deleted.
    pub fn delete_path(&self, path: &str) -> Result<Deleted, GatewayError> {
        let target = self.guard.resolve(path)?;

        if self.guard.is_root(&target) {
            warn!(path, "refused to delete the session root");
            return Err(GatewayError::CannotDeleteRoot);
        }

        let metadata = fs::symlink_metadata(&target)
            .map_err(|_| GatewayError::NotExist(path.to_string()))?;

        let kind = if metadata.is_dir() {
            fs::remove_dir_all(&target)?;
            EntryKind::Directory
        } else {
            fs::remove_file(&target)?;
            EntryKind::File
        };

        info!(path, ?kind, "deleted");
        Ok(Deleted { kind })
    }

    /// Classify an existing source.
    ///
    /// A path that exists only as a dangling symlink is neither a file nor a
    /// directory.
    fn entry_kind(&self, src: &str, source: &ResolvedPath) -> Result<EntryKind, GatewayError> {
        match fs::metadata(source) {
            Ok(m) if m.is_dir() => Ok(EntryKind::Directory),
            Ok(m) if m.is_file() => Ok(EntryKind::File),
            Ok(_) => Err(GatewayError::NotFileOrDir(src.to_string())),
            Err(_) if fs::symlink_metadata(self.guard.root().join(src)).is_ok() => {
                Err(GatewayError::NotFileOrDir(src.to_string()))
            }
            Err(_) => Err(GatewayError::NotExist(src.to_string())),
        }
    }

    /// Where `source` ends up: inside `destination` if that is an existing
    /// directory, otherwise at `destination` itself.
    fn landing_path(
        &self,
        source: &ResolvedPath,
        destination: ResolvedPath,
    ) -> Result<ResolvedPath, GatewayError> {
        if !destination.is_dir() {
            return Ok(destination);
        }
        match source.file_name() {
            Some(name) => self.guard.resolve_from(&destination, name),
            None => Ok(destination),
        }
    }
}

/// Whether two paths name the same file, including hard links.
fn is_same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let (Ok(x), Ok(y)) = (fs::metadata(a), fs::metadata(b)) {
            return x.dev() == y.dev() && x.ino() == y.ino();
        }
    }
    false
}

/// Copy one file, carrying over access and modification times.
fn copy_file_preserving_times(source: &Path, target: &Path) -> Result<(), GatewayError> {
    fs::copy(source, target)?;

    let metadata = fs::metadata(source)?;
    let mut times = FileTimes::new();
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    File::options().write(true).open(target)?.set_times(times)?;
    Ok(())
}

/// Recreate a directory tree at `target`. Symlinks are copied as links, not
/// followed.
fn copy_tree(source: &Path, target: &Path) -> Result<(), GatewayError> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| GatewayError::Internal(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let dest = target.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_file() {
            copy_file_preserving_times(entry.path(), &dest)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, dest: &Path) -> Result<(), GatewayError> {
    let points_to = fs::read_link(link)?;
    std::os::unix::fs::symlink(points_to, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _dest: &Path) -> Result<(), GatewayError> {
    warn!(path = %link.display(), "skipping symlink during copy");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SessionRoot;
    use protocol::ErrorKind;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn setup() -> (TempDir, TransferOps) {
        let temp_dir = TempDir::new().unwrap();
        let ops = TransferOps::new(PathGuard::new(SessionRoot::new(temp_dir.path()).unwrap()));
        (temp_dir, ops)
    }

    // =========================================================================
    // copy_path
    // =========================================================================

    #[test]
    fn test_copy_file_preserves_mtime() {
        let (temp_dir, ops) = setup();
        let src = temp_dir.path().join("a.txt");
        fs::write(&src, "payload").unwrap();
        let old = SystemTime::now() - Duration::from_secs(86_400);
        File::options().write(true).open(&src).unwrap().set_modified(old).unwrap();

        let copied = ops.copy_path("a.txt", "out/b.txt").unwrap();
        assert_eq!(copied.kind, EntryKind::File);
        assert_eq!(copied.destination, "out/b.txt");

        let dst = temp_dir.path().join("out/b.txt");
        assert_eq!(fs::read_to_string(&dst).unwrap(), "payload");
        let mtime = fs::metadata(&dst).unwrap().modified().unwrap();
        let drift = mtime.duration_since(old).unwrap_or_else(|e| e.duration());
        assert!(drift < Duration::from_secs(2));
    }

    #[test]
    fn test_copy_file_into_existing_dir() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("a.txt"), "x").unwrap();
        fs::create_dir(temp_dir.path().join("dest")).unwrap();

        let copied = ops.copy_path("a.txt", "dest").unwrap();
        assert_eq!(copied.destination, "dest/a.txt");
        assert!(temp_dir.path().join("dest/a.txt").is_file());
        assert!(temp_dir.path().join("a.txt").is_file());
    }

    #[test]
    fn test_copy_file_onto_itself_keeps_content() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("a.txt"), "precious data").unwrap();

        for dst in ["a.txt", ".", "./a.txt"] {
            let err = ops.copy_path("a.txt", dst).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AlreadyExists, "{dst}");
            assert_eq!(
                fs::read_to_string(temp_dir.path().join("a.txt")).unwrap(),
                "precious data"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_file_onto_alias_keeps_content() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("a.txt"), "precious data").unwrap();
        std::os::unix::fs::symlink("a.txt", temp_dir.path().join("alias.txt")).unwrap();
        fs::hard_link(temp_dir.path().join("a.txt"), temp_dir.path().join("hard.txt")).unwrap();

        for dst in ["alias.txt", "hard.txt"] {
            let err = ops.copy_path("a.txt", dst).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AlreadyExists, "{dst}");
        }
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("a.txt")).unwrap(),
            "precious data"
        );
    }

    #[test]
    fn test_copy_tree() {
        let (temp_dir, ops) = setup();
        fs::create_dir_all(temp_dir.path().join("src/inner")).unwrap();
        fs::write(temp_dir.path().join("src/one.txt"), "1").unwrap();
        fs::write(temp_dir.path().join("src/inner/two.txt"), "2").unwrap();

        let copied = ops.copy_path("src", "backup/src").unwrap();
        assert_eq!(copied.kind, EntryKind::Directory);
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("backup/src/inner/two.txt")).unwrap(),
            "2"
        );
        assert!(temp_dir.path().join("src/one.txt").is_file());
    }

    #[test]
    fn test_copy_tree_errors() {
        let (temp_dir, ops) = setup();
        fs::create_dir_all(temp_dir.path().join("src")).unwrap();
        fs::create_dir_all(temp_dir.path().join("taken")).unwrap();

        assert_eq!(
            ops.copy_path("src", "taken").unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            ops.copy_path("src", "src/nested").unwrap_err().kind(),
            ErrorKind::InvalidName
        );
        assert_eq!(
            ops.copy_path("missing", "x").unwrap_err().kind(),
            ErrorKind::NotExist
        );
        assert_eq!(
            ops.copy_path("src", "../outside").unwrap_err().kind(),
            ErrorKind::OutsideRoot
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_dangling_symlink() {
        let (temp_dir, ops) = setup();
        std::os::unix::fs::symlink("nowhere", temp_dir.path().join("broken")).unwrap();

        assert_eq!(
            ops.copy_path("broken", "copy").unwrap_err().kind(),
            ErrorKind::NotFileOrDir
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_keeps_symlinks() {
        let (temp_dir, ops) = setup();
        fs::create_dir_all(temp_dir.path().join("src")).unwrap();
        fs::write(temp_dir.path().join("src/real.txt"), "r").unwrap();
        std::os::unix::fs::symlink("real.txt", temp_dir.path().join("src/link")).unwrap();

        ops.copy_path("src", "dup").unwrap();
        let link = temp_dir.path().join("dup/link");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("real.txt"));
    }

    // =========================================================================
    // move_path
    // =========================================================================

    #[test]
    fn test_move_file_and_dir() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("a.txt"), "x").unwrap();
        fs::create_dir_all(temp_dir.path().join("d/sub")).unwrap();
        fs::create_dir(temp_dir.path().join("into")).unwrap();

        let moved = ops.move_path("a.txt", "renamed.txt").unwrap();
        assert_eq!(moved.kind, EntryKind::File);
        assert!(!temp_dir.path().join("a.txt").exists());
        assert!(temp_dir.path().join("renamed.txt").is_file());

        let moved = ops.move_path("d", "into").unwrap();
        assert_eq!(moved.kind, EntryKind::Directory);
        assert_eq!(moved.destination, "into/d");
        assert!(temp_dir.path().join("into/d/sub").is_dir());
    }

    #[test]
    fn test_move_file_onto_itself_is_noop() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("a.txt"), "precious data").unwrap();

        for dst in ["a.txt", "."] {
            let moved = ops.move_path("a.txt", dst).unwrap();
            assert_eq!(moved.destination, "a.txt");
        }
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("a.txt")).unwrap(),
            "precious data"
        );
    }

    #[test]
    fn test_move_errors() {
        let (temp_dir, ops) = setup();
        fs::create_dir_all(temp_dir.path().join("d")).unwrap();

        assert_eq!(
            ops.move_path(".", "elsewhere").unwrap_err().kind(),
            ErrorKind::CannotDeleteRoot
        );
        assert_eq!(
            ops.move_path("missing", "x").unwrap_err().kind(),
            ErrorKind::NotExist
        );
        assert_eq!(
            ops.move_path("d", "d/inside").unwrap_err().kind(),
            ErrorKind::InvalidName
        );
        assert!(temp_dir.path().join("d").is_dir());
    }

    // =========================================================================
    // delete_path
    // =========================================================================

    #[test]
    fn test_delete_file_and_tree() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("f.txt"), "x").unwrap();
        fs::create_dir_all(temp_dir.path().join("tree/a/b")).unwrap();
        fs::write(temp_dir.path().join("tree/a/b/c.txt"), "x").unwrap();

        assert_eq!(ops.delete_path("f.txt").unwrap().kind, EntryKind::File);
        assert_eq!(ops.delete_path("tree").unwrap().kind, EntryKind::Directory);
        assert!(!temp_dir.path().join("tree").exists());
    }

    #[test]
    fn test_delete_root_refused() {
        let (temp_dir, ops) = setup();
        fs::write(temp_dir.path().join("keep.txt"), "x").unwrap();

        for root in [".", "", "sub/..", "./"] {
            assert_eq!(
                ops.delete_path(root).unwrap_err().kind(),
                ErrorKind::CannotDeleteRoot,
                "{root:?}"
            );
        }
        assert!(temp_dir.path().join("keep.txt").is_file());
    }

    #[test]
    fn test_delete_missing() {
        let (_temp_dir, ops) = setup();
        assert_eq!(ops.delete_path("ghost").unwrap_err().kind(), ErrorKind::NotExist);
    }
}
