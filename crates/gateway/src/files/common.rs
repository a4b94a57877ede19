//! Helpers shared by the file operation components.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use glob::{MatchOptions, Pattern};
use protocol::messages::EntryKind;
use protocol::GatewayError;
use tracing::debug;
use walkdir::WalkDir;

use crate::sandbox::{PathGuard, ResolvedPath};

/// Glob options: `*` never crosses a separator, dotfiles match like any other
/// name.
const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Convert a timestamp to Unix seconds, clamping pre-epoch times to 0.
pub(crate) fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Map a "not found" I/O error to the given error, anything else to
/// `INTERNAL_ERROR`.
pub(crate) fn not_found_as(err: io::Error, missing: GatewayError) -> GatewayError {
    if err.kind() == io::ErrorKind::NotFound {
        missing
    } else {
        GatewayError::Internal(err.to_string())
    }
}

/// Create the parent directory of `path` if it is missing.
pub(crate) fn ensure_parent(path: &Path) -> Result<(), GatewayError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Reject names that are not a single plain path component.
pub(crate) fn validate_new_name(name: &str) -> Result<(), GatewayError> {
    if name.contains('/') || name.contains('\\') {
        return Err(GatewayError::InvalidName(format!(
            "{name} (name must not contain path separators)"
        )));
    }
    if name.is_empty() || name == "." || name == ".." {
        return Err(GatewayError::InvalidName(format!("{name:?}")));
    }
    Ok(())
}

/// Rename a file or directory within its own parent.
///
/// Returns the new path.
pub(crate) fn rename_in_place(
    guard: &PathGuard,
    src_path: &str,
    new_name: &str,
    expected: EntryKind,
) -> Result<ResolvedPath, GatewayError> {
    validate_new_name(new_name)?;

    let source = guard.resolve(src_path)?;
    match expected {
        EntryKind::Directory if !source.is_dir() => {
            return Err(GatewayError::NotDir(src_path.to_string()));
        }
        EntryKind::File if !source.is_file() => {
            return Err(GatewayError::NotFile(src_path.to_string()));
        }
        _ => {}
    }

    // The root has no parent inside the sandbox, so this fails for it.
    let parent = source.parent().unwrap_or(guard.root());
    let destination = guard.resolve(parent.join(new_name))?;

    if fs::symlink_metadata(parent.join(new_name)).is_ok() {
        return Err(GatewayError::AlreadyExists(guard.relative(&destination)));
    }

    fs::rename(&source, &destination)?;
    Ok(destination)
}

/// Compile a pattern that matches at any depth below the search base, the
/// way `**/pattern` does.
pub(crate) fn recursive_pattern(pattern: &str) -> Result<Pattern, GatewayError> {
    let trimmed = pattern.trim_start_matches("./");
    let recursive = if trimmed.starts_with("**/") {
        trimmed.to_string()
    } else {
        format!("**/{trimmed}")
    };

    Pattern::new(&recursive)
        .map_err(|e| GatewayError::InvalidName(format!("invalid glob pattern {pattern:?}: {e}")))
}

/// All regular files below `base` whose base-relative path matches
/// `pattern`, in stable name order.
///
/// Symlinks are never followed, so cycles cannot occur. Entries that cannot
/// be read are skipped.
pub(crate) fn matching_files(base: &Path, pattern: &Pattern) -> Vec<PathBuf> {
    let mut matches = Vec::new();

    for entry in WalkDir::new(base)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry during walk");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(base) else {
            continue;
        };

        if pattern.matches_path_with(relative, GLOB_OPTIONS) {
            matches.push(entry.into_path());
        }
    }

    matches
}
