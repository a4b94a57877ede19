//! Path resolution with root containment.
//!
//! Every client-supplied path goes through [`PathGuard::resolve`] before any
//! filesystem access. Paths are canonicalized (symlinks, `.` and `..`
//! resolved) and the result must have the session root as a component-wise
//! prefix.

use std::fmt;
use std::fs;
use std::io;
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use protocol::GatewayError;
use tracing::error;

/// The directory a session is confined to.
///
/// Only constructible from a path that exists and is a directory; the stored
/// path is canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRoot {
    path: PathBuf,
}

impl SessionRoot {
    /// Validate and canonicalize a root directory.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                GatewayError::NotDir(path.display().to_string())
            } else {
                GatewayError::Internal(format!("{}: {}", path.display(), e))
            }
        })?;

        if !canonical.is_dir() {
            return Err(GatewayError::NotDir(path.display().to_string()));
        }

        Ok(Self { path: canonical })
    }

    /// The canonical root path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for SessionRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// An absolute path proven to be the session root or one of its descendants.
///
/// Only [`PathGuard`] hands these out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath(PathBuf);

impl ResolvedPath {
    /// Borrow the underlying path.
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl Deref for ResolvedPath {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Resolves client paths against the session root.
///
/// Cheap to clone; every operation component holds its own copy.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: Arc<SessionRoot>,
}

impl PathGuard {
    /// Create a guard for the given root.
    pub fn new(root: SessionRoot) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    /// The canonical session root.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Resolve a relative (to the root) or absolute path.
    ///
    /// Paths that do not exist yet are resolved as far as the filesystem
    /// allows; the remaining components are applied lexically.
    pub fn resolve<P: AsRef<Path>>(&self, input: P) -> Result<ResolvedPath, GatewayError> {
        let input = input.as_ref();
        let joined = self.root().join(input);

        let resolved = weakly_canonicalize(&joined)
            .map_err(|e| GatewayError::Internal(format!("{}: {}", input.display(), e)))?;

        if !resolved.starts_with(self.root()) {
            error!(
                path = %input.display(),
                resolved = %resolved.display(),
                "rejected access outside the session root"
            );
            return Err(GatewayError::OutsideRoot(input.display().to_string()));
        }

        Ok(ResolvedPath(resolved))
    }

    /// Resolve `input` relative to an already resolved directory.
    pub fn resolve_from<P: AsRef<Path>>(
        &self,
        base: &ResolvedPath,
        input: P,
    ) -> Result<ResolvedPath, GatewayError> {
        self.resolve(base.join(input))
    }

    /// Whether the path is the session root itself.
    pub fn is_root(&self, path: &ResolvedPath) -> bool {
        path.as_path() == self.root()
    }

    /// Render a path relative to the root with `/` separators.
    ///
    /// The root itself renders as `"."`.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(self.root()).unwrap_or(path);
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }
}

/// Symlink hops allowed while chasing dangling links.
const MAX_LINK_HOPS: usize = 40;

/// Canonicalize every existing prefix of `path` and apply the rest
/// lexically.
///
/// Each component is retried against the filesystem, so a `..` that climbs
/// out of a missing directory back into real ones still has its symlinks
/// followed.
fn weakly_canonicalize(path: &Path) -> io::Result<PathBuf> {
    resolve_components(path, 0)
}

fn resolve_components(path: &Path, hops: usize) -> io::Result<PathBuf> {
    let mut resolved = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            // `resolved` is a canonical prefix plus missing names, so popping is exact.
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                match fs::canonicalize(&resolved) {
                    Ok(canonical) => resolved = canonical,
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                        ) =>
                    {
                        if let Some(target) = dangling_link_target(&resolved)? {
                            if hops >= MAX_LINK_HOPS {
                                return Err(io::Error::other("too many levels of symbolic links"));
                            }
                            resolved = resolve_components(&target, hops + 1)?;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    Ok(resolved)
}

/// Where a dangling symlink points, so a later write is checked at its real
/// destination.
fn dangling_link_target(link: &Path) -> io::Result<Option<PathBuf>> {
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            let target = fs::read_link(link)?;
            let parent = link.parent().map(Path::to_path_buf).unwrap_or_default();
            Ok(Some(parent.join(target)))
        }
        _ => Ok(None),
    }
}
