//! Filesystem operations.
//!
//! Each component holds a [`PathGuard`](crate::sandbox::PathGuard) and resolves
//! every client path through it before touching the filesystem:
//!
//! - [`DirectoryOps`]: list, create, size and rename directories
//! - [`FileOps`]: read, write, edit, touch and stat files
//! - [`SearchOps`]: glob lookup, text search and hashing
//! - [`TransferOps`]: copy, move and delete
//! - [`ArchiveOps`]: zip and unzip

pub mod archive;
mod common;
pub mod content;
pub mod directory;
pub mod search;
pub mod transfer;

pub use archive::ArchiveOps;
pub use content::{FileOps, BLOCKED_EXTENSIONS};
pub use directory::DirectoryOps;
pub use search::{HashAlgorithm, SearchOps};
pub use transfer::TransferOps;
