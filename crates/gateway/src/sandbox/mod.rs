//! Session root and path containment.
//!
//! # Security
//!
//! All operations reach the filesystem only through a [`ResolvedPath`], which
//! [`PathGuard`] produces after canonicalizing the client's input and checking
//! that it lies under the [`SessionRoot`] component by component. A plain
//! string-prefix check would accept `/data-other` for a root of `/data`.

pub mod guard;

pub use guard::{PathGuard, ResolvedPath, SessionRoot};
