//! # rootgate Gateway Library
//!
//! This crate provides the operations of rootgate: filesystem, archive and
//! shell access confined to a single session root directory.
//!
//! ## Overview
//!
//! - **Containment**: every client path is resolved by a [`PathGuard`] and
//!   rejected if it lands outside the session root
//! - **File Operations**: directory listing, reads and edits, search,
//!   hashing, copy/move/delete and zip archives
//! - **Commands**: shell commands run inside the root with a hard timeout
//! - **Routing**: the [`Gateway`] dispatches typed requests and reports
//!   tagged errors
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Gateway                           │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐            │
//! │  │ Directory  │ │   File     │ │  Search    │            │
//! │  │    Ops     │ │   Ops      │ │   Ops      │            │
//! │  └────────────┘ └────────────┘ └────────────┘            │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐            │
//! │  │ Transfer   │ │  Archive   │ │  Command   │            │
//! │  │    Ops     │ │   Ops      │ │  Runner    │            │
//! │  └────────────┘ └────────────┘ └────────────┘            │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │                    PathGuard                       │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gateway::Gateway;
//! use protocol::{Envelope, Request};
//! use protocol::messages::ListDir;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = Gateway::default();
//!     gateway.install_root("/srv/project")?;
//!
//!     let response = gateway
//!         .handle(Envelope::new(1, Request::ListDir(ListDir::default())))
//!         .await;
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`sandbox`]: Session root and path containment
//! - [`files`]: Filesystem and archive operations
//! - [`command`]: Shell command execution
//! - [`router`]: Request routing

pub mod command;
pub mod config;
pub mod files;
pub mod router;
pub mod sandbox;

// Re-export protocol for convenience
pub use protocol;

pub use command::CommandRunner;
pub use config::{Config, ConfigError};
pub use files::{ArchiveOps, DirectoryOps, FileOps, SearchOps, TransferOps};
pub use router::{Gateway, OperationSettings};
pub use sandbox::{PathGuard, ResolvedPath, SessionRoot};
