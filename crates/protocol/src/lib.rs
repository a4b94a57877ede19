//! # rootgate Protocol Library
//!
//! Wire types shared between the rootgate gateway and the host that drives
//! it.
//!
//! ## Overview
//!
//! - **Requests**: one [`Request`] variant per catalog operation, wrapped in an
//!   [`Envelope`] carrying a sequence number
//! - **Results**: one [`Outcome`] variant per operation, wrapped in a
//!   [`ResponseEnvelope`] alongside errors
//! - **Errors**: the closed [`ErrorKind`] taxonomy and [`GatewayError`]
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, Request};
//! use protocol::messages::ReadFile;
//!
//! let request = Request::ReadFile(ReadFile {
//!     path: "README.md".to_string(),
//!     offset: 0,
//!     length: None,
//! });
//! let envelope = Envelope::new(1, request);
//! let bytes = envelope.to_msgpack().unwrap();
//! assert_eq!(Envelope::from_msgpack(&bytes).unwrap(), envelope);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Request, result and envelope definitions
//! - [`error`]: Error taxonomy

pub mod error;
pub mod messages;

pub use error::{ErrorKind, ErrorMessage, GatewayError, Result};
pub use messages::{
    Envelope, Outcome, Request, ResponseBody, ResponseEnvelope, OPERATIONS, PROTOCOL_VERSION,
};
