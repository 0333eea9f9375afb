//! sim800-core: Core traits, types, and error definitions for the SIM800
//! driver.
//!
//! This crate defines the pieces every other crate in the workspace shares,
//! so the AT engine, the connection manager, and the transports agree on one
//! error type and one byte-level seam.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to the modem
//! - [`ConnectionKind`], [`ConnectionState`], [`Endpoint`] -- logical connection types
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use sim800_core::*`.
pub use error::{Error, Result};
pub use transport::Transport;
pub use types::{ConnectionKind, ConnectionState, Endpoint, MAX_CONNECTIONS, ParseKindError};
