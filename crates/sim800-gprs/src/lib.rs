//! GPRS connection management for the SIM800.
//!
//! This crate drives the modem's multi-connection IP stack over the AT
//! engine in `sim800-at`. It provides:
//!
//! - **Command builders** ([`commands`]) -- construct the attach, bearer,
//!   connection and send commands, with the acceptance rules for replies
//!   that do not end in `OK`, and parse the replies that carry data.
//! - **Connection manager** ([`device`]) -- bearer bring-up and teardown,
//!   a fixed table of five connection slots, chunked sends, and
//!   demultiplexing of `+RECEIVE` notifications into per-connection
//!   buffers.
//! - **Connection handles** ([`connection`]) -- read/write/close on one
//!   logical connection.
//! - **Builder** ([`builder`]) -- fluent builder for [`Device`] instances.
//!
//! # Example
//!
//! ```
//! use sim800_gprs::commands::{cmd_open_connection, parse_receive_preamble};
//! use sim800_core::ConnectionKind;
//!
//! let cmd = cmd_open_connection(0, ConnectionKind::Tcp, "93.184.216.34", "80");
//! assert_eq!(cmd, "+CIPSTART=0,\"TCP\",\"93.184.216.34\",\"80\"");
//!
//! let preamble = parse_receive_preamble("+RECEIVE,2,4:").unwrap();
//! assert_eq!(preamble, Some((2, 4)));
//! ```

pub mod builder;
pub mod commands;
pub mod connection;
pub mod device;

pub use builder::Sim800Builder;
pub use connection::Connection;
pub use device::{Device, DeviceConfig, RECEIVE_CAPACITY};
