//! # sim800 -- GPRS networking for the SIM800 cellular modem
//!
//! `sim800` is an asynchronous Rust driver for the SIMCom SIM800 family. It
//! attaches the modem to the packet network, brings up a GPRS bearer, and
//! multiplexes up to five TCP/UDP connections over the module's single
//! UART using the AT command set.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sim800::Sim800Builder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let modem = Sim800Builder::new()
//!         .serial_port("/dev/ttyS1")
//!         .build()
//!         .await?;
//!
//!     modem.connect("internet", "", "").await?;
//!     let conn = modem.dial("tcp", "93.184.216.34:80").await?;
//!     conn.write(b"GET / HTTP/1.0\r\n\r\n").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                  | Purpose                                              |
//! |------------------------|------------------------------------------------------|
//! | `sim800-core`          | [`Transport`] trait, connection types, [`Error`]     |
//! | `sim800-at`            | Byte framer, response lexer, command dispatcher      |
//! | `sim800-transport`     | UART transport over `tokio-serial`                   |
//! | `sim800-gprs`          | Bearer management and multiplexed connections        |
//! | `sim800-test-harness`  | Scripted mock transport for tests                    |
//! | **`sim800`**           | This facade crate -- re-exports everything           |
//!
//! ## Reading data
//!
//! The modem announces incoming data with `+RECEIVE` notifications on the
//! same UART that carries commands. [`Connection::read`] pulls a pending
//! notification when its buffer is empty and returns
//! [`Error::WouldBlock`] when nothing has arrived; long-running
//! applications can also call [`Device::poll_receive`] from their idle
//! loop.
//!
//! ## Logging
//!
//! All crates log through `tracing`. Install a subscriber (for example
//! `tracing-subscriber` with an `EnvFilter`) to see command traffic at
//! `debug` and raw bytes at `trace`.

pub use sim800_core::*;

pub use sim800_gprs::{Connection, Device, DeviceConfig, RECEIVE_CAPACITY, Sim800Builder};

/// The AT command engine: framer, lexer, and dispatcher.
///
/// Most applications never touch this directly; it is exposed for tools
/// that need to issue commands outside the GPRS set.
pub mod at {
    pub use sim800_at::*;
}

/// Command builders and reply parsers for the GPRS command set.
pub mod commands {
    pub use sim800_gprs::commands::*;
}

/// Serial transport for the modem's UART.
pub mod transport {
    pub use sim800_transport::*;
}
