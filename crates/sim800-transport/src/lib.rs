//! Transport implementations for the SIM800 driver.
//!
//! This crate provides [`SerialTransport`], the concrete implementation of
//! the [`Transport`](sim800_core::Transport) trait from `sim800-core` for the
//! modem's UART, together with its line configuration types.

pub mod serial;

pub use serial::{Framing, Parity, SerialConfig, SerialTransport};
