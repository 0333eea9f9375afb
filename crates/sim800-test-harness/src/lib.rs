//! sim800-test-harness: Test utilities and mock transports for the SIM800
//! driver.
//!
//! This crate provides [`MockTransport`] for deterministic unit testing of
//! the AT engine and the connection manager without a modem attached.

pub mod mock_serial;

pub use mock_serial::MockTransport;
