//! Transport trait for modem communication.
//!
//! The [`Transport`] trait abstracts over the UART link to the modem. The
//! serial implementation lives in `sim800-transport`; a scripted mock for
//! deterministic tests lives in `sim800-test-harness`.
//!
//! The AT engine in `sim800-at` operates on a `Transport` rather than a
//! serial port directly, so the same framing and dispatch code drives real
//! hardware and unit tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the modem.
///
/// The link is half-duplex and unframed at this layer: `send` writes raw
/// bytes, `receive` returns whatever arrived. Line framing, prompts, and
/// notification demultiplexing are handled by the consumers of this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the modem.
    ///
    /// Implementations should not return until all bytes have been handed
    /// to the underlying device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the modem into the provided buffer.
    ///
    /// Returns as soon as at least one byte is available, with the number of
    /// bytes read. Waits up to `timeout`; returns
    /// [`Error::Timeout`](crate::error::Error::Timeout) if nothing arrives.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Number of bytes that can be read right now without waiting.
    ///
    /// Zero is a normal answer and means "nothing yet", not end of stream.
    fn buffered(&self) -> usize;

    /// Close the transport.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently open.
    fn is_connected(&self) -> bool;
}
