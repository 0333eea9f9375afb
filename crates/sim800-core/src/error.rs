//! Error types for the SIM800 driver.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, device-reported
//! command errors, framing problems, and local precondition failures are all
//! captured here.

/// The error type for all SIM800 operations.
///
/// Variants fall into the groups the driver distinguishes when deciding
/// what a caller can do next: device-reported failures ([`Protocol`]),
/// ambiguous silence ([`Timeout`]), protocol drift ([`UnexpectedResponse`]),
/// local capacity limits ([`BufferOverflow`], [`ReceiveOverflow`]), the
/// expected "nothing yet" of a poller ([`WouldBlock`]), and local validation
/// failures that never touch the device.
///
/// [`Protocol`]: Error::Protocol
/// [`Timeout`]: Error::Timeout
/// [`UnexpectedResponse`]: Error::UnexpectedResponse
/// [`BufferOverflow`]: Error::BufferOverflow
/// [`ReceiveOverflow`]: Error::ReceiveOverflow
/// [`WouldBlock`]: Error::WouldBlock
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open or configuration failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// The modem explicitly rejected a command (`ERROR`, `+CME ERROR`,
    /// `+CMS ERROR`, `CONNECT FAIL`, `SEND FAIL`).
    #[error("{command} command error: {reason}")]
    Protocol {
        /// The command text that was rejected.
        command: String,
        /// The failure line reported by the modem.
        reason: String,
    },

    /// Timed out waiting for a response from the modem.
    ///
    /// Ambiguous between a busy modem and a dead one; the caller decides
    /// whether to retry.
    #[error("timeout waiting for response")]
    Timeout,

    /// A response matched none of the completion patterns for the command.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// A fixed-capacity local buffer was exhausted by an oversized response.
    #[error("buffer overflow: capacity {capacity} bytes")]
    BufferOverflow {
        /// Capacity of the buffer that overflowed.
        capacity: usize,
    },

    /// A read found nothing buffered for the connection.
    #[error("operation would block")]
    WouldBlock,

    /// An invalid parameter was passed (bad id, network kind, address, or
    /// an oversized command).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// All connection slots are occupied.
    #[error("maximum connections reached")]
    MaxConnections,

    /// No network address has been assigned; the bearer is not up.
    #[error("no IP address")]
    NoAddress,

    /// The connection id is out of range or its slot is empty.
    #[error("invalid connection id: {0}")]
    InvalidConnection(u8),

    /// The connection is not in the connected state.
    #[error("connection not established")]
    NotEstablished,

    /// A receive notification announced more bytes than the connection
    /// buffer holds. The first `capacity` bytes were kept.
    #[error("receive overflow on connection {id}: announced {announced} bytes, capacity {capacity}")]
    ReceiveOverflow {
        /// Connection id the notification was addressed to.
        id: u8,
        /// Byte count announced by the notification.
        announced: usize,
        /// Capacity of the connection's receive buffer.
        capacity: usize,
    },

    /// A chunked send failed part-way through. `sent` counts only bytes the
    /// modem confirmed before the failure.
    #[error("send failed after {sent} bytes: {source}")]
    PartialWrite {
        /// Bytes confirmed sent before the failing chunk.
        sent: usize,
        /// The failure that stopped the send.
        source: Box<Error>,
    },

    /// A multi-step operation failed at the named step.
    #[error("failed to {step}: {source}")]
    Step {
        /// Human-readable name of the failing step.
        step: &'static str,
        /// The failure reported by that step.
        source: Box<Error>,
    },

    /// No connection to the modem has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the modem was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// A wait was abandoned because the driver's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap `self` as the failure of a named step.
    pub fn at_step(self, step: &'static str) -> Self {
        Error::Step {
            step,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through [`Step`](Error::Step) and
    /// [`PartialWrite`](Error::PartialWrite) wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } | Error::PartialWrite { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the root cause is a [`Timeout`](Error::Timeout).
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout)
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
