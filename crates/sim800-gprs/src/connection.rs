//! Connection -- a handle to one logical TCP/UDP connection.

use std::sync::Weak;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use sim800_core::error::{Error, Result};
use sim800_core::types::{ConnectionKind, ConnectionState, Endpoint};

use crate::device::Inner;

/// A logical connection opened by [`Device::dial`](crate::Device::dial).
///
/// The handle does not own the connection: the device keeps the slot, and
/// the handle refers to it by id and generation. Once the slot is closed
/// (through this handle, through the device, or by
/// [`disconnect`](crate::Device::disconnect)) the handle reads end-of-stream
/// and refuses writes, even if the id has since been reused.
///
/// Deadlines are not supported: the modem's UART offers no per-connection
/// timing, so the `set_*deadline` methods only log. Use
/// [`tokio::time::timeout`] around `read` / `write` instead.
#[derive(Debug)]
pub struct Connection {
    device: Weak<Mutex<Inner>>,
    id: u8,
    generation: u64,
    remote: Endpoint,
}

impl Connection {
    pub(crate) fn new(device: Weak<Mutex<Inner>>, id: u8, generation: u64, remote: Endpoint) -> Self {
        Connection {
            device,
            id,
            generation,
            remote,
        }
    }

    /// The modem's slot id for this connection.
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn kind(&self) -> ConnectionKind {
        self.remote.kind()
    }

    /// Read received bytes.
    ///
    /// Returns `Ok(0)` (end-of-stream) once the connection is no longer
    /// connected, and [`Error::WouldBlock`] when nothing has arrived yet.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let Some(device) = self.device.upgrade() else {
            return Ok(0);
        };
        let mut inner = device.lock().await;
        if inner.state_of(self.id, self.generation) != Some(ConnectionState::Connected) {
            return Ok(0);
        }
        inner.connection_read(self.id, buf).await
    }

    /// Send `data`, returning the number of bytes the modem accepted.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let Some(device) = self.device.upgrade() else {
            return Err(Error::NotEstablished);
        };
        let mut inner = device.lock().await;
        if inner.state_of(self.id, self.generation) != Some(ConnectionState::Connected) {
            return Err(Error::NotEstablished);
        }
        inner.send_data(self.id, data).await
    }

    /// Close the connection. The slot is released even if the modem
    /// reports an error.
    pub async fn close(&self) -> Result<()> {
        let Some(device) = self.device.upgrade() else {
            return Err(Error::InvalidConnection(self.id));
        };
        let mut inner = device.lock().await;
        if inner.state_of(self.id, self.generation).is_none() {
            return Err(Error::InvalidConnection(self.id));
        }
        inner.close_connection(self.id).await
    }

    /// Current state, or `None` once the connection has been closed.
    pub async fn state(&self) -> Option<ConnectionState> {
        let device = self.device.upgrade()?;
        let inner = device.lock().await;
        inner.state_of(self.id, self.generation)
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == Some(ConnectionState::Connected)
    }

    /// The modem's address on the packet network. Empty once the bearer
    /// is down.
    pub async fn local_addr(&self) -> Endpoint {
        let Some(device) = self.device.upgrade() else {
            return Endpoint::new(self.kind(), "");
        };
        let inner = device.lock().await;
        Endpoint::new(self.kind(), inner.local_address().unwrap_or_default())
    }

    /// The `host:port` this connection was dialed to.
    pub fn remote_addr(&self) -> &Endpoint {
        &self.remote
    }

    /// Accepted for API compatibility; has no effect.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        debug!(id = self.id, ?deadline, "connection deadlines are not supported, ignoring");
    }

    /// Accepted for API compatibility; has no effect.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        debug!(id = self.id, ?deadline, "read deadlines are not supported, ignoring");
    }

    /// Accepted for API compatibility; has no effect.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        debug!(id = self.id, ?deadline, "write deadlines are not supported, ignoring");
    }
}
