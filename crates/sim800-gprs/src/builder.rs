//! Sim800Builder -- fluent builder for constructing [`Device`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! serial port parameters and timeouts before the UART is opened.
//!
//! # Example
//!
//! ```no_run
//! use sim800_gprs::builder::Sim800Builder;
//! use std::time::Duration;
//!
//! # async fn example() -> sim800_core::Result<()> {
//! let modem = Sim800Builder::new()
//!     .serial_port("/dev/ttyS1")
//!     .baud_rate(115_200)
//!     .connect_timeout(Duration::from_secs(60))
//!     .build()
//!     .await?;
//! modem.connect("internet", "", "").await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use sim800_core::error::{Error, Result};
use sim800_core::transport::Transport;
use sim800_transport::{SerialConfig, SerialTransport};

use crate::device::{Device, DeviceConfig};

/// Fluent builder for [`Device`].
///
/// Defaults match the SIM800 factory configuration: 9600 baud 8N1, a 10 s
/// command timeout and a 75 s timeout for network attach and connection
/// setup.
#[derive(Debug, Clone)]
pub struct Sim800Builder {
    serial_port: Option<String>,
    serial: SerialConfig,
    config: DeviceConfig,
}

impl Sim800Builder {
    pub fn new() -> Self {
        Sim800Builder {
            serial_port: None,
            serial: SerialConfig::default(),
            config: DeviceConfig::default(),
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyS1` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Set the baud rate (default: 9600).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.serial.baud_rate = baud;
        self
    }

    /// Replace all serial line settings at once.
    pub fn serial_config(mut self, config: SerialConfig) -> Self {
        self.serial = config;
        self
    }

    /// Set the timeout for ordinary command exchanges (default: 10 s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Set the timeout for attach, bearer bring-up, and connection open
    /// (default: 75 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set how long a read with an empty buffer waits for incoming data
    /// (default: 100 ms).
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.config.receive_timeout = timeout;
        self
    }

    /// Set the pause between send chunks (default: 100 ms).
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.config.chunk_delay = delay;
        self
    }

    /// Build a [`Device`] with a caller-provided transport.
    ///
    /// This is the entry point for testing (pass a `MockTransport` from
    /// `sim800-test-harness`) and for callers that open the UART
    /// themselves.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Device> {
        if self.config.command_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "command_timeout must be non-zero".into(),
            ));
        }
        if self.config.connect_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "connect_timeout must be non-zero".into(),
            ));
        }
        Ok(Device::new(transport, self.config))
    }

    /// Build a [`Device`] on a serial port.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub async fn build(self) -> Result<Device> {
        let port = self
            .serial_port
            .as_deref()
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for build()".into()))?;

        let transport = SerialTransport::open_with_config(port, self.serial).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}

impl Default for Sim800Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim800_test_harness::MockTransport;

    #[test]
    fn builder_defaults() {
        let b = Sim800Builder::new();
        assert!(b.serial_port.is_none());
        assert_eq!(b.serial.baud_rate, 9600);
        assert_eq!(b.config, DeviceConfig::default());
    }

    #[test]
    fn builder_setters() {
        let b = Sim800Builder::new()
            .serial_port("/dev/ttyS1")
            .baud_rate(115_200)
            .command_timeout(Duration::from_secs(2))
            .connect_timeout(Duration::from_secs(30))
            .receive_timeout(Duration::from_millis(5))
            .chunk_delay(Duration::ZERO);
        assert_eq!(b.serial_port.as_deref(), Some("/dev/ttyS1"));
        assert_eq!(b.serial.baud_rate, 115_200);
        assert_eq!(b.config.command_timeout, Duration::from_secs(2));
        assert_eq!(b.config.connect_timeout, Duration::from_secs(30));
        assert_eq!(b.config.receive_timeout, Duration::from_millis(5));
        assert_eq!(b.config.chunk_delay, Duration::ZERO);
    }

    #[tokio::test]
    async fn build_with_mock_transport() {
        let device = Sim800Builder::new()
            .build_with_transport(Box::new(MockTransport::new()))
            .await
            .unwrap();
        assert_eq!(device.local_address().await, None);
        assert_eq!(device.connection_state(0).await, None);
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected() {
        let result = Sim800Builder::new()
            .command_timeout(Duration::ZERO)
            .build_with_transport(Box::new(MockTransport::new()))
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn build_without_port_fails() {
        let result = Sim800Builder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
