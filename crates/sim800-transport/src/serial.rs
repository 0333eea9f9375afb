//! Serial port transport for the modem's UART.
//!
//! This module provides [`SerialTransport`], which implements the [`Transport`]
//! trait for the UART link to a SIM800 module, whether wired to a USB-serial
//! adapter or to a board's native UART.
//!
//! The SIM800 auto-bauds on its first `AT` by default; 9600 and 115200 baud
//! are the usual fixed rates.
//!
//! # Example
//!
//! ```no_run
//! use sim800_transport::SerialTransport;
//! use sim800_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> sim800_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 9600).await?;
//!
//! transport.send(b"AT\r\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use sim800_core::error::{Error, Result};
use sim800_core::transport::Transport;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, trace, warn};

/// UART settings. These must match what the module was configured with
/// (`AT+IPR`, `AT+ICF`, `AT+IFC`); the factory setting is 8N1 without flow
/// control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub framing: Framing,
    /// RTS/CTS hardware flow control. XON/XOFF is not offered because
    /// payload bytes may contain the control characters.
    pub rts_cts: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            baud_rate: 9600,
            framing: Framing::default(),
            rts_cts: false,
        }
    }
}

/// Character framing, one variant per `AT+ICF` format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// 8 data bits, 1 stop bit.
    #[default]
    Eight,
    /// 8 data bits, 2 stop bits.
    EightTwoStop,
    /// 8 data bits, a parity bit, 1 stop bit.
    EightParity(Parity),
    /// 7 data bits, 1 stop bit.
    Seven,
    /// 7 data bits, 2 stop bits.
    SevenTwoStop,
    /// 7 data bits, a parity bit, 1 stop bit.
    SevenParity(Parity),
}

/// Parity for the framings that carry a parity bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Odd,
    Even,
}

impl Framing {
    fn data_bits(self) -> tokio_serial::DataBits {
        match self {
            Framing::Eight | Framing::EightTwoStop | Framing::EightParity(_) => {
                tokio_serial::DataBits::Eight
            }
            Framing::Seven | Framing::SevenTwoStop | Framing::SevenParity(_) => {
                tokio_serial::DataBits::Seven
            }
        }
    }

    fn stop_bits(self) -> tokio_serial::StopBits {
        match self {
            Framing::EightTwoStop | Framing::SevenTwoStop => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }

    fn parity(self) -> tokio_serial::Parity {
        match self {
            Framing::EightParity(Parity::Odd) | Framing::SevenParity(Parity::Odd) => {
                tokio_serial::Parity::Odd
            }
            Framing::EightParity(Parity::Even) | Framing::SevenParity(Parity::Even) => {
                tokio_serial::Parity::Even
            }
            _ => tokio_serial::Parity::None,
        }
    }
}

/// Classify an I/O failure on the port: a vanished device is a lost link,
/// anything else is passed through.
fn link_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

/// Serial port transport to the modem.
pub struct SerialTransport {
    /// `None` once closed.
    port: Option<SerialStream>,
    port_name: String,
}

impl SerialTransport {
    /// Open `port` at `baud_rate` with the factory 8N1 framing.
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..Default::default()
        };
        Self::open_with_config(port, config).await
    }

    /// Open `port` with explicit line settings.
    ///
    /// ```no_run
    /// # use sim800_transport::{Framing, Parity, SerialConfig, SerialTransport};
    /// # async fn example() -> sim800_core::Result<()> {
    /// let config = SerialConfig {
    ///     baud_rate: 115_200,
    ///     framing: Framing::EightParity(Parity::Even),
    ///     rts_cts: true,
    /// };
    /// let transport = SerialTransport::open_with_config("/dev/ttyS0", config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        debug!(
            port = %port,
            baud_rate = config.baud_rate,
            framing = ?config.framing,
            rts_cts = config.rts_cts,
            "opening serial port"
        );

        let flow = if config.rts_cts {
            tokio_serial::FlowControl::Hardware
        } else {
            tokio_serial::FlowControl::None
        };
        let mut stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(config.framing.data_bits())
            .stop_bits(config.framing.stop_bits())
            .parity(config.framing.parity())
            .flow_control(flow)
            .open_native_async()
            .map_err(|e| {
                error!(port = %port, error = %e, "cannot open serial port");
                Error::Transport(format!("cannot open serial port {port}: {e}"))
            })?;

        // With slow-clock mode enabled the SIM800 sleeps while DTR is
        // released and ignores the UART until it is asserted.
        if let Err(e) = stream.write_data_terminal_ready(true) {
            warn!(port = %port, error = %e, "cannot assert DTR");
        }

        info!(port = %port, baud_rate = config.baud_rate, "serial port open");
        Ok(SerialTransport {
            port: Some(stream),
            port_name: port.to_string(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        trace!(port = %self.port_name, bytes = data.len(), "tx");

        let written = match port.write_all(data).await {
            Ok(()) => port.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| {
            error!(port = %self.port_name, error = %e, "write failed");
            link_error(e)
        })
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Err(_) => Err(Error::Timeout),
            Ok(Ok(0)) if !buf.is_empty() => {
                warn!(port = %self.port_name, "serial port reported end of stream");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                trace!(port = %self.port_name, bytes = n, "rx");
                Ok(n)
            }
            Ok(Err(e)) => {
                error!(port = %self.port_name, error = %e, "read failed");
                Err(link_error(e))
            }
        }
    }

    fn buffered(&self) -> usize {
        self.port
            .as_ref()
            .and_then(|port| port.bytes_to_read().ok())
            .map_or(0, |n| n as usize)
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut port) = self.port.take() else {
            return Ok(());
        };
        if let Err(e) = port.flush().await {
            warn!(port = %self.port_name, error = %e, "flush before close failed");
        }
        info!(port = %self.port_name, "serial port closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_9600_8n1() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.framing, Framing::Eight);
        assert!(!config.rts_cts);

        let framing = config.framing;
        assert_eq!(framing.data_bits(), tokio_serial::DataBits::Eight);
        assert_eq!(framing.stop_bits(), tokio_serial::StopBits::One);
        assert_eq!(framing.parity(), tokio_serial::Parity::None);
    }

    #[test]
    fn framing_maps_to_line_settings() {
        let seven_even = Framing::SevenParity(Parity::Even);
        assert_eq!(seven_even.data_bits(), tokio_serial::DataBits::Seven);
        assert_eq!(seven_even.stop_bits(), tokio_serial::StopBits::One);
        assert_eq!(seven_even.parity(), tokio_serial::Parity::Even);

        let eight_two = Framing::EightTwoStop;
        assert_eq!(eight_two.data_bits(), tokio_serial::DataBits::Eight);
        assert_eq!(eight_two.stop_bits(), tokio_serial::StopBits::Two);
        assert_eq!(eight_two.parity(), tokio_serial::Parity::None);

        assert_eq!(
            Framing::EightParity(Parity::Odd).parity(),
            tokio_serial::Parity::Odd
        );
    }

    #[test]
    fn vanished_device_is_connection_lost() {
        let e = link_error(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(e, Error::ConnectionLost));
        let e = link_error(io::Error::from(io::ErrorKind::InvalidData));
        assert!(matches!(e, Error::Io(_)));
    }

    #[tokio::test]
    async fn open_missing_port_is_transport_error() {
        let result = SerialTransport::open("/dev/sim800-does-not-exist", 9600).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
