//! Mock transport for deterministic testing of the AT engine and the
//! connection manager.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. This lets you test command formatting, response
//! framing, and notification demultiplexing without a modem attached.
//!
//! # Example
//!
//! ```
//! use sim800_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the driver sends this command, the modem answers with this reply.
//! mock.expect(b"AT+CGATT?\r\n", b"\r\n+CGATT: 1\r\n\r\nOK\r\n");
//! // An unsolicited notification that is readable without any command.
//! mock.inject(b"+RECEIVE,0,5:\r\nhello");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use sim800_core::error::{Error, Result};
use sim800_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes that become readable once the matching request is sent.
    response: Vec<u8>,
}

/// A mock [`Transport`] standing in for the modem's UART.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation; on a match
/// the expectation's response is appended to the receive queue. Bytes added
/// with [`inject`](Self::inject) are readable immediately, as if the modem
/// had emitted them unprompted.
///
/// `receive()` never waits for data: with an empty queue it reports
/// [`Error::Timeout`] at once, which keeps tests fast and deterministic.
/// A [read delay](Self::set_read_delay) slows down delivery of queued
/// bytes instead.
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Bytes readable by the next `receive()` calls.
    rx: VecDeque<u8>,
    /// Upper bound on bytes returned by one `receive()` call.
    chunk_size: usize,
    /// Pause before each `receive()` hands out bytes.
    read_delay: Duration,
    /// Whether the transport is "connected".
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            rx: VecDeque::new(),
            chunk_size: usize::MAX,
            read_delay: Duration::ZERO,
            connected: true,
            sent_log: Vec::new(),
        }
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, `response`
    /// becomes readable. An empty response models a modem that stays silent.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Make `data` readable right away, without a matching request.
    pub fn inject(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied());
    }

    /// Limit how many bytes a single `receive()` call hands out.
    ///
    /// A chunk size of 1 delivers the stream one byte per call, which is how
    /// slow UARTs behave and what the framer must tolerate.
    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size.max(1);
    }

    /// Pause for `delay` before each `receive()` that returns bytes.
    ///
    /// Together with a chunk size of 1 this paces the stream like a real
    /// line: at 9600 baud a byte takes about a millisecond.
    pub fn set_read_delay(&mut self, delay: Duration) {
        self.read_delay = delay;
    }

    /// Return a reference to all data that has been sent through this transport.
    ///
    /// Each element is the byte slice from one `send()` call.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        // Record what was sent.
        self.sent_log.push(data.to_vec());

        // Match against the next expectation.
        if let Some(expectation) = self.expectations.pop_front() {
            if data != expectation.request.as_slice() {
                return Err(Error::Transport(format!(
                    "unexpected send data: expected {:?}, got {:?}",
                    String::from_utf8_lossy(&expectation.request),
                    String::from_utf8_lossy(data)
                )));
            }
            self.rx.extend(expectation.response);
            Ok(())
        } else {
            Err(Error::Transport(
                "no more expectations in mock transport".into(),
            ))
        }
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if self.rx.is_empty() {
            return Err(Error::Timeout);
        }

        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }

        let n = self.rx.len().min(buf.len()).min(self.chunk_size);
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn buffered(&self) -> usize {
        if self.connected { self.rx.len() } else { 0 }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.rx.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
