//! Command dispatcher: one in-flight AT exchange at a time.
//!
//! [`Dispatcher`] owns the transport, the [`Framer`], and a short receive
//! buffer of bytes read from the wire but not yet framed. Every exchange
//! follows the same path:
//!
//! 1. reject over-long commands before touching the device,
//! 2. discard stale input so the reply is not confused with old output,
//! 3. send `AT` + command + CRLF,
//! 4. frame response units and judge each line with an [`AcceptRule`]
//!    until the rule decides or the deadline passes.
//!
//! Raw access ([`read_raw`](Dispatcher::read_raw),
//! [`write_raw`](Dispatcher::write_raw)) shares the same receive buffer, so
//! payload bytes that arrived together with a notification line are never
//! lost between the framed and the raw view of the stream.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use sim800_core::error::{Error, Result};
use sim800_core::transport::Transport;

use crate::framer::{Frame, Framer};
use crate::lexer::{self, TokenKind};

/// Longest command accepted, including the `AT` prefix.
pub const MAX_COMMAND_LEN: usize = 128;

/// Capacity of the per-exchange transcript used for value extraction.
pub const TRANSCRIPT_CAPACITY: usize = 512;

/// Size of one read from the transport.
const RX_CHUNK: usize = 256;

/// How long each read waits while discarding stale input.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Line terminator for commands.
const CRLF: &str = "\r\n";

// ---------------------------------------------------------------------------
// Acceptance rules
// ---------------------------------------------------------------------------

/// Judgement of one response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The exchange completed successfully.
    Success,
    /// The device rejected the command.
    Failure,
    /// An intermediate line; keep reading.
    Pending,
    /// The line fits none of the expected patterns.
    Unexpected,
}

/// Per-command rule deciding when an exchange is over.
#[derive(Debug, Clone, Copy)]
pub enum AcceptRule {
    /// `OK` succeeds, `ERROR` / `+CME ERROR` / `+CMS ERROR` fail, keyed
    /// responses, notifications and echoes are intermediate. Anything else
    /// is unexpected.
    Default,
    /// Succeed on a line containing any `success` marker, fail on one
    /// containing any `failure` marker, keep reading otherwise.
    Contains {
        success: &'static [&'static str],
        failure: &'static [&'static str],
    },
    /// A command-specific predicate.
    Custom(fn(&str) -> Verdict),
}

impl AcceptRule {
    pub fn evaluate(&self, line: &str) -> Verdict {
        match self {
            AcceptRule::Default => match lexer::classify(line).kind {
                TokenKind::Ok => Verdict::Success,
                TokenKind::Error | TokenKind::KeyedError => Verdict::Failure,
                TokenKind::Response
                | TokenKind::Notification
                | TokenKind::Echo
                | TokenKind::Empty => Verdict::Pending,
                TokenKind::Data | TokenKind::Prompt => Verdict::Unexpected,
            },
            AcceptRule::Contains { success, failure } => {
                if success.iter().any(|m| line.contains(m)) {
                    Verdict::Success
                } else if failure.iter().any(|m| line.contains(m)) {
                    Verdict::Failure
                } else {
                    Verdict::Pending
                }
            }
            AcceptRule::Custom(predicate) => predicate(line),
        }
    }
}

/// A response unit as seen by callers of the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    /// A complete, non-empty line without its terminator.
    Line(String),
    /// The data-input prompt.
    Prompt,
}

/// Build the wire form of a command: `AT` prefix, uppercased command name.
///
/// Parameters after the first `=` or `?` keep their case.
pub fn canonicalize(command: &str) -> String {
    let body = if command.len() >= 2 && command.as_bytes()[..2].eq_ignore_ascii_case(b"AT") {
        &command[2..]
    } else {
        command
    };
    let split = body.find(['=', '?']).unwrap_or(body.len());
    format!("AT{}{}", body[..split].to_ascii_uppercase(), &body[split..])
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Drives AT exchanges over a [`Transport`].
pub struct Dispatcher {
    transport: Box<dyn Transport>,
    framer: Framer,
    rx: [u8; RX_CHUNK],
    rx_pos: usize,
    rx_len: usize,
    transcript: String,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Wrap a transport. Every wait aborts with [`Error::Cancelled`] once
    /// `cancel` fires.
    pub fn new(transport: Box<dyn Transport>, cancel: CancellationToken) -> Self {
        Dispatcher {
            transport,
            framer: Framer::new(),
            rx: [0u8; RX_CHUNK],
            rx_pos: 0,
            rx_len: 0,
            transcript: String::with_capacity(TRANSCRIPT_CAPACITY),
            cancel,
        }
    }

    /// Send a command and wait for `rule` to settle the exchange.
    ///
    /// Returns the line that completed the exchange.
    pub async fn send(
        &mut self,
        command: &str,
        rule: AcceptRule,
        timeout: Duration,
    ) -> Result<String> {
        let command = self.transmit(command).await?;
        self.await_outcome(&command, rule, timeout).await
    }

    /// Send a command that is answered by the data-input prompt.
    pub async fn send_expect_prompt(&mut self, command: &str, timeout: Duration) -> Result<()> {
        self.transmit(command).await?;
        self.expect_prompt(timeout).await
    }

    /// Validate, resync, and write one command. Returns its wire form
    /// without the terminator.
    async fn transmit(&mut self, command: &str) -> Result<String> {
        let command = canonicalize(command);
        if command.len() > MAX_COMMAND_LEN {
            return Err(Error::InvalidParameter(format!(
                "command is {} bytes, limit is {MAX_COMMAND_LEN}",
                command.len()
            )));
        }

        self.discard_stale().await?;
        self.transcript.clear();

        debug!(command = %command, "sending AT command");
        self.transport
            .send(format!("{command}{CRLF}").as_bytes())
            .await?;
        Ok(command)
    }

    /// Read lines until `rule` returns a verdict other than
    /// [`Verdict::Pending`].
    ///
    /// `command` is only used to label errors. Every line read is recorded
    /// in the transcript.
    pub async fn await_outcome(
        &mut self,
        command: &str,
        rule: AcceptRule,
        timeout: Duration,
    ) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let line = match self.next_unit(deadline).await? {
                Unit::Line(line) => line,
                Unit::Prompt => {
                    debug!(command = %command, "prompt where a line was expected");
                    return Err(Error::UnexpectedResponse(">".into()));
                }
            };
            self.record(&line);

            match rule.evaluate(&line) {
                Verdict::Success => return Ok(line),
                Verdict::Pending => continue,
                Verdict::Failure => {
                    error!(command = %command, reason = %line, "command rejected by modem");
                    return Err(Error::Protocol {
                        command: command.to_string(),
                        reason: line,
                    });
                }
                Verdict::Unexpected => {
                    debug!(command = %command, line = %line, "unexpected response");
                    return Err(Error::UnexpectedResponse(line));
                }
            }
        }
    }

    /// Wait for the data-input prompt. A line instead of the prompt is
    /// [`Error::UnexpectedResponse`].
    pub async fn expect_prompt(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        match self.next_unit(deadline).await? {
            Unit::Prompt => Ok(()),
            Unit::Line(line) => {
                self.record(&line);
                Err(Error::UnexpectedResponse(line))
            }
        }
    }

    /// Produce the next non-empty response unit, waiting until `deadline`.
    pub async fn next_unit(&mut self, deadline: Instant) -> Result<Unit> {
        loop {
            while self.rx_pos < self.rx_len {
                let byte = self.rx[self.rx_pos];
                self.rx_pos += 1;
                match self.framer.feed(byte)? {
                    Some(Frame::Line) => {
                        let line = String::from_utf8_lossy(self.framer.line())
                            .trim()
                            .to_string();
                        trace!(line = %line, "received line");
                        return Ok(Unit::Line(line));
                    }
                    Some(Frame::Prompt) => {
                        trace!("received prompt");
                        return Ok(Unit::Prompt);
                    }
                    Some(Frame::Empty) | None => {}
                }
            }
            self.fill(deadline).await?;
        }
    }

    /// Read unframed bytes, for payloads that follow a notification line.
    ///
    /// Bytes already pulled off the wire are returned first.
    pub async fn read_raw(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.rx_pos == self.rx_len {
            self.fill(deadline).await?;
        }
        let n = (self.rx_len - self.rx_pos).min(buf.len());
        buf[..n].copy_from_slice(&self.rx[self.rx_pos..self.rx_pos + n]);
        self.rx_pos += n;
        Ok(n)
    }

    /// Write bytes to the modem with no framing.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        trace!(bytes = data.len(), "writing raw payload");
        self.transport.send(data).await
    }

    /// The trimmed value of `key: value` from the last exchange, if the
    /// modem reported a non-empty one.
    pub fn value(&self, key: &str) -> Option<String> {
        self.transcript
            .lines()
            .map(lexer::classify)
            .find(|token| token.key.as_deref() == Some(key))
            .and_then(|token| token.value)
            .filter(|value| !value.is_empty())
    }

    /// Lines recorded during the last exchange, CRLF-separated.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// A clone of the token that aborts every wait.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the underlying transport is still open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Close the underlying transport.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Refill the receive buffer with at least one byte.
    async fn fill(&mut self, deadline: Instant) -> Result<()> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }

            let n = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Err(Error::Cancelled),

                received = self.transport.receive(&mut self.rx, remaining) => received?,
            };

            if n > 0 {
                trace!(bytes = n, data = ?String::from_utf8_lossy(&self.rx[..n]), "rx");
                self.rx_pos = 0;
                self.rx_len = n;
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
    }

    /// Throw away unread input and any partial line.
    async fn discard_stale(&mut self) -> Result<()> {
        let mut stale = self.rx_len - self.rx_pos;
        self.rx_pos = 0;
        self.rx_len = 0;
        self.framer.reset();

        while self.transport.buffered() > 0 {
            match self.transport.receive(&mut self.rx, DRAIN_POLL).await {
                Ok(n) => stale += n,
                Err(Error::Timeout) => break,
                Err(e) => return Err(e),
            }
        }

        if stale > 0 {
            debug!(bytes = stale, "discarded stale input before command");
        }
        Ok(())
    }

    fn record(&mut self, line: &str) {
        if self.transcript.len() + line.len() + CRLF.len() > TRANSCRIPT_CAPACITY {
            debug!(line = %line, "transcript full, line not recorded");
            return;
        }
        self.transcript.push_str(line);
        self.transcript.push_str(CRLF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim800_test_harness::MockTransport;

    const T: Duration = Duration::from_millis(200);

    fn dispatcher(mock: MockTransport) -> Dispatcher {
        Dispatcher::new(Box::new(mock), CancellationToken::new())
    }

    fn ends_with_address(line: &str) -> Verdict {
        if line.contains('.') {
            Verdict::Success
        } else if line.contains("ERROR") {
            Verdict::Failure
        } else {
            Verdict::Pending
        }
    }

    // -----------------------------------------------------------------------
    // canonicalize / AcceptRule
    // -----------------------------------------------------------------------

    #[test]
    fn canonicalize_adds_prefix_and_uppercases_name() {
        assert_eq!(canonicalize("+cgatt?"), "AT+CGATT?");
        assert_eq!(canonicalize("at+cipmux=1"), "AT+CIPMUX=1");
        assert_eq!(canonicalize("AT"), "AT");
        assert_eq!(canonicalize("+cstt=\"Internet\""), "AT+CSTT=\"Internet\"");
        assert_eq!(canonicalize("+CIICR"), "AT+CIICR");
    }

    #[test]
    fn default_rule_verdicts() {
        let rule = AcceptRule::Default;
        assert_eq!(rule.evaluate("OK"), Verdict::Success);
        assert_eq!(rule.evaluate("ERROR"), Verdict::Failure);
        assert_eq!(rule.evaluate("+CME ERROR: 3"), Verdict::Failure);
        assert_eq!(rule.evaluate("+CGATT: 1"), Verdict::Pending);
        assert_eq!(rule.evaluate("AT+CGATT?"), Verdict::Pending);
        assert_eq!(rule.evaluate("garbage"), Verdict::Unexpected);
    }

    #[test]
    fn contains_rule_verdicts() {
        let rule = AcceptRule::Contains {
            success: &["CONNECT OK", "ALREADY CONNECT"],
            failure: &["CONNECT FAIL", "ERROR"],
        };
        assert_eq!(rule.evaluate("OK"), Verdict::Pending);
        assert_eq!(rule.evaluate("0, CONNECT OK"), Verdict::Success);
        assert_eq!(rule.evaluate("0, ALREADY CONNECT"), Verdict::Success);
        assert_eq!(rule.evaluate("0, CONNECT FAIL"), Verdict::Failure);
    }

    // -----------------------------------------------------------------------
    // send
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn send_ok() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"\r\nOK\r\n");
        let mut d = dispatcher(mock);

        let line = d.send("AT", AcceptRule::Default, T).await.unwrap();
        assert_eq!(line, "OK");
    }

    #[tokio::test]
    async fn send_keeps_parameter_case() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CSTT=\"Internet\"\r\n", b"\r\nOK\r\n");
        let mut d = dispatcher(mock);

        d.send("+cstt=\"Internet\"", AcceptRule::Default, T)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn multi_line_reply_and_value_extraction() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CGATT?\r\n", b"\r\n+CGATT: 1\r\n\r\nOK\r\n");
        let mut d = dispatcher(mock);

        d.send("+CGATT?", AcceptRule::Default, T).await.unwrap();
        assert_eq!(d.value("+CGATT").as_deref(), Some("1"));
        assert_eq!(d.value("+COPS"), None);
        assert_eq!(d.transcript(), "+CGATT: 1\r\nOK\r\n");
    }

    #[tokio::test]
    async fn error_reply_is_protocol_error() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CIPMUX=1\r\n", b"\r\nERROR\r\n");
        let mut d = dispatcher(mock);

        let err = d.send("+CIPMUX=1", AcceptRule::Default, T).await.unwrap_err();
        match err {
            Error::Protocol { command, reason } => {
                assert_eq!(command, "AT+CIPMUX=1");
                assert_eq!(reason, "ERROR");
            }
            other => panic!("expected Protocol, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn keyed_error_carries_detail() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CGATT=1\r\n", b"\r\n+CME ERROR: 30\r\n");
        let mut d = dispatcher(mock);

        let err = d.send("+CGATT=1", AcceptRule::Default, T).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { ref reason, .. } if reason == "+CME ERROR: 30"));
    }

    #[tokio::test]
    async fn free_form_line_is_unexpected() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CIICR\r\n", b"\r\nNORMAL POWER DOWN\r\n");
        let mut d = dispatcher(mock);

        let err = d.send("+CIICR", AcceptRule::Default, T).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(ref l) if l == "NORMAL POWER DOWN"));
    }

    #[tokio::test]
    async fn prompt_where_line_expected_is_unexpected() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CGATT?\r\n", b"\r\n> ");
        let mut d = dispatcher(mock);

        let err = d.send("+CGATT?", AcceptRule::Default, T).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(ref l) if l == ">"));
    }

    #[tokio::test]
    async fn silent_modem_times_out() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"");
        let mut d = dispatcher(mock);

        let err = d.send("AT", AcceptRule::Default, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn oversize_command_is_rejected_before_sending() {
        // No expectations: any send would fail with a Transport error.
        let mut d = dispatcher(MockTransport::new());
        let long = format!("+CSTT=\"{}\"", "a".repeat(MAX_COMMAND_LEN));

        let err = d.send(&long, AcceptRule::Default, T).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn stale_input_is_discarded_before_sending() {
        let mut mock = MockTransport::new();
        mock.inject(b"garbage from before\r\nRING\r\npartial");
        mock.expect(b"AT\r\n", b"\r\nOK\r\n");
        let mut d = dispatcher(mock);

        assert_eq!(d.send("AT", AcceptRule::Default, T).await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn byte_at_a_time_delivery_matches_whole_delivery() {
        let mut mock = MockTransport::new();
        mock.set_chunk_size(1);
        mock.expect(b"AT+CGATT?\r\n", b"\r\n+CGATT: 1\r\n\r\nOK\r\n");
        let mut d = dispatcher(mock);

        assert_eq!(d.send("+CGATT?", AcceptRule::Default, T).await.unwrap(), "OK");
        assert_eq!(d.value("+CGATT").as_deref(), Some("1"));
        assert_eq!(d.transcript(), "+CGATT: 1\r\nOK\r\n");
    }

    #[tokio::test]
    async fn contains_rule_waits_past_intermediate_ok() {
        let mut mock = MockTransport::new();
        mock.expect(
            b"AT+CIPSTART=0,\"TCP\",\"example.com\",\"80\"\r\n",
            b"\r\nOK\r\n\r\n0, CONNECT OK\r\n",
        );
        let mut d = dispatcher(mock);
        let rule = AcceptRule::Contains {
            success: &["CONNECT OK", "ALREADY CONNECT"],
            failure: &["CONNECT FAIL", "ERROR"],
        };

        let line = d
            .send("+CIPSTART=0,\"TCP\",\"example.com\",\"80\"", rule, T)
            .await
            .unwrap();
        assert_eq!(line, "0, CONNECT OK");
    }

    #[tokio::test]
    async fn custom_rule_accepts_bare_address() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CIFSR\r\n", b"\r\n10.64.12.7\r\n");
        let mut d = dispatcher(mock);

        let line = d
            .send("+CIFSR", AcceptRule::Custom(ends_with_address), T)
            .await
            .unwrap();
        assert_eq!(line, "10.64.12.7");
    }

    // -----------------------------------------------------------------------
    // Prompt and raw paths
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn prompt_then_raw_write_then_completion() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CIPSEND=0,5\r\n", b"\r\n> ");
        mock.expect(b"hello", b"\r\nSEND OK\r\n");
        let mut d = dispatcher(mock);

        d.send_expect_prompt("+CIPSEND=0,5", T).await.unwrap();
        d.write_raw(b"hello").await.unwrap();
        let rule = AcceptRule::Contains {
            success: &["SEND OK"],
            failure: &["SEND FAIL", "ERROR"],
        };
        let line = d.await_outcome("AT+CIPSEND=0,5", rule, T).await.unwrap();
        assert_eq!(line, "SEND OK");
    }

    #[tokio::test]
    async fn line_instead_of_prompt_is_unexpected() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CIPSEND=0,5\r\n", b"\r\nERROR\r\n");
        let mut d = dispatcher(mock);

        let err = d.send_expect_prompt("+CIPSEND=0,5", T).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(ref l) if l == "ERROR"));
    }

    #[tokio::test]
    async fn raw_read_continues_after_notification_line() {
        let mut mock = MockTransport::new();
        mock.inject(b"+RECEIVE,0,6:\r\nab\r\ncd");
        let mut d = dispatcher(mock);
        let deadline = Instant::now() + T;

        let unit = d.next_unit(deadline).await.unwrap();
        assert_eq!(unit, Unit::Line("+RECEIVE,0,6:".into()));

        let mut payload = [0u8; 6];
        let mut got = 0;
        while got < payload.len() {
            got += d.read_raw(&mut payload[got..], deadline).await.unwrap();
        }
        assert_eq!(&payload, b"ab\r\ncd");
    }

    #[tokio::test]
    async fn next_unit_times_out_without_input() {
        let mut d = dispatcher(MockTransport::new());
        let err = d
            .next_unit(Instant::now() + Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn cancelled_token_aborts_wait() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT\r\n", b"\r\nOK\r\n");
        let mut d = dispatcher(mock);

        d.cancellation_token().cancel();
        let err = d.send("AT", AcceptRule::Default, T).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
