//! Device -- the SIM800 connection manager.
//!
//! [`Device`] owns the AT dispatcher and a fixed table of
//! [`MAX_CONNECTIONS`] connection slots. It brings the GPRS bearer up and
//! down, opens and closes logical TCP/UDP connections, splits outgoing
//! payloads into `+CIPSEND` chunks, and demultiplexes incoming
//! `+RECEIVE,<id>,<len>:` notifications into per-connection buffers.
//!
//! All modem traffic is serialized behind one async mutex: a command
//! exchange and a notification scan never overlap. [`Connection`] handles
//! returned by [`Device::dial`] hold only a weak reference to the device
//! plus their slot id and generation, so dropping the device ends every
//! handle's stream instead of keeping the modem alive.
//!
//! Incoming data is only pulled off the wire when a read finds its buffer
//! empty, or when [`Device::poll_receive`] is called. Each command send
//! discards unread input first, so applications expecting data should read
//! (or poll) before issuing further commands.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use sim800_at::dispatch::canonicalize;
use sim800_at::{AcceptRule, Dispatcher, Unit};
use sim800_core::error::{Error, Result};
use sim800_core::transport::Transport;
use sim800_core::types::{ConnectionKind, ConnectionState, Endpoint, MAX_CONNECTIONS};

use crate::commands::{self, CHUNK_LIMIT};
use crate::connection::Connection;

/// Capacity of each connection's receive buffer.
pub const RECEIVE_CAPACITY: usize = 1024;

/// Scratch size for payload bytes read only to be thrown away.
const DISCARD_CHUNK: usize = 64;

/// Timing parameters for a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Timeout for ordinary command exchanges (default: 10 s).
    pub command_timeout: Duration,
    /// Timeout for network attach, bearer bring-up and connection open
    /// (default: 75 s).
    pub connect_timeout: Duration,
    /// How long a read with an empty buffer waits for a receive
    /// notification to start (default: 100 ms). The payload that follows
    /// is read under `command_timeout`.
    pub receive_timeout: Duration,
    /// Pause between `+CIPSEND` chunks (default: 100 ms).
    pub chunk_delay: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            command_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(75),
            receive_timeout: Duration::from_millis(100),
            chunk_delay: Duration::from_millis(100),
        }
    }
}

// ---------------------------------------------------------------
// Connection records
// ---------------------------------------------------------------

/// One occupied connection slot.
struct Record {
    kind: ConnectionKind,
    state: ConnectionState,
    remote: String,
    generation: u64,
    buf: Box<[u8; RECEIVE_CAPACITY]>,
    len: usize,
    dropped: usize,
}

impl Record {
    fn new(kind: ConnectionKind, remote: &str, generation: u64) -> Self {
        Record {
            kind,
            state: ConnectionState::Connecting,
            remote: remote.to_string(),
            generation,
            buf: Box::new([0u8; RECEIVE_CAPACITY]),
            len: 0,
            dropped: 0,
        }
    }

    /// Move up to `dst.len()` buffered bytes out, compacting the rest to
    /// the front.
    fn take(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len);
        dst[..n].copy_from_slice(&self.buf[..n]);
        self.buf.copy_within(n..self.len, 0);
        self.len -= n;
        n
    }
}

/// A `+RECEIVE` payload that is still arriving.
#[derive(Debug, Clone, Copy)]
struct Drain {
    id: u8,
    /// Generation of the record being filled; `None` when the slot was
    /// empty and the whole payload is thrown away.
    generation: Option<u64>,
    announced: usize,
    /// Bytes still to append to the record.
    keep: usize,
    /// Bytes still to read and drop after those.
    discard: usize,
}

impl Drain {
    /// The record this payload fills, if its slot still holds the same
    /// connection.
    fn target<'a>(&self, slots: &'a mut [Option<Record>]) -> Option<&'a mut Record> {
        let generation = self.generation?;
        slots
            .get_mut(usize::from(self.id))?
            .as_mut()
            .filter(|r| r.generation == generation)
    }
}

/// State shared between the [`Device`] and its [`Connection`] handles.
pub(crate) struct Inner {
    at: Dispatcher,
    config: DeviceConfig,
    /// Local address assigned by the network; empty while the bearer is down.
    address: String,
    slots: [Option<Record>; MAX_CONNECTIONS],
    next_generation: u64,
    /// Payload interrupted by a timeout, resumed by the next scan.
    draining: Option<Drain>,
}

// ---------------------------------------------------------------
// Device
// ---------------------------------------------------------------

/// A SIM800 modem driven over one UART.
///
/// Constructed via [`Sim800Builder`](crate::builder::Sim800Builder).
pub struct Device {
    inner: Arc<Mutex<Inner>>,
    cancel: CancellationToken,
}

impl Device {
    /// Wrap a transport. Prefer the builder; this is its final step.
    pub fn new(transport: Box<dyn Transport>, config: DeviceConfig) -> Self {
        let cancel = CancellationToken::new();
        let inner = Inner {
            at: Dispatcher::new(transport, cancel.clone()),
            config,
            address: String::new(),
            slots: Default::default(),
            next_generation: 0,
            draining: None,
        };
        Device {
            inner: Arc::new(Mutex::new(inner)),
            cancel,
        }
    }

    /// Attach to GPRS and bring up the bearer for `apn`.
    ///
    /// Credentials are sent only when both `user` and `password` are
    /// non-empty. A failure names the step that failed; whatever the modem
    /// already did (such as attaching) is left in place, so calling again
    /// is safe.
    pub async fn connect(&self, apn: &str, user: &str, password: &str) -> Result<()> {
        self.inner.lock().await.connect(apn, user, password).await
    }

    /// Close every connection, tear down the bearer, and detach.
    ///
    /// Every step is attempted even if an earlier one fails; the first
    /// failure is returned.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.lock().await.disconnect().await
    }

    /// Open a connection to `address` (`host:port`) over `network`
    /// (`"tcp"` or `"udp"`) in the lowest free slot.
    pub async fn dial(&self, network: &str, address: &str) -> Result<Connection> {
        let (id, generation, kind) = self.inner.lock().await.dial(network, address).await?;
        Ok(Connection::new(
            Arc::downgrade(&self.inner),
            id,
            generation,
            Endpoint::new(kind, address),
        ))
    }

    /// Close connection `id`. The slot is free afterwards even when the
    /// modem rejects the close command.
    pub async fn close_connection(&self, id: u8) -> Result<()> {
        self.inner.lock().await.close_connection(id).await
    }

    /// Send `data` on connection `id`, in chunks of at most
    /// [`CHUNK_LIMIT`] bytes.
    ///
    /// A failure part-way through is [`Error::PartialWrite`] carrying the
    /// number of bytes the modem confirmed.
    pub async fn send_data(&self, id: u8, data: &[u8]) -> Result<usize> {
        self.inner.lock().await.send_data(id, data).await
    }

    /// Read buffered data for connection `id`.
    ///
    /// With an empty buffer, one notification scan runs first. If nothing
    /// arrives the result is [`Error::WouldBlock`].
    pub async fn connection_read(&self, id: u8, buf: &mut [u8]) -> Result<usize> {
        self.inner.lock().await.connection_read(id, buf).await
    }

    /// Wait up to `timeout` for one receive notification and buffer its
    /// payload.
    ///
    /// Returns the id of the connection that received data, or `None` when
    /// nothing arrived.
    pub async fn poll_receive(&self, timeout: Duration) -> Result<Option<u8>> {
        self.inner.lock().await.poll_receive(timeout).await
    }

    /// Query whether the modem is attached to the packet domain.
    pub async fn is_attached(&self) -> Result<bool> {
        self.inner.lock().await.query_attach().await
    }

    /// State of connection `id`, or `None` when the slot is empty.
    pub async fn connection_state(&self, id: u8) -> Option<ConnectionState> {
        let inner = self.inner.lock().await;
        inner.record(id).ok().map(|r| r.state)
    }

    /// Bytes waiting in connection `id`'s receive buffer.
    pub async fn buffered(&self, id: u8) -> usize {
        let inner = self.inner.lock().await;
        inner.record(id).map_or(0, |r| r.len)
    }

    /// Bytes dropped on connection `id` because its buffer was full.
    pub async fn dropped(&self, id: u8) -> usize {
        let inner = self.inner.lock().await;
        inner.record(id).map_or(0, |r| r.dropped)
    }

    /// Remote `host:port` of connection `id`.
    pub async fn remote_address(&self, id: u8) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.record(id).ok().map(|r| r.remote.clone())
    }

    /// The address assigned by the network, once the bearer is up.
    pub async fn local_address(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.local_address().map(str::to_string)
    }

    /// Close the UART.
    ///
    /// Later operations fail with [`Error::NotConnected`]. The modem's own
    /// connections and bearer are left as they are, so call
    /// [`disconnect`](Self::disconnect) first for an orderly shutdown.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.draining = None;
        info!("closing modem port");
        inner.at.close().await
    }

    /// Whether the UART is still open.
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.at.is_connected()
    }

    /// A clone of the token that aborts every pending wait.
    ///
    /// Cancelling is permanent: later operations fail with
    /// [`Error::Cancelled`] as soon as they would wait.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

// ---------------------------------------------------------------
// Inner: operations under the device lock
// ---------------------------------------------------------------

impl Inner {
    fn record(&self, id: u8) -> Result<&Record> {
        let index = commands::check_id(id)?;
        self.slots[index]
            .as_ref()
            .ok_or(Error::InvalidConnection(id))
    }

    fn record_mut(&mut self, id: u8) -> Result<&mut Record> {
        let index = commands::check_id(id)?;
        self.slots[index]
            .as_mut()
            .ok_or(Error::InvalidConnection(id))
    }

    /// State of slot `id` if it is still held by `generation`.
    pub(crate) fn state_of(&self, id: u8, generation: u64) -> Option<ConnectionState> {
        self.record(id)
            .ok()
            .filter(|r| r.generation == generation)
            .map(|r| r.state)
    }

    pub(crate) fn local_address(&self) -> Option<&str> {
        (!self.address.is_empty()).then_some(self.address.as_str())
    }

    async fn query_attach(&mut self) -> Result<bool> {
        self.exchange(
            &commands::cmd_query_attach(),
            AcceptRule::Default,
            self.config.command_timeout,
        )
        .await?;
        match self.at.value("+CGATT") {
            Some(value) => commands::parse_attach_status(&value),
            None => Err(Error::UnexpectedResponse("no +CGATT value in reply".into())),
        }
    }

    async fn connect(&mut self, apn: &str, user: &str, password: &str) -> Result<()> {
        let bearer = commands::cmd_set_bearer(apn, user, password)?;
        let DeviceConfig {
            command_timeout,
            connect_timeout,
            ..
        } = self.config;

        let attached = self
            .query_attach()
            .await
            .map_err(|e| e.at_step("check GPRS attachment"))?;
        if attached {
            debug!("already attached to GPRS");
        } else {
            info!("attaching to GPRS");
            self.exchange(&commands::cmd_attach(), AcceptRule::Default, connect_timeout)
                .await
                .map_err(|e| e.at_step("attach to GPRS"))?;
        }

        self.exchange(
            &commands::cmd_enable_multiplex(),
            AcceptRule::Default,
            command_timeout,
        )
        .await
        .map_err(|e| e.at_step("enable multi-connection mode"))?;

        self.exchange(&bearer, AcceptRule::Default, command_timeout)
            .await
            .map_err(|e| e.at_step("set APN"))?;

        self.exchange(
            &commands::cmd_bring_up_bearer(),
            AcceptRule::Default,
            connect_timeout,
        )
        .await
        .map_err(|e| e.at_step("bring up wireless connection"))?;

        let address = self
            .exchange(
                &commands::cmd_query_address(),
                commands::ADDRESS_RULE,
                command_timeout,
            )
            .await
            .and_then(|line| commands::parse_address(&line))
            .map_err(|e| e.at_step("get IP address"))?;

        info!(apn = %apn, address = %address, "GPRS bearer up");
        self.address = address;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        for id in 0..MAX_CONNECTIONS as u8 {
            if self.record(id).is_ok() {
                if let Err(e) = self.close_connection(id).await {
                    debug!(id, error = %e, "ignoring close failure during disconnect");
                }
            }
        }

        let timeout = self.config.command_timeout;
        let shut = self
            .exchange(&commands::cmd_teardown_bearer(), commands::SHUT_RULE, timeout)
            .await
            .map_err(|e| e.at_step("shut down PDP context"));
        let detach = self
            .exchange(&commands::cmd_detach(), AcceptRule::Default, timeout)
            .await
            .map_err(|e| e.at_step("detach from GPRS"));
        self.address.clear();

        shut?;
        detach?;
        info!("GPRS bearer down");
        Ok(())
    }

    async fn dial(&mut self, network: &str, address: &str) -> Result<(u8, u64, ConnectionKind)> {
        if self.address.is_empty() {
            return Err(Error::NoAddress);
        }
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::MaxConnections)?;
        let id = index as u8;
        let kind: ConnectionKind = network
            .parse()
            .map_err(|e: sim800_core::ParseKindError| Error::InvalidParameter(e.to_string()))?;
        let (host, port) = commands::split_address(address)?;

        self.next_generation += 1;
        let generation = self.next_generation;
        self.slots[index] = Some(Record::new(kind, address, generation));

        debug!(id, kind = %kind, remote = %address, "opening connection");
        let result = self
            .exchange(
                &commands::cmd_open_connection(id, kind, &host, &port),
                commands::OPEN_RULE,
                self.config.connect_timeout,
            )
            .await;

        match result {
            Ok(line) => {
                if let Some(record) = self.slots[index].as_mut() {
                    record.state = ConnectionState::Connected;
                }
                if line.contains("ALREADY CONNECT") {
                    debug!(id, "modem reports the connection was already open");
                }
                info!(id, kind = %kind, remote = %address, "connection established");
                Ok((id, generation, kind))
            }
            Err(e) => {
                self.slots[index] = None;
                warn!(id, remote = %address, error = %e, "connection failed");
                Err(e)
            }
        }
    }

    pub(crate) async fn close_connection(&mut self, id: u8) -> Result<()> {
        let index = commands::check_id(id)?;
        let record = self.slots[index]
            .as_mut()
            .ok_or(Error::InvalidConnection(id))?;
        record.state = ConnectionState::Closing;
        debug!(
            id,
            kind = %record.kind,
            remote = %record.remote,
            unread = record.len,
            "closing connection"
        );

        let result = self
            .exchange(
                &commands::cmd_close_connection(id),
                commands::CLOSE_RULE,
                self.config.command_timeout,
            )
            .await;
        self.slots[index] = None;

        match result {
            Ok(_) => {
                debug!(id, "connection closed");
                Ok(())
            }
            Err(e) => {
                warn!(id, error = %e, "close command failed, slot freed anyway");
                Err(e)
            }
        }
    }

    pub(crate) async fn send_data(&mut self, id: u8, data: &[u8]) -> Result<usize> {
        if self.record(id)?.state != ConnectionState::Connected {
            return Err(Error::NotEstablished);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let mut sent = 0;
        for chunk in data.chunks(CHUNK_LIMIT) {
            if let Err(e) = self.send_chunk(id, chunk, sent > 0).await {
                warn!(id, sent, total = data.len(), error = %e, "send aborted");
                return Err(Error::PartialWrite {
                    sent,
                    source: Box::new(e),
                });
            }
            sent += chunk.len();
            trace!(id, sent, total = data.len(), "chunk accepted");
        }
        debug!(id, bytes = sent, "data sent");
        Ok(sent)
    }

    async fn send_chunk(&mut self, id: u8, chunk: &[u8], paced: bool) -> Result<()> {
        if paced {
            let cancel = self.at.cancellation_token();
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(Error::Cancelled),

                _ = tokio::time::sleep(self.config.chunk_delay) => {}
            }
        }

        let command = commands::cmd_prepare_send(id, chunk.len());
        let timeout = self.config.command_timeout;
        self.abandon_drain();
        self.at.send_expect_prompt(&command, timeout).await?;
        self.at.write_raw(chunk).await?;
        self.at
            .await_outcome(&canonicalize(&command), commands::SEND_RULE, timeout)
            .await?;
        Ok(())
    }

    pub(crate) async fn connection_read(&mut self, id: u8, buf: &mut [u8]) -> Result<usize> {
        if self.record(id)?.len == 0 {
            match self.demux(self.config.receive_timeout).await {
                Ok(_) | Err(Error::Timeout) => {}
                Err(e @ Error::ReceiveOverflow { .. }) => {
                    warn!(error = %e, "delivering truncated data");
                }
                Err(e @ Error::InvalidConnection(_)) => {
                    warn!(id, error = %e, "skipped data addressed to another connection");
                }
                Err(e) => return Err(e),
            }
        }

        let record = self.record_mut(id)?;
        if record.len == 0 {
            return Err(Error::WouldBlock);
        }
        Ok(record.take(buf))
    }

    async fn poll_receive(&mut self, timeout: Duration) -> Result<Option<u8>> {
        match self.demux(timeout).await {
            Ok(id) => Ok(Some(id)),
            Err(Error::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Run one command exchange. The exchange flushes unread input, so a
    /// pending drain is given up first.
    async fn exchange(
        &mut self,
        command: &str,
        rule: AcceptRule,
        timeout: Duration,
    ) -> Result<String> {
        self.abandon_drain();
        self.at.send(command, rule, timeout).await
    }

    fn abandon_drain(&mut self) {
        let Some(drain) = self.draining.take() else {
            return;
        };
        if let Some(record) = drain.target(&mut self.slots) {
            record.dropped += drain.keep;
        }
        warn!(
            id = drain.id,
            bytes = drain.keep + drain.discard,
            "command issued before the payload arrived, rest of it is lost"
        );
    }

    /// Move one `+RECEIVE` payload into the addressed connection's buffer.
    ///
    /// Seeking for the preamble is bounded by `timeout`; lines other than
    /// the preamble are skipped, and [`Error::Timeout`] there means nothing
    /// was pending. The payload itself gets `command_timeout`, since a full
    /// buffer takes about a second at 9600 baud. A payload that still
    /// times out is resumed by the next call instead of being framed as
    /// text.
    async fn demux(&mut self, timeout: Duration) -> Result<u8> {
        let mut drain = match self.draining.take() {
            Some(drain) => {
                debug!(
                    id = drain.id,
                    remaining = drain.keep + drain.discard,
                    "resuming payload"
                );
                drain
            }
            None => self.seek(Instant::now() + timeout).await?,
        };

        let deadline = Instant::now() + self.config.command_timeout;
        if let Err(e) = self.pull(&mut drain, deadline).await {
            debug!(
                id = drain.id,
                remaining = drain.keep + drain.discard,
                error = %e,
                "payload incomplete"
            );
            self.draining = Some(drain);
            return Err(e);
        }

        let Drain { id, announced, .. } = drain;
        if drain.generation.is_none() {
            return Err(Error::InvalidConnection(id));
        }
        if announced > RECEIVE_CAPACITY {
            warn!(
                id,
                announced,
                capacity = RECEIVE_CAPACITY,
                "receive buffer full, excess dropped"
            );
            return Err(Error::ReceiveOverflow {
                id,
                announced,
                capacity: RECEIVE_CAPACITY,
            });
        }
        debug!(id, bytes = announced, "received data");
        Ok(id)
    }

    /// Find the next `+RECEIVE,<id>,<len>:` preamble and plan where its
    /// payload goes.
    async fn seek(&mut self, deadline: Instant) -> Result<Drain> {
        let (id, announced) = loop {
            let line = match self.at.next_unit(deadline).await? {
                Unit::Line(line) => line,
                Unit::Prompt => {
                    debug!("ignoring stray prompt while waiting for data");
                    continue;
                }
            };
            match commands::parse_receive_preamble(&line)? {
                Some(preamble) => break preamble,
                None => debug!(line = %line, "ignoring line while waiting for data"),
            }
        };

        let Some(record) = self
            .slots
            .get_mut(usize::from(id))
            .and_then(Option::as_mut)
        else {
            warn!(id, bytes = announced, "data for unknown connection, discarding");
            return Ok(Drain {
                id,
                generation: None,
                announced,
                keep: 0,
                discard: announced,
            });
        };
        if announced == 0 {
            return Err(Error::UnexpectedResponse(format!("+RECEIVE,{id},0:")));
        }

        if record.len > 0 {
            warn!(id, bytes = record.len, "new data replaces unread data");
            record.dropped += record.len;
            record.len = 0;
        }
        let keep = announced.min(RECEIVE_CAPACITY);
        record.dropped += announced - keep;
        Ok(Drain {
            id,
            generation: Some(record.generation),
            announced,
            keep,
            discard: announced - keep,
        })
    }

    /// Read the rest of a payload off the wire, recording progress in
    /// `drain` as bytes arrive.
    async fn pull(&mut self, drain: &mut Drain, deadline: Instant) -> Result<()> {
        while drain.keep > 0 {
            let Some(record) = drain.target(&mut self.slots) else {
                debug!(
                    id = drain.id,
                    bytes = drain.keep,
                    "connection gone mid-payload, discarding"
                );
                drain.discard += drain.keep;
                drain.keep = 0;
                break;
            };
            // `record.len + drain.keep` never exceeds the capacity: both
            // start from the announced length and reads only shrink `len`.
            let end = record.len + drain.keep;
            let n = self
                .at
                .read_raw(&mut record.buf[record.len..end], deadline)
                .await?;
            record.len += n;
            drain.keep -= n;
        }

        let mut sink = [0u8; DISCARD_CHUNK];
        while drain.discard > 0 {
            let want = drain.discard.min(sink.len());
            drain.discard -= self.at.read_raw(&mut sink[..want], deadline).await?;
        }
        Ok(())
    }
}
