//! Links to remote sockets and the streams opened over them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use devproxy_proto::{
    CloseRequest, CloseResponse, DataMessage, GetOptRequest, GetOptResponse, LinkResponse,
    Message, OpenRequest, OpenResponse, PollRequest, PollResponse, Property, Reference,
    SetOptRequest, SetOptResponse, SocketAddress, SocketOption,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::error::{Error, Result};
use crate::session::{CallOptions, Session};

/// Stream traffic delivered to a link by the session reader.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    /// Inbound data.
    Data(DataMessage),
    /// The proxy closed the link.
    Closed(CloseResponse),
}

/// Why a link ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CloseReason {
    /// [`Link::close`] was called.
    Local,
    /// The proxy closed the link.
    Remote,
    /// The session shut down underneath the link.
    SessionClosed,
}

/// Final statistics of a closed link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStats {
    /// Statistics reported by the proxy.
    pub remote: CloseResponse,
    /// Payload bytes this client sent.
    pub bytes_sent: u64,
    /// Payload bytes this client received.
    pub bytes_received: u64,
    /// How long the link was open on this side.
    pub open_for: Duration,
    /// Why the link ended.
    pub reason: CloseReason,
}

/// Live byte counters of a link.
#[derive(Debug)]
pub struct LinkStats {
    /// Payload bytes sent.
    sent: AtomicU64,
    /// Payload bytes received.
    received: AtomicU64,
    /// When the link was created.
    opened: Instant,
}

impl LinkStats {
    /// Starts counting from now.
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            opened: Instant::now(),
        }
    }

    /// Payload bytes sent so far.
    pub fn bytes_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Payload bytes received so far.
    pub fn bytes_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Time since the link was created.
    pub fn elapsed(&self) -> Duration {
        self.opened.elapsed()
    }

    /// Adds `n` to the sent counter.
    fn add_sent(&self, n: usize) {
        self.sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Adds `n` to the received counter.
    fn add_received(&self, n: usize) {
        self.received.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Parameters of [`Link::open`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Stream kind (0 = raw socket stream).
    pub stream_type: i32,
    /// Relay endpoint for the stream.
    pub connection_string: String,
    /// Deliver data only in response to polls.
    pub polled: bool,
    /// Largest data message accepted, in bytes.
    pub max_receive_buffer: u64,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            stream_type: 0,
            connection_string: String::new(),
            polled: false,
            max_receive_buffer: 64 * 1024,
        }
    }
}

impl OpenOptions {
    /// Sets the relay endpoint.
    #[must_use]
    pub fn connection_string(mut self, s: impl Into<String>) -> Self {
        self.connection_string = s.into();
        self
    }

    /// Enables polled delivery.
    #[must_use]
    pub const fn polled(mut self, polled: bool) -> Self {
        self.polled = polled;
        self
    }

    /// Sets the receive buffer limit.
    #[must_use]
    pub const fn max_receive_buffer(mut self, bytes: u64) -> Self {
        self.max_receive_buffer = bytes;
        self
    }
}

/// A remote socket created by [`Session::link`].
///
/// Data flows after [`open`](Self::open). Dropping an unclosed link sends
/// a best-effort close to the proxy.
#[derive(Debug)]
pub struct Link {
    /// Owning session.
    session: Session,
    /// Proxy hosting the socket.
    proxy: Reference,
    /// Link identifier assigned by the proxy.
    id: Reference,
    /// Stream identifier once opened.
    stream_id: Option<Reference>,
    /// Remote socket's local address.
    local_address: SocketAddress,
    /// Remote socket's peer address.
    peer_address: SocketAddress,
    /// Whether data must be polled for.
    polled: bool,
    /// Inbound traffic, fed by the session's route for this link.
    events: mpsc::UnboundedReceiver<LinkEvent>,
    /// Next outbound data sequence number.
    next_sequence: AtomicU64,
    /// Byte counters.
    stats: LinkStats,
    /// Set once the link has ended.
    closed: Option<CloseStats>,
}

impl Link {
    /// Wraps a successful link response.
    pub(crate) fn new(session: Session, proxy: Reference, resp: LinkResponse) -> Self {
        let (sink, events) = mpsc::unbounded_channel();
        session.add_route(resp.link_id, sink);
        tracing::info!(link = %resp.link_id, peer = %resp.peer_address, "link created");
        Self {
            session,
            proxy,
            id: resp.link_id,
            stream_id: None,
            local_address: resp.local_address,
            peer_address: resp.peer_address,
            polled: false,
            events,
            next_sequence: AtomicU64::new(0),
            stats: LinkStats::new(),
            closed: None,
        }
    }

    /// Link identifier.
    pub const fn id(&self) -> Reference {
        self.id
    }

    /// Proxy hosting the remote socket.
    pub const fn proxy(&self) -> Reference {
        self.proxy
    }

    /// Stream identifier, once opened.
    pub const fn stream_id(&self) -> Option<Reference> {
        self.stream_id
    }

    /// Address the remote socket is bound to.
    pub const fn local_address(&self) -> &SocketAddress {
        &self.local_address
    }

    /// Address the remote socket is connected to.
    pub const fn peer_address(&self) -> &SocketAddress {
        &self.peer_address
    }

    /// Live byte counters.
    pub const fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Returns `true` once the link has ended.
    pub const fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Opens the data stream.
    ///
    /// A link carries at most one stream; a second call fails with
    /// [`Error::AlreadyOpen`].
    pub async fn open(&mut self, opts: OpenOptions) -> Result<()> {
        self.ensure_open()?;
        if let Some(stream_id) = self.stream_id {
            return Err(Error::AlreadyOpen(stream_id));
        }
        let sink = self.session.route(self.id).ok_or(Error::Closed)?;
        let stream_id = Reference::new();
        // Route before asking so data sent right after the response lands.
        self.session.add_route(stream_id, sink);
        let req = OpenRequest {
            stream_id,
            stream_type: opts.stream_type,
            connection_string: opts.connection_string,
            is_polled: opts.polled,
            max_receive_buffer: opts.max_receive_buffer,
        };
        let res: Result<OpenResponse> = self
            .session
            .request(self.proxy, self.id, req, &CallOptions::default())
            .await;
        if let Err(e) = res {
            self.session.remove_route(stream_id);
            return Err(e);
        }
        self.stream_id = Some(stream_id);
        self.polled = opts.polled;
        tracing::info!(link = %self.id, stream = %stream_id, polled = opts.polled, "stream opened");
        Ok(())
    }

    /// Sends `payload` to the connected peer.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.send_to(SocketAddress::Unspecified, payload, Vec::new())
            .await
    }

    /// Sends `payload` with ancillary `control` data to `address`.
    pub async fn send_to(
        &self,
        address: SocketAddress,
        payload: impl Into<Vec<u8>>,
        control: Vec<u8>,
    ) -> Result<()> {
        let (msg, len) = self.data_message(address, payload.into(), control)?;
        self.session.send(msg).await?;
        self.stats.add_sent(len);
        Ok(())
    }

    /// Queues `payload` without waiting for outbound queue space.
    pub fn try_send(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let (msg, len) = self.data_message(SocketAddress::Unspecified, payload.into(), Vec::new())?;
        self.session.post(&msg)?;
        self.stats.add_sent(len);
        Ok(())
    }

    /// Builds the next outbound data message and returns it with its
    /// payload length.
    fn data_message(
        &self,
        address: SocketAddress,
        payload: Vec<u8>,
        control: Vec<u8>,
    ) -> Result<(Message, usize)> {
        self.ensure_open()?;
        let len = payload.len();
        let data = DataMessage {
            sequence_number: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            source_address: address,
            payload,
            control,
        };
        let msg = Message::new(self.session.source(), self.data_target(), data)
            .with_proxy(self.proxy);
        Ok((msg, len))
    }

    /// Receives the next data message.
    ///
    /// Returns `None` once the link has closed. On a polled stream an
    /// empty queue grants the proxy one round of delivery by polling.
    pub async fn recv(&mut self) -> Result<Option<DataMessage>> {
        loop {
            if self.closed.is_some() {
                return Ok(None);
            }
            let event = match self.events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) if self.polled => match self.poll_for_event().await? {
                    Some(event) => event,
                    None => continue,
                },
                Err(TryRecvError::Empty) => match self.events.recv().await {
                    Some(event) => event,
                    None => continue,
                },
                Err(TryRecvError::Disconnected) => {
                    self.teardown(CloseReason::SessionClosed, CloseResponse::default());
                    continue;
                }
            };
            match event {
                LinkEvent::Data(data) => {
                    self.stats.add_received(data.payload.len());
                    return Ok(Some(data));
                }
                LinkEvent::Closed(remote) => {
                    self.teardown(CloseReason::Remote, remote);
                }
            }
        }
    }

    /// Sends one poll and waits for either traffic or the end of the round.
    ///
    /// Returns `None` when the round ended without traffic.
    async fn poll_for_event(&mut self) -> Result<Option<LinkEvent>> {
        let timeout_ms = self.session.config().poll_timeout_ms;
        let opts = CallOptions::default().timeout(
            self.session.config().request_timeout_duration() + Duration::from_millis(timeout_ms),
        );
        let target = self.data_target();
        let poll = self.session.request::<PollResponse>(
            self.proxy,
            target,
            PollRequest { timeout_ms },
            &opts,
        );
        tokio::select! {
            biased;
            event = self.events.recv() => Ok(event),
            res = poll => res.map(|PollResponse {}| None),
        }
    }

    /// Reads a socket option.
    pub async fn get_option(&self, option: SocketOption) -> Result<Property> {
        self.ensure_open()?;
        let resp: GetOptResponse = self
            .session
            .request(self.proxy, self.id, GetOptRequest { option }, &CallOptions::default())
            .await?;
        Ok(resp.option_value)
    }

    /// Writes a socket option.
    pub async fn set_option(&self, option_value: Property) -> Result<()> {
        self.ensure_open()?;
        let _: SetOptResponse = self
            .session
            .request(self.proxy, self.id, SetOptRequest { option_value }, &CallOptions::default())
            .await?;
        Ok(())
    }

    /// Closes the link and returns its statistics.
    ///
    /// Closing an already closed link returns the stored statistics
    /// without contacting the proxy.
    pub async fn close(&mut self) -> Result<CloseStats> {
        if let Some(stats) = &self.closed {
            return Ok(stats.clone());
        }
        // A close notice may already be queued behind unread data.
        while let Ok(event) = self.events.try_recv() {
            if let LinkEvent::Closed(remote) = event {
                return Ok(self.teardown(CloseReason::Remote, remote));
            }
        }
        let res: Result<CloseResponse> = self
            .session
            .request(self.proxy, self.id, CloseRequest {}, &CallOptions::default())
            .await;
        match res {
            Ok(remote) => Ok(self.teardown(CloseReason::Local, remote)),
            Err(e) => {
                self.teardown(CloseReason::Local, CloseResponse::default());
                Err(e)
            }
        }
    }

    /// Deregisters the link and records its final statistics.
    fn teardown(&mut self, reason: CloseReason, remote: CloseResponse) -> CloseStats {
        self.session.remove_route(self.id);
        if let Some(stream_id) = self.stream_id {
            self.session.remove_route(stream_id);
        }
        self.events.close();
        let stats = CloseStats {
            remote,
            bytes_sent: self.stats.bytes_sent(),
            bytes_received: self.stats.bytes_received(),
            open_for: self.stats.elapsed(),
            reason,
        };
        tracing::info!(
            link = %self.id,
            reason = ?reason,
            sent = stats.bytes_sent,
            received = stats.bytes_received,
            remote_sent = remote.bytes_sent,
            remote_received = remote.bytes_received,
            "link closed"
        );
        self.closed = Some(stats.clone());
        stats
    }

    /// Fails with [`Error::Closed`] once the link has ended.
    fn ensure_open(&self) -> Result<()> {
        if self.closed.is_some() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Where data messages are addressed.
    fn data_target(&self) -> Reference {
        self.stream_id.unwrap_or(self.id)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if self.closed.is_some() {
            return;
        }
        self.session.remove_route(self.id);
        if let Some(stream_id) = self.stream_id {
            self.session.remove_route(stream_id);
        }
        if !self.session.is_closed() {
            let msg = Message::new(self.session.source(), self.id, CloseRequest {})
                .with_proxy(self.proxy);
            if let Err(e) = self.session.post(&msg) {
                tracing::debug!(link = %self.id, error = %e, "close on drop not sent");
            }
        }
    }
}
