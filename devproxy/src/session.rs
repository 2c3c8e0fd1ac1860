//! A connection to a proxy relay.
//!
//! [`Session::connect`] splits a [`Transport`] and spawns two tasks on the
//! current tokio runtime:
//!
//! - a reader that decodes inbound frames and dispatches them, completing
//!   pending requests and routing stream traffic to [`Link`]s;
//! - a writer that drains the bounded outbound queue into the transport.
//!
//! Dropping the last handle (sessions and links both hold one) stops both
//! tasks.

use std::any::type_name;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use devproxy_proto::{
    CodecKind, Content, LinkRequest, LinkResponse, Message, PingRequest, PingResponse, Reference,
    SocketAddress, SocketInfo, browse_service,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::browse::Browser;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::link::{Link, LinkEvent, OpenOptions};
use crate::pending::{CorrelationKey, PendingTable, SequenceCounter};
use crate::transport::{FrameRead, FrameWrite, Transport};

/// Stream traffic sinks by link or stream id.
type Routes = DashMap<Reference, mpsc::UnboundedSender<LinkEvent>>;

/// Per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Response timeout; the session default when unset.
    pub timeout: Option<Duration>,
    /// Aborts the wait with [`Error::Cancelled`] when fired.
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    /// Sets the response timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// A handle to a running session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Session {
    /// Shared state.
    inner: Arc<Inner>,
}

/// Session state shared by all handles.
#[derive(Debug)]
struct Inner {
    /// Effective configuration.
    config: SessionConfig,
    /// This client's reference, used as the source of every message.
    source: Reference,
    /// Request sequence ids.
    sequence: SequenceCounter,
    /// Outstanding requests.
    pending: Arc<PendingTable>,
    /// Stream traffic sinks.
    routes: Arc<Routes>,
    /// Encoded frames for the writer task.
    outbound: mpsc::Sender<Vec<u8>>,
    /// Stops the reader and writer tasks.
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Session {
    /// Starts a session over `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<T: Transport>(transport: T, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let (reader, writer) = transport.into_split();
        let (outbound, queue) = mpsc::channel(config.outbound_queue);
        let shutdown = CancellationToken::new();
        let source = config.source.unwrap_or_else(Reference::new);

        let dispatch = Dispatch {
            codec: config.codec,
            max_frame: config.max_frame,
            pending: Arc::new(PendingTable::new()),
            routes: Arc::new(DashMap::new()),
        };
        let inner = Inner {
            config,
            source,
            sequence: SequenceCounter::new(),
            pending: Arc::clone(&dispatch.pending),
            routes: Arc::clone(&dispatch.routes),
            outbound,
            shutdown: shutdown.clone(),
        };

        tokio::spawn(read_loop(reader, dispatch, shutdown.clone()));
        tokio::spawn(write_loop(writer, queue, shutdown));
        tracing::debug!(source = %source, codec = %inner.config.codec, "session started");

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// This client's reference.
    pub fn source(&self) -> Reference {
        self.inner.source
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Returns `true` once the session has shut down.
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Probes `address` from the proxy.
    pub async fn ping(&self, proxy: Reference, address: SocketAddress) -> Result<PingResponse> {
        self.request(proxy, Reference::NULL, PingRequest { address }, &CallOptions::default())
            .await
    }

    /// Asks the proxy to create a remote socket and returns a link to it.
    pub async fn link(&self, proxy: Reference, info: SocketInfo) -> Result<Link> {
        let resp: LinkResponse = self
            .request(proxy, Reference::NULL, LinkRequest::new(info), &CallOptions::default())
            .await?;
        Ok(Link::new(self.clone(), proxy, resp))
    }

    /// Opens a stream to the proxy's browse service.
    pub async fn browse(&self, proxy: Reference) -> Result<Browser> {
        let mut link = self.link(proxy, SocketInfo::stream(browse_service())).await?;
        link.open(OpenOptions::default()).await?;
        Ok(Browser::new(link, self.inner.config.codec))
    }

    /// Sends `content` to `target` via `proxy` and waits for the response
    /// payload.
    pub async fn call(
        &self,
        proxy: Reference,
        target: Reference,
        content: impl Into<Content>,
        opts: &CallOptions,
    ) -> Result<Content> {
        let seq = self.inner.sequence.next();
        let msg = Message::new(self.inner.source, target, content)
            .with_proxy(proxy)
            .with_sequence(seq);
        let guard = self.inner.pending.register(CorrelationKey::new(target, seq), proxy);
        self.send(msg).await?;

        let timeout = opts
            .timeout
            .unwrap_or_else(|| self.inner.config.request_timeout_duration());
        let cancel = opts.cancel.clone().unwrap_or_default();
        let resp = guard.wait(timeout, &cancel).await?;
        if resp.error != 0 {
            return Err(Error::Remote { code: resp.error });
        }
        resp.into_content().ok_or(Error::UnexpectedContent {
            expected: "catalog",
            found: "unknown type",
        })
    }

    /// Like [`call`](Self::call), but also checks the payload type.
    pub async fn request<T>(
        &self,
        proxy: Reference,
        target: Reference,
        content: impl Into<Content>,
        opts: &CallOptions,
    ) -> Result<T>
    where
        T: TryFrom<Content, Error = Content>,
    {
        let resp = self.call(proxy, target, content, opts).await?;
        T::try_from(resp).map_err(|other| Error::UnexpectedContent {
            expected: short_type_name::<T>(),
            found: other.name(),
        })
    }

    /// Encodes and queues `msg`, waiting for queue space.
    pub async fn send(&self, msg: Message) -> Result<()> {
        let frame = self.encode(&msg)?;
        self.inner
            .outbound
            .send(frame)
            .await
            .map_err(|_| Error::Closed)
    }

    /// Encodes and queues `msg` without waiting.
    ///
    /// Fails with [`Error::Closed`] if the session is gone or the queue
    /// is full.
    pub fn post(&self, msg: &Message) -> Result<()> {
        let frame = self.encode(msg)?;
        self.inner.outbound.try_send(frame).map_err(|_| Error::Closed)
    }

    /// Shuts the session down.
    ///
    /// Outstanding requests fail with [`Error::Closed`] and every link
    /// sees the end of its stream.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.pending.close_all();
        self.inner.routes.clear();
    }

    /// Encodes `msg`, enforcing the frame limit.
    fn encode(&self, msg: &Message) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let frame = msg.to_vec(self.inner.config.codec)?;
        if frame.len() > self.inner.config.max_frame {
            return Err(Error::FrameTooLarge {
                size: frame.len(),
                max: self.inner.config.max_frame,
            });
        }
        Ok(frame)
    }

    /// Routes stream traffic for `id` to `sink`.
    pub(crate) fn add_route(&self, id: Reference, sink: mpsc::UnboundedSender<LinkEvent>) {
        self.inner.routes.insert(id, sink);
    }

    /// Returns the sink stream traffic for `id` is routed to.
    pub(crate) fn route(&self, id: Reference) -> Option<mpsc::UnboundedSender<LinkEvent>> {
        self.inner.routes.get(&id).map(|sink| sink.clone())
    }

    /// Stops routing stream traffic for `id`.
    pub(crate) fn remove_route(&self, id: Reference) {
        self.inner.routes.remove(&id);
    }
}

/// Returns the last path segment of `T`'s name.
fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Inbound message handling, owned by the reader task.
#[derive(Debug)]
struct Dispatch {
    /// Wire format.
    codec: CodecKind,
    /// Largest accepted frame.
    max_frame: usize,
    /// Outstanding requests.
    pending: Arc<PendingTable>,
    /// Stream traffic sinks.
    routes: Arc<Routes>,
}

impl Dispatch {
    /// Decodes and dispatches one frame. Malformed frames are dropped.
    fn frame(&self, bytes: &[u8]) {
        if bytes.len() > self.max_frame {
            tracing::warn!(len = bytes.len(), max = self.max_frame, "dropping oversized frame");
            return;
        }
        let msg = match Message::from_slice(self.codec, bytes) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, len = bytes.len(), "dropping undecodable frame");
                return;
            }
        };
        tracing::debug!(
            source = %msg.source,
            target = %msg.target,
            seq = msg.sequence_id,
            type_id = msg.type_id,
            response = msg.is_response,
            "frame received"
        );
        self.message(msg);
    }

    /// Dispatches a decoded message.
    fn message(&self, msg: Message) {
        if matches!(msg.content, Some(Content::Data(_))) {
            self.route(msg);
            return;
        }
        if !msg.is_response {
            tracing::debug!(type_id = msg.type_id, "ignoring request from proxy");
            return;
        }
        if self.is_close_notice(&msg) {
            self.route(msg);
            return;
        }
        // Responses of unknown type still complete their request.
        if let Err(msg) = self.pending.complete(msg) {
            tracing::debug!(
                source = %msg.source,
                seq = msg.sequence_id,
                "discarding response with no pending request"
            );
        }
    }

    /// Returns `true` if `msg` is a link's close notice rather than the
    /// answer to a request sent to that link.
    ///
    /// Notices are routed by stream, never by sequence id, so one cannot
    /// complete an unrelated request that shares its id.
    fn is_close_notice(&self, msg: &Message) -> bool {
        matches!(msg.content, Some(Content::CloseResponse(_)))
            && (self.routes.contains_key(&msg.target) || self.routes.contains_key(&msg.source))
            && !self
                .pending
                .contains(&CorrelationKey::new(msg.source, msg.sequence_id))
    }

    /// Forwards stream traffic to the link it belongs to.
    fn route(&self, msg: Message) {
        let id = if self.routes.contains_key(&msg.target) {
            msg.target
        } else {
            msg.source
        };
        let event = match msg.content {
            Some(Content::Data(data)) => LinkEvent::Data(data),
            Some(Content::CloseResponse(stats)) => LinkEvent::Closed(stats),
            _ => return,
        };
        let delivered = self
            .routes
            .get(&id)
            .is_some_and(|sink| sink.send(event).is_ok());
        if !delivered {
            self.routes.remove(&id);
            tracing::debug!(stream = %id, "no receiver for stream traffic");
        }
    }

    /// Fails outstanding requests and ends every link's stream.
    fn shutdown(&self) {
        self.pending.close_all();
        self.routes.clear();
    }
}

/// Reads and dispatches frames until the transport or session ends.
async fn read_loop<R: FrameRead>(mut reader: R, dispatch: Dispatch, shutdown: CancellationToken) {
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => break,
            frame = reader.read_frame() => frame,
        };
        match frame {
            Ok(Some(bytes)) => dispatch.frame(&bytes),
            Ok(None) => {
                tracing::debug!("transport closed by peer");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "transport read failed");
                break;
            }
        }
    }
    dispatch.shutdown();
    shutdown.cancel();
}

/// Writes queued frames until the queue closes or the session ends.
async fn write_loop<W: FrameWrite>(
    mut writer: W,
    mut queue: mpsc::Receiver<Vec<u8>>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => break,
            frame = queue.recv() => frame,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = writer.write_frame(&frame).await {
            tracing::warn!(error = %e, "transport write failed");
            break;
        }
    }
    shutdown.cancel();
}
