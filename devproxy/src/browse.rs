//! Name resolution and service discovery through the proxy's browse
//! service.
//!
//! Requests and results are encoded objects carried in the data payloads
//! of a stream opened to [`browse_service`](devproxy_proto::browse_service).
//! Results for one request share its handle and end with a response
//! flagged `ALL_FOR_NOW` or `EOS`.

use std::collections::VecDeque;

use devproxy_proto::{
    BrowseFlags, BrowseRequest, BrowseResponse, BrowseType, CodecKind, ObjectBuffer, Reference,
    SocketAddress, codec,
};

use crate::error::{Error, Result};
use crate::link::{CloseStats, Link};

/// One step of a browse.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BrowseEvent {
    /// A result, possibly flagged `REMOVED`.
    Item(BrowseResponse),
    /// The current batch of results is complete.
    Done(BrowseFlags),
}

/// A stream to a proxy's browse service, created by
/// [`Session::browse`](crate::Session::browse).
#[derive(Debug)]
pub struct Browser {
    /// The browse service stream.
    link: Link,
    /// Wire format of requests and results.
    codec: CodecKind,
    /// Partially received results.
    objects: ObjectBuffer<BrowseResponse>,
    /// Decoded results not yet handed out.
    queued: VecDeque<BrowseResponse>,
}

impl Browser {
    /// Wraps an opened link to the browse service.
    pub(crate) fn new(link: Link, codec: CodecKind) -> Self {
        Self {
            link,
            codec,
            objects: ObjectBuffer::new(codec),
            queued: VecDeque::new(),
        }
    }

    /// Starts a browse and returns the stream of its results.
    pub async fn start(
        &mut self,
        browse_type: BrowseType,
        item: SocketAddress,
        flags: u32,
    ) -> Result<BrowseStream<'_>> {
        let mut req = BrowseRequest::new(browse_type, item);
        req.flags = flags;
        let handle = req.handle;
        self.link.send(codec::to_vec(self.codec, &req)?).await?;
        tracing::debug!(handle = %handle, browse_type = ?browse_type, "browse started");
        Ok(BrowseStream {
            browser: self,
            handle,
            state: State::Running,
        })
    }

    /// Resolves `host` to addresses.
    pub async fn resolve(&mut self, host: &str) -> Result<BrowseStream<'_>> {
        self.start(BrowseType::Resolve, SocketAddress::proxy(host, 0), 0)
            .await
    }

    /// Enumerates instances of `service_type` (e.g. `_ipp._tcp`).
    pub async fn services(&mut self, service_type: &str) -> Result<BrowseStream<'_>> {
        self.start(BrowseType::Service, SocketAddress::proxy(service_type, 0), 0)
            .await
    }

    /// Lists the directory `path` on the proxy host.
    pub async fn dirpath(&mut self, path: &str) -> Result<BrowseStream<'_>> {
        self.start(BrowseType::Dirpath, SocketAddress::Unix { path: path.into() }, 0)
            .await
    }

    /// Closes the browse service stream.
    pub async fn close(mut self) -> Result<CloseStats> {
        self.link.close().await
    }

    /// Returns the next queued or received result for `handle`.
    ///
    /// Results for other handles belong to cancelled browses and are
    /// dropped. `None` means the link closed.
    async fn next_response(&mut self, handle: Reference) -> Result<Option<BrowseResponse>> {
        loop {
            while let Some(resp) = self.queued.pop_front() {
                if resp.handle == handle {
                    return Ok(Some(resp));
                }
                tracing::debug!(handle = %resp.handle, "dropping result of a finished browse");
            }
            let Some(data) = self.link.recv().await? else {
                return Ok(None);
            };
            self.objects.extend(&data.payload);
            while let Some(resp) = self.objects.next_object()? {
                self.queued.push_back(resp);
            }
        }
    }

    /// Queues a cancel for `handle` without waiting.
    fn post_cancel(&self, handle: Reference) -> Result<()> {
        let bytes = codec::to_vec(self.codec, &BrowseRequest::cancel(handle))?;
        self.link.try_send(bytes)
    }
}

/// Progress of a [`BrowseStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Results may still arrive.
    Running,
    /// The last item carried terminal flags; report them next.
    Finishing(BrowseFlags),
    /// The terminal event was reported or the browse was cancelled.
    Finished,
}

/// Results of one browse request.
///
/// Dropping an unfinished stream cancels the browse.
#[derive(Debug)]
pub struct BrowseStream<'a> {
    /// Owning browser.
    browser: &'a mut Browser,
    /// Request handle.
    handle: Reference,
    /// Progress.
    state: State,
}

impl BrowseStream<'_> {
    /// Handle of the browse request.
    pub const fn handle(&self) -> Reference {
        self.handle
    }

    /// Returns the next event.
    ///
    /// After [`BrowseEvent::Done`] this returns `None` without touching the
    /// link.
    pub async fn next(&mut self) -> Result<Option<BrowseEvent>> {
        loop {
            match self.state {
                State::Finished => return Ok(None),
                State::Finishing(flags) => {
                    self.state = State::Finished;
                    return Ok(Some(BrowseEvent::Done(flags)));
                }
                State::Running => {}
            }
            let Some(resp) = self.browser.next_response(self.handle).await? else {
                self.state = State::Finished;
                return Err(Error::Closed);
            };
            if resp.error != 0 {
                self.state = State::Finished;
                return Err(Error::Remote { code: resp.error });
            }
            let terminal = resp.flags.is_terminal();
            if resp.has_item() {
                if terminal {
                    self.state = State::Finishing(resp.flags);
                }
                return Ok(Some(BrowseEvent::Item(resp)));
            }
            if terminal {
                self.state = State::Finished;
                return Ok(Some(BrowseEvent::Done(resp.flags)));
            }
        }
    }

    /// Stops the browse.
    pub async fn cancel(mut self) -> Result<()> {
        self.state = State::Finished;
        let bytes = codec::to_vec(self.browser.codec, &BrowseRequest::cancel(self.handle))?;
        self.browser.link.send(bytes).await
    }
}

impl Drop for BrowseStream<'_> {
    fn drop(&mut self) {
        if self.state != State::Running {
            return;
        }
        if let Err(e) = self.browser.post_cancel(self.handle) {
            tracing::debug!(handle = %self.handle, error = %e, "browse cancel not sent");
        }
    }
}
