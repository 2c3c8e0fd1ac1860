//! Request/response correlation.
//!
//! Every request gets a fresh sequence id from the session's
//! [`SequenceCounter`] and a slot in the [`PendingTable`], keyed by the
//! peer it was sent to plus that id. The reader task completes slots as
//! responses arrive, in whatever order the proxy sends them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use devproxy_proto::{Message, Reference};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Identifies one outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    /// Where the request was sent.
    pub peer: Reference,
    /// Sequence id of the request.
    pub sequence_id: u32,
}

impl CorrelationKey {
    /// Creates a key.
    pub const fn new(peer: Reference, sequence_id: u32) -> Self {
        Self { peer, sequence_id }
    }
}

/// Hands out request sequence ids.
///
/// Starts at 1 and wraps, skipping 0, which unsolicited messages use.
#[derive(Debug)]
pub struct SequenceCounter(AtomicU32);

impl SequenceCounter {
    /// Creates a counter whose first id is 1.
    pub const fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    /// Returns the next id.
    pub fn next(&self) -> u32 {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// A waiting request.
#[derive(Debug)]
struct Slot {
    /// Identifies the registration, so a stale guard never frees a newer
    /// slot under the same key.
    id: u64,
    /// Proxy the request was sent through.
    via: Reference,
    /// Response channel.
    tx: oneshot::Sender<Message>,
}

/// Outstanding requests awaiting a response.
#[derive(Debug, Default)]
pub struct PendingTable {
    /// Response slots by correlation key.
    slots: DashMap<CorrelationKey, Slot>,
    /// Next slot id.
    next_id: AtomicU64,
}

impl PendingTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a slot for the response to `key`, sent through `via`.
    ///
    /// The slot is released when the returned guard is dropped, whether
    /// or not a response arrived.
    pub fn register(self: &Arc<Self>, key: CorrelationKey, via: Reference) -> PendingGuard {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.slots.insert(key, Slot { id, via, tx }).is_some() {
            tracing::warn!(peer = %key.peer, seq = key.sequence_id, "replaced a pending request");
        }
        PendingGuard {
            table: Arc::clone(self),
            key,
            id,
            rx,
        }
    }

    /// Returns `true` if a request sent to `key.peer` awaits `key`.
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Delivers `msg` to the request it answers.
    ///
    /// The slot is looked up by `(msg.source, sequence_id)` first. Requests
    /// addressed to the proxy itself (`NULL` peer) are answered from the
    /// proxy's own reference, so `(NULL, sequence_id)` matches too, but
    /// only when `msg.source` is the proxy the request went through or that
    /// proxy was left to the relay. Returns the message back if no request
    /// is waiting for it.
    pub fn complete(&self, msg: Message) -> std::result::Result<(), Message> {
        let seq = msg.sequence_id;
        let source = msg.source;
        let slot = self
            .slots
            .remove(&CorrelationKey::new(source, seq))
            .or_else(|| {
                self.slots
                    .remove_if(&CorrelationKey::new(Reference::NULL, seq), |_, slot| {
                        slot.via.is_null() || slot.via == source
                    })
            });
        match slot {
            Some((_, slot)) => slot.tx.send(msg),
            None => Err(msg),
        }
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Fails every outstanding request with [`Error::Closed`].
    pub fn close_all(&self) {
        self.slots.clear();
    }
}

/// A reserved response slot.
#[derive(Debug)]
pub struct PendingGuard {
    /// Table the slot lives in.
    table: Arc<PendingTable>,
    /// Slot key.
    key: CorrelationKey,
    /// Slot id within the key.
    id: u64,
    /// Response channel.
    rx: oneshot::Receiver<Message>,
}

impl PendingGuard {
    /// Returns the slot's key.
    pub const fn key(&self) -> CorrelationKey {
        self.key
    }

    /// Waits for the response.
    ///
    /// Fails with [`Error::Timeout`] after `timeout`, [`Error::Cancelled`]
    /// when `cancel` fires, and [`Error::Closed`] if the session shuts down
    /// first. The slot is released in every case.
    pub async fn wait(mut self, timeout: Duration, cancel: &CancellationToken) -> Result<Message> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            res = tokio::time::timeout(timeout, &mut self.rx) => match res {
                Ok(Ok(msg)) => Ok(msg),
                Ok(Err(_)) => Err(Error::Closed),
                Err(_) => {
                    tracing::debug!(
                        peer = %self.key.peer,
                        seq = self.key.sequence_id,
                        "request timed out"
                    );
                    Err(Error::Timeout(timeout))
                }
            },
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.slots.remove_if(&self.key, |_, slot| slot.id == self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devproxy_proto::{CloseRequest, CloseResponse};

    fn response(source: Reference, seq: u32) -> Message {
        Message::new(source, Reference::NULL, CloseResponse::default()).with_sequence(seq)
    }

    #[test]
    fn sequence_starts_at_one_and_skips_zero() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        counter.0.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(counter.next(), u32::MAX);
        assert_eq!(counter.next(), 1);
    }

    #[tokio::test]
    async fn completes_out_of_order() {
        let table = Arc::new(PendingTable::new());
        let peer = Reference::new();
        let a = table.register(CorrelationKey::new(peer, 1), Reference::NULL);
        let b = table.register(CorrelationKey::new(peer, 2), Reference::NULL);
        assert_eq!(table.len(), 2);

        assert!(table.complete(response(peer, 2)).is_ok());
        assert!(table.complete(response(peer, 1)).is_ok());

        let token = CancellationToken::new();
        let timeout = Duration::from_secs(1);
        assert_eq!(b.wait(timeout, &token).await.unwrap().sequence_id, 2);
        assert_eq!(a.wait(timeout, &token).await.unwrap().sequence_id, 1);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn timeout_releases_slot_and_late_response_is_returned() {
        let table = Arc::new(PendingTable::new());
        let guard = table.register(CorrelationKey::new(Reference::NULL, 9), Reference::NULL);
        let err = guard
            .wait(Duration::from_millis(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(table.is_empty());
        assert!(table.complete(response(Reference::new(), 9)).is_err());
    }

    #[tokio::test]
    async fn cancel_releases_slot() {
        let table = Arc::new(PendingTable::new());
        let guard = table.register(CorrelationKey::new(Reference::NULL, 3), Reference::NULL);
        let token = CancellationToken::new();
        token.cancel();
        let err = guard.wait(Duration::from_secs(5), &token).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn dropped_guard_releases_slot() {
        let table = Arc::new(PendingTable::new());
        drop(table.register(CorrelationKey::new(Reference::NULL, 4), Reference::NULL));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn null_peer_fallback() {
        let table = Arc::new(PendingTable::new());
        let guard = table.register(CorrelationKey::new(Reference::NULL, 5), Reference::NULL);
        let proxy = Reference::new();
        assert!(table.complete(response(proxy, 5)).is_ok());
        let msg = guard
            .wait(Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(msg.source, proxy);
    }

    #[tokio::test]
    async fn close_all_fails_waiters() {
        let table = Arc::new(PendingTable::new());
        let guard = table.register(CorrelationKey::new(Reference::NULL, 6), Reference::NULL);
        table.close_all();
        let err = guard
            .wait(Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[test]
    fn wrong_peer_is_not_matched() {
        let table = Arc::new(PendingTable::new());
        let _guard = table.register(CorrelationKey::new(Reference::new(), 7), Reference::NULL);
        let msg = Message::new(Reference::new(), Reference::NULL, CloseRequest {}).with_sequence(7);
        assert!(table.complete(msg).is_err());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn null_peer_fallback_requires_the_named_proxy() {
        let table = Arc::new(PendingTable::new());
        let proxy = Reference::new();
        let guard = table.register(CorrelationKey::new(Reference::NULL, 8), proxy);

        // Same sequence id from some other peer, e.g. a link's close notice.
        let stray = response(Reference::new(), 8);
        assert_eq!(table.complete(stray.clone()), Err(stray));
        assert_eq!(table.len(), 1);

        assert!(table.complete(response(proxy, 8)).is_ok());
        let msg = guard
            .wait(Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(msg.source, proxy);
    }

    #[test]
    fn stale_guard_keeps_newer_slot() {
        let table = Arc::new(PendingTable::new());
        let key = CorrelationKey::new(Reference::NULL, 10);
        let old = table.register(key, Reference::NULL);
        let new = table.register(key, Reference::NULL);
        drop(old);
        assert!(table.contains(&key));
        drop(new);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn stale_guard_does_not_steal_the_response() {
        let table = Arc::new(PendingTable::new());
        let peer = Reference::new();
        let key = CorrelationKey::new(peer, 11);
        let old = table.register(key, Reference::NULL);
        let new = table.register(key, Reference::NULL);
        drop(old);
        assert!(table.complete(response(peer, 11)).is_ok());
        let msg = new
            .wait(Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(msg.sequence_id, 11);
    }
}
