//! In-flight request tracking and response routing by message identifier.
//!
//! One [`Correlator`] exists per connection and is shared (via `Arc`) between
//! every caller executing requests and the single reader loop delivering
//! responses. Entries live in a `DashMap`, so registration, dispatch, and
//! release from different tasks never contend on one global lock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ldapwire_core::{BerError, MessageId, ResponseFrame};
use tokio::sync::oneshot;

use crate::error::LdapError;

/// What the reader hands to a waiter: a decoded frame, or the reason a frame
/// addressed to it could not be decoded.
pub type Delivery = Result<ResponseFrame, BerError>;

/// Result of routing one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to the waiting request.
    Delivered,
    /// The entry already received its response; the frame was dropped.
    Duplicate,
    /// No live waiter for this identifier; the frame was dropped.
    Orphan,
}

/// Correlation entry. The sender is consumed by the first delivery, so
/// `sender.is_some()` is the entry's liveness flag.
#[derive(Debug)]
struct PendingEntry {
    sender: Option<oneshot::Sender<Delivery>>,
}

/// Registry of in-flight requests on one connection.
#[derive(Debug)]
pub struct Correlator {
    entries: DashMap<MessageId, PendingEntry>,
    next_id: AtomicU32,
    closed: AtomicBool,
}

impl Correlator {
    /// Creates an empty correlator whose first identifier is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates an empty correlator whose first identifier is `first`,
    /// clamped into the valid range.
    #[must_use]
    pub fn starting_at(first: u32) -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU32::new(first.clamp(1, MessageId::MAX)),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocates a fresh identifier and creates its correlation entry.
    ///
    /// The counter wraps from `MessageId::MAX` back to 1 and skips
    /// identifiers that are still live. The returned guard releases the entry
    /// when dropped.
    ///
    /// # Errors
    ///
    /// Returns `LdapError::ConnectionClosed` once [`Correlator::close`] has
    /// run, or `LdapError::IdentifiersExhausted` if every identifier is live.
    pub fn register(&self) -> Result<PendingRequest<'_>, LdapError> {
        if self.is_closed() {
            return Err(LdapError::ConnectionClosed);
        }

        let (sender, receiver) = oneshot::channel();
        let message_id = self.claim(sender)?;

        // A concurrent close() may have drained the map before our insert.
        if self.is_closed() {
            self.entries.remove(&message_id);
            return Err(LdapError::ConnectionClosed);
        }

        metrics::gauge!("ldap_client_requests_in_flight").increment(1.0);
        Ok(PendingRequest {
            correlator: self,
            message_id,
            receiver,
        })
    }

    fn claim(&self, sender: oneshot::Sender<Delivery>) -> Result<MessageId, LdapError> {
        if self.entries.len() >= MessageId::MAX as usize {
            return Err(LdapError::IdentifiersExhausted);
        }
        for _ in 0..MessageId::MAX {
            let candidate = self.next_candidate();
            if let Entry::Vacant(slot) = self.entries.entry(candidate) {
                slot.insert(PendingEntry {
                    sender: Some(sender),
                });
                return Ok(candidate);
            }
        }
        Err(LdapError::IdentifiersExhausted)
    }

    fn next_candidate(&self) -> MessageId {
        let previous = self
            .next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current >= MessageId::MAX { 1 } else { current + 1 })
            });
        MessageId(previous.unwrap_or_else(|current| current))
    }

    /// Routes one inbound delivery to the request waiting on `message_id`.
    ///
    /// Each entry accepts a single delivery. Later frames for the same
    /// identifier, and frames for identifiers with no entry (late responses
    /// after a timeout or cancellation), are logged and dropped.
    pub fn dispatch(&self, message_id: MessageId, delivery: Delivery) -> Dispatch {
        let Some(mut entry) = self.entries.get_mut(&message_id) else {
            tracing::debug!(message_id = message_id.0, "discarding orphan response");
            metrics::counter!("ldap_client_orphan_frames_total").increment(1);
            return Dispatch::Orphan;
        };
        let sender = entry.sender.take();
        drop(entry);

        match sender {
            Some(sender) => {
                if sender.send(delivery).is_err() {
                    // Waiter dropped its receiver but has not released yet.
                    tracing::debug!(message_id = message_id.0, "waiter gone; response discarded");
                    metrics::counter!("ldap_client_orphan_frames_total").increment(1);
                    return Dispatch::Orphan;
                }
                Dispatch::Delivered
            }
            None => {
                tracing::warn!(
                    message_id = message_id.0,
                    "duplicate response for message id; dropping"
                );
                metrics::counter!("ldap_client_duplicate_frames_total").increment(1);
                Dispatch::Duplicate
            }
        }
    }

    /// Removes the entry for `message_id`, whether or not it was ever
    /// delivered. Returns `true` if an entry was removed.
    pub fn release(&self, message_id: MessageId) -> bool {
        let removed = self.entries.remove(&message_id).is_some();
        if removed {
            metrics::gauge!("ldap_client_requests_in_flight").decrement(1.0);
        }
        removed
    }

    /// Marks the correlator closed and wakes every waiter with
    /// `LdapError::ConnectionClosed`. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let live: Vec<MessageId> = self.entries.iter().map(|entry| *entry.key()).collect();
        for message_id in live {
            if let Some(mut entry) = self.entries.get_mut(&message_id) {
                entry.sender.take();
            }
        }
        tracing::debug!("correlator closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether an entry for `message_id` is currently registered.
    #[must_use]
    pub fn contains(&self, message_id: MessageId) -> bool {
        self.entries.contains_key(&message_id)
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// PendingRequest
// ---------------------------------------------------------------------------

/// RAII handle for one registered request.
///
/// Releases its correlation entry when dropped, so every exit path of the
/// owning request (return, `?`, timeout, cancellation, dropped future, panic)
/// frees the identifier.
#[derive(Debug)]
pub struct PendingRequest<'a> {
    correlator: &'a Correlator,
    message_id: MessageId,
    receiver: oneshot::Receiver<Delivery>,
}

impl PendingRequest<'_> {
    #[must_use]
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Waits for the response routed to this request.
    ///
    /// # Errors
    ///
    /// Returns `LdapError::MalformedEncoding` if the frame for this request
    /// could not be decoded, or `LdapError::ConnectionClosed` if the
    /// correlator closed first.
    pub async fn response(&mut self) -> Result<ResponseFrame, LdapError> {
        match (&mut self.receiver).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(err)) => Err(LdapError::MalformedEncoding(err)),
            Err(_) => Err(LdapError::ConnectionClosed),
        }
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.correlator.release(self.message_id);
    }
}
