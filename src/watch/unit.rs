//! Shared state of one upstream watch.
//!
//! A `WatchUnit` is only ever touched while the hub's registry lock is held.
//! It owns the header result, the replay cache, the handle that closes the
//! upstream body, and the ordered subscriber set.

use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::watch::watcher::{HeadResult, WatcherId};

/// Identity of a unit within its fingerprint's history. A fingerprint that is
/// torn down and watched again gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct UnitId(pub(crate) u64);

/// Outcome of offering a chunk to one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// The previous chunk has not been drained yet.
    Overflow,
    /// The consumer is gone.
    Closed,
}

/// Producer side of a subscriber's single-slot event channel.
#[derive(Debug)]
pub(crate) struct EventSender {
    tx: mpsc::Sender<Bytes>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Offer `chunk` without waiting. A full slot is reported, never awaited.
    pub(crate) fn notify(&self, chunk: Bytes) -> Delivery {
        if self.tx.is_closed() {
            return Delivery::Closed;
        }
        if self.tx.capacity() == 0 {
            return Delivery::Overflow;
        }
        match self.tx.try_send(chunk) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Overflow,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    /// Pending until the upstream header is known.
    head: Option<oneshot::Sender<HeadResult>>,
    /// `None` once the stream is over for this subscriber.
    events: Option<EventSender>,
}

/// Channels handed to a newly attached subscriber.
pub(crate) struct Attachment {
    pub(crate) head: oneshot::Receiver<HeadResult>,
    pub(crate) events: mpsc::Receiver<Bytes>,
}

#[derive(Debug)]
pub(crate) struct WatchUnit {
    id: UnitId,
    head: Option<HeadResult>,
    cache: BytesMut,
    upstream: Option<CancellationToken>,
    ended: bool,
    subscribers: BTreeMap<WatcherId, Subscriber>,
}

impl WatchUnit {
    pub(crate) fn new(id: UnitId, upstream: CancellationToken) -> Self {
        Self {
            id,
            head: None,
            cache: BytesMut::with_capacity(1024),
            upstream: Some(upstream),
            ended: false,
            subscribers: BTreeMap::new(),
        }
    }

    pub(crate) fn id(&self) -> UnitId {
        self.id
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub(crate) fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Add a subscriber. A known header is delivered at once, followed by the
    /// whole cache as a single chunk; an ended unit closes the stream right after.
    pub(crate) fn attach(&mut self, id: WatcherId) -> Attachment {
        let (head_tx, head_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::channel(1);
        let events = EventSender::new(events_tx);

        let head = match &self.head {
            Some(result) => {
                let _ = head_tx.send(result.clone());
                None
            }
            None => Some(head_tx),
        };

        if !self.cache.is_empty() {
            // Fresh channel, the slot is free.
            let _ = events.notify(Bytes::copy_from_slice(&self.cache));
        }

        let events = if self.ended { None } else { Some(events) };
        self.subscribers.insert(id, Subscriber { head, events });

        Attachment {
            head: head_rx,
            events: events_rx,
        }
    }

    /// Drop one subscriber. Returns false if it was already gone.
    pub(crate) fn detach(&mut self, id: WatcherId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Record the upstream header and hand it to everyone waiting for it.
    /// A failure ends the unit: there is no stream to relay.
    pub(crate) fn publish_head(&mut self, result: HeadResult) {
        for subscriber in self.subscribers.values_mut() {
            if let Some(tx) = subscriber.head.take() {
                let _ = tx.send(result.clone());
            }
        }
        let failed = result.is_err();
        self.head = Some(result);
        if failed {
            self.end();
        }
    }

    /// Append a chunk to the cache and offer it to every subscriber.
    ///
    /// Returns the subscribers that could not keep up or had gone away; they
    /// are already detached.
    pub(crate) fn broadcast(&mut self, chunk: Bytes) -> Vec<WatcherId> {
        self.cache.extend_from_slice(&chunk);

        let mut dropped = Vec::new();
        for (id, subscriber) in &self.subscribers {
            let Some(events) = &subscriber.events else {
                continue;
            };
            match events.notify(chunk.clone()) {
                Delivery::Delivered => {}
                Delivery::Overflow | Delivery::Closed => dropped.push(*id),
            }
        }
        for id in &dropped {
            self.subscribers.remove(id);
        }
        dropped
    }

    /// The upstream stream is over: close every subscriber's event sequence and
    /// release the upstream handle. Subscribers stay attached.
    pub(crate) fn end(&mut self) {
        self.ended = true;
        for subscriber in self.subscribers.values_mut() {
            subscriber.events = None;
        }
        self.upstream = None;
    }

    /// Close the upstream body if it is still open. Safe to call any number of times.
    pub(crate) fn close_upstream(&mut self) -> bool {
        match self.upstream.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
