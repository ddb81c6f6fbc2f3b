//! Per-client subscription handles.
//!
//! A `Watcher` yields the header exactly once: `header` consumes it and hands
//! back the `WatchEvents` stream, so a second read cannot be written.
//! Dropping either handle unsubscribes; `remove` does the same explicitly and
//! is idempotent.

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use futures_util::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::upstream::UpstreamError;
use crate::watch::fingerprint::Fingerprint;
use crate::watch::hub::HubShared;
use crate::watch::unit::UnitId;

/// Subscriber identity, unique for the lifetime of a hub. Increasing ids keep
/// subscribers in attach order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(pub(crate) u64);

/// Status line and headers of the upstream watch response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Why a watch produced no upstream response.
#[derive(Debug, Clone, Error)]
pub enum WatchFailure {
    /// The upstream call failed; every subscriber of the attempt sees the same error.
    #[error(transparent)]
    Upstream(Arc<UpstreamError>),

    /// The hub closed the watch before the upstream answered.
    #[error("watch closed before the upstream responded")]
    Closed,
}

/// One-time header result shared by all subscribers of a unit.
pub type HeadResult = Result<ResponseHead, WatchFailure>;

/// Removes its subscriber from the hub exactly once: explicitly or on drop.
#[derive(Debug)]
pub(crate) struct Subscription {
    shared: Arc<HubShared>,
    fingerprint: Fingerprint,
    unit: UnitId,
    id: WatcherId,
    removed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        shared: Arc<HubShared>,
        fingerprint: Fingerprint,
        unit: UnitId,
        id: WatcherId,
    ) -> Self {
        Self {
            shared,
            fingerprint,
            unit,
            id,
            removed: AtomicBool::new(false),
        }
    }

    fn remove(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.detach(&self.fingerprint, self.unit, self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

/// A client's subscription before the header has been read.
#[derive(Debug)]
pub struct Watcher {
    head: oneshot::Receiver<HeadResult>,
    events: mpsc::Receiver<Bytes>,
    subscription: Subscription,
}

impl Watcher {
    pub(crate) fn new(
        head: oneshot::Receiver<HeadResult>,
        events: mpsc::Receiver<Bytes>,
        subscription: Subscription,
    ) -> Self {
        Self {
            head,
            events,
            subscription,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.subscription.fingerprint
    }

    /// Wait for the header result, replayed from cache or from the first
    /// upstream round trip, and switch to the event stream.
    pub async fn header(self) -> (HeadResult, WatchEvents) {
        let Watcher {
            head,
            events,
            subscription,
        } = self;
        let result = head.await.unwrap_or(Err(WatchFailure::Closed));
        (
            result,
            WatchEvents {
                events,
                subscription,
            },
        )
    }

    /// Unsubscribe. Further calls do nothing.
    pub fn remove(&self) {
        self.subscription.remove();
    }
}

/// Live chunks of a subscription: the cache replay first, then new chunks.
#[derive(Debug)]
pub struct WatchEvents {
    events: mpsc::Receiver<Bytes>,
    subscription: Subscription,
}

impl WatchEvents {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.subscription.fingerprint
    }

    /// Next chunk, or `None` once the subscriber has been removed or the
    /// upstream stream has ended.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.events.recv().await
    }

    /// Unsubscribe. Further calls do nothing. Already delivered chunks can
    /// still be drained before `next` returns `None`.
    pub fn remove(&self) {
        self.subscription.remove();
    }

    /// Adapt into a stream; dropping the stream unsubscribes.
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        futures_util::stream::unfold(self, |mut events| async move {
            events.next().await.map(|chunk| (chunk, events))
        })
    }
}
