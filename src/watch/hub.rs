//! Keyed registry of in-flight upstream watches.
//!
//! # State per fingerprint
//! ```text
//! Absent → Fetching → Streaming → Ended → Gone
//!             │                      ▲
//!             └── upstream error ────┘   (failure cached as the header)
//!
//! Any state → Gone: last subscriber leaves (upstream body closed once)
//! ```
//!
//! # Design Decisions
//! - One mutex guards the registry and every unit's subscriber set; critical
//!   sections are map and channel operations only, never I/O
//! - Cache append and broadcast happen under the same lock as attach, so a
//!   late joiner sees the cache followed by exactly the chunks after it
//! - Each unit has one task: it issues the upstream call, then relays the body
//!   line by line; the task owns the body, and cancelling its token closes it

use axum::body::Body;
use axum::http::{Request, Response};
use bytes::Bytes;
use futures_util::TryStreamExt;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::upstream::{Upstream, UpstreamClient, UpstreamError};
use crate::watch::fingerprint::{Fingerprint, FingerprintError, Fingerprinter};
use crate::watch::unit::{UnitId, WatchUnit};
use crate::watch::watcher::{ResponseHead, Subscription, WatchFailure, Watcher, WatcherId};

#[derive(Debug, Default)]
struct Registry {
    units: HashMap<Fingerprint, WatchUnit>,
    next_unit: u64,
    next_watcher: u64,
}

impl Registry {
    fn unit_mut(&mut self, fingerprint: &Fingerprint, id: UnitId) -> Option<&mut WatchUnit> {
        self.units.get_mut(fingerprint).filter(|unit| unit.id() == id)
    }

    fn teardown(&mut self, fingerprint: &Fingerprint) {
        if let Some(mut unit) = self.units.remove(fingerprint) {
            let closed = unit.close_upstream();
            tracing::info!(
                fingerprint = %fingerprint,
                upstream_closed = closed,
                cached_bytes = unit.cached_len(),
                "All watchers removed"
            );
            metrics::set_active_units(self.units.len());
        }
    }
}

/// Hub state reachable from subscription handles and unit tasks.
#[derive(Debug, Default)]
pub(crate) struct HubShared {
    registry: Mutex<Registry>,
}

impl HubShared {
    // Critical sections never leave the registry half-updated, so a poisoned
    // lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a new subscriber, creating the unit if needed. Returns the
    /// upstream job to start when the unit is new.
    fn subscribe(self: &Arc<Self>, fingerprint: Fingerprint) -> (Watcher, Option<(UnitId, CancellationToken)>) {
        let mut registry = self.lock();
        let Registry {
            units,
            next_unit,
            next_watcher,
        } = &mut *registry;

        *next_watcher += 1;
        let watcher_id = WatcherId(*next_watcher);

        let mut job = None;
        let unit = units.entry(fingerprint.clone()).or_insert_with(|| {
            *next_unit += 1;
            let id = UnitId(*next_unit);
            let token = CancellationToken::new();
            job = Some((id, token.clone()));
            WatchUnit::new(id, token)
        });

        let attachment = unit.attach(watcher_id);
        let unit_id = unit.id();
        let current = unit.len();
        let unit_count = units.len();
        drop(registry);

        if job.is_some() {
            tracing::info!(fingerprint = %fingerprint, "New watch unit");
            metrics::set_active_units(unit_count);
        } else {
            tracing::debug!(fingerprint = %fingerprint, current, "Watcher joined existing unit");
        }
        metrics::record_subscriber_attached();

        let subscription = Subscription::new(Arc::clone(self), fingerprint, unit_id, watcher_id);
        (
            Watcher::new(attachment.head, attachment.events, subscription),
            job,
        )
    }

    /// Remove one subscriber; the last one tears the unit down.
    pub(crate) fn detach(&self, fingerprint: &Fingerprint, unit_id: UnitId, watcher_id: WatcherId) {
        let mut registry = self.lock();
        let Some(unit) = registry.unit_mut(fingerprint, unit_id) else {
            return;
        };
        if !unit.detach(watcher_id) {
            return;
        }
        let rest = unit.len();
        metrics::record_subscribers_detached(1);
        tracing::debug!(fingerprint = %fingerprint, rest, "Watcher removed");

        if rest == 0 {
            registry.teardown(fingerprint);
        }
    }

    /// Store the header result of the upstream call. Returns the body to relay
    /// when the call succeeded and the unit still has subscribers.
    fn publish_head(
        &self,
        fingerprint: &Fingerprint,
        unit_id: UnitId,
        outcome: Result<Response<Body>, UpstreamError>,
    ) -> Option<Body> {
        let (result, body) = match outcome {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                let head = ResponseHead {
                    status: parts.status,
                    headers: parts.headers,
                };
                (Ok(head), Some(body))
            }
            Err(e) => {
                tracing::error!(fingerprint = %fingerprint, error = %e, "Upstream watch call failed");
                (Err(WatchFailure::Upstream(Arc::new(e))), None)
            }
        };

        let mut registry = self.lock();
        let unit = registry.unit_mut(fingerprint, unit_id)?;
        unit.publish_head(result);
        body
    }

    /// Cache and fan out one chunk. Returns false when relaying should stop.
    fn broadcast(&self, fingerprint: &Fingerprint, unit_id: UnitId, chunk: Bytes) -> bool {
        let mut registry = self.lock();
        let Some(unit) = registry.unit_mut(fingerprint, unit_id) else {
            return false;
        };

        let dropped = unit.broadcast(chunk);
        let empty = unit.is_empty();
        if !dropped.is_empty() {
            tracing::warn!(
                fingerprint = %fingerprint,
                dropped = dropped.len(),
                "Dropped watchers that could not keep up"
            );
            metrics::record_slow_subscribers(dropped.len());
            metrics::record_subscribers_detached(dropped.len());
        }

        if empty {
            registry.teardown(fingerprint);
            return false;
        }
        true
    }

    /// The upstream stream ended on its own.
    fn finish(&self, fingerprint: &Fingerprint, unit_id: UnitId) {
        let mut registry = self.lock();
        if let Some(unit) = registry.unit_mut(fingerprint, unit_id) {
            unit.end();
            tracing::info!(fingerprint = %fingerprint, subscribers = unit.len(), "Upstream watch stream ended");
        }
    }

    fn close_all(&self) {
        let mut registry = self.lock();
        let count = registry.units.len();
        let mut detached = 0;
        for (_, mut unit) in registry.units.drain() {
            unit.close_upstream();
            unit.end();
            detached += unit.len();
        }
        metrics::set_active_units(0);
        metrics::record_subscribers_detached(detached);
        tracing::info!(units = count, "Closed all watch units");
    }

    fn active_units(&self) -> usize {
        self.lock().units.len()
    }

    fn subscriber_count(&self, fingerprint: &Fingerprint) -> usize {
        self.lock().units.get(fingerprint).map_or(0, WatchUnit::len)
    }
}

/// Coalesces identical watch requests into one upstream call each.
#[derive(Debug)]
pub struct WatchHub<U: Upstream = UpstreamClient> {
    shared: Arc<HubShared>,
    upstream: Arc<U>,
    fingerprinter: Fingerprinter,
}

impl<U: Upstream> Clone for WatchHub<U> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            upstream: Arc::clone(&self.upstream),
            fingerprinter: self.fingerprinter.clone(),
        }
    }
}

impl<U: Upstream> WatchHub<U> {
    pub fn new(upstream: Arc<U>, fingerprinter: Fingerprinter) -> Self {
        Self {
            shared: Arc::new(HubShared::default()),
            upstream,
            fingerprinter,
        }
    }

    /// Subscribe the caller to the watch `request` describes.
    ///
    /// Protocol violations are returned as errors and never coalesced.
    pub async fn watch(&self, mut request: Request<Body>) -> Result<Watcher, FingerprintError> {
        let fingerprint = self.fingerprinter.fingerprint(&mut request).await?;
        Ok(self.subscribe(fingerprint, request))
    }

    /// Subscribe under an already derived fingerprint. `request` is forwarded
    /// only if this creates the unit.
    pub fn subscribe(&self, fingerprint: Fingerprint, request: Request<Body>) -> Watcher {
        let (watcher, job) = self.shared.subscribe(fingerprint.clone());
        if let Some((unit_id, closed)) = job {
            metrics::record_upstream_watch();
            tokio::spawn(run_unit(
                Arc::clone(&self.shared),
                Arc::clone(&self.upstream),
                fingerprint,
                unit_id,
                request,
                closed,
            ));
        }
        watcher
    }

    /// Number of fingerprints with a live unit.
    pub fn active_units(&self) -> usize {
        self.shared.active_units()
    }

    /// Subscribers currently attached to `fingerprint`.
    pub fn subscriber_count(&self, fingerprint: &Fingerprint) -> usize {
        self.shared.subscriber_count(fingerprint)
    }

    /// Close every unit: upstream bodies are released, pending headers fail
    /// with `WatchFailure::Closed`, and event streams end.
    pub fn close_all(&self) {
        self.shared.close_all();
    }
}

async fn run_unit<U: Upstream>(
    shared: Arc<HubShared>,
    upstream: Arc<U>,
    fingerprint: Fingerprint,
    unit_id: UnitId,
    request: Request<Body>,
    closed: CancellationToken,
) {
    let outcome = tokio::select! {
        _ = closed.cancelled() => {
            tracing::debug!(fingerprint = %fingerprint, "Watch abandoned before upstream answered");
            return;
        }
        outcome = upstream.forward(request) => outcome,
    };

    let Some(body) = shared.publish_head(&fingerprint, unit_id, outcome) else {
        return;
    };

    if relay(&shared, &fingerprint, unit_id, body, &closed).await {
        shared.finish(&fingerprint, unit_id);
    }
    tracing::debug!(fingerprint = %fingerprint, "Upstream watch job done");
}

/// Read the body line by line into the unit. Returns true when the stream
/// ended by itself, false when the hub closed it.
async fn relay(
    shared: &HubShared,
    fingerprint: &Fingerprint,
    unit_id: UnitId,
    body: Body,
    closed: &CancellationToken,
) -> bool {
    let stream = body.into_data_stream().map_err(io::Error::other);
    let mut reader = BufReader::new(StreamReader::new(stream));

    loop {
        let mut line = Vec::new();
        let read = tokio::select! {
            biased;
            _ = closed.cancelled() => return false,
            read = reader.read_until(b'\n', &mut line) => read,
        };

        match read {
            Ok(0) => return true,
            Ok(_) => {
                if !shared.broadcast(fingerprint, unit_id, Bytes::from(line)) {
                    return false;
                }
            }
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Upstream watch stream failed");
                return true;
            }
        }
    }
}
