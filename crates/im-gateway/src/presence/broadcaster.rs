//! Presence broadcaster
//!
//! Drains the registry's presence stream into the presence store. Events are
//! routed to worker lanes by a stable hash of the user ID, so one user's
//! updates stay ordered while different users proceed in parallel. Each lane
//! coalesces per user and flushes on the merge tick or when the batch is
//! full. A slower full-scan tick re-announces every user the registry has not
//! reported recently, which repairs events dropped anywhere upstream.

use im_common::PresenceConfig;
use im_core::{PresenceEvent, PresenceStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::registry::UserMap;

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub merge_interval: Duration,
    pub full_scan_interval: Duration,
    pub lanes: usize,
    pub lane_capacity: usize,
    pub batch_size: usize,
    /// Bound on every presence store call
    pub call_timeout: Duration,
}

impl BroadcasterConfig {
    #[must_use]
    pub fn from_config(presence: &PresenceConfig, call_timeout: Duration) -> Self {
        Self {
            merge_interval: presence.merge_interval(),
            full_scan_interval: presence.full_scan_interval(),
            lanes: presence.lanes.max(1),
            lane_capacity: presence.lane_capacity.max(1),
            batch_size: presence.batch_size.max(1),
            call_timeout,
        }
    }
}

pub struct PresenceBroadcaster {
    store: Arc<dyn PresenceStore>,
    registry: Arc<UserMap>,
    config: BroadcasterConfig,
}

impl PresenceBroadcaster {
    #[must_use]
    pub fn new(store: Arc<dyn PresenceStore>, registry: Arc<UserMap>, config: BroadcasterConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Run until `shutdown`; lanes flush what they hold before the task ends
    pub fn spawn(self, events: mpsc::Receiver<PresenceEvent>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(events, shutdown))
    }

    async fn run(self, mut events: mpsc::Receiver<PresenceEvent>, shutdown: CancellationToken) {
        let mut workers = JoinSet::new();
        let lanes: Vec<mpsc::Sender<PresenceEvent>> = (0..self.config.lanes)
            .map(|index| {
                let (tx, rx) = mpsc::channel(self.config.lane_capacity);
                let lane = Lane {
                    index,
                    store: Arc::clone(&self.store),
                    batch_size: self.config.batch_size,
                    merge_interval: self.config.merge_interval,
                    call_timeout: self.config.call_timeout,
                };
                workers.spawn(lane.run(rx));
                tx
            })
            .collect();

        let period = self.config.full_scan_interval;
        let mut full_scan = interval_at(Instant::now() + period, period);
        full_scan.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            lanes = self.config.lanes,
            merge_interval = ?self.config.merge_interval,
            full_scan_interval = ?period,
            "Presence broadcaster started"
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => route(&lanes, event),
                    None => break,
                },
                _ = full_scan.tick() => {
                    let now = chrono::Utc::now().timestamp_millis();
                    let cutoff = now - i64::try_from(period.as_millis()).unwrap_or(i64::MAX);
                    let stale = self.registry.snapshot(cutoff, now);
                    tracing::debug!(users = stale.len(), "Presence full scan");
                    for event in stale {
                        route(&lanes, event);
                    }
                }
            }
        }

        // Pick up whatever the registry already queued
        while let Ok(event) = events.try_recv() {
            route(&lanes, event);
        }
        drop(lanes);
        while workers.join_next().await.is_some() {}
        tracing::info!("Presence broadcaster stopped");
    }
}

/// Lane for `user_id` among `lanes`
fn lane_index(user_id: &str, lanes: usize) -> usize {
    crc32fast::hash(user_id.as_bytes()) as usize % lanes
}

fn route(lanes: &[mpsc::Sender<PresenceEvent>], event: PresenceEvent) {
    let lane = &lanes[lane_index(&event.user_id, lanes.len())];
    if let Err(mpsc::error::TrySendError::Full(event)) = lane.try_send(event) {
        tracing::warn!(user_id = %event.user_id, "Presence lane full, event dropped");
    }
}

struct Lane {
    index: usize,
    store: Arc<dyn PresenceStore>,
    batch_size: usize,
    merge_interval: Duration,
    call_timeout: Duration,
}

impl Lane {
    async fn run(self, mut rx: mpsc::Receiver<PresenceEvent>) {
        let mut pending = Coalescer::default();
        let mut tick = interval(self.merge_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        pending.push(event);
                        if pending.len() >= self.batch_size {
                            self.flush(&mut pending).await;
                        }
                    }
                    None => {
                        self.flush(&mut pending).await;
                        return;
                    }
                },
                _ = tick.tick() => self.flush(&mut pending).await,
            }
        }
    }

    async fn flush(&self, pending: &mut Coalescer) {
        if pending.is_empty() {
            return;
        }
        let batch = pending.take();

        match tokio::time::timeout(self.call_timeout, self.store.set_user_online_status(&batch)).await {
            Ok(Ok(())) => tracing::trace!(lane = self.index, events = batch.len(), "Presence batch stored"),
            Ok(Err(e)) => {
                tracing::warn!(lane = self.index, events = batch.len(), error = %e, "Presence batch failed");
            }
            Err(_) => tracing::warn!(lane = self.index, events = batch.len(), "Presence batch timed out"),
        }
    }
}

/// One pending event per user, in first-seen order
#[derive(Default)]
struct Coalescer {
    index: HashMap<String, usize>,
    events: Vec<PresenceEvent>,
}

impl Coalescer {
    fn push(&mut self, event: PresenceEvent) {
        if let Some(&i) = self.index.get(&event.user_id) {
            self.events[i].merge(event);
        } else {
            self.index.insert(event.user_id.clone(), self.events.len());
            self.events.push(event);
        }
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn take(&mut self) -> Vec<PresenceEvent> {
        self.index.clear();
        std::mem::take(&mut self.events)
    }
}
