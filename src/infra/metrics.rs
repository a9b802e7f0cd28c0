// ============================================================
// Layer 6 — Metrics Channel
// ============================================================
// Session-scoped event emission on top of the host's publish
// capability (domain::traits::EventPublisher).
//
// Throttling:
//   A fixed-interval limiter, shared by every session, gates
//   attention snapshots only. An emission passes if at least
//   1 / max_rate seconds have elapsed since the last one that
//   passed; otherwise it is dropped, never queued.
//   Loss metrics, samples and lifecycle events always go out.
//
// Publishers shipped with the crate:
//   BroadcastPublisher — tokio broadcast fan-out for in-process
//                        listeners (tests, embedding hosts)
//   TracingPublisher   — writes each event to the log

use serde_json::Value;
use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tokio::sync::broadcast;

use crate::domain::events::TrainingEvent;
use crate::domain::traits::EventPublisher;

// ─── RateLimiter ──────────────────────────────────────────────────────────────
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last:     Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_second: f64) -> Self {
        let interval = if max_per_second > 0.0 && max_per_second.is_finite() {
            Duration::from_secs_f64(1.0 / max_per_second)
        } else {
            Duration::ZERO
        };
        Self { interval, last: Mutex::new(None) }
    }

    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn allow_at(&self, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

// ─── MetricsChannel ───────────────────────────────────────────────────────────
#[derive(Clone)]
pub struct MetricsChannel {
    publisher: Arc<dyn EventPublisher>,
    limiter:   Arc<RateLimiter>,
}

impl MetricsChannel {
    pub fn new(publisher: Arc<dyn EventPublisher>, limiter: Arc<RateLimiter>) -> Self {
        Self { publisher, limiter }
    }

    /// Returns `false` when a throttled event was dropped.
    pub fn emit(&self, session_id: &str, event: &TrainingEvent) -> bool {
        if event.is_throttled() && !self.limiter.allow() {
            return false;
        }
        self.publisher.publish(event.name(), event.payload(session_id), session_id);
        true
    }
}

// ─── BroadcastPublisher ───────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub event:      String,
    pub session_id: String,
    pub payload:    Value,
}

pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: &str, payload: Value, session_id: &str) {
        // No receivers is not an error.
        let _ = self.tx.send(PublishedEvent {
            event:      event.to_string(),
            session_id: session_id.to_string(),
            payload,
        });
    }
}

// ─── TracingPublisher ─────────────────────────────────────────────────────────
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(&self, event: &str, payload: Value, session_id: &str) {
        match event {
            "attention_snapshot" => tracing::trace!(session_id, event, "attention snapshot"),
            "error"              => tracing::error!(session_id, event, %payload),
            _                    => tracing::info!(session_id, event, %payload),
        }
    }
}
