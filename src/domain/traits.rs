// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The host supplies the transport for events. The core only
// knows this one capability; the Metrics Channel layers rate
// limiting on top of it.
//
// Implementations:
//   - BroadcastPublisher → fan-out over a tokio broadcast channel
//   - TracingPublisher   → logs each event (used by the CLI)

use serde_json::Value;

// ─── EventPublisher ───────────────────────────────────────────────────────────
/// Delivers a named, session-scoped event to whoever is listening.
///
/// Must not block: it is called from the training task between
/// iterations and from control requests.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &str, payload: Value, session_id: &str);
}

impl<P: EventPublisher + ?Sized> EventPublisher for std::sync::Arc<P> {
    fn publish(&self, event: &str, payload: Value, session_id: &str) {
        (**self).publish(event, payload, session_id)
    }
}
