//! Hierarchical trace events (§4.7).
//!
//! A [`Tracer`] is the shared append-only sink: it hands out globally monotonic event ids and
//! records events under a single mutex (§5). The *parent-id stack* that "follows the evaluator's
//! call nesting" is deliberately **not** part of the tracer — it is local call-chain state (see
//! [`crate::interpreter::CallContext`]), because a tracer can be shared across concurrently
//! running call chains (the batch runner, §4.11) while each chain's nesting is private to it.
//!
//! [`NoopTracer`] is the zero-configuration default: every method is a no-op, so running without
//! a tracer costs nothing beyond one virtual dispatch per call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// The kind of hierarchical event recorded (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    Enter,
    Exit,
    Go,
    Wait,
}

/// One hierarchical trace event. JSON-serializable per the external interface (§6); `ts`/`dur`
/// are virtual durations in integer nanoseconds.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TraceEvent {
    pub kind: TraceKind,
    pub id: u64,
    pub parent_id: u64,
    pub ts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dur: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl TraceEvent {
    pub fn ts_duration(&self) -> Duration {
        Duration::from_nanos(self.ts)
    }
}

/// Renders a captured trace as the JSON external interface (§6) describes it: an array of
/// `{kind, id, parent_id, ts, dur?, component, method, args[], ret?, err?}` objects.
pub fn events_to_json(events: &[TraceEvent]) -> serde_json::Result<String> {
    serde_json::to_string(events)
}

/// Trait for trace sinks. `next_id` must be globally monotonic and safe to call concurrently
/// (§5): the batch runner shares one tracer across worker threads.
pub trait Tracer: Send + Sync {
    fn next_id(&self) -> u64;
    fn record(&self, event: TraceEvent);
}

/// Zero-configuration default: discards every id request and every event.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn next_id(&self) -> u64 {
        0
    }
    fn record(&self, _event: TraceEvent) {}
}

/// Records every event into a shared, mutex-guarded buffer.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    next: AtomicU64,
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1), events: Mutex::new(Vec::new()) }
    }

    /// Snapshots all events recorded so far, in append order.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().expect("tracer lock poisoned").clone()
    }

    /// Renders the current snapshot as the JSON external interface (§6).
    pub fn events_json(&self) -> serde_json::Result<String> {
        events_to_json(&self.events())
    }

    pub fn clear(&self) {
        self.events.lock().expect("tracer lock poisoned").clear();
    }
}

impl Tracer for RecordingTracer {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    fn record(&self, event: TraceEvent) {
        self.events.lock().expect("tracer lock poisoned").push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let tracer = RecordingTracer::new();
        let a = tracer.next_id();
        let b = tracer.next_id();
        assert!(b > a);
    }

    #[test]
    fn events_form_a_forest_under_parent_id() {
        let tracer = RecordingTracer::new();
        let root = tracer.next_id();
        tracer.record(TraceEvent {
            kind: TraceKind::Enter,
            id: root,
            parent_id: 0,
            ts: 0,
            dur: None,
            component: Some("M".into()),
            method: Some("run".into()),
            args: vec![],
            ret: None,
            err: None,
        });
        let child = tracer.next_id();
        tracer.record(TraceEvent {
            kind: TraceKind::Enter,
            id: child,
            parent_id: root,
            ts: 0,
            dur: None,
            component: Some("a".into()),
            method: Some("X".into()),
            args: vec![],
            ret: None,
            err: None,
        });
        let events = tracer.events();
        assert_eq!(events[1].parent_id, events[0].id);
    }

    #[test]
    fn events_json_round_trips_through_serde_json() {
        let tracer = RecordingTracer::new();
        let id = tracer.next_id();
        tracer.record(TraceEvent {
            kind: TraceKind::Enter,
            id,
            parent_id: 0,
            ts: 42,
            dur: None,
            component: Some("M".into()),
            method: Some("Run".into()),
            args: vec![],
            ret: None,
            err: None,
        });
        let json = tracer.events_json().unwrap();
        let parsed: Vec<TraceEvent> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].kind, TraceKind::Enter);
        assert_eq!(parsed[0].component.as_deref(), Some("M"));
        assert!(!json.contains("\"dur\""), "skip_serializing_if should omit an absent dur field");
    }
}
