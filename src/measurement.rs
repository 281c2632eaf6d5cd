//! The live measurement store (§4.9): a registry of [`MeasurementSpec`]s, each backed by a
//! fixed-capacity circular buffer of [`MetricPoint`]s, driven by trace `Exit` events.
//!
//! The store never walks the AST or the component graph itself — it is a pure consumer of
//! [`TraceEvent`]s (§4.7), matched against each spec's resolved component identity, method
//! list, and result matcher. Registration is keyed by an opaque id the caller chooses; looking
//! a spec's component up against the live system happens once, at `add`, not per event.

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::Duration;

use crate::instance::ComponentHandle;

/// What a spec counts: a point per matching call (`Count`) or that call's duration (`Latency`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Count,
    Latency,
}

/// How a window of points is reduced to a single number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Rate,
    Avg,
    Min,
    Max,
    P50,
    P90,
    P95,
    P99,
}

impl Aggregation {
    fn percentile(self) -> Option<f64> {
        match self {
            Self::P50 => Some(0.50),
            Self::P90 => Some(0.90),
            Self::P95 => Some(0.95),
            Self::P99 => Some(0.99),
            _ => None,
        }
    }
}

/// A result-value matcher (§4.9): `"*"` matches anything, `"!=X"` matches anything but `X`,
/// otherwise an exact string match against the trace event's rendered return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultMatcher {
    Any,
    NotEqual(String),
    Exact(String),
}

impl ResultMatcher {
    pub fn parse(raw: &str) -> Self {
        if raw == "*" {
            Self::Any
        } else if let Some(rest) = raw.strip_prefix("!=") {
            Self::NotEqual(rest.to_string())
        } else {
            Self::Exact(raw.to_string())
        }
    }

    fn accepts(&self, ret: Option<&str>) -> bool {
        match self {
            Self::Any => true,
            Self::NotEqual(excluded) => ret != Some(excluded.as_str()),
            Self::Exact(expected) => ret == Some(expected.as_str()),
        }
    }
}

/// A declaration of what to measure, resolved against a specific live component instance.
pub struct MeasurementSpec {
    pub id: String,
    pub display_name: String,
    pub component: ComponentHandle,
    pub methods: Vec<String>,
    pub matcher: ResultMatcher,
    pub metric: MetricKind,
    pub aggregation: Aggregation,
    pub window: Duration,
    buffer: RwLock<CircularBuffer>,
}

/// One sample appended to a spec's buffer on a matching trace `Exit` event.
#[derive(Debug, Clone, Copy)]
pub struct MetricPoint {
    pub ts: Duration,
    pub value: f64,
}

/// A fixed-capacity ring buffer of `MetricPoint`s; oldest points are dropped once `capacity` is
/// exceeded.
struct CircularBuffer {
    points: VecDeque<MetricPoint>,
    capacity: usize,
}

impl CircularBuffer {
    fn new(capacity: usize) -> Self {
        Self { points: VecDeque::with_capacity(capacity.min(4096)), capacity }
    }

    fn push(&mut self, point: MetricPoint) {
        if self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    fn latest_n(&self, n: usize) -> Vec<MetricPoint> {
        self.points.iter().rev().take(n).rev().copied().collect()
    }

    fn in_window(&self, window: Duration) -> Vec<MetricPoint> {
        let Some(latest) = self.points.back().map(|p| p.ts) else { return Vec::new() };
        self.points.iter().copied().filter(|p| latest.saturating_sub(p.ts) <= window).collect()
    }
}

/// The result of `GetAggregated` (§6 Measurement API).
#[derive(Debug, Clone, Copy)]
pub struct AggregatedValue {
    pub window: Duration,
    pub aggregation: Aggregation,
    pub value: f64,
    pub count: usize,
    pub earliest: Option<Duration>,
    pub latest: Option<Duration>,
}

impl MeasurementSpec {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        component: ComponentHandle,
        methods: Vec<String>,
        matcher: ResultMatcher,
        metric: MetricKind,
        aggregation: Aggregation,
        window: Duration,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            component,
            methods,
            matcher,
            metric,
            aggregation,
            window,
            buffer: RwLock::new(CircularBuffer::new(buffer_capacity)),
        }
    }

    /// Returns true and appends a point iff this exit is for this spec's component and one of
    /// its methods, and the matcher accepts the returned value. Takes the live `ComponentHandle`
    /// directly (pointer equality, §4.9) rather than a serialized name: a `TraceEvent`'s
    /// `component` field is a rendered string for the JSON external interface (§6) and two
    /// instances of the same declared kind would otherwise be indistinguishable.
    fn observe(&self, component: &ComponentHandle, method: &str, ts: Duration, dur: Duration, ret: Option<&str>) -> bool {
        if component != &self.component {
            return false;
        }
        if !self.methods.iter().any(|m| m == method) {
            return false;
        }
        if !self.matcher.accepts(ret) {
            return false;
        }
        let value = match self.metric {
            MetricKind::Count => 1.0,
            MetricKind::Latency => dur.as_nanos() as f64,
        };
        self.buffer.write().expect("measurement buffer lock poisoned").push(MetricPoint { ts, value });
        true
    }

    pub fn latest(&self, n: usize) -> Vec<MetricPoint> {
        self.buffer.read().expect("measurement buffer lock poisoned").latest_n(n)
    }

    pub fn in_window(&self, window: Duration) -> Vec<MetricPoint> {
        self.buffer.read().expect("measurement buffer lock poisoned").in_window(window)
    }

    /// Aggregates this spec's own declared window (§6 `GetAggregated`).
    pub fn aggregated(&self) -> AggregatedValue {
        let points = self.in_window(self.window);
        aggregate(&points, self.aggregation, self.window)
    }
}

/// Reduces a slice of points to a single number per `aggregation` (§4.9).
fn aggregate(points: &[MetricPoint], aggregation: Aggregation, window: Duration) -> AggregatedValue {
    let count = points.len();
    let earliest = points.iter().map(|p| p.ts).min();
    let latest = points.iter().map(|p| p.ts).max();

    let value = if let Some(pct) = aggregation.percentile() {
        percentile(points, pct)
    } else {
        match aggregation {
            Aggregation::Sum => count as f64,
            Aggregation::Rate => {
                // Throughput over the span the points actually cover, not the declared window:
                // a window wider than the observed history would otherwise understate the rate.
                // This diverges from §4.9's literal count/window wording on purpose — see
                // DESIGN.md's measurement.rs entry.
                let seconds = match (earliest, latest) {
                    (Some(earliest), Some(latest)) if latest > earliest => (latest - earliest).as_secs_f64(),
                    _ => window.as_secs_f64(),
                };
                if seconds > 0.0 {
                    count as f64 / seconds
                } else {
                    0.0
                }
            }
            Aggregation::Avg => {
                if count == 0 {
                    0.0
                } else {
                    points.iter().map(|p| p.value).sum::<f64>() / count as f64
                }
            }
            Aggregation::Min => points.iter().map(|p| p.value).fold(f64::INFINITY, f64::min),
            Aggregation::Max => points.iter().map(|p| p.value).fold(f64::NEG_INFINITY, f64::max),
            Aggregation::P50 | Aggregation::P90 | Aggregation::P95 | Aggregation::P99 => unreachable!(),
        }
    };
    let value = if value.is_finite() { value } else { 0.0 };

    AggregatedValue { window, aggregation, value, count, earliest, latest }
}

/// Nearest-rank percentile over a sorted copy of `points`' values.
fn percentile(points: &[MetricPoint], p: f64) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let mut values: Vec<f64> = points.iter().map(|point| point.value).collect();
    values.sort_by(|a, b| a.partial_cmp(b).expect("metric values are never NaN"));
    let rank = ((p * values.len() as f64).ceil() as usize).clamp(1, values.len()) - 1;
    values[rank]
}

/// The registry of live specs. A new measurement store starts empty; [`Interpreter::call_method`]
/// feeds it one [`MeasurementStore::observe_exit`] call per method return, alongside the same
/// exit event it hands the [`crate::tracer::Tracer`], whenever an `Interpreter` is built with
/// [`Interpreter::with_measurements`](crate::interpreter::Interpreter::with_measurements).
#[derive(Default)]
pub struct MeasurementStore {
    specs: RwLock<Vec<MeasurementSpec>>,
}

impl MeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, spec: MeasurementSpec) {
        tracing::debug!(id = %spec.id, component = %spec.component.decl.name, "measurement spec registered");
        self.specs.write().expect("measurement store lock poisoned").push(spec);
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut specs = self.specs.write().expect("measurement store lock poisoned");
        let before = specs.len();
        specs.retain(|spec| spec.id != id);
        specs.len() != before
    }

    /// Feeds one method-exit observation to every live spec, appending a point wherever it
    /// matches (§4.9). The interpreter calls this alongside `Tracer::record` for every method
    /// return, passing the same live `ComponentHandle` it just traced.
    pub fn observe_exit(&self, component: &ComponentHandle, method: &str, ts: Duration, dur: Duration, ret: Option<&str>) {
        let specs = self.specs.read().expect("measurement store lock poisoned");
        for spec in specs.iter() {
            spec.observe(component, method, ts, dur, ret);
        }
    }

    pub fn get(&self, id: &str) -> Option<AggregatedValue> {
        let specs = self.specs.read().expect("measurement store lock poisoned");
        specs.iter().find(|spec| spec.id == id).map(MeasurementSpec::aggregated)
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.specs.read().expect("measurement store lock poisoned").iter().map(|spec| spec.id.clone()).collect()
    }

    pub fn with_spec<R>(&self, id: &str, f: impl FnOnce(&MeasurementSpec) -> R) -> Option<R> {
        let specs = self.specs.read().expect("measurement store lock poisoned");
        specs.iter().find(|spec| spec.id == id).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ComponentDecl;
    use crate::env::Env;
    use crate::instance::ComponentInstance;
    use std::sync::Arc;

    fn handle(name: &str) -> ComponentHandle {
        let decl = Arc::new(ComponentDecl {
            name: name.to_string(),
            params: vec![],
            uses: vec![],
            methods: vec![],
            is_native: false,
            init_decls: vec![],
        });
        ComponentHandle::from(ComponentInstance::new(decl, Env::root(), None))
    }

    #[test]
    fn matcher_variants_parse_and_accept() {
        assert_eq!(ResultMatcher::parse("*"), ResultMatcher::Any);
        assert!(ResultMatcher::parse("*").accepts(Some("anything")));
        assert_eq!(ResultMatcher::parse("!=false"), ResultMatcher::NotEqual("false".into()));
        assert!(ResultMatcher::parse("!=false").accepts(Some("true")));
        assert!(!ResultMatcher::parse("!=false").accepts(Some("false")));
        assert_eq!(ResultMatcher::parse("true"), ResultMatcher::Exact("true".into()));
        assert!(!ResultMatcher::parse("true").accepts(Some("false")));
    }

    #[test]
    fn count_rate_aggregation_over_a_window() {
        let component = handle("Server");
        let spec = MeasurementSpec::new(
            "m1",
            "lookup rate",
            component.clone(),
            vec!["Lookup".into()],
            ResultMatcher::parse("true"),
            MetricKind::Count,
            Aggregation::Rate,
            Duration::from_secs(10),
            1000,
        );
        for i in 0..10u64 {
            spec.observe(&component, "Lookup", Duration::from_millis(i * 1000), Duration::from_millis(5), Some("true"));
        }
        let agg = spec.aggregated();
        assert_eq!(agg.count, 10);
        assert!((agg.value - 10.0 / 9.0).abs() < 0.1, "rate ~= 10 events over a 9s observed span, got {}", agg.value);
    }

    #[test]
    fn non_matching_component_is_ignored() {
        let component = handle("Server");
        let other = handle("Server");
        let spec = MeasurementSpec::new(
            "m1",
            "lookup rate",
            component,
            vec!["Lookup".into()],
            ResultMatcher::Any,
            MetricKind::Count,
            Aggregation::Sum,
            Duration::from_secs(10),
            1000,
        );
        assert!(!spec.observe(&other, "Lookup", Duration::from_millis(0), Duration::from_millis(5), Some("true")));
        assert_eq!(spec.aggregated().count, 0);
    }

    #[test]
    fn window_excludes_points_older_than_latest_minus_window() {
        let component = handle("Server");
        let spec = MeasurementSpec::new(
            "m1",
            "latency p99",
            component.clone(),
            vec!["Lookup".into()],
            ResultMatcher::Any,
            MetricKind::Latency,
            Aggregation::P99,
            Duration::from_secs(5),
            1000,
        );
        spec.observe(&component, "Lookup", Duration::from_millis(0), Duration::from_millis(500), Some("ok"));
        spec.observe(&component, "Lookup", Duration::from_millis(9000), Duration::from_millis(10), Some("ok"));
        let points = spec.in_window(Duration::from_secs(5));
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 10.0);
    }

    #[test]
    fn circular_buffer_drops_oldest_past_capacity() {
        let mut buffer = CircularBuffer::new(3);
        for i in 0..5 {
            buffer.push(MetricPoint { ts: Duration::from_millis(i), value: i as f64 });
        }
        let latest = buffer.latest_n(10);
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].value, 2.0);
        assert_eq!(latest[2].value, 4.0);
    }
}
