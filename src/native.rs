//! The native-component bridge (§4.5a) and the two opt-in capability interfaces (§6).
//!
//! Native components are registered as trait objects, not discovered by reflection: a
//! per-component registration of typed method stubs does the argument conversion, matching the
//! "native bridge as a trait, not a reflector" design note (§9).

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::NativeError;
use crate::instance::ComponentInstance;
use crate::value::{Outcomes, Value};

/// Either a plain value or a probabilistic outcome, returned by a native method. The caller
/// decides whether to sample immediately (simulating) or pass the distribution through
/// unsampled (flow analysis) via `shouldSample`.
pub enum NativeReturn {
    Value(Value),
    Outcomes(Outcomes),
}

impl From<Value> for NativeReturn {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Outcomes> for NativeReturn {
    fn from(outcomes: Outcomes) -> Self {
        Self::Outcomes(outcomes)
    }
}

/// A native component receiver. `invoke` is the single dispatch boundary (§4.5a): arguments are
/// already-converted `Value`s, and `should_sample` tells a stochastic native method whether to
/// fold a sampled outcome's time into the clock itself or defer sampling to the caller.
pub trait NativeComponent: Send + Sync {
    /// Invokes `method` with `args`, resolved against `receiver`'s current parameter state.
    ///
    /// # Errors
    /// Returns `NativeError` if `method` is unknown or argument conversion fails.
    fn invoke(
        &self,
        receiver: &ComponentInstance,
        method: &str,
        args: &[Value],
        should_sample: bool,
    ) -> Result<NativeReturn, NativeError>;

    /// Optional: a native component that tracks its own per-method arrival rate. Returning
    /// `None` marks the component as not implementing this capability; it is then treated as a
    /// passive leaf for `set/get_arrival_rate` purposes (the flow solver still credits inflow to
    /// it through `ComponentInstance::set_arrival_rate`, which does not require this trait).
    fn as_arrival_rate_capable(&self) -> Option<&dyn ArrivalRateCapable> {
        None
    }

    /// Optional: a native component that can describe its own flow pattern (§4.8). Returning
    /// `None` marks it as a leaf resource with no outflows and success rate 1.0.
    fn as_flow_analyzable(&self) -> Option<&dyn FlowAnalyzable> {
        None
    }
}

/// `SetArrivalRate`/`GetArrivalRate`/`GetTotalArrivalRate` capability (§6).
pub trait ArrivalRateCapable {
    fn set_arrival_rate(&self, method: &str, rate: f64);
    fn get_arrival_rate(&self, method: &str) -> f64;
    fn get_total_arrival_rate(&self) -> f64;
}

/// A conditional outflow: executed only when some upstream branch condition holds, with its own
/// probability of being taken.
#[derive(Debug, Clone)]
pub struct ConditionalFlow {
    pub condition_probability: f64,
    pub outflows: HashMap<String, f64>,
}

/// What a native component reports when asked how `inRate` of traffic into `method` fans out
/// (§4.8, §6).
#[derive(Debug, Clone, Default)]
pub struct FlowPattern {
    /// Target dependency name -> outgoing rate.
    pub outflows: HashMap<String, f64>,
    pub success_rate: f64,
    pub amplification: f64,
    pub service_time_seconds: f64,
    pub conditional_flows: Vec<ConditionalFlow>,
}

impl FlowPattern {
    /// A pattern for a leaf resource: absorbs `in_rate`, degrading past `config`'s utilization
    /// threshold when `capacity` is `Some`.
    pub fn leaf(success_rate: f64) -> Self {
        Self { outflows: HashMap::new(), success_rate, amplification: 1.0, service_time_seconds: 0.0, conditional_flows: Vec::new() }
    }
}

/// `GetFlowPattern` capability (§6, §4.8).
pub trait FlowAnalyzable {
    fn get_flow_pattern(&self, method: &str, in_rate: f64) -> FlowPattern;
}

/// Maps a native component's declared kind name to a factory that builds a fresh receiver for
/// each `new` (§4.5a "registered through a trait object ... keyed by (component kind, method
/// name)"). Kept as plain data on `Interpreter` rather than a global so tests can register
/// fixtures without contaminating other tests.
#[derive(Default, Clone)]
pub struct NativeRegistry {
    factories: HashMap<String, Arc<dyn Fn() -> Arc<dyn NativeComponent> + Send + Sync>>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        factory: impl Fn() -> Arc<dyn NativeComponent> + Send + Sync + 'static,
    ) {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn construct(&self, kind: &str) -> Option<Arc<dyn NativeComponent>> {
        self.factories.get(kind).map(|factory| factory())
    }
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRegistry").field("kinds", &self.factories.len()).finish()
    }
}
