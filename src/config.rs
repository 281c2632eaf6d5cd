//! Typed, explicit configuration. Nothing in this crate reads environment variables or files —
//! every tunable named in the design is a field here, constructed by the caller.

/// Tunables threaded into the interpreter, flow analyzer, and measurement store at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Default circular-buffer capacity for a new `MeasurementSpec`.
    pub measurement_buffer_capacity: usize,
    /// Maximum fixed-point iterations the flow solver will run before giving up.
    pub flow_max_iterations: usize,
    /// Damping factor applied to the delta between iterations (`next = old + damping * (new -
    /// old)`).
    pub flow_damping: f64,
    /// Convergence threshold on the max per-key change between iterations.
    pub flow_convergence_threshold: f64,
    /// Call-stack depth at which the flow solver gives up on a branch, treating it as a cycle.
    pub flow_cycle_depth_limit: usize,
    /// Utilization above which a resource-limited component's success rate starts degrading.
    pub flow_utilization_degradation_threshold: f64,
    /// Worker pool size for the batch runner; `None` means "available parallelism".
    pub batch_worker_count: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            measurement_buffer_capacity: 1000,
            flow_max_iterations: 10,
            flow_damping: 0.5,
            flow_convergence_threshold: 0.01,
            flow_cycle_depth_limit: 20,
            flow_utilization_degradation_threshold: 0.8,
            batch_worker_count: None,
        }
    }
}
