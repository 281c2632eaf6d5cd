//! A runtime that interprets declarative models of distributed systems — components, methods,
//! dependencies, probabilistic outcomes, and cooperative concurrency — and produces two
//! complementary analyses of a model method: single-path stochastic simulation with a
//! hierarchical trace, and analytical flow analysis that converges per-method arrival rates
//! across the component graph. A live measurement store consumes trace events into windowed
//! aggregates.
//!
//! The front-end that parses a model's source text and resolves names into the [`ast`] types
//! below is out of scope for this crate: every type here is a plain, publicly constructible
//! struct or enum, built directly by a caller (or a test) rather than produced by a parser.
//!
//! # Layout
//!
//! - [`value`] — the tagged runtime value model every other subsystem shares.
//! - [`env`] — lexically scoped environments.
//! - [`ast`] — the model AST this crate consumes.
//! - [`instance`] — loaded files, materialized systems, and the live component graph.
//! - [`initializer`] — compiles a component/system body into its constructing statement list.
//! - [`interpreter`] — the tree-walking simulator.
//! - [`concurrency`] — `go`/`gobatch`/`wait` futures and aggregators.
//! - [`tracer`] — the hierarchical trace event log.
//! - [`flow`] — the analytical fixed-point arrival-rate solver.
//! - [`measurement`] — windowed aggregates driven by trace events.
//! - [`batch`] — distributes independent simulation runs across a worker pool.
//! - [`native`] — the native-component bridge and its two opt-in capability interfaces.
//! - [`config`] — the typed `RuntimeConfig` tunable surface.
//! - [`errors`] — typed error values for every fallible boundary.

pub mod ast;
pub mod batch;
pub mod concurrency;
pub mod config;
pub mod env;
pub mod errors;
pub mod flow;
pub mod initializer;
pub mod instance;
pub mod interpreter;
pub mod measurement;
pub mod native;
pub mod tracer;
pub mod value;

pub use ast::{AggregatorKind, BinaryOp, ComponentDecl, Expr, File, Literal, MethodDecl, Stmt, SystemDecl, UnaryOp};
pub use batch::{run_call_in_batches, BatchOutcome, RunOutcome};
pub use config::RuntimeConfig;
pub use errors::{EvalError, FlowError, FlowWarning, InitError, NativeError, UninitializedDependency};
pub use flow::{analyze, FlowEdge, FlowMetadata, FlowResult, FlowStatus, GeneratorEntryPoint};
pub use instance::{ComponentHandle, ComponentInstance, Runtime, SystemInstance};
pub use interpreter::{CallContext, Interpreter};
pub use measurement::{Aggregation, AggregatedValue, MeasurementSpec, MeasurementStore, MetricKind, MetricPoint, ResultMatcher};
pub use native::{ArrivalRateCapable, ConditionalFlow, FlowAnalyzable, FlowPattern, NativeComponent, NativeRegistry, NativeReturn};
pub use tracer::{events_to_json, NoopTracer, RecordingTracer, TraceEvent, TraceKind, Tracer};
pub use value::{EnumValue, MethodValue, Outcomes, RefValue, Value, ValueKind};
