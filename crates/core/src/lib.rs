//! # ptides-core
//!
//! Building blocks of a PTIDES-style real-time scheduling kernel: model time
//! and tags, time-stamped events, the ordered event store, the computation
//! graph, causality (minimum-delay) analysis and the safe-to-process oracle.
//!
//! ## Module Overview
//! - [`time`], [`tag`] – model time and the `(timestamp, microstep)` order.
//! - [`event`] – data and pure events.
//! - [`queue`], [`receiver`], [`store`] – the global queue, the per-port
//!   index and the store keeping both consistent.
//! - [`graph`] – read-only node/port arena with dependency declarations.
//! - [`dependency`], [`causality`] – delay algebra and minimum-delay queries.
//! - [`safe`] – the safe-to-process oracle and same-tag batching.
//! - [`clock`] – physical clock sources.
//! - [`config`] – platform configuration and its builder.
//!
//! Dispatching and preemption live in `ptides-sched`.

pub mod causality;
pub mod clock;
pub mod config;
pub mod dependency;
pub mod error;
pub mod event;
pub mod graph;
pub mod queue;
pub mod receiver;
pub mod safe;
pub mod store;
pub mod sync;
pub mod tag;
pub mod time;
pub mod trace;

pub use causality::{Boundary, CausalityAnalysis, CausalityInterface};
pub use clock::{PhysicalClock, SimulatedClock, SystemClock};
pub use config::{PlatformConfig, PlatformConfigBuilder, PolicyKind};
pub use dependency::{BooleanDependency, Dependency, RealDependency, SuperdenseDependency};
pub use error::{CapacityExceeded, ConfigurationError, CoreError, CoreResult, InvariantViolation};
pub use event::{Destination, Event, EventHandle, EventId, Payload};
pub use graph::{Graph, GraphBuilder, GraphDescription, NodeId, PortId, PortKind};
pub use ptides_trace::{TraceBackend, TraceConfig, TraceError, TraceHook, Tracer, TracerHandle};
pub use queue::{EventQueue, InsertionOrder, NumericPayload, Priority, TieBreak, TieBreakKind};
pub use safe::{Oracle, SafetyMargins, Scan, Verdict};
pub use store::EventStore;
pub use tag::Tag;
pub use time::Time;
