//! Multicast fan-out with per-listener backpressure isolation

pub mod governor;
pub mod registry;
pub mod sink;
pub mod stream;

pub use governor::{BackpressureGovernor, FanOutReport, WriteOutcome};
pub use registry::ListenerRegistry;
pub use sink::{ListenerId, Sink, SinkPhase};
pub use stream::ListenerStream;
