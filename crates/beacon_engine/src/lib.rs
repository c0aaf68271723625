//! Beacon engine: async IO around the core state machines.
//!
//! The [`Monitor`] runs on a single task. It owns the live connection, the
//! log fetch and the timers, feeds their events to the core `Navigator`, and
//! executes the effects it answers with.
mod log_source;
mod monitor;
mod settings;
mod transport;
mod types;

pub use log_source::{LogSource, ReqwestLogSource};
pub use monitor::{
    ChannelMonitorSink, Monitor, MonitorCommand, MonitorHandle, MonitorSink, TokioClock,
};
pub use settings::MonitorSettings;
pub use transport::{EventTransport, ReqwestEventTransport};
pub use types::{ChunkStream, FailureKind, FrameStream, TransportError};
