//! Beacon core: sans-IO synchronization state machines.
//!
//! Nothing in this crate performs IO or reads the wall clock on its own. The
//! [`Navigator`] consumes transport and timer events and answers with
//! [`Effect`]s that an executor (see `beacon_engine`) carries out.
mod ansi;
mod backoff;
mod channel;
mod clock;
mod dispatch;
mod effect;
mod envelope;
mod log_buffer;
mod navigation;
mod route;
mod sse;
mod state;
mod view;

pub use ansi::AnsiMarkup;
pub use backoff::{Backoff, BackoffPolicy};
pub use channel::{Binding, Channel, ChannelId, ChannelState, FrameOutcome};
pub use clock::{Clock, SystemClock};
pub use dispatch::{dispatch, Dispatched};
pub use effect::{Effect, Notice};
pub use envelope::{
    Artifact, DecodeError, Envelope, JobCompleted, JobQueued, JobStarted, RunResult, Status,
};
pub use log_buffer::{Flush, FlushPolicy, LogBuffer, StreamDecoder};
pub use navigation::{Navigator, SessionId};
pub use route::{Query, Route, RouteError, RunNumber, RunRef, SortOrder};
pub use sse::EventStreamDecoder;
pub use state::{ClockSkew, Dashboard};
pub use view::{Reaction, StatusDelivery, View, ViewEffect, ViewFactory};
