use std::time::Duration;

use crate::channel::ChannelId;
use crate::navigation::SessionId;
use crate::route::{Route, RunRef};

/// Work the executor must carry out on behalf of the [`Navigator`].
///
/// [`Navigator`]: crate::Navigator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Connect to `target` (path plus query, relative to the server base).
    OpenChannel { channel: ChannelId, target: String },
    /// Drop the connection and any reopen timer for `channel`.
    CloseChannel { channel: ChannelId },
    ScheduleReopen { channel: ChannelId, delay: Duration },
    OpenLog { session: SessionId, run: RunRef },
    /// Cancel the in-flight read and any flush timer for `session`.
    AbortLog { session: SessionId },
    ScheduleFlush { session: SessionId, delay: Duration },
    Notify(Notice),
}

/// Connection and navigation events for the user-facing indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Connected { title: Option<String> },
    Disconnected { retry_in: Duration },
    RouteEntered(Route),
}
