use std::fmt;
use std::time::Duration;

use beacon_logging::{beacon_info, beacon_warn};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::envelope::{Envelope, Status};

/// Identifies one opened channel. A reconnect keeps the id; a requery or a
/// navigation allocates a new one, so late events for old ids can be told
/// apart and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    /// Closed on purpose; never reopened.
    ClosedClean,
    /// Closed by a transport failure; a reopen is scheduled.
    ClosedError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Waiting for the first `status` on this connection.
    Unbound,
    /// The view stays bound across a requery; the first `status` on the new
    /// connection refreshes it.
    Rebinding,
    Bound,
}

/// What the navigator should do with a decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// First `status` on an unbound connection; bind the view with it.
    Ready(Status),
    /// First `status` after a requery; refresh the already bound view.
    Refresh(Status),
    /// Anything else; route it through the dispatcher.
    Route(Envelope),
    Dropped,
}

/// A reconnecting push-update subscription for one target.
#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    target: String,
    state: ChannelState,
    binding: Binding,
    backoff: Backoff,
    reopen_pending: bool,
}

impl Channel {
    pub fn open(id: ChannelId, target: impl Into<String>, policy: BackoffPolicy) -> Self {
        Self {
            id,
            target: target.into(),
            state: ChannelState::Connecting,
            binding: Binding::Unbound,
            backoff: Backoff::new(policy),
            reopen_pending: false,
        }
    }

    /// Opens the replacement channel of a requery whose view is already
    /// bound.
    pub fn open_rebinding(id: ChannelId, target: impl Into<String>, policy: BackoffPolicy) -> Self {
        Self {
            binding: Binding::Rebinding,
            ..Self::open(id, target, policy)
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn binding(&self) -> Binding {
        self.binding
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.binding, Binding::Bound | Binding::Rebinding)
    }

    pub fn is_closed(&self) -> bool {
        self.state == ChannelState::ClosedClean
    }

    /// The delay a failure right now would schedule.
    pub fn next_delay(&self) -> Duration {
        self.backoff.peek()
    }

    pub fn on_connected(&mut self) {
        if self.state == ChannelState::Connecting {
            self.state = ChannelState::Open;
        }
    }

    /// Decodes a frame and classifies it against the binding state.
    pub fn on_frame(&mut self, frame: &str) -> FrameOutcome {
        if self.is_closed() {
            return FrameOutcome::Dropped;
        }
        // A frame proves the connection is up even if the connect event was missed.
        if self.state == ChannelState::Connecting {
            self.state = ChannelState::Open;
        }

        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                beacon_warn!("channel {} dropped undecodable frame: {}", self.id, err);
                return FrameOutcome::Dropped;
            }
        };

        match (self.binding, envelope) {
            (Binding::Unbound, Envelope::Status(status)) => FrameOutcome::Ready(status),
            (Binding::Rebinding, Envelope::Status(status)) => FrameOutcome::Refresh(status),
            (_, envelope) => FrameOutcome::Route(envelope),
        }
    }

    /// Marks the view bound; a successful bind resets the backoff.
    pub fn bind(&mut self) {
        self.binding = Binding::Bound;
        self.backoff.reset();
    }

    /// Records a transport failure. Returns the reopen delay, or `None` when
    /// the channel was closed on purpose or a reopen is already pending.
    pub fn on_transport_error(&mut self) -> Option<Duration> {
        if self.is_closed() || self.reopen_pending {
            return None;
        }
        self.state = ChannelState::ClosedError;
        self.binding = Binding::Unbound;
        self.reopen_pending = true;
        let delay = self.backoff.next_delay();
        beacon_info!(
            "channel {} to {} failed; reopening in {:?}",
            self.id,
            self.target,
            delay
        );
        Some(delay)
    }

    /// Consumes a pending reopen. Returns false when there was nothing to
    /// reopen, e.g. the channel was closed while the timer ran.
    pub fn reopen(&mut self) -> bool {
        if self.is_closed() || !self.reopen_pending {
            return false;
        }
        self.reopen_pending = false;
        self.state = ChannelState::Connecting;
        true
    }

    /// Closes the channel for good. Idempotent; returns true only on the
    /// first call.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = ChannelState::ClosedClean;
        self.reopen_pending = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn channel() -> Channel {
        Channel::open(ChannelId(1), "/jobs", BackoffPolicy::default())
    }

    #[test]
    fn first_status_is_ready_then_routed() {
        let mut channel = channel();
        channel.on_connected();
        let frame = r#"{"type":"status","data":{}}"#;
        assert!(matches!(channel.on_frame(frame), FrameOutcome::Ready(_)));
        channel.bind();
        assert!(matches!(
            channel.on_frame(frame),
            FrameOutcome::Route(Envelope::Status(_))
        ));
    }

    #[test]
    fn requery_channel_refreshes_then_fails_back_to_unbound() {
        let mut channel = Channel::open_rebinding(ChannelId(2), "/jobs?page=1", BackoffPolicy::default());
        assert!(channel.is_bound());
        let frame = r#"{"type":"status","data":{}}"#;
        assert!(matches!(channel.on_frame(frame), FrameOutcome::Refresh(_)));
        channel.bind();
        assert!(matches!(
            channel.on_frame(frame),
            FrameOutcome::Route(Envelope::Status(_))
        ));

        channel.on_transport_error();
        assert!(channel.reopen());
        assert!(matches!(channel.on_frame(frame), FrameOutcome::Ready(_)));
    }

    #[test]
    fn non_status_while_unbound_is_routed() {
        let mut channel = channel();
        let outcome = channel.on_frame(r#"{"type":"job_queued","data":{"name":"a"}}"#);
        assert!(matches!(outcome, FrameOutcome::Route(Envelope::JobQueued(_))));
        assert_eq!(channel.binding(), Binding::Unbound);
    }

    #[test]
    fn bad_frame_is_dropped() {
        let mut channel = channel();
        assert_eq!(channel.on_frame("{nope"), FrameOutcome::Dropped);
        assert_eq!(channel.on_frame(r#"{"data":{}}"#), FrameOutcome::Dropped);
    }

    #[test]
    fn only_one_reopen_pending_at_a_time() {
        let mut channel = channel();
        assert_eq!(channel.on_transport_error(), Some(Duration::from_millis(500)));
        assert_eq!(channel.on_transport_error(), None);
        assert!(channel.reopen());
        assert!(!channel.reopen());
        assert_eq!(channel.on_transport_error(), Some(Duration::from_millis(750)));
    }

    #[test]
    fn failure_unbinds() {
        let mut channel = channel();
        channel.bind();
        channel.on_transport_error();
        assert_eq!(channel.binding(), Binding::Unbound);
        assert_eq!(channel.state(), ChannelState::ClosedError);
    }

    #[test]
    fn close_is_idempotent_and_cancels_reopen() {
        let mut channel = channel();
        channel.on_transport_error();
        assert!(channel.close());
        assert!(!channel.close());
        assert!(!channel.reopen());
        assert_eq!(channel.on_transport_error(), None);
        assert_eq!(
            channel.on_frame(r#"{"type":"status","data":{}}"#),
            FrameOutcome::Dropped
        );
    }

    #[test]
    fn bind_resets_backoff() {
        let mut channel = channel();
        channel.on_transport_error();
        channel.reopen();
        channel.on_transport_error();
        channel.reopen();
        assert_eq!(channel.next_delay(), Duration::from_millis(1125));
        channel.bind();
        assert_eq!(channel.next_delay(), Duration::from_millis(500));
    }
}
