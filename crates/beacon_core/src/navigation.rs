use std::fmt;

use beacon_logging::{beacon_debug, beacon_info, beacon_trace, beacon_warn};

use crate::ansi::AnsiMarkup;
use crate::backoff::BackoffPolicy;
use crate::channel::{Channel, ChannelId, FrameOutcome};
use crate::clock::Clock;
use crate::dispatch::{dispatch, Dispatched};
use crate::effect::{Effect, Notice};
use crate::log_buffer::{FlushPolicy, LogBuffer, StreamDecoder};
use crate::route::{Query, Route, RouteError, RunRef};
use crate::state::Dashboard;
use crate::view::{Reaction, StatusDelivery, View, ViewEffect, ViewFactory};

/// Identifies one log streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log#{}", self.0)
    }
}

struct ActiveRoute {
    route: Route,
    query: Option<Query>,
    view: Box<dyn View>,
    channel: Channel,
}

struct LogSession {
    id: SessionId,
    run: RunRef,
    decoder: StreamDecoder,
    markup: AnsiMarkup,
    buffer: LogBuffer,
}

/// Owns the current route's view, its channel and the log session.
///
/// Every method is an event handler: it updates state and returns the
/// [`Effect`]s to execute. Events tagged with a channel or session id that is
/// no longer current are ignored.
pub struct Navigator {
    factory: Box<dyn ViewFactory>,
    clock: Box<dyn Clock>,
    backoff: BackoffPolicy,
    flush: FlushPolicy,
    dashboard: Dashboard,
    active: Option<ActiveRoute>,
    log: Option<LogSession>,
    next_channel: u64,
    next_session: u64,
}

impl Navigator {
    pub fn new(
        factory: Box<dyn ViewFactory>,
        clock: Box<dyn Clock>,
        backoff: BackoffPolicy,
        flush: FlushPolicy,
    ) -> Self {
        Self {
            factory,
            clock,
            backoff,
            flush,
            dashboard: Dashboard::default(),
            active: None,
            log: None,
            next_channel: 0,
            next_session: 0,
        }
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    pub fn route(&self) -> Option<&Route> {
        self.active.as_ref().map(|active| &active.route)
    }

    pub fn query(&self) -> Option<&Query> {
        self.active.as_ref().and_then(|active| active.query.as_ref())
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.active.as_ref().map(|active| &active.channel)
    }

    pub fn log_session(&self) -> Option<(SessionId, &RunRef)> {
        self.log.as_ref().map(|session| (session.id, &session.run))
    }

    /// Moves to `path`, which may carry its own `?query`. An explicit `query`
    /// takes precedence over one embedded in the path.
    pub fn navigate(&mut self, path: &str, query: Option<Query>) -> Result<Vec<Effect>, RouteError> {
        let (path, embedded) = match path.split_once('?') {
            Some((path, raw)) => (path, Some(Query::parse(raw))),
            None => (path, None),
        };
        let route = Route::resolve(path)?;
        let query = query.or(embedded);

        if let Some(active) = &self.active {
            if active.route == route {
                if active.query == query {
                    beacon_debug!("already at {}", route.path());
                    return Ok(Vec::new());
                }
                return Ok(match query {
                    Some(query) => self.requery(query),
                    None => self.reconnect_with(None),
                });
            }
        }

        let mut effects = self.leave();
        self.enter(route, query, &mut effects);
        Ok(effects)
    }

    /// Reopens the current route's channel with new list parameters,
    /// keeping the view.
    pub fn requery(&mut self, query: Query) -> Vec<Effect> {
        self.reconnect_with(Some(query))
    }

    /// Tears down the current route: closes its channel and cancels any log
    /// session.
    pub fn leave(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(mut active) = self.active.take() {
            beacon_debug!("leaving {}", active.route.path());
            if active.channel.close() {
                effects.push(Effect::CloseChannel {
                    channel: active.channel.id(),
                });
            }
        }
        self.abort_log(&mut effects);
        effects
    }

    pub fn on_connected(&mut self, channel: ChannelId) -> Vec<Effect> {
        if let Some(active) = self.current(channel) {
            active.channel.on_connected();
            beacon_debug!("channel {} connected", channel);
        }
        Vec::new()
    }

    pub fn on_frame(&mut self, channel: ChannelId, frame: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        let local_unix = self.clock.unix_now();
        let Some(active) = self.active.as_mut().filter(|a| a.channel.id() == channel) else {
            beacon_trace!("dropping frame for stale channel {}", channel);
            return effects;
        };
        self.dashboard.connected = true;

        let view_effects = match active.channel.on_frame(frame) {
            FrameOutcome::Ready(status) => {
                active.channel.bind();
                self.dashboard.apply_status(&status, local_unix);
                effects.push(Effect::Notify(Notice::Connected {
                    title: self.dashboard.title.clone(),
                }));
                active.view.status(&status, StatusDelivery::Bind)
            }
            FrameOutcome::Refresh(status) => {
                active.channel.bind();
                self.dashboard.apply_status(&status, local_unix);
                active.view.status(&status, StatusDelivery::Refresh)
            }
            FrameOutcome::Route(envelope) => {
                let view: Option<&mut dyn View> = if active.channel.is_bound() {
                    Some(active.view.as_mut())
                } else {
                    None
                };
                match dispatch(view, &envelope) {
                    Dispatched::Delivered(view_effects) => view_effects,
                    Dispatched::Ignored | Dispatched::NoView => Vec::new(),
                }
            }
            FrameOutcome::Dropped => Vec::new(),
        };
        self.apply_view_effects(view_effects, &mut effects);
        effects
    }

    pub fn on_transport_error(&mut self, channel: ChannelId) -> Vec<Effect> {
        let Some(active) = self.active.as_mut().filter(|a| a.channel.id() == channel) else {
            return Vec::new();
        };
        match active.channel.on_transport_error() {
            Some(delay) => {
                self.dashboard.connected = false;
                vec![
                    Effect::Notify(Notice::Disconnected { retry_in: delay }),
                    Effect::ScheduleReopen { channel, delay },
                ]
            }
            None => Vec::new(),
        }
    }

    pub fn on_reopen_due(&mut self, channel: ChannelId) -> Vec<Effect> {
        let Some(active) = self.current(channel) else {
            return Vec::new();
        };
        if !active.channel.reopen() {
            return Vec::new();
        }
        beacon_info!("reopening channel {} to {}", channel, active.channel.target());
        vec![Effect::OpenChannel {
            channel,
            target: active.channel.target().to_string(),
        }]
    }

    pub fn on_log_chunk(&mut self, session: SessionId, bytes: &[u8]) -> Vec<Effect> {
        let now = self.clock.now();
        let Some(log) = self.live_session(session) else {
            return Vec::new();
        };
        let text = log.decoder.decode(bytes, false);
        if text.is_empty() {
            return Vec::new();
        }
        log.buffer
            .push(&text, now)
            .map(|delay| vec![Effect::ScheduleFlush { session, delay }])
            .unwrap_or_default()
    }

    pub fn on_log_end(&mut self, session: SessionId) -> Vec<Effect> {
        let now = self.clock.now();
        let Some(log) = self.live_session(session) else {
            return Vec::new();
        };
        beacon_debug!("{} for {} reached end of stream", session, log.run.log_path());
        let mut effects = Vec::new();
        let tail = log.decoder.decode(&[], true);
        if !tail.is_empty() {
            if let Some(delay) = log.buffer.push(&tail, now) {
                effects.push(Effect::ScheduleFlush { session, delay });
            }
        }
        if let Some(delay) = log.buffer.end() {
            effects.push(Effect::ScheduleFlush { session, delay });
        }
        effects
    }

    /// A failed log fetch is swallowed: the session stays, the display just
    /// stops growing.
    pub fn on_log_failed(&mut self, session: SessionId, error: &str) -> Vec<Effect> {
        if let Some(log) = self.live_session(session) {
            beacon_warn!("fetching {} failed: {}", log.run.log_path(), error);
        }
        Vec::new()
    }

    pub fn on_flush_due(&mut self, session: SessionId) -> Vec<Effect> {
        let now = self.clock.now();
        let Some(log) = self.live_session(session) else {
            return Vec::new();
        };
        let Some(flush) = log.buffer.flush(now) else {
            return Vec::new();
        };
        let mut markup = log.markup.convert(&flush.text);
        if flush.complete {
            markup.push_str(&log.markup.finish());
        }
        beacon_trace!("{} flushing {} bytes", session, flush.text.len());

        if let Some(active) = self.active.as_mut() {
            if !markup.is_empty() {
                active.view.log_output(&markup);
            }
            if flush.complete {
                active.view.log_complete();
            }
        }
        Vec::new()
    }

    /// Offers a user command to the current view.
    pub fn view_input(&mut self, command: &str) -> Vec<Effect> {
        let Some(active) = self.active.as_mut() else {
            return Vec::new();
        };
        let mut effects = Vec::new();
        match active.view.input(command) {
            Reaction::Handled(view_effects) => self.apply_view_effects(view_effects, &mut effects),
            Reaction::Unhandled => beacon_debug!("`{}` has no meaning on this page", command),
        }
        effects
    }

    fn enter(&mut self, route: Route, query: Option<Query>, effects: &mut Vec<Effect>) {
        let target = route.target(query.as_ref());
        let channel = Channel::open(self.allocate_channel(), target.clone(), self.backoff);
        beacon_info!("entering {} on channel {}", target, channel.id());
        effects.push(Effect::Notify(Notice::RouteEntered(route.clone())));
        effects.push(Effect::OpenChannel {
            channel: channel.id(),
            target,
        });
        let view = self.factory.create(&route, &self.dashboard.clock_skew);
        self.active = Some(ActiveRoute {
            route,
            query,
            view,
            channel,
        });
    }

    fn reconnect_with(&mut self, query: Option<Query>) -> Vec<Effect> {
        let id = self.allocate_channel();
        let backoff = self.backoff;
        let Some(active) = self.active.as_mut() else {
            beacon_warn!("requery with no active route");
            return Vec::new();
        };

        let mut effects = Vec::new();
        let view_bound = active.channel.is_bound();
        if active.channel.close() {
            effects.push(Effect::CloseChannel {
                channel: active.channel.id(),
            });
        }
        let target = active.route.target(query.as_ref());
        beacon_debug!("requerying {} on channel {}", target, id);
        active.channel = if view_bound {
            Channel::open_rebinding(id, target.clone(), backoff)
        } else {
            Channel::open(id, target.clone(), backoff)
        };
        active.query = query;
        effects.push(Effect::OpenChannel { channel: id, target });
        effects
    }

    fn apply_view_effects(&mut self, view_effects: Vec<ViewEffect>, effects: &mut Vec<Effect>) {
        for view_effect in view_effects {
            match view_effect {
                ViewEffect::Requery(query) => effects.extend(self.requery(query)),
                ViewEffect::Redirect(path) => match self.navigate(&path, None) {
                    Ok(more) => effects.extend(more),
                    Err(err) => beacon_warn!("cannot redirect to {}: {}", path, err),
                },
                ViewEffect::OpenLog(run) => self.open_log(run, effects),
                ViewEffect::AbortLog => self.abort_log(effects),
            }
        }
    }

    fn open_log(&mut self, run: RunRef, effects: &mut Vec<Effect>) {
        self.abort_log(effects);
        self.next_session += 1;
        let id = SessionId(self.next_session);
        beacon_debug!("{} streaming {}", id, run.log_path());
        effects.push(Effect::OpenLog {
            session: id,
            run: run.clone(),
        });
        self.log = Some(LogSession {
            id,
            run,
            decoder: StreamDecoder::new(),
            markup: AnsiMarkup::new(),
            buffer: LogBuffer::new(self.flush),
        });
    }

    fn abort_log(&mut self, effects: &mut Vec<Effect>) {
        if let Some(mut log) = self.log.take() {
            log.buffer.abort();
            effects.push(Effect::AbortLog { session: log.id });
        }
    }

    fn allocate_channel(&mut self) -> ChannelId {
        self.next_channel += 1;
        ChannelId(self.next_channel)
    }

    fn current(&mut self, channel: ChannelId) -> Option<&mut ActiveRoute> {
        self.active.as_mut().filter(|a| a.channel.id() == channel)
    }

    fn live_session(&mut self, session: SessionId) -> Option<&mut LogSession> {
        self.log
            .as_mut()
            .filter(|log| log.id == session && log.buffer.is_live())
    }
}
