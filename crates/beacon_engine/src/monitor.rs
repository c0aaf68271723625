use std::collections::VecDeque;
use std::future::pending;
use std::sync::{mpsc as std_mpsc, Arc};

use beacon_core::{
    ChannelId, Clock, Effect, Navigator, Notice, Query, RunRef, SessionId, SystemClock,
    ViewFactory,
};
use beacon_logging::{beacon_debug, beacon_info, beacon_warn};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    ChunkStream, EventTransport, FrameStream, LogSource, MonitorSettings, ReqwestEventTransport,
    ReqwestLogSource, TransportError,
};

/// Requests from the user interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorCommand {
    Navigate { path: String, query: Option<Query> },
    Requery(Query),
    /// A page command such as `next` or `sort name`.
    Input(String),
    Leave,
}

/// Receives connection and navigation notices.
pub trait MonitorSink: Send + Sync {
    fn emit(&self, notice: Notice);
}

pub struct ChannelMonitorSink {
    tx: std_mpsc::Sender<Notice>,
}

impl ChannelMonitorSink {
    pub fn new(tx: std_mpsc::Sender<Notice>) -> Self {
        Self { tx }
    }
}

impl MonitorSink for ChannelMonitorSink {
    fn emit(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }
}

/// Clock backed by tokio time, so paused-time tests drive flush scheduling.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> std::time::Instant {
        Instant::now().into_std()
    }

    fn unix_now(&self) -> i64 {
        SystemClock.unix_now()
    }
}

/// Cloneable sender side of a [`Monitor`].
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    commands: mpsc::UnboundedSender<MonitorCommand>,
    shutdown: CancellationToken,
}

impl MonitorHandle {
    pub fn send(&self, command: MonitorCommand) {
        let _ = self.commands.send(command);
    }

    pub fn navigate(&self, path: impl Into<String>) {
        self.send(MonitorCommand::Navigate {
            path: path.into(),
            query: None,
        });
    }

    pub fn requery(&self, query: Query) {
        self.send(MonitorCommand::Requery(query));
    }

    pub fn input(&self, command: impl Into<String>) {
        self.send(MonitorCommand::Input(command.into()));
    }

    /// Stops the monitor; it leaves the current route before returning.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

enum ChannelIo {
    Connecting(BoxFuture<'static, Result<FrameStream, TransportError>>),
    Streaming(FrameStream),
}

struct LiveChannel {
    id: ChannelId,
    io: ChannelIo,
}

enum LogIo {
    Opening(BoxFuture<'static, Result<ChunkStream, TransportError>>),
    Streaming(ChunkStream),
}

struct LiveLog {
    session: SessionId,
    io: LogIo,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy)]
struct Timer<K> {
    key: K,
    deadline: Instant,
}

enum ChannelWake {
    Connected(Result<FrameStream, TransportError>),
    Frame(Option<Result<String, TransportError>>),
}

enum LogWake {
    Opened(Result<ChunkStream, TransportError>),
    Chunk(Option<Result<Bytes, TransportError>>),
}

enum Wake {
    Command(MonitorCommand),
    Channel(ChannelId, ChannelWake),
    ReopenDue(ChannelId),
    Log(SessionId, LogWake),
    FlushDue(SessionId),
}

/// Single-task event loop executing [`Effect`]s for a [`Navigator`].
///
/// Frames, log chunks and timers are handled one at a time on the calling
/// task, so views observe frames strictly in arrival order.
pub struct Monitor {
    settings: MonitorSettings,
    navigator: Navigator,
    transport: Arc<dyn EventTransport>,
    logs: Arc<dyn LogSource>,
    sink: Box<dyn MonitorSink>,
    commands: mpsc::UnboundedReceiver<MonitorCommand>,
    shutdown: CancellationToken,
    channel: Option<LiveChannel>,
    reopen: Option<Timer<ChannelId>>,
    log: Option<LiveLog>,
    flush: Option<Timer<SessionId>>,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        factory: Box<dyn ViewFactory>,
        transport: Arc<dyn EventTransport>,
        logs: Arc<dyn LogSource>,
        sink: Box<dyn MonitorSink>,
    ) -> (Self, MonitorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let navigator = Navigator::new(
            factory,
            Box::new(TokioClock),
            settings.backoff,
            settings.flush,
        );
        let monitor = Self {
            settings,
            navigator,
            transport,
            logs,
            sink,
            commands: rx,
            shutdown: shutdown.clone(),
            channel: None,
            reopen: None,
            log: None,
            flush: None,
        };
        let handle = MonitorHandle {
            commands: tx,
            shutdown,
        };
        (monitor, handle)
    }

    /// Builds a monitor that talks HTTP through reqwest.
    pub fn connect(
        settings: MonitorSettings,
        factory: Box<dyn ViewFactory>,
        sink: Box<dyn MonitorSink>,
    ) -> Result<(Self, MonitorHandle), TransportError> {
        let transport = Arc::new(ReqwestEventTransport::new(&settings)?);
        let logs = Arc::new(ReqwestLogSource::new(&settings)?);
        Ok(Self::new(settings, factory, transport, logs, sink))
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    /// Runs until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => break,
                },
                (id, event) = channel_event(&mut self.channel) => Wake::Channel(id, event),
                id = timer_due(&self.reopen) => Wake::ReopenDue(id),
                (session, event) = log_event(&mut self.log) => Wake::Log(session, event),
                session = timer_due(&self.flush) => Wake::FlushDue(session),
            };
            let effects = self.handle(wake);
            self.execute(effects);
        }

        beacon_info!("monitor stopping");
        let effects = self.navigator.leave();
        self.execute(effects);
    }

    fn handle(&mut self, wake: Wake) -> Vec<Effect> {
        match wake {
            Wake::Command(command) => self.handle_command(command),
            Wake::Channel(id, ChannelWake::Connected(Ok(stream))) => {
                if let Some(live) = self.channel.as_mut().filter(|live| live.id == id) {
                    live.io = ChannelIo::Streaming(stream);
                }
                self.navigator.on_connected(id)
            }
            Wake::Channel(id, ChannelWake::Connected(Err(err))) => {
                beacon_warn!("channel {} could not connect: {}", id, err);
                self.channel = None;
                self.navigator.on_transport_error(id)
            }
            Wake::Channel(id, ChannelWake::Frame(Some(Ok(frame)))) => {
                self.navigator.on_frame(id, &frame)
            }
            Wake::Channel(id, ChannelWake::Frame(Some(Err(err)))) => {
                beacon_warn!("channel {} failed: {}", id, err);
                self.channel = None;
                self.navigator.on_transport_error(id)
            }
            Wake::Channel(id, ChannelWake::Frame(None)) => {
                beacon_info!("channel {} closed by server", id);
                self.channel = None;
                self.navigator.on_transport_error(id)
            }
            Wake::ReopenDue(id) => {
                self.reopen = None;
                self.navigator.on_reopen_due(id)
            }
            Wake::Log(session, LogWake::Opened(Ok(stream))) => {
                if let Some(live) = self.log.as_mut().filter(|live| live.session == session) {
                    let stream = stream
                        .take_until(live.cancel.clone().cancelled_owned())
                        .boxed();
                    live.io = LogIo::Streaming(stream);
                }
                Vec::new()
            }
            Wake::Log(session, LogWake::Opened(Err(err)))
            | Wake::Log(session, LogWake::Chunk(Some(Err(err)))) => {
                self.log = None;
                self.navigator.on_log_failed(session, &err.to_string())
            }
            Wake::Log(session, LogWake::Chunk(Some(Ok(bytes)))) => {
                self.navigator.on_log_chunk(session, &bytes)
            }
            Wake::Log(session, LogWake::Chunk(None)) => {
                self.log = None;
                self.navigator.on_log_end(session)
            }
            Wake::FlushDue(session) => {
                self.flush = None;
                self.navigator.on_flush_due(session)
            }
        }
    }

    fn handle_command(&mut self, command: MonitorCommand) -> Vec<Effect> {
        beacon_debug!("command {:?}", command);
        match command {
            MonitorCommand::Navigate { path, query } => {
                self.navigator.navigate(&path, query).unwrap_or_else(|err| {
                    beacon_warn!("cannot navigate to {}: {}", path, err);
                    Vec::new()
                })
            }
            MonitorCommand::Requery(query) => self.navigator.requery(query),
            MonitorCommand::Input(input) => self.navigator.view_input(&input),
            MonitorCommand::Leave => self.navigator.leave(),
        }
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::OpenChannel { channel, target } => {
                    queue.extend(self.open_channel(channel, &target));
                }
                Effect::CloseChannel { channel } => {
                    if self.channel.as_ref().is_some_and(|live| live.id == channel) {
                        self.channel = None;
                    }
                    if self.reopen.is_some_and(|timer| timer.key == channel) {
                        self.reopen = None;
                    }
                }
                Effect::ScheduleReopen { channel, delay } => {
                    self.reopen = Some(Timer {
                        key: channel,
                        deadline: Instant::now() + delay,
                    });
                }
                Effect::OpenLog { session, run } => {
                    queue.extend(self.open_log(session, &run));
                }
                Effect::AbortLog { session } => {
                    if let Some(live) = self.log.take_if(|live| live.session == session) {
                        live.cancel.cancel();
                    }
                    if self.flush.is_some_and(|timer| timer.key == session) {
                        self.flush = None;
                    }
                }
                Effect::ScheduleFlush { session, delay } => {
                    self.flush = Some(Timer {
                        key: session,
                        deadline: Instant::now() + delay,
                    });
                }
                Effect::Notify(notice) => {
                    log_notice(&notice);
                    self.sink.emit(notice);
                }
            }
        }
    }

    fn open_channel(&mut self, channel: ChannelId, target: &str) -> Vec<Effect> {
        if self.reopen.is_some_and(|timer| timer.key == channel) {
            self.reopen = None;
        }
        match self.settings.resolve(target) {
            Ok(url) => {
                let transport = self.transport.clone();
                let connect = async move { transport.connect(url).await }.boxed();
                self.channel = Some(LiveChannel {
                    id: channel,
                    io: ChannelIo::Connecting(connect),
                });
                Vec::new()
            }
            Err(err) => {
                beacon_warn!("channel {} has no usable url: {}", channel, err);
                self.channel = None;
                self.navigator.on_transport_error(channel)
            }
        }
    }

    fn open_log(&mut self, session: SessionId, run: &RunRef) -> Vec<Effect> {
        if let Some(previous) = self.log.take() {
            previous.cancel.cancel();
        }
        match self.settings.resolve(&run.log_path()) {
            Ok(url) => {
                let logs = self.logs.clone();
                let open = async move { logs.open(url).await }.boxed();
                self.log = Some(LiveLog {
                    session,
                    io: LogIo::Opening(open),
                    cancel: CancellationToken::new(),
                });
                Vec::new()
            }
            Err(err) => self.navigator.on_log_failed(session, &err.to_string()),
        }
    }
}

fn log_notice(notice: &Notice) {
    match notice {
        Notice::Connected { title } => {
            beacon_info!("connected to {}", title.as_deref().unwrap_or("server"))
        }
        Notice::Disconnected { retry_in } => {
            beacon_warn!("disconnected; retrying in {}ms", retry_in.as_millis())
        }
        Notice::RouteEntered(route) => beacon_debug!("entered {}", route.path()),
    }
}

async fn channel_event(channel: &mut Option<LiveChannel>) -> (ChannelId, ChannelWake) {
    let Some(live) = channel.as_mut() else {
        return pending().await;
    };
    match &mut live.io {
        ChannelIo::Connecting(connect) => (live.id, ChannelWake::Connected(connect.await)),
        ChannelIo::Streaming(frames) => (live.id, ChannelWake::Frame(frames.next().await)),
    }
}

async fn log_event(log: &mut Option<LiveLog>) -> (SessionId, LogWake) {
    let Some(live) = log.as_mut() else {
        return pending().await;
    };
    match &mut live.io {
        LogIo::Opening(open) => (live.session, LogWake::Opened(open.await)),
        LogIo::Streaming(chunks) => (live.session, LogWake::Chunk(chunks.next().await)),
    }
}

async fn timer_due<K: Copy>(timer: &Option<Timer<K>>) -> K {
    match timer {
        Some(timer) => {
            sleep_until(timer.deadline).await;
            timer.key
        }
        None => pending().await,
    }
}
