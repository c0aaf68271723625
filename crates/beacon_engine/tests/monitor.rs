use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{ClockSkew, Notice, Query, Route, RunRef, Status, StatusDelivery, View, ViewEffect};
use beacon_engine::{
    ChannelMonitorSink, ChunkStream, EventTransport, FailureKind, FrameStream, LogSource, Monitor,
    MonitorHandle, MonitorSettings, TransportError,
};
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use url::Url;

const STATUS: &str = r#"{"type":"status","data":{}}"#;

/// Each connect pops the next scripted outcome; frames are delivered and the
/// stream then ends as if the server closed it.
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Vec<&'static str>, FailureKind>>>,
    attempts: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<Vec<&'static str>, FailureKind>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            attempts: Arc::default(),
        }
    }
}

#[async_trait]
impl EventTransport for ScriptedTransport {
    async fn connect(&self, url: Url) -> Result<FrameStream, TransportError> {
        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        self.attempts.lock().unwrap().push((target, Instant::now()));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(frames)) => Ok(stream::iter(frames.into_iter().map(|f| Ok(f.to_string()))).boxed()),
            Some(Err(kind)) => Err(TransportError {
                kind,
                message: "scripted".to_string(),
            }),
            None => Ok(stream::pending().boxed()),
        }
    }
}

struct StaticLogs {
    chunks: Vec<&'static [u8]>,
}

#[async_trait]
impl LogSource for StaticLogs {
    async fn open(&self, _url: Url) -> Result<ChunkStream, TransportError> {
        let chunks: Vec<Result<Bytes, TransportError>> = self
            .chunks
            .iter()
            .map(|chunk| Ok(Bytes::from_static(chunk)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

type Events = Arc<Mutex<Vec<String>>>;

struct RecordingView {
    events: Events,
    open_log: Option<RunRef>,
}

impl View for RecordingView {
    fn status(&mut self, _status: &Status, delivery: StatusDelivery) -> Vec<ViewEffect> {
        self.events.lock().unwrap().push(format!("status {delivery:?}"));
        match (&self.open_log, delivery) {
            (Some(run), StatusDelivery::Bind) => vec![ViewEffect::OpenLog(run.clone())],
            _ => Vec::new(),
        }
    }

    fn log_output(&mut self, markup: &str) {
        self.events.lock().unwrap().push(format!("log {markup}"));
    }

    fn log_complete(&mut self) {
        self.events.lock().unwrap().push("log complete".to_string());
    }
}

struct Setup {
    monitor: Monitor,
    handle: MonitorHandle,
    attempts: Arc<Mutex<Vec<(String, Instant)>>>,
    events: Events,
    notices: mpsc::Receiver<Notice>,
}

fn setup(
    script: Vec<Result<Vec<&'static str>, FailureKind>>,
    log_chunks: Vec<&'static [u8]>,
) -> Setup {
    beacon_logging::initialize_for_tests();
    let transport = ScriptedTransport::new(script);
    let attempts = transport.attempts.clone();
    let events: Events = Arc::default();
    let view_events = events.clone();
    let factory = move |route: &Route, _skew: &ClockSkew| -> Box<dyn View> {
        let open_log = match route {
            Route::Run { name, .. } => Some(RunRef::new(name.clone(), 3)),
            _ => None,
        };
        Box::new(RecordingView {
            events: view_events.clone(),
            open_log,
        })
    };
    let (tx, notices) = mpsc::channel();
    let (monitor, handle) = Monitor::new(
        MonitorSettings::default(),
        Box::new(factory),
        Arc::new(transport),
        Arc::new(StaticLogs { chunks: log_chunks }),
        Box::new(ChannelMonitorSink::new(tx)),
    );
    Setup {
        monitor,
        handle,
        attempts,
        events,
        notices,
    }
}

async fn run_for(monitor: Monitor, duration: Duration) {
    let _ = tokio::time::timeout(duration, monitor.run()).await;
}

fn offsets(attempts: &Mutex<Vec<(String, Instant)>>) -> Vec<u128> {
    let attempts = attempts.lock().unwrap();
    let start = attempts[0].1;
    attempts
        .iter()
        .map(|(_, at)| (*at - start).as_millis())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn failed_connects_back_off_exponentially() {
    let failures = (0..10).map(|_| Err(FailureKind::Network)).collect();
    let setup = setup(failures, Vec::new());
    setup.handle.navigate("/");

    run_for(setup.monitor, Duration::from_millis(3_000)).await;

    assert_eq!(offsets(&setup.attempts), vec![0, 500, 1_250, 2_375]);
    let retries: Vec<Duration> = setup
        .notices
        .try_iter()
        .filter_map(|notice| match notice {
            Notice::Disconnected { retry_in } => Some(retry_in),
            _ => None,
        })
        .collect();
    assert_eq!(
        retries,
        vec![
            Duration::from_millis(500),
            Duration::from_millis(750),
            Duration::from_millis(1_125),
            Duration::from_millis(1_687) + Duration::from_micros(500),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn server_close_reconnects_and_rebinds() {
    let setup = setup(
        vec![
            Ok(vec![STATUS, STATUS]),
            Err(FailureKind::HttpStatus(502)),
            Ok(vec![STATUS]),
        ],
        Vec::new(),
    );
    setup.handle.navigate("/jobs");

    run_for(setup.monitor, Duration::from_millis(5_000)).await;

    // Successful bind resets the backoff, so the server close waits 500ms,
    // the 502 waits 750ms, and the last stream close after rebinding 500ms.
    assert_eq!(offsets(&setup.attempts), vec![0, 500, 1_250, 1_750]);
    assert_eq!(
        *setup.events.lock().unwrap(),
        vec!["status Bind", "status Refresh", "status Bind"]
    );
    let notices: Vec<Notice> = setup.notices.try_iter().collect();
    assert_eq!(notices[0], Notice::RouteEntered(Route::Jobs));
    assert_eq!(notices[1], Notice::Connected { title: None });
    assert_eq!(
        notices[2],
        Notice::Disconnected {
            retry_in: Duration::from_millis(500)
        }
    );
}

#[tokio::test(start_paused = true)]
async fn requery_before_connect_opens_one_channel() {
    let setup = setup(vec![Ok(vec![STATUS])], Vec::new());
    setup.handle.navigate("/jobs/build");
    setup.handle.requery(Query {
        page: 2,
        ..Query::default()
    });

    run_for(setup.monitor, Duration::from_millis(100)).await;

    let attempts: Vec<String> = setup
        .attempts
        .lock()
        .unwrap()
        .iter()
        .map(|(target, _)| target.clone())
        .collect();
    assert_eq!(attempts, vec!["/jobs/build?page=2&field=number&order=dsc"]);
}

#[tokio::test(start_paused = true)]
async fn run_page_streams_log_to_completion() {
    let setup = setup(
        vec![Ok(vec![STATUS])],
        vec![b"\x1b[1mbuild", b"ing\n", b"caf\xc3", b"\xa9 <ok>\n"],
    );
    setup.handle.navigate("/jobs/build/3");

    run_for(setup.monitor, Duration::from_millis(2_000)).await;

    let events = setup.events.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("status Bind"));
    assert_eq!(events.last().map(String::as_str), Some("log complete"));
    let rendered: String = events
        .iter()
        .filter_map(|event| event.strip_prefix("log "))
        .filter(|markup| *markup != "complete")
        .collect();
    assert_eq!(
        rendered,
        "<span class=\"ansi-bold\">building\ncafé &lt;ok&gt;\n</span>"
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_loop() {
    let setup = setup(Vec::new(), Vec::new());
    setup.handle.navigate("/");
    setup.handle.shutdown();
    tokio::time::timeout(Duration::from_secs(1), setup.monitor.run())
        .await
        .expect("monitor stopped");
}
