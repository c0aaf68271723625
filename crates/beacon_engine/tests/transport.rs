use beacon_engine::{
    EventTransport, FailureKind, LogSource, MonitorSettings, ReqwestEventTransport,
    ReqwestLogSource,
};
use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer) -> MonitorSettings {
    MonitorSettings {
        server: server.uri(),
        ..MonitorSettings::default()
    }
}

#[tokio::test]
async fn event_stream_yields_frames_and_skips_keepalives() {
    beacon_logging::initialize_for_tests();
    let server = MockServer::start().await;
    let body = concat!(
        ":\n\n",
        "data: {\"type\":\"status\",\"data\":{}}\n\n",
        ":\n\n",
        "data: {\"type\":\"job_queued\",\"data\":{\"name\":\"a\"}}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .and(query_param("page", "2"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let settings = settings(&server);
    let transport = ReqwestEventTransport::new(&settings).expect("client");
    let url = settings.resolve("/jobs?page=2").expect("url");
    let frames: Vec<_> = transport
        .connect(url)
        .await
        .expect("connected")
        .collect()
        .await;

    assert_eq!(
        frames,
        vec![
            Ok(r#"{"type":"status","data":{}}"#.to_string()),
            Ok(r#"{"type":"job_queued","data":{"name":"a"}}"#.to_string()),
        ]
    );
}

#[tokio::test]
async fn event_stream_rejects_http_errors() {
    beacon_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let settings = settings(&server);
    let transport = ReqwestEventTransport::new(&settings).expect("client");
    let err = match transport.connect(settings.resolve("/").expect("url")).await {
        Ok(_) => panic!("expected failure"),
        Err(err) => err,
    };
    assert_eq!(err.kind, FailureKind::HttpStatus(503));
}

#[tokio::test]
async fn event_stream_rejects_other_content() {
    beacon_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html/>", "text/html"))
        .mount(&server)
        .await;

    let settings = settings(&server);
    let transport = ReqwestEventTransport::new(&settings).expect("client");
    let err = match transport.connect(settings.resolve("/jobs").expect("url")).await {
        Ok(_) => panic!("expected failure"),
        Err(err) => err,
    };
    assert_eq!(
        err.kind,
        FailureKind::UnexpectedContentType {
            content_type: "text/html".to_string()
        }
    );
}

#[tokio::test]
async fn log_source_streams_raw_body() {
    beacon_logging::initialize_for_tests();
    let server = MockServer::start().await;
    let body = "\x1b[32mok\x1b[0m\nsecond line\n".repeat(200);
    Mock::given(method("GET"))
        .and(path("/log/build/3"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.clone(), "text/plain"))
        .mount(&server)
        .await;

    let settings = settings(&server);
    let source = ReqwestLogSource::new(&settings).expect("client");
    let mut chunks = source
        .open(settings.resolve("log/build/3").expect("url"))
        .await
        .expect("opened");
    let mut received = Vec::new();
    while let Some(chunk) = chunks.next().await {
        received.extend_from_slice(&chunk.expect("chunk"));
    }
    assert_eq!(String::from_utf8(received).expect("utf-8"), body);
}

#[tokio::test]
async fn log_source_reports_missing_run() {
    beacon_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/log/build/99"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let settings = settings(&server);
    let source = ReqwestLogSource::new(&settings).expect("client");
    let err = match source.open(settings.resolve("log/build/99").expect("url")).await {
        Ok(_) => panic!("expected failure"),
        Err(err) => err,
    };
    assert_eq!(err.kind, FailureKind::HttpStatus(404));
}
