use super::*;
use std::{
    collections::HashMap,
    io,
    sync::Mutex,
    time::Duration,
};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode as HttpStatus, Uri},
    routing::{get, post},
    Json, Router,
};
use flux::Handler;
use serde_json::json;
use shared::{
    domain::AlertKind,
    error::UNKNOWN_ERROR_MESSAGE,
    protocol::DockerAction,
};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::endpoints::{ContainerVerb, ImageVerb, RegistryError};

#[derive(Default)]
struct Recorder {
    actions: Mutex<Vec<Action>>,
}

impl Recorder {
    fn actions(&self) -> Vec<Action> {
        self.actions.lock().expect("recorder lock").clone()
    }

    fn closed(&self) -> Option<StreamClosedPayload> {
        self.actions().into_iter().find_map(|action| match action {
            Action::StreamClosed(payload) => Some(payload),
            _ => None,
        })
    }

    fn stream_events(&self) -> Vec<StreamEvent> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                Action::DockerStream { event, .. } => Some(event),
                _ => None,
            })
            .collect()
    }
}

impl Handler<Action> for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn handle(&self, action: &Action) {
        self.actions.lock().expect("recorder lock").push(action.clone());
    }
}

#[derive(Default)]
struct RecordingAlerts {
    created: Mutex<Vec<AlertRequest>>,
}

impl RecordingAlerts {
    fn created(&self) -> Vec<(AlertKind, String)> {
        self.created
            .lock()
            .expect("alerts lock")
            .iter()
            .map(|alert| (alert.kind, alert.message.clone()))
            .collect()
    }
}

impl AlertSurface for RecordingAlerts {
    fn create(&self, alert: AlertRequest) {
        self.created.lock().expect("alerts lock").push(alert);
    }

    fn clear(&self) {
        self.created.lock().expect("alerts lock").clear();
    }
}

struct Fixture {
    gateway: Gateway,
    recorder: Arc<Recorder>,
    alerts: Arc<RecordingAlerts>,
}

fn fixture(api_base: &str) -> Fixture {
    let dispatcher = Arc::new(Dispatcher::new());
    let recorder = Arc::new(Recorder::default());
    assert!(dispatcher.register(&recorder));
    let alerts = Arc::new(RecordingAlerts::default());
    let gateway =
        Gateway::new(api_base, dispatcher, alerts.clone()).expect("valid api base");
    Fixture {
        gateway,
        recorder,
        alerts,
    }
}

async fn spawn_api(router: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test api");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve test api");
    });
    format!("http://{addr}/api")
}

type BodySender = mpsc::UnboundedSender<Result<String, io::Error>>;
type BodySlot = Arc<Mutex<Option<mpsc::UnboundedReceiver<Result<String, io::Error>>>>>;

/// An api whose pull endpoint streams whatever the test pushes into the
/// returned sender.
async fn spawn_streaming_api() -> (String, BodySender) {
    async fn pull(State(slot): State<BodySlot>) -> Body {
        let chunks = slot
            .lock()
            .expect("slot lock")
            .take()
            .expect("one pull per test api");
        Body::from_stream(UnboundedReceiverStream::new(chunks))
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let slot: BodySlot = Arc::new(Mutex::new(Some(rx)));
    let router = Router::new()
        .route("/api/d/:host/images/create", post(pull))
        .with_state(slot);
    (spawn_api(router).await, tx)
}

fn pull_request(pattern: &str) -> Request {
    Request::new("alpha")
        .data(json!({"fromImage": "alpine", "tag": "latest"}))
        .pattern(pattern)
}

async fn next_event(handle: &mut StreamHandle) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(5), handle.next_event())
        .await
        .expect("event in time")
        .expect("stream still open")
}

async fn wait_for_close(recorder: &Recorder) -> StreamClosedPayload {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(closed) = recorder.closed() {
                return closed;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stream closed in time")
}

fn closed_port_base() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}/api")
}

#[tokio::test]
async fn success_dispatches_payload_with_echoed_host_and_id() {
    let router = Router::new().route(
        "/api/d/:host/containers/:id/json",
        get(|Path((_, id)): Path<(String, String)>| async move {
            Json(json!({"Id": format!("{id}0000"), "State": {"Status": "running"}}))
        }),
    );
    let f = fixture(&spawn_api(router).await);

    let payload = f
        .gateway
        .request(
            Endpoint::Containers(ContainerVerb::Inspect),
            &Request::new("alpha").id("abc1"),
        )
        .await
        .expect("inspect succeeds");

    assert_eq!(payload.host, "alpha");
    assert_eq!(payload.id.as_deref(), Some("abc1"));
    assert_eq!(payload.response["Id"], json!("abc10000"));
    assert_eq!(
        f.recorder.actions(),
        vec![Action::Docker {
            kind: DockerAction::InspectContainer,
            payload,
        }]
    );
    assert!(f.alerts.created().is_empty());
}

#[tokio::test]
async fn request_sends_payload_envelope_query_and_json_content_type() {
    let router = Router::new().route(
        "/api/d/:host/containers/create",
        post(
            |headers: HeaderMap, Query(query): Query<HashMap<String, String>>, body: String| async move {
                let content_type = headers
                    .get("content-type")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
                Json(json!({"contentType": content_type, "query": query, "body": body}))
            },
        ),
    );
    let f = fixture(&spawn_api(router).await);

    let payload = f
        .gateway
        .request_namespace(
            "containers.create",
            &Request::new("alpha")
                .query("name", "web")
                .data(json!({"Image": "nginx"})),
        )
        .await
        .expect("create succeeds");

    assert_eq!(payload.response["contentType"], json!("application/json"));
    assert_eq!(payload.response["query"], json!({"name": "web"}));
    assert_eq!(payload.response["body"], json!({"Payload": {"Image": "nginx"}}));
}

#[tokio::test]
async fn host_is_encoded_as_one_segment_and_text_bodies_become_strings() {
    let router = Router::new().fallback(|uri: Uri| async move { uri.path().to_string() });
    let f = fixture(&spawn_api(router).await);

    let payload = f
        .gateway
        .request(Endpoint::Containers(ContainerVerb::List), &Request::new("dev box/1"))
        .await
        .expect("list succeeds");

    assert_eq!(
        payload.response,
        json!("/api/d/dev%20box%2F1/containers/json")
    );
}

#[tokio::test]
async fn ids_cannot_climb_out_of_their_endpoint() {
    let router = Router::new().fallback(|uri: Uri| async move { uri.path().to_string() });
    let f = fixture(&spawn_api(router).await);

    let traversal = f
        .gateway
        .request(
            Endpoint::Containers(ContainerVerb::Inspect),
            &Request::new("alpha").id("../../images/json"),
        )
        .await
        .expect("inspect reaches the server");
    let escaped_dots = f
        .gateway
        .request(
            Endpoint::Containers(ContainerVerb::Inspect),
            &Request::new("alpha").id("%2e%2e"),
        )
        .await
        .expect("inspect reaches the server");

    assert_eq!(
        traversal.response,
        json!("/api/d/alpha/containers/..%2F..%2Fimages%2Fjson/json")
    );
    assert_eq!(
        escaped_dots.response,
        json!("/api/d/alpha/containers/%252e%252e/json")
    );
}

#[tokio::test]
async fn dot_segments_are_refused_before_any_traffic() {
    let f = fixture(&closed_port_base());

    let by_id = f
        .gateway
        .request(
            Endpoint::Containers(ContainerVerb::Inspect),
            &Request::new("alpha").id(".."),
        )
        .await;
    let by_host = f
        .gateway
        .request(Endpoint::Containers(ContainerVerb::List), &Request::new("."))
        .await;

    match by_id {
        Err(err @ GatewayError::InvalidSegment { field: "id", .. }) => {
            assert!(err.is_caller_bug());
        }
        other => panic!("expected invalid id, got {other:?}"),
    }
    assert!(matches!(
        by_host,
        Err(GatewayError::InvalidSegment { field: "host", .. })
    ));
    assert!(f.alerts.created().is_empty());
    assert!(f.recorder.actions().is_empty());
}

#[tokio::test]
async fn empty_success_body_decodes_to_null() {
    let router = Router::new().route(
        "/api/d/:host/containers/:id/start",
        post(|| async { HttpStatus::NO_CONTENT }),
    );
    let f = fixture(&spawn_api(router).await);

    let payload = f
        .gateway
        .request(
            Endpoint::Containers(ContainerVerb::Start),
            &Request::new("alpha").id("abc1"),
        )
        .await
        .expect("start succeeds");

    assert_eq!(payload.response, Value::Null);
    assert_eq!(f.recorder.actions().len(), 1);
}

#[tokio::test]
async fn unauthorized_logs_out_once_and_never_reports_success() {
    let router = Router::new().route(
        "/api/d/:host/containers/json",
        get(|| async {
            (
                HttpStatus::UNAUTHORIZED,
                Json(json!({"Cause": "auth", "Message": "session expired"})),
            )
        }),
    );
    let f = fixture(&spawn_api(router).await);

    let result = f
        .gateway
        .request(Endpoint::Containers(ContainerVerb::List), &Request::new("alpha"))
        .await;

    assert!(matches!(result, Err(GatewayError::Unauthorized)));
    assert_eq!(f.recorder.actions(), vec![Action::AuthLogout]);
    assert_eq!(
        f.alerts.created(),
        vec![
            (AlertKind::Info, INVALID_CREDENTIALS_MESSAGE.to_string()),
            (AlertKind::Danger, "session expired".to_string()),
        ]
    );
}

#[tokio::test]
async fn server_errors_raise_a_danger_alert_with_the_docker_message() {
    let router = Router::new()
        .route(
            "/api/d/:host/containers/:id/stop",
            post(|| async {
                (
                    HttpStatus::CONFLICT,
                    Json(json!({"message": "container already stopped"})),
                )
            }),
        )
        .route(
            "/api/d/:host/images/json",
            get(|| async { HttpStatus::INTERNAL_SERVER_ERROR }),
        );
    let f = fixture(&spawn_api(router).await);

    let stop = f
        .gateway
        .request(
            Endpoint::Containers(ContainerVerb::Stop),
            &Request::new("alpha").id("abc1"),
        )
        .await;
    let list = f
        .gateway
        .request(Endpoint::Images(ImageVerb::List), &Request::new("alpha"))
        .await;

    match stop {
        Err(GatewayError::Status { status, message }) => {
            assert_eq!(status, StatusCode::CONFLICT);
            assert_eq!(message, "container already stopped");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert_eq!(
        list.map_err(|err| err.status()).err(),
        Some(Some(StatusCode::INTERNAL_SERVER_ERROR))
    );
    assert!(f.recorder.actions().is_empty());
    assert_eq!(
        f.alerts.created(),
        vec![
            (AlertKind::Danger, "container already stopped".to_string()),
            (AlertKind::Danger, UNKNOWN_ERROR_MESSAGE.to_string()),
        ]
    );
}

#[tokio::test]
async fn transport_failures_raise_a_danger_alert() {
    let f = fixture(&closed_port_base());

    let result = f
        .gateway
        .request(Endpoint::Images(ImageVerb::List), &Request::new("alpha"))
        .await;

    assert!(matches!(result, Err(GatewayError::Transport(_))));
    let alerts = f.alerts.created();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].0, AlertKind::Danger);
    assert!(f.recorder.actions().is_empty());
}

#[tokio::test]
async fn unknown_namespace_fails_without_traffic_or_alerts() {
    let f = fixture(&closed_port_base());

    let result = f
        .gateway
        .request_namespace("images.delete", &Request::new("alpha"))
        .await;

    match result {
        Err(err @ GatewayError::Registry(RegistryError::UnknownVerb { .. })) => {
            assert!(err.is_caller_bug());
        }
        other => panic!("expected registry error, got {other:?}"),
    }
    assert!(f.alerts.created().is_empty());
    assert!(f.recorder.actions().is_empty());
}

#[tokio::test]
async fn cancelled_spawned_request_reports_cancellation() {
    let router = Router::new().route(
        "/api/d/:host/images/json",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(json!([]))
        }),
    );
    let f = fixture(&spawn_api(router).await);

    let handle = f
        .gateway
        .spawn_request(Endpoint::Images(ImageVerb::List), Request::new("alpha"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    assert!(matches!(handle.join().await, Err(GatewayError::Cancelled)));
    assert!(f.recorder.actions().is_empty());
}

#[test]
fn url_for_keeps_the_api_base_path() {
    let f = fixture("https://dashboard.example/api/");

    let url = f
        .gateway
        .url_for("prod", "/containers/abc/json")
        .expect("url");

    assert_eq!(
        url.as_str(),
        "https://dashboard.example/api/d/prod/containers/abc/json"
    );
}

#[test]
fn rejects_api_bases_that_cannot_carry_a_path() {
    let dispatcher = Arc::new(Dispatcher::new());
    let alerts = Arc::new(RecordingAlerts::default());

    assert!(matches!(
        Gateway::new("mailto:ops@example.com", Arc::clone(&dispatcher), alerts.clone()),
        Err(GatewayError::ApiBase { .. })
    ));
    assert!(matches!(
        Gateway::new("not a url", dispatcher, alerts),
        Err(GatewayError::ApiBase { .. })
    ));
}

#[test]
fn data_fields_flatten_into_query_pairs() {
    let pairs = flatten_query(Some(&json!({
        "fromImage": "alpine",
        "tag": "3.20",
        "limit": 5,
        "skip": null,
    })));

    assert_eq!(
        pairs,
        vec![
            ("fromImage".to_string(), "alpine".to_string()),
            ("limit".to_string(), "5".to_string()),
            ("tag".to_string(), "3.20".to_string()),
        ]
    );
    assert!(flatten_query(Some(&json!(["not", "an", "object"]))).is_empty());
    assert!(flatten_query(None).is_empty());
}

#[tokio::test]
async fn stream_dispatches_items_incrementally_in_document_order() {
    let (base, body) = spawn_streaming_api().await;
    let f = fixture(&base);

    let mut handle = f
        .gateway
        .stream(Endpoint::Images(ImageVerb::Pull), pull_request("items.*"))
        .await
        .expect("stream opens");

    body.send(Ok(r#"{"items":[{"layer":"a"},"#.to_string()))
        .expect("send chunk");
    let first = next_event(&mut handle).await;
    assert_eq!(first.response, json!({"layer": "a"}));
    assert_eq!(first.pattern, "items.*");
    assert_eq!(first.host, "alpha");

    body.send(Ok(r#"{"layer":"b"},{"layer":"c"}]}"#.to_string()))
        .expect("send chunk");
    drop(body);
    let second = next_event(&mut handle).await;
    let third = next_event(&mut handle).await;
    assert_eq!(second.response, json!({"layer": "b"}));
    assert_eq!(third.response, json!({"layer": "c"}));

    assert_eq!(handle.closed().await, StreamOutcome::Completed { events: 3 });

    let actions = f.recorder.actions();
    assert_eq!(actions.len(), 4);
    let layers: Vec<Value> = f
        .recorder
        .stream_events()
        .into_iter()
        .map(|event| event.response["layer"].clone())
        .collect();
    assert_eq!(layers, vec![json!("a"), json!("b"), json!("c")]);
    assert!(actions[..3].iter().all(|action| matches!(
        action,
        Action::DockerStream {
            kind: DockerAction::PullImage,
            ..
        }
    )));
    assert_eq!(
        actions[3],
        Action::StreamClosed(StreamClosedPayload {
            id: None,
            host: "alpha".into(),
            action: DockerAction::PullImage,
            outcome: StreamOutcome::Completed { events: 3 },
        })
    );
}

#[tokio::test]
async fn stream_sends_request_data_as_query_parameters() {
    let router = Router::new().route(
        "/api/d/:host/images/create",
        post(|Query(query): Query<HashMap<String, String>>| async move {
            Json(json!({"status": "Pulling", "query": query}))
        }),
    );
    let f = fixture(&spawn_api(router).await);

    let mut handle = f
        .gateway
        .stream(
            Endpoint::Images(ImageVerb::Pull),
            pull_request("{status}").query("platform", "linux/amd64"),
        )
        .await
        .expect("stream opens");

    let event = next_event(&mut handle).await;
    assert_eq!(
        event.response["query"],
        json!({"fromImage": "alpine", "tag": "latest", "platform": "linux/amd64"})
    );
    assert!(handle.closed().await.is_completed());
}

#[tokio::test]
async fn stream_rejects_missing_or_invalid_patterns_before_connecting() {
    let f = fixture(&closed_port_base());

    let missing = f
        .gateway
        .stream(Endpoint::Images(ImageVerb::Pull), Request::new("alpha"))
        .await;
    let invalid = f
        .gateway
        .stream(Endpoint::Images(ImageVerb::Pull), pull_request("items["))
        .await;

    assert!(matches!(missing, Err(GatewayError::MissingPatterns)));
    assert!(matches!(invalid, Err(GatewayError::Pattern(_))));
    assert!(f.alerts.created().is_empty());
}

#[tokio::test]
async fn stream_opening_with_401_follows_the_logout_path() {
    let router = Router::new().route(
        "/api/d/:host/images/create",
        post(|| async { HttpStatus::UNAUTHORIZED }),
    );
    let f = fixture(&spawn_api(router).await);

    let result = f
        .gateway
        .stream(Endpoint::Images(ImageVerb::Pull), pull_request("!"))
        .await;

    assert!(matches!(result, Err(GatewayError::Unauthorized)));
    assert_eq!(f.recorder.actions(), vec![Action::AuthLogout]);
    assert_eq!(f.alerts.created()[0].1, INVALID_CREDENTIALS_MESSAGE);
}

#[tokio::test]
async fn cancelling_a_stream_closes_it_as_cancelled() {
    let (base, body) = spawn_streaming_api().await;
    let f = fixture(&base);

    let mut handle = f
        .gateway
        .stream(Endpoint::Images(ImageVerb::Pull), pull_request("!"))
        .await
        .expect("stream opens");
    body.send(Ok("{\"status\":\"Pulling fs layer\",\"id\":\"a1\"}\n".to_string()))
        .expect("send chunk");
    next_event(&mut handle).await;

    handle.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.closed())
        .await
        .expect("closed in time");

    assert_eq!(outcome, StreamOutcome::Cancelled { events: 1 });
    assert_eq!(
        f.recorder.closed().map(|closed| closed.outcome),
        Some(StreamOutcome::Cancelled { events: 1 })
    );
    drop(body);
}

#[tokio::test]
async fn dropping_the_handle_detaches_without_cancelling() {
    let (base, body) = spawn_streaming_api().await;
    let f = fixture(&base);

    let handle = f
        .gateway
        .stream(Endpoint::Images(ImageVerb::Pull), pull_request("!"))
        .await
        .expect("stream opens");
    drop(handle);

    body.send(Ok("{\"status\":\"Downloading\",\"id\":\"a1\"}\n".to_string()))
        .expect("send chunk");
    body.send(Ok("{\"status\":\"Download complete\",\"id\":\"a1\"}\n".to_string()))
        .expect("send chunk");
    drop(body);

    let closed = wait_for_close(&f.recorder).await;
    assert_eq!(closed.outcome, StreamOutcome::Completed { events: 2 });
    assert_eq!(f.recorder.stream_events().len(), 2);
}

#[tokio::test]
async fn truncated_stream_body_closes_as_interrupted() {
    let (base, body) = spawn_streaming_api().await;
    let f = fixture(&base);

    let handle = f
        .gateway
        .stream(Endpoint::Images(ImageVerb::Pull), pull_request("!"))
        .await
        .expect("stream opens");
    body.send(Ok("{\"status\":\"Downloading\"}\n{\"status\":".to_string()))
        .expect("send chunk");
    drop(body);

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.closed())
        .await
        .expect("closed in time");

    assert!(matches!(outcome, StreamOutcome::Interrupted { events: 1, .. }));
    assert_eq!(f.recorder.closed().map(|closed| closed.outcome), Some(outcome));
}
