//! Pub/Sub REST client against a local mock of the v1 API

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::net::TcpListener;

use jobgauge::publisher;
use jobgauge::queue::{MessageQueue, PubSubClient, PubSubSettings, QueueError, TopicPublisher};

#[derive(Debug, Default)]
struct Mock {
    topics: HashSet<String>,
    subscriptions: HashSet<String>,
    /// Responses served to `:pull`, in order; an empty queue means no messages
    pulls: VecDeque<Value>,
    pull_calls: usize,
    fail_pulls_with: Option<u16>,
    acked: Vec<String>,
    published: Vec<Value>,
    created_topics: Vec<String>,
    seeks: Vec<String>,
}

type Shared = Arc<Mutex<Mock>>;

fn split_action(segment: &str) -> (&str, Option<&str>) {
    match segment.split_once(':') {
        Some((name, action)) => (name, Some(action)),
        None => (segment, None),
    }
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": { "code": 404, "message": format!("{what} not found") } })),
    )
        .into_response()
}

async fn get_subscription(
    State(mock): State<Shared>,
    Path((project, segment)): Path<(String, String)>,
) -> Response {
    let mock = mock.lock().unwrap();
    if !mock.subscriptions.contains(&segment) {
        return not_found("Subscription");
    }
    Json(json!({
        "name": format!("projects/{project}/subscriptions/{segment}"),
        "topic": format!("projects/{project}/topics/jobs"),
        "ackDeadlineSeconds": 600
    }))
    .into_response()
}

async fn post_subscription(
    State(mock): State<Shared>,
    Path((_project, segment)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let (name, action) = split_action(&segment);
    let mut mock = mock.lock().unwrap();
    if !mock.subscriptions.contains(name) {
        return not_found("Subscription");
    }

    match action {
        Some("pull") => {
            assert_eq!(body["maxMessages"], 1);
            mock.pull_calls += 1;
            if let Some(status) = mock.fail_pulls_with {
                let status = StatusCode::from_u16(status).unwrap();
                return (status, "backend unavailable").into_response();
            }
            let response = mock.pulls.pop_front().unwrap_or_else(|| json!({}));
            Json(response).into_response()
        }
        Some("acknowledge") => {
            for id in body["ackIds"].as_array().unwrap() {
                mock.acked.push(id.as_str().unwrap().to_string());
            }
            Json(json!({})).into_response()
        }
        Some("seek") => {
            mock.seeks.push(body["time"].as_str().unwrap().to_string());
            Json(json!({})).into_response()
        }
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn get_topic(
    State(mock): State<Shared>,
    Path((project, topic)): Path<(String, String)>,
) -> Response {
    if mock.lock().unwrap().topics.contains(&topic) {
        Json(json!({ "name": format!("projects/{project}/topics/{topic}") })).into_response()
    } else {
        not_found("Topic")
    }
}

async fn put_topic(
    State(mock): State<Shared>,
    Path((project, topic)): Path<(String, String)>,
) -> Response {
    let mut mock = mock.lock().unwrap();
    if !mock.topics.insert(topic.clone()) {
        return (StatusCode::CONFLICT, "Topic already exists").into_response();
    }
    mock.created_topics.push(topic.clone());
    Json(json!({ "name": format!("projects/{project}/topics/{topic}") })).into_response()
}

async fn post_topic(
    State(mock): State<Shared>,
    Path((_project, segment)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let (topic, action) = split_action(&segment);
    let mut mock = mock.lock().unwrap();
    if action != Some("publish") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    if !mock.topics.contains(topic) {
        return not_found("Topic");
    }

    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    let first = mock.published.len();
    let ids: Vec<String> = (first..first + messages.len())
        .map(|n| format!("msg-{}", n + 1))
        .collect();
    mock.published.extend(messages);
    Json(json!({ "messageIds": ids })).into_response()
}

async fn start_mock(mock: Mock) -> (PubSubClient, Shared) {
    let shared = Arc::new(Mutex::new(mock));
    let app = Router::new()
        .route(
            "/v1/projects/{project}/subscriptions/{segment}",
            get(get_subscription).post(post_subscription),
        )
        .route(
            "/v1/projects/{project}/topics/{segment}",
            get(get_topic).put(put_topic).post(post_topic),
        )
        .with_state(shared.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut settings = PubSubSettings::new("demo-project");
    settings.endpoint = Some(format!("http://{address}/v1"));
    settings.idle_poll = Duration::from_millis(10);
    (PubSubClient::new(settings).unwrap(), shared)
}

fn received(ack_id: &str, message_id: &str, data: &str, num_jobs: &str) -> Value {
    json!({
        "receivedMessages": [{
            "ackId": ack_id,
            "deliveryAttempt": 1,
            "message": {
                "data": BASE64.encode(data),
                "attributes": { "numJobs": num_jobs },
                "messageId": message_id,
                "publishTime": "2024-05-01T10:00:00Z"
            }
        }]
    })
}

fn subscribed() -> Mock {
    Mock {
        subscriptions: HashSet::from(["work-sub".to_string()]),
        ..Mock::default()
    }
}

#[tokio::test]
async fn test_subscription_reports_ack_deadline() {
    let (client, _mock) = start_mock(subscribed()).await;

    let subscription = client.subscription("work-sub").await.unwrap();

    assert_eq!(subscription.path(), "projects/demo-project/subscriptions/work-sub");
    assert_eq!(subscription.ack_deadline(), Some(Duration::from_secs(600)));
}

#[tokio::test]
async fn test_missing_subscription_is_not_found() {
    let (client, _mock) = start_mock(subscribed()).await;

    let error = client.subscription("nope").await.unwrap_err();

    assert!(matches!(error, QueueError::NotFound(_)));
    assert!(!error.is_transient());
}

#[tokio::test]
async fn test_pull_waits_through_empty_responses_then_acks() {
    let mut mock = subscribed();
    mock.pulls.push_back(json!({}));
    mock.pulls.push_back(json!({ "receivedMessages": [] }));
    mock.pulls.push_back(received("ack-7", "m-7", r#"{"id":7,"duration":"90s"}"#, "9"));
    let (client, mock) = start_mock(mock).await;

    let subscription = client.subscription("work-sub").await.unwrap();
    let message = subscription.pull().await.unwrap();

    assert_eq!(message.ack_id, "ack-7");
    assert_eq!(message.message_id, "m-7");
    assert_eq!(message.attributes["numJobs"], "9");
    assert_eq!(message.data.as_ref(), br#"{"id":7,"duration":"90s"}"#);
    assert_eq!(message.delivery_attempt, Some(1));
    assert_eq!(mock.lock().unwrap().pull_calls, 3);

    subscription.ack(&message.ack_id).await.unwrap();
    assert_eq!(mock.lock().unwrap().acked, vec!["ack-7".to_string()]);
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let mut mock = subscribed();
    mock.fail_pulls_with = Some(503);
    let (client, _mock) = start_mock(mock).await;

    let subscription = client.subscription("work-sub").await.unwrap();
    let error = subscription.pull().await.unwrap_err();

    assert!(matches!(error, QueueError::Status { status: 503, .. }));
    assert!(error.is_transient());
}

#[tokio::test]
async fn test_publish_batch_creates_topic_and_tags_messages() {
    let (client, mock) = start_mock(subscribed()).await;

    let accepted = publisher::publish_batch(&client, "jobs", 3, 90).await.unwrap();
    assert_eq!(accepted, 3);

    let mock = mock.lock().unwrap();
    assert_eq!(mock.created_topics, vec!["jobs".to_string()]);
    assert_eq!(mock.published.len(), 3);
    for (index, message) in mock.published.iter().enumerate() {
        assert_eq!(message["attributes"]["numJobs"], "3");
        let data = BASE64.decode(message["data"].as_str().unwrap()).unwrap();
        let body: Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(body["id"], index as u64 + 1);
        assert_eq!(body["duration"], "90s");
    }
}

#[tokio::test]
async fn test_existing_topic_is_reused() {
    let mut mock = subscribed();
    mock.topics.insert("jobs".to_string());
    let (client, mock) = start_mock(mock).await;

    client.ensure_topic("jobs").await.unwrap();
    publisher::publish_done(&client, "jobs").await.unwrap();

    let mock = mock.lock().unwrap();
    assert!(mock.created_topics.is_empty());
    assert_eq!(mock.published.len(), 1);
    assert_eq!(mock.published[0]["attributes"]["numJobs"], "0");
    assert_eq!(mock.published[0]["data"], BASE64.encode("DONE"));
}

#[tokio::test]
async fn test_purge_seeks_subscription_to_now() {
    let (client, mock) = start_mock(subscribed()).await;
    let before = OffsetDateTime::now_utc();

    publisher::purge(&client, "work-sub").await.unwrap();

    let mock = mock.lock().unwrap();
    assert_eq!(mock.seeks.len(), 1);
    let sought = OffsetDateTime::parse(&mock.seeks[0], &Rfc3339).unwrap();
    assert!(sought >= before - Duration::from_secs(1));
}

#[tokio::test]
async fn test_purge_of_unknown_subscription_fails() {
    let (client, _mock) = start_mock(subscribed()).await;

    let error = publisher::purge(&client, "nope").await.unwrap_err();

    assert!(matches!(error, publisher::PublishError::Seek { .. }));
}
