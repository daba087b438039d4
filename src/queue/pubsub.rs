//! Google Cloud Pub/Sub client over the REST API
//!
//! Talks to `pubsub.googleapis.com` with an access token from the GKE
//! metadata server (workload identity), or to the Pub/Sub emulator over
//! plain HTTP without credentials when an emulator host is configured.

use super::{
    MessageQueue, OutgoingMessage, QueueError, ReceivedMessage, Result, TopicPublisher,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com/v1";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Connection settings for the Pub/Sub REST client
#[derive(Debug, Clone)]
pub struct PubSubSettings {
    pub project_id: String,
    /// `host:port` of a Pub/Sub emulator; disables authentication
    pub emulator_host: Option<String>,
    /// Overrides the API base URL (tests, private endpoints)
    pub endpoint: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// How long a single pull may wait on the server before being reissued
    pub pull_timeout: Duration,
    /// Pause between pulls that came back empty
    pub idle_poll: Duration,
}

impl PubSubSettings {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            emulator_host: None,
            endpoint: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            pull_timeout: Duration::from_secs(90),
            idle_poll: Duration::from_secs(1),
        }
    }

    pub fn with_emulator_host(mut self, host: Option<String>) -> Self {
        self.emulator_host = host.filter(|host| !host.is_empty());
        self
    }

    fn base_url(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.trim_end_matches('/').to_string();
        }
        match &self.emulator_host {
            Some(host) => format!("http://{}/v1", host.trim_end_matches('/')),
            None => PUBSUB_ENDPOINT.to_string(),
        }
    }

    fn uses_credentials(&self) -> bool {
        self.emulator_host.is_none() && self.endpoint.is_none()
    }
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Access tokens for the real service; the emulator needs none
#[derive(Debug)]
enum TokenSource {
    Anonymous,
    Metadata(Mutex<Option<CachedToken>>),
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

/// Pub/Sub REST client bound to a project
#[derive(Debug, Clone)]
pub struct PubSubClient {
    http: Client,
    base_url: String,
    project_id: String,
    tokens: Arc<TokenSource>,
    pull_timeout: Duration,
    idle_poll: Duration,
}

impl PubSubClient {
    /// Build the client; no network traffic happens until the first call
    pub fn new(settings: PubSubSettings) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .user_agent(concat!("jobgauge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        let tokens = if settings.uses_credentials() {
            TokenSource::Metadata(Mutex::new(None))
        } else {
            TokenSource::Anonymous
        };

        let base_url = settings.base_url();
        info!(%base_url, project_id = %settings.project_id, "Pub/Sub client created");

        Ok(Self {
            http,
            base_url,
            project_id: settings.project_id,
            tokens: Arc::new(tokens),
            pull_timeout: settings.pull_timeout,
            idle_poll: settings.idle_poll,
        })
    }

    /// Look up a subscription and bind a consumer handle to it
    ///
    /// Fails if the subscription does not exist or cannot be read.
    pub async fn subscription(&self, subscription_id: &str) -> Result<PubSubSubscription> {
        let path = self.subscription_path(subscription_id);
        let resource: SubscriptionResource = self
            .send(self.http.get(format!("{}/{}", self.base_url, path)))
            .await?;

        let ack_deadline = resource
            .ack_deadline_seconds
            .map(|secs| Duration::from_secs(u64::from(secs)));

        info!(
            subscription = %resource.name,
            topic = resource.topic.as_deref().unwrap_or("-"),
            ack_deadline_secs = ack_deadline.map(|d| d.as_secs()),
            "Subscription resolved"
        );

        Ok(PubSubSubscription {
            client: self.clone(),
            path,
            ack_deadline,
        })
    }

    fn subscription_path(&self, subscription_id: &str) -> String {
        format!("projects/{}/subscriptions/{}", self.project_id, subscription_id)
    }

    fn topic_path(&self, topic_id: &str) -> String {
        format!("projects/{}/topics/{}", self.project_id, topic_id)
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        match self.tokens.as_ref() {
            TokenSource::Anonymous => Ok(request),
            TokenSource::Metadata(cache) => {
                let mut cache = cache.lock().await;
                let now = Instant::now();

                if let Some(token) = cache.as_ref().filter(|t| t.expires_at > now) {
                    return Ok(request.bearer_auth(&token.value));
                }

                let token: MetadataToken = self
                    .http
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| QueueError::Auth(e.to_string()))?
                    .error_for_status()
                    .map_err(|e| QueueError::Auth(e.to_string()))?
                    .json()
                    .await
                    .map_err(|e| QueueError::Auth(e.to_string()))?;

                debug!(expires_in = token.expires_in, "Access token refreshed");

                let lifetime = Duration::from_secs(token.expires_in);
                let request = request.bearer_auth(&token.access_token);
                *cache = Some(CachedToken {
                    value: token.access_token,
                    expires_at: now + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
                });
                Ok(request)
            }
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.authorize(request).await?.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::NotFound(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| QueueError::Decode(e.to_string()))
    }

    async fn create_topic(&self, topic: &str) -> Result<()> {
        let url = format!("{}/{}", self.base_url, self.topic_path(topic));
        match self.send::<Empty>(self.http.put(url).json(&Empty {})).await {
            Ok(_) => {
                info!(topic, "Topic created");
                Ok(())
            }
            // Lost a race with another publisher; the topic exists now.
            Err(QueueError::Status { status: 409, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Consumer handle for one subscription
#[derive(Debug, Clone)]
pub struct PubSubSubscription {
    client: PubSubClient,
    path: String,
    ack_deadline: Option<Duration>,
}

impl PubSubSubscription {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Redelivery timeout configured on the subscription, when reported
    pub fn ack_deadline(&self) -> Option<Duration> {
        self.ack_deadline
    }

    async fn pull_once(&self) -> Result<Option<ReceivedMessage>> {
        let url = format!("{}/{}:pull", self.client.base_url, self.path);
        let request = self
            .client
            .http
            .post(url)
            .timeout(self.client.pull_timeout)
            .json(&PullRequest { max_messages: 1 });

        let response: PullResponse = match self.client.send(request).await {
            Ok(response) => response,
            Err(QueueError::Timeout) => {
                debug!("Pull timed out without messages");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(response.received_messages.into_iter().next().map(Into::into))
    }
}

#[async_trait]
impl MessageQueue for PubSubSubscription {
    async fn pull(&self) -> Result<ReceivedMessage> {
        loop {
            if let Some(message) = self.pull_once().await? {
                debug!(message_id = %message.message_id, "Message pulled");
                return Ok(message);
            }
            tokio::time::sleep(self.client.idle_poll).await;
        }
    }

    async fn ack(&self, ack_id: &str) -> Result<()> {
        let url = format!("{}/{}:acknowledge", self.client.base_url, self.path);
        let body = AcknowledgeRequest {
            ack_ids: vec![ack_id.to_string()],
        };
        self.client
            .send::<Empty>(self.client.http.post(url).json(&body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TopicPublisher for PubSubClient {
    async fn ensure_topic(&self, topic: &str) -> Result<()> {
        let url = format!("{}/{}", self.base_url, self.topic_path(topic));
        match self.send::<serde_json::Value>(self.http.get(url)).await {
            Ok(_) => Ok(()),
            Err(QueueError::NotFound(_)) => self.create_topic(topic).await,
            Err(e) => Err(e),
        }
    }

    async fn publish(&self, topic: &str, messages: Vec<OutgoingMessage>) -> Result<Vec<String>> {
        let url = format!("{}/{}:publish", self.base_url, self.topic_path(topic));
        let body = PublishRequest {
            messages: messages.into_iter().map(Into::into).collect(),
        };
        let response: PublishResponse = self.send(self.http.post(url).json(&body)).await?;
        Ok(response.message_ids)
    }

    async fn seek(&self, subscription: &str, to: OffsetDateTime) -> Result<()> {
        let url = format!("{}/{}:seek", self.base_url, self.subscription_path(subscription));
        let time = to
            .format(&Rfc3339)
            .map_err(|e| QueueError::Decode(e.to_string()))?;
        self.send::<serde_json::Value>(self.http.post(url).json(&SeekRequest { time }))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionResource {
    name: String,
    topic: Option<String>,
    ack_deadline_seconds: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WireMessage,
    delivery_attempt: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    data: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    attributes: HashMap<String, String>,
    #[serde(default, skip_serializing)]
    message_id: String,
    #[serde(default, skip_serializing)]
    publish_time: Option<String>,
}

impl From<WireReceivedMessage> for ReceivedMessage {
    fn from(wire: WireReceivedMessage) -> Self {
        let message = wire.message;
        let data = match BASE64.decode(message.data.as_bytes()) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "Message data is not valid base64");
                Bytes::new()
            }
        };
        let publish_time = message
            .publish_time
            .as_deref()
            .and_then(|t| OffsetDateTime::parse(t, &Rfc3339).ok());

        ReceivedMessage {
            ack_id: wire.ack_id,
            message_id: message.message_id,
            attributes: message.attributes,
            data,
            publish_time,
            delivery_attempt: wire.delivery_attempt,
        }
    }
}

impl From<OutgoingMessage> for WireMessage {
    fn from(message: OutgoingMessage) -> Self {
        Self {
            data: BASE64.encode(&message.data),
            attributes: message.attributes,
            message_id: String::new(),
            publish_time: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest {
    ack_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SeekRequest {
    time: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_url_selection() {
        let real = PubSubSettings::new("demo");
        assert_eq!(real.base_url(), PUBSUB_ENDPOINT);
        assert!(real.uses_credentials());

        let emulator = PubSubSettings::new("demo").with_emulator_host(Some("localhost:8085".into()));
        assert_eq!(emulator.base_url(), "http://localhost:8085/v1");
        assert!(!emulator.uses_credentials());

        let blank = PubSubSettings::new("demo").with_emulator_host(Some(String::new()));
        assert!(blank.emulator_host.is_none());
    }

    #[test]
    fn test_decode_pull_response() {
        let body = json!({
            "receivedMessages": [{
                "ackId": "ack-1",
                "deliveryAttempt": 2,
                "message": {
                    "data": BASE64.encode(br#"{"id":1,"duration":"90s"}"#),
                    "attributes": { "numJobs": "9" },
                    "messageId": "m-1",
                    "publishTime": "2024-05-01T10:00:00.123Z"
                }
            }]
        });

        let response: PullResponse = serde_json::from_value(body).unwrap();
        let message: ReceivedMessage = response.received_messages.into_iter().next().unwrap().into();

        assert_eq!(message.ack_id, "ack-1");
        assert_eq!(message.message_id, "m-1");
        assert_eq!(message.attributes["numJobs"], "9");
        assert_eq!(message.data.as_ref(), br#"{"id":1,"duration":"90s"}"#);
        assert_eq!(message.delivery_attempt, Some(2));
        assert!(message.publish_time.is_some());
    }

    #[test]
    fn test_decode_empty_pull_response() {
        let response: PullResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.received_messages.is_empty());
    }

    #[test]
    fn test_encode_publish_request() {
        let request = PublishRequest {
            messages: vec![
                OutgoingMessage::new("DONE").with_attribute("numJobs", "0").into(),
                OutgoingMessage::new("plain").into(),
            ],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["data"], BASE64.encode("DONE"));
        assert_eq!(value["messages"][0]["attributes"]["numJobs"], "0");
        assert!(value["messages"][1].get("attributes").is_none());
        assert!(value["messages"][0].get("messageId").is_none());
    }
}
