//! AWS SQS consumer and sender.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::BehaviorVersion;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use drudge_core::config::{AwsConfig, SqsConfig};
use drudge_core::{MessageCodec, WorkMessage};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::backend::Sender;
use crate::consumer::{QueueConsumer, QueueHealth, QueueMessage};
use crate::error::QueueError;

/// SQS never waits longer than 20s on a receive.
const MAX_WAIT_SECS: i32 = 20;
/// SQS returns at most 10 messages per receive.
const MAX_BATCH: i32 = 10;

/// Convert a receive response. A message without a receipt handle could
/// never be deleted, so it is skipped and left to SQS to redeliver.
fn to_queue_messages(sqs_messages: Vec<Message>) -> Vec<QueueMessage> {
    sqs_messages
        .into_iter()
        .filter_map(|msg| {
            let id = msg.message_id().unwrap_or("unknown").to_string();
            let Some(receipt_handle) = msg.receipt_handle() else {
                warn!(message_id = %id, "SQS message has no receipt handle, skipping");
                return None;
            };

            let attempt_count = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|c| c.parse::<u32>().ok())
                .unwrap_or(1);

            Some(QueueMessage {
                receipt_handle: receipt_handle.to_string(),
                body: msg.body().unwrap_or("").to_string(),
                id,
                attempt_count,
            })
        })
        .collect()
}

/// Build an SQS client from project config.
fn build_client(aws: &AwsConfig) -> Client {
    let region = aws_sdk_sqs::config::Region::new(aws.region.clone());

    // Build the SQS config directly instead of aws_config::defaults(), which
    // would pick up a generic AWS_ENDPOINT_URL meant for another service.
    let mut sqs_config = aws_sdk_sqs::Config::builder()
        .region(region)
        .behavior_version(BehaviorVersion::latest());

    if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
        let creds = Credentials::new(
            key_id,
            secret,
            aws.session_token.clone(),
            None,
            "drudge-static",
        );
        sqs_config = sqs_config.credentials_provider(creds);
    }

    if let Some(endpoint) = aws.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
        let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        sqs_config = sqs_config.endpoint_url(url);
    }

    Client::from_conf(sqs_config.build())
}

/// Resolves a queue URL from an explicit URL or a queue name, once.
struct QueueUrl {
    configured: Option<String>,
    name: Option<String>,
    resolved: OnceCell<String>,
}

impl QueueUrl {
    fn new(sqs: &SqsConfig) -> Self {
        Self {
            configured: sqs.queue_url.clone().filter(|u| !u.is_empty()),
            name: sqs.queue_name.clone().filter(|n| !n.is_empty()),
            resolved: OnceCell::new(),
        }
    }

    async fn resolve(&self, client: &Client) -> Result<&str, QueueError> {
        let url = self.resolved.get_or_try_init(|| self.lookup(client)).await?;
        Ok(url.as_str())
    }

    async fn lookup(&self, client: &Client) -> Result<String, QueueError> {
        if let Some(url) = &self.configured {
            return Ok(url.clone());
        }
        let name = self
            .name
            .as_deref()
            .ok_or_else(|| QueueError::NotFound("no SQS queue name or URL configured".into()))?;
        let resp = client
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .map_err(|e| QueueError::NotFound(format!("{name}: {e:?}")))?;
        resp.queue_url()
            .map(str::to_string)
            .ok_or_else(|| QueueError::NotFound(format!("{name}: no URL returned")))
    }

    fn get(&self) -> Result<&str, QueueError> {
        self.resolved
            .get()
            .map(String::as_str)
            .ok_or_else(|| QueueError::NotStarted("SQS queue URL not resolved".into()))
    }
}

/// SQS-backed queue consumer.
pub struct SqsConsumer {
    client: Client,
    url: QueueUrl,
    wait_time_secs: i32,
    visibility_timeout_secs: i32,
}

impl SqsConsumer {
    pub fn new(aws: &AwsConfig, sqs: &SqsConfig) -> Self {
        info!(
            queue = %sqs.queue_label(),
            region = %aws.region,
            "SQS consumer initialized"
        );
        Self {
            client: build_client(aws),
            url: QueueUrl::new(sqs),
            wait_time_secs: sqs.wait_time_secs.clamp(0, MAX_WAIT_SECS),
            visibility_timeout_secs: sqs.visibility_timeout_secs,
        }
    }
}

#[async_trait]
impl QueueConsumer for SqsConsumer {
    fn provider(&self) -> &str {
        "sqs"
    }

    #[instrument(skip_all)]
    async fn connect(&self) -> Result<(), QueueError> {
        let url = self.url.resolve(&self.client).await?;
        info!(queue_url = %url, "Resolved SQS queue");
        Ok(())
    }

    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let queue_url = self.url.get()?;
        let capped = (max_messages as i32).clamp(1, MAX_BATCH);

        debug!(max_messages = capped, "Polling SQS");

        let resp = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(capped)
            .wait_time_seconds(self.wait_time_secs)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS receive failed: {e:?}")))?;

        let sqs_messages = resp.messages.unwrap_or_default();
        debug!(count = sqs_messages.len(), "Received SQS messages");

        Ok(to_queue_messages(sqs_messages))
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "Deleting SQS message");

        self.client
            .delete_message()
            .queue_url(self.url.get()?)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Ack(format!("SQS delete failed: {e:?}")))?;

        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        let resp = self
            .client
            .get_queue_attributes()
            .queue_url(self.url.get()?)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS health check failed: {e:?}")))?;

        let count = resp
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|v| v.parse::<u64>().ok());

        Ok(QueueHealth {
            connected: true,
            approximate_message_count: count,
            provider: "sqs".to_string(),
        })
    }
}

/// Enqueues work messages onto an SQS queue.
pub struct SqsSender {
    client: Client,
    url: QueueUrl,
    codec: MessageCodec,
    message_group_id: Option<String>,
}

impl SqsSender {
    pub fn new(aws: &AwsConfig, sqs: &SqsConfig, codec: MessageCodec) -> Self {
        Self {
            client: build_client(aws),
            url: QueueUrl::new(sqs),
            codec,
            message_group_id: sqs.message_group_id.clone(),
        }
    }
}

#[async_trait]
impl Sender for SqsSender {
    async fn send(&self, message: &WorkMessage) -> Result<(), QueueError> {
        let body = self.codec.encode(message)?;
        let queue_url = self.url.resolve(&self.client).await?;

        let mut req = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body);
        if let Some(group) = &self.message_group_id {
            req = req.message_group_id(group);
        }

        req.send()
            .await
            .map_err(|e| QueueError::Provider(format!("SQS send failed: {e:?}")))?;

        debug!(method = %message.method(), "Sent SQS message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drudge_core::AckPolicy;

    fn aws() -> AwsConfig {
        AwsConfig {
            region: "us-east-1".into(),
            access_key_id: Some("test".into()),
            secret_access_key: Some("test".into()),
            session_token: None,
            endpoint_url: Some("localhost:4566".into()),
        }
    }

    fn sqs(url: Option<&str>) -> SqsConfig {
        SqsConfig {
            queue_name: Some("jobs".into()),
            queue_url: url.map(str::to_string),
            wait_time_secs: 60,
            max_messages: 10,
            visibility_timeout_secs: 30,
            ack_policy: AckPolicy::Always,
            message_group_id: None,
        }
    }

    #[tokio::test]
    async fn test_wait_time_is_capped() {
        let consumer = SqsConsumer::new(&aws(), &sqs(None));
        assert_eq!(consumer.wait_time_secs, MAX_WAIT_SECS);
    }

    #[test]
    fn test_message_without_receipt_handle_is_skipped() {
        let batch = vec![
            Message::builder()
                .message_id("m-1")
                .receipt_handle("rh-1")
                .body(r#"{"method":"a"}"#)
                .attributes(MessageSystemAttributeName::ApproximateReceiveCount, "3")
                .build(),
            Message::builder().message_id("m-2").body(r#"{"method":"b"}"#).build(),
            Message::builder()
                .message_id("m-3")
                .receipt_handle("rh-3")
                .body(r#"{"method":"c"}"#)
                .build(),
        ];

        let messages = to_queue_messages(batch);
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m-1", "m-3"]);
        assert_eq!(messages[0].attempt_count, 3);
        assert_eq!(messages[1].attempt_count, 1);
        assert_eq!(messages[1].receipt_handle, "rh-3");
    }

    #[tokio::test]
    async fn test_poll_before_connect_is_not_started() {
        let consumer = SqsConsumer::new(&aws(), &sqs(None));
        let err = consumer.poll_batch(10).await.unwrap_err();
        assert!(matches!(err, QueueError::NotStarted(_)));
    }

    #[tokio::test]
    async fn test_configured_url_needs_no_lookup() {
        let consumer = SqsConsumer::new(&aws(), &sqs(Some("http://localhost:4566/000000000000/jobs")));
        consumer.connect().await.unwrap();
        assert_eq!(
            consumer.url.get().unwrap(),
            "http://localhost:4566/000000000000/jobs"
        );
    }
}
