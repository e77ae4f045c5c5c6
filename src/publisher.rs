use async_trait::async_trait;
use tracing::{info, warn};

use crate::auth::TokenSource;
use crate::error::{NotifierError, Result};
use crate::pubsub::{PubsubClient, QueueTarget};
use crate::report::OutlierReport;
use crate::slack::{build_slack_payload, send_to_slack, ALLOWED_WEBHOOK_PREFIX};
use crate::types::{Config, DeliveryAck, NotificationPayload};

/// The single sink a deployment delivers to.
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Webhook(String),
    Queue(QueueTarget),
}

impl Destination {
    /// Pick the sink from whichever destination settings are present. A
    /// webhook URL takes precedence over a queue topic.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        if let Some(url) = &cfg.slack_webhook_url {
            if cfg.pubsub_topic.is_some() {
                warn!("both SLACK_WEBHOOK_URL and PUBSUB_TOPIC are set; using the webhook");
            }
            return Ok(Destination::Webhook(url.clone()));
        }
        match (&cfg.pubsub_topic, &cfg.gcp_project) {
            (Some(topic), Some(project)) => Ok(Destination::Queue(QueueTarget {
                project: project.clone(),
                topic: topic.clone(),
                recipient: cfg.notify_recipient.clone(),
            })),
            (Some(_), None) => Err(NotifierError::Configuration(
                "PUBSUB_TOPIC is set but GCP_PROJECT is missing".to_string(),
            )),
            (None, _) => Err(NotifierError::Configuration(
                "no destination configured: set SLACK_WEBHOOK_URL or PUBSUB_TOPIC and GCP_PROJECT".to_string(),
            )),
        }
    }
}

/// Something a finished notification can be delivered to.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Render the report in the shape this sink expects.
    fn payload_for(&self, report: &OutlierReport) -> Result<NotificationPayload>;

    async fn publish(&self, payload: &NotificationPayload) -> Result<DeliveryAck>;
}

/// Delivers to the webhook or queue named by the configuration.
///
/// The destination is resolved on every send, so a missing or rejected
/// destination surfaces as a `Configuration` error in the cycle that tried to
/// use it rather than at startup.
pub struct Publisher {
    config: Config,
    pubsub: PubsubClient,
    allowed_webhook_prefix: String,
}

impl Publisher {
    pub fn new(config: Config) -> Self {
        let pubsub = PubsubClient::new(TokenSource::from_config(&config));
        Self {
            config,
            pubsub,
            allowed_webhook_prefix: ALLOWED_WEBHOOK_PREFIX.to_string(),
        }
    }

    pub fn with_pubsub_client(mut self, pubsub: PubsubClient) -> Self {
        self.pubsub = pubsub;
        self
    }

    /// Replace the webhook allow-list prefix (local mock servers are plain http).
    pub fn with_allowed_webhook_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.allowed_webhook_prefix = prefix.into();
        self
    }

    pub fn destination(&self) -> Result<Destination> {
        Destination::from_config(&self.config)
    }
}

#[async_trait]
impl Sink for Publisher {
    // A missing destination is reported by `publish`, not here.
    fn payload_for(&self, report: &OutlierReport) -> Result<NotificationPayload> {
        Ok(match self.destination() {
            Ok(Destination::Queue(_)) => {
                NotificationPayload::Structured(report.to_structured(self.config.include_html_table))
            }
            _ => NotificationPayload::Text(report.render_text()),
        })
    }

    async fn publish(&self, payload: &NotificationPayload) -> Result<DeliveryAck> {
        let ack = match self.destination()? {
            Destination::Webhook(url) => {
                send_to_slack(&url, &self.allowed_webhook_prefix, &build_slack_payload(payload.summary())).await?
            }
            Destination::Queue(target) => self.pubsub.publish(&target, payload).await?,
        };
        info!(ack = %ack, "notification delivered");
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config_with_env, MockEnvironment};
    use crate::types::QueryWindow;
    use chrono::NaiveDate;

    fn config(env: MockEnvironment) -> Config {
        load_config_with_env(&env).unwrap()
    }

    fn empty_report() -> OutlierReport {
        OutlierReport::new(NaiveDate::from_ymd_opt(2024, 1, 9).unwrap(), QueryWindow::SingleDay, &[])
    }

    #[test]
    fn test_destination_selection() {
        let cfg = config(MockEnvironment::new().with_var("SLACK_WEBHOOK_URL", "https://hooks.slack.com/services/x"));
        assert_eq!(
            Destination::from_config(&cfg).unwrap(),
            Destination::Webhook("https://hooks.slack.com/services/x".to_string())
        );

        let cfg = config(MockEnvironment::new()
            .with_var("PUBSUB_TOPIC", "emails")
            .with_var("GCP_PROJECT", "acme")
            .with_var("NOTIFY_RECIPIENT", "ops@example.com"));
        assert_eq!(
            Destination::from_config(&cfg).unwrap(),
            Destination::Queue(QueueTarget {
                project: "acme".to_string(),
                topic: "emails".to_string(),
                recipient: Some("ops@example.com".to_string()),
            })
        );
    }

    #[test]
    fn test_missing_destination_is_configuration_error() {
        let err = Destination::from_config(&config(MockEnvironment::new())).unwrap_err();
        assert!(matches!(err, NotifierError::Configuration(_)));

        let cfg = config(MockEnvironment::new().with_var("PUBSUB_TOPIC", "emails"));
        let err = Destination::from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("GCP_PROJECT"));
    }

    #[test]
    fn test_payload_shape_follows_destination() {
        let webhook = Publisher::new(config(
            MockEnvironment::new().with_var("SLACK_WEBHOOK_URL", "https://hooks.slack.com/services/x"),
        ));
        assert!(matches!(webhook.payload_for(&empty_report()).unwrap(), NotificationPayload::Text(_)));

        let queue = Publisher::new(config(MockEnvironment::new()
            .with_var("PUBSUB_TOPIC", "emails")
            .with_var("GCP_PROJECT", "acme")
            .with_var("INCLUDE_HTML_TABLE", "true")));
        match queue.payload_for(&empty_report()).unwrap() {
            NotificationPayload::Structured(p) => assert!(p.html.is_some()),
            other => panic!("expected structured payload, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_without_destination_is_text() {
        let publisher = Publisher::new(config(MockEnvironment::new()));
        assert_eq!(
            publisher.payload_for(&empty_report()).unwrap(),
            NotificationPayload::Text("No outliers found for 09/01/2024.".to_string())
        );
    }

    #[tokio::test]
    async fn test_disallowed_webhook_fails_before_network() {
        let publisher = Publisher::new(config(
            MockEnvironment::new().with_var("SLACK_WEBHOOK_URL", "http://evil.example/"),
        ));
        let err = publisher
            .publish(&NotificationPayload::Text("hi".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifierError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_publish_to_webhook() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/services/x")
            .match_body(mockito::Matcher::Json(serde_json::json!({"text": "No outliers found for 09/01/2024."})))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let url = format!("{}/services/x", server.url());
        let publisher = Publisher::new(config(MockEnvironment::new().with_var("SLACK_WEBHOOK_URL", url)))
            .with_allowed_webhook_prefix(server.url());
        let payload = publisher.payload_for(&empty_report()).unwrap();
        let ack = publisher.publish(&payload).await.unwrap();

        mock.assert_async().await;
        assert_eq!(ack, DeliveryAck::Webhook("ok".to_string()));
    }
}
