use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::error;

use crate::auth::TokenSource;
use crate::error::{NotifierError, Result};
use crate::types::{DeliveryAck, NotificationPayload};

const PUBSUB_BASE_URL: &str = "https://pubsub.googleapis.com/v1";

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Topic the email-dispatch function subscribes to
#[derive(Debug, Clone, PartialEq)]
pub struct QueueTarget {
    pub project: String,
    pub topic: String,
    pub recipient: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PublishRequest {
    pub messages: Vec<PubsubMessage>,
}

#[derive(Debug, Serialize)]
pub struct PubsubMessage {
    pub data: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Encode a payload as one Pub/Sub message: JSON bytes, base64 for the REST API.
pub fn build_publish_request(target: &QueueTarget, payload: &NotificationPayload) -> Result<PublishRequest> {
    let bytes = serde_json::to_vec(payload)
        .map_err(|e| NotifierError::Delivery(format!("Failed to serialize payload: {}", e)))?;
    let mut attributes = BTreeMap::new();
    if let Some(recipient) = &target.recipient {
        attributes.insert("recipient".to_string(), recipient.clone());
    }
    Ok(PublishRequest {
        messages: vec![PubsubMessage {
            data: BASE64.encode(bytes),
            attributes,
        }],
    })
}

pub struct PubsubClient {
    client: reqwest::Client,
    token: TokenSource,
    base_url: String,
}

impl PubsubClient {
    pub fn new(token: TokenSource) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: PUBSUB_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn publish(&self, target: &QueueTarget, payload: &NotificationPayload) -> Result<DeliveryAck> {
        let request = build_publish_request(target, payload)?;
        let token = self.token
            .token(&self.client)
            .await
            .map_err(|e| NotifierError::Delivery(format!("{:#}", e)))?;
        let url = format!(
            "{}/projects/{}/topics/{}:publish",
            self.base_url, target.project, target.topic
        );

        let res = self.client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| NotifierError::Delivery(format!("Failed to send publish request: {}", e)))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            error!("Pub/Sub publish failed: {} - {}", status, body);
            return Err(NotifierError::Delivery(format!(
                "Pub/Sub publish returned non-success status {}",
                status
            )));
        }

        let response: PublishResponse = res
            .json()
            .await
            .map_err(|e| NotifierError::Delivery(format!("Invalid publish response: {}", e)))?;
        let message_id = response.message_ids.into_iter().next().ok_or_else(|| {
            NotifierError::Delivery("Pub/Sub accepted the request but returned no message id".to_string())
        })?;
        Ok(DeliveryAck::Queue { message_id })
    }
}
