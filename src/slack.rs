use std::time::Duration;

use tracing::error;

use crate::error::{NotifierError, Result};
use crate::types::{DeliveryAck, SlackPayload};

/// Only Slack incoming webhooks are accepted as destinations.
pub const ALLOWED_WEBHOOK_PREFIX: &str = "https://hooks.slack.com/";

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

pub fn build_slack_payload(summary: &str) -> SlackPayload {
    SlackPayload {
        text: summary.to_string(),
    }
}

pub fn validate_webhook_url(webhook_url: &str, allowed_prefix: &str) -> Result<()> {
    if !webhook_url.starts_with(allowed_prefix) {
        return Err(NotifierError::Configuration(format!(
            "SLACK_WEBHOOK_URL must start with {}",
            allowed_prefix
        )));
    }
    Ok(())
}

/// Check the URL against `allowed_prefix`, then post the payload.
///
/// Nothing is sent when the URL is rejected.
pub async fn send_to_slack(webhook_url: &str, allowed_prefix: &str, payload: &SlackPayload) -> Result<DeliveryAck> {
    validate_webhook_url(webhook_url, allowed_prefix)?;
    post_webhook(webhook_url, payload).await
}

async fn post_webhook(webhook_url: &str, payload: &SlackPayload) -> Result<DeliveryAck> {
    let client = reqwest::Client::builder()
        .timeout(WEBHOOK_TIMEOUT)
        .build()
        .map_err(|e| NotifierError::Delivery(format!("Failed to build HTTP client: {}", e)))?;
    let res = client
        .post(webhook_url)
        .json(payload)
        .send()
        .await
        .map_err(|e| NotifierError::Delivery(format!("Failed to send Slack request: {}", e)))?;
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        error!("Slack webhook failed: {} - {}", status, body);
        return Err(NotifierError::Delivery(format!(
            "Slack webhook returned non-success status {}",
            status
        )));
    }
    let body = res.text().await.unwrap_or_default();
    Ok(DeliveryAck::Webhook(body))
}
