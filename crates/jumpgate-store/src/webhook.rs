//! Chat webhook notifier.

use crate::traits::Notifier;
use crate::StoreResult;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

const WEBHOOK_URL: &str = "https://oapi.dingtalk.com/robot/send";

/// Notifier that posts text messages to a robot webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_text(&self, token: &str, text: &str) -> StoreResult<()> {
        let body = json!({
            "msgtype": "text",
            "text": { "content": text },
        });

        let resp = self
            .client
            .post(WEBHOOK_URL)
            .query(&[("access_token", token)])
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        debug!(status = %resp.status(), "Sent webhook notification");
        Ok(())
    }
}
