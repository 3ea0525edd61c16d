use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use super::{NotificationKind, Notifier, NotifyError};

pub struct HttpNotifier {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpNotifier {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: Uuid,
        context: serde_json::Value,
    ) -> Result<(), NotifyError> {
        let url = format!("{}/v1/notifications", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "kind": kind.as_str(),
                "recipient_id": recipient,
                "context": context,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected(format!("{status}: {body}")));
        }
        Ok(())
    }
}
