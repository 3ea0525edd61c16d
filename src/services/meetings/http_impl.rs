use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use super::{MeetingError, MeetingProvider};

pub struct HttpMeetingProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct CreateRoomResponse {
    room: String,
}

impl HttpMeetingProvider {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, MeetingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MeetingError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl MeetingProvider for HttpMeetingProvider {
    async fn create_room(&self, session_id: Uuid) -> Result<String, MeetingError> {
        let url = format!("{}/v1/rooms", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "session_id": session_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MeetingError::Rejected(format!("{status}: {body}")));
        }

        let parsed: CreateRoomResponse = response
            .json()
            .await
            .map_err(|e| MeetingError::Transport(e.to_string()))?;
        Ok(parsed.room)
    }

    async fn close_room(&self, session_id: Uuid) -> Result<(), MeetingError> {
        let url = format!("{}/v1/rooms/{}/close", self.base_url, session_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MeetingError::Rejected(format!("{status}: {body}")));
        }
        Ok(())
    }
}
