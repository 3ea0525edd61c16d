use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum MeetingError {
    #[error("meeting provider transport error: {0}")]
    Transport(String),
    #[error("meeting provider rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for MeetingError {
    fn from(err: reqwest::Error) -> Self {
        MeetingError::Transport(err.to_string())
    }
}

/// Real-time room management. Failures here are never fatal to a session
/// transition; the lifecycle logs and carries on.
#[async_trait]
pub trait MeetingProvider: Send + Sync {
    /// Returns the provider room name for the session.
    async fn create_room(&self, session_id: Uuid) -> Result<String, MeetingError>;

    async fn close_room(&self, session_id: Uuid) -> Result<(), MeetingError>;
}

mod http_impl;
mod mock;

pub use http_impl::HttpMeetingProvider;
#[allow(unused_imports)]
pub use mock::MockMeetingProvider;
