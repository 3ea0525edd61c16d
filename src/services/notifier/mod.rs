use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notifier transport error: {0}")]
    Transport(String),
    #[error("notifier rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SessionScheduled,
    SessionStarted,
    SessionCompleted,
    SessionCancelled,
    AttendanceMarked,
    RenewalSucceeded,
    RenewalFailed,
    GracePeriodStarted,
    SubscriptionSuspended,
    SubscriptionReactivated,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::SessionScheduled => "session_scheduled",
            NotificationKind::SessionStarted => "session_started",
            NotificationKind::SessionCompleted => "session_completed",
            NotificationKind::SessionCancelled => "session_cancelled",
            NotificationKind::AttendanceMarked => "attendance_marked",
            NotificationKind::RenewalSucceeded => "renewal_succeeded",
            NotificationKind::RenewalFailed => "renewal_failed",
            NotificationKind::GracePeriodStarted => "grace_period_started",
            NotificationKind::SubscriptionSuspended => "subscription_suspended",
            NotificationKind::SubscriptionReactivated => "subscription_reactivated",
        }
    }
}

/// Delivery (channel selection, contact resolution, templating,
/// translation) belongs to the platform's notification service; the engine
/// only states what happened, to whom, with which context.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: Uuid,
        context: serde_json::Value,
    ) -> Result<(), NotifyError>;
}

mod http_impl;
mod mock_notifier;

pub use http_impl::HttpNotifier;
#[allow(unused_imports)]
pub use mock_notifier::MockNotifier;
