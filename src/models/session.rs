use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// What kind of meeting this session is. Quota accounting dispatches on
/// this tag: course sessions are sold separately and never consume a
/// subscription quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "session_kind", rename_all = "snake_case")]
pub enum SessionKind {
    OneOnOne,
    Circle,
    Course,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::OneOnOne => "one_on_one",
            SessionKind::Circle => "circle",
            SessionKind::Course => "course",
        }
    }

    pub fn counts_toward_quota(&self) -> bool {
        !matches!(self, SessionKind::Course)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "session_status", rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Live,
    Paused,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Live => "live",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    pub fn can_activate(&self) -> bool {
        matches!(self, SessionStatus::Scheduled)
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, SessionStatus::Live | SessionStatus::Paused)
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: SessionKind,
    pub teacher_id: Uuid,
    /// None for course sessions, which are not quota-counted.
    pub subscription_id: Option<Uuid>,
    pub status: SessionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    pub duration_minutes: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    pub cancelled_by: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    /// Previous scheduled time, set when the session is rescheduled.
    #[serde(with = "time::serde::rfc3339::option")]
    pub rescheduled_from: Option<OffsetDateTime>,
    pub reschedule_reason: Option<String>,
    /// false→true exactly once; cleared only by the audited quota reversal.
    pub quota_counted: bool,
    pub meeting_room: Option<String>,
    pub session_code: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub retired_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Session {
    /// The instant the session is expected to be over.
    pub fn planned_end(&self) -> OffsetDateTime {
        self.scheduled_at + time::Duration::minutes(self.duration_minutes as i64)
    }

    /// End the auto-completion sweep uses when no explicit end was recorded.
    pub fn effective_end(&self) -> OffsetDateTime {
        self.ended_at.unwrap_or_else(|| self.planned_end())
    }

    pub fn counts_toward_quota(&self) -> bool {
        self.kind.counts_toward_quota() && self.subscription_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub tenant_id: Uuid,
    pub kind: SessionKind,
    pub teacher_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub scheduled_at: OffsetDateTime,
    pub duration_minutes: i32,
}
