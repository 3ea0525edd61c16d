use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attendance_event_kind", rename_all = "snake_case")]
pub enum AttendanceEventKind {
    Joined,
    Left,
}

impl AttendanceEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceEventKind::Joined => "joined",
            AttendanceEventKind::Left => "left",
        }
    }
}

/// One immutable join/leave fact from the meeting provider. Rows are only
/// ever appended; the aggregator re-derives everything else from them.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct AttendanceEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub session_id: Uuid,
    pub participant_id: Uuid,
    pub kind: AttendanceEventKind,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
    /// Provider-side reference for audit; synthesized closing events carry
    /// the reconciliation marker here.
    pub source_ref: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

pub const RECONCILIATION_SOURCE: &str = "reconciliation:synthesized-leave";

#[derive(Debug, Clone)]
pub struct NewAttendanceEvent {
    pub tenant_id: Uuid,
    pub session_id: Uuid,
    pub participant_id: Uuid,
    pub kind: AttendanceEventKind,
    pub occurred_at: OffsetDateTime,
    pub source_ref: Option<String>,
}
