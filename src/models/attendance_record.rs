use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attendance_status", rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// Not yet classified; records start here until finalization.
    Pending,
    Present,
    Late,
    LeftEarly,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Pending => "pending",
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::LeftEarly => "left_early",
            AttendanceStatus::Absent => "absent",
        }
    }
}

/// One row per (session, participant). Auto fields are recomputed by the
/// aggregator on every pass; override fields are written once by staff and
/// freeze the record against further automatic classification.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub session_id: Uuid,
    pub participant_id: Uuid,
    #[serde(with = "time::serde::rfc3339::option")]
    pub auto_join_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub auto_leave_time: Option<OffsetDateTime>,
    pub auto_duration_seconds: i64,
    pub auto_tracked: bool,
    pub manually_overridden: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub override_join_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub override_leave_time: Option<OffsetDateTime>,
    pub override_reason: Option<String>,
    pub overridden_by: Option<Uuid>,
    pub attendance_status: AttendanceStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finalized_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Auto-tracked fields produced by one aggregation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoAttendance {
    pub join_time: Option<OffsetDateTime>,
    pub leave_time: Option<OffsetDateTime>,
    pub duration_seconds: i64,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone)]
pub struct AttendanceOverride {
    pub join_time: Option<OffsetDateTime>,
    pub leave_time: Option<OffsetDateTime>,
    pub status: AttendanceStatus,
    pub reason: String,
    pub actor: Uuid,
}
