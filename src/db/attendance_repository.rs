use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::attendance_event::{AttendanceEvent, NewAttendanceEvent};
use crate::models::attendance_record::{AttendanceOverride, AttendanceRecord, AutoAttendance};

#[async_trait]
pub trait AttendanceRepository: Send + Sync {
    /// Append one immutable event. Events are never updated or deleted.
    async fn append_event(&self, ev: NewAttendanceEvent) -> Result<AttendanceEvent, sqlx::Error>;

    /// All events for a session, ordered by `occurred_at` then `recorded_at`.
    async fn list_events(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<AttendanceEvent>, sqlx::Error>;

    /// Fetch-or-create the (session, participant) record. Lazily created on
    /// first event when scheduling did not pre-create it.
    async fn ensure_record(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> Result<AttendanceRecord, sqlx::Error>;

    async fn find_record(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
    ) -> Result<Option<AttendanceRecord>, sqlx::Error>;

    async fn list_records(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<AttendanceRecord>, sqlx::Error>;

    /// Write one aggregation result. Auto fields always update; the final
    /// status is left untouched when the record is manually overridden.
    async fn store_auto_result(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        auto: &AutoAttendance,
        finalized_at: OffsetDateTime,
    ) -> Result<AttendanceRecord, sqlx::Error>;

    /// Staff override; freezes the record against automatic reclassification.
    async fn apply_override(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        ov: &AttendanceOverride,
        now: OffsetDateTime,
    ) -> Result<Option<AttendanceRecord>, sqlx::Error>;
}
