use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::session::{NewSession, Session};

/// Persistence contract for session rows.
///
/// Every status-changing method is a compare-and-set: the UPDATE carries the
/// expected current status and returns `None` when no row matched, so a
/// concurrent transition loses cleanly instead of clobbering state. Callers
/// re-fetch to distinguish "not found" from "wrong status".
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, new: NewSession, code: &str) -> Result<Session, sqlx::Error>;

    async fn find_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>, sqlx::Error>;

    /// scheduled → live; records `started_at`.
    async fn mark_live(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<Session>, sqlx::Error>;

    /// live|paused → completed; records `ended_at`.
    async fn mark_completed(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        ended_at: OffsetDateTime,
    ) -> Result<Option<Session>, sqlx::Error>;

    /// any non-terminal → cancelled, with audit fields.
    async fn mark_cancelled(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        reason: Option<&str>,
        actor: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<Session>, sqlx::Error>;

    /// live → paused.
    async fn mark_paused(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>, sqlx::Error>;

    /// paused → live.
    async fn mark_resumed(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>, sqlx::Error>;

    /// Moves a still-scheduled session to a new time, keeping the old time
    /// in `rescheduled_from`.
    async fn update_schedule(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        new_time: OffsetDateTime,
        reason: &str,
    ) -> Result<Option<Session>, sqlx::Error>;

    async fn set_meeting_room(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        room: &str,
    ) -> Result<(), sqlx::Error>;

    // Sweep queries (cross-tenant; the worker serves every tenant).

    /// Scheduled sessions whose start time has arrived.
    async fn list_due_for_activation(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Session>, sqlx::Error>;

    /// Live/paused sessions past `scheduled_at + duration + buffer_minutes`.
    async fn list_overrun(
        &self,
        now: OffsetDateTime,
        buffer_minutes: i64,
        limit: i64,
    ) -> Result<Vec<Session>, sqlx::Error>;

    /// Completed sessions (ended before `cutoff`) whose attendance still
    /// needs a pass: an unfinalized record exists, or an event arrived after
    /// the last finalization.
    async fn list_attendance_dirty(
        &self,
        cutoff: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Session>, sqlx::Error>;
}
